//! Deskew and decode of one candidate quadrilateral.
//!
//! A candidate is warped onto a 120x120 raster of 6x6 cells (20 px each):
//! the outer ring is the border, the inner 4x4 cells carry the orientation
//! cell and 12 identifier bits.

use crate::orientation::{
    canonicalize, classify_orientation, corner_lightness, pattern_bits, Orientation, Rotation,
    DATA_GRID, MAX_MARKER_ID,
};
use crate::DetectError;
use codice_core::{
    homography_from_4pt, sample_mean_3x3, square_corners, warp_perspective_gray, GrayImage,
    GrayImageView,
};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Cells per side of the deskewed marker, border included.
pub const GRID_CELLS: usize = DATA_GRID + 2;
/// Pixel size of one cell in the deskewed raster.
pub const CELL_PX: usize = 20;
/// Side of the deskewed raster.
pub const DESKEW_SIZE: usize = GRID_CELLS * CELL_PX;

/// Parameters for [`decode_candidate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    /// Cells with mean luma above this value are light.
    pub luma_threshold: u8,
    /// Minimum fraction of the border ring matching its majority color.
    pub border_tolerance: f32,
    /// Minimum mean side length in pixels.
    pub min_marker_size: f32,
    /// Maximum mean side length in pixels.
    pub max_marker_size: f32,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            luma_threshold: 70,
            border_tolerance: 0.4,
            min_marker_size: 40.0,
            max_marker_size: 200.0,
        }
    }
}

impl DecoderParams {
    pub fn validate(&self) -> Result<(), DetectError> {
        let (min, max) = (self.min_marker_size, self.max_marker_size);
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(DetectError::InvalidSizeBounds { min, max });
        }
        if !(0.0..=1.0).contains(&self.border_tolerance) {
            return Err(DetectError::InvalidBorderTolerance(self.border_tolerance));
        }
        Ok(())
    }
}

/// Why a candidate was not accepted as a marker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rejection {
    SizeOutOfRange { side: f32 },
    OutsideFrame,
    DegenerateHomography,
    SamplingFailed,
    BorderInconsistent { consistency: f32 },
    Orientation(Orientation),
    IdOutOfRange(u32),
}

/// Identifier read from a deskewed raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeskewedCode {
    pub id: u32,
    pub rotation: Rotation,
    /// Whether binarization was inverted to find the orientation cell.
    pub inverted: bool,
    /// Observed inner cells (row-major, light = 1) after polarity correction.
    pub cells: u16,
}

/// One decoded marker in image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedMarker {
    pub id: u32,
    pub confidence: f32,
    /// Mean of the four corners, in pixels.
    pub center: Point2<f32>,
    /// Marker heading in degrees, `(-180, 180]`, clockwise in image coordinates.
    pub angle: f32,
    /// Angle of the top edge (TL -> TR) before deskewing, in degrees.
    pub deskew_angle: f32,
    pub rotation: Rotation,
    pub inverted: bool,
    /// Corners in TL, TR, BR, BL order.
    pub corners: [Point2<f32>; 4],
}

/// Confidence assigned to a decoded identifier.
pub fn marker_confidence(id: u32) -> f32 {
    let in_range = if id <= MAX_MARKER_ID { 0.3 } else { 0.0 };
    (0.5f32 + in_range + 0.2).min(1.0)
}

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn normalize_degrees(deg: f32) -> f32 {
    let mut a = deg % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

fn mean_side(c: &[Point2<f32>; 4]) -> f32 {
    (0..4).map(|i| (c[(i + 1) % 4] - c[i]).norm()).sum::<f32>() / 4.0
}

fn inside(img: &GrayImageView<'_>, p: Point2<f32>) -> bool {
    p.x.is_finite()
        && p.y.is_finite()
        && p.x >= 0.0
        && p.y >= 0.0
        && p.x <= (img.width.saturating_sub(1)) as f32
        && p.y <= (img.height.saturating_sub(1)) as f32
}

/// Warp the quadrilateral `corners` (TL, TR, BR, BL) onto a `DESKEW_SIZE` square.
pub fn deskew(
    gray: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
) -> Result<GrayImage, Rejection> {
    if !corners.iter().all(|&p| inside(gray, p)) {
        return Err(Rejection::OutsideFrame);
    }
    let rect = square_corners(DESKEW_SIZE as f32);
    let h = homography_from_4pt(&rect, corners).ok_or(Rejection::DegenerateHomography)?;
    Ok(warp_perspective_gray(gray, h, DESKEW_SIZE, DESKEW_SIZE))
}

fn sample_cells(raster: &GrayImageView<'_>, threshold: u8) -> Result<[bool; 36], Rejection> {
    let mut light = [false; GRID_CELLS * GRID_CELLS];
    let half = CELL_PX as f32 / 2.0;
    for r in 0..GRID_CELLS {
        for c in 0..GRID_CELLS {
            let x = (c * CELL_PX) as f32 + half;
            let y = (r * CELL_PX) as f32 + half;
            let v = sample_mean_3x3(raster, x, y).ok_or(Rejection::SamplingFailed)?;
            light[r * GRID_CELLS + c] = v > threshold;
        }
    }
    Ok(light)
}

/// Fraction of the border ring matching the ring's majority color.
fn border_consistency(light: &[bool; 36]) -> f32 {
    let n = GRID_CELLS;
    let ring: Vec<bool> = (0..n * n)
        .filter(|&i| {
            let (r, c) = (i / n, i % n);
            r == 0 || c == 0 || r == n - 1 || c == n - 1
        })
        .map(|i| light[i])
        .collect();
    let light_ring = ring.iter().filter(|&&l| l).count();
    let majority_light = 2 * light_ring > ring.len();
    let ok = ring.iter().filter(|&&l| l == majority_light).count();
    ok as f32 / ring.len() as f32
}

/// Read the identifier from a `DESKEW_SIZE` raster of the marker.
pub fn decode_deskewed(
    raster: &GrayImageView<'_>,
    params: &DecoderParams,
) -> Result<DeskewedCode, Rejection> {
    let mut light = sample_cells(raster, params.luma_threshold)?;

    let mut cells = 0u16;
    for r in 0..DATA_GRID {
        for c in 0..DATA_GRID {
            if light[(r + 1) * GRID_CELLS + c + 1] {
                cells |= 1 << (r * DATA_GRID + c);
            }
        }
    }

    let light_corners = corner_lightness(cells).iter().filter(|&&l| l).count();
    let inverted = light_corners == 0 || light_corners == 4;
    if inverted {
        for v in &mut light {
            *v = !*v;
        }
        cells = !cells;
    }

    let consistency = border_consistency(&light);
    if consistency < params.border_tolerance {
        return Err(Rejection::BorderInconsistent { consistency });
    }

    let rotation = match classify_orientation(corner_lightness(cells)) {
        Orientation::Oriented(rot) => rot,
        other => return Err(Rejection::Orientation(other)),
    };

    let id = pattern_bits(canonicalize(cells, rotation));
    if id > MAX_MARKER_ID {
        return Err(Rejection::IdOutOfRange(id));
    }

    Ok(DeskewedCode {
        id,
        rotation,
        inverted,
        cells,
    })
}

/// Decode a candidate quadrilateral from the preprocessed grayscale frame.
pub fn decode_candidate(
    gray: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
    params: &DecoderParams,
) -> Result<DecodedMarker, Rejection> {
    let corners = crate::contour::order_corners(*corners);

    let side = mean_side(&corners);
    if !(side >= params.min_marker_size && side <= params.max_marker_size) {
        return Err(Rejection::SizeOutOfRange { side });
    }

    let raster = deskew(gray, &corners)?;
    let code = decode_deskewed(&raster.view(), params)?;

    let top = corners[1] - corners[0];
    let deskew_angle = top.y.atan2(top.x).to_degrees();
    let center = Point2::new(
        corners.iter().map(|p| p.x).sum::<f32>() / 4.0,
        corners.iter().map(|p| p.y).sum::<f32>() / 4.0,
    );

    Ok(DecodedMarker {
        id: code.id,
        confidence: marker_confidence(code.id),
        center,
        angle: normalize_degrees(deskew_angle + code.rotation.degrees()),
        deskew_angle,
        rotation: code.rotation,
        inverted: code.inverted,
        corners,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::{cells_for_id, rotate_cells_cw};
    use approx::assert_relative_eq;

    /// Dark ring, inner cells from `cells` (light = 255).
    fn render_deskewed(cells: u16) -> GrayImage {
        let mut img = GrayImage::filled(DESKEW_SIZE, DESKEW_SIZE, 0);
        for r in 0..DATA_GRID {
            for c in 0..DATA_GRID {
                if (cells >> (r * DATA_GRID + c)) & 1 == 0 {
                    continue;
                }
                for y in 0..CELL_PX {
                    for x in 0..CELL_PX {
                        img.set((c + 1) * CELL_PX + x, (r + 1) * CELL_PX + y, 255);
                    }
                }
            }
        }
        img
    }

    fn embed(marker: &GrayImage, w: usize, h: usize, x0: usize, y0: usize) -> GrayImage {
        let mut frame = GrayImage::filled(w, h, 255);
        for y in 0..marker.height {
            for x in 0..marker.width {
                frame.set(x0 + x, y0 + y, marker.get(x, y));
            }
        }
        frame
    }

    #[test]
    fn deskewed_id_five_decodes() {
        let raster = render_deskewed(cells_for_id(5));
        let code = decode_deskewed(&raster.view(), &DecoderParams::default()).expect("decode");
        assert_eq!(code.id, 5);
        assert_eq!(code.rotation, Rotation::Deg0);
        assert!(!code.inverted);
    }

    #[test]
    fn every_quarter_rotation_decodes_to_the_same_id() {
        let canonical = cells_for_id(1234);
        for turns in 0..4u8 {
            let raster = render_deskewed(rotate_cells_cw(canonical, turns));
            let code = decode_deskewed(&raster.view(), &DecoderParams::default())
                .unwrap_or_else(|r| panic!("rotation {turns}: {r:?}"));
            assert_eq!(code.id, 1234);
            assert_eq!(code.rotation, Rotation::from_quarter_turns(turns));
        }
    }

    #[test]
    fn two_light_corners_are_ambiguous() {
        let cells = cells_for_id(9) | (1 << 15);
        let raster = render_deskewed(cells);
        assert_eq!(
            decode_deskewed(&raster.view(), &DecoderParams::default()),
            Err(Rejection::Orientation(Orientation::Ambiguous))
        );
    }

    #[test]
    fn no_light_corner_is_rejected() {
        let cells = cells_for_id(9) & !1;
        let raster = render_deskewed(cells);
        assert!(matches!(
            decode_deskewed(&raster.view(), &DecoderParams::default()),
            Err(Rejection::Orientation(_))
        ));
    }

    fn paint_top_border(raster: &mut GrayImage) {
        for y in 0..CELL_PX {
            for x in 0..DESKEW_SIZE {
                raster.set(x, y, 255);
            }
        }
    }

    #[test]
    fn one_light_border_side_still_decodes() {
        let mut raster = render_deskewed(cells_for_id(77));
        paint_top_border(&mut raster);
        assert_relative_eq!(
            border_consistency(&sample_cells(&raster.view(), 70).expect("cells")),
            0.7
        );
        let code = decode_deskewed(&raster.view(), &DecoderParams::default()).expect("decode");
        assert_eq!(code.id, 77);
    }

    #[test]
    fn border_below_tolerance_is_rejected() {
        let mut raster = render_deskewed(cells_for_id(77));
        paint_top_border(&mut raster);
        let strict = DecoderParams {
            border_tolerance: 0.8,
            ..DecoderParams::default()
        };
        assert_eq!(
            decode_deskewed(&raster.view(), &strict),
            Err(Rejection::BorderInconsistent { consistency: 0.7 })
        );
    }

    #[test]
    fn decodes_marker_embedded_in_frame() {
        let marker = render_deskewed(rotate_cells_cw(cells_for_id(42), 1));
        let frame = embed(&marker, 320, 240, 100, 60);
        let corners = [
            Point2::new(100.0, 60.0),
            Point2::new(220.0, 60.0),
            Point2::new(220.0, 180.0),
            Point2::new(100.0, 180.0),
        ];
        let m = decode_candidate(&frame.view(), &corners, &DecoderParams::default())
            .expect("decode");
        assert_eq!(m.id, 42);
        assert_eq!(m.rotation, Rotation::Deg90);
        assert_relative_eq!(m.confidence, 1.0);
        assert_relative_eq!(m.deskew_angle, 0.0);
        assert_relative_eq!(m.angle, 90.0);
        assert_relative_eq!(m.center.x, 160.0);
        assert_relative_eq!(m.center.y, 120.0);
    }

    #[test]
    fn size_bounds_are_enforced() {
        let frame = GrayImage::filled(100, 100, 255);
        let small = [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ];
        assert!(matches!(
            decode_candidate(&frame.view(), &small, &DecoderParams::default()),
            Err(Rejection::SizeOutOfRange { .. })
        ));
    }

    #[test]
    fn corners_outside_the_frame_are_rejected() {
        let frame = GrayImage::filled(100, 100, 255);
        let quad = [
            Point2::new(50.0, 50.0),
            Point2::new(150.0, 50.0),
            Point2::new(150.0, 150.0),
            Point2::new(50.0, 150.0),
        ];
        assert_eq!(
            decode_candidate(&frame.view(), &quad, &DecoderParams::default()),
            Err(Rejection::OutsideFrame)
        );
    }

    #[test]
    fn angles_wrap_into_half_open_range() {
        assert_relative_eq!(normalize_degrees(270.0), -90.0);
        assert_relative_eq!(normalize_degrees(180.0), 180.0);
        assert_relative_eq!(normalize_degrees(-180.0), 180.0);
        assert_relative_eq!(normalize_degrees(-45.0 + 360.0 * 2.0), -45.0);
    }

    #[test]
    fn confidence_is_capped() {
        assert_relative_eq!(marker_confidence(0), 1.0);
        assert_relative_eq!(marker_confidence(MAX_MARKER_ID + 1), 0.7);
    }
}
