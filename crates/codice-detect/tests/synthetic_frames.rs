use approx::assert_abs_diff_eq;
use codice_core::{homography_from_4pt, square_corners, Frame, GrayImage};
use codice_detect::{
    cells_for_id, rotate_cells_cw, DetectorParams, MarkerDetector, CELL_PX, DATA_GRID,
    DESKEW_SIZE,
};
use nalgebra::Point2;

/// Luma of the canonical marker at deskewed coordinates `(u, v)`.
fn marker_luma(cells: u16, u: f32, v: f32) -> u8 {
    let c = (u / CELL_PX as f32).floor() as usize;
    let r = (v / CELL_PX as f32).floor() as usize;
    if r == 0 || c == 0 || r > DATA_GRID || c > DATA_GRID {
        return 0;
    }
    let idx = (r - 1) * DATA_GRID + (c - 1);
    if (cells >> idx) & 1 == 1 {
        255
    } else {
        0
    }
}

/// Paint a marker onto a white frame through the homography defined by `corners`.
fn paint_marker(frame: &mut GrayImage, cells: u16, corners: [Point2<f32>; 4]) {
    let side = DESKEW_SIZE as f32;
    let h = homography_from_4pt(&square_corners(side), &corners).expect("homography");
    let inv = h.inverse().expect("invertible");
    for y in 0..frame.height {
        for x in 0..frame.width {
            let p = inv.apply(Point2::new(x as f32 + 0.5, y as f32 + 0.5));
            if p.x >= 0.0 && p.y >= 0.0 && p.x < side && p.y < side {
                frame.set(x, y, marker_luma(cells, p.x, p.y));
            }
        }
    }
}

fn rotated_square(center: Point2<f32>, side: f32, degrees: f32) -> [Point2<f32>; 4] {
    let (s, c) = degrees.to_radians().sin_cos();
    let h = side / 2.0;
    [(-h, -h), (h, -h), (h, h), (-h, h)].map(|(x, y)| {
        Point2::new(center.x + x * c - y * s, center.y + x * s + y * c)
    })
}

/// Absolute difference of two headings in degrees, modulo 360.
fn heading_error(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn detector() -> MarkerDetector {
    MarkerDetector::new(DetectorParams::default()).expect("detector")
}

#[test]
fn axis_aligned_marker_is_found() {
    let mut frame = GrayImage::filled(320, 240, 255);
    paint_marker(
        &mut frame,
        cells_for_id(5),
        rotated_square(Point2::new(160.0, 120.0), 120.0, 0.0),
    );

    let mut det = detector();
    let out = det.detect(&Frame::from_gray(&frame)).expect("detect");
    assert_eq!(out.markers.len(), 1);
    let m = &out.markers[0];
    assert_eq!(m.id, 5);
    assert_abs_diff_eq!(m.center.x, 160.0, epsilon = 2.0);
    assert_abs_diff_eq!(m.center.y, 120.0, epsilon = 2.0);
    assert_abs_diff_eq!(m.angle, 0.0, epsilon = 2.0);
    assert!(m.confidence >= 0.7);
    assert_eq!(det.stats().markers_detected, 1);
}

#[test]
fn quarter_turns_keep_the_id_and_report_the_heading() {
    let expected_angles = [0.0f32, 90.0, 180.0, -90.0];
    for (turns, expected) in expected_angles.iter().enumerate() {
        let mut frame = GrayImage::filled(320, 240, 255);
        paint_marker(
            &mut frame,
            rotate_cells_cw(cells_for_id(300), turns as u8),
            rotated_square(Point2::new(150.0, 110.0), 100.0, 0.0),
        );
        let out = detector()
            .detect(&Frame::from_gray(&frame))
            .expect("detect");
        assert_eq!(out.markers.len(), 1, "rotation {turns}");
        assert_eq!(out.markers[0].id, 300);
        assert!(heading_error(out.markers[0].angle, *expected) < 2.0);
    }
}

#[test]
fn in_plane_rotation_is_reported() {
    for degrees in [30.0f32, 60.0, -20.0] {
        let mut frame = GrayImage::filled(320, 320, 255);
        paint_marker(
            &mut frame,
            cells_for_id(2049),
            rotated_square(Point2::new(160.0, 160.0), 110.0, degrees),
        );
        let out = detector()
            .detect(&Frame::from_gray(&frame))
            .expect("detect");
        assert_eq!(out.markers.len(), 1, "rotation {degrees}");
        assert_eq!(out.markers[0].id, 2049);
        assert!(heading_error(out.markers[0].angle, degrees) < 3.0);
    }
}

#[test]
fn perspective_skew_still_decodes() {
    let mut frame = GrayImage::filled(320, 240, 255);
    let corners = [
        Point2::new(95.0, 55.0),
        Point2::new(215.0, 68.0),
        Point2::new(220.0, 182.0),
        Point2::new(90.0, 176.0),
    ];
    paint_marker(&mut frame, cells_for_id(4095), corners);

    let out = detector()
        .detect(&Frame::from_gray(&frame))
        .expect("detect");
    assert_eq!(out.markers.len(), 1);
    assert_eq!(out.markers[0].id, 4095);
}

#[test]
fn two_markers_are_reported_sorted_by_id() {
    let mut frame = GrayImage::filled(400, 200, 255);
    paint_marker(
        &mut frame,
        cells_for_id(900),
        rotated_square(Point2::new(100.0, 100.0), 90.0, 0.0),
    );
    paint_marker(
        &mut frame,
        cells_for_id(17),
        rotated_square(Point2::new(290.0, 100.0), 90.0, 10.0),
    );

    let mut det = detector();
    let out = det.detect(&Frame::from_gray(&frame)).expect("detect");
    let ids: Vec<u32> = out.markers.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![17, 900]);
    assert!(out.candidates.len() >= 2);
}

#[test]
fn markers_below_the_size_bound_are_ignored() {
    let mut frame = GrayImage::filled(200, 200, 255);
    paint_marker(
        &mut frame,
        cells_for_id(5),
        rotated_square(Point2::new(100.0, 100.0), 30.0, 0.0),
    );
    let out = detector()
        .detect(&Frame::from_gray(&frame))
        .expect("detect");
    assert!(out.markers.is_empty());
}

#[test]
fn bgr_frames_are_converted() {
    let mut gray = GrayImage::filled(320, 240, 255);
    paint_marker(
        &mut gray,
        cells_for_id(64),
        rotated_square(Point2::new(160.0, 120.0), 120.0, 0.0),
    );
    let bgr: Vec<u8> = gray.data.iter().flat_map(|&v| [v, v, v]).collect();

    let out = detector()
        .detect(&Frame::new(320, 240, 3, &bgr))
        .expect("detect");
    assert_eq!(out.markers.len(), 1);
    assert_eq!(out.markers[0].id, 64);
}
