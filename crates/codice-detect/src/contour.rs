//! Candidate quadrilaterals from a binary edge map.
//!
//! External contours of 8-connected foreground components are traced with
//! Moore-neighbour tracing, simplified with a closed Douglas–Peucker pass and
//! kept when they reduce to four roughly square corners.

use codice_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters for [`extract_candidates`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorParams {
    /// Douglas–Peucker tolerance as a fraction of the contour perimeter.
    pub approx_epsilon_frac: f32,
    /// Lower bound on bounding-box `width / height`.
    pub min_aspect_ratio: f32,
    /// Upper bound on bounding-box `width / height`.
    pub max_aspect_ratio: f32,
    /// Contours with a shorter perimeter (px) are dropped before approximation.
    pub min_perimeter: f32,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            approx_epsilon_frac: 0.05,
            min_aspect_ratio: 0.8,
            max_aspect_ratio: 1.25,
            min_perimeter: 80.0,
        }
    }
}

/// Four-corner polygon found in the edge map.
#[derive(Clone, Debug)]
pub struct CandidateRegion {
    /// Corners ordered TL, TR, BR, BL (see [`order_corners`]).
    pub corners: [Point2<f32>; 4],
    /// Traced outer boundary the polygon was simplified from.
    pub contour: Vec<Point2<i32>>,
}

const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

#[inline]
fn is_fg(img: &GrayImageView<'_>, x: i32, y: i32) -> bool {
    img.get_or_zero(x, y) != 0
}

fn dir_of(dx: i32, dy: i32) -> Option<usize> {
    DIRS.iter().position(|&d| d == (dx, dy))
}

/// One clockwise Moore step: first foreground neighbour after `back_dir`.
///
/// Returns the neighbour and the direction from it back to the last
/// background pixel examined.
fn moore_step(
    img: &GrayImageView<'_>,
    cur: Point2<i32>,
    back_dir: usize,
) -> Option<(Point2<i32>, usize)> {
    for k in 1..=8 {
        let d = (back_dir + k) % 8;
        let (nx, ny) = (cur.x + DIRS[d].0, cur.y + DIRS[d].1);
        if is_fg(img, nx, ny) {
            let bd = (back_dir + k - 1) % 8;
            let (bx, by) = (cur.x + DIRS[bd].0, cur.y + DIRS[bd].1);
            let next_back = dir_of(bx - nx, by - ny)?;
            return Some((Point2::new(nx, ny), next_back));
        }
    }
    None
}

/// Trace the outer boundary starting at the first raster-order pixel of a component.
pub fn trace_boundary(img: &GrayImageView<'_>, start: Point2<i32>) -> Vec<Point2<i32>> {
    let mut contour = vec![start];
    let max_steps = 4 * (img.width + img.height) * 8 + img.width * img.height;

    let mut cur = start;
    // raster order guarantees the west neighbour is background
    let mut back = 4usize;
    let mut second: Option<Point2<i32>> = None;

    for _ in 0..max_steps {
        let Some((next, next_back)) = moore_step(img, cur, back) else {
            break;
        };
        match second {
            None => second = Some(next),
            Some(p1) if cur == start && next == p1 => break,
            Some(_) => {}
        }
        contour.push(next);
        cur = next;
        back = next_back;
    }

    if contour.len() > 1 && contour.last() == Some(&start) {
        contour.pop();
    }
    contour
}

fn mark_component(
    img: &GrayImageView<'_>,
    visited: &mut [bool],
    seed: (usize, usize),
    queue: &mut VecDeque<(usize, usize)>,
) {
    let w = img.width;
    queue.clear();
    visited[seed.1 * w + seed.0] = true;
    queue.push_back(seed);
    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in DIRS {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if !is_fg(img, nx, ny) {
                continue;
            }
            let idx = ny as usize * w + nx as usize;
            if !visited[idx] {
                visited[idx] = true;
                queue.push_back((nx as usize, ny as usize));
            }
        }
    }
}

struct OuterContour {
    points: Vec<Point2<i32>>,
    min: Point2<i32>,
    max: Point2<i32>,
}

impl OuterContour {
    fn new(points: Vec<Point2<i32>>) -> Self {
        let mut min = points[0];
        let mut max = points[0];
        for p in &points {
            min = Point2::new(min.x.min(p.x), min.y.min(p.y));
            max = Point2::new(max.x.max(p.x), max.y.max(p.y));
        }
        Self { points, min, max }
    }

    fn contains(&self, p: Point2<i32>) -> bool {
        if p.x < self.min.x || p.x > self.max.x || p.y < self.min.y || p.y > self.max.y {
            return false;
        }
        point_in_polygon(&self.points, p)
    }
}

fn point_in_polygon(poly: &[Point2<i32>], p: Point2<i32>) -> bool {
    let (px, py) = (p.x as f64, p.y as f64);
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (xi, yi) = (poly[i].x as f64, poly[i].y as f64);
        let (xj, yj) = (poly[j].x as f64, poly[j].y as f64);
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Outer boundaries of all 8-connected components not enclosed by another one.
pub fn external_contours(img: &GrayImageView<'_>) -> Vec<Vec<Point2<i32>>> {
    let mut visited = vec![false; img.width * img.height];
    let mut queue = VecDeque::new();
    let mut outers: Vec<OuterContour> = Vec::new();

    for y in 0..img.height {
        for x in 0..img.width {
            let idx = y * img.width + x;
            if visited[idx] || img.data[idx] == 0 {
                continue;
            }
            mark_component(img, &mut visited, (x, y), &mut queue);

            let seed = Point2::new(x as i32, y as i32);
            if outers.iter().any(|c| c.contains(seed)) {
                continue;
            }
            outers.push(OuterContour::new(trace_boundary(img, seed)));
        }
    }

    outers.into_iter().map(|c| c.points).collect()
}

/// Closed perimeter of a pixel contour.
pub fn contour_perimeter(contour: &[Point2<i32>]) -> f32 {
    if contour.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0f32;
    for i in 0..contour.len() {
        let a = contour[i];
        let b = contour[(i + 1) % contour.len()];
        len += (((b.x - a.x).pow(2) + (b.y - a.y).pow(2)) as f32).sqrt();
    }
    len
}

fn dist_to_segment(p: Point2<f32>, a: Point2<f32>, b: Point2<f32>) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f32::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn dp_mark(pts: &[Point2<f32>], chain: &[usize], eps: f32, keep: &mut [bool]) {
    let mut stack = vec![(0usize, chain.len() - 1)];
    while let Some((lo, hi)) = stack.pop() {
        if hi <= lo + 1 {
            continue;
        }
        let (a, b) = (pts[chain[lo]], pts[chain[hi]]);
        let mut best = (lo, 0.0f32);
        for k in lo + 1..hi {
            let d = dist_to_segment(pts[chain[k]], a, b);
            if d > best.1 {
                best = (k, d);
            }
        }
        if best.1 > eps {
            keep[chain[best.0]] = true;
            stack.push((lo, best.0));
            stack.push((best.0, hi));
        }
    }
}

/// Douglas–Peucker simplification of a closed contour.
pub fn approx_polygon_closed(contour: &[Point2<i32>], eps: f32) -> Vec<Point2<f32>> {
    let pts: Vec<Point2<f32>> = contour
        .iter()
        .map(|p| Point2::new(p.x as f32, p.y as f32))
        .collect();
    let n = pts.len();
    if n < 3 {
        return pts;
    }

    // split the ring at the point farthest from the start
    let far = (1..n)
        .max_by(|&i, &j| {
            let di = (pts[i] - pts[0]).norm_squared();
            let dj = (pts[j] - pts[0]).norm_squared();
            di.partial_cmp(&dj).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(1);

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[far] = true;

    let first: Vec<usize> = (0..=far).collect();
    let second: Vec<usize> = (far..n).chain(std::iter::once(0)).collect();
    dp_mark(&pts, &first, eps, &mut keep);
    dp_mark(&pts, &second, eps, &mut keep);

    let mut poly: Vec<Point2<f32>> = (0..n).filter(|&i| keep[i]).map(|i| pts[i]).collect();

    // the start pixel is an arbitrary split point; drop it if it is not a real vertex
    if poly.len() > 3 {
        let m = poly.len();
        if dist_to_segment(poly[0], poly[m - 1], poly[1]) <= eps {
            poly.remove(0);
        }
    }
    poly
}

/// Order four corners TL, TR, BR, BL: clockwise around the centroid (y down),
/// starting from the corner with the smallest `x + y`.
pub fn order_corners(corners: [Point2<f32>; 4]) -> [Point2<f32>; 4] {
    let cx = corners.iter().map(|p| p.x).sum::<f32>() / 4.0;
    let cy = corners.iter().map(|p| p.y).sum::<f32>() / 4.0;

    let mut sorted = corners;
    sorted.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut start = 0;
    for i in 1..4 {
        if sorted[i].x + sorted[i].y < sorted[start].x + sorted[start].y {
            start = i;
        }
    }
    sorted.rotate_left(start);
    sorted
}

fn aspect_ok(poly: &[Point2<f32>], params: &ExtractorParams) -> bool {
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in poly {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let (w, h) = (max_x - min_x, max_y - min_y);
    if w <= 0.0 || h <= 0.0 {
        return false;
    }
    let ratio = w / h;
    ratio >= params.min_aspect_ratio && ratio <= params.max_aspect_ratio
}

/// Find roughly square four-corner polygons in a binary edge map.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(edges, params), fields(width = edges.width, height = edges.height))
)]
pub fn extract_candidates(
    edges: &GrayImageView<'_>,
    params: &ExtractorParams,
) -> Vec<CandidateRegion> {
    let mut out = Vec::new();
    if edges.is_empty() {
        return out;
    }

    for contour in external_contours(edges) {
        let perimeter = contour_perimeter(&contour);
        if perimeter < params.min_perimeter {
            continue;
        }
        let poly = approx_polygon_closed(&contour, params.approx_epsilon_frac * perimeter);
        if poly.len() != 4 {
            log::trace!("contour with {} vertices skipped", poly.len());
            continue;
        }
        if !aspect_ok(&poly, params) {
            log::trace!("contour outside aspect bounds skipped");
            continue;
        }
        out.push(CandidateRegion {
            corners: order_corners([poly[0], poly[1], poly[2], poly[3]]),
            contour,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codice_core::GrayImage;

    fn draw_rect_outline(img: &mut GrayImage, x0: usize, y0: usize, x1: usize, y1: usize) {
        for x in x0..=x1 {
            img.set(x, y0, 255);
            img.set(x, y1, 255);
        }
        for y in y0..=y1 {
            img.set(x0, y, 255);
            img.set(x1, y, 255);
        }
    }

    #[test]
    fn traces_square_outline_clockwise() {
        let mut img = GrayImage::filled(8, 8, 0);
        draw_rect_outline(&mut img, 2, 2, 4, 4);
        let contour = trace_boundary(&img.view(), Point2::new(2, 2));
        assert_eq!(contour.len(), 8);
        assert_eq!(contour[0], Point2::new(2, 2));
        assert_eq!(contour[1], Point2::new(3, 2));
        assert_eq!(contour[7], Point2::new(2, 3));
    }

    #[test]
    fn single_pixel_contour() {
        let mut img = GrayImage::filled(5, 5, 0);
        img.set(2, 2, 255);
        let contours = external_contours(&img.view());
        assert_eq!(contours, vec![vec![Point2::new(2, 2)]]);
    }

    #[test]
    fn nested_components_are_skipped() {
        let mut img = GrayImage::filled(40, 40, 0);
        draw_rect_outline(&mut img, 2, 2, 37, 37);
        draw_rect_outline(&mut img, 10, 10, 20, 20);
        let contours = external_contours(&img.view());
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0][0], Point2::new(2, 2));
    }

    #[test]
    fn separate_components_each_yield_a_contour() {
        let mut img = GrayImage::filled(60, 30, 0);
        draw_rect_outline(&mut img, 2, 2, 20, 20);
        draw_rect_outline(&mut img, 30, 5, 50, 25);
        assert_eq!(external_contours(&img.view()).len(), 2);
    }

    #[test]
    fn square_simplifies_to_four_corners() {
        let mut img = GrayImage::filled(80, 80, 0);
        draw_rect_outline(&mut img, 10, 10, 60, 60);
        let contour = trace_boundary(&img.view(), Point2::new(10, 10));
        let eps = 0.05 * contour_perimeter(&contour);
        let poly = approx_polygon_closed(&contour, eps);
        assert_eq!(poly.len(), 4);
    }

    #[test]
    fn corner_order_is_clockwise_from_top_left() {
        let shuffled = [
            Point2::new(50.0, 52.0),
            Point2::new(10.0, 11.0),
            Point2::new(11.0, 50.0),
            Point2::new(49.0, 9.0),
        ];
        let ordered = order_corners(shuffled);
        assert_eq!(ordered[0], Point2::new(10.0, 11.0));
        assert_eq!(ordered[1], Point2::new(49.0, 9.0));
        assert_eq!(ordered[2], Point2::new(50.0, 52.0));
        assert_eq!(ordered[3], Point2::new(11.0, 50.0));
    }

    #[test]
    fn extracts_square_and_rejects_elongated_rectangle() {
        let mut img = GrayImage::filled(200, 100, 0);
        draw_rect_outline(&mut img, 10, 10, 70, 70);
        draw_rect_outline(&mut img, 100, 20, 190, 50);
        let cands = extract_candidates(&img.view(), &ExtractorParams::default());
        assert_eq!(cands.len(), 1);
        let c = &cands[0];
        assert_eq!(c.corners[0], Point2::new(10.0, 10.0));
        assert_eq!(c.corners[2], Point2::new(70.0, 70.0));
    }

    #[test]
    fn short_contours_are_prefiltered() {
        let mut img = GrayImage::filled(40, 40, 0);
        draw_rect_outline(&mut img, 5, 5, 12, 12);
        assert!(extract_candidates(&img.view(), &ExtractorParams::default()).is_empty());
    }
}
