//! Plane-to-plane projective maps used to deskew marker candidates.

use crate::{sample_bilinear_u8, GrayImage, GrayImageView};
use nalgebra::{Matrix3, Point2, SMatrix, SymmetricEigen, Vector3};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// 3x3 projective map acting on homogeneous 2D points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Map `p`; points sent to infinity come back non-finite.
    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.h * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
        Point2::new((q.x / q.z) as f32, (q.y / q.z) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn conditioning(pts: &[Point2<f32>; 4]) -> Matrix3<f64> {
    let c = pts
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<f64>, p| {
            acc + Vector3::new(f64::from(p.x), f64::from(p.y), 0.0)
        })
        / 4.0;
    let spread = pts
        .iter()
        .map(|p| (f64::from(p.x) - c.x).hypot(f64::from(p.y) - c.y))
        .sum::<f64>()
        / 4.0;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
}

fn conditioned(t: &Matrix3<f64>, p: Point2<f32>) -> (f64, f64) {
    let v = t * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
    (v.x, v.y)
}

/// Fit `H` with `dst ~ H * src` from four correspondences (normalized DLT).
///
/// `src` and `dst` must list corners in the same order. Collinear or
/// repeated points give `None`.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    let mut a = SMatrix::<f64, 8, 9>::zeros();
    for (k, (s, d)) in src.iter().zip(dst).enumerate() {
        let (x, y) = conditioned(&t_src, *s);
        let (u, v) = conditioned(&t_dst, *d);
        a.set_row(
            2 * k,
            &SMatrix::<f64, 1, 9>::from_row_slice(&[
                -x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u,
            ]),
        );
        a.set_row(
            2 * k + 1,
            &SMatrix::<f64, 1, 9>::from_row_slice(&[
                0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v,
            ]),
        );
    }

    // null vector of A = eigenvector of AᵀA with the smallest eigenvalue
    let eig = SymmetricEigen::new(a.transpose() * a);
    let (idx, _) = eig.eigenvalues.argmin();
    let n = eig.eigenvectors.column(idx);
    let hn = Matrix3::from_fn(|r, c| n[3 * r + c]);

    if !hn.iter().all(|v| v.is_finite()) || hn.determinant().abs() < 1e-9 {
        return None;
    }

    let h = t_dst.try_inverse()? * hn * t_src;
    if h.m33.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h / h.m33))
}

/// Corners of an axis-aligned `side × side` square (TL, TR, BR, BL).
pub fn square_corners(side: f32) -> [Point2<f32>; 4] {
    [
        Point2::new(0.0, 0.0),
        Point2::new(side, 0.0),
        Point2::new(side, side),
        Point2::new(0.0, side),
    ]
}

/// Resample `src` into an `out_w × out_h` raster.
///
/// `img_from_rect` maps raster coordinates into `src`; every output pixel is
/// sampled at its center.
#[cfg_attr(feature = "tracing", instrument(level = "trace", skip(src, img_from_rect)))]
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    img_from_rect: Homography,
    out_w: usize,
    out_h: usize,
) -> GrayImage {
    let data = (0..out_w * out_h)
        .map(|i| {
            let (x, y) = (i % out_w, i / out_w);
            let p = img_from_rect.apply(Point2::new(x as f32 + 0.5, y as f32 + 0.5));
            sample_bilinear_u8(src, p.x, p.y)
        })
        .collect();

    GrayImage {
        width: out_w,
        height: out_h,
        data,
    }
}
