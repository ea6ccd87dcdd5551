//! Frame conditioning ahead of contour extraction.
//!
//! The detector decodes from the contrast-adjusted grayscale image and
//! extracts candidates from a closed binary edge map of the same image.

use codice_core::{GrayImage, GrayImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Invalid preprocessing parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("blur kernel must be odd and >= 1 (got {0})")]
    InvalidBlurKernel(usize),
    #[error("contrast alpha must be positive and finite (got {0})")]
    InvalidContrast(f32),
    #[error("brightness beta must be finite (got {0})")]
    InvalidBrightness(f32),
    #[error("edge threshold must be positive (got {0})")]
    InvalidEdgeThreshold(u32),
}

/// Parameters for [`preprocess`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    /// Box blur kernel side. `1` disables blurring.
    pub blur_kernel: usize,
    /// Contrast gain applied as `v * alpha + beta`.
    pub contrast_alpha: f32,
    /// Brightness offset applied as `v * alpha + beta`.
    pub brightness_beta: f32,
    /// Minimum Sobel L1 gradient magnitude for an edge pixel.
    pub edge_threshold: u32,
    /// Run a 3x3 morphological close on the edge map.
    pub close_edges: bool,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            blur_kernel: 1,
            contrast_alpha: 1.3,
            brightness_beta: 20.0,
            edge_threshold: 100,
            close_edges: true,
        }
    }
}

impl PreprocessParams {
    /// Smoothing suited to noisy sensors, at the cost of a few ms per frame.
    pub fn for_noisy_input() -> Self {
        Self {
            blur_kernel: 5,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            return Err(PreprocessError::InvalidBlurKernel(self.blur_kernel));
        }
        if !(self.contrast_alpha.is_finite() && self.contrast_alpha > 0.0) {
            return Err(PreprocessError::InvalidContrast(self.contrast_alpha));
        }
        if !self.brightness_beta.is_finite() {
            return Err(PreprocessError::InvalidBrightness(self.brightness_beta));
        }
        if self.edge_threshold == 0 {
            return Err(PreprocessError::InvalidEdgeThreshold(self.edge_threshold));
        }
        Ok(())
    }
}

/// Output of [`preprocess`].
#[derive(Clone, Debug)]
pub struct Preprocessed {
    /// Blurred, contrast-adjusted grayscale used for decoding.
    pub gray: GrayImage,
    /// Binary edge map (`255` = edge) used for contour extraction.
    pub edges: GrayImage,
}

/// Blur, contrast-adjust and edge-detect a grayscale frame.
///
/// Parameters are assumed to be validated.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(gray, params), fields(width = gray.width, height = gray.height))
)]
pub fn preprocess(gray: &GrayImageView<'_>, params: &PreprocessParams) -> Preprocessed {
    let mut adjusted = box_blur(gray, params.blur_kernel);
    adjust_contrast(&mut adjusted, params.contrast_alpha, params.brightness_beta);

    let mut edges = sobel_edges(&adjusted.view(), params.edge_threshold);
    if params.close_edges {
        edges = morph_close_3x3(&edges.view());
    }

    Preprocessed {
        gray: adjusted,
        edges,
    }
}

#[inline]
fn px_clamped(img: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let cx = x.clamp(0, img.width as i32 - 1) as usize;
    let cy = y.clamp(0, img.height as i32 - 1) as usize;
    img.data[cy * img.width + cx]
}

/// Mean filter over a `k x k` window with replicated borders.
pub fn box_blur(src: &GrayImageView<'_>, k: usize) -> GrayImage {
    if k <= 1 || src.is_empty() {
        return src.to_owned_image();
    }
    let r = (k / 2) as i32;
    let (w, h) = (src.width, src.height);

    // horizontal then vertical pass
    let mut tmp = vec![0u32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for dx in -r..=r {
                acc += px_clamped(src, x as i32 + dx, y as i32) as u32;
            }
            tmp[y * w + x] = acc;
        }
    }

    let n = (k * k) as u32;
    let mut out = GrayImage::filled(w, h, 0);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for dy in -r..=r {
                let yy = (y as i32 + dy).clamp(0, h as i32 - 1) as usize;
                acc += tmp[yy * w + x];
            }
            out.data[y * w + x] = ((acc + n / 2) / n) as u8;
        }
    }
    out
}

/// `v -> clamp(v * alpha + beta)` in place.
pub fn adjust_contrast(img: &mut GrayImage, alpha: f32, beta: f32) {
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        *slot = (v as f32 * alpha + beta).round().clamp(0.0, 255.0) as u8;
    }
    for v in &mut img.data {
        *v = lut[*v as usize];
    }
}

/// Binary edge map from the L1 Sobel gradient magnitude.
pub fn sobel_edges(src: &GrayImageView<'_>, threshold: u32) -> GrayImage {
    let (w, h) = (src.width, src.height);
    let mut out = GrayImage::filled(w, h, 0);
    if src.is_empty() {
        return out;
    }

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let p = |dx: i32, dy: i32| px_clamped(src, x + dx, y + dy) as i32;
            let gx = (p(1, -1) + 2 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2 * p(0, -1) + p(1, -1));
            if gx.unsigned_abs() + gy.unsigned_abs() >= threshold {
                out.data[y as usize * w + x as usize] = 255;
            }
        }
    }
    out
}

fn morph_3x3(src: &GrayImageView<'_>, dilate: bool) -> GrayImage {
    let (w, h) = (src.width, src.height);
    let mut out = GrayImage::filled(w, h, 0);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut acc = if dilate { 0u8 } else { 255u8 };
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let v = src.data[ny as usize * w + nx as usize];
                    acc = if dilate { acc.max(v) } else { acc.min(v) };
                }
            }
            out.data[y as usize * w + x as usize] = acc;
        }
    }
    out
}

/// Dilate then erode with a 3x3 square; closes one-pixel gaps in edges.
pub fn morph_close_3x3(src: &GrayImageView<'_>) -> GrayImage {
    let dilated = morph_3x3(src, true);
    morph_3x3(&dilated.view(), false)
}
