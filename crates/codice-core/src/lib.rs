//! Core raster, frame and geometry types for Codice marker detection.
//!
//! This crate has no notion of markers or sessions. It provides:
//!
//! - [`Frame`]: a validated, borrowed camera frame (gray, BGR or BGRA),
//! - [`GrayImage`] / [`GrayImageView`]: owned and borrowed 8-bit rasters,
//! - [`Homography`] helpers used to deskew candidate quadrilaterals,
//! - logger installation shared by the binaries.

mod frame;
mod homography;
mod image;
mod logger;

pub use frame::{Frame, FrameError};
pub use homography::{homography_from_4pt, square_corners, warp_perspective_gray, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, sample_mean_3x3, GrayImage, GrayImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_env, LOG_ENV};
