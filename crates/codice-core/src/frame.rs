//! Camera frame snapshot handed to the detector once per capture tick.

use crate::GrayImage;

/// Errors for frames that cannot be processed at all.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is empty (width={width}, height={height})")]
    Empty { width: usize, height: usize },
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
    #[error("invalid frame buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },
}

/// Read-only raster borrowed for the duration of one detection call.
///
/// Pixels are interleaved row-major. Three channels are BGR and four are
/// BGRA, which is what capture backends hand out.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(width: usize, height: usize, channels: usize, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Single-channel frame over an existing grayscale image.
    pub fn from_gray(img: &'a GrayImage) -> Self {
        Self::new(img.width, img.height, 1, &img.data)
    }

    /// Check dimensions, channel count and buffer length.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(self.channels));
        }
        let expected = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.channels))
            .ok_or(FrameError::Empty {
                width: self.width,
                height: self.height,
            })?;
        if self.data.len() != expected {
            return Err(FrameError::InvalidBuffer {
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    /// Convert to grayscale with BT.601 luma weights.
    pub fn to_gray(&self) -> Result<GrayImage, FrameError> {
        self.validate()?;
        let data = match self.channels {
            1 => self.data.to_vec(),
            c => self
                .data
                .chunks_exact(c)
                .map(|px| {
                    let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    ((114 * b + 587 * g + 299 * r + 500) / 1000) as u8
                })
                .collect(),
        };
        Ok(GrayImage {
            width: self.width,
            height: self.height,
            data,
        })
    }

    /// Normalize a pixel position into `[0, 1]` frame coordinates.
    pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
        let nx = (x / self.width.max(1) as f32).clamp(0.0, 1.0);
        let ny = (y / self.height.max(1) as f32).clamp(0.0, 1.0);
        (nx, ny)
    }
}
