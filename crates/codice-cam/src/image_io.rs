//! Frames from image files via the `image` crate.

use crate::capture::{CaptureError, FrameSource, OwnedFrame};
use codice_core::Frame;
use std::path::{Path, PathBuf};

/// Borrow an `image::GrayImage` as a single-channel frame.
pub fn gray_frame(img: &::image::GrayImage) -> Frame<'_> {
    Frame::new(img.width() as usize, img.height() as usize, 1, img.as_raw())
}

/// Decode an image file into a grayscale frame.
pub fn load_frame(path: impl AsRef<Path>) -> Result<OwnedFrame, CaptureError> {
    let img = ::image::open(path)?.to_luma8();
    Ok(OwnedFrame {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 1,
        data: img.into_raw(),
    })
}

/// Image files replayed in order as a frame stream.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            next: 0,
        }
    }

    /// Path of the most recently returned frame.
    pub fn current_path(&self) -> Option<&Path> {
        self.next
            .checked_sub(1)
            .and_then(|i| self.paths.get(i))
            .map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<OwnedFrame>, CaptureError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        load_frame(path).map(Some)
    }
}
