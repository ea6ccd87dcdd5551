//! Paced single-producer capture loop.
//!
//! Frames are pulled from a [`FrameSource`], processed to completion and
//! the loop then sleeps for whatever remains of the frame budget. A shared
//! stop flag is checked once per iteration, so stopping takes at most one
//! frame.

use crate::pipeline::{CodicePipeline, FrameDiagnostics};
use codice_core::Frame;
use codice_tuio::TuioServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
    #[error("frame source failed: {0}")]
    Source(String),
}

/// Frame buffer owned by a capture backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedFrame {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl OwnedFrame {
    pub fn as_frame(&self) -> Frame<'_> {
        Frame::new(self.width, self.height, self.channels, &self.data)
    }
}

/// Producer of camera frames. `Ok(None)` ends the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<OwnedFrame>, CaptureError>;
}

impl<I: Iterator<Item = OwnedFrame>> FrameSource for std::iter::Fuse<I> {
    fn next_frame(&mut self) -> Result<Option<OwnedFrame>, CaptureError> {
        Ok(self.next())
    }
}

/// Keeps the loop at or below a target frame rate.
#[derive(Clone, Copy, Debug)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn for_fps(max_fps: u32) -> Self {
        Self::new(Duration::from_micros(1_000_000 / u64::from(max_fps.max(1))))
    }

    #[inline]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left in the budget of a frame started at `started`.
    pub fn remaining(&self, started: Instant, now: Instant) -> Duration {
        self.budget
            .saturating_sub(now.saturating_duration_since(started))
    }

    /// Sleep until the budget of the frame started at `started` is used up.
    pub fn wait(&self, started: Instant) {
        let left = self.remaining(started, Instant::now());
        if !left.is_zero() {
            std::thread::sleep(left);
        }
    }
}

/// Totals of one [`run_capture_loop`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: u64,
    pub failed: u64,
    /// `true` when the loop ended because the stop flag was raised.
    pub stopped: bool,
}

/// Run the pipeline until the source is exhausted or `stop` is raised.
///
/// Frames the pipeline rejects are logged and counted; source errors end
/// the loop. `on_frame` sees the diagnostics of every processed frame.
pub fn run_capture_loop<Src, S, F>(
    source: &mut Src,
    pipeline: &mut CodicePipeline<S>,
    pacer: FramePacer,
    stats_interval: Option<Duration>,
    stop: &AtomicBool,
    mut on_frame: F,
) -> Result<CaptureSummary, CaptureError>
where
    Src: FrameSource + ?Sized,
    S: TuioServer,
    F: FnMut(&FrameDiagnostics),
{
    let mut summary = CaptureSummary::default();
    let mut last_report = Instant::now();

    loop {
        if stop.load(Ordering::Relaxed) {
            summary.stopped = true;
            break;
        }

        let started = Instant::now();
        let Some(owned) = source.next_frame()? else {
            break;
        };

        match pipeline.process_frame(&owned.as_frame(), started) {
            Ok(diag) => {
                summary.frames += 1;
                on_frame(&diag);
            }
            Err(err) => {
                summary.failed += 1;
                log::warn!("dropping frame: {err}");
            }
        }

        if let Some(interval) = stats_interval {
            if last_report.elapsed() >= interval {
                let stats = pipeline.stats();
                log::info!(
                    "frames={} markers/frame={:.2} created={} updated={} removed={} errors={}",
                    stats.detection.frames_processed,
                    stats.detection.markers_per_frame(),
                    stats.bridge.objects_created,
                    stats.bridge.objects_updated,
                    stats.bridge.objects_removed,
                    stats.bridge.object_errors
                );
                last_report = Instant::now();
            }
        }

        pacer.wait(started);
    }

    log::info!(
        "capture loop finished after {} frames ({} dropped)",
        summary.frames,
        summary.failed
    );
    Ok(summary)
}
