//! Camera-to-TUIO pipeline for Codice fiducial markers.
//!
//! This crate ties the workspace together:
//! - re-exports of the detector and tracking crates,
//! - [`CodiceConfig`]: the JSON configuration file with named profiles,
//! - [`CodicePipeline`]: detection, lifecycle tracking and protocol output
//!   for one frame at a time,
//! - [`run_capture_loop`]: the paced capture loop over any [`FrameSource`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use codice_cam::{CodiceConfig, CodicePipeline};
//! use codice_cam::tuio::RecordingServer;
//! use std::time::Instant;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = codice_cam::load_frame("table.png")?;
//! let mut pipeline = CodicePipeline::new(&CodiceConfig::default(), RecordingServer::new())?;
//! let diag = pipeline.process_frame(&frame.as_frame(), Instant::now())?;
//! for m in &diag.decoded {
//!     println!("marker {} heading {:.1} deg", m.id, m.angle);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `codice_cam::core`: frames, rasters, homographies, logger setup.
//! - `codice_cam::detect`: preprocessing, contours and marker decoding.
//! - `codice_cam::tuio`: lifecycle manager and protocol bridge.

pub use codice_core as core;
pub use codice_detect as detect;
pub use codice_tuio as tuio;

mod capture;
mod config;
mod pipeline;

#[cfg(feature = "image")]
mod image_io;

pub use capture::{
    run_capture_loop, CaptureError, CaptureSummary, FramePacer, FrameSource, OwnedFrame,
};
pub use config::{CodiceConfig, ConfigError, DetectionConfig, Profile, StreamingConfig};
pub use pipeline::{
    CodicePipeline, EventSummary, FrameDiagnostics, PipelineError, PipelineStats, TrackedSummary,
};

#[cfg(feature = "image")]
pub use image_io::{gray_frame, load_frame, ImageSequence};
