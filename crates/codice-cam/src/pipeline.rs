//! One frame end to end: detection, lifecycle tracking, protocol output.

use crate::config::{CodiceConfig, ConfigError};
use codice_core::Frame;
use codice_detect::{DecodedMarker, DetectError, DetectionStats, MarkerDetector};
use codice_tuio::{
    BridgeError, BridgeStats, LifecycleEvent, LifecycleListener, LifecycleManager,
    MarkerObservation, MarkerState, TrackedMarker, TrackingError, TuioBridge, TuioServer,
};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Serializable view of one tracked marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedSummary {
    pub id: u32,
    pub session_id: u64,
    pub state: MarkerState,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub confidence: f32,
    pub update_count: u64,
    pub age_ms: u64,
}

impl TrackedSummary {
    fn from_marker(marker: &TrackedMarker, now: Instant) -> Self {
        Self {
            id: marker.id,
            session_id: marker.session_id,
            state: marker.state,
            x: marker.x,
            y: marker.y,
            angle: marker.angle,
            confidence: marker.confidence,
            update_count: marker.update_count,
            age_ms: marker.age(now).as_millis() as u64,
        }
    }
}

/// Lifecycle event without the record snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: u32,
    pub session_id: u64,
    pub state: MarkerState,
}

impl From<&LifecycleEvent> for EventSummary {
    fn from(event: &LifecycleEvent) -> Self {
        Self {
            id: event.id,
            session_id: event.session_id,
            state: event.state,
        }
    }
}

/// What happened while processing one frame.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameDiagnostics {
    /// Zero-based index among successfully processed frames.
    pub frame_index: u64,
    /// Corners of every candidate quadrilateral, decoded or not.
    pub candidates: Vec<[Point2<f32>; 4]>,
    pub decoded: Vec<DecodedMarker>,
    pub events: Vec<EventSummary>,
    /// Tracked markers after the update, sorted by id.
    pub tracked: Vec<TrackedSummary>,
}

/// Counters of every stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub detection: DetectionStats,
    pub bridge: BridgeStats,
    pub frames_failed: u64,
}

/// Detector, lifecycle manager and protocol bridge driven frame by frame.
pub struct CodicePipeline<S> {
    detector: MarkerDetector,
    manager: LifecycleManager,
    bridge: TuioBridge<S>,
    frames: u64,
    frames_failed: u64,
}

impl<S: TuioServer> CodicePipeline<S> {
    pub fn new(config: &CodiceConfig, server: S) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            detector: MarkerDetector::new(config.detector_params())?,
            manager: LifecycleManager::new(config.tracking.clone())?,
            bridge: TuioBridge::new(server),
            frames: 0,
            frames_failed: 0,
        })
    }

    pub fn detector(&self) -> &MarkerDetector {
        &self.detector
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn bridge(&self) -> &TuioBridge<S> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut TuioBridge<S> {
        &mut self.bridge
    }

    pub fn into_server(self) -> S {
        self.bridge.into_server()
    }

    pub fn set_listener(&mut self, listener: Box<dyn LifecycleListener + Send>) {
        self.manager.set_listener(listener);
    }

    /// Swap detector and tracking parameters between frames.
    ///
    /// Nothing is changed if any section is invalid.
    pub fn reconfigure(&mut self, config: &CodiceConfig) -> Result<(), PipelineError> {
        config.validate()?;
        self.detector.set_params(config.detector_params())?;
        self.manager.set_params(config.tracking.clone())?;
        Ok(())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            detection: self.detector.stats(),
            bridge: self.bridge.stats(),
            frames_failed: self.frames_failed,
        }
    }

    /// Process one frame captured at `now`.
    ///
    /// A malformed frame is rejected before any tracking state changes.
    /// Protocol failures are logged; the tracking state still advances.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, now), fields(frame = self.frames))
    )]
    pub fn process_frame(
        &mut self,
        frame: &Frame<'_>,
        now: Instant,
    ) -> Result<FrameDiagnostics, PipelineError> {
        let detections = match self.detector.detect(frame) {
            Ok(d) => d,
            Err(err) => {
                self.frames_failed += 1;
                return Err(err.into());
            }
        };

        let observations: Vec<MarkerObservation> = detections
            .markers
            .iter()
            .map(|m| {
                let (x, y) = frame.normalize(m.center.x, m.center.y);
                MarkerObservation::new(i64::from(m.id), x, y, m.angle, m.confidence)
            })
            .collect();

        let events = self.manager.update(&observations, now);
        if let Err(err) = self.bridge.publish(&events) {
            log::warn!("frame {} not delivered to protocol server: {err}", self.frames);
        }

        let diagnostics = FrameDiagnostics {
            frame_index: self.frames,
            candidates: detections.candidates,
            decoded: detections.markers,
            events: events.iter().map(EventSummary::from).collect(),
            tracked: self
                .manager
                .tracked()
                .map(|m| TrackedSummary::from_marker(m, now))
                .collect(),
        };
        self.frames += 1;

        log::debug!(
            "frame {}: {} candidates, {} decoded, {} events, {} tracked",
            diagnostics.frame_index,
            diagnostics.candidates.len(),
            diagnostics.decoded.len(),
            diagnostics.events.len(),
            diagnostics.tracked.len()
        );
        Ok(diagnostics)
    }

    /// Drop every tracked marker and announce the removals in one final frame.
    pub fn shutdown(&mut self, now: Instant) -> Result<Vec<EventSummary>, PipelineError> {
        let events = self.manager.clear(now);
        self.bridge.publish(&events)?;
        Ok(events.iter().map(EventSummary::from).collect())
    }
}
