//! Lifecycle events to TUIO-style object messages.
//!
//! Each published frame is bracketed by exactly one `begin_frame` and one
//! `commit_frame`. The wire encoding is left to the [`TuioServer`].
//! Removals the server did not receive stay pending until a later frame
//! delivers them.

use crate::lifecycle::{LifecycleEvent, MarkerState, TrackedMarker};
use crate::observation::MAX_SYMBOL_ID;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::TAU;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors reported by a protocol server or by object validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("server rejected {op} for session {session_id}: {reason}")]
    Rejected {
        op: &'static str,
        session_id: u64,
        reason: String,
    },
    #[error("protocol server unavailable: {0}")]
    Unavailable(String),
    #[error("symbol id {0} outside [0, 4095]")]
    InvalidSymbol(u32),
    #[error("session id must be positive")]
    InvalidSession,
    #[error("object position ({x}, {y}) outside the unit square")]
    InvalidPosition { x: f32, y: f32 },
    #[error("object angle {0} outside [0, 2pi)")]
    InvalidAngle(f32),
}

/// Pose of one object as sent to the protocol server.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TuioObject {
    pub session_id: u64,
    pub symbol_id: u32,
    pub x: f32,
    pub y: f32,
    /// Radians in `[0, 2pi)`.
    pub angle: f32,
}

impl TuioObject {
    pub fn from_marker(marker: &TrackedMarker) -> Self {
        Self {
            session_id: marker.session_id,
            symbol_id: marker.id,
            x: marker.x,
            y: marker.y,
            angle: degrees_to_tuio_angle(marker.angle),
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.symbol_id > MAX_SYMBOL_ID {
            return Err(BridgeError::InvalidSymbol(self.symbol_id));
        }
        if self.session_id == 0 {
            return Err(BridgeError::InvalidSession);
        }
        if !((0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)) {
            return Err(BridgeError::InvalidPosition {
                x: self.x,
                y: self.y,
            });
        }
        if !(self.angle >= 0.0 && self.angle < TAU) {
            return Err(BridgeError::InvalidAngle(self.angle));
        }
        Ok(())
    }
}

/// Convert a heading in degrees to radians wrapped into `[0, 2pi)`.
pub fn degrees_to_tuio_angle(degrees: f32) -> f32 {
    let rad = degrees.to_radians().rem_euclid(TAU);
    if rad >= TAU {
        0.0
    } else {
        rad
    }
}

/// Session-oriented object streaming endpoint.
pub trait TuioServer {
    fn begin_frame(&mut self, frame_id: u64) -> Result<(), BridgeError>;
    fn add_object(&mut self, object: &TuioObject) -> Result<(), BridgeError>;
    fn update_object(&mut self, object: &TuioObject) -> Result<(), BridgeError>;
    fn remove_object(&mut self, session_id: u64) -> Result<(), BridgeError>;
    fn commit_frame(&mut self) -> Result<(), BridgeError>;
}

impl<S: TuioServer + ?Sized> TuioServer for Box<S> {
    fn begin_frame(&mut self, frame_id: u64) -> Result<(), BridgeError> {
        (**self).begin_frame(frame_id)
    }

    fn add_object(&mut self, object: &TuioObject) -> Result<(), BridgeError> {
        (**self).add_object(object)
    }

    fn update_object(&mut self, object: &TuioObject) -> Result<(), BridgeError> {
        (**self).update_object(object)
    }

    fn remove_object(&mut self, session_id: u64) -> Result<(), BridgeError> {
        (**self).remove_object(session_id)
    }

    fn commit_frame(&mut self) -> Result<(), BridgeError> {
        (**self).commit_frame()
    }
}

/// Running counters over the bridge's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub frames: u64,
    pub objects_created: u64,
    pub objects_updated: u64,
    pub objects_removed: u64,
    /// Objects skipped because validation or the server failed.
    pub object_errors: u64,
}

/// Forwards lifecycle events to a [`TuioServer`] and tracks live objects.
#[derive(Debug)]
pub struct TuioBridge<S> {
    server: S,
    active: BTreeMap<u64, TuioObject>,
    /// Sessions whose removal has not reached the server yet.
    pending_removals: BTreeSet<u64>,
    stats: BridgeStats,
    next_frame_id: u64,
}

impl<S: TuioServer> TuioBridge<S> {
    pub fn new(server: S) -> Self {
        Self {
            server,
            active: BTreeMap::new(),
            pending_removals: BTreeSet::new(),
            stats: BridgeStats::default(),
            next_frame_id: 0,
        }
    }

    #[inline]
    pub fn server(&self) -> &S {
        &self.server
    }

    #[inline]
    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    pub fn into_server(self) -> S {
        self.server
    }

    #[inline]
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Objects currently announced to the server, keyed by session id.
    pub fn active_objects(&self) -> impl Iterator<Item = &TuioObject> {
        self.active.values()
    }

    /// Sessions still waiting to be removed on the server.
    pub fn pending_removals(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending_removals.iter().copied()
    }

    fn remove(&mut self, session_id: u64) -> Result<(), BridgeError> {
        if let Err(err) = self.server.remove_object(session_id) {
            self.pending_removals.insert(session_id);
            return Err(err);
        }
        self.pending_removals.remove(&session_id);
        self.active.remove(&session_id);
        self.stats.objects_removed += 1;
        Ok(())
    }

    /// Retry removals left over from earlier frames; runs inside an open frame.
    fn flush_removals(&mut self) {
        let sessions: Vec<u64> = self.pending_removals.iter().copied().collect();
        for session_id in sessions {
            if let Err(err) = self.remove(session_id) {
                self.stats.object_errors += 1;
                log::warn!("removal of session {session_id} deferred again: {err}");
            }
        }
    }

    fn announce(&mut self, object: TuioObject, known: bool) -> Result<(), BridgeError> {
        object.validate()?;
        if known {
            self.server.update_object(&object)?;
            self.stats.objects_updated += 1;
        } else {
            self.server.add_object(&object)?;
            self.stats.objects_created += 1;
        }
        self.active.insert(object.session_id, object);
        Ok(())
    }

    fn handle(&mut self, event: &LifecycleEvent) -> Result<(), BridgeError> {
        match event.state {
            MarkerState::Detected | MarkerState::Updated => {
                let object = TuioObject::from_marker(&event.marker);
                let known = self.active.contains_key(&object.session_id);
                self.announce(object, known)
            }
            MarkerState::Lost => {
                if !self.active.contains_key(&event.session_id) {
                    return Ok(());
                }
                self.remove(event.session_id)
            }
            MarkerState::Active => Ok(()),
        }
    }

    /// Publish one frame of lifecycle events.
    ///
    /// Per-object failures are logged and skipped; only a failure to open or
    /// commit the frame is returned. Removals that could not be delivered are
    /// retried at the start of the next frame that opens.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, events), fields(events = events.len()))
    )]
    pub fn publish(&mut self, events: &[LifecycleEvent]) -> Result<(), BridgeError> {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        if let Err(err) = self.server.begin_frame(frame_id) {
            self.pending_removals.extend(
                events
                    .iter()
                    .filter(|e| e.state == MarkerState::Lost)
                    .map(|e| e.session_id)
                    .filter(|id| self.active.contains_key(id)),
            );
            return Err(err);
        }
        self.flush_removals();

        for event in events {
            if let Err(err) = self.handle(event) {
                self.stats.object_errors += 1;
                log::warn!(
                    "skipping {} of marker {} (session {}): {err}",
                    event.state,
                    event.id,
                    event.session_id
                );
            }
        }

        self.server.commit_frame()?;
        self.stats.frames += 1;
        Ok(())
    }

    /// Remove every active object in a final frame.
    pub fn shutdown(&mut self) -> Result<(), BridgeError> {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        self.server.begin_frame(frame_id)?;
        let sessions: Vec<u64> = self.active.keys().copied().collect();
        for session_id in sessions {
            if let Err(err) = self.remove(session_id) {
                self.stats.object_errors += 1;
                log::warn!("failed to remove session {session_id}: {err}");
            }
        }
        self.active.clear();
        self.pending_removals.clear();
        self.server.commit_frame()?;
        self.stats.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn degrees_wrap_into_the_positive_turn() {
        assert_relative_eq!(degrees_to_tuio_angle(0.0), 0.0);
        assert_relative_eq!(degrees_to_tuio_angle(90.0), PI / 2.0);
        assert_relative_eq!(degrees_to_tuio_angle(-90.0), 1.5 * PI, epsilon = 1e-5);
        assert_relative_eq!(degrees_to_tuio_angle(180.0), PI);
        assert!(degrees_to_tuio_angle(-1e-9) < TAU);
        assert!(degrees_to_tuio_angle(360.0) < TAU);
    }

    #[test]
    fn object_validation_matches_protocol_ranges() {
        let ok = TuioObject {
            session_id: 1000,
            symbol_id: 4095,
            x: 1.0,
            y: 0.0,
            angle: 0.0,
        };
        assert!(ok.validate().is_ok());
        assert_eq!(
            TuioObject {
                symbol_id: 4096,
                ..ok
            }
            .validate(),
            Err(BridgeError::InvalidSymbol(4096))
        );
        assert_eq!(
            TuioObject { session_id: 0, ..ok }.validate(),
            Err(BridgeError::InvalidSession)
        );
        assert!(TuioObject { x: 1.2, ..ok }.validate().is_err());
        assert!(TuioObject { angle: TAU, ..ok }.validate().is_err());
    }
}
