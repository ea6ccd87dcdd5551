//! Marker lifecycle: one tracked record per marker id across frames.
//!
//! # Lifecycle policy
//! - **Birth**: an unknown id gets the next session id and emits `Detected`.
//! - **Update**: a known id seen again emits `Updated` and keeps its session.
//! - **Absence**: with [`AbsencePolicy::Immediate`] a tracked id missing from
//!   the frame emits `Lost` at once; with [`AbsencePolicy::HoldUntilTimeout`]
//!   it is held as `Active` without an event.
//! - **Expiry**: any record unseen for longer than `marker_timeout_ms` emits
//!   `Lost` at the start of the next update and is dropped.
//!
//! Session ids are allocated from a per-manager counter and never reused.

use crate::history::{HistoryEntry, StateHistory};
use crate::observation::MarkerObservation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Lifecycle state of a tracked marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerState {
    Detected,
    Active,
    Updated,
    Lost,
}

impl MarkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "DETECTED",
            Self::Active => "ACTIVE",
            Self::Updated => "UPDATED",
            Self::Lost => "LOST",
        }
    }
}

impl fmt::Display for MarkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a tracked marker that is missing from a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsencePolicy {
    /// Emit `Lost` in the first frame the marker is missing.
    #[default]
    Immediate,
    /// Keep the marker as `Active` until `marker_timeout_ms` elapses.
    HoldUntilTimeout,
}

/// Invalid tracking parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("marker timeout must be at least 100 ms (got {0} ms)")]
    TimeoutTooShort(u64),
    #[error("max markers must be in 1..=100 (got {0})")]
    InvalidMaxMarkers(usize),
    #[error("first session id must be positive")]
    InvalidFirstSession,
}

/// Configuration for [`LifecycleManager`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// A marker unseen for longer than this is expired.
    pub marker_timeout_ms: u64,
    /// First session id handed out by a fresh manager.
    pub first_session_id: u64,
    pub absence_policy: AbsencePolicy,
    /// Upper bound on simultaneously tracked markers; extra new ids are skipped.
    pub max_markers: usize,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            marker_timeout_ms: 1000,
            first_session_id: 1000,
            absence_policy: AbsencePolicy::Immediate,
            max_markers: 10,
        }
    }
}

impl TrackingParams {
    /// Hold absent markers for `timeout_ms` instead of dropping them at once.
    pub fn for_flicker_tolerance(timeout_ms: u64) -> Self {
        Self {
            marker_timeout_ms: timeout_ms,
            absence_policy: AbsencePolicy::HoldUntilTimeout,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.marker_timeout_ms < 100 {
            return Err(TrackingError::TimeoutTooShort(self.marker_timeout_ms));
        }
        if !(1..=100).contains(&self.max_markers) {
            return Err(TrackingError::InvalidMaxMarkers(self.max_markers));
        }
        if self.first_session_id == 0 {
            return Err(TrackingError::InvalidFirstSession);
        }
        Ok(())
    }

    #[inline]
    pub fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.marker_timeout_ms)
    }
}

/// Tracking record of one marker id.
#[derive(Clone, Debug)]
pub struct TrackedMarker {
    pub id: u32,
    pub session_id: u64,
    pub state: MarkerState,
    pub first_detected: Instant,
    pub last_seen: Instant,
    /// Frames the marker was seen in after the first one.
    pub update_count: u64,
    pub history: StateHistory,
    /// Latest normalized position.
    pub x: f32,
    pub y: f32,
    /// Latest heading in degrees.
    pub angle: f32,
    pub confidence: f32,
}

impl TrackedMarker {
    fn new(id: u32, session_id: u64, obs: &MarkerObservation, now: Instant) -> Self {
        let mut marker = Self {
            id,
            session_id,
            state: MarkerState::Detected,
            first_detected: now,
            last_seen: now,
            update_count: 0,
            history: StateHistory::new(),
            x: obs.x,
            y: obs.y,
            angle: obs.angle,
            confidence: obs.confidence,
        };
        marker.record(MarkerState::Detected, now);
        marker
    }

    fn record(&mut self, state: MarkerState, at: Instant) {
        self.state = state;
        self.history.push(HistoryEntry { state, at });
    }

    fn apply(&mut self, obs: &MarkerObservation, now: Instant) {
        self.update_count += 1;
        self.last_seen = self.last_seen.max(now);
        self.x = obs.x;
        self.y = obs.y;
        self.angle = obs.angle;
        self.confidence = obs.confidence;
        self.record(MarkerState::Updated, now);
    }

    /// Time since the marker was last seen.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Time since the marker was first detected.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_detected)
    }
}

/// A state change of one marker, with a snapshot of its record.
#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    pub id: u32,
    pub session_id: u64,
    pub state: MarkerState,
    pub marker: TrackedMarker,
}

impl LifecycleEvent {
    fn from_marker(marker: &TrackedMarker) -> Self {
        Self {
            id: marker.id,
            session_id: marker.session_id,
            state: marker.state,
            marker: marker.clone(),
        }
    }
}

/// Receives lifecycle events synchronously, in emission order.
pub trait LifecycleListener {
    fn on_event(&mut self, event: &LifecycleEvent);
}

impl<F: FnMut(&LifecycleEvent)> LifecycleListener for F {
    fn on_event(&mut self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Owns every tracked marker and the session counter.
pub struct LifecycleManager {
    params: TrackingParams,
    tracked: BTreeMap<u32, TrackedMarker>,
    next_session_id: u64,
    listener: Option<Box<dyn LifecycleListener + Send>>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("params", &self.params)
            .field("tracked", &self.tracked.len())
            .field("next_session_id", &self.next_session_id)
            .finish()
    }
}

impl LifecycleManager {
    pub fn new(params: TrackingParams) -> Result<Self, TrackingError> {
        params.validate()?;
        Ok(Self {
            next_session_id: params.first_session_id,
            params,
            tracked: BTreeMap::new(),
            listener: None,
        })
    }

    #[inline]
    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    /// Replace parameters between frames. The session counter is not reset.
    pub fn set_params(&mut self, params: TrackingParams) -> Result<(), TrackingError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_listener(&mut self, listener: Box<dyn LifecycleListener + Send>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Session id the next new marker will receive.
    #[inline]
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id
    }

    pub fn get(&self, id: u32) -> Option<&TrackedMarker> {
        self.tracked.get(&id)
    }

    /// Live records in ascending id order.
    pub fn tracked(&self) -> impl Iterator<Item = &TrackedMarker> {
        self.tracked.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    fn allocate_session_id(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn emit(&mut self, events: &mut Vec<LifecycleEvent>, event: LifecycleEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_event(&event);
        }
        events.push(event);
    }

    fn drop_marker(&mut self, id: u32, now: Instant, events: &mut Vec<LifecycleEvent>) {
        if let Some(mut marker) = self.tracked.remove(&id) {
            marker.record(MarkerState::Lost, now);
            let event = LifecycleEvent::from_marker(&marker);
            self.emit(events, event);
        }
    }

    /// Advance the tracked table by one frame of observations taken at `now`.
    ///
    /// Events come out as: expirations, then sightings in ascending id order,
    /// then absences in ascending id order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, observations), fields(observations = observations.len()))
    )]
    pub fn update(
        &mut self,
        observations: &[MarkerObservation],
        now: Instant,
    ) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        let timeout = self.params.marker_timeout();

        let expired: Vec<u32> = self
            .tracked
            .values()
            .filter(|m| m.idle(now) > timeout)
            .map(|m| m.id)
            .collect();
        for id in expired {
            log::debug!("marker {id} expired");
            self.drop_marker(id, now, &mut events);
        }

        let mut best: BTreeMap<u32, MarkerObservation> = BTreeMap::new();
        for obs in observations {
            let id = match obs.validate() {
                Ok(id) => id,
                Err(err) => {
                    log::warn!("dropping marker observation: {err}");
                    continue;
                }
            };
            match best.get(&id) {
                Some(prev) if prev.confidence >= obs.confidence => {}
                _ => {
                    best.insert(id, *obs);
                }
            }
        }

        for (&id, obs) in &best {
            if let Some(marker) = self.tracked.get_mut(&id) {
                marker.apply(obs, now);
                let event = LifecycleEvent::from_marker(marker);
                self.emit(&mut events, event);
                continue;
            }
            if self.tracked.len() >= self.params.max_markers {
                log::warn!(
                    "ignoring marker {id}: already tracking {} markers",
                    self.tracked.len()
                );
                continue;
            }
            let session_id = self.allocate_session_id();
            let marker = TrackedMarker::new(id, session_id, obs, now);
            let event = LifecycleEvent::from_marker(&marker);
            self.tracked.insert(id, marker);
            self.emit(&mut events, event);
        }

        let absent: Vec<u32> = self
            .tracked
            .keys()
            .copied()
            .filter(|id| !best.contains_key(id))
            .collect();
        for id in absent {
            match self.params.absence_policy {
                AbsencePolicy::Immediate => self.drop_marker(id, now, &mut events),
                AbsencePolicy::HoldUntilTimeout => {
                    if let Some(marker) = self.tracked.get_mut(&id) {
                        if marker.state != MarkerState::Active {
                            marker.record(MarkerState::Active, now);
                        }
                    }
                }
            }
        }

        events
    }

    /// Emit `Lost` for every tracked marker and empty the table.
    pub fn clear(&mut self, now: Instant) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        let ids: Vec<u32> = self.tracked.keys().copied().collect();
        for id in ids {
            self.drop_marker(id, now, &mut events);
        }
        events
    }
}
