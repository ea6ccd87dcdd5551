//! Marker lifecycle tracking and TUIO-style session bridging.
//!
//! [`LifecycleManager`] turns per-frame [`MarkerObservation`]s into stable
//! tracked records with session ids and [`LifecycleEvent`]s.
//! [`TuioBridge`] forwards those events to any [`TuioServer`] as
//! begin/add/update/remove/commit calls.
//!
//! ```
//! use codice_tuio::{
//!     LifecycleManager, MarkerObservation, RecordingServer, TrackingParams, TuioBridge,
//! };
//! use std::time::Instant;
//!
//! let mut manager = LifecycleManager::new(TrackingParams::default()).unwrap();
//! let mut bridge = TuioBridge::new(RecordingServer::new());
//!
//! let seen = [MarkerObservation::new(5, 0.25, 0.75, 90.0, 1.0)];
//! let events = manager.update(&seen, Instant::now());
//! bridge.publish(&events).unwrap();
//!
//! assert_eq!(bridge.stats().objects_created, 1);
//! ```

mod bridge;
mod history;
mod lifecycle;
mod observation;
mod recording;

pub use bridge::{
    degrees_to_tuio_angle, BridgeError, BridgeStats, TuioBridge, TuioObject, TuioServer,
};
pub use history::{HistoryEntry, HistoryRing, StateHistory, HISTORY_CAPACITY};
pub use lifecycle::{
    AbsencePolicy, LifecycleEvent, LifecycleListener, LifecycleManager, MarkerState,
    TrackedMarker, TrackingError, TrackingParams,
};
pub use observation::{MarkerObservation, ObservationError, MAX_SYMBOL_ID};
pub use recording::{RecordingServer, TuioCommand};
