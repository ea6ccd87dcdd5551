//! Per-frame marker sightings handed to the lifecycle manager.

use serde::{Deserialize, Serialize};

/// Largest symbol id carried by a Codice marker (12 data bits).
pub const MAX_SYMBOL_ID: u32 = 4095;

/// Reasons an observation is refused at the tracking boundary.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum ObservationError {
    #[error("marker id {0} outside [0, 4095]")]
    IdOutOfRange(i64),
    #[error("{axis} coordinate {value} outside [0, 1]")]
    CoordinateOutOfRange { axis: char, value: f32 },
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),
    #[error("angle {0} is not finite")]
    NonFiniteAngle(f32),
}

/// A decoded marker seen in the current frame, center normalized to `[0, 1]`.
///
/// The id is signed so that values produced by a faulty decoder can reach
/// validation and be refused there.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: i64,
    pub x: f32,
    pub y: f32,
    /// Heading in degrees.
    pub angle: f32,
    pub confidence: f32,
}

impl MarkerObservation {
    pub fn new(id: i64, x: f32, y: f32, angle: f32, confidence: f32) -> Self {
        Self {
            id,
            x,
            y,
            angle,
            confidence,
        }
    }

    /// Check ranges and return the id as a symbol.
    pub fn validate(&self) -> Result<u32, ObservationError> {
        if !(0..=MAX_SYMBOL_ID as i64).contains(&self.id) {
            return Err(ObservationError::IdOutOfRange(self.id));
        }
        for (axis, value) in [('x', self.x), ('y', self.y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ObservationError::CoordinateOutOfRange { axis, value });
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ObservationError::ConfidenceOutOfRange(self.confidence));
        }
        if !self.angle.is_finite() {
            return Err(ObservationError::NonFiniteAngle(self.angle));
        }
        Ok(self.id as u32)
    }
}
