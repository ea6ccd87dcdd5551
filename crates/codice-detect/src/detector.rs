use crate::contour::{extract_candidates, ExtractorParams};
use crate::decode::{decode_candidate, DecodedMarker, DecoderParams, Rejection};
use crate::preprocess::{preprocess, PreprocessError, PreprocessParams};
use codice_core::{Frame, FrameError, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by the marker detector.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("invalid marker size bounds (min={min}, max={max})")]
    InvalidSizeBounds { min: f32, max: f32 },
    #[error("border tolerance must be in [0, 1] (got {0})")]
    InvalidBorderTolerance(f32),
    #[error("minimum confidence must be in [0, 1] (got {0})")]
    InvalidConfidence(f32),
}

/// Configuration for [`MarkerDetector`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub preprocess: PreprocessParams,
    pub extractor: ExtractorParams,
    pub decoder: DecoderParams,
    /// Decoded markers below this confidence are dropped.
    pub min_confidence: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            preprocess: PreprocessParams::default(),
            extractor: ExtractorParams::default(),
            decoder: DecoderParams::default(),
            min_confidence: 0.7,
        }
    }
}

impl DetectorParams {
    /// Accept smaller and larger markers, e.g. for a camera mounted far away.
    pub fn for_size_range(min_marker_size: f32, max_marker_size: f32) -> Self {
        let mut params = Self::default();
        params.decoder.min_marker_size = min_marker_size;
        params.decoder.max_marker_size = max_marker_size;
        params.extractor.min_perimeter = (2.0 * min_marker_size).max(8.0);
        params
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        self.preprocess.validate()?;
        self.decoder.validate()?;
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(DetectError::InvalidConfidence(self.min_confidence));
        }
        Ok(())
    }
}

/// Running counters over the detector's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub frames_processed: u64,
    pub candidates: u64,
    pub markers_detected: u64,
}

impl DetectionStats {
    /// Average markers per processed frame.
    pub fn markers_per_frame(&self) -> f64 {
        if self.frames_processed == 0 {
            return 0.0;
        }
        self.markers_detected as f64 / self.frames_processed as f64
    }
}

/// Result of running the detector on one frame.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameDetections {
    /// Corners of every four-corner candidate passed to the decoder.
    pub candidates: Vec<[Point2<f32>; 4]>,
    /// Accepted markers, at most one per id, sorted by id.
    pub markers: Vec<DecodedMarker>,
}

/// Contour-based Codice marker detector.
#[derive(Clone, Debug)]
pub struct MarkerDetector {
    params: DetectorParams,
    stats: DetectionStats,
}

impl MarkerDetector {
    pub fn new(params: DetectorParams) -> Result<Self, DetectError> {
        params.validate()?;
        Ok(Self {
            params,
            stats: DetectionStats::default(),
        })
    }

    #[inline]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Replace parameters between frames. Invalid parameters leave the detector unchanged.
    pub fn set_params(&mut self, params: DetectorParams) -> Result<(), DetectError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    #[inline]
    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DetectionStats::default();
    }

    /// Detect markers in a camera frame.
    ///
    /// A malformed frame returns an error and leaves the counters untouched.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, frame), fields(width = frame.width, height = frame.height))
    )]
    pub fn detect(&mut self, frame: &Frame<'_>) -> Result<FrameDetections, DetectError> {
        let gray = frame.to_gray()?;
        Ok(self.detect_gray(&gray.view()))
    }

    /// Detect markers in an already grayscale image.
    pub fn detect_gray(&mut self, gray: &GrayImageView<'_>) -> FrameDetections {
        let pre = preprocess(gray, &self.params.preprocess);
        let candidates = extract_candidates(&pre.edges.view(), &self.params.extractor);

        let mut markers = Vec::new();
        for cand in &candidates {
            match decode_candidate(&pre.gray.view(), &cand.corners, &self.params.decoder) {
                Ok(m) if m.confidence >= self.params.min_confidence => markers.push(m),
                Ok(m) => log::trace!("marker {} below confidence ({:.2})", m.id, m.confidence),
                Err(rejection) => log_rejection(&rejection),
            }
        }
        let markers = dedup_by_id_keep_best(markers);

        self.stats.frames_processed += 1;
        self.stats.candidates += candidates.len() as u64;
        self.stats.markers_detected += markers.len() as u64;

        log::debug!(
            "frame {}: {} candidates, {} markers",
            self.stats.frames_processed,
            candidates.len(),
            markers.len()
        );

        FrameDetections {
            candidates: candidates.iter().map(|c| c.corners).collect(),
            markers,
        }
    }
}

fn log_rejection(rejection: &Rejection) {
    log::trace!("candidate rejected: {rejection:?}");
}

fn dedup_by_id_keep_best(mut markers: Vec<DecodedMarker>) -> Vec<DecodedMarker> {
    markers.sort_by(|a, b| {
        a.id.cmp(&b.id).then(
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    markers.dedup_by_key(|m| m.id);
    markers
}
