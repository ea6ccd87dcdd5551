//! Codice marker detection.
//!
//! The pipeline per frame is:
//! 1. [`preprocess`]: blur, contrast/brightness and a closed Sobel edge map,
//! 2. [`extract_candidates`]: external contours simplified to square quads,
//! 3. [`decode_candidate`]: deskew to a 6x6 cell raster, orientation and a
//!    12-bit identifier.
//!
//! [`MarkerDetector`] wires the steps together and keeps running counters.
//!
//! ```no_run
//! use codice_core::Frame;
//! use codice_detect::{DetectorParams, MarkerDetector};
//!
//! let pixels = vec![255u8; 640 * 480];
//! let frame = Frame::new(640, 480, 1, &pixels);
//! let mut detector = MarkerDetector::new(DetectorParams::default()).unwrap();
//! for m in detector.detect(&frame).unwrap().markers {
//!     println!("marker {} at ({:.1}, {:.1})", m.id, m.center.x, m.center.y);
//! }
//! ```

mod contour;
mod decode;
mod detector;
mod orientation;
mod preprocess;

pub use contour::{
    approx_polygon_closed, contour_perimeter, external_contours, extract_candidates,
    order_corners, trace_boundary, CandidateRegion, ExtractorParams,
};
pub use decode::{
    decode_candidate, decode_deskewed, deskew, marker_confidence, normalize_degrees,
    DecodedMarker, DecoderParams, DeskewedCode, Rejection, CELL_PX, DESKEW_SIZE, GRID_CELLS,
};
pub use detector::{DetectError, DetectionStats, DetectorParams, FrameDetections, MarkerDetector};
pub use orientation::{
    canonicalize, cells_for_id, classify_orientation, corner_lightness, pattern_bits,
    rotate_cells_cw, Orientation, Rotation, CORNER_CELLS, DATA_BITS, DATA_GRID, MAX_MARKER_ID,
};
pub use preprocess::{
    adjust_contrast, box_blur, morph_close_3x3, preprocess, sobel_edges, PreprocessError,
    PreprocessParams, Preprocessed,
};
