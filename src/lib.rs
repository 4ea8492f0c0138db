//! Interprets scanned paper ballots.
//!
//! Given a rendered original ballot page plus the rendering service's layout
//! metadata (bubble and header rectangles in page points), and a noisy scan
//! of a filled-in ballot, the pipeline recovers which bubbles were marked:
//! Otsu thresholding, top-border detection with a robust line fit, a
//! two-corner similarity seed, sub-pixel hotspot matching refined into a
//! projective transform, and sparse darkness sampling inside each predicted
//! bubble. Several candidate page templates can be scored against one scan to
//! identify which page it is.

pub mod bubbles;
pub mod debug;
pub mod edges;
pub mod error;
pub mod geometry;
pub mod hotspots;
pub mod image_utils;
pub mod interpret;
pub mod metadata;
pub mod raster;
pub mod refine;
pub mod template;
pub mod transform;

pub use bubbles::MarkedMap;
pub use error::ScanError;
pub use interpret::{interpret_page, match_scan, Interpretation, MatchOutcome, ScannedPage};
pub use metadata::BallotMetadata;
pub use refine::CancelToken;
pub use template::{build_templates, PageTemplate};
pub use transform::Transform;
