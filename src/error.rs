use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the scan pipeline. Scoring-based "wrong template"
/// outcomes are not errors; they show up as elevated match scores.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type")]
pub enum ScanError {
    #[error("bad metadata: {reason}")]
    BadMetadata { reason: String },

    #[error("header rectangle for style {style} page {page} disagrees with the first header")]
    InconsistentHeaders { style: usize, page: String },

    #[error("bad image: {reason}")]
    BadImage { reason: String },

    #[error("unsupported image kind: {kind}")]
    UnsupportedImageKind { kind: String },

    #[error("no top line found")]
    NoLine,

    #[error("cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn bad_metadata(reason: impl Into<String>) -> Self {
        Self::BadMetadata {
            reason: reason.into(),
        }
    }

    pub fn bad_image(reason: impl Into<String>) -> Self {
        Self::BadImage {
            reason: reason.into(),
        }
    }
}
