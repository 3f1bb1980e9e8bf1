// ============================================================================
// ERRORS - viewer-level error kinds
// ============================================================================

use std::fmt;

/// Which viewer slot a resource belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Image,
    Depth,
}

impl Slot {
    /// The other slot; used for identity-based texture sharing.
    pub fn sibling(self) -> Self {
        match self {
            Slot::Image => Slot::Depth,
            Slot::Depth => Slot::Image,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Image => write!(f, "image"),
            Slot::Depth => write!(f, "depth"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ViewerError {
    /// Decode or I/O failure on one slot. Non-fatal: the viewer stays not-ready
    /// until the slot is reassigned.
    #[error("{slot} failed to load: {message}")]
    ResourceLoad { slot: Slot, message: String },

    /// The renderer could not be created. Terminal for the viewer instance.
    #[error("renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// An export or readiness wait was requested with no image assigned.
    #[error("viewer has no image")]
    NoImage,

    #[error("viewer is not ready")]
    NotReady,

    #[error("invalid options: {0}")]
    Options(String),

    /// Image encoding failed during export.
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("failed to write {path}: {message}")]
    Io { path: String, message: String },

    /// A GPU renderer operation failed after initialisation.
    #[error("gpu: {0}")]
    Gpu(String),
}

impl From<serde_json::Error> for ViewerError {
    fn from(e: serde_json::Error) -> Self {
        ViewerError::Options(e.to_string())
    }
}

impl From<image::ImageError> for ViewerError {
    fn from(e: image::ImageError) -> Self {
        ViewerError::Encode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ViewerError>;
