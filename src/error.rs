use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconstructionError>;

#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// A slice or mask file could not be decoded. Recoverable per slice.
    #[error("could not decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("volume assembly: slice {index} has shape {actual:?} (height, width), expected {expected:?}")]
    InputShape {
        index: i64,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("no input slices found in {}", path.display())]
    NoSlices { path: PathBuf },

    #[error("volume assembly: slice sequence is not contiguous between {previous} and {next}")]
    SliceGap { previous: i64, next: i64 },

    #[error("volume assembly: file stem of {} is not a slice number", path.display())]
    NonNumericStem { path: PathBuf },

    #[error("surface extraction produced no faces")]
    DegenerateMesh,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid STL: {message}")]
    InvalidStl { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ReconstructionError {
    /// Whether the batch driver may skip the affected slice and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    pub(crate) fn invalid_stl(message: impl Into<String>) -> Self {
        Self::InvalidStl {
            message: message.into(),
        }
    }
}
