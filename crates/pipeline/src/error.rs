//! Error types for backend execution and artifact finalization.

use std::path::PathBuf;

/// Failure to launch or wait on a backend process.
///
/// A backend that runs and exits non-zero is not an error here; the exit
/// code is reported and the runner decides what to do with it.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to spawn backend '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for backend: {0}")]
    Wait(#[source] std::io::Error),

    #[error("could not create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to build or splice the EXIF segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExifError {
    #[error("not a JPEG stream (missing SOI marker)")]
    NotJpeg,

    #[error("EXIF segment is {0} bytes, exceeds the 64 KiB APP1 limit")]
    TooLarge(usize),
}

/// Failure while turning an intermediate image into the final artifact.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),

    #[error(transparent)]
    Exif(#[from] ExifError),

    #[error("refusing to overwrite existing artifact {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
