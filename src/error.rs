use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("no face detected in the reference image {0}")]
    NoFaceInReference(String),

    #[error("unable to process {path}: not a recognised image ({source})")]
    UnrecognizedFormat {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reference file {0} does not exist")]
    MissingReferences(PathBuf),

    #[error("reference file {0} holds no faces")]
    EmptyReferences(PathBuf),

    #[error("no reference faces to search for")]
    NoReferences,

    #[error("tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f32),

    #[error("downscale factor must be in (0, 1], got {0}")]
    InvalidDownscale(f32),

    #[error("unknown crop ratio {0:?}, expected 1:1, 16:9 or 4:3")]
    InvalidRatio(String),
}
