pub mod annotate;
pub mod archive;
pub mod config;
pub mod crop;
pub mod error;
pub mod matcher;
pub mod storage;

pub use error::FinderError;
pub use matcher::{MatchOptions, MatchReport, MatchedPhoto, SkippedFile};

// Re-export vision types for convenience
pub use snapfind_vision::{face, pipeline, segment, Detection, Embedding, FaceEncoder, Pipeline};
