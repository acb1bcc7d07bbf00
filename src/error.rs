use std::path::PathBuf;

use thiserror::Error;

use crate::timeline::StepId;
use crate::timestamp::Timestamp;
use crate::workspace::{ManualId, VideoId};

/// Errors an extraction can end with.
///
/// Cloneable because one outcome is handed to every caller that was
/// waiting on the same in-flight extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid timestamp {0:?}: expected MM:SS with both fields below 60")]
    InvalidFormat(String),

    #[error("Video source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(String),
}

#[derive(Error, Debug)]
pub enum ManualError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Unsupported media {}: detected {mime}", .path.display())]
    UnsupportedMedia { path: PathBuf, mime: String },

    #[error("Video {0} has been superseded by a newer upload")]
    VideoSuperseded(VideoId),

    #[error("Manual not found: {0}")]
    ManualNotFound(ManualId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Frame was extracted at {frame} but the step is now at {current}")]
    StaleFrame { frame: Timestamp, current: Timestamp },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManualError {
    /// Short machine-readable name, used in dispatch responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ManualError::Frame(FrameError::InvalidFormat(_)) => "InvalidFormat",
            ManualError::Frame(FrameError::SourceNotFound(_)) => "SourceNotFound",
            ManualError::Frame(FrameError::ExtractionFailed(_)) => "ExtractionFailed",
            ManualError::AnalysisFailed(_) => "AnalysisFailed",
            ManualError::UnsupportedMedia { .. } => "UnsupportedMedia",
            ManualError::VideoSuperseded(_) => "VideoSuperseded",
            ManualError::ManualNotFound(_) => "ManualNotFound",
            ManualError::StepNotFound(_) => "StepNotFound",
            ManualError::StaleFrame { .. } => "StaleFrame",
            ManualError::InvalidInput(_) => "InvalidInput",
            ManualError::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ManualError>;
