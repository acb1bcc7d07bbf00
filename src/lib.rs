//! manual_frames - timestamp-indexed frame extraction for video manuals
//!
//! A manual is a list of steps, each pinned to a `MM:SS` timestamp of a
//! screen recording. This crate grabs frames for those timestamps with the
//! system `ffmpeg` binary, coalesces concurrent requests for the same frame,
//! and keeps every step's bound frame consistent with its current timestamp.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod manual;
pub mod markdown;
pub mod metrics;
pub mod service;
pub mod timeline;
pub mod timestamp;
pub mod validation;
pub mod workspace;

pub use analysis::{parse_steps, Analysis, Analyzer, CommandAnalyzer, RejectedStep};
pub use cache::{CacheStats, FrameCache, FrameKey};
pub use config::{FrameConfig, FrameSize};
pub use error::{FrameError, ManualError, Result};
pub use extractor::{ExtractMode, FfmpegGrabber, FrameExtractor, FrameGrabber, FramePath, GrabRequest, Shot};
pub use ffmpeg::{FfmpegCommand, FfmpegError};
pub use manual::{Manual, ManualDocument, StepDocument};
pub use metrics::Metrics;
pub use service::{ManualService, StepCandidates, Upload};
pub use timeline::{Binding, BindingSource, ManualStep, StepDraft, StepId, Timeline};
pub use timestamp::Timestamp;
pub use workspace::{ManualId, VideoHandle, VideoId, Workspace};
