//! Tunables for extraction, caching and the workspace layout

use std::path::PathBuf;
use std::time::Duration;

/// Output size hint passed to the frame-grab tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// `WIDTHxHEIGHT`, the form ffmpeg's `-s` expects.
    pub fn as_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

pub struct FrameConfig {
    /// Root under which each manual gets its own frame directory.
    pub frames_root: PathBuf,
    /// Where uploaded videos live; bare file names resolve against it.
    pub uploads_dir: PathBuf,
    /// URL prefix frames are served under.
    pub public_prefix: String,
    pub frame_size: FrameSize,
    /// ffmpeg `-q:v` (2 = near lossless JPEG, 31 = worst).
    pub jpeg_quality: u8,
    /// Second offsets of the candidate set, in presentation order.
    pub candidate_offsets: Vec<i32>,
    /// Completed cache entries kept before LRU eviction. `None` = unbounded.
    pub cache_capacity: Option<usize>,
    pub tool_timeout: Option<Duration>,
    pub ffmpeg_bin: PathBuf,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_root: PathBuf::from("uploads/frames"),
            uploads_dir: PathBuf::from("uploads"),
            public_prefix: "/frames".to_string(),
            frame_size: FrameSize::default(),
            jpeg_quality: 2,
            candidate_offsets: vec![-2, -1, 0, 1, 2],
            cache_capacity: None,
            tool_timeout: Some(Duration::from_secs(60)),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
        }
    }
}
