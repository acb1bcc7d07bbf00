//! Frame extraction at whole-second offsets
//!
//! The external tool sits behind [`FrameGrabber`]; [`FfmpegGrabber`] is the
//! production implementation. [`FrameExtractor`] decides which seconds to grab
//! and where each frame lands. Output paths are a pure function of
//! `(video, timestamp, shot)`, so re-extracting overwrites and never duplicates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{FrameConfig, FrameSize};
use crate::error::FrameError;
use crate::ffmpeg::FfmpegCommand;
use crate::metrics::Metrics;
use crate::timestamp::Timestamp;
use crate::workspace::{ManualId, VideoHandle, VideoId};

/// Which frames a request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// One frame at the timestamp itself, used as the bound illustration.
    Exact,
    /// The configured offsets around the timestamp, for the user to pick from.
    Candidates,
}

/// One extracted frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePath {
    pub video: VideoId,
    /// Base timestamp the frame was requested for.
    pub timestamp: Timestamp,
    /// Offset from `timestamp` in seconds; 0 in exact mode.
    pub offset: i32,
    /// Absolute second actually grabbed, after clamping at 0.
    pub seconds: u32,
    pub file: PathBuf,
    pub url: String,
}

/// A single frame the tool should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shot {
    pub seconds: u32,
    pub output: PathBuf,
}

/// One invocation of the external frame-grab tool.
#[derive(Debug, Clone)]
pub struct GrabRequest {
    pub source: PathBuf,
    pub shots: Vec<Shot>,
    pub size: FrameSize,
}

#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Write every shot in `request`, returning the outputs that were
    /// actually produced. Tool failures carry the tool's diagnostic text.
    async fn grab(&self, request: &GrabRequest) -> Result<Vec<PathBuf>, FrameError>;
}

/// Runs one `ffmpeg` process per request: one seeked input and one
/// single-frame output per shot.
pub struct FfmpegGrabber {
    program: PathBuf,
    quality: u8,
    timeout: Option<Duration>,
}

impl FfmpegGrabber {
    pub fn new(program: impl Into<PathBuf>, quality: u8, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            quality,
            timeout,
        }
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::new(config.ffmpeg_bin.clone(), config.jpeg_quality, config.tool_timeout)
    }

    pub fn command(&self, request: &GrabRequest) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&self.program).overwrite().quiet();
        for shot in &request.shots {
            cmd = cmd.input_at(&request.source, shot.seconds);
        }

        let size = request.size.as_arg();
        let quality = self.quality.to_string();
        for (index, shot) in request.shots.iter().enumerate() {
            cmd = cmd
                .args(&[
                    "-map", &format!("{index}:v:0"),
                    "-frames:v", "1",
                    "-s", &size,
                    "-q:v", &quality,
                ])
                .output(&shot.output);
        }
        cmd
    }
}

#[async_trait]
impl FrameGrabber for FfmpegGrabber {
    async fn grab(&self, request: &GrabRequest) -> Result<Vec<PathBuf>, FrameError> {
        self.command(request)
            .execute(self.timeout)
            .await
            .map_err(|e| FrameError::ExtractionFailed(e.to_string()))?;

        let mut written = Vec::with_capacity(request.shots.len());
        for shot in &request.shots {
            match tokio::fs::metadata(&shot.output).await {
                Ok(meta) if meta.len() > 0 => {
                    if let Some((w, h)) = frame_dimensions(shot.output.clone()).await {
                        debug!(output = %shot.output.display(), width = w, height = h, "Frame written");
                    }
                    written.push(shot.output.clone());
                }
                _ => debug!(output = %shot.output.display(), seconds = shot.seconds, "No frame written"),
            }
        }
        Ok(written)
    }
}

/// Where frames live on disk and under which URL they are served.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    pub frames_root: PathBuf,
    pub public_prefix: String,
}

impl FrameLayout {
    pub fn dir(&self, manual: ManualId) -> PathBuf {
        self.frames_root.join(manual.to_string())
    }

    /// `v<video>-<MMSS>-<suffix>.jpg`; suffix is `exact` or the signed offset
    /// spelled `m2`, `p0`, `p1`.
    pub fn file_name(video: VideoId, timestamp: Timestamp, mode: ExtractMode, offset: i32) -> String {
        let suffix = match mode {
            ExtractMode::Exact => "exact".to_string(),
            ExtractMode::Candidates if offset < 0 => format!("m{}", offset.unsigned_abs()),
            ExtractMode::Candidates => format!("p{offset}"),
        };
        format!("v{}-{}-{}.jpg", video, timestamp.compact(), suffix)
    }

    pub fn url(&self, manual: ManualId, file_name: &str) -> String {
        format!("{}/{}/{}", self.public_prefix.trim_end_matches('/'), manual, file_name)
    }
}

pub struct FrameExtractor {
    grabber: Arc<dyn FrameGrabber>,
    layout: FrameLayout,
    size: FrameSize,
    offsets: Vec<i32>,
    metrics: Arc<Metrics>,
}

impl FrameExtractor {
    pub fn new(grabber: Arc<dyn FrameGrabber>, config: &FrameConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            grabber,
            layout: FrameLayout {
                frames_root: config.frames_root.clone(),
                public_prefix: config.public_prefix.clone(),
            },
            size: config.frame_size,
            offsets: config.candidate_offsets.clone(),
            metrics,
        }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// The frames `mode` asks for, in presentation order.
    pub fn plan(&self, handle: &VideoHandle, timestamp: Timestamp, mode: ExtractMode) -> Vec<FramePath> {
        let offsets: &[i32] = match mode {
            ExtractMode::Exact => &[0],
            ExtractMode::Candidates => &self.offsets,
        };
        let dir = self.layout.dir(handle.manual);

        offsets
            .iter()
            .map(|&offset| {
                let name = FrameLayout::file_name(handle.id, timestamp, mode, offset);
                FramePath {
                    video: handle.id,
                    timestamp,
                    offset,
                    seconds: clamp_seconds(timestamp.total_seconds(), offset),
                    file: dir.join(&name),
                    url: self.layout.url(handle.manual, &name),
                }
            })
            .collect()
    }

    /// Extract the frames for `timestamp` from `handle`'s video.
    ///
    /// Suspends until the tool exits. Candidate frames the tool could not
    /// produce (past the end of the video) are dropped; an empty result is
    /// an error.
    pub async fn extract(
        &self,
        handle: &VideoHandle,
        timestamp: Timestamp,
        mode: ExtractMode,
    ) -> Result<Vec<FramePath>, FrameError> {
        if !is_file(&handle.path).await {
            return Err(FrameError::SourceNotFound(handle.path.clone()));
        }

        let planned = self.plan(handle, timestamp, mode);
        let dir = self.layout.dir(handle.manual);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FrameError::ExtractionFailed(format!("create {}: {e}", dir.display())))?;

        let request = GrabRequest {
            source: handle.path.clone(),
            shots: planned
                .iter()
                .map(|f| Shot {
                    seconds: f.seconds,
                    output: f.file.clone(),
                })
                .collect(),
            size: self.size,
        };

        debug!(video = %handle.id, %timestamp, ?mode, shots = request.shots.len(), "Invoking frame grabber");
        let result = self.grabber.grab(&request).await;
        self.metrics.record_tool_invocation(result.is_ok());
        let written: HashSet<PathBuf> = result?.into_iter().collect();

        let (frames, missing): (Vec<_>, Vec<_>) =
            planned.into_iter().partition(|f| written.contains(&f.file));

        for frame in &missing {
            warn!(video = %handle.id, %timestamp, offset = frame.offset, seconds = frame.seconds, "Frame not produced");
        }
        if frames.is_empty() {
            return Err(FrameError::ExtractionFailed(format!(
                "no frame produced at {timestamp} from {}",
                handle.path.display()
            )));
        }
        Ok(frames)
    }
}

fn clamp_seconds(base: u32, offset: i32) -> u32 {
    (base as i64 + offset as i64).max(0) as u32
}

/// Image header dimensions, read off the async runtime.
async fn frame_dimensions(path: PathBuf) -> Option<(u32, u32)> {
    tokio::task::spawn_blocking(move || image::image_dimensions(path).ok())
        .await
        .ok()
        .flatten()
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes every shot except those at or past `end`, like a video of that length.
    struct ShortVideo {
        end: u32,
        seen: Mutex<Vec<GrabRequest>>,
    }

    #[async_trait]
    impl FrameGrabber for ShortVideo {
        async fn grab(&self, request: &GrabRequest) -> Result<Vec<PathBuf>, FrameError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut written = Vec::new();
            for shot in request.shots.iter().filter(|s| s.seconds < self.end) {
                std::fs::write(&shot.output, b"jpeg").unwrap();
                written.push(shot.output.clone());
            }
            Ok(written)
        }
    }

    struct Broken;

    #[async_trait]
    impl FrameGrabber for Broken {
        async fn grab(&self, _request: &GrabRequest) -> Result<Vec<PathBuf>, FrameError> {
            Err(FrameError::ExtractionFailed("moov atom not found".to_string()))
        }
    }

    fn setup(grabber: Arc<dyn FrameGrabber>) -> (TempDir, FrameExtractor, VideoHandle) {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("demo.mov");
        std::fs::write(&video, b"x").unwrap();
        let config = FrameConfig {
            frames_root: tmp.path().join("frames"),
            ..Default::default()
        };
        let extractor = FrameExtractor::new(grabber, &config, Metrics::new());
        let handle = VideoHandle {
            id: VideoId(4),
            manual: ManualId(9),
            path: video,
        };
        (tmp, extractor, handle)
    }

    #[test]
    fn test_file_names() {
        let ts = Timestamp::parse("07:05").unwrap();
        assert_eq!(FrameLayout::file_name(VideoId(3), ts, ExtractMode::Exact, 0), "v3-0705-exact.jpg");
        assert_eq!(FrameLayout::file_name(VideoId(3), ts, ExtractMode::Candidates, -2), "v3-0705-m2.jpg");
        assert_eq!(FrameLayout::file_name(VideoId(3), ts, ExtractMode::Candidates, 0), "v3-0705-p0.jpg");
        assert_eq!(FrameLayout::file_name(VideoId(3), ts, ExtractMode::Candidates, 1), "v3-0705-p1.jpg");
    }

    #[test]
    fn test_candidate_plan_seconds() {
        let (_tmp, extractor, handle) = setup(Arc::new(Broken));
        let plan = extractor.plan(&handle, Timestamp::parse("07:05").unwrap(), ExtractMode::Candidates);
        let seconds: Vec<u32> = plan.iter().map(|f| f.seconds).collect();
        assert_eq!(seconds, vec![423, 424, 425, 426, 427]);
        assert_eq!(plan[2].url, "/frames/9/v4-0705-p0.jpg");
    }

    #[test]
    fn test_plan_clamps_negative_seconds() {
        let (_tmp, extractor, handle) = setup(Arc::new(Broken));
        let plan = extractor.plan(&handle, Timestamp::parse("00:01").unwrap(), ExtractMode::Candidates);
        let seconds: Vec<u32> = plan.iter().map(|f| f.seconds).collect();
        assert_eq!(seconds, vec![0, 0, 1, 2, 3]);
        // still distinct files, keyed by offset
        assert_ne!(plan[0].file, plan[1].file);
    }

    #[test]
    fn test_ffmpeg_command_single_process() {
        let grabber = FfmpegGrabber::new("ffmpeg", 2, None);
        let request = GrabRequest {
            source: PathBuf::from("/v/demo.mov"),
            shots: vec![
                Shot { seconds: 4, output: PathBuf::from("/f/a.jpg") },
                Shot { seconds: 5, output: PathBuf::from("/f/b.jpg") },
            ],
            size: FrameSize::default(),
        };
        let args = grabber.command(&request).arg_list().join(" ");
        assert_eq!(
            args,
            "-y -hide_banner -loglevel error \
             -ss 4 -i /v/demo.mov -ss 5 -i /v/demo.mov \
             -map 0:v:0 -frames:v 1 -s 1280x720 -q:v 2 /f/a.jpg \
             -map 1:v:0 -frames:v 1 -s 1280x720 -q:v 2 /f/b.jpg"
        );
    }

    #[tokio::test]
    async fn test_frame_dimensions() {
        let tmp = TempDir::new().unwrap();
        let frame = tmp.path().join("frame.png");
        image::RgbImage::new(4, 3).save(&frame).unwrap();
        assert_eq!(frame_dimensions(frame).await, Some((4, 3)));

        let garbage = tmp.path().join("garbage.jpg");
        std::fs::write(&garbage, b"jpeg").unwrap();
        assert_eq!(frame_dimensions(garbage).await, None);
    }

    #[tokio::test]
    async fn test_extract_drops_frames_past_end() {
        let grabber = Arc::new(ShortVideo { end: 426, seen: Mutex::new(Vec::new()) });
        let (_tmp, extractor, handle) = setup(grabber.clone());

        let frames = extractor
            .extract(&handle, Timestamp::parse("07:05").unwrap(), ExtractMode::Candidates)
            .await
            .unwrap();
        let offsets: Vec<i32> = frames.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![-2, -1, 0]);
        assert_eq!(grabber.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extract_nothing_written_fails() {
        let grabber = Arc::new(ShortVideo { end: 0, seen: Mutex::new(Vec::new()) });
        let (_tmp, extractor, handle) = setup(grabber);
        let err = extractor
            .extract(&handle, Timestamp::parse("00:10").unwrap(), ExtractMode::Exact)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_extract_missing_source() {
        let (_tmp, extractor, mut handle) = setup(Arc::new(Broken));
        handle.path = handle.path.with_file_name("gone.mov");
        let err = extractor
            .extract(&handle, Timestamp::ZERO, ExtractMode::Exact)
            .await
            .unwrap_err();
        assert_eq!(err, FrameError::SourceNotFound(handle.path.clone()));
    }

    #[tokio::test]
    async fn test_extract_surfaces_tool_diagnostic() {
        let (_tmp, extractor, handle) = setup(Arc::new(Broken));
        let err = extractor
            .extract(&handle, Timestamp::ZERO, ExtractMode::Exact)
            .await
            .unwrap_err();
        assert_eq!(err, FrameError::ExtractionFailed("moov atom not found".to_string()));
    }
}
