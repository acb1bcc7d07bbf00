//! Per-manual frame directories and the video currently attached to them
//!
//! A workspace owns `<frames_root>/<manual_id>/`. Attaching a video purges that
//! directory under the workspace write lock; extractions hold the read lock for
//! their whole run, so a purge never races a half-written candidate set.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::{FrameError, ManualError, Result};

/// File extensions offered by [`list_videos`].
pub const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "webm", "mkv", "avi"];

/// Bytes read for file type detection.
const SNIFF_LEN: usize = 8192;

static NEXT_VIDEO_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManualId(pub u64);

impl fmt::Display for ManualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique id of an attached video; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub u64);

impl VideoId {
    fn next() -> Self {
        VideoId(NEXT_VIDEO_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An attached source video. Immutable; a re-upload produces a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoHandle {
    pub id: VideoId,
    pub manual: ManualId,
    pub path: PathBuf,
}

pub struct Workspace {
    manual: ManualId,
    dir: PathBuf,
    current: Arc<RwLock<Option<VideoHandle>>>,
}

impl Workspace {
    pub fn new(frames_root: impl AsRef<Path>, manual: ManualId) -> Self {
        Self {
            manual,
            dir: frames_root.as_ref().join(manual.to_string()),
            current: Arc::new(RwLock::new(None)),
        }
    }

    pub fn manual(&self) -> ManualId {
        self.manual
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn current(&self) -> Option<VideoHandle> {
        self.current.read().await.clone()
    }

    /// Attach `video`, superseding whatever was attached before.
    ///
    /// Waits for in-flight extractions, purges the frame directory, then
    /// installs the new handle. Returns the new handle and the one it replaced.
    pub async fn attach(&self, video: &Path) -> Result<(VideoHandle, Option<VideoHandle>)> {
        check_source(video).await?;

        let mut current = self.current.write().await;

        let removed = purge_dir(&self.dir).await;
        info!(manual = %self.manual, dir = %self.dir.display(), removed, "Purged frame directory");
        tokio::fs::create_dir_all(&self.dir).await?;

        let handle = VideoHandle {
            id: VideoId::next(),
            manual: self.manual,
            path: video.to_path_buf(),
        };
        let previous = current.replace(handle.clone());

        info!(
            manual = %self.manual,
            video = %handle.id,
            path = %handle.path.display(),
            superseded = ?previous.as_ref().map(|h| h.id),
            "Video attached",
        );
        Ok((handle, previous))
    }

    /// Enter the workspace for an extraction on `handle`.
    ///
    /// The returned guard keeps purges out until it is dropped.
    pub async fn enter(&self, handle: &VideoHandle) -> Result<OwnedRwLockReadGuard<Option<VideoHandle>>> {
        let guard = Arc::clone(&self.current).read_owned().await;
        match guard.as_ref() {
            Some(current) if current == handle => Ok(guard),
            _ => Err(ManualError::VideoSuperseded(handle.id)),
        }
    }

    /// Drop the workspace directory entirely.
    pub async fn remove(&self) {
        let mut current = self.current.write().await;
        current.take();
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(manual = %self.manual, error = %e, "Failed to remove workspace directory");
            }
        }
    }
}

/// Reject missing files and files that are recognisably not video.
async fn check_source(video: &Path) -> Result<()> {
    match tokio::fs::metadata(video).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(FrameError::SourceNotFound(video.to_path_buf()).into()),
    }

    let header = match read_header(video).await {
        Ok(header) => header,
        Err(e) => {
            debug!(path = %video.display(), error = %e, "File type sniff failed");
            return Ok(());
        }
    };

    match infer::get(&header) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Video => Err(ManualError::UnsupportedMedia {
            path: video.to_path_buf(),
            mime: kind.mime_type().to_string(),
        }),
        _ => Ok(()),
    }
}

/// First bytes of `path`, enough for magic-number detection.
async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}

/// Remove everything inside `dir`, returning how many entries went.
///
/// Failures are logged and skipped: frame names are deterministic, so a
/// leftover file is at worst overwritten by the next extraction.
async fn purge_dir(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read frame directory for purge");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list frame directory");
                break;
            }
        };
        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge frame"),
        }
    }
    removed
}

/// Video files in `uploads_dir`, sorted by name.
pub async fn list_videos(uploads_dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(uploads_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut videos = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_video_name(&name) {
            videos.push(name);
        }
    }
    videos.sort();
    Ok(videos)
}

fn is_video_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Resolve a client-supplied video reference.
///
/// Bare names are looked up in `uploads_dir`; absolute paths pass through.
/// Relative paths may not climb out with `..`.
pub fn resolve_video(uploads_dir: &Path, video: &str) -> Result<PathBuf> {
    let path = Path::new(video);
    if video.is_empty() {
        return Err(ManualError::InvalidInput("empty video path".to_string()));
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ManualError::InvalidInput(format!("video path escapes uploads: {video}")));
    }
    Ok(uploads_dir.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_attach_purges_previous_frames() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("demo.mov");
        std::fs::write(&video, b"not really a video").unwrap();

        let ws = Workspace::new(tmp.path().join("frames"), ManualId(7));
        let (first, previous) = ws.attach(&video).await.unwrap();
        assert!(previous.is_none());

        let stale = ws.dir().join("v1-0001-exact.jpg");
        std::fs::write(&stale, b"jpeg").unwrap();
        std::fs::create_dir_all(ws.dir().join("nested")).unwrap();

        let (second, previous) = ws.attach(&video).await.unwrap();
        assert_eq!(previous, Some(first.clone()));
        assert_ne!(first.id, second.id);
        assert!(!stale.exists());
        assert!(!ws.dir().join("nested").exists());
        assert!(ws.dir().is_dir());
    }

    #[tokio::test]
    async fn test_attach_missing_source() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path(), ManualId(1));
        let err = ws.attach(&tmp.path().join("missing.mov")).await.unwrap_err();
        assert!(matches!(err, ManualError::Frame(FrameError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_attach_rejects_images() {
        let tmp = TempDir::new().unwrap();
        let png = tmp.path().join("shot.mov");
        // PNG signature
        std::fs::write(&png, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]).unwrap();

        let ws = Workspace::new(tmp.path().join("frames"), ManualId(1));
        let err = ws.attach(&png).await.unwrap_err();
        assert!(matches!(err, ManualError::UnsupportedMedia { .. }));
    }

    #[tokio::test]
    async fn test_attach_accepts_mp4_header() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("clip.mp4");
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypisom\0\0\x02\0isomiso2mp41");
        bytes.resize(64, 0);
        std::fs::write(&video, &bytes).unwrap();

        let ws = Workspace::new(tmp.path().join("frames"), ManualId(1));
        let (handle, previous) = ws.attach(&video).await.unwrap();
        assert_eq!(handle.path, video);
        assert!(previous.is_none());
    }

    #[tokio::test]
    async fn test_enter_rejects_superseded_handle() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("demo.mp4");
        std::fs::write(&video, b"x").unwrap();

        let ws = Workspace::new(tmp.path().join("frames"), ManualId(3));
        let (old, _) = ws.attach(&video).await.unwrap();
        assert!(ws.enter(&old).await.is_ok());

        let (new, _) = ws.attach(&video).await.unwrap();
        assert!(matches!(ws.enter(&old).await, Err(ManualError::VideoSuperseded(id)) if id == old.id));
        assert!(ws.enter(&new).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_videos_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.mov", "a.MP4", "notes.txt", "c.webm"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("frames.mov")).unwrap();

        let videos = list_videos(tmp.path()).await.unwrap();
        assert_eq!(videos, vec!["a.MP4", "b.mov", "c.webm"]);

        assert!(list_videos(&tmp.path().join("missing")).await.unwrap().is_empty());
    }

    #[test]
    fn test_resolve_video() {
        let uploads = Path::new("/srv/uploads");
        assert_eq!(resolve_video(uploads, "demo.mov").unwrap(), uploads.join("demo.mov"));
        assert_eq!(resolve_video(uploads, "/tmp/x.mov").unwrap(), PathBuf::from("/tmp/x.mov"));
        assert!(resolve_video(uploads, "../etc/passwd").is_err());
        assert!(resolve_video(uploads, "").is_err());
    }
}
