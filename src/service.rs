//! The manual service: workspaces, extraction cache and step timelines wired together
//!
//! Frame requests flow through [`ManualService::frames`]:
//! workspace read lock → cache lookup → (on miss) extraction on its own task.
//! Step state lives in memory; persistence is somebody else's job and only
//! ever sees [`Manual::to_document`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::analysis::{parse_steps, Analyzer, RejectedStep};
use crate::cache::{CacheStats, FrameCache, FrameKey, Frames};
use crate::config::FrameConfig;
use crate::error::{ManualError, Result};
use crate::extractor::{ExtractMode, FrameExtractor, FrameGrabber, FramePath};
use crate::manual::Manual;
use crate::markdown;
use crate::metrics::Metrics;
use crate::timeline::{ManualStep, StepDraft, StepId, Timeline};
use crate::timestamp::Timestamp;
use crate::workspace::{list_videos, resolve_video, ManualId, VideoHandle, Workspace};

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub manual: Manual,
    /// Analysis entries dropped during normalization.
    pub rejected: Vec<RejectedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepCandidates {
    pub frames: Vec<FramePath>,
    pub step: ManualStep,
    /// The candidate auto-bound by this request, if any.
    pub auto_bound: Option<FramePath>,
}

pub struct ManualService {
    config: FrameConfig,
    extractor: Arc<FrameExtractor>,
    cache: FrameCache,
    analyzer: Arc<dyn Analyzer>,
    workspaces: RwLock<HashMap<ManualId, Arc<Workspace>>>,
    manuals: RwLock<HashMap<ManualId, Manual>>,
    next_manual: AtomicU64,
    metrics: Arc<Metrics>,
}

impl ManualService {
    pub fn new(
        config: FrameConfig,
        grabber: Arc<dyn FrameGrabber>,
        analyzer: Arc<dyn Analyzer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let extractor = Arc::new(FrameExtractor::new(grabber, &config, Arc::clone(&metrics)));
        let cache = FrameCache::new(config.cache_capacity, Arc::clone(&metrics));
        Self {
            config,
            extractor,
            cache,
            analyzer,
            workspaces: RwLock::new(HashMap::new()),
            manuals: RwLock::new(HashMap::new()),
            next_manual: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn list_videos(&self) -> Result<Vec<String>> {
        list_videos(&self.config.uploads_dir).await
    }

    /// Attach a video to a new manual and populate it from the analyzer.
    ///
    /// The frame directory is purged before anything else touches it. If the
    /// analysis fails no manual is created and the workspace is removed.
    pub async fn create_manual(&self, video: &str, title: Option<String>) -> Result<Upload> {
        let path = resolve_video(&self.config.uploads_dir, video)?;
        let id = ManualId(self.next_manual.fetch_add(1, Ordering::Relaxed));
        let workspace = Arc::new(Workspace::new(&self.config.frames_root, id));

        let (handle, _) = workspace.attach(&path).await?;

        let analysis = match self.analyze(&path).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(manual = %id, video = %path.display(), error = %e, "Upload failed");
                workspace.remove().await;
                return Err(e);
            }
        };

        let title = title.unwrap_or_else(|| default_title(&path));
        let manual = Manual::new(id, title, handle, Timeline::from_drafts(analysis.steps));

        self.workspaces.write().await.insert(id, workspace);
        self.manuals.write().await.insert(id, manual.clone());

        info!(
            manual = %id,
            steps = manual.timeline.len(),
            rejected = analysis.rejected.len(),
            "Manual created",
        );
        Ok(Upload {
            manual,
            rejected: analysis.rejected,
        })
    }

    async fn analyze(&self, path: &Path) -> Result<crate::analysis::Analysis> {
        let text = self.analyzer.analyze(path).await.map_err(|e| match e {
            ManualError::AnalysisFailed(_) => e,
            other => ManualError::AnalysisFailed(other.to_string()),
        })?;
        parse_steps(&text)
    }

    /// Replace a manual's video. Old frames are purged, cached results for the
    /// old video dropped, and every step's binding cleared.
    pub async fn attach_video(&self, id: ManualId, video: &str) -> Result<Manual> {
        let path = resolve_video(&self.config.uploads_dir, video)?;
        let workspace = self.workspace(id).await?;

        let (handle, previous) = workspace.attach(&path).await?;
        if let Some(previous) = previous {
            let dropped = self.cache.invalidate_video(previous.id).await;
            info!(manual = %id, video = %previous.id, dropped, "Invalidated cached frames");
        }

        self.update(id, move |manual| {
            manual.video = handle;
            manual.timeline.clear_bindings();
            Ok(manual.clone())
        })
        .await
    }

    pub async fn manual(&self, id: ManualId) -> Result<Manual> {
        self.manuals
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ManualError::ManualNotFound(id))
    }

    pub async fn current_video(&self, id: ManualId) -> Result<VideoHandle> {
        Ok(self.manual(id).await?.video)
    }

    async fn workspace(&self, id: ManualId) -> Result<Arc<Workspace>> {
        self.workspaces
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ManualError::ManualNotFound(id))
    }

    async fn update<T, F>(&self, id: ManualId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Manual) -> Result<T> + Send,
        T: Send,
    {
        let mut manuals = self.manuals.write().await;
        let manual = manuals.get_mut(&id).ok_or(ManualError::ManualNotFound(id))?;
        let out = f(manual)?;
        manual.touch();
        Ok(out)
    }

    /// Frames for `timestamp` in `mode`, extracted at most once per key.
    pub async fn frames(&self, handle: &VideoHandle, timestamp: Timestamp, mode: ExtractMode) -> Result<Frames> {
        let workspace = self.workspace(handle.manual).await?;
        let guard = workspace.enter(handle).await?;

        let key = FrameKey {
            video: handle.id,
            timestamp,
            mode,
        };
        let extractor = Arc::clone(&self.extractor);
        let job_handle = handle.clone();
        let job = async move {
            let _guard = guard;
            extractor.extract(&job_handle, timestamp, mode).await
        };

        Ok(self.cache.get_or_extract(key, job).await?)
    }

    /// Exact-mode frame, used as a bound illustration.
    pub async fn generate_frame(&self, handle: &VideoHandle, timestamp: Timestamp) -> Result<FramePath> {
        let frames = self.frames(handle, timestamp, ExtractMode::Exact).await?;
        frames.first().cloned().ok_or_else(|| {
            crate::error::FrameError::ExtractionFailed(format!("no frame produced at {timestamp}")).into()
        })
    }

    /// Candidate set around `timestamp`, in configured offset order.
    pub async fn generate_candidates(&self, handle: &VideoHandle, timestamp: Timestamp) -> Result<Vec<FramePath>> {
        let frames = self.frames(handle, timestamp, ExtractMode::Candidates).await?;
        Ok(frames.as_ref().clone())
    }

    /// Extract candidates at a step's current timestamp and auto-bind one if
    /// the step is still unbound when they arrive.
    pub async fn step_candidates(&self, id: ManualId, step: StepId) -> Result<StepCandidates> {
        let (handle, timestamp) = self
            .update(id, |manual| {
                let timestamp = manual.timeline.get(step)?.timestamp;
                manual.timeline.mark_pending(step, timestamp)?;
                Ok((manual.video.clone(), timestamp))
            })
            .await?;

        let frames = match self.generate_candidates(&handle, timestamp).await {
            Ok(frames) => frames,
            Err(e) => {
                if let Err(cleanup) = self
                    .update(id, |manual| manual.timeline.clear_pending(step, timestamp))
                    .await
                {
                    warn!(manual = %id, step = %step, error = %cleanup, "Failed to clear pending binding");
                }
                return Err(e);
            }
        };

        self.update(id, |manual| {
            let auto_bound = if manual.video.id == handle.id {
                manual.timeline.offer_candidates(step, timestamp, &frames)?
            } else {
                None
            };
            Ok(StepCandidates {
                step: manual.timeline.get(step)?.clone(),
                frames,
                auto_bound,
            })
        })
        .await
    }

    /// Change a step's timestamp; its binding is cleared.
    pub async fn on_timestamp_changed(&self, id: ManualId, step: StepId, timestamp: Timestamp) -> Result<ManualStep> {
        self.update(id, |manual| Ok(manual.timeline.set_timestamp(step, timestamp)?.clone()))
            .await
    }

    pub async fn shift_step(&self, id: ManualId, step: StepId, delta: i64) -> Result<ManualStep> {
        self.update(id, |manual| Ok(manual.timeline.shift_timestamp(step, delta)?.clone()))
            .await
    }

    /// Bind a frame the user picked. It must come from the manual's current
    /// video and the step's current timestamp.
    pub async fn select_frame(&self, id: ManualId, step: StepId, frame: FramePath) -> Result<ManualStep> {
        self.update(id, |manual| {
            if frame.video != manual.video.id {
                return Err(ManualError::VideoSuperseded(frame.video));
            }
            Ok(manual.timeline.bind(step, frame)?.clone())
        })
        .await
    }

    /// [`Self::select_frame`] by served URL, looking the frame up among the
    /// extracted frames for the step's current timestamp.
    pub async fn select_frame_by_url(&self, id: ManualId, step: StepId, url: &str) -> Result<ManualStep> {
        let manual = self.manual(id).await?;
        let timestamp = manual.timeline.get(step)?.timestamp;

        for mode in [ExtractMode::Candidates, ExtractMode::Exact] {
            let key = FrameKey {
                video: manual.video.id,
                timestamp,
                mode,
            };
            if let Some(frames) = self.cache.peek(&key).await {
                if let Some(frame) = frames.iter().find(|f| f.url == url) {
                    return self.select_frame(id, step, frame.clone()).await;
                }
            }
        }
        Err(ManualError::InvalidInput(format!(
            "{url} was not extracted for step {step} at {timestamp}"
        )))
    }

    pub async fn edit_step(
        &self,
        id: ManualId,
        step: StepId,
        headline: Option<String>,
        description: Option<String>,
    ) -> Result<ManualStep> {
        self.update(id, |manual| Ok(manual.timeline.edit_text(step, headline, description)?.clone()))
            .await
    }

    pub async fn insert_step(&self, id: ManualId, index: Option<usize>, draft: StepDraft) -> Result<ManualStep> {
        self.update(id, |manual| {
            let index = index.unwrap_or(manual.timeline.len());
            let step = manual.timeline.insert(index, draft);
            Ok(manual.timeline.get(step)?.clone())
        })
        .await
    }

    pub async fn remove_step(&self, id: ManualId, step: StepId) -> Result<ManualStep> {
        self.update(id, |manual| manual.timeline.remove(step)).await
    }

    /// Move a step and return the new order.
    pub async fn move_step(&self, id: ManualId, step: StepId, index: usize) -> Result<Vec<StepId>> {
        self.update(id, |manual| {
            manual.timeline.move_step(step, index)?;
            Ok(manual.timeline.steps().iter().map(|s| s.id).collect())
        })
        .await
    }

    pub async fn markdown(&self, id: ManualId) -> Result<String> {
        Ok(markdown::render(&self.manual(id).await?))
    }
}

fn default_title(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
