//! A manual: title, attached video and step timeline

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::markdown;
use crate::timeline::{ManualStep, Timeline};
use crate::workspace::{ManualId, VideoHandle};

#[derive(Debug, Clone)]
pub struct Manual {
    pub id: ManualId,
    pub title: String,
    pub video: VideoHandle,
    pub timeline: Timeline,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manual {
    pub fn new(id: ManualId, title: String, video: VideoHandle, timeline: Timeline) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            video,
            timeline,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The JSON document handed to persistence.
    pub fn to_document(&self) -> ManualDocument {
        ManualDocument {
            id: self.id,
            title: self.title.clone(),
            video_path: self.video.path.display().to_string(),
            content: self.timeline.steps().iter().map(StepDocument::from).collect(),
            markdown_content: markdown::render(self),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualDocument {
    pub id: ManualId,
    pub title: String,
    pub video_path: String,
    pub content: Vec<StepDocument>,
    pub markdown_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    pub id: u64,
    pub time: String,
    pub headline: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

impl From<&ManualStep> for StepDocument {
    fn from(step: &ManualStep) -> Self {
        Self {
            id: step.id.0,
            time: step.timestamp.format(),
            headline: step.headline.clone(),
            description: step.description.clone(),
            screenshot_path: step.binding.frame().map(|f| f.url.clone()),
        }
    }
}
