//! Video analysis collaborator and normalization of its output
//!
//! The analyzer's text is model output: it may be wrapped in a Markdown code
//! fence, may not be JSON at all, and individual steps may carry times like
//! `"99:99"` or `"1:05:00"`. Unparsable output fails the upload; individual
//! bad steps are dropped and reported.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ManualError, Result};
use crate::timeline::StepDraft;
use crate::timestamp::Timestamp;

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze `video` and return the raw model response text.
    async fn analyze(&self, video: &Path) -> Result<String>;
}

/// Runs an external program with the video path as its last argument and
/// takes its stdout as the analysis text.
pub struct CommandAnalyzer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(&self, video: &Path) -> Result<String> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(video)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ManualError::AnalysisFailed(format!("{}: {e}", self.program.display())))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ManualError::AnalysisFailed(format!("timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ManualError::AnalysisFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ManualError::AnalysisFailed(format!(
                "{} exited with {}: {stderr}",
                self.program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// A step that did not survive normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedStep {
    /// Position in the analyzer's list.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub steps: Vec<StepDraft>,
    pub rejected: Vec<RejectedStep>,
}

/// Parse analyzer output into validated step drafts.
///
/// Accepts a JSON array of `{time, headline, description}` or an object with
/// a `steps` array, optionally inside a code fence.
pub fn parse_steps(text: &str) -> Result<Analysis> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ManualError::AnalysisFailed(format!("response is not JSON: {e}")))?;

    let entries = match &value {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("steps") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(ManualError::AnalysisFailed(
                    "expected a list of steps or an object with a `steps` list".to_string(),
                ))
            }
        },
        _ => {
            return Err(ManualError::AnalysisFailed(
                "expected a list of steps".to_string(),
            ))
        }
    };

    let mut analysis = Analysis::default();
    for (index, entry) in entries.iter().enumerate() {
        match normalize_entry(entry) {
            Ok(step) => analysis.steps.push(step),
            Err(reason) => {
                warn!(index, %reason, "Dropping analysis step");
                analysis.rejected.push(RejectedStep { index, reason });
            }
        }
    }
    debug!(accepted = analysis.steps.len(), rejected = analysis.rejected.len(), "Analysis normalized");
    Ok(analysis)
}

fn normalize_entry(entry: &Value) -> std::result::Result<StepDraft, String> {
    let fields = entry.as_object().ok_or("step is not an object")?;

    let time = fields
        .get("time")
        .and_then(Value::as_str)
        .ok_or("missing `time`")?;
    let timestamp = Timestamp::parse(time).map_err(|e| e.to_string())?;

    let headline = fields
        .get("headline")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or("missing `headline`")?;

    let description = fields
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(StepDraft {
        timestamp,
        headline: headline.to_string(),
        description: description.trim().to_string(),
    })
}

/// Strip a surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`) on the opening line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
