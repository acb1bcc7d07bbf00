//! Ordered manual steps and their illustration bindings
//!
//! Binding states per step:
//!
//! ```text
//! Unbound --request--> Pending --auto/user--> Bound
//!    ^                                          |
//!    +------------- timestamp changed ----------+   (from any state)
//! ```
//!
//! A `Bound` frame was always extracted at the step's current timestamp:
//! every timestamp write goes through [`Timeline::set_timestamp`], which
//! clears the binding in the same step.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ManualError, Result};
use crate::extractor::FramePath;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// Picked from a candidate set without user involvement.
    Auto,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Binding {
    Unbound,
    /// Candidates requested for `timestamp`, none chosen yet.
    Pending { timestamp: Timestamp },
    Bound { frame: FramePath, source: BindingSource },
}

impl Binding {
    pub fn frame(&self) -> Option<&FramePath> {
        match self {
            Binding::Bound { frame, .. } => Some(frame),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualStep {
    pub id: StepId,
    pub timestamp: Timestamp,
    pub headline: String,
    pub description: String,
    pub binding: Binding,
}

/// Content of a step before it joins a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepDraft {
    pub timestamp: Timestamp,
    pub headline: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Timeline {
    steps: Vec<ManualStep>,
    #[serde(skip)]
    next_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_drafts(drafts: impl IntoIterator<Item = StepDraft>) -> Self {
        let mut timeline = Self::new();
        for draft in drafts {
            timeline.push(draft);
        }
        timeline
    }

    pub fn steps(&self) -> &[ManualStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: StepId) -> Result<&ManualStep> {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .ok_or(ManualError::StepNotFound(id))
    }

    fn get_mut(&mut self, id: StepId) -> Result<&mut ManualStep> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ManualError::StepNotFound(id))
    }

    pub fn position(&self, id: StepId) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or(ManualError::StepNotFound(id))
    }

    fn make_step(&mut self, draft: StepDraft) -> ManualStep {
        self.next_id += 1;
        ManualStep {
            id: StepId(self.next_id),
            timestamp: draft.timestamp,
            headline: draft.headline,
            description: draft.description,
            binding: Binding::Unbound,
        }
    }

    pub fn push(&mut self, draft: StepDraft) -> StepId {
        let step = self.make_step(draft);
        let id = step.id;
        self.steps.push(step);
        id
    }

    /// Insert at `index`, clamped to the end.
    pub fn insert(&mut self, index: usize, draft: StepDraft) -> StepId {
        let step = self.make_step(draft);
        let id = step.id;
        let index = index.min(self.steps.len());
        self.steps.insert(index, step);
        id
    }

    pub fn remove(&mut self, id: StepId) -> Result<ManualStep> {
        let index = self.position(id)?;
        Ok(self.steps.remove(index))
    }

    /// Move a step to `index` (clamped), keeping everyone's bindings.
    pub fn move_step(&mut self, id: StepId, index: usize) -> Result<()> {
        let from = self.position(id)?;
        let step = self.steps.remove(from);
        let to = index.min(self.steps.len());
        self.steps.insert(to, step);
        Ok(())
    }

    /// Set a new timestamp. The binding is cleared unconditionally.
    pub fn set_timestamp(&mut self, id: StepId, timestamp: Timestamp) -> Result<&ManualStep> {
        let step = self.get_mut(id)?;
        debug!(step = %id, from = %step.timestamp, to = %timestamp, "Step timestamp changed");
        step.timestamp = timestamp;
        step.binding = Binding::Unbound;
        Ok(step)
    }

    /// Nudge the timestamp by `delta` seconds; see [`Timestamp::shift`].
    pub fn shift_timestamp(&mut self, id: StepId, delta: i64) -> Result<&ManualStep> {
        let shifted = self.get(id)?.timestamp.shift(delta);
        self.set_timestamp(id, shifted)
    }

    pub fn edit_text(
        &mut self,
        id: StepId,
        headline: Option<String>,
        description: Option<String>,
    ) -> Result<&ManualStep> {
        let step = self.get_mut(id)?;
        if let Some(headline) = headline {
            step.headline = headline;
        }
        if let Some(description) = description {
            step.description = description;
        }
        Ok(step)
    }

    /// Record that candidates were requested for `timestamp`.
    ///
    /// Returns false (and changes nothing) when the step has moved on to
    /// another timestamp. A bound step stays bound.
    pub fn mark_pending(&mut self, id: StepId, timestamp: Timestamp) -> Result<bool> {
        let step = self.get_mut(id)?;
        if step.timestamp != timestamp {
            return Ok(false);
        }
        if !step.binding.is_bound() {
            step.binding = Binding::Pending { timestamp };
        }
        Ok(true)
    }

    /// Undo [`Timeline::mark_pending`] after a failed request, if the step
    /// is still waiting on `timestamp`.
    pub fn clear_pending(&mut self, id: StepId, timestamp: Timestamp) -> Result<()> {
        let step = self.get_mut(id)?;
        if step.binding == (Binding::Pending { timestamp }) {
            step.binding = Binding::Unbound;
        }
        Ok(())
    }

    /// Bind a user-chosen frame.
    pub fn bind(&mut self, id: StepId, frame: FramePath) -> Result<&ManualStep> {
        let step = self.get_mut(id)?;
        if frame.timestamp != step.timestamp {
            return Err(ManualError::StaleFrame {
                frame: frame.timestamp,
                current: step.timestamp,
            });
        }
        step.binding = Binding::Bound {
            frame,
            source: BindingSource::User,
        };
        Ok(step)
    }

    /// Offer a freshly extracted candidate set for `timestamp`.
    ///
    /// Auto-binds the offset-0 candidate (else the first) when the step is
    /// still at `timestamp` and has no binding. Returns the frame that was
    /// bound, if any.
    pub fn offer_candidates(
        &mut self,
        id: StepId,
        timestamp: Timestamp,
        candidates: &[FramePath],
    ) -> Result<Option<FramePath>> {
        let step = self.get_mut(id)?;
        if step.timestamp != timestamp || step.binding.is_bound() {
            return Ok(None);
        }
        let chosen = candidates
            .iter()
            .find(|f| f.offset == 0)
            .or_else(|| candidates.first())
            .filter(|f| f.timestamp == timestamp)
            .cloned();

        if let Some(frame) = &chosen {
            debug!(step = %id, %timestamp, offset = frame.offset, "Auto-bound candidate");
            step.binding = Binding::Bound {
                frame: frame.clone(),
                source: BindingSource::Auto,
            };
        }
        Ok(chosen)
    }

    /// Drop every binding, e.g. after the source video was replaced.
    pub fn clear_bindings(&mut self) {
        for step in &mut self.steps {
            step.binding = Binding::Unbound;
        }
    }
}
