//! JSON request dispatch for manual_frames
//!
//! Every operation takes a [`Request`] with a JSON `input` and answers with a
//! [`Response`]. Inputs are checked against the operation's schema from
//! [`ServiceCard`] before the handler runs, so a malformed request never
//! reaches the extractor.
//!
//! ## Available Operations
//!
//! 1. `manual.create` - Attach an uploaded video and analyze it into steps
//! 2. `manual.get` - Manual document with step bindings
//! 3. `manual.attach_video` - Replace a manual's video
//! 4. `manual.markdown` - Render a manual as Markdown
//! 5. `videos.list` - Videos available for upload
//! 6. `frame.generate` - Exact frame at a timestamp
//! 7. `frame.candidates` - Candidate frames around a timestamp
//! 8. `step.*` - Timeline edits and frame binding
//! 9. `service.capabilities` / `metrics`
//!
//! ## Example
//!
//! ```rust,no_run
//! use manual_frames::dispatch::{Handler, ManualDispatcher, Request};
//! use serde_json::json;
//! use std::collections::HashMap;
//! # use std::sync::Arc;
//! # async fn example(service: Arc<manual_frames::ManualService>) {
//! let dispatcher = ManualDispatcher::new(service);
//!
//! let response = dispatcher.handle(Request {
//!     op: "step.set_timestamp".to_string(),
//!     input: json!({"manual_id": 1, "step_id": 2, "time": "01:05"}),
//!     context: HashMap::new(),
//! }).await;
//! assert!(response.ok);
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ManualError, Result};
use crate::manual::Manual;
use crate::metrics::Timer;
use crate::service::ManualService;
use crate::timeline::{StepDraft, StepId};
use crate::timestamp::Timestamp;
use crate::validation::validate_input;
use crate::workspace::ManualId;

/// Input to an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub op: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Output of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
    fn describe(&self) -> ServiceCard;
}

/// Service capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    pub functions: Vec<FunctionCard>,
}

impl ServiceCard {
    pub fn function(&self, name: &str) -> Option<&FunctionCard> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
}

pub struct ManualDispatcher {
    service: Arc<ManualService>,
    card: ServiceCard,
}

impl ManualDispatcher {
    pub fn new(service: Arc<ManualService>) -> Self {
        Self {
            service,
            card: service_card(),
        }
    }

    pub fn service(&self) -> &Arc<ManualService> {
        &self.service
    }

    async fn route(&self, op: &str, input: Value) -> Result<Value> {
        let service = &self.service;
        match op {
            "manual.create" => {
                let video = str_field(&input, "video")?;
                let title = opt_str_field(&input, "title");
                let upload = service.create_manual(video, title).await?;
                let mut output = manual_view(&upload.manual);
                output["rejected"] = json!(upload.rejected);
                Ok(output)
            }
            "manual.get" => {
                let manual = service.manual(manual_id(&input)?).await?;
                Ok(manual_view(&manual))
            }
            "manual.attach_video" => {
                let video = str_field(&input, "video")?;
                let manual = service.attach_video(manual_id(&input)?, video).await?;
                Ok(manual_view(&manual))
            }
            "manual.markdown" => {
                let markdown = service.markdown(manual_id(&input)?).await?;
                Ok(json!({ "markdown": markdown }))
            }
            "videos.list" => Ok(json!({ "videos": service.list_videos().await? })),
            "frame.generate" => {
                let timestamp = time_field(&input)?;
                let video = service.current_video(manual_id(&input)?).await?;
                let frame = service.generate_frame(&video, timestamp).await?;
                Ok(json!({ "frame": frame }))
            }
            "frame.candidates" => {
                let timestamp = time_field(&input)?;
                let video = service.current_video(manual_id(&input)?).await?;
                let frames = service.generate_candidates(&video, timestamp).await?;
                Ok(json!({ "frames": frames }))
            }
            "step.candidates" => {
                let candidates = service.step_candidates(manual_id(&input)?, step_id(&input)?).await?;
                Ok(json!(candidates))
            }
            "step.set_timestamp" => {
                let timestamp = time_field(&input)?;
                let step = service
                    .on_timestamp_changed(manual_id(&input)?, step_id(&input)?, timestamp)
                    .await?;
                Ok(json!({ "step": step }))
            }
            "step.shift" => {
                let delta = int_field(&input, "delta")?;
                let step = service.shift_step(manual_id(&input)?, step_id(&input)?, delta).await?;
                Ok(json!({ "step": step }))
            }
            "step.select_frame" => {
                let url = str_field(&input, "url")?;
                let step = service
                    .select_frame_by_url(manual_id(&input)?, step_id(&input)?, url)
                    .await?;
                Ok(json!({ "step": step }))
            }
            "step.edit" => {
                let step = service
                    .edit_step(
                        manual_id(&input)?,
                        step_id(&input)?,
                        opt_str_field(&input, "headline"),
                        opt_str_field(&input, "description"),
                    )
                    .await?;
                Ok(json!({ "step": step }))
            }
            "step.insert" => {
                let draft = StepDraft {
                    timestamp: time_field(&input)?,
                    headline: str_field(&input, "headline")?.to_string(),
                    description: opt_str_field(&input, "description").unwrap_or_default(),
                };
                let index = opt_index_field(&input, "index")?;
                let step = service.insert_step(manual_id(&input)?, index, draft).await?;
                Ok(json!({ "step": step }))
            }
            "step.remove" => {
                let step = service.remove_step(manual_id(&input)?, step_id(&input)?).await?;
                Ok(json!({ "removed": step }))
            }
            "step.move" => {
                let index = opt_index_field(&input, "index")?
                    .ok_or_else(|| ManualError::InvalidInput("Missing index".to_string()))?;
                let order = service.move_step(manual_id(&input)?, step_id(&input)?, index).await?;
                Ok(json!({ "order": order }))
            }
            "service.capabilities" => serde_json::to_value(&self.card)
                .map_err(|e| ManualError::InvalidInput(e.to_string())),
            "metrics" => Ok(json!({
                "metrics": service.metrics().snapshot(),
                "cache": service.cache_stats().await,
            })),
            _ => Err(ManualError::InvalidInput(format!("Unsupported operation: {op}"))),
        }
    }
}

#[async_trait]
impl Handler for ManualDispatcher {
    async fn handle(&self, request: Request) -> Response {
        let timer = Timer::new();
        let metrics = self.service.metrics();

        let Some(function) = self.card.function(&request.op) else {
            let latency = timer.elapsed_ms();
            metrics.record_request(&request.op, false, latency);

            return Response {
                ok: false,
                output: json!({
                    "error": "UnsupportedOperation",
                    "op": request.op,
                    "available_operations": self.card.functions.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
                }),
                latency_ms: latency,
            };
        };

        let input = if request.input.is_null() { json!({}) } else { request.input };
        let result = match &function.input_schema {
            Some(schema) => match validate_input(&input, schema) {
                Ok(()) => self.route(&request.op, input).await,
                Err(e) => Err(e),
            },
            None => self.route(&request.op, input).await,
        };

        let latency = timer.elapsed_ms();
        metrics.record_request(&request.op, result.is_ok(), latency);

        match result {
            Ok(output) => {
                debug!(op = %request.op, latency_ms = latency, "Request handled");
                Response {
                    ok: true,
                    output,
                    latency_ms: latency,
                }
            }
            Err(e) => {
                warn!(op = %request.op, error = %e, kind = e.kind(), "Request failed");
                Response {
                    ok: false,
                    output: json!({
                        "error": e.kind(),
                        "message": e.to_string(),
                    }),
                    latency_ms: latency,
                }
            }
        }
    }

    fn describe(&self) -> ServiceCard {
        self.card.clone()
    }
}

fn manual_view(manual: &Manual) -> Value {
    json!({
        "manual": manual.to_document(),
        "video": manual.video,
        "steps": manual.timeline.steps(),
    })
}

fn str_field<'a>(input: &'a Value, name: &str) -> Result<&'a str> {
    input[name]
        .as_str()
        .ok_or_else(|| ManualError::InvalidInput(format!("Missing {name}")))
}

fn opt_str_field(input: &Value, name: &str) -> Option<String> {
    input[name].as_str().map(str::to_string)
}

fn int_field(input: &Value, name: &str) -> Result<i64> {
    match &input[name] {
        Value::Null => Err(ManualError::InvalidInput(format!("Missing {name}"))),
        value => value
            .as_i64()
            .ok_or_else(|| ManualError::InvalidInput(format!("{name} must fit in a signed 64-bit integer"))),
    }
}

fn opt_index_field(input: &Value, name: &str) -> Result<Option<usize>> {
    match &input[name] {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| ManualError::InvalidInput(format!("{name} must be a non-negative integer"))),
    }
}

fn manual_id(input: &Value) -> Result<ManualId> {
    input["manual_id"]
        .as_u64()
        .map(ManualId)
        .ok_or_else(|| ManualError::InvalidInput("Missing manual_id".to_string()))
}

fn step_id(input: &Value) -> Result<StepId> {
    input["step_id"]
        .as_u64()
        .map(StepId)
        .ok_or_else(|| ManualError::InvalidInput("Missing step_id".to_string()))
}

fn time_field(input: &Value) -> Result<Timestamp> {
    Ok(Timestamp::parse(str_field(input, "time")?)?)
}

fn function(
    name: &str,
    description: &str,
    tags: &[&str],
    idempotent: bool,
    side_effects: &[&str],
    input_schema: Option<Value>,
) -> FunctionCard {
    FunctionCard {
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        idempotent,
        side_effects: side_effects.iter().map(|s| s.to_string()).collect(),
        input_schema,
    }
}

fn schema(properties: Value, required: &[&str]) -> Option<Value> {
    Some(json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

fn service_card() -> ServiceCard {
    let manual_id = json!({ "type": "integer", "minimum": 0, "description": "Manual id" });
    let step_id = json!({ "type": "integer", "minimum": 0, "description": "Step id" });
    let time = json!({ "type": "string", "description": "Timestamp as MM:SS" });

    ServiceCard {
        name: "manual_frames".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Timestamp-indexed frame extraction and step binding for video manuals".to_string(),
        tags: vec!["video".to_string(), "frames".to_string(), "ffmpeg".to_string(), "manuals".to_string()],
        functions: vec![
            function(
                "manual.create",
                "Attach an uploaded video to a new manual and populate its steps from analysis",
                &["manual", "upload", "analysis"],
                false,
                &["purges frame directory", "invokes analyzer"],
                schema(
                    json!({
                        "video": { "type": "string", "description": "Video file name in the uploads directory" },
                        "title": { "type": "string" }
                    }),
                    &["video"],
                ),
            ),
            function(
                "manual.get",
                "Return a manual document with its steps and bindings",
                &["manual"],
                true,
                &[],
                schema(json!({ "manual_id": manual_id }), &["manual_id"]),
            ),
            function(
                "manual.attach_video",
                "Replace a manual's video, purging frames and clearing every binding",
                &["manual", "upload"],
                false,
                &["purges frame directory", "invalidates cached frames"],
                schema(
                    json!({ "manual_id": manual_id, "video": { "type": "string" } }),
                    &["manual_id", "video"],
                ),
            ),
            function(
                "manual.markdown",
                "Render a manual as Markdown",
                &["manual", "export"],
                true,
                &[],
                schema(json!({ "manual_id": manual_id }), &["manual_id"]),
            ),
            function(
                "videos.list",
                "List uploaded videos",
                &["upload"],
                true,
                &["reads uploads directory"],
                None,
            ),
            function(
                "frame.generate",
                "Extract the exact frame at a timestamp of the manual's current video",
                &["frames", "extraction"],
                true,
                &["writes image file", "invokes ffmpeg"],
                schema(json!({ "manual_id": manual_id, "time": time }), &["manual_id", "time"]),
            ),
            function(
                "frame.candidates",
                "Extract candidate frames around a timestamp of the manual's current video",
                &["frames", "extraction"],
                true,
                &["writes image files", "invokes ffmpeg"],
                schema(json!({ "manual_id": manual_id, "time": time }), &["manual_id", "time"]),
            ),
            function(
                "step.candidates",
                "Extract candidates at a step's timestamp and auto-bind one if the step is unbound",
                &["steps", "frames"],
                false,
                &["writes image files", "invokes ffmpeg", "binds frame"],
                schema(json!({ "manual_id": manual_id, "step_id": step_id }), &["manual_id", "step_id"]),
            ),
            function(
                "step.set_timestamp",
                "Set a step's timestamp, clearing its bound frame",
                &["steps", "timeline"],
                false,
                &["clears binding"],
                schema(
                    json!({ "manual_id": manual_id, "step_id": step_id, "time": time }),
                    &["manual_id", "step_id", "time"],
                ),
            ),
            function(
                "step.shift",
                "Shift a step's timestamp by whole seconds, clamped to 00:00..59:59",
                &["steps", "timeline"],
                false,
                &["clears binding"],
                schema(
                    json!({ "manual_id": manual_id, "step_id": step_id, "delta": { "type": "integer" } }),
                    &["manual_id", "step_id", "delta"],
                ),
            ),
            function(
                "step.select_frame",
                "Bind an extracted frame, by URL, to a step",
                &["steps", "frames"],
                true,
                &["binds frame"],
                schema(
                    json!({ "manual_id": manual_id, "step_id": step_id, "url": { "type": "string" } }),
                    &["manual_id", "step_id", "url"],
                ),
            ),
            function(
                "step.edit",
                "Edit a step's headline or description",
                &["steps"],
                true,
                &[],
                schema(
                    json!({
                        "manual_id": manual_id,
                        "step_id": step_id,
                        "headline": { "type": "string" },
                        "description": { "type": "string" }
                    }),
                    &["manual_id", "step_id"],
                ),
            ),
            function(
                "step.insert",
                "Insert a new step, appending when no index is given",
                &["steps", "timeline"],
                false,
                &[],
                schema(
                    json!({
                        "manual_id": manual_id,
                        "index": { "type": "integer", "minimum": 0 },
                        "time": time,
                        "headline": { "type": "string" },
                        "description": { "type": "string" }
                    }),
                    &["manual_id", "time", "headline"],
                ),
            ),
            function(
                "step.remove",
                "Remove a step",
                &["steps", "timeline"],
                false,
                &[],
                schema(json!({ "manual_id": manual_id, "step_id": step_id }), &["manual_id", "step_id"]),
            ),
            function(
                "step.move",
                "Move a step to a new position",
                &["steps", "timeline"],
                false,
                &[],
                schema(
                    json!({
                        "manual_id": manual_id,
                        "step_id": step_id,
                        "index": { "type": "integer", "minimum": 0 }
                    }),
                    &["manual_id", "step_id", "index"],
                ),
            ),
            function(
                "service.capabilities",
                "Return the capability card with all available functions",
                &["metadata", "discovery"],
                true,
                &[],
                None,
            ),
            function("metrics", "Request, cache and tool counters", &["metadata"], true, &[], None),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_card() {
        let card = service_card();

        assert_eq!(card.name, "manual_frames");
        assert_eq!(card.functions.len(), 17);
        assert!(card.function("step.set_timestamp").is_some());
        assert!(card.function("frame.delete").is_none());

        let schema = card.function("frame.candidates").and_then(|f| f.input_schema.as_ref()).unwrap();
        assert_eq!(schema["required"], json!(["manual_id", "time"]));
    }

    #[test]
    fn test_field_helpers() {
        let input = json!({"manual_id": 4, "step_id": 2, "time": "01:05", "index": null, "delta": -3});

        assert_eq!(manual_id(&input).unwrap(), ManualId(4));
        assert_eq!(step_id(&input).unwrap(), StepId(2));
        assert_eq!(time_field(&input).unwrap().total_seconds(), 65);
        assert_eq!(opt_index_field(&input, "index").unwrap(), None);
        assert_eq!(int_field(&input, "delta").unwrap(), -3);

        let err = int_field(&json!({"delta": u64::MAX}), "delta").unwrap_err();
        assert!(err.to_string().contains("delta must fit in a signed 64-bit integer"));
        let err = int_field(&json!({}), "delta").unwrap_err();
        assert!(err.to_string().contains("Missing delta"));

        let err = time_field(&json!({"time": "1:05"})).unwrap_err();
        assert_eq!(err.kind(), "InvalidFormat");
    }
}
