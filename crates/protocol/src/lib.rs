// SPDX-License-Identifier: PolyForm-Shield-1.0

use serde::{Deserialize, Serialize};

/// api key used when the caller has none; the service accepts it with
/// reduced queue priority.
pub const ANON_APIKEY: &str = "0000000000";

/// sampling and length parameters attached to a text generation job.
///
/// `max_context_length` and `max_length` are always sent. the sampling
/// fields are omitted from the wire payload when unset so that the
/// service applies the worker defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_context_length: u32,
    pub max_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_context_length: 1024,
            max_length: 120,
            temperature: None,
            top_k: None,
            top_p: None,
        }
    }
}

/// body of `POST /generate/text/async`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    pub params: GenerationParams,
    /// models the job may be scheduled on. an empty list lets the
    /// service pick any worker.
    pub models: Vec<String>,
}

/// reply to a submission. the service answers with `{id}` on success and
/// with an error-shaped body (`message`, `rc`) otherwise, so every field
/// is optional here and callers must check `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kudos: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub rc: Option<String>,
}

/// a single finished generation as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

/// reply of `GET /generate/text/status/{id}`.
///
/// `generations` and `kudos` are only meaningful once `done` is true.
/// the queue fields are informational and only used for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default)]
    pub generations: Vec<Generation>,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default)]
    pub queue_position: Option<u64>,
    #[serde(default)]
    pub wait_time: Option<u64>,
}

/// one entry of `GET /workers?type=text`.
///
/// workers may advertise several models; the first one is treated as
/// the worker's primary model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

impl WorkerEntry {
    pub fn primary_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }
}
