// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Submit/poll lifecycle of a generation job.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use config::{HordeConfig, SelectionPolicy};
use protocol::{Generation, GenerationParams, JobStatus, SubmitRequest};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, info, warn};

use crate::conversation::{char_budget, truncate, ConversationBuilder, PriorTurn, TurnOptions};
use crate::error::HordeError;
use crate::model::{GenerateOptions, HordeModel};
use crate::registry::ModelRegistry;
use crate::templates::{classify, TemplateStore};
use crate::transport::{HordeTransport, HttpTransport};

/// Text of the single generation returned when a job could not be submitted.
pub const ERROR_MARKER: &str = "Error";

/// Lifecycle of a job as seen by the client. Jobs start `Unsubmitted`
/// and end in one of the last four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unsubmitted,
    Submitted,
    Polling,
    Completed,
    TimedOut,
    Faulted,
    SubmissionFailed,
}

/// A job accepted by the service.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub submitted_at: SystemTime,
    pub models: Vec<String>,
    pub params: GenerationParams,
    pub state: JobState,
}

/// Generations of a finished job plus the kudos it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub generations: Vec<Generation>,
    pub kudos: f64,
    /// set on the synthetic result of a failed submission.
    #[serde(default)]
    pub failed: bool,
}

impl GenerationResult {
    pub fn submission_failed() -> Self {
        Self {
            generations: vec![Generation {
                text: ERROR_MARKER.to_string(),
                model: String::new(),
                worker_id: None,
                worker_name: None,
            }],
            kudos: 0.0,
            failed: true,
        }
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.generations.iter().map(|g| g.text.as_str())
    }
}

impl From<JobStatus> for GenerationResult {
    fn from(status: JobStatus) -> Self {
        Self {
            generations: status.generations,
            kudos: status.kudos,
            failed: false,
        }
    }
}

/// Timing, sizing and selection settings of a [`JobClient`].
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub max_context_length: u32,
    pub max_length: u32,
    pub chars_per_token: u32,
    pub selection: SelectionPolicy,
}

impl From<&HordeConfig> for JobSettings {
    fn from(cfg: &HordeConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            max_wait: cfg.max_wait(),
            max_context_length: cfg.max_context_length,
            max_length: cfg.max_length,
            chars_per_token: cfg.chars_per_token,
            selection: cfg.selection,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&HordeConfig::default())
    }
}

/// Everything needed for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: HordeModel,
    pub prompt: String,
    pub system: Option<String>,
    pub history: Vec<PriorTurn>,
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(model: HordeModel, prompt: impl Into<String>) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            system: None,
            history: Vec::new(),
            options: GenerateOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// `horde/<model>` of the worker model that answered, or the requested
    /// model id when nothing was generated.
    pub model_id: String,
    /// instruction family the prompt was rendered with.
    pub instruct: String,
    /// system prompt of this turn: the caller's, else the family default.
    pub system: Option<String>,
    /// prompt text as submitted, after truncation.
    pub prompt_text: String,
    pub job_id: Option<String>,
    /// `Completed`, or `SubmissionFailed` for the synthetic error result.
    pub state: JobState,
    pub result: GenerationResult,
}

impl GenerateResponse {
    pub fn text(&self) -> String {
        self.result.texts().collect()
    }

    /// Record this exchange so that it can be replayed as history.
    pub fn to_turn(&self, request: &GenerateRequest) -> PriorTurn {
        PriorTurn {
            prompt: request.prompt.clone(),
            system: self.system.clone(),
            response: self.text(),
            options: TurnOptions {
                pattern: request.options.pattern.clone(),
                model: self
                    .result
                    .generations
                    .first()
                    .map(|g| g.model.clone())
                    .filter(|m| !m.is_empty()),
                instruct: Some(self.instruct.clone()),
            },
        }
    }
}

/// Client for the text generation job lifecycle.
///
/// Cloning is cheap; clones share the transport, the model cache and the
/// template catalog.
#[derive(Clone)]
pub struct JobClient {
    transport: Arc<dyn HordeTransport>,
    registry: ModelRegistry,
    conversation: ConversationBuilder,
    settings: JobSettings,
}

impl JobClient {
    pub fn new(
        transport: Arc<dyn HordeTransport>,
        registry: ModelRegistry,
        conversation: ConversationBuilder,
        settings: JobSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            conversation,
            settings,
        }
    }

    /// Wire up an http client from configuration.
    pub fn from_config(cfg: &HordeConfig, apikey: &str) -> Result<Self> {
        let transport: Arc<dyn HordeTransport> = Arc::new(
            HttpTransport::new(&cfg.base_url, apikey, cfg.client_agent.as_str())
                .context("failed to build http transport")?,
        );
        let templates = match &cfg.templates {
            Some(path) => TemplateStore::from_file(path)?,
            None => TemplateStore::builtin()?,
        };
        let registry = ModelRegistry::new(transport.clone());
        let conversation = ConversationBuilder::new(Arc::new(templates));
        Ok(Self::new(transport, registry, conversation, JobSettings::from(cfg)))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &TemplateStore {
        self.conversation.templates()
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Resolve models, render the conversation, submit and wait.
    ///
    /// A rejected submission yields a result holding one [`ERROR_MARKER`]
    /// generation. Option, model resolution and deadline failures are
    /// returned as errors; nothing is submitted when resolution fails.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, HordeError> {
        request.options.validate()?;
        let params = request
            .options
            .params(self.settings.max_context_length, self.settings.max_length);
        let budget = char_budget(
            params.max_context_length,
            params.max_length,
            self.settings.chars_per_token,
        );
        if budget == 0 {
            return Err(HordeError::InvalidOption {
                name: "max_tokens",
                reason: format!(
                    "{} leaves no room for a prompt in a context of {}",
                    params.max_length, params.max_context_length
                ),
            });
        }

        let models = self.resolve_models(request).await?;
        let selected = self.select_model(&models, &request.history);
        let family = classify(&request.options.instruct, selected).to_string();
        debug!(
            "client::job: candidates={:?} selected={} instruct={}",
            models, selected, family
        );

        let system = request
            .system
            .clone()
            .or_else(|| self.conversation.default_system(&family));
        let rendered = self.conversation.render(
            &request.history,
            &request.prompt,
            system.as_deref(),
            &family,
        )?;

        let prompt_text = if rendered.chars().count() > budget {
            info!(
                "client::job: prompt of {} chars exceeds budget of {}; truncating",
                rendered.chars().count(),
                budget
            );
            truncate(&rendered, budget)
        } else {
            rendered
        };
        debug!("client::job: full prompt:\n{prompt_text}");

        let mut handle = match self.submit(&prompt_text, models, params).await {
            Ok(handle) => handle,
            Err(HordeError::SubmissionFailed { .. }) => {
                return Ok(GenerateResponse {
                    model_id: request.model.model_id.clone(),
                    instruct: family,
                    system,
                    prompt_text,
                    job_id: None,
                    state: JobState::SubmissionFailed,
                    result: GenerationResult::submission_failed(),
                });
            }
            Err(e) => return Err(e),
        };

        let result = self
            .poll(&mut handle, self.settings.poll_interval, self.settings.max_wait)
            .await?;
        debug!("client::job: response {:?}", result);

        let model_id = result
            .generations
            .first()
            .filter(|g| !g.model.is_empty())
            .map_or_else(
                || request.model.model_id.clone(),
                |g| HordeModel::for_model(&g.model).model_id,
            );

        Ok(GenerateResponse {
            model_id,
            instruct: family,
            system,
            prompt_text,
            job_id: Some(handle.id),
            state: handle.state,
            result,
        })
    }

    /// Submit a job. Exactly one request is made and it is never retried.
    pub async fn submit(
        &self,
        prompt: &str,
        models: Vec<String>,
        params: GenerationParams,
    ) -> Result<JobHandle, HordeError> {
        let request = SubmitRequest {
            prompt: prompt.to_string(),
            params,
            models,
        };

        let reason = match self.transport.submit(&request).await {
            Ok(reply) => match reply.id.filter(|id| !id.is_empty()) {
                Some(id) => {
                    info!(
                        "client::job: submitted job {} for {} model(s)",
                        id,
                        request.models.len()
                    );
                    return Ok(JobHandle {
                        id,
                        submitted_at: SystemTime::now(),
                        models: request.models,
                        params: request.params,
                        state: JobState::Submitted,
                    });
                }
                None => {
                    warn!(
                        "client::job: submission rejected: rc={:?} message={:?}",
                        reply.rc, reply.message
                    );
                    reply
                        .message
                        .unwrap_or_else(|| "response carries no job id".to_string())
                }
            },
            Err(e) => {
                warn!(
                    "client::job: submission failed: {e}; raw response: {}",
                    e.body().unwrap_or("<none>")
                );
                e.to_string()
            }
        };
        Err(HordeError::SubmissionFailed { reason })
    }

    /// Wait for `handle` to finish, checking every `interval` until
    /// `max_wait` has elapsed.
    ///
    /// Failed status checks are logged and retried on the next tick. The
    /// server-side job is not cancelled on timeout.
    pub async fn poll(
        &self,
        handle: &mut JobHandle,
        interval: Duration,
        max_wait: Duration,
    ) -> Result<GenerationResult, HordeError> {
        handle.state = JobState::Polling;
        let outcome = time::timeout(max_wait, self.poll_until_done(&handle.id, interval)).await;

        match outcome {
            Ok(Ok(result)) => {
                handle.state = JobState::Completed;
                info!(
                    "client::job: job {} completed with {} generation(s), kudos={}",
                    handle.id,
                    result.generations.len(),
                    result.kudos
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                handle.state = JobState::Faulted;
                warn!("client::job: job {} failed: {e}", handle.id);
                Err(e)
            }
            Err(_) => {
                handle.state = JobState::TimedOut;
                warn!(
                    "client::job: job {} still pending after {:?}; giving up",
                    handle.id, max_wait
                );
                Err(HordeError::JobTimedOut {
                    id: handle.id.clone(),
                    waited: max_wait,
                })
            }
        }
    }

    async fn poll_until_done(&self, id: &str, interval: Duration) -> Result<GenerationResult, HordeError> {
        loop {
            time::sleep(interval).await;
            match self.transport.status(id).await {
                Ok(status) if status.faulted => {
                    return Err(HordeError::JobFaulted { id: id.to_string() });
                }
                Ok(status) if status.done => return Ok(status.into()),
                Ok(status) => debug!(
                    "client::job: job {} pending, queue_position={:?} wait_time={:?}",
                    id, status.queue_position, status.wait_time
                ),
                Err(e) => warn!("client::job: status check for job {} failed: {e}", id),
            }
        }
    }

    /// Candidate worker models for `request`.
    async fn resolve_models(&self, request: &GenerateRequest) -> Result<Vec<String>, HordeError> {
        if !request.model.is_generic() {
            return Ok(vec![request.model.model_name.clone()]);
        }

        let pattern = effective_pattern(&request.options.pattern, &request.history);
        let resolution = self.registry.resolve(pattern).await?;
        if resolution.is_empty() {
            if self.registry.cached().await.is_empty() {
                warn!("client::job: no worker models are currently served");
                return Err(HordeError::RegistryUnavailable(
                    "no worker models are currently served".to_string(),
                ));
            }
            warn!("client::job: model matching {:?} not found", pattern);
            return Err(HordeError::NoModelMatch {
                pattern: pattern.to_string(),
            });
        }
        Ok(resolution.into_candidates())
    }

    /// Model whose name drives template classification.
    ///
    /// Sticks to the model of the previous turn while it is still a
    /// candidate; otherwise applies the selection policy.
    fn select_model<'a>(&self, candidates: &'a [String], history: &[PriorTurn]) -> &'a str {
        let previous = history.last().and_then(|t| t.options.model.as_deref());
        if let Some(kept) = previous.and_then(|p| candidates.iter().find(|c| c.as_str() == p)) {
            return kept;
        }
        let index = match self.settings.selection {
            SelectionPolicy::First => 0,
            SelectionPolicy::Random => wall_clock_index(candidates.len()),
        };
        candidates.get(index).map_or("", String::as_str)
    }
}

/// The caller's pattern, or the latest non-empty one from the history.
fn effective_pattern<'a>(pattern: &'a str, history: &'a [PriorTurn]) -> &'a str {
    if !pattern.is_empty() {
        return pattern;
    }
    history
        .iter()
        .rev()
        .map(|t| t.options.pattern.as_str())
        .find(|p| !p.is_empty())
        .unwrap_or("")
}

fn wall_clock_index(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as usize)
        .unwrap_or(0);
    nanos % len
}
