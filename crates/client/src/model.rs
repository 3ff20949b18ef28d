// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::fmt;

use protocol::GenerationParams;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HordeError;
use crate::registry::ModelRegistry;
use crate::templates::AUTO;

/// id of the model entry that selects workers by pattern.
pub const MODEL_PREFIX: &str = "horde";

/// A model as exposed to the host.
///
/// `model_id` is what the host shows and looks up (`horde/<name>`), while
/// `model_name` is the worker model name sent to the service. The generic
/// entry has both set to [`MODEL_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HordeModel {
    pub model_id: String,
    pub model_name: String,
}

impl HordeModel {
    pub fn generic() -> Self {
        Self {
            model_id: MODEL_PREFIX.to_string(),
            model_name: MODEL_PREFIX.to_string(),
        }
    }

    pub fn for_model(name: &str) -> Self {
        Self {
            model_id: format!("{MODEL_PREFIX}/{name}"),
            model_name: name.to_string(),
        }
    }

    /// Inverse of `model_id`: `horde` is the generic entry, `horde/<name>`
    /// and bare names select a specific worker model.
    pub fn from_id(model_id: &str) -> Self {
        if model_id == MODEL_PREFIX {
            return Self::generic();
        }
        let name = model_id
            .strip_prefix(MODEL_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(model_id);
        Self::for_model(name)
    }

    pub fn is_generic(&self) -> bool {
        self.model_id == MODEL_PREFIX
    }
}

impl fmt::Display for HordeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AI Horde: {}", self.model_id)
    }
}

/// One entry per model currently served, followed by the generic entry.
///
/// An unreachable registry is logged and only the generic entry is
/// returned, so the host can still offer pattern-based generation.
pub async fn discover_models(registry: &ModelRegistry) -> Vec<HordeModel> {
    let mut models = match registry.list().await {
        Ok(names) => names.iter().map(|n| HordeModel::for_model(n)).collect(),
        Err(e) => {
            warn!("client::model: model discovery failed: {e}");
            Vec::new()
        }
    };
    models.push(HordeModel::generic());
    models
}

/// Caller-facing generation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// reply length in tokens (16..=512); the configured default when unset.
    pub max_tokens: Option<u32>,
    /// 0..=5
    pub temperature: Option<f32>,
    /// 0..=100
    pub top_k: Option<u32>,
    /// 0.001..=1
    pub top_p: Option<f32>,
    /// model pattern for the generic entry.
    pub pattern: String,
    /// instruction family, or `auto`.
    pub instruct: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            top_k: None,
            top_p: None,
            pattern: String::new(),
            instruct: AUTO.to_string(),
        }
    }
}

fn out_of_range(name: &'static str, value: impl fmt::Display, range: &str) -> HordeError {
    HordeError::InvalidOption {
        name,
        reason: format!("{value} is outside {range}"),
    }
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<(), HordeError> {
        if let Some(v) = self.max_tokens {
            if !(16..=512).contains(&v) {
                return Err(out_of_range("max_tokens", v, "16..=512"));
            }
        }
        if let Some(v) = self.temperature {
            if !(0.0..=5.0).contains(&v) {
                return Err(out_of_range("temperature", v, "0..=5"));
            }
        }
        if let Some(v) = self.top_k {
            if v > 100 {
                return Err(out_of_range("top_k", v, "0..=100"));
            }
        }
        if let Some(v) = self.top_p {
            if !(0.001..=1.0).contains(&v) {
                return Err(out_of_range("top_p", v, "0.001..=1"));
            }
        }
        Ok(())
    }

    /// Wire parameters with defaults filled in. Zero sampling values count
    /// as unset and are left to the worker.
    pub fn params(&self, max_context_length: u32, default_max_length: u32) -> GenerationParams {
        GenerationParams {
            max_context_length,
            max_length: self.max_tokens.unwrap_or(default_max_length),
            temperature: self.temperature.filter(|v| *v != 0.0),
            top_k: self.top_k.filter(|v| *v != 0),
            top_p: self.top_p.filter(|v| *v != 0.0),
        }
    }
}
