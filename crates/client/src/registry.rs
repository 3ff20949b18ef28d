// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::HordeError;
use crate::transport::HordeTransport;

/// Outcome of resolving a requested model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// the name is a registered model and the only candidate.
    Exact(String),
    /// the name was used as a pattern; possibly empty.
    Matched(Vec<String>),
}

impl Resolution {
    pub fn candidates(&self) -> &[String] {
        match self {
            Resolution::Exact(name) => std::slice::from_ref(name),
            Resolution::Matched(names) => names,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }

    pub fn into_candidates(self) -> Vec<String> {
        match self {
            Resolution::Exact(name) => vec![name],
            Resolution::Matched(names) => names,
        }
    }
}

/// Inventory of models currently served by workers.
///
/// The inventory is fetched on first use and then reused until
/// [`ModelRegistry::refresh`] is called; it never expires on its own.
/// Clones share the same cache.
#[derive(Clone)]
pub struct ModelRegistry {
    transport: Arc<dyn HordeTransport>,
    inner: Arc<RwLock<Vec<String>>>,
}

impl ModelRegistry {
    pub fn new(transport: Arc<dyn HordeTransport>) -> Self {
        Self {
            transport,
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Sorted, deduplicated model names.
    ///
    /// Serves the cache when it is populated. Otherwise queries the workers
    /// endpoint while holding the write lock, so concurrent first callers
    /// trigger a single request. A malformed reply leaves the cache empty
    /// and is reported as [`HordeError::RegistryUnavailable`].
    pub async fn list(&self) -> Result<Vec<String>, HordeError> {
        {
            let cached = self.inner.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }

        let mut cached = self.inner.write().await;
        if !cached.is_empty() {
            return Ok(cached.clone());
        }
        let models = self.fetch().await?;
        cached.clone_from(&models);
        Ok(models)
    }

    /// Re-query the inventory and replace the cache.
    ///
    /// On failure the previous inventory stays in place.
    pub async fn refresh(&self) -> Result<Vec<String>, HordeError> {
        let mut cached = self.inner.write().await;
        let models = self.fetch().await?;
        cached.clone_from(&models);
        Ok(models)
    }

    /// Current cache content without touching the network.
    pub async fn cached(&self) -> Vec<String> {
        self.inner.read().await.clone()
    }

    /// Models whose name matches `pattern`, in registry order.
    pub async fn match_pattern(&self, pattern: &str) -> Result<Vec<String>, HordeError> {
        let models = self.list().await?;
        Ok(match_models(pattern, &models))
    }

    /// A registered name resolves to itself; anything else is a pattern.
    pub async fn resolve(&self, requested: &str) -> Result<Resolution, HordeError> {
        let models = self.list().await?;
        if models.iter().any(|m| m == requested) {
            return Ok(Resolution::Exact(requested.to_string()));
        }
        Ok(Resolution::Matched(match_models(requested, &models)))
    }

    async fn fetch(&self) -> Result<Vec<String>, HordeError> {
        let workers = self.transport.workers().await.map_err(|e| {
            warn!("client::registry: worker inventory unavailable: {e}");
            if let Some(body) = e.body() {
                debug!("client::registry: raw workers response: {body}");
            }
            HordeError::RegistryUnavailable(e.to_string())
        })?;

        let models: BTreeSet<String> = workers
            .iter()
            .filter_map(|w| w.primary_model())
            .map(str::to_string)
            .collect();
        info!(
            "client::registry: {} worker(s) serving {} distinct model(s)",
            workers.len(),
            models.len()
        );
        Ok(models.into_iter().collect())
    }
}

/// Case-insensitive regex search of `pattern` over `models`.
///
/// An empty pattern selects every model. A pattern that is not a valid
/// regex is searched for literally.
pub fn match_models(pattern: &str, models: &[String]) -> Vec<String> {
    if pattern.is_empty() {
        return models.to_vec();
    }
    match compile(pattern) {
        Some(re) => models.iter().filter(|m| re.is_match(m)).cloned().collect(),
        None => Vec::new(),
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    let build = |p: &str| RegexBuilder::new(p).case_insensitive(true).build();
    build(pattern)
        .or_else(|e| {
            debug!("client::registry: {pattern:?} is not a valid regex ({e}); matching literally");
            build(&regex::escape(pattern))
        })
        .ok()
}
