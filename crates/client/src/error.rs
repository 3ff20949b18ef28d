// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::time::Duration;

use thiserror::Error;

/// Failures of a single http exchange with the service.
///
/// The transport never panics or raises on bad payloads; every outcome is
/// one of these variants so the registry and job client can decide how to
/// recover.
#[derive(Debug, Error)]
pub enum TransportError {
    /// connection, tls or timeout failure before a body was read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// the configured base url cannot be joined with an endpoint path.
    #[error("invalid service url: {0}")]
    Url(#[from] url::ParseError),

    /// the service answered, but not with the expected structure.
    #[error("unexpected response (status {status}): {reason}")]
    Malformed {
        status: u16,
        reason: String,
        body: String,
    },
}

impl TransportError {
    /// raw response body when one was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            TransportError::Malformed { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Errors surfaced by [`crate::JobClient`] and the registry.
///
/// `generate` never returns `SubmissionFailed`; it recovers it into a
/// synthetic error generation. Only the lower level `submit` reports it.
#[derive(Debug, Error)]
pub enum HordeError {
    #[error("job submission failed: {reason}")]
    SubmissionFailed { reason: String },

    #[error("model registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("no model matching {pattern:?} is available")]
    NoModelMatch { pattern: String },

    #[error("job {id} did not finish within {waited:?}")]
    JobTimedOut { id: String, waited: Duration },

    #[error("job {id} faulted on the service side")]
    JobFaulted { id: String },

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("unknown instruction family {0:?}")]
    UnknownFamily(String),

    #[error(transparent)]
    Template(#[from] crate::templates::TemplateError),
}
