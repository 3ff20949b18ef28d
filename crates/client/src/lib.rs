// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Client for the AI Horde text generation service.
//!
//! - [`ModelRegistry`] caches the worker model inventory and resolves
//!   exact names or patterns to candidate models.
//! - [`TemplateStore`] holds the instruction templates and guesses a
//!   model's instruction family from its name.
//! - [`ConversationBuilder`] flattens prior turns plus the new prompt into
//!   one prompt string.
//! - [`JobClient`] ties them together: submit, poll, return.

pub mod conversation;
pub mod error;
pub mod job;
pub mod model;
pub mod registry;
pub mod templates;
pub mod transport;

#[cfg(test)]
mod testing;

pub use conversation::{ConversationBuilder, Message, PriorTurn, TurnOptions};
pub use error::{HordeError, TransportError};
pub use job::{
    GenerateRequest, GenerateResponse, GenerationResult, JobClient, JobHandle, JobSettings,
    JobState, ERROR_MARKER,
};
pub use model::{discover_models, GenerateOptions, HordeModel, MODEL_PREFIX};
pub use registry::{match_models, ModelRegistry, Resolution};
pub use templates::{classify, Role, Template, TemplateStore};
pub use transport::{HordeTransport, HttpTransport};
