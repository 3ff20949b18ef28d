// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Instruction templates.
//!
//! A template is four format strings, one per message role, each holding a
//! single placeholder where the message content goes. `{content}` works for
//! every role; `{system}`, `{prompt}` and `{response}` are accepted as
//! aliases for the system, user/completion and assistant roles.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mode that asks [`classify`] to guess the family from the model name.
pub const AUTO: &str = "auto";
/// Family without role markup; messages are concatenated verbatim.
pub const COMPLETION: &str = "completion";
/// Family used when no keyword matches the model name.
pub const DEFAULT_FAMILY: &str = "alpaca";

const BUILTIN_CATALOG: &str = include_str!("../templates/templates.json");

/// Keyword to family associations checked in order; the first keyword found
/// in the lowercased model name decides. Several keywords can occur in one
/// name (`pygmalionai/mythalion-13b`), so the order is significant.
pub const FAMILY_KEYWORDS: &[(&str, &str)] = &[
    ("mythomax", "alpaca"),
    ("mythalion", "alpaca"),
    ("tiefighter", "alpaca"),
    ("psyfighter", "alpaca"),
    ("synthia", "synthia"),
    ("wizardlm", "vicuna"),
    ("xwin", "vicuna"),
    ("vicuna", "vicuna"),
    ("pygmalion", "metharme"),
    ("metharme", "metharme"),
    ("openhermes", "chatml"),
    ("dolphin", "chatml"),
    ("chatml", "chatml"),
    ("mixtral", "mistral"),
    ("mistral", "mistral"),
    ("alpaca", "alpaca"),
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("template {family:?} has no placeholder in its {role} format")]
    MissingPlaceholder { family: String, role: Role },

    #[error("template catalog has no {0:?} family")]
    MissingFamily(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Completion,
}

impl Role {
    const ALL: [Role; 4] = [Role::System, Role::User, Role::Assistant, Role::Completion];

    fn alias(self) -> &'static str {
        match self {
            Role::System => "{system}",
            Role::User | Role::Completion => "{prompt}",
            Role::Assistant => "{response}",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub system: String,
    pub user: String,
    pub assistant: String,
    #[serde(default = "content_only")]
    pub completion: String,
    /// system prompt used when the caller gives none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_default: Option<String>,
}

fn content_only() -> String {
    "{content}".to_string()
}

impl Template {
    pub fn format(&self, role: Role) -> &str {
        match role {
            Role::System => &self.system,
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
            Role::Completion => &self.completion,
        }
    }

    /// Substitute `content` into the format string for `role`.
    ///
    /// Only the first placeholder is replaced, so placeholder-looking text
    /// inside `content` is left untouched.
    pub fn render(&self, role: Role, content: &str) -> String {
        let format = self.format(role);
        match placeholder(format, role) {
            Some((start, len)) => {
                let mut out = String::with_capacity(format.len() + content.len());
                out.push_str(&format[..start]);
                out.push_str(content);
                out.push_str(&format[start + len..]);
                out
            }
            None => format!("{format}{content}"),
        }
    }

    /// The part of the `role` format that precedes its placeholder.
    ///
    /// Used for the trailing assistant turn: the prompt ends right where
    /// the model is expected to continue.
    pub fn render_open(&self, role: Role) -> &str {
        let format = self.format(role);
        match placeholder(format, role) {
            Some((start, _)) => &format[..start],
            None => format,
        }
    }

    fn validate(&self, family: &str) -> Result<(), TemplateError> {
        for role in Role::ALL {
            if placeholder(self.format(role), role).is_none() {
                return Err(TemplateError::MissingPlaceholder {
                    family: family.to_string(),
                    role,
                });
            }
        }
        Ok(())
    }
}

/// byte offset and length of the earliest placeholder usable for `role`.
fn placeholder(format: &str, role: Role) -> Option<(usize, usize)> {
    ["{content}", role.alias()]
        .iter()
        .filter_map(|token| format.find(token).map(|pos| (pos, token.len())))
        .min_by_key(|(pos, _)| *pos)
}

/// Immutable catalog of instruction templates keyed by family name.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: BTreeMap<String, Template>,
}

impl TemplateStore {
    /// Catalog compiled into the crate.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(data: &str) -> Result<Self, TemplateError> {
        let templates: BTreeMap<String, Template> = serde_json::from_str(data)?;
        for (family, template) in &templates {
            template.validate(family)?;
        }
        if !templates.contains_key(COMPLETION) {
            return Err(TemplateError::MissingFamily(COMPLETION));
        }
        if !templates.contains_key(DEFAULT_FAMILY) {
            return Err(TemplateError::MissingFamily(DEFAULT_FAMILY));
        }
        Ok(Self { templates })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn templates(&self) -> &BTreeMap<String, Template> {
        &self.templates
    }

    pub fn get(&self, family: &str) -> Option<&Template> {
        self.templates.get(family)
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

/// Pick the instruction family for `model_name`.
///
/// An explicit `mode` is returned as is. For [`AUTO`] the first entry of
/// [`FAMILY_KEYWORDS`] contained in the model name wins, falling back to
/// [`DEFAULT_FAMILY`].
pub fn classify<'a>(mode: &'a str, model_name: &str) -> &'a str {
    if mode != AUTO {
        return mode;
    }
    let name = model_name.to_lowercase();
    FAMILY_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map_or(DEFAULT_FAMILY, |&(_, family)| family)
}
