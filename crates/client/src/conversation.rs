// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Flattening a conversation into a single prompt string.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::HordeError;
use crate::templates::{Role, Template, TemplateStore, COMPLETION};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Options that were in effect for an earlier exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOptions {
    /// model pattern the caller asked for, empty when none.
    #[serde(default)]
    pub pattern: String,
    /// model that produced the response.
    #[serde(default)]
    pub model: Option<String>,
    /// instruction family the prompt was rendered with.
    #[serde(default)]
    pub instruct: Option<String>,
}

/// One earlier prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    pub response: String,
    #[serde(default)]
    pub options: TurnOptions,
}

impl PriorTurn {
    /// turns without an instruction (or rendered as plain completion) are
    /// replayed without role markup.
    pub fn is_completion(&self) -> bool {
        self.prompt.is_empty() || self.options.instruct.as_deref() == Some(COMPLETION)
    }
}

/// Renders conversations through a shared template catalog.
#[derive(Debug, Clone)]
pub struct ConversationBuilder {
    templates: Arc<TemplateStore>,
}

impl ConversationBuilder {
    pub fn new(templates: Arc<TemplateStore>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// System prompt `family` falls back to when the caller gives none.
    pub fn default_system(&self, family: &str) -> Option<String> {
        self.templates
            .get(family)
            .and_then(|t| t.system_default.clone())
    }

    /// Render `prior` followed by `new_prompt` using `family`.
    ///
    /// When `system` is `None` the template's default system prompt, if any,
    /// is used for a conversation without history.
    pub fn render(
        &self,
        prior: &[PriorTurn],
        new_prompt: &str,
        system: Option<&str>,
        family: &str,
    ) -> Result<String, HordeError> {
        let template = self
            .templates
            .get(family)
            .ok_or_else(|| HordeError::UnknownFamily(family.to_string()))?;

        if new_prompt.is_empty() || family == COMPLETION {
            return Ok(render_raw(prior, new_prompt));
        }

        let system = system.or(template.system_default.as_deref());
        let messages = build_messages(prior, new_prompt, system);
        Ok(render_messages(&messages, template))
    }
}

/// Raw concatenation of every prompt and response, then `new_prompt`.
pub fn render_raw(prior: &[PriorTurn], new_prompt: &str) -> String {
    let mut out = String::new();
    for turn in prior {
        out.push_str(&turn.prompt);
        out.push_str(&turn.response);
    }
    out.push_str(new_prompt);
    out
}

/// Role-tagged messages for an instruct-style rendering.
///
/// The system message comes from the first earlier turn, or from `system`
/// when there is no history. The list always ends with the new user message
/// and an empty assistant message.
pub fn build_messages(prior: &[PriorTurn], new_prompt: &str, system: Option<&str>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(prior.len() * 2 + 3);

    let system = match prior.first() {
        Some(first) => first.system.as_deref(),
        None => system,
    };
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(Message::new(Role::System, system));
    }

    for turn in prior {
        if turn.is_completion() {
            if !turn.prompt.is_empty() {
                messages.push(Message::new(Role::Completion, turn.prompt.as_str()));
            }
            messages.push(Message::new(Role::Completion, turn.response.as_str()));
        } else {
            messages.push(Message::new(Role::User, turn.prompt.as_str()));
            messages.push(Message::new(Role::Assistant, turn.response.as_str()));
        }
    }

    messages.push(Message::new(Role::User, new_prompt));
    messages.push(Message::new(Role::Assistant, ""));
    messages
}

/// Concatenate `messages` rendered through `template`.
///
/// A trailing empty assistant message renders only the part of the
/// assistant format before its placeholder.
pub fn render_messages(messages: &[Message], template: &Template) -> String {
    let mut out = String::new();
    let last = messages.len().saturating_sub(1);
    for (i, message) in messages.iter().enumerate() {
        if i == last && message.role == Role::Assistant && message.content.is_empty() {
            out.push_str(template.render_open(Role::Assistant));
        } else {
            out.push_str(&template.render(message.role, &message.content));
        }
    }
    out
}

/// Character budget for the prompt given the context window, the number
/// of tokens reserved for the reply and a characters/token ratio.
pub fn char_budget(max_context_length: u32, max_length: u32, chars_per_token: u32) -> usize {
    max_context_length.saturating_sub(max_length) as usize * chars_per_token as usize
}

/// Middle-out truncation to at most `max_chars` characters.
///
/// The head ends at the last whitespace at or before `max_chars / 2`; the
/// tail fills the remaining budget and starts on a whitespace. Without a
/// whitespace in range the cut is made at the exact position.
pub fn truncate(prompt: &str, max_chars: usize) -> String {
    let chars: Vec<char> = prompt.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return prompt.to_string();
    }

    let half = max_chars / 2;
    let head_end = (0..=half)
        .rev()
        .find(|&i| chars[i].is_whitespace())
        .unwrap_or(half);

    let tail_min = total - (max_chars - head_end);
    let tail_start = (tail_min..total)
        .find(|&i| chars[i].is_whitespace())
        .unwrap_or(tail_min);

    chars[..head_end]
        .iter()
        .chain(chars[tail_start..].iter())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ConversationBuilder {
        ConversationBuilder::new(Arc::new(TemplateStore::builtin().unwrap()))
    }

    fn turn(prompt: &str, response: &str) -> PriorTurn {
        PriorTurn {
            prompt: prompt.to_string(),
            system: None,
            response: response.to_string(),
            options: TurnOptions::default(),
        }
    }

    #[test]
    fn completion_family_is_plain_concatenation() {
        let prior = vec![turn("Once upon", " a time"), turn("", " there was")];
        let text = builder()
            .render(&prior, " a dragon", Some("ignored system"), COMPLETION)
            .unwrap();
        assert_eq!(text, "Once upon a time there was a dragon");
    }

    #[test]
    fn empty_prompt_degenerates_to_concatenation() {
        let prior = vec![turn("Tell a story", "It began at dawn.")];
        let text = builder().render(&prior, "", None, "alpaca").unwrap();
        assert_eq!(text, "Tell a storyIt began at dawn.");
    }

    #[test]
    fn fresh_conversation_has_system_user_and_open_assistant() {
        let text = builder()
            .render(&[], "What is 2+2?", Some("Be brief."), "vicuna")
            .unwrap();
        assert_eq!(text, "Be brief.\n\nUSER: What is 2+2?\nASSISTANT: ");
    }

    #[test]
    fn template_default_system_applies_without_caller_system() {
        let text = builder().render(&[], "hi", None, "synthia").unwrap();
        assert!(text.starts_with("SYSTEM: Elaborate on the topic"));
        assert!(text.ends_with("USER: hi\nASSISTANT: "));
    }

    #[test]
    fn no_system_segment_when_template_has_no_default() {
        let messages = build_messages(&[], "hi", None);
        assert_eq!(
            messages,
            vec![Message::new(Role::User, "hi"), Message::new(Role::Assistant, "")]
        );
        let text = builder().render(&[], "hi", None, "chatml").unwrap();
        assert_eq!(
            text,
            "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn history_uses_first_turn_system_prompt() {
        let mut first = turn("Name a colour", "Blue.");
        first.system = Some("Answer in one word.".into());
        let mut second = turn("Another", "Green.");
        second.system = Some("different".into());

        let messages = build_messages(&[first, second], "One more", Some("current"));
        assert_eq!(messages[0], Message::new(Role::System, "Answer in one word."));
        assert_eq!(messages.len(), 1 + 4 + 2);
        assert!(messages.iter().all(|m| m.content != "current" && m.content != "different"));
    }

    #[test]
    fn history_renders_in_order_through_template() {
        let prior = vec![turn("Hello", "Hi there!")];
        let text = builder().render(&prior, "How are you?", None, "metharme").unwrap();
        assert_eq!(
            text,
            "<|user|>Hello<|model|>Hi there!<|user|>How are you?<|model|>"
        );
    }

    #[test]
    fn completion_turns_inside_instruct_history_stay_raw() {
        let mut raw = turn("", "The quick brown fox");
        raw.options.instruct = Some(COMPLETION.into());
        let mut raw_with_prompt = turn("Lorem", " ipsum");
        raw_with_prompt.options.instruct = Some(COMPLETION.into());
        let prior = vec![raw, raw_with_prompt, turn("Summarise", "A fox.")];

        let messages = build_messages(&prior, "Thanks", None);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::Completion,
                Role::Completion,
                Role::Completion,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
            ]
        );

        let text = builder().render(&prior, "Thanks", Some("sys"), "mistral").unwrap();
        assert_eq!(
            text,
            "The quick brown foxLorem ipsum[INST] Summarise [/INST]A fox.</s>[INST] Thanks [/INST]"
        );
    }

    #[test]
    fn unknown_family_is_an_error() {
        assert!(matches!(
            builder().render(&[], "hi", None, "nonexistent"),
            Err(HordeError::UnknownFamily(_))
        ));
    }

    fn is_prefix_plus_suffix(original: &str, out: &str) -> bool {
        out.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(out.len()))
            .any(|i| original.starts_with(&out[..i]) && original.ends_with(&out[i..]))
    }

    #[test]
    fn short_prompt_is_unchanged() {
        assert_eq!(truncate("short prompt", 12), "short prompt");
        assert_eq!(truncate("short prompt", 100), "short prompt");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn long_prompt_keeps_head_and_tail_at_word_boundaries() {
        let prompt = "system rules first then lots of old middle history here and the latest question";
        let out = truncate(prompt, 40);
        assert!(out.chars().count() <= 40);
        assert!(is_prefix_plus_suffix(prompt, &out));
        // the head stops before a space and the tail starts on one
        assert_eq!(out, "system rules first the latest question");
    }

    #[test]
    fn truncation_length_and_shape_hold_across_budgets() {
        let prompt = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron";
        for n in 0..prompt.len() {
            let out = truncate(prompt, n);
            assert!(out.chars().count() <= n, "budget {n}: {out:?}");
            assert!(is_prefix_plus_suffix(prompt, &out), "budget {n}: {out:?}");
            assert_eq!(truncate(&out, n), out, "budget {n} not idempotent");
        }
    }

    #[test]
    fn truncation_without_whitespace_cuts_exactly() {
        let prompt = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(truncate(prompt, 10), "abcdevwxyz");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let prompt = "héllo wörld ünïcode façade naïve résumé";
        let out = truncate(prompt, 20);
        assert!(out.chars().count() <= 20);
        assert!(is_prefix_plus_suffix(prompt, &out));
    }

    #[test]
    fn budget_reserves_reply_tokens() {
        assert_eq!(char_budget(1024, 120, 4), 3616);
        assert_eq!(char_budget(100, 200, 4), 0);
    }
}
