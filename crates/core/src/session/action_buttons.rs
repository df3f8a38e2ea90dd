// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Follow-up suggestion ("action button") extraction (§4.4).
//!
//! Run after every `prompt_complete`, on the agent's final assistant
//! message. The core carries no LLM client of its own, so this is a small
//! heuristic classifier rather than a second model call — grounded in the
//! same closure-injection shape the teacher uses for its prompt-option
//! parsing (`OptionParser`): a `Fn(&str) -> Vec<ActionButton>` supplied at
//! construction, with a default heuristic implementation shipped.

use serde::{Deserialize, Serialize};

/// A follow-up suggestion offered to the user after a response. Not part
/// of the event log (§4.4: "These are *not* appended to the event log").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub label: String,
    pub response_text: String,
}

/// Injectable classifier: `Fn(&str) -> Vec<ActionButton>`.
pub type ActionButtonClassifier = Box<dyn Fn(&str) -> Vec<ActionButton> + Send + Sync>;

const MAX_BUTTONS: usize = 4;

/// Default heuristic: look for a numbered list of options in the agent's
/// own closing text, or a trailing "would you like me to ALSO ..."
/// question, and turn either into clickable follow-ups.
pub fn default_classifier(text: &str) -> Vec<ActionButton> {
    let numbered = numbered_list_options(text);
    if !numbered.is_empty() {
        return numbered;
    }
    offer_also_question(text).into_iter().collect()
}

fn numbered_list_options(text: &str) -> Vec<ActionButton> {
    let mut buttons = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let Some(rest) = strip_numbered_prefix(trimmed) else { continue };
        if rest.is_empty() {
            continue;
        }
        buttons.push(ActionButton { label: truncate(rest, 40), response_text: rest.to_owned() });
        if buttons.len() == MAX_BUTTONS {
            break;
        }
    }
    buttons
}

/// Strips a `"1. "`, `"1) "`, or `"- "` list marker, returning the rest of
/// the line when present.
fn strip_numbered_prefix(line: &str) -> Option<&str> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let marker = line.as_bytes().get(digits_end)?;
    if *marker != b'.' && *marker != b')' {
        return None;
    }
    Some(line[digits_end + 1..].trim_start())
}

fn offer_also_question(text: &str) -> Option<ActionButton> {
    let lower = text.to_lowercase();
    let trigger = lower.rfind("would you like me to")?;
    let sentence = text[trigger..].split(['.', '\n']).next()?.trim();
    if sentence.is_empty() {
        return None;
    }
    Some(ActionButton { label: "Yes, please".to_owned(), response_text: "Yes, please.".to_owned() })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
#[path = "action_buttons_tests.rs"]
mod tests;
