// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The reflector: one tool-free model call that distills a history into
//! `{lessons, state}` for condensation.
//!
//! Reflection is best-effort. A model or parse failure yields an empty
//! reflection — condensation still proceeds with the truncated prefix, it
//! just carries no lessons forward.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use quorum_model::{ChatRequest, ChatMessage, ModelProvider, Usage};

use crate::history::{EntryType, HistoryEntry};
use crate::prompts::REFLECTION_PROMPT;
use crate::state::{Lesson, LessonType, ModelState};
use crate::stringify::stringify;

#[derive(Debug, Default, Clone)]
pub struct Reflection {
    pub lessons: Vec<Lesson>,
    pub state: Option<ModelState>,
}

/// Run the reflector over one model's history (newest first).
pub async fn reflect(provider: &dyn ModelProvider, history: &[HistoryEntry]) -> (Reflection, Usage) {
    let transcript = transcript(history);
    let req = ChatRequest {
        messages: vec![ChatMessage::user(format!(
            "{REFLECTION_PROMPT}\n\n---\n\n{transcript}"
        ))],
        ..Default::default()
    };

    match provider.complete(req).await {
        Ok(completion) => {
            let reflection = parse_reflection(&completion.text).unwrap_or_else(|| {
                warn!(model = provider.id(), "reflection did not parse; condensing without lessons");
                Reflection::default()
            });
            debug!(
                model = provider.id(),
                lessons = reflection.lessons.len(),
                "reflection complete"
            );
            (reflection, completion.usage)
        }
        Err(e) => {
            warn!(model = provider.id(), "reflection call failed: {e}");
            (Reflection::default(), Usage::default())
        }
    }
}

/// Render history as a chronological `role: content` transcript. Content is
/// stringified — text verbatim, images as `[Image]` markers — so reflection
/// never ships image payloads.
fn transcript(history_newest_first: &[HistoryEntry]) -> String {
    history_newest_first
        .iter()
        .rev()
        .map(|e| format!("{}: {}", role_of(e), stringify(&e.content)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_of(entry: &HistoryEntry) -> &'static str {
    match entry.entry_type {
        EntryType::Assistant | EntryType::Decision => "assistant",
        _ => "user",
    }
}

fn parse_reflection(text: &str) -> Option<Reflection> {
    let value = extract_json(text)?;
    let lessons = value
        .get("lessons")
        .and_then(|l| l.as_array())
        .map(|items| items.iter().filter_map(parse_lesson).collect())
        .unwrap_or_default();
    let state = value
        .get("state")
        .and_then(|s| s.as_array())
        .and_then(|items| items.first())
        .and_then(|first| first.get("summary"))
        .and_then(|s| s.as_str())
        .map(|summary| ModelState {
            summary: summary.to_string(),
            updated_at: Utc::now(),
        });
    Some(Reflection { lessons, state })
}

fn parse_lesson(item: &Value) -> Option<Lesson> {
    let content = item.get("content")?.as_str()?.to_string();
    let lesson_type = match item.get("type").and_then(|t| t.as_str()) {
        Some("behavioral") => LessonType::Behavioral,
        _ => LessonType::Factual,
    };
    let confidence = item
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    Some(Lesson {
        lesson_type,
        content,
        confidence,
    })
}

/// Pull the first JSON object out of a model response, tolerating markdown
/// fences and surrounding prose.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    // Strip ```json fences.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced {
        if let Ok(v) = serde_json::from_str::<Value>(inner) {
            return Some(v);
        }
    }
    // Last resort: widest brace-delimited slice.
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use quorum_model::{ModelError, ScriptedMockProvider};

    fn history() -> Vec<HistoryEntry> {
        let mut h = crate::history::ModelHistories::new();
        h.insert("m1".to_string(), Vec::new());
        crate::history::add_history_entry(&mut h, EntryType::User, json!("fix the build"));
        crate::history::add_history_entry(&mut h, EntryType::Decision, json!({"action": "shell"}));
        h.remove("m1").unwrap()
    }

    #[tokio::test]
    async fn reflection_parses_lessons_and_state() {
        let provider = ScriptedMockProvider::always(
            "m1",
            r#"{"lessons":[{"type":"factual","content":"tests live in crates/","confidence":0.8},
                           {"type":"behavioral","content":"run fmt before committing","confidence":0.6}],
                "state":[{"summary":"fixing the build, linker error remains"}]}"#,
        );
        let (reflection, usage) = reflect(&provider, &history()).await;
        assert_eq!(reflection.lessons.len(), 2);
        assert_eq!(reflection.lessons[0].lesson_type, LessonType::Factual);
        assert_eq!(reflection.lessons[1].lesson_type, LessonType::Behavioral);
        assert!(reflection.state.unwrap().summary.contains("linker error"));
        assert!(usage.output_tokens > 0);
    }

    #[tokio::test]
    async fn unparseable_reflection_is_empty_not_fatal() {
        let provider = ScriptedMockProvider::always("m1", "I cannot help with that.");
        let (reflection, _) = reflect(&provider, &history()).await;
        assert!(reflection.lessons.is_empty());
        assert!(reflection.state.is_none());
    }

    #[tokio::test]
    async fn model_failure_is_empty_not_fatal() {
        let provider = ScriptedMockProvider::new(
            "m1",
            vec![Err(ModelError::Timeout)],
        );
        let (reflection, usage) = reflect(&provider, &history()).await;
        assert!(reflection.lessons.is_empty());
        assert_eq!(usage.output_tokens, 0);
    }

    #[tokio::test]
    async fn transcript_is_chronological_and_stringified() {
        let provider = ScriptedMockProvider::always("m1", "{}");
        let _ = reflect(&provider, &history()).await;
        let req = provider.last_request().unwrap();
        let sent = req.messages[0].content.text();
        let user_pos = sent.find("user: fix the build").unwrap();
        let asst_pos = sent.find("assistant:").unwrap();
        assert!(user_pos < asst_pos);
    }

    #[test]
    fn extract_json_handles_fences_and_prose() {
        assert!(extract_json(r#"{"a":1}"#).is_some());
        assert!(extract_json("```json\n{\"a\":1}\n```").is_some());
        assert!(extract_json("Sure! Here you go: {\"a\": 1} Hope that helps.").is_some());
        assert!(extract_json("no json at all").is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let l = parse_lesson(&json!({"content": "x", "confidence": 7.0})).unwrap();
        assert_eq!(l.confidence, 1.0);
    }
}
