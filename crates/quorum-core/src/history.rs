// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Divergent per-model conversation history.
//!
//! Every model in the pool keeps its own history list (newest first).
//! Appends broadcast the same entry — with one shared timestamp — to every
//! key, so the lists stay aligned until condensation makes them diverge;
//! after that, each model's view is condensed independently and both views
//! remain valid.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// History key created when an append hits an empty map, so messages are
/// never silently dropped before the pool is configured.
pub const DEFAULT_HISTORY_KEY: &str = "default";

pub type ModelHistories = HashMap<String, Vec<HistoryEntry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Prompt,
    Event,
    User,
    Assistant,
    Decision,
    Result,
    Message,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

impl HistoryEntry {
    pub fn new(entry_type: EntryType, content: Value) -> Self {
        Self {
            entry_type,
            content,
            timestamp: Utc::now(),
            action_id: None,
            result: None,
            action_type: None,
        }
    }
}

/// Append one entry (shared timestamp) to every model's history.
pub fn add_history_entry(histories: &mut ModelHistories, entry_type: EntryType, content: Value) {
    let entry = HistoryEntry::new(entry_type, content);
    broadcast(histories, entry);
}

/// Append an action-linked entry to every model's history. `content` is the
/// JSON-safe wrapped representation; the raw result and its identifiers ride
/// in dedicated fields so lookups don't have to parse the wrapper.
pub fn add_history_entry_with_action(
    histories: &mut ModelHistories,
    entry_type: EntryType,
    content: Value,
    action_id: &str,
    result: Value,
    action_type: &str,
) {
    let mut entry = HistoryEntry::new(entry_type, content);
    entry.action_id = Some(action_id.to_string());
    entry.result = Some(result);
    entry.action_type = Some(action_type.to_string());
    broadcast(histories, entry);
}

fn broadcast(histories: &mut ModelHistories, entry: HistoryEntry) {
    if histories.is_empty() {
        histories.insert(DEFAULT_HISTORY_KEY.to_string(), Vec::new());
    }
    for list in histories.values_mut() {
        list.insert(0, entry.clone());
    }
}

/// Most recent `decision` entry in one model's history.
pub fn find_last_decision<'a>(
    histories: &'a ModelHistories,
    model_id: &str,
) -> Option<&'a HistoryEntry> {
    histories
        .get(model_id)?
        .iter()
        .find(|e| e.entry_type == EntryType::Decision)
}

/// The result entry for a given action in one model's history.
pub fn find_result_for_action<'a>(
    histories: &'a ModelHistories,
    model_id: &str,
    action_id: &str,
) -> Option<&'a HistoryEntry> {
    histories
        .get(model_id)?
        .iter()
        .find(|e| e.action_id.as_deref() == Some(action_id))
}

/// Build a fresh history map keyed by `new_pool`, every key sharing the same
/// history. Used when the pool changes at runtime.
pub fn rekey_model_histories(new_pool: &[String], history: &[HistoryEntry]) -> ModelHistories {
    new_pool
        .iter()
        .map(|id| (id.clone(), history.to_vec()))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn histories(keys: &[&str]) -> ModelHistories {
        keys.iter().map(|k| (k.to_string(), Vec::new())).collect()
    }

    #[test]
    fn append_broadcasts_to_every_key_with_one_timestamp() {
        let mut h = histories(&["m1", "m2", "m3"]);
        add_history_entry(&mut h, EntryType::Event, json!("hello"));
        let stamps: Vec<_> = h.values().map(|l| l[0].timestamp).collect();
        assert!(h.values().all(|l| l.len() == 1));
        assert!(stamps.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn append_to_empty_map_creates_default_key() {
        let mut h = ModelHistories::new();
        add_history_entry(&mut h, EntryType::User, json!("first"));
        assert_eq!(h.len(), 1);
        assert_eq!(h[DEFAULT_HISTORY_KEY].len(), 1);
        assert_eq!(h[DEFAULT_HISTORY_KEY][0].content, json!("first"));
    }

    #[test]
    fn entries_are_newest_first() {
        let mut h = histories(&["m1"]);
        add_history_entry(&mut h, EntryType::Event, json!("older"));
        add_history_entry(&mut h, EntryType::Event, json!("newer"));
        assert_eq!(h["m1"][0].content, json!("newer"));
        assert_eq!(h["m1"][1].content, json!("older"));
    }

    #[test]
    fn action_entry_records_separate_fields() {
        let mut h = histories(&["m1"]);
        add_history_entry_with_action(
            &mut h,
            EntryType::Result,
            json!("<action_result>…</action_result>"),
            "act-1",
            json!({"exit_code": 0}),
            "shell",
        );
        let e = &h["m1"][0];
        assert_eq!(e.action_id.as_deref(), Some("act-1"));
        assert_eq!(e.action_type.as_deref(), Some("shell"));
        assert_eq!(e.result, Some(json!({"exit_code": 0})));
    }

    #[test]
    fn find_last_decision_scans_newest_first() {
        let mut h = histories(&["m1"]);
        add_history_entry(&mut h, EntryType::Decision, json!({"action": "old"}));
        add_history_entry(&mut h, EntryType::Event, json!("noise"));
        add_history_entry(&mut h, EntryType::Decision, json!({"action": "new"}));
        let d = find_last_decision(&h, "m1").unwrap();
        assert_eq!(d.content["action"], "new");
    }

    #[test]
    fn finders_return_none_for_unknown_model() {
        let h = histories(&["m1"]);
        assert!(find_last_decision(&h, "nope").is_none());
        assert!(find_result_for_action(&h, "nope", "a").is_none());
    }

    #[test]
    fn find_result_for_action_matches_id() {
        let mut h = histories(&["m1"]);
        add_history_entry_with_action(
            &mut h,
            EntryType::Result,
            json!("wrapped"),
            "act-7",
            json!("out"),
            "file_read",
        );
        assert!(find_result_for_action(&h, "m1", "act-7").is_some());
        assert!(find_result_for_action(&h, "m1", "act-8").is_none());
    }

    #[test]
    fn rekey_replaces_keys_and_shares_history() {
        let mut h = histories(&["old"]);
        add_history_entry(&mut h, EntryType::Event, json!("kept"));
        let shared = h["old"].clone();
        let pool = vec!["a".to_string(), "b".to_string()];
        let rekeyed = rekey_model_histories(&pool, &shared);
        assert_eq!(rekeyed.len(), 2);
        assert_eq!(rekeyed["a"], shared);
        assert_eq!(rekeyed["b"], shared);
    }

    #[test]
    fn rekey_empty_pool_is_empty_map() {
        let rekeyed = rekey_model_histories(&[], &[HistoryEntry::new(EntryType::User, json!(1))]);
        assert!(rekeyed.is_empty());
    }

    #[test]
    fn rekey_empty_history_gives_empty_lists() {
        let pool = vec!["a".to_string()];
        let rekeyed = rekey_model_histories(&pool, &[]);
        assert!(rekeyed["a"].is_empty());
    }

    #[test]
    fn entry_serializes_with_type_field() {
        let e = HistoryEntry::new(EntryType::Image, json!({"data": "…"}));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "image");
        assert!(v.get("action_id").is_none());
    }
}
