// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::ActionError;

/// Read-only secret lookup used to resolve `{{SECRET:name}}` placeholders in
/// action params before dispatch.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Resolves secrets from process environment variables.
#[derive(Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed map of secrets, for tests.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.secrets.get(name).cloned()
    }
}

fn placeholder_re() -> Regex {
    // Compiled per call; params trees are small and resolution happens once
    // per dispatch.
    Regex::new(r"\{\{SECRET:([A-Za-z0-9_.-]+)\}\}").expect("static regex")
}

/// Replace every `{{SECRET:name}}` occurrence anywhere in the params tree.
/// Unknown secrets fail the whole resolution — dispatching an action with a
/// literal placeholder would leak the fact that the secret is missing to
/// whatever the action talks to.
pub fn resolve_placeholders(params: &Value, store: &dyn SecretStore) -> Result<Value, ActionError> {
    let re = placeholder_re();
    resolve_value(params, store, &re)
}

fn resolve_value(v: &Value, store: &dyn SecretStore, re: &Regex) -> Result<Value, ActionError> {
    match v {
        Value::String(s) => Ok(Value::String(resolve_str(s, store, re)?)),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|i| resolve_value(i, store, re))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, val) in map {
                out.insert(k.clone(), resolve_value(val, store, re)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_str(s: &str, store: &dyn SecretStore, re: &Regex) -> Result<String, ActionError> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = store
            .get(name)
            .ok_or_else(|| ActionError::UnknownSecret(name.to_string()))?;
        out.push_str(&s[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
