// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Message assembly for one model: history conversion, alternation merging,
//! and the layered injector pipeline.
//!
//! Everything here is a pure transform over a message list. The injectors
//! run in a fixed order — ACE into the first user message, then todos,
//! children and budget into the last message, then the context token count
//! into the last user message, always last. Both the primary query path and
//! the condense-and-retry path call the same [`assemble_messages`], so a
//! retry can never skip an injector.

use quorum_actions::{TodoItem, TodoState};
use quorum_model::{approx_tokens, ChatMessage, ContentPart, MessageContent, Role};

use crate::history::{EntryType, HistoryEntry};
use crate::image::{self, Detected};
use crate::prompts;
use crate::state::{Lesson, ModelState};

/// Model-scoped context for one assembly pass.
#[derive(Debug, Clone, Default)]
pub struct AssemblyInputs {
    pub system_prompt: String,
    pub lessons: Vec<Lesson>,
    pub model_state: Option<ModelState>,
    pub todos: Vec<TodoItem>,
    pub children: Vec<String>,
    pub budget: Option<BudgetInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetInfo {
    pub spent_usd: f64,
    pub limit_usd: Option<f64>,
}

/// Build the full message list sent to one model.
pub fn assemble_messages(
    history_newest_first: &[HistoryEntry],
    inputs: &AssemblyInputs,
) -> Vec<ChatMessage> {
    let mut messages = history_to_messages(history_newest_first);
    messages = merge_consecutive_roles(messages);
    messages.insert(0, ChatMessage::system(&inputs.system_prompt));

    // Downstream APIs need the conversation to end on a user turn; an empty
    // or assistant-terminated history gets the standing decision request.
    if !matches!(messages.last().map(|m| m.role), Some(Role::User)) {
        messages.push(ChatMessage::user(prompts::NEXT_ACTION_PROMPT));
    }

    inject_ace(&mut messages, &inputs.lessons, inputs.model_state.as_ref());
    inject_todos(&mut messages, &inputs.todos);
    inject_children(&mut messages, &inputs.children);
    inject_budget(&mut messages, inputs.budget.as_ref());
    inject_context(&mut messages);
    messages
}

/// Convert newest-first history into chronological chat messages.
///
/// Decisions and assistant turns map to the assistant role; everything else
/// is user-visible context. Image entries become multimodal user messages
/// whose text part is just the timestamp — the payload travels as decoded
/// bytes, never as inline base64 text.
pub fn history_to_messages(history_newest_first: &[HistoryEntry]) -> Vec<ChatMessage> {
    history_newest_first
        .iter()
        .rev()
        .map(entry_to_message)
        .collect()
}

fn entry_to_message(entry: &HistoryEntry) -> ChatMessage {
    match entry.entry_type {
        EntryType::Assistant | EntryType::Decision => ChatMessage::assistant(text_of(entry)),
        EntryType::Image => {
            let timestamp = entry.timestamp.to_rfc3339();
            match image::detect(&entry.content) {
                Detected::Image { mime_type, data } => ChatMessage::user_with_parts(vec![
                    ContentPart::text(timestamp),
                    ContentPart::image(data, mime_type),
                ]),
                // The payload did not decode; fall back to the marker so the
                // turn is still visible.
                Detected::Text => ChatMessage::user(format!("{timestamp}\n[Image]")),
            }
        }
        _ => ChatMessage::user(text_of(entry)),
    }
}

fn text_of(entry: &HistoryEntry) -> String {
    match &entry.content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge consecutive same-role messages so the list strictly alternates.
pub fn merge_consecutive_roles(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        match out.last_mut() {
            Some(prev) if prev.role == msg.role => merge_into(prev, msg),
            _ => out.push(msg),
        }
    }
    out
}

fn merge_into(prev: &mut ChatMessage, next: ChatMessage) {
    match (&mut prev.content, next.content) {
        (MessageContent::Text(a), MessageContent::Text(b)) => {
            a.push_str("\n\n");
            a.push_str(&b);
        }
        (content, next_content) => {
            let mut parts = into_parts(std::mem::replace(
                content,
                MessageContent::Text(String::new()),
            ));
            parts.extend(into_parts(next_content));
            *content = MessageContent::Parts(parts);
        }
    }
}

fn into_parts(content: MessageContent) -> Vec<ContentPart> {
    match content {
        MessageContent::Text(t) => vec![ContentPart::text(t)],
        MessageContent::Parts(parts) => parts,
    }
}

/// Append a fenced block to one message, preserving multimodal parts.
fn append_block(msg: &mut ChatMessage, block: &str) {
    match &mut msg.content {
        MessageContent::Text(t) => {
            if !t.is_empty() {
                t.push_str("\n\n");
            }
            t.push_str(block);
        }
        MessageContent::Parts(parts) => parts.push(ContentPart::text(block)),
    }
}

/// ACE context into the **first user** message.
fn inject_ace(messages: &mut [ChatMessage], lessons: &[Lesson], state: Option<&ModelState>) {
    if lessons.is_empty() && state.is_none() {
        return;
    }
    let Some(first_user) = messages.iter_mut().find(|m| m.role == Role::User) else {
        return;
    };
    let mut block = String::new();
    if !lessons.is_empty() {
        block.push_str("<lessons>\n");
        for lesson in lessons {
            let kind = match lesson.lesson_type {
                crate::state::LessonType::Factual => "factual",
                crate::state::LessonType::Behavioral => "behavioral",
            };
            block.push_str(&format!(
                "- [{kind}, {:.2}] {}\n",
                lesson.confidence, lesson.content
            ));
        }
        block.push_str("</lessons>");
    }
    if let Some(state) = state {
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(&format!("<state>{}</state>", state.summary));
    }
    append_block(first_user, &block);
}

/// Todo list into the **last** message.
fn inject_todos(messages: &mut [ChatMessage], todos: &[TodoItem]) {
    if todos.is_empty() {
        return;
    }
    let Some(last) = messages.last_mut() else {
        return;
    };
    let mut block = String::from("<todos>\n");
    for todo in todos {
        let state = match todo.state {
            TodoState::Todo => "todo",
            TodoState::Pending => "pending",
            TodoState::Done => "done",
        };
        block.push_str(&format!("- [{state}] {}\n", todo.content));
    }
    block.push_str("</todos>");
    append_block(last, &block);
}

/// Child roster into the **last** message.
fn inject_children(messages: &mut [ChatMessage], children: &[String]) {
    if children.is_empty() {
        return;
    }
    let Some(last) = messages.last_mut() else {
        return;
    };
    let block = format!("<children>{}</children>", children.join(", "));
    append_block(last, &block);
}

/// Budget figures into the **last** message.
fn inject_budget(messages: &mut [ChatMessage], budget: Option<&BudgetInfo>) {
    let Some(budget) = budget else { return };
    let Some(last) = messages.last_mut() else {
        return;
    };
    let block = match budget.limit_usd {
        Some(limit) => format!(
            "<budget>spent ${:.4} of ${:.2}</budget>",
            budget.spent_usd, limit
        ),
        None => format!("<budget>spent ${:.4} (no limit)</budget>", budget.spent_usd),
    };
    append_block(last, &block);
}

/// Context token count into the **last user** message, always the final
/// injection so the count reflects everything else.
fn inject_context(messages: &mut [ChatMessage]) {
    let tokens = approx_tokens(messages);
    let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
        return;
    };
    append_block(last_user, &format!("<ctx>{tokens} tokens in context</ctx>"));
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
