// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
pub mod consensus;
mod cost;
mod env;
mod error;
pub mod events;
mod format;
mod handle;
pub mod history;
mod image;
pub mod inject;
pub mod prompts;
mod reflect;
mod registry;
mod router;
mod state;
pub mod stringify;
mod supervisor;
#[cfg(test)]
mod tests;

pub use consensus::{
    parse_decision, tally_votes, ActionResponse, ConsensusOutcome, DecisionType, WaitDirective,
    SELF_CONTAINED_ACTIONS,
};
pub use cost::CostAccumulator;
pub use env::Env;
pub use error::CoreError;
pub use events::{Event, LogMetadata, SentMessages};
pub use format::{
    format_action_result, format_agent_message, format_system_event, format_timeout,
    format_unknown, MAX_FORMATTED_LEN,
};
pub use handle::{AgentHandle, AgentMsg, AgentReply, AgentRequest, MonitorRef};
pub use history::{
    add_history_entry, add_history_entry_with_action, find_last_decision, find_result_for_action,
    rekey_model_histories, EntryType, HistoryEntry, ModelHistories, DEFAULT_HISTORY_KEY,
};
pub use image::Detected;
pub use registry::{AgentMeta, Registry, RegistryEntry};
pub use router::{RouterHandle, RouterMsg};
pub use state::{
    AgentState, AgentStatus, Child, Lesson, LessonType, ModelState, PendingAction,
    PendingActionInfo, QueuedMessage, StateSnapshot, TimerInfo,
};
pub use supervisor::Supervisor;
