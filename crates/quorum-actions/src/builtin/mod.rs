// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod batch_sync;
mod file_read;
mod orient;
mod send_message;
mod shell;
mod spawn_agent;
mod todo_write;
mod web_fetch;

pub use batch_sync::BatchSyncAction;
pub use file_read::FileReadAction;
pub use orient::OrientAction;
pub use send_message::SendMessageAction;
pub use shell::ShellAction;
pub use spawn_agent::SpawnAgentAction;
pub use todo_write::TodoWriteAction;
pub use web_fetch::WebFetchAction;

use crate::ActionRegistry;

/// Registry with the full builtin handler set.
pub fn builtin_registry() -> ActionRegistry {
    let mut reg = ActionRegistry::new();
    reg.register(ShellAction);
    reg.register(FileReadAction);
    reg.register(WebFetchAction);
    reg.register(TodoWriteAction);
    reg.register(SendMessageAction);
    reg.register(SpawnAgentAction);
    reg.register(BatchSyncAction);
    reg.register(OrientAction);
    reg
}
