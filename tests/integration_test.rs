// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Workspace smoke test: boot the whole runtime from a default config and
//! drive the root agent through a full consensus cycle on the test pool.

use std::time::Duration;

use quorum_config::{AgentConfig, Config};
use quorum_core::{
    events::topics, AgentMsg, AgentReply, AgentRequest, Env, Event, Supervisor,
};

#[tokio::test]
async fn runtime_boots_and_root_agent_reaches_a_decision() {
    let env = Env::new(Config::default()).unwrap();
    let mut lifecycle = env.bus.subscribe(topics::LIFECYCLE);
    let mut logs = env.bus.subscribe(&topics::logs("root"));
    let supervisor = Supervisor::new(env.clone());

    let root = supervisor
        .start_agent(AgentConfig::for_test("root"))
        .unwrap();
    assert!(matches!(
        lifecycle.recv().await.unwrap(),
        Event::AgentSpawned { agent_id, .. } if agent_id == "root"
    ));

    root.send(AgentMsg::UserMessage {
        content: serde_json::json!("hello runtime"),
    });

    // The default pool is the deterministic mock, which always decides to
    // wait; one cycle must run and leave a decision in history.
    let mut decided = false;
    for _ in 0..200 {
        if let AgentReply::Histories(h) =
            root.request(AgentRequest::GetModelHistories).await.unwrap()
        {
            if h["default"]
                .iter()
                .any(|e| e.entry_type == quorum_core::EntryType::Decision)
            {
                decided = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(decided, "root agent never reached a decision");

    // The cycle broadcast what it sent to the model.
    let event = logs.recv().await.unwrap();
    assert!(matches!(event, Event::LogEntry { metadata }
        if metadata.sent_messages[0].model_id == "default"));

    supervisor.terminate_agent("root").await.unwrap();
    assert!(!env.registry.contains("root"));
}
