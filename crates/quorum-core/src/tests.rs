// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios driving a real agent actor against scripted model
//! providers: mailbox discipline, consensus cycles, routers, condensation.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use quorum_actions::{ActionOutcome, StaticSecretStore, TodoState};
use quorum_config::AgentConfig;
use quorum_model::{ModelError, ProviderPool, Role, ScriptedMockProvider};

use crate::consensus::ActionResponse;
use crate::events::{topics, Event};
use crate::handle::{AgentHandle, AgentMsg, AgentReply, AgentRequest};
use crate::history::{EntryType, ModelHistories};
use crate::state::StateSnapshot;
use crate::supervisor::Supervisor;
use crate::Env;

// ─── Harness ─────────────────────────────────────────────────────────────────

fn env_with(providers: &[Arc<ScriptedMockProvider>]) -> Env {
    let mut env = Env::for_test();
    let mut pool = ProviderPool::new();
    for p in providers {
        pool.insert(Arc::clone(p) as Arc<dyn quorum_model::ModelProvider>);
    }
    env.providers = pool;
    env
}

fn config(agent_id: &str, pool: &[&str]) -> AgentConfig {
    let mut config = AgentConfig::for_test(agent_id);
    config.model_pool = Some(pool.iter().map(|s| s.to_string()).collect());
    config
}

fn decision(action: &str, params: Value) -> String {
    json!({"action": action, "params": params, "reasoning": "scripted", "wait": false})
        .to_string()
}

fn decision_with(action: &str, params: Value, wait: Value, auto_complete_todo: bool) -> String {
    json!({
        "action": action, "params": params, "reasoning": "scripted",
        "wait": wait, "auto_complete_todo": auto_complete_todo,
    })
    .to_string()
}

async fn snapshot(handle: &AgentHandle) -> StateSnapshot {
    match handle.request(AgentRequest::GetState).await.unwrap() {
        AgentReply::State(s) => *s,
        other => panic!("unexpected reply: {other:?}"),
    }
}

async fn histories(handle: &AgentHandle) -> ModelHistories {
    match handle.request(AgentRequest::GetModelHistories).await.unwrap() {
        AgentReply::Histories(h) => h,
        other => panic!("unexpected reply: {other:?}"),
    }
}

/// Poll the agent until `pred` holds, failing after ~2s.
async fn wait_for<F>(handle: &AgentHandle, pred: F) -> StateSnapshot
where
    F: Fn(&StateSnapshot) -> bool,
{
    for _ in 0..200 {
        let snap = snapshot(handle).await;
        if pred(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn all_text(messages: &[quorum_model::ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.text())
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── S1: todo observability ──────────────────────────────────────────────────

#[tokio::test]
async fn s1_todos_are_visible_to_models_and_auto_complete() {
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![
            Ok(decision(
                "todo_write",
                json!({"todos": [
                    {"content": "Write tests", "state": "todo"},
                    {"content": "Deploy", "state": "done"},
                ]}),
            )),
            Ok(decision_with("orient", json!({}), json!(false), true)),
        ],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let mut logs = env.bus.subscribe(&topics::logs("s1"));
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s1", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage {
        content: json!("get to work"),
    });

    // The auto_complete_todo action marks the first open todo done.
    let snap = wait_for(&handle, |s| {
        s.todos.first().map(|t| t.state == TodoState::Done).unwrap_or(false)
    })
    .await;
    assert_eq!(snap.todos[0].content, "Write tests");
    assert_eq!(snap.todos[1].state, TodoState::Done);

    // Some cycle after the todo_write result must have broadcast the todo
    // list exactly as the models saw it.
    let mut saw_todos = false;
    while let Ok(event) = logs.try_recv() {
        if let Event::LogEntry { metadata } = event {
            let text = all_text(&metadata.sent_messages[0].messages);
            if text.contains("<todos>")
                && text.contains("[todo] Write tests")
                && text.contains("[done] Deploy")
            {
                saw_todos = true;
            }
        }
    }
    assert!(saw_todos, "no sent-messages broadcast contained the todo list");
}

// ─── S2: image round-trip ────────────────────────────────────────────────────

#[tokio::test]
async fn s2_image_result_round_trips_without_base64_text() {
    let b64 = base64::engine::general_purpose::STANDARD.encode(b"fake png bytes");
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![]));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s2", &["m1"])).unwrap();

    handle
        .request(AgentRequest::AddPendingAction {
            action_id: "img-1".into(),
            action_type: "web_fetch".into(),
            params: json!({}),
            acked: true,
        })
        .await
        .unwrap();
    handle.send(AgentMsg::ActionResult {
        outcome: ActionOutcome::ok(
            "img-1",
            json!({"result": {"type": "image", "data": b64, "mimeType": "image/png"}}),
        ),
    });

    wait_for(&handle, |s| s.pending_actions.is_empty() && !s.consensus_scheduled).await;

    let h = histories(&handle).await;
    let images: Vec<_> = h["m1"]
        .iter()
        .filter(|e| e.entry_type == EntryType::Image)
        .collect();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].action_id.as_deref(), Some("img-1"));

    // The consensus cycle after the result saw a multimodal user message:
    // a timestamp text part plus raw image bytes, and no base64 in text.
    let req = m1.last_request().expect("consensus ran after the result");
    let image_msg = req
        .messages
        .iter()
        .find(|m| m.content.has_images())
        .expect("multimodal message sent to model");
    assert_eq!(image_msg.role, Role::User);
    match &image_msg.content {
        quorum_model::MessageContent::Parts(parts) => {
            assert!(matches!(&parts[0], quorum_model::ContentPart::Text { .. }));
            assert!(matches!(&parts[1], quorum_model::ContentPart::Image { data, mime_type }
                if data == b"fake png bytes" && mime_type == "image/png"));
        }
        other => panic!("expected parts, got {other:?}"),
    }
    for m in &req.messages {
        assert!(!m.content.text().contains(&b64), "base64 leaked into text");
    }
}

// ─── S3: spawn race ──────────────────────────────────────────────────────────

#[tokio::test]
async fn s3_spawn_result_precedes_first_child_message() {
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![Ok(decision_with(
            "spawn_agent",
            json!({"agent_id": "child-s3", "persist": false}),
            json!(true),
            false,
        ))],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s3", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage {
        content: json!("spawn a worker"),
    });
    wait_for(&handle, |s| s.children.contains(&"child-s3".to_string())).await;

    // The child replies "immediately" — after the spawn result is already
    // in the mailbox, as it must be: the child cannot speak before it
    // exists.
    handle.send(AgentMsg::AgentMessage {
        from: "child-s3".into(),
        content: json!("reporting in"),
    });

    // Poll until both entries landed.
    let mut entries = Vec::new();
    for _ in 0..200 {
        entries = histories(&handle).await.remove("m1").unwrap_or_default();
        let have_result = entries.iter().any(|e| e.entry_type == EntryType::Result);
        let have_event = entries
            .iter()
            .any(|e| e.content.as_str().map(|s| s.contains("reporting in")).unwrap_or(false));
        if have_result && have_event {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result_idx = entries
        .iter()
        .position(|e| e.entry_type == EntryType::Result && e.action_type.as_deref() == Some("spawn_agent"))
        .expect("spawn result recorded");
    let event_idx = entries
        .iter()
        .position(|e| {
            e.entry_type == EntryType::Event
                && e.content.as_str().map(|s| s.contains("reporting in")).unwrap_or(false)
        })
        .expect("child message recorded");
    // Newest-first: the later entry has the smaller index.
    assert!(
        event_idx < result_idx,
        "child message (idx {event_idx}) must be integrated after the spawn result (idx {result_idx})"
    );
}

// ─── S4: stale timer and stale trigger ───────────────────────────────────────

#[tokio::test]
async fn s4_external_message_cancels_timer_and_stale_trigger_is_dropped() {
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![
            Ok(decision_with("wait", json!({}), json!(60_000), false)),
            Ok(decision_with("wait", json!({}), json!(true), false)),
        ],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s4", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("start") });
    wait_for(&handle, |s| s.wait_timer.is_some()).await;
    assert_eq!(m1.request_count(), 1);

    // External message cancels T1 and schedules one (and only one) cycle.
    handle.send(AgentMsg::AgentMessage {
        from: "peer".into(),
        content: json!("news"),
    });
    // A gratuitous trigger right behind it must not buy a second cycle.
    handle.send(AgentMsg::TriggerConsensus);

    let snap = wait_for(&handle, |s| s.wait_timer.is_none() && !s.consensus_scheduled).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(m1.request_count(), 2, "stale trigger must not run a cycle");
    assert!(snap.pending_actions.is_empty());
}

#[tokio::test]
async fn stale_trigger_on_idle_agent_mutates_nothing() {
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![]));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("idle", &["m1"])).unwrap();

    let before = snapshot(&handle).await;
    handle.send(AgentMsg::TriggerConsensus);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = snapshot(&handle).await;

    assert_eq!(m1.request_count(), 0, "stale trigger ran a consensus cycle");
    assert_eq!(
        serde_json::to_value(&before).unwrap(),
        serde_json::to_value(&after).unwrap()
    );
}

// ─── S5: batch routing with secret resolution ────────────────────────────────

#[tokio::test]
async fn s5_batch_sync_routes_secrets_results_and_telemetry() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"the secret payload").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![Ok(decision(
            "batch_sync",
            json!({"actions": [
                {"action": "todo_write", "params": {"todos": [{"content": "track work"}]}},
                {"action": "file_read", "params": {"path": "{{SECRET:DATA_PATH}}"}},
            ]}),
        ))],
    ));
    let mut env = env_with(&[Arc::clone(&m1)]);
    env.secrets = Arc::new(StaticSecretStore::new().with("DATA_PATH", &path));
    let mut actions_rx = env.bus.subscribe(topics::ACTIONS);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s5", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("run the batch") });
    wait_for(&handle, |s| !s.todos.is_empty() && s.pending_actions.is_empty()).await;

    // One result entry per sub-action, each carrying its derived id.
    let h = histories(&handle).await;
    let results: Vec<_> = h["m1"]
        .iter()
        .filter(|e| e.entry_type == EntryType::Result)
        .collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|e| e.action_id.as_deref().unwrap().ends_with(":0")));
    let file_result = results
        .iter()
        .find(|e| e.action_id.as_deref().unwrap().ends_with(":1"))
        .expect("file_read sub-result");
    assert!(
        file_result.result.as_ref().unwrap()["content"]
            .as_str()
            .unwrap()
            .contains("the secret payload"),
        "secret path resolved and file content returned"
    );

    // Telemetry pairs for both sub-actions.
    let mut started = Vec::new();
    let mut completed = Vec::new();
    while let Ok(event) = actions_rx.try_recv() {
        match event {
            Event::ActionStarted { action_type } => started.push(action_type),
            Event::ActionCompleted { action_type, .. } => completed.push(action_type),
            _ => {}
        }
    }
    for sub in ["todo_write", "file_read"] {
        assert!(started.iter().any(|a| a == sub), "missing start for {sub}");
        assert!(completed.iter().any(|a| a == sub), "missing stop for {sub}");
    }
}

// ─── S6: condense-and-retry ──────────────────────────────────────────────────

#[tokio::test]
async fn s6_retry_after_condensation_runs_every_injector() {
    let reflection = json!({
        "lessons": [
            {"type": "factual", "content": "the build uses make", "confidence": 0.9},
            {"type": "behavioral", "content": "check logs before retrying", "confidence": 0.6},
        ],
        "state": [{"summary": "mid-task, context was condensed"}],
    })
    .to_string();

    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![
            Ok(decision(
                "spawn_agent",
                json!({"agent_id": "c6", "persist": false}),
            )),
            Ok(decision(
                "todo_write",
                json!({"todos": [{"content": "Write tests"}]}),
            )),
            Err(ModelError::ContextLengthExceeded { limit: Some(1000) }),
            Ok(reflection),
            Ok(decision_with("wait", json!({}), json!(true), false)),
        ],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("s6", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("carry on") });
    wait_for(&handle, |s| {
        !s.todos.is_empty() && s.children.contains(&"c6".to_string()) && s.pending_actions.is_empty()
    })
    .await;
    // Five completions: two cycles, then overflow + reflection + retry.
    for _ in 0..100 {
        if m1.request_count() >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(m1.request_count(), 5);

    let requests = m1.requests.lock().unwrap();
    let retry = requests.last().unwrap();
    let text = all_text(&retry.messages);
    assert!(text.contains("<lessons>"), "retry lost the ACE injector");
    assert!(text.contains("the build uses make"));
    assert!(text.contains("<state>mid-task, context was condensed</state>"));
    assert!(text.contains("<todos>"), "retry lost the todo injector");
    assert!(text.contains("<children>c6</children>"), "retry lost the children injector");
    assert!(text.contains("<budget>"), "retry lost the budget injector");
    assert!(text.contains("<ctx>"), "retry lost the context injector");
}

// ─── Backpressure, shell routing, dismissal, costs ───────────────────────────

#[tokio::test]
async fn unacked_pending_queues_messages_until_result() {
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![]));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("bp", &["m1"])).unwrap();

    handle
        .request(AgentRequest::AddPendingAction {
            action_id: "slow-1".into(),
            action_type: "orient".into(),
            params: json!({}),
            acked: false,
        })
        .await
        .unwrap();

    handle.send(AgentMsg::AgentMessage {
        from: "peer".into(),
        content: json!("while busy"),
    });
    let snap = wait_for(&handle, |s| s.queued_messages == 1).await;
    assert_eq!(snap.pending_actions.len(), 1);
    // Nothing reached history yet.
    let h = histories(&handle).await;
    assert!(h["m1"].iter().all(|e| e.entry_type != EntryType::Event));

    handle.send(AgentMsg::ActionResult {
        outcome: ActionOutcome::ok("slow-1", json!({"status": "done"})),
    });
    wait_for(&handle, |s| s.queued_messages == 0 && s.pending_actions.is_empty()).await;

    let h = histories(&handle).await;
    let entries = &h["m1"];
    let result_idx = entries
        .iter()
        .position(|e| e.entry_type == EntryType::Result)
        .unwrap();
    let event_idx = entries
        .iter()
        .position(|e| e.entry_type == EntryType::Event)
        .unwrap();
    assert!(event_idx < result_idx, "queued message flushed before the result was inserted");
}

#[tokio::test]
async fn shell_status_and_terminate_route_by_command_id() {
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![Ok(decision("shell", json!({"command": "sleep 5"})))],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("sh", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("run it") });
    wait_for(&handle, |s| s.action_counter >= 1 && s.pending_actions.is_empty()).await;

    let h = histories(&handle).await;
    let running = h["m1"]
        .iter()
        .find(|e| e.entry_type == EntryType::Result)
        .expect("running result recorded");
    let command_id = running.result.as_ref().unwrap()["command_id"]
        .as_str()
        .unwrap()
        .to_string();

    let reply = handle
        .request(AgentRequest::ShellStatus {
            command_id: command_id.clone(),
        })
        .await
        .unwrap();
    match reply {
        AgentReply::Shell(status) => assert_eq!(status["status"], "running"),
        other => panic!("unexpected reply: {other:?}"),
    }

    // Unknown ids are a routing error, not a crash.
    let reply = handle
        .request(AgentRequest::ShellStatus {
            command_id: "bogus".into(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, AgentReply::Error(e) if e == "command_not_found"));

    let reply = handle
        .request(AgentRequest::ShellTerminate {
            command_id: command_id.clone(),
        })
        .await
        .unwrap();
    match reply {
        AgentReply::Shell(report) => assert_eq!(report["status"], "terminated"),
        other => panic!("unexpected reply: {other:?}"),
    }

    // The command id is gone once its Router died.
    let reply = handle
        .request(AgentRequest::ShellTerminate { command_id })
        .await
        .unwrap();
    assert!(matches!(reply, AgentReply::Error(e) if e == "command_not_found"));
}

#[tokio::test]
async fn dismissing_blocks_new_dispatch_and_is_idempotent() {
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![]));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("dis", &["m1"])).unwrap();

    for _ in 0..2 {
        handle
            .request(AgentRequest::SetDismissing(true))
            .await
            .unwrap();
    }
    let reply = handle.request(AgentRequest::IsDismissing).await.unwrap();
    assert!(matches!(reply, AgentReply::Flag(true)));

    handle
        .request(AgentRequest::ProcessAction(ActionResponse::new(
            "orient",
            json!({"thoughts": "should not run"}),
        )))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = snapshot(&handle).await;
    assert!(snap.pending_actions.is_empty(), "dismissing agent dispatched an action");
    assert_eq!(snap.status, crate::state::AgentStatus::Dismissing);
}

#[tokio::test]
async fn process_action_without_capability_is_denied_without_side_effects() {
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![]));
    let env = env_with(&[Arc::clone(&m1)]);
    let supervisor = Supervisor::new(env);
    let mut cfg = config("cap", &["m1"]);
    cfg.capability_groups = vec!["agent".into()]; // no "shell"
    let handle = supervisor.start_agent(cfg).unwrap();

    let reply = handle
        .request(AgentRequest::ProcessAction(ActionResponse::new(
            "shell",
            json!({"command": "echo nope"}),
        )))
        .await
        .unwrap();
    assert!(matches!(reply, AgentReply::Error(e) if e == "action_not_allowed"));
    let snap = snapshot(&handle).await;
    assert!(snap.pending_actions.is_empty());
}

#[tokio::test]
async fn costs_flush_even_when_every_model_fails() {
    // Overflow, successful reflection (which costs money), then a dead
    // retry: the cycle fails but the reflection cost must still land.
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![
            Err(ModelError::ContextLengthExceeded { limit: None }),
            Ok(json!({"lessons": [], "state": []}).to_string()),
            Err(ModelError::Timeout),
        ],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let store = env.memory_store().unwrap();
    let mut costs = env.bus.subscribe(&topics::costs("cf"));
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("cf", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("go") });
    for _ in 0..200 {
        if !store.cost_records().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records = store.cost_records();
    assert!(!records.is_empty(), "failed cycle lost its cost records");
    assert!(records.iter().any(|r| r.cost_type == "reflection"));
    assert!(matches!(costs.recv().await.unwrap(), Event::CostRecorded(_)));
    // The agent survived the failed cycle.
    assert!(!snapshot(&handle).await.dismissing);
}

#[tokio::test]
async fn three_model_pool_executes_the_majority_action() {
    let agree = decision("todo_write", json!({"todos": [{"content": "A"}]}));
    let m1 = Arc::new(ScriptedMockProvider::new("m1", vec![Ok(agree.clone())]));
    let m2 = Arc::new(ScriptedMockProvider::new("m2", vec![Ok(agree)]));
    let m3 = Arc::new(ScriptedMockProvider::new(
        "m3",
        vec![Ok(decision("orient", json!({"thoughts": "outvoted"})))],
    ));
    let env = env_with(&[m1, m2, m3]);
    let supervisor = Supervisor::new(env);
    let handle = supervisor
        .start_agent(config("vote", &["m1", "m2", "m3"]))
        .unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("decide") });
    let snap = wait_for(&handle, |s| !s.todos.is_empty()).await;
    assert_eq!(snap.todos[0].content, "A");
}

#[tokio::test]
async fn terminated_agent_leaves_no_routers_alive() {
    let m1 = Arc::new(ScriptedMockProvider::new(
        "m1",
        vec![Ok(decision("shell", json!({"command": "sleep 30"})))],
    ));
    let env = env_with(&[Arc::clone(&m1)]);
    let registry = env.registry.clone();
    let supervisor = Supervisor::new(env);
    let handle = supervisor.start_agent(config("term", &["m1"])).unwrap();

    handle.send(AgentMsg::UserMessage { content: json!("run") });
    wait_for(&handle, |s| s.action_counter >= 1 && s.pending_actions.is_empty()).await;

    supervisor.terminate_agent("term").await.unwrap();
    assert!(!registry.contains("term"));
    assert!(handle.is_closed(), "agent mailbox must be gone after terminate");
    // The router's stop had an unbounded deadline and the shell was killed;
    // a status request on the dead handle reports the process as gone.
    assert!(handle
        .request(AgentRequest::GetState)
        .await
        .is_err());
}
