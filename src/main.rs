// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use quorum_core::{events::topics, AgentMsg, Env, Event, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    init_logging(cli.verbose);

    let command = cli.command.take();
    match command {
        Some(Commands::ShowConfig) => {
            let config = quorum_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::ListModels) => {
            for entry in quorum_model::catalog::static_catalog() {
                println!(
                    "{:<24} ctx {:>7}  out {:>6}  ${:.2}/M in  ${:.2}/M out",
                    entry.id,
                    entry.context_window,
                    entry.max_output_tokens,
                    entry.input_cost_per_mtok,
                    entry.output_cost_per_mtok,
                );
            }
            Ok(())
        }
        Some(Commands::Run { agent_id, task_id }) => run(&cli, agent_id, task_id).await,
        None => run(&cli, "root".into(), "interactive".into()).await,
    }
}

async fn run(cli: &Cli, agent_id: String, task_id: String) -> anyhow::Result<()> {
    let config = quorum_config::load(cli.config.as_deref())?;
    let mut agent_config = config.agent.clone();
    agent_config.agent_id = agent_id.clone();
    agent_config.task_id = task_id;

    let env = Env::new(config).context("building runtime environment")?;
    spawn_observers(&env, &agent_id);

    let supervisor = Supervisor::new(env);
    let root = supervisor
        .start_agent(agent_config)
        .context("starting root agent")?;
    println!("quorum: root agent \"{agent_id}\" ready; type messages, ^D to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if !root.send(AgentMsg::UserMessage {
            content: serde_json::Value::String(line),
        }) {
            eprintln!("quorum: root agent is gone");
            break;
        }
    }

    supervisor.terminate_agent(&agent_id).await.ok();
    Ok(())
}

/// Mirror the root agent's observable activity onto stdout.
fn spawn_observers(env: &Env, agent_id: &str) {
    let mut lifecycle = env.bus.subscribe(topics::LIFECYCLE);
    let mut actions = env.bus.subscribe(topics::ACTIONS);
    let mut costs = env.bus.subscribe(&topics::costs(agent_id));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(event) = lifecycle.recv() => match event {
                    Event::AgentSpawned { agent_id, parent_id, .. } => {
                        println!("+ agent {agent_id} (parent: {})", parent_id.as_deref().unwrap_or("-"));
                    }
                    Event::AgentTerminated { agent_id } => {
                        println!("- agent {agent_id}");
                    }
                    _ => {}
                },
                Ok(event) = actions.recv() => match event {
                    Event::ActionStarted { action_type } => {
                        println!("> {action_type}");
                    }
                    Event::ActionCompleted { action_type, is_error, duration_ms, .. } => {
                        let mark = if is_error { "✗" } else { "✓" };
                        println!("{mark} {action_type} ({duration_ms} ms)");
                    }
                    _ => {}
                },
                Ok(event) = costs.recv() => {
                    if let Event::CostRecorded(record) = event {
                        println!("$ {} {:.6} USD", record.cost_type, record.cost_usd);
                    }
                }
                else => break,
            }
        }
    });
}

fn init_logging(verbosity: u8) {
    // QUORUM_LOG (or RUST_LOG-style directives) takes precedence; --verbose
    // bumps the default level.
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("QUORUM_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
