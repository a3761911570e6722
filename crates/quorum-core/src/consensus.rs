// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The consensus pipeline: fan one decision request out to every model in
//! the pool, retry overflowing models once after condensation, vote, and
//! hand the winning action back with the cost accumulator threaded through.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use quorum_model::{ChatMessage, ChatRequest, ModelProvider};

use crate::cost::CostAccumulator;
use crate::env::Env;
use crate::events::{topics, Event, LogMetadata, SentMessages};
use crate::history::HistoryEntry;
use crate::inject::{assemble_messages, AssemblyInputs, BudgetInfo};
use crate::prompts::{self, REFINEMENT_PROMPT};
use crate::reflect::{extract_json, reflect};
use crate::state::{AgentState, Lesson, ModelState};
use crate::CoreError;

/// Actions whose results arrive without external cooperation. A model that
/// asks to `wait: true` on one of these would stall the agent for nothing,
/// so the directive is auto-corrected to `false`.
pub const SELF_CONTAINED_ACTIONS: &[&str] = &[
    "todo_write",
    "file_read",
    "web_fetch",
    "send_message",
    "batch_sync",
    "orient",
];

/// The `wait` field of a decision: `false`, `true`, or a millisecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitDirective {
    #[default]
    No,
    Indefinite,
    Ms(u64),
}

impl Serialize for WaitDirective {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::No => ser.serialize_bool(false),
            Self::Indefinite => ser.serialize_bool(true),
            Self::Ms(ms) => ser.serialize_u64(*ms),
        }
    }
}

impl WaitDirective {
    fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::Bool(true)) => Self::Indefinite,
            Some(Value::Number(n)) => n.as_u64().map(Self::Ms).unwrap_or(Self::No),
            _ => Self::No,
        }
    }
}

/// One parsed decision from a model.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub action: String,
    pub params: Value,
    pub reasoning: String,
    pub wait: WaitDirective,
    pub auto_complete_todo: bool,
}

impl ActionResponse {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            reasoning: String::new(),
            wait: WaitDirective::No,
            auto_complete_todo: false,
        }
    }

    /// Canonical `(action, params)` key used for voting. serde_json keeps
    /// object keys sorted, so equal decisions always produce equal keys.
    fn vote_key(&self) -> String {
        json!({ "action": self.action, "params": self.params }).to_string()
    }
}

/// Parse a model response into a decision.
pub fn parse_decision(text: &str) -> Result<ActionResponse, CoreError> {
    let v = extract_json(text).ok_or(CoreError::InvalidJson)?;
    let action = v
        .get("action")
        .and_then(|a| a.as_str())
        .ok_or(CoreError::InvalidJson)?
        .to_string();
    Ok(ActionResponse {
        action,
        params: v.get("params").cloned().unwrap_or_else(|| json!({})),
        reasoning: v
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string(),
        wait: WaitDirective::from_value(v.get("wait")),
        auto_complete_todo: v
            .get("auto_complete_todo")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// A strict majority of the pool agreed.
    Consensus,
    /// No strict majority; the deterministic tie-break picked the action.
    ForcedDecision,
}

#[derive(Debug)]
pub struct ConsensusOutcome {
    pub decision_type: DecisionType,
    pub action: ActionResponse,
    pub accumulator: CostAccumulator,
    pub round_count: u32,
}

/// A failed cycle still carries the accumulator so costs flush.
#[derive(Debug)]
pub struct ConsensusFailure {
    pub error: CoreError,
    pub accumulator: CostAccumulator,
}

/// History/lessons/state replacement computed by a condensation, applied to
/// the agent state once the fan-out joins.
struct CondensationUpdate {
    model_id: String,
    history: Vec<HistoryEntry>,
    lessons: Vec<Lesson>,
    state: Option<ModelState>,
}

struct QueryOutcome {
    model_id: String,
    result: Result<ActionResponse, CoreError>,
    condensation: Option<CondensationUpdate>,
    accumulator: CostAccumulator,
    /// Messages as last sent, kept for the refinement round.
    messages: Vec<ChatMessage>,
}

/// Run one full consensus cycle against the agent's pool.
///
/// Mutates `state` only for condensation updates; dispatching the decision
/// and flushing the accumulator are the caller's responsibility.
pub async fn run_cycle(
    state: &mut AgentState,
    env: &Env,
) -> Result<ConsensusOutcome, ConsensusFailure> {
    let accumulator = std::mem::replace(
        &mut state.cost_accumulator,
        CostAccumulator::new(&state.agent_id, &state.config.task_id),
    );

    if state.model_pool.is_empty() {
        return Err(ConsensusFailure {
            error: CoreError::AllModelsFailed,
            accumulator,
        });
    }

    if !state.context_limits_loaded {
        for model_id in &state.model_pool {
            state
                .context_limits
                .insert(model_id.clone(), quorum_model::catalog::context_limit(model_id));
        }
        state.context_limits_loaded = true;
    }

    // Assemble per-model message lists up front so the observability
    // broadcast shows exactly what each model is about to see.
    let keep_recent = env.config.runtime.consensus.keep_recent;
    let plans: Vec<(String, AssemblyInputs, Vec<HistoryEntry>, Vec<ChatMessage>)> = state
        .model_pool
        .iter()
        .map(|model_id| {
            let inputs = assembly_inputs(state, env, model_id);
            let history = state
                .model_histories
                .get(model_id)
                .cloned()
                .unwrap_or_default();
            let messages = assemble_messages(&history, &inputs);
            (model_id.clone(), inputs, history, messages)
        })
        .collect();

    env.bus.publish(
        &topics::logs(&state.agent_id),
        Event::LogEntry {
            metadata: LogMetadata {
                sent_messages: plans
                    .iter()
                    .map(|(model_id, _, _, messages)| SentMessages {
                        model_id: model_id.clone(),
                        messages: messages.clone(),
                    })
                    .collect(),
            },
        },
    );

    let agent_id = state.agent_id.clone();
    let task_id = state.config.task_id.clone();
    let queries = plans.into_iter().map(|(model_id, inputs, history, messages)| {
        let env = env.clone();
        let agent_id = agent_id.clone();
        let task_id = task_id.clone();
        async move {
            per_model_query(&env, &agent_id, &task_id, model_id, inputs, history, messages, keep_recent)
                .await
        }
    });
    let mut outcomes: Vec<QueryOutcome> = join_all(queries).await;

    // Fold per-query costs into the cycle accumulator and apply condensation
    // updates back onto the (single-threaded) agent state.
    let mut accumulator = accumulator;
    for outcome in &mut outcomes {
        accumulator = accumulator.merge(std::mem::take(&mut outcome.accumulator));
        if let Some(update) = outcome.condensation.take() {
            state
                .model_histories
                .insert(update.model_id.clone(), update.history);
            state
                .context_lessons
                .entry(update.model_id.clone())
                .or_default()
                .extend(update.lessons);
            if let Some(model_state) = update.state {
                state.model_states.insert(update.model_id, model_state);
            }
        }
    }

    // An unparseable response is not a failed query — the model answered,
    // badly. Only transport/API failures across the whole pool are fatal.
    let mut round_count = 1;
    let all_errored = outcomes
        .iter()
        .all(|o| matches!(&o.result, Err(e) if !matches!(e, CoreError::InvalidJson)));
    if all_errored {
        return Err(ConsensusFailure {
            error: CoreError::AllModelsFailed,
            accumulator,
        });
    }

    // Refinement: when at most a minority parsed, give the failed models one
    // more chance with an explicit format reminder.
    let parsed = outcomes.iter().filter(|o| o.result.is_ok()).count();
    if parsed * 2 <= outcomes.len() {
        let max_rounds = env.config.runtime.consensus.max_refinement_rounds;
        for _ in 0..max_rounds {
            round_count += 1;
            refine_failed(env, &agent_id, &task_id, &mut outcomes, &mut accumulator).await;
            let parsed = outcomes.iter().filter(|o| o.result.is_ok()).count();
            if parsed * 2 > outcomes.len() {
                break;
            }
        }
    }

    let votes: Vec<(String, ActionResponse)> = outcomes
        .iter()
        .filter_map(|o| {
            o.result
                .as_ref()
                .ok()
                .map(|a| (o.model_id.clone(), a.clone()))
        })
        .collect();

    if votes.is_empty() {
        return Err(ConsensusFailure {
            error: CoreError::InvalidJson,
            accumulator,
        });
    }

    let (mut action, decision_type) = tally_votes(&votes, &state.model_pool);

    // Self-contained actions never need an indefinite wait.
    if action.wait == WaitDirective::Indefinite && SELF_CONTAINED_ACTIONS.contains(&action.action.as_str())
    {
        debug!(action = %action.action, "auto-correcting wait:true to wait:false");
        action.wait = WaitDirective::No;
    }

    Ok(ConsensusOutcome {
        decision_type,
        action,
        accumulator,
        round_count,
    })
}

/// Majority over canonical `(action, params)` keys; ties resolve to the
/// earliest voter in pool order. Pool-order first occurrence also breaks
/// equal-count conflicts, so the result is deterministic for any vote set.
pub fn tally_votes(
    votes: &[(String, ActionResponse)],
    pool: &[String],
) -> (ActionResponse, DecisionType) {
    // Order votes by the pool, so "first occurrence" is well defined.
    let ordered: Vec<&(String, ActionResponse)> = pool
        .iter()
        .filter_map(|model_id| votes.iter().find(|(m, _)| m == model_id))
        .collect();

    let mut best: Option<(&ActionResponse, usize)> = None;
    for (_, candidate) in &ordered {
        let key = candidate.vote_key();
        let count = ordered
            .iter()
            .filter(|(_, other)| other.vote_key() == key)
            .count();
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((candidate, count)),
        }
    }

    // `votes` is non-empty by the caller's check; ordered inherits that
    // unless a vote came from outside the pool, in which case fall back to
    // the raw first vote.
    let (winner, count) = match best {
        Some(found) => found,
        None => (&votes[0].1, 1),
    };
    let decision_type = if count * 2 > pool.len() {
        DecisionType::Consensus
    } else {
        DecisionType::ForcedDecision
    };
    (winner.clone(), decision_type)
}

fn assembly_inputs(
    state: &AgentState,
    env: &Env,
    model_id: &str,
) -> AssemblyInputs {
    AssemblyInputs {
        system_prompt: prompts::system_prompt(&state.config, &env.actions.names()),
        lessons: state
            .context_lessons
            .get(model_id)
            .cloned()
            .unwrap_or_default(),
        model_state: state.model_states.get(model_id).cloned(),
        todos: state.todos.clone(),
        children: state.children.iter().map(|c| c.child_id.clone()).collect(),
        budget: if state.total_cost_usd > 0.0 || state.config.budget_limit_usd.is_some() {
            Some(BudgetInfo {
                spent_usd: state.total_cost_usd,
                limit_usd: state.config.budget_limit_usd,
            })
        } else {
            None
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn per_model_query(
    env: &Env,
    agent_id: &str,
    task_id: &str,
    model_id: String,
    mut inputs: AssemblyInputs,
    history: Vec<HistoryEntry>,
    messages: Vec<ChatMessage>,
    keep_recent: usize,
) -> QueryOutcome {
    let mut accumulator = CostAccumulator::new(agent_id, task_id);
    let Some(provider) = env.providers.get(&model_id) else {
        return QueryOutcome {
            model_id: model_id.clone(),
            result: Err(CoreError::InvalidConfig(format!(
                "no provider for model {model_id}"
            ))),
            condensation: None,
            accumulator,
            messages,
        };
    };

    let first = query_once(provider.as_ref(), &model_id, &messages, &mut accumulator, "query").await;
    match first {
        Ok(text) => QueryOutcome {
            model_id,
            result: parse_decision(&text),
            condensation: None,
            accumulator,
            messages,
        },
        Err(e) if e.is_context_overflow() => {
            debug!(model = %model_id, "context overflow; condensing and retrying once");
            let (reflection, usage) = reflect(provider.as_ref(), &history).await;
            accumulator = accumulator.record(
                "reflection",
                usage.cost_usd,
                json!({ "model": model_id, "input_tokens": usage.input_tokens,
                        "output_tokens": usage.output_tokens }),
            );

            // Condensed prefix: the most recent entries survive verbatim,
            // everything older is represented by the reflection.
            let condensed: Vec<HistoryEntry> =
                history.iter().take(keep_recent).cloned().collect();
            inputs.lessons.extend(reflection.lessons.iter().cloned());
            if let Some(model_state) = &reflection.state {
                inputs.model_state = Some(model_state.clone());
            }

            // Same assembly function as the primary path: the retry sees
            // every injector the first attempt saw.
            let retry_messages = assemble_messages(&condensed, &inputs);
            let retry = query_once(
                provider.as_ref(),
                &model_id,
                &retry_messages,
                &mut accumulator,
                "retry",
            )
            .await;

            QueryOutcome {
                model_id: model_id.clone(),
                result: retry.map_err(CoreError::from).and_then(|t| parse_decision(&t)),
                condensation: Some(CondensationUpdate {
                    model_id,
                    history: condensed,
                    lessons: reflection.lessons,
                    state: reflection.state,
                }),
                accumulator,
                messages: retry_messages,
            }
        }
        Err(e) => {
            warn!(model = %model_id, "model query failed: {e}");
            QueryOutcome {
                model_id,
                result: Err(CoreError::Model(e)),
                condensation: None,
                accumulator,
                messages,
            }
        }
    }
}

async fn query_once(
    provider: &dyn ModelProvider,
    model_id: &str,
    messages: &[ChatMessage],
    accumulator: &mut CostAccumulator,
    phase: &str,
) -> Result<String, quorum_model::ModelError> {
    let completion = provider
        .complete(ChatRequest {
            messages: messages.to_vec(),
            ..Default::default()
        })
        .await?;
    *accumulator = std::mem::take(accumulator).record(
        "llm_query",
        completion.usage.cost_usd,
        json!({ "model": model_id, "phase": phase,
                "input_tokens": completion.usage.input_tokens,
                "output_tokens": completion.usage.output_tokens }),
    );
    Ok(completion.text)
}

/// Second-round queries for the models whose responses did not parse.
async fn refine_failed(
    env: &Env,
    agent_id: &str,
    task_id: &str,
    outcomes: &mut [QueryOutcome],
    accumulator: &mut CostAccumulator,
) {
    let refinements = outcomes.iter().enumerate().filter_map(|(i, o)| {
        // Only parse failures get a second chance; hard failures don't retry.
        if !matches!(o.result, Err(CoreError::InvalidJson)) {
            return None;
        }
        let provider = env.providers.get(&o.model_id)?;
        let mut messages = o.messages.clone();
        messages.push(ChatMessage::user(REFINEMENT_PROMPT));
        let model_id = o.model_id.clone();
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        Some(async move {
            let mut acc = CostAccumulator::new(agent_id, task_id);
            let result = query_once(provider.as_ref(), &model_id, &messages, &mut acc, "refinement")
                .await
                .map_err(CoreError::from)
                .and_then(|t| parse_decision(&t));
            (i, result, acc)
        })
    });

    let results = join_all(refinements).await;
    for (i, result, acc) in results {
        *accumulator = std::mem::take(accumulator).merge(acc);
        if result.is_ok() {
            outcomes[i].result = result;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
