// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;
use tracing::warn;

use quorum_store::CostRecord;

use crate::events::{topics, Event};
use crate::Env;

/// Immutable accumulator for cost records produced during a consensus cycle.
///
/// `record` consumes and returns the accumulator, so cost tracking threads
/// through the pipeline as a value — there is no shared mutable ledger to
/// race on. The owning agent flushes it after every cycle, successful or
/// not, so costs incurred before a failure are never lost.
#[derive(Debug, Clone, Default)]
pub struct CostAccumulator {
    agent_id: String,
    task_id: String,
    records: Vec<CostRecord>,
}

impl CostAccumulator {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            records: Vec::new(),
        }
    }

    pub fn record(mut self, cost_type: impl Into<String>, cost_usd: f64, metadata: Value) -> Self {
        self.records.push(CostRecord {
            agent_id: self.agent_id.clone(),
            task_id: self.task_id.clone(),
            cost_type: cost_type.into(),
            cost_usd,
            metadata,
        });
        self
    }

    /// Fold another accumulator's records into this one (used when per-model
    /// query workers each carried their own).
    pub fn merge(mut self, other: CostAccumulator) -> Self {
        self.records.extend(other.records);
        self
    }

    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_usd(&self) -> f64 {
        self.records.iter().map(|r| r.cost_usd).sum()
    }

    /// Write every record to the cost store and publish a `cost_recorded`
    /// event per record. Store failures are logged and skipped — cost
    /// persistence must never take the agent down. Returns a fresh empty
    /// accumulator for the next cycle.
    pub async fn flush(self, env: &Env) -> CostAccumulator {
        let fresh = CostAccumulator::new(self.agent_id.clone(), self.task_id.clone());
        let topic = topics::costs(&self.agent_id);
        for record in self.records {
            if let Err(e) = env.cost_store.put_cost_record(record.clone()).await {
                warn!(agent_id = %record.agent_id, "cost record write failed: {e}");
            }
            env.bus.publish(&topic, Event::CostRecorded(record));
        }
        fresh
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn record_appends_and_preserves_ids() {
        let acc = CostAccumulator::new("a1", "t1")
            .record("llm_query", 0.01, json!({"model": "m1"}))
            .record("embedding", 0.002, json!({}));
        assert_eq!(acc.records().len(), 2);
        assert_eq!(acc.records()[0].agent_id, "a1");
        assert_eq!(acc.records()[1].task_id, "t1");
        assert!((acc.total_usd() - 0.012).abs() < 1e-9);
    }

    #[test]
    fn merge_combines_records() {
        let a = CostAccumulator::new("a1", "t1").record("llm_query", 0.01, json!({}));
        let b = CostAccumulator::new("a1", "t1").record("reflection", 0.02, json!({}));
        let merged = a.merge(b);
        assert_eq!(merged.records().len(), 2);
    }

    #[tokio::test]
    async fn flush_writes_store_and_publishes() {
        let env = Env::for_test();
        let store = env.memory_store().expect("test env uses memory store");
        let mut rx = env.bus.subscribe(&topics::costs("a1"));

        let acc = CostAccumulator::new("a1", "t1").record("llm_query", 0.05, json!({}));
        let fresh = acc.flush(&env).await;

        assert!(fresh.is_empty());
        assert_eq!(store.cost_records().len(), 1);
        assert!(matches!(rx.recv().await.unwrap(), Event::CostRecorded(r) if r.cost_usd == 0.05));
    }
}
