// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Named-topic broadcast bus.
//!
//! Delivery is at-most-once per subscriber with no durability: publishing to
//! a topic nobody subscribes to is a no-op, and a subscriber that falls more
//! than one buffer behind loses the oldest events. Topic channels are
//! created lazily on first subscribe or publish and are never torn down —
//! topic cardinality is bounded by the number of agents.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

const TOPIC_CAPACITY: usize = 256;

/// A cheaply clonable handle to the process-wide bus.
pub struct Bus<E: Clone> {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<E>>>>,
}

impl<E: Clone> Clone for Bus<E> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<E: Clone + Send + 'static> Default for Bus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> Bus<E> {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<E> {
        if let Some(tx) = self.topics.read().unwrap_or_else(PoisonError::into_inner).get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish an event to every current subscriber of `topic`.
    pub fn publish(&self, topic: &str, event: E) {
        let tx = self.sender(topic);
        // Err means no live subscribers; broadcast is best-effort by design.
        let receivers = tx.send(event).unwrap_or(0);
        trace!(topic, receivers, "published");
    }

    /// Subscribe to `topic`. Only events published after this call are seen.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<E> {
        self.sender(topic).subscribe()
    }

    /// Topics with at least one channel (subscribed or published to).
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
