//! Distribution policies: which consumers receive a message.
//!
//! Policies are chosen per session and can be switched at runtime. The
//! round-robin index persists across sends and across mode switches.

use crate::id::ConsumerId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Distribution mode
// ---------------------------------------------------------------------------

/// How a published message is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    /// Worker queue: each message goes to exactly one consumer, chosen in
    /// round-robin order.
    #[default]
    PointToPoint,
    /// Publish/subscribe: each message goes to every consumer.
    FanOut,
}

impl DistributionMode {
    /// The name shown on the exchange: "Queue" or "Topic".
    pub fn exchange_label(self) -> &'static str {
        match self {
            DistributionMode::PointToPoint => "Queue",
            DistributionMode::FanOut => "Topic",
        }
    }
}

// ---------------------------------------------------------------------------
// Distributor
// ---------------------------------------------------------------------------

/// Routes messages over a fixed, ordered consumer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distributor {
    mode: DistributionMode,
    consumers: Vec<ConsumerId>,
    /// Next point-to-point target, always `< consumers.len()` when non-empty.
    round_robin_index: usize,
    /// Deliveries received per consumer, parallel to `consumers`.
    received: Vec<u64>,
}

impl Distributor {
    pub fn new(mode: DistributionMode, consumers: Vec<ConsumerId>) -> Self {
        let received = vec![0; consumers.len()];
        Self {
            mode,
            consumers,
            round_robin_index: 0,
            received,
        }
    }

    /// Consumers `0..count` with ids `ConsumerId(0)..ConsumerId(count - 1)`.
    pub fn with_consumer_count(mode: DistributionMode, count: u32) -> Self {
        Self::new(mode, (0..count).map(ConsumerId).collect())
    }

    pub fn mode(&self) -> DistributionMode {
        self.mode
    }

    /// Switch policy. The round-robin index is kept.
    pub fn set_mode(&mut self, mode: DistributionMode) {
        self.mode = mode;
    }

    pub fn consumers(&self) -> &[ConsumerId] {
        &self.consumers
    }

    pub fn round_robin_index(&self) -> usize {
        self.round_robin_index
    }

    /// Choose the targets for one message and count the deliveries.
    /// An empty consumer set yields no targets.
    pub fn route(&mut self) -> Vec<ConsumerId> {
        if self.consumers.is_empty() {
            return Vec::new();
        }
        match self.mode {
            DistributionMode::PointToPoint => {
                let idx = self.round_robin_index;
                self.round_robin_index = (idx + 1) % self.consumers.len();
                self.received[idx] += 1;
                vec![self.consumers[idx]]
            }
            DistributionMode::FanOut => {
                for count in &mut self.received {
                    *count += 1;
                }
                self.consumers.clone()
            }
        }
    }

    /// Deliveries received by `consumer` so far.
    pub fn received(&self, consumer: ConsumerId) -> u64 {
        self.consumers
            .iter()
            .position(|c| *c == consumer)
            .map(|i| self.received[i])
            .unwrap_or(0)
    }

    /// `(consumer, received)` pairs in consumer order.
    pub fn received_counts(&self) -> Vec<(ConsumerId, u64)> {
        self.consumers
            .iter()
            .copied()
            .zip(self.received.iter().copied())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
