//! Simulation configuration.
//!
//! One section per scenario. Every field has a default, so an empty file (or
//! no file at all) yields the stock simulations. Durations are virtual
//! milliseconds.

use crate::distribution::DistributionMode;
use crate::timer::Millis;
use serde::{Deserialize, Serialize};

pub const MIN_CONSUMER_SPEED: Millis = 100;
pub const MAX_CONSUMER_SPEED: Millis = 2_000;
pub const DEFAULT_CONSUMER_SPEED: Millis = 500;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "consumer speed {0} ms is outside {min}..={max} ms",
        min = MIN_CONSUMER_SPEED,
        max = MAX_CONSUMER_SPEED
    )]
    SpeedOutOfRange(Millis),
    #[error("{section}.{field} must be greater than zero")]
    Zero {
        section: &'static str,
        field: &'static str,
    },
}

// ---------------------------------------------------------------------------
// ConsumerSpeed
// ---------------------------------------------------------------------------

/// Time a load-leveling consumer spends per message. Always within
/// `MIN_CONSUMER_SPEED..=MAX_CONSUMER_SPEED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ConsumerSpeed(Millis);

impl ConsumerSpeed {
    pub fn new(ms: Millis) -> Result<Self, ConfigError> {
        if (MIN_CONSUMER_SPEED..=MAX_CONSUMER_SPEED).contains(&ms) {
            Ok(Self(ms))
        } else {
            Err(ConfigError::SpeedOutOfRange(ms))
        }
    }

    /// Clamp into the allowed range instead of failing. Used for slider input.
    pub fn clamped(ms: Millis) -> Self {
        Self(ms.clamp(MIN_CONSUMER_SPEED, MAX_CONSUMER_SPEED))
    }

    pub fn as_millis(self) -> Millis {
        self.0
    }
}

impl Default for ConsumerSpeed {
    fn default() -> Self {
        Self(DEFAULT_CONSUMER_SPEED)
    }
}

impl TryFrom<u64> for ConsumerSpeed {
    type Error = ConfigError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::new(ms)
    }
}

impl From<ConsumerSpeed> for u64 {
    fn from(speed: ConsumerSpeed) -> Self {
        speed.0
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Restaurant analogy: a waiter hands tickets to a chef.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitchenConfig {
    pub handoff_ms: Millis,
    pub cook_ms: Millis,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self {
            handoff_ms: 500,
            cook_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecouplingConfig {
    /// Round trip of a synchronous call before it resolves.
    pub sync_latency_ms: Millis,
    /// How long a sync result stays on screen.
    pub sync_result_ms: Millis,
    /// How long the "queued" notice stays on screen.
    pub async_notice_ms: Millis,
    pub drain_interval_ms: Millis,
    pub peer_online: bool,
}

impl Default for DecouplingConfig {
    fn default() -> Self {
        Self {
            sync_latency_ms: 1_000,
            sync_result_ms: 2_000,
            async_notice_ms: 500,
            drain_interval_ms: 1_000,
            peer_online: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadLevelingConfig {
    pub consumer_speed_ms: ConsumerSpeed,
    pub spike_size: u32,
    pub spike_batch: u32,
    pub spike_interval_ms: Millis,
    /// Depth above which the queue is shown as overloaded.
    pub overload_threshold: usize,
}

impl Default for LoadLevelingConfig {
    fn default() -> Self {
        Self {
            consumer_speed_ms: ConsumerSpeed::default(),
            spike_size: 100,
            spike_batch: 5,
            spike_interval_ms: 20,
            overload_threshold: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    pub consumers: u32,
    pub mode: DistributionMode,
    /// How long a routed delivery stays visible.
    pub transit_ms: Millis,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            consumers: 3,
            mode: DistributionMode::PointToPoint,
            transit_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuaranteesConfig {
    pub receive_ms: Millis,
    pub ack_display_ms: Millis,
    pub expiry_display_ms: Millis,
    pub visibility_timeout_ms: Millis,
    pub initial_messages: u32,
}

impl Default for GuaranteesConfig {
    fn default() -> Self {
        Self {
            receive_ms: 1_000,
            ack_display_ms: 2_000,
            expiry_display_ms: 2_000,
            visibility_timeout_ms: crate::ack::DEFAULT_VISIBILITY_TIMEOUT,
            initial_messages: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub kitchen: KitchenConfig,
    pub decoupling: DecouplingConfig,
    pub load_leveling: LoadLevelingConfig,
    pub patterns: PatternsConfig,
    pub guarantees: GuaranteesConfig,
}

impl SimConfig {
    /// Reject values that would stall or divide by zero. Consumer speed is
    /// already range-checked when deserialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, &'static str, u64); 5] = [
            ("decoupling", "drain_interval_ms", self.decoupling.drain_interval_ms),
            ("load_leveling", "spike_size", u64::from(self.load_leveling.spike_size)),
            ("load_leveling", "spike_batch", u64::from(self.load_leveling.spike_batch)),
            ("load_leveling", "spike_interval_ms", self.load_leveling.spike_interval_ms),
            ("patterns", "consumers", u64::from(self.patterns.consumers)),
        ];
        for (section, field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero { section, field });
            }
        }
        Ok(())
    }
}
