//! Configuration for the debate runtime.
//!
//! Provides the [`DebateConfig`] root with serde defaults, environment
//! loading (prefix `PARLEY`, `.env` supported), and validation. Every
//! numeric threshold the runtime consults lives here; the spec constants
//! are defaults, not hard-wired behaviour.
//!
//! # Example
//!
//! ```rust,ignore
//! use parley::config::DebateConfig;
//!
//! let config = DebateConfig::load()?;
//! assert_eq!(config.max_rounds, 10);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Minimum debate rounds before Reduce/Extend may shorten the exchange.
    #[serde(default = "default_min_rounds")]
    pub min_rounds: u32,

    /// Maximum debate rounds; Extend is clamped here.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Per-turn model-call deadline in seconds.
    #[serde(default = "default_turn_deadline_secs")]
    pub turn_deadline_secs: u64,

    /// Total session wall-clock budget in seconds.
    #[serde(default = "default_session_budget_secs")]
    pub session_budget_secs: u64,

    /// Default rotation strategy for new sessions.
    #[serde(default)]
    pub rotation_strategy: crate::pool::RotationStrategy,

    /// Observations of the incumbent required before rotation is considered.
    #[serde(default = "default_min_calls_before_rotation")]
    pub min_calls_before_rotation: u32,

    /// Question/answer pairs in the cross-examination phase.
    #[serde(default)]
    pub cross_examination_pairs: u32,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-session cumulative retry budget across all turns.
    #[serde(default = "default_session_retry_budget")]
    pub session_retry_budget: u32,

    /// Circuit breaker policy.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Argument-strength component weights.
    #[serde(default)]
    pub strength_weights: StrengthWeights,

    /// Approximate token ceiling before transcript compression kicks in.
    #[serde(default = "default_transcript_token_ceiling")]
    pub transcript_token_ceiling: usize,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per logical call (first try included).
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for the exponential schedule, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay cap, in milliseconds.
    #[serde(default = "default_retry_cap_delay_ms")]
    pub cap_delay_ms: u64,
}

impl RetryConfig {
    /// Base delay as a [`Duration`].
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap as a [`Duration`].
    #[must_use]
    pub const fn cap_delay(&self) -> Duration {
        Duration::from_millis(self.cap_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            cap_delay_ms: default_retry_cap_delay_ms(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Rolling window size in observations. The breaker only trips on a
    /// full window.
    #[serde(default = "default_breaker_window")]
    pub window: usize,

    /// Failure rate at or above which a full window trips the breaker.
    #[serde(default = "default_breaker_trip_rate")]
    pub trip_rate: f64,

    /// Minimum failures in the window required to trip.
    #[serde(default = "default_breaker_min_failures")]
    pub min_failures: usize,

    /// Initial open-state cooldown, in seconds.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Cooldown ceiling after doubling, in seconds.
    #[serde(default = "default_breaker_cooldown_max_secs")]
    pub cooldown_max_secs: u64,
}

impl BreakerConfig {
    /// Initial cooldown as a [`Duration`].
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Cooldown ceiling as a [`Duration`].
    #[must_use]
    pub const fn cooldown_max(&self) -> Duration {
        Duration::from_secs(self.cooldown_max_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: default_breaker_window(),
            trip_rate: default_breaker_trip_rate(),
            min_failures: default_breaker_min_failures(),
            cooldown_secs: default_breaker_cooldown_secs(),
            cooldown_max_secs: default_breaker_cooldown_max_secs(),
        }
    }
}

/// Argument-strength component weights. Must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StrengthWeights {
    /// Weight of the structural component.
    #[serde(default = "default_structure_weight")]
    pub structure: f64,

    /// Weight of the evidentiary component.
    #[serde(default = "default_evidence_weight")]
    pub evidence: f64,

    /// Weight of the logical component.
    #[serde(default = "default_logic_weight")]
    pub logic: f64,
}

impl StrengthWeights {
    /// Compose a strength score from component scores, clipped to [0, 1].
    #[must_use]
    pub fn compose(&self, structure: f64, evidence: f64, logic: f64) -> f64 {
        (self.structure * structure + self.evidence * evidence + self.logic * logic)
            .clamp(0.0, 1.0)
    }
}

impl Default for StrengthWeights {
    fn default() -> Self {
        Self {
            structure: default_structure_weight(),
            evidence: default_evidence_weight(),
            logic: default_logic_weight(),
        }
    }
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            min_rounds: default_min_rounds(),
            max_rounds: default_max_rounds(),
            turn_deadline_secs: default_turn_deadline_secs(),
            session_budget_secs: default_session_budget_secs(),
            rotation_strategy: crate::pool::RotationStrategy::default(),
            min_calls_before_rotation: default_min_calls_before_rotation(),
            cross_examination_pairs: 0,
            retry: RetryConfig::default(),
            session_retry_budget: default_session_retry_budget(),
            breaker: BreakerConfig::default(),
            strength_weights: StrengthWeights::default(),
            transcript_token_ceiling: default_transcript_token_ceiling(),
        }
    }
}

impl DebateConfig {
    /// Load configuration from the environment and validate it.
    ///
    /// Sources, in order: defaults, then environment variables with the
    /// `PARLEY` prefix (`__` separator, e.g. `PARLEY__MAX_ROUNDS=6`).
    /// A `.env` file is honoured if present.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;
        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let loaded = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(loaded.try_deserialize().unwrap_or_default())
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_rounds == 0 {
            return Err("min_rounds must be at least 1".to_string());
        }
        if self.min_rounds > self.max_rounds {
            return Err(format!(
                "min_rounds ({}) exceeds max_rounds ({})",
                self.min_rounds, self.max_rounds
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.breaker.window == 0 {
            return Err("breaker.window must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.breaker.trip_rate) || self.breaker.trip_rate == 0.0 {
            return Err(format!(
                "breaker.trip_rate must be in (0, 1], got {}",
                self.breaker.trip_rate
            ));
        }
        let weight_sum = self.strength_weights.structure
            + self.strength_weights.evidence
            + self.strength_weights.logic;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(format!("strength_weights must sum to 1, got {weight_sum}"));
        }
        Ok(())
    }

    /// Per-turn deadline as a [`Duration`].
    #[must_use]
    pub const fn turn_deadline(&self) -> Duration {
        Duration::from_secs(self.turn_deadline_secs)
    }

    /// Session wall-clock budget as a [`Duration`].
    #[must_use]
    pub const fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_budget_secs)
    }
}

fn default_min_rounds() -> u32 {
    3
}

fn default_max_rounds() -> u32 {
    10
}

fn default_turn_deadline_secs() -> u64 {
    60
}

fn default_session_budget_secs() -> u64 {
    30 * 60
}

fn default_min_calls_before_rotation() -> u32 {
    3
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_cap_delay_ms() -> u64 {
    8_000
}

fn default_session_retry_budget() -> u32 {
    20
}

fn default_breaker_window() -> usize {
    20
}

fn default_breaker_trip_rate() -> f64 {
    0.5
}

fn default_breaker_min_failures() -> usize {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_breaker_cooldown_max_secs() -> u64 {
    5 * 60
}

fn default_structure_weight() -> f64 {
    0.30
}

fn default_evidence_weight() -> f64 {
    0.40
}

fn default_logic_weight() -> f64 {
    0.30
}

fn default_transcript_token_ceiling() -> usize {
    8_000
}
