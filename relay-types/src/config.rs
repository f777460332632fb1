//! Per-session configuration with construction-time validation.
//!
//! Invalid configurations are rejected with [`ConfigError`]; nothing is
//! silently clamped.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::message::MemoryTier;

/// Budget and compressibility rules for one memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Maximum tokens this tier may hold.
    pub max_tokens: usize,
    /// Floor below which eviction must not shrink the tier.
    pub min_tokens: usize,
    /// Whether the planner may summarize messages in this tier.
    pub compressible: bool,
    /// Target ratio applied when compressing (`summary ≤ original × target`).
    pub compression_target: Option<f64>,
}

impl TierConfig {
    fn validate(&self, tier: MemoryTier) -> Result<(), ConfigError> {
        if self.min_tokens > self.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "tier {tier:?}: min_tokens {} exceeds max_tokens {}",
                self.min_tokens, self.max_tokens
            )));
        }
        if let Some(target) = self.compression_target
            && !(0.0..=1.0).contains(&target)
        {
            return Err(ConfigError::Invalid(format!(
                "tier {tier:?}: compression_target {target} outside (0, 1]"
            )));
        }
        Ok(())
    }
}

/// The budget descriptor for one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total context ceiling in tokens. Must be ≥ 1024.
    pub ceiling: usize,
    /// Tokens reserved for the model response.
    pub response_reserve: usize,
    /// Tokens reserved for tool results.
    pub tool_reserve: usize,
    /// Per-tier budgets.
    pub tiers: HashMap<MemoryTier, TierConfig>,
    /// The last N user-assistant exchanges are pinned in `recent` and
    /// never evicted. `0` disables pinning.
    pub recent_turns_count: usize,
    /// Compression starts when total load exceeds this fraction of the
    /// available envelope. In `(0, 1]`.
    pub compression_threshold: f64,
    /// Eviction starts when, after compression, total load still
    /// exceeds this fraction of the available envelope. Must be ≤ 1 and
    /// ≥ `compression_threshold`.
    pub eviction_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert(MemoryTier::System, TierConfig {
            max_tokens: 8_192,
            min_tokens: 256,
            compressible: false,
            compression_target: None,
        });
        tiers.insert(MemoryTier::Tools, TierConfig {
            max_tokens: 32_768,
            min_tokens: 0,
            compressible: false,
            compression_target: None,
        });
        tiers.insert(MemoryTier::Resources, TierConfig {
            max_tokens: 32_768,
            min_tokens: 0,
            compressible: true,
            compression_target: Some(0.3),
        });
        tiers.insert(MemoryTier::Recent, TierConfig {
            max_tokens: 65_536,
            min_tokens: 1_024,
            compressible: false,
            compression_target: None,
        });
        tiers.insert(MemoryTier::Archived, TierConfig {
            max_tokens: 16_384,
            min_tokens: 0,
            compressible: true,
            compression_target: Some(0.2),
        });
        tiers.insert(MemoryTier::Ephemeral, TierConfig {
            max_tokens: 8_192,
            min_tokens: 0,
            compressible: true,
            compression_target: Some(0.1),
        });
        Self {
            ceiling: 128_000,
            response_reserve: 4_096,
            tool_reserve: 2_048,
            tiers,
            recent_turns_count: 2,
            compression_threshold: 0.8,
            eviction_threshold: 0.95,
        }
    }
}

impl BudgetConfig {
    /// Validate every constraint of the configuration schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ceiling < 1024 {
            return Err(ConfigError::Invalid(format!(
                "ceiling {} below minimum 1024",
                self.ceiling
            )));
        }
        if self.response_reserve + self.tool_reserve >= self.ceiling {
            return Err(ConfigError::Invalid(
                "reserves consume the entire ceiling".into(),
            ));
        }
        if !(self.compression_threshold > 0.0 && self.compression_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "compression_threshold {} outside (0, 1]",
                self.compression_threshold
            )));
        }
        if self.eviction_threshold > 1.0 || self.eviction_threshold < self.compression_threshold {
            return Err(ConfigError::Invalid(format!(
                "eviction_threshold {} outside [compression_threshold, 1]",
                self.eviction_threshold
            )));
        }
        for (tier, cfg) in &self.tiers {
            cfg.validate(*tier)?;
        }
        Ok(())
    }

    /// Tokens available for the prompt once both reserves are held back.
    #[must_use]
    pub fn available(&self) -> usize {
        self.ceiling - self.response_reserve - self.tool_reserve
    }

    /// The configuration for a tier, falling back to a permissive
    /// non-compressible default when the host omitted it.
    #[must_use]
    pub fn tier(&self, tier: MemoryTier) -> TierConfig {
        self.tiers.get(&tier).cloned().unwrap_or(TierConfig {
            max_tokens: self.ceiling,
            min_tokens: 0,
            compressible: false,
            compression_target: None,
        })
    }
}

/// Configuration for the agentic loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Session identifier carried into hooks, checkpoints, and plans.
    pub session_id: String,
    /// Model identifier forwarded to the provider.
    pub model: String,
    /// Maximum LLM iterations per turn. Must be ≥ 1. Default 10.
    pub max_iterations: usize,
    /// Optional per-turn wall clock.
    pub per_turn_timeout: Option<Duration>,
    /// Silent-retry budget per tool-call shape. Default 3.
    pub retries_per_tool_call: u32,
    /// Capacity of the bounded event channel. Must be ≥ 1.
    pub event_buffer: usize,
    /// Maximum response tokens requested from the provider.
    pub max_response_tokens: Option<usize>,
    /// Sampling temperature forwarded to the provider.
    pub temperature: Option<f32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            model: String::new(),
            max_iterations: 10,
            per_turn_timeout: None,
            retries_per_tool_call: 3,
            event_buffer: 32,
            max_response_tokens: None,
            temperature: None,
        }
    }
}

impl LoopConfig {
    /// Validate the loop configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations < 1 {
            return Err(ConfigError::Invalid("max_iterations must be ≥ 1".into()));
        }
        if self.event_buffer < 1 {
            return Err(ConfigError::Invalid("event_buffer must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Configuration for the hooks pipeline.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Capacity of each per-tool duration ring buffer. Must be ≥ 1.
    pub metrics_buffer_size: usize,
    /// Whether the pipeline records tool metrics at all.
    pub track_metrics: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self { metrics_buffer_size: 1000, track_metrics: true }
    }
}

impl HookConfig {
    /// Validate the hook configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `metrics_buffer_size` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_buffer_size < 1 {
            return Err(ConfigError::Invalid("metrics_buffer_size must be ≥ 1".into()));
        }
        Ok(())
    }
}
