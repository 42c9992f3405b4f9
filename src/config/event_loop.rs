//! Event loop configuration structures.

use std::env;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable selecting the clock mode (`virtual` or `wall`).
pub const ENV_CLOCK: &str = "OPERATION_CLOCK";
/// Environment variable holding the turn budget.
pub const ENV_MAX_TURNS: &str = "OPERATION_MAX_TURNS";
/// Environment variable holding the default collaborator delay in milliseconds.
pub const ENV_DEFAULT_DELAY_MS: &str = "OPERATION_DEFAULT_DELAY_MS";

/// How the event loop measures time for timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Timers jump a virtual clock; nothing actually sleeps.
    #[default]
    Virtual,
    /// Timers wait for real time to pass.
    Wall,
}

/// Event loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Clock used by timers.
    pub clock: ClockMode,
    /// Maximum turns a single `run` may execute. `None` means unbounded.
    pub max_turns: Option<u64>,
    /// Artificial delay in milliseconds applied by simulated collaborators.
    pub default_delay_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Virtual,
            max_turns: None,
            default_delay_ms: 1,
        }
    }
}

impl LoopConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock mode.
    #[must_use]
    pub const fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Set the turn budget.
    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Set the default collaborator delay.
    #[must_use]
    pub const fn with_default_delay_ms(mut self, delay_ms: u64) -> Self {
        self.default_delay_ms = delay_ms;
        self
    }

    /// Default collaborator delay as a [`Duration`].
    pub const fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_turns == Some(0) {
            return Err("max_turns must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading a `.env`
    /// file first when one exists. Unset variables keep their defaults.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Ok(raw) = env::var(ENV_CLOCK) {
            cfg.clock = serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
                .with_context(|| format!("{ENV_CLOCK} must be `virtual` or `wall`, got `{raw}`"))?;
        }
        if let Ok(raw) = env::var(ENV_MAX_TURNS) {
            let turns = raw
                .parse::<u64>()
                .with_context(|| format!("{ENV_MAX_TURNS} is not a number: `{raw}`"))?;
            cfg.max_turns = Some(turns);
        }
        if let Ok(raw) = env::var(ENV_DEFAULT_DELAY_MS) {
            cfg.default_delay_ms = raw
                .parse::<u64>()
                .with_context(|| format!("{ENV_DEFAULT_DELAY_MS} is not a number: `{raw}`"))?;
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}
