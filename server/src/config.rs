//! Tunables for the coordination core, loaded from a JSON file
//!
//! Every section carries `#[serde(default)]`, so a partial file only
//! overrides what it names and a missing file yields the defaults below.

use crate::cooldown::CommandKey;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Verbose logging for troubleshooting
    pub debug: bool,
    pub warmup: WarmupConfig,
    pub death: DeathConfig,
    pub back: BackConfig,
    pub tpa: TpaConfig,
    /// Per-command cooldown and warmup, keyed by command name
    pub commands: BTreeMap<String, CommandTiming>,
    /// How long shutdown waits for background tasks before aborting them
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Distance from the start position that counts as moving
    pub movement_tolerance: f64,
    pub check_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeathConfig {
    /// Record inferred death locations into the back history
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub initial_delay_ms: u64,
    /// A jump further than this between two samples is treated as a respawn
    pub respawn_distance: f64,
    /// Movement below this between two samples means the player has settled
    pub stability_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackConfig {
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TpaConfig {
    pub timeout_seconds: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTiming {
    pub cooldown_seconds: u32,
    pub warmup_seconds: u32,
    /// Suppress countdown notices during the warmup
    pub silent: bool,
}

impl CommandTiming {
    pub fn new(cooldown_seconds: u32, warmup_seconds: u32) -> Self {
        Self {
            cooldown_seconds,
            warmup_seconds,
            silent: false,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let commands = [
            ("rtp", CommandTiming::new(30, 3)),
            ("back", CommandTiming::new(0, 0)),
            ("tpa", CommandTiming::new(0, 3)),
            ("tpahere", CommandTiming::new(0, 3)),
            ("home", CommandTiming::new(0, 3)),
            ("spawn", CommandTiming::new(0, 3)),
            ("warp", CommandTiming::new(0, 3)),
        ]
        .into_iter()
        .map(|(name, timing)| (name.to_string(), timing))
        .collect();

        Self {
            debug: false,
            warmup: WarmupConfig::default(),
            death: DeathConfig::default(),
            back: BackConfig::default(),
            tpa: TpaConfig::default(),
            commands,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            movement_tolerance: 1.0,
            check_interval_ms: 500,
        }
    }
}

impl Default for DeathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 200,
            initial_delay_ms: 500,
            respawn_distance: 50.0,
            stability_distance: 5.0,
        }
    }
}

impl Default for BackConfig {
    fn default() -> Self {
        Self { max_history: 5 }
    }
}

impl Default for TpaConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            sweep_interval_secs: 5,
        }
    }
}

impl WarmupConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl DeathConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl TpaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl CoreConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Like [`CoreConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Timing for a command; unknown commands have neither cooldown nor warmup.
    pub fn timing(&self, command: &str) -> CommandTiming {
        self.commands.get(command).copied().unwrap_or_default()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("warmup.movement_tolerance", self.warmup.movement_tolerance),
            ("death.respawn_distance", self.death.respawn_distance),
            ("death.stability_distance", self.death.stability_distance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        if self.death.stability_distance >= self.death.respawn_distance {
            return Err(ConfigError::Invalid(format!(
                "death.stability_distance ({}) must be below death.respawn_distance ({})",
                self.death.stability_distance, self.death.respawn_distance
            )));
        }

        let intervals = [
            ("warmup.check_interval_ms", self.warmup.check_interval_ms),
            ("death.poll_interval_ms", self.death.poll_interval_ms),
            ("tpa.sweep_interval_secs", self.tpa.sweep_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }

        for name in self.commands.keys() {
            CommandKey::parse(name).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        Ok(())
    }
}
