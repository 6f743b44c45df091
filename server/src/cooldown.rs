//! Per-command, per-player cooldown clocks
//!
//! Entries are written on use and removed lazily: the read that finds an
//! entry expired deletes it, so no sweep task is needed.

use crate::error::CooldownError;
use crate::utils::{deadline_after, seconds_until};
use dashmap::DashMap;
use log::debug;
use shared::PlayerId;
use std::fmt;
use tokio::time::Instant;

/// Normalised command name used to key cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey(String);

impl CommandKey {
    /// Lowercases and validates a command name. Keys are non-empty and made of
    /// ASCII alphanumerics plus `_`, `-`, `.` and `:`.
    pub fn parse(raw: &str) -> Result<Self, CooldownError> {
        let key = raw.trim().to_ascii_lowercase();
        let well_formed = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));

        if well_formed {
            Ok(Self(key))
        } else {
            Err(CooldownError::MalformedKey(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
pub struct CooldownRegistry {
    expiries: DashMap<(CommandKey, PlayerId), Instant>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a cooldown. Zero seconds is a no-op.
    pub fn set_cooldown(&self, command: &CommandKey, player: PlayerId, seconds: u32) {
        if seconds == 0 {
            return;
        }
        let expiry = deadline_after(Instant::now(), seconds);
        self.expiries.insert((command.clone(), player), expiry);
        debug!("Cooldown {} set for {} ({}s)", command, player, seconds);
    }

    /// Seconds left on the cooldown, rounded up. Expired entries are removed.
    pub fn remaining(&self, command: &CommandKey, player: PlayerId) -> u32 {
        let key = (command.clone(), player);
        let now = Instant::now();

        // remove_if holds the shard lock, so a concurrent set_cooldown either
        // lands before (and is judged) or after (and survives)
        if self
            .expiries
            .remove_if(&key, |_, expiry| *expiry <= now)
            .is_some()
        {
            return 0;
        }

        self.expiries
            .get(&key)
            .map(|expiry| seconds_until(*expiry, now))
            .unwrap_or(0)
    }

    pub fn can_use(&self, command: &CommandKey, player: PlayerId) -> bool {
        self.remaining(command, player) == 0
    }

    pub fn clear(&self, command: &CommandKey, player: PlayerId) {
        self.expiries.remove(&(command.clone(), player));
    }

    pub fn clear_all(&self, player: PlayerId) {
        self.expiries.retain(|(_, owner), _| *owner != player);
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}
