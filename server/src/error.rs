//! Typed failures reported by the coordination core
//!
//! None of these ever cross a background task as a panic: timers and poll
//! loops treat dispatch failures as soft and skip the cycle, while command
//! entry points hand these values back to their caller.

use shared::WorldId;
use thiserror::Error;

/// Failure to hand a task to a world's simulation thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No simulation thread registered for world {0}")]
    UnknownWorld(WorldId),

    #[error("Simulation thread for world {0} has stopped")]
    WorldClosed(WorldId),
}

/// Rejections from the paired request broker.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("Players cannot send a teleport request to themselves")]
    SelfRequest,

    #[error("A request to this player is already pending")]
    AlreadyPending,

    #[error("No pending teleport request")]
    NoPendingRequest,

    #[error("The teleport request has expired")]
    Expired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CooldownError {
    #[error("Malformed cooldown key: {0:?}")]
    MalformedKey(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the command-level teleport flows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TeleportError {
    #[error("Command {command} is on cooldown for {seconds}s")]
    OnCooldown { command: String, seconds: u32 },

    #[error("Player is not available in this world")]
    PlayerUnavailable,

    #[error("No previous location to return to")]
    NoHistory,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Cooldown(#[from] CooldownError),
}
