//! # Essentials Core Library
//!
//! This library provides the time-bounded player-state coordination that
//! teleport-style commands of a game server are built on. It keeps the
//! per-player registries, drives their timers, and marshals every read of
//! live player state onto the simulation thread of the world that owns it.
//!
//! ## Core Responsibilities
//!
//! ### Warmups
//! A deferred action runs only after the player has stood still for a
//! configured number of seconds. Moving cancels it; starting another warmup
//! replaces it, and exactly one action ever fires.
//!
//! ### Back History
//! Every teleport and every inferred death pushes a location onto a bounded
//! per-player stack the player can later return to.
//!
//! ### Teleport Requests
//! Two-party consent: one player asks, the other accepts or denies before
//! the request expires. Bare accept/deny resolves the newest request first.
//!
//! ### Cooldowns
//! Per-command, per-player expiry timestamps, cleaned up lazily on query.
//!
//! ### Death Inference
//! The host has no dependable death signal, so deaths are inferred from
//! periodic validity and position samples and recorded into the back
//! history.
//!
//! ## Architecture Design
//!
//! ### Simulation Threads
//! Each world is simulated by exactly one task which owns all live entity
//! state. Timers never read that state directly. They post a task through a
//! [`dispatch::SimulationDispatcher`] and the task does the real check once
//! it runs on the owning thread, re-validating that the session it was
//! scheduled for is still current.
//!
//! ### Timers
//! Every delay is a spawned tokio task (fixed-rate interval or fire-once
//! sleep) that is aborted on cancellation. Nothing blocks.
//!
//! ## Module Organization
//!
//! - `cooldown`: command keys and the cooldown registry
//! - `history`: the back stack
//! - `requests`: the paired request broker and its sweep
//! - `warmup`: stand-still warmups
//! - `death`: the motion state machine and its poller
//! - `dispatch`: the simulation boundary traits and the channel-backed
//!   world registry
//! - `world`: a small in-process authoritative world
//! - `services`: all of the above wired together, plus the teleport flows
//!   command handlers call
//! - `config`, `error`, `utils`: the usual
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::CoreConfig;
//! use server::dispatch::WorldRegistry;
//! use server::services::CoreServices;
//! use server::world::{spawn_world, WorldState};
//! use shared::WorldId;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::load_or_default("essentials.json")?;
//!
//!     // One simulation task per world, reachable through the registry
//!     let registry = Arc::new(WorldRegistry::new());
//!     let world = spawn_world(&registry, WorldState::new(WorldId::default()), 20, None);
//!
//!     let services = CoreServices::new(config, registry.clone())?;
//!     services.start();
//!
//!     // ... feed player_joined / player_left and command calls ...
//!
//!     services.shutdown().await;
//!     world.task.abort();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cooldown;
pub mod death;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod requests;
pub mod services;
pub mod utils;
pub mod warmup;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;
