//! Marshalling work onto a world's simulation thread
//!
//! Live player state belongs to the thread that simulates its world. Timers
//! and poll loops never read it directly: they post a [`WorldTask`] through a
//! [`SimulationDispatcher`], and the task receives a [`WorldContext`] when it
//! runs on the owning thread. Holding a `&mut dyn WorldContext` is therefore
//! proof that the caller is on that thread.
//!
//! Tasks run in the order they were posted for a given world. No ordering
//! holds between worlds.

use crate::error::DispatchError;
use log::debug;
use shared::{Location, Notice, PlayerId, PlayerSample, WorldId};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Reads a player's current validity and position.
///
/// Only meaningful on the simulation thread that owns the player.
pub trait PositionProvider {
    fn sample(&self, player: &PlayerId) -> PlayerSample;
}

/// Capabilities available to a task while it runs on a simulation thread.
pub trait WorldContext: PositionProvider {
    fn world_id(&self) -> &WorldId;

    /// Moves a player. Returns false when the player is not in this world or
    /// the destination belongs to another world.
    fn teleport(&mut self, player: &PlayerId, destination: &Location) -> bool;

    fn notify(&mut self, player: &PlayerId, notice: Notice);
}

pub type WorldTask = Box<dyn FnOnce(&mut dyn WorldContext) + Send + 'static>;

/// Schedules work onto the simulation thread of a world.
pub trait SimulationDispatcher: Send + Sync + 'static {
    fn dispatch(&self, world: &WorldId, task: WorldTask) -> Result<(), DispatchError>;
}

/// Dispatcher backed by one unbounded task queue per registered world.
///
/// Each world's loop (see [`crate::world::run_world`]) owns the receiving
/// end and drains it on its own task.
#[derive(Default)]
pub struct WorldRegistry {
    senders: RwLock<HashMap<WorldId, mpsc::UnboundedSender<WorldTask>>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a world and returns the queue its simulation loop must drain.
    /// Registering an existing world replaces its queue.
    pub fn register(&self, world: WorldId) -> mpsc::UnboundedReceiver<WorldTask> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut senders = self
            .senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if senders.insert(world.clone(), tx).is_some() {
            debug!("Replaced task queue for world {}", world);
        }
        rx
    }

    pub fn unregister(&self, world: &WorldId) {
        let mut senders = self
            .senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        senders.remove(world);
    }

    pub fn worlds(&self) -> Vec<WorldId> {
        let senders = self
            .senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        senders.keys().cloned().collect()
    }
}

impl SimulationDispatcher for WorldRegistry {
    fn dispatch(&self, world: &WorldId, task: WorldTask) -> Result<(), DispatchError> {
        let senders = self
            .senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = senders
            .get(world)
            .ok_or_else(|| DispatchError::UnknownWorld(world.clone()))?;
        sender
            .send(task)
            .map_err(|_| DispatchError::WorldClosed(world.clone()))
    }
}
