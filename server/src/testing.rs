//! Scripted simulation doubles for unit tests

use crate::dispatch::{PositionProvider, SimulationDispatcher, WorldContext, WorldTask};
use crate::error::DispatchError;
use shared::{Location, Notice, PlayerId, PlayerSample, WorldId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// World whose samples are set directly by the test.
pub(crate) struct ScriptedWorld {
    pub id: WorldId,
    pub samples: HashMap<PlayerId, PlayerSample>,
    pub notices: Vec<(PlayerId, Notice)>,
    pub teleports: Vec<(PlayerId, Location)>,
}

impl ScriptedWorld {
    pub fn new() -> Self {
        Self {
            id: WorldId::default(),
            samples: HashMap::new(),
            notices: Vec::new(),
            teleports: Vec::new(),
        }
    }

    pub fn place(&mut self, player: PlayerId, x: f64, y: f64, z: f64) {
        let location = Location::new(self.id.clone(), x, y, z);
        self.samples.insert(player, PlayerSample::at(location));
    }

    pub fn set(&mut self, player: PlayerId, sample: PlayerSample) {
        self.samples.insert(player, sample);
    }

    pub fn notices_for(&self, player: PlayerId) -> Vec<Notice> {
        self.notices
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

impl PositionProvider for ScriptedWorld {
    fn sample(&self, player: &PlayerId) -> PlayerSample {
        self.samples
            .get(player)
            .cloned()
            .unwrap_or_else(PlayerSample::invalid)
    }
}

impl WorldContext for ScriptedWorld {
    fn world_id(&self) -> &WorldId {
        &self.id
    }

    fn teleport(&mut self, player: &PlayerId, destination: &Location) -> bool {
        if !self.sample(player).valid || destination.world != self.id {
            return false;
        }
        self.samples
            .insert(*player, PlayerSample::at(destination.clone()));
        self.teleports.push((*player, destination.clone()));
        true
    }

    fn notify(&mut self, player: &PlayerId, notice: Notice) {
        self.notices.push((*player, notice));
    }
}

/// Runs every task immediately against the shared scripted world.
pub(crate) struct InlineDispatcher {
    pub world: Arc<Mutex<ScriptedWorld>>,
    pub dispatched: AtomicUsize,
}

impl InlineDispatcher {
    pub fn new(world: ScriptedWorld) -> Arc<Self> {
        Arc::new(Self {
            world: Arc::new(Mutex::new(world)),
            dispatched: AtomicUsize::new(0),
        })
    }

    /// Runs `f` with the world locked. Must not be held across an await.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut ScriptedWorld) -> R) -> R {
        let mut world = self.world.lock().unwrap();
        f(&mut world)
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

impl SimulationDispatcher for InlineDispatcher {
    fn dispatch(&self, world: &WorldId, task: WorldTask) -> Result<(), DispatchError> {
        let mut guard = self.world.lock().unwrap();
        if guard.id != *world {
            return Err(DispatchError::UnknownWorld(world.clone()));
        }
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        task(&mut *guard);
        Ok(())
    }
}

/// Dispatcher whose world has gone away.
pub(crate) struct ClosedDispatcher;

impl SimulationDispatcher for ClosedDispatcher {
    fn dispatch(&self, world: &WorldId, _task: WorldTask) -> Result<(), DispatchError> {
        Err(DispatchError::WorldClosed(world.clone()))
    }
}
