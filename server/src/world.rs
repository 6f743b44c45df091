//! In-process authoritative world
//!
//! A minimal host simulation: players with a location, an alive flag and a
//! velocity, advanced at a fixed tick rate. Its loop is the only place that
//! touches the state, draining both host events ([`WorldCommand`]) and tasks
//! posted through the [`WorldRegistry`] in arrival order.

use crate::dispatch::{PositionProvider, WorldContext, WorldRegistry, WorldTask};
use log::{debug, info, warn};
use shared::{Location, Notice, PlayerId, PlayerSample, WorldId};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: PlayerId,
    pub name: String,
    pub location: Location,
    pub alive: bool,
    /// Horizontal velocity in blocks per second (x, z)
    pub velocity: (f64, f64),
}

impl PlayerEntity {
    pub fn new(id: PlayerId, name: impl Into<String>, location: Location) -> Self {
        Self {
            id,
            name: name.into(),
            location,
            alive: true,
            velocity: (0.0, 0.0),
        }
    }
}

/// Host-side events applied by the world loop.
#[derive(Debug)]
pub enum WorldCommand {
    AddPlayer {
        id: PlayerId,
        name: String,
        location: Location,
    },
    RemovePlayer {
        id: PlayerId,
    },
    SetVelocity {
        id: PlayerId,
        velocity: (f64, f64),
    },
    /// Entity is removed from the simulation until it respawns
    Kill {
        id: PlayerId,
    },
    Respawn {
        id: PlayerId,
        location: Location,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WorldState {
    pub id: WorldId,
    pub tick: u64,
    pub players: HashMap<PlayerId, PlayerEntity>,
    outbox: Vec<(PlayerId, Notice)>,
}

impl WorldState {
    pub fn new(id: WorldId) -> Self {
        Self {
            id,
            tick: 0,
            players: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn add_player(&mut self, id: PlayerId, name: impl Into<String>, location: Location) {
        let player = PlayerEntity::new(id, name, location);
        info!(
            "Added player {} ({}) at {}",
            player.name, id, player.location
        );
        self.players.insert(id, player);
    }

    pub fn remove_player(&mut self, id: &PlayerId) -> Option<PlayerEntity> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    pub fn set_velocity(&mut self, id: &PlayerId, velocity: (f64, f64)) {
        if let Some(player) = self.players.get_mut(id) {
            player.velocity = velocity;
        }
    }

    pub fn kill(&mut self, id: &PlayerId) {
        if let Some(player) = self.players.get_mut(id) {
            player.alive = false;
            player.velocity = (0.0, 0.0);
            debug!("Player {} died at {}", id, player.location);
        }
    }

    pub fn respawn(&mut self, id: &PlayerId, location: Location) {
        if let Some(player) = self.players.get_mut(id) {
            player.alive = true;
            player.location = location;
            debug!("Player {} respawned at {}", id, player.location);
        }
    }

    pub fn update_positions(&mut self, dt: f64) {
        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }
            player.location.x += player.velocity.0 * dt;
            player.location.z += player.velocity.1 * dt;
        }
    }

    pub fn apply(&mut self, command: WorldCommand) {
        match command {
            WorldCommand::AddPlayer { id, name, location } => {
                self.add_player(id, name, location);
            }
            WorldCommand::RemovePlayer { id } => {
                self.remove_player(&id);
            }
            WorldCommand::SetVelocity { id, velocity } => {
                self.set_velocity(&id, velocity);
            }
            WorldCommand::Kill { id } => {
                self.kill(&id);
            }
            WorldCommand::Respawn { id, location } => {
                self.respawn(&id, location);
            }
            WorldCommand::Shutdown => {}
        }
    }

    /// Notices raised since the last drain, in order.
    pub fn drain_notices(&mut self) -> Vec<(PlayerId, Notice)> {
        std::mem::take(&mut self.outbox)
    }
}

impl PositionProvider for WorldState {
    fn sample(&self, player: &PlayerId) -> PlayerSample {
        match self.players.get(player) {
            Some(entity) if entity.alive => PlayerSample::at(entity.location.clone()),
            _ => PlayerSample::invalid(),
        }
    }
}

impl WorldContext for WorldState {
    fn world_id(&self) -> &WorldId {
        &self.id
    }

    fn teleport(&mut self, player: &PlayerId, destination: &Location) -> bool {
        if destination.world != self.id {
            warn!(
                "Refusing to move {} to {}: destination is outside world {}",
                player, destination, self.id
            );
            return false;
        }

        match self.players.get_mut(player) {
            Some(entity) if entity.alive => {
                entity.location = destination.clone();
                entity.velocity = (0.0, 0.0);
                self.outbox.push((
                    *player,
                    Notice::Teleported {
                        destination: destination.clone(),
                    },
                ));
                true
            }
            _ => false,
        }
    }

    fn notify(&mut self, player: &PlayerId, notice: Notice) {
        self.outbox.push((*player, notice));
    }
}

/// Channels and task of a world started with [`spawn_world`].
pub struct WorldHandle {
    pub id: WorldId,
    pub commands: mpsc::UnboundedSender<WorldCommand>,
    pub task: JoinHandle<WorldState>,
}

/// Registers `state` with the dispatcher and runs its loop on a new task.
///
/// Notices raised in the world are forwarded to `notices` when given and
/// logged otherwise.
pub fn spawn_world(
    registry: &WorldRegistry,
    state: WorldState,
    tick_rate: u32,
    notices: Option<mpsc::UnboundedSender<(PlayerId, Notice)>>,
) -> WorldHandle {
    let id = state.id.clone();
    let tasks = registry.register(id.clone());
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(run_world(state, tasks, commands_rx, tick_rate, notices));

    WorldHandle {
        id,
        commands: commands_tx,
        task,
    }
}

/// Runs the world loop until its task queue closes or it receives
/// [`WorldCommand::Shutdown`], then returns the final state.
pub async fn run_world(
    mut state: WorldState,
    mut tasks: mpsc::UnboundedReceiver<WorldTask>,
    mut commands: mpsc::UnboundedReceiver<WorldCommand>,
    tick_rate: u32,
    notices: Option<mpsc::UnboundedSender<(PlayerId, Notice)>>,
) -> WorldState {
    let tick_rate = tick_rate.max(1);
    let mut interval_timer = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_update = Instant::now();
    let mut commands_open = true;

    // Cap the maximum delta time to 50ms
    let max_delta_time = 1.0 / 20.0;

    info!("World {} running at {}Hz", state.id, tick_rate);

    loop {
        tokio::select! {
            task = tasks.recv() => {
                match task {
                    Some(task) => task(&mut state),
                    None => {
                        info!("Task queue for world {} closed", state.id);
                        break;
                    }
                }
            }

            command = commands.recv(), if commands_open => {
                match command {
                    Some(WorldCommand::Shutdown) => {
                        info!("World {} shutting down", state.id);
                        break;
                    }
                    Some(command) => state.apply(command),
                    None => commands_open = false,
                }
            }

            _ = interval_timer.tick() => {
                let current_time = Instant::now();
                let mut delta_time = (current_time - last_update).as_secs_f64();
                last_update = current_time;

                if delta_time > max_delta_time {
                    debug!(
                        "Large delta time detected ({:.3}s), capping to {:.3}s",
                        delta_time, max_delta_time
                    );
                    delta_time = max_delta_time;
                }

                state.update_positions(delta_time);
                state.tick += 1;
            }
        }

        flush_notices(&mut state, notices.as_ref());
    }

    flush_notices(&mut state, notices.as_ref());
    state
}

fn flush_notices(
    state: &mut WorldState,
    sink: Option<&mpsc::UnboundedSender<(PlayerId, Notice)>>,
) {
    for (player, notice) in state.drain_notices() {
        match sink {
            Some(sink) => {
                if sink.send((player, notice)).is_err() {
                    debug!("Notice sink for world {} closed", state.id);
                }
            }
            None => info!("[{}] -> {}: {:?}", state.id, player, notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SimulationDispatcher;
    use assert_approx_eq::assert_approx_eq;

    fn loc(world: &WorldState, x: f64, z: f64) -> Location {
        Location::new(world.id.clone(), x, 64.0, z)
    }

    #[test]
    fn test_world_creation() {
        let world = WorldState::new(WorldId::default());
        assert_eq!(world.tick, 0);
        assert!(world.players.is_empty());
    }

    #[test]
    fn test_sample_reflects_lifecycle() {
        let mut world = WorldState::new(WorldId::default());
        let id = PlayerId::new_random();
        assert!(!world.sample(&id).valid);

        let spawn = loc(&world, 1.0, 2.0);
        world.add_player(id, "alice", spawn.clone());
        assert_eq!(world.sample(&id), PlayerSample::at(spawn));

        world.kill(&id);
        assert_eq!(world.sample(&id), PlayerSample::invalid());

        let respawn = loc(&world, 100.0, 100.0);
        world.respawn(&id, respawn.clone());
        assert_eq!(world.sample(&id).position(), Some(&respawn));

        world.remove_player(&id);
        assert!(!world.sample(&id).valid);
    }

    #[test]
    fn test_update_positions_moves_living_players() {
        let mut world = WorldState::new(WorldId::default());
        let alive = PlayerId::new_random();
        let dead = PlayerId::new_random();
        world.add_player(alive, "alive", loc(&world, 0.0, 0.0));
        world.add_player(dead, "dead", loc(&world, 0.0, 0.0));
        world.set_velocity(&alive, (4.0, -2.0));
        world.set_velocity(&dead, (4.0, -2.0));
        world.kill(&dead);

        world.update_positions(0.5);

        let moved = &world.players[&alive].location;
        assert_approx_eq!(moved.x, 2.0, 1e-9);
        assert_approx_eq!(moved.z, -1.0, 1e-9);
        assert_approx_eq!(world.players[&dead].location.x, 0.0, 1e-9);
    }

    #[test]
    fn test_teleport_within_world() {
        let mut world = WorldState::new(WorldId::default());
        let id = PlayerId::new_random();
        world.add_player(id, "alice", loc(&world, 0.0, 0.0));
        world.set_velocity(&id, (1.0, 1.0));

        let destination = loc(&world, 50.0, 50.0);
        assert!(world.teleport(&id, &destination));
        assert_eq!(world.players[&id].location, destination);
        assert_eq!(world.players[&id].velocity, (0.0, 0.0));

        let notices = world.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0].1, Notice::Teleported { .. }));
        assert!(world.drain_notices().is_empty());
    }

    #[test]
    fn test_teleport_rejects_other_world_and_dead_players() {
        let mut world = WorldState::new(WorldId::default());
        let id = PlayerId::new_random();
        world.add_player(id, "alice", loc(&world, 0.0, 0.0));

        let elsewhere = Location::new(WorldId::new("nether"), 0.0, 64.0, 0.0);
        assert!(!world.teleport(&id, &elsewhere));

        world.kill(&id);
        let destination = loc(&world, 5.0, 5.0);
        assert!(!world.teleport(&id, &destination));
        assert!(!world.teleport(&PlayerId::new_random(), &destination));
    }

    #[test]
    fn test_apply_commands() {
        let mut world = WorldState::new(WorldId::default());
        let id = PlayerId::new_random();
        let spawn = loc(&world, 0.0, 0.0);

        world.apply(WorldCommand::AddPlayer {
            id,
            name: "alice".to_string(),
            location: spawn,
        });
        world.apply(WorldCommand::SetVelocity {
            id,
            velocity: (2.0, 0.0),
        });
        assert_eq!(world.players[&id].velocity, (2.0, 0.0));

        world.apply(WorldCommand::Kill { id });
        assert!(!world.players[&id].alive);

        world.apply(WorldCommand::RemovePlayer { id });
        assert!(world.players.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_world_loop_runs_dispatched_tasks() {
        let registry = WorldRegistry::new();
        let id = PlayerId::new_random();
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

        let handle = spawn_world(
            &registry,
            WorldState::new(WorldId::default()),
            20,
            Some(notice_tx),
        );
        handle
            .commands
            .send(WorldCommand::AddPlayer {
                id,
                name: "alice".to_string(),
                location: Location::new(WorldId::default(), 0.0, 64.0, 0.0),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let destination = Location::new(WorldId::default(), 10.0, 64.0, 10.0);
        let target = destination.clone();
        registry
            .dispatch(
                &WorldId::default(),
                Box::new(move |ctx: &mut dyn WorldContext| {
                    assert!(ctx.teleport(&id, &target));
                }),
            )
            .unwrap();

        let (player, notice) = notice_rx.recv().await.unwrap();
        assert_eq!(player, id);
        assert_eq!(notice, Notice::Teleported { destination: destination.clone() });

        handle.commands.send(WorldCommand::Shutdown).unwrap();
        let state = handle.task.await.unwrap();
        assert_eq!(state.players[&id].location, destination);
        assert!(state.tick > 0);
    }
}
