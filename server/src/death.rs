//! Death inference from position polling
//!
//! The host gives no dependable "player died" signal, so deaths are inferred
//! from what can be observed every poll: whether the player is currently
//! resolvable, and where they stand. Two patterns count as a death:
//!
//! - the player was valid last cycle and is invalid now, meaning the entity
//!   went away (the usual death screen). The last settled position is
//!   recorded;
//! - two consecutive samples are further apart than the respawn distance,
//!   meaning the player was put back at a spawn point. The position before
//!   the jump is recorded.
//!
//! Once a death has been recorded nothing else is recorded until the player
//! is seen standing still again. Both rules are heuristics and will misfire
//! close to their thresholds: an ordinary long-range teleport looks exactly
//! like a respawn.

use crate::config::DeathConfig;
use crate::dispatch::{SimulationDispatcher, WorldContext};
use crate::history::LocationHistoryStore;
use crate::utils::timer_period;
use dashmap::DashMap;
use log::{debug, info};
use shared::{Location, Notice, PlayerId, PlayerSample, WorldId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Distance cutoffs used by [`PlayerMotionState::observe`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    /// Jumps further than this between two samples are treated as a respawn.
    pub respawn_distance: f64,
    /// Movement below this between two samples means the player has settled.
    pub stability_distance: f64,
}

impl From<&DeathConfig> for DetectionThresholds {
    fn from(config: &DeathConfig) -> Self {
        Self {
            respawn_distance: config.respawn_distance,
            stability_distance: config.stability_distance,
        }
    }
}

/// What the detector remembers about one player between polls.
#[derive(Debug, Clone)]
pub struct PlayerMotionState {
    pub world: WorldId,
    pub last_known: Option<Location>,
    pub stable: Option<Location>,
    pub was_valid: bool,
    pub death_location_saved: bool,
}

impl PlayerMotionState {
    pub fn new(world: WorldId) -> Self {
        Self {
            world,
            last_known: None,
            stable: None,
            was_valid: false,
            death_location_saved: false,
        }
    }

    /// Feeds one sample through the state machine and returns the death
    /// location to record, if this sample completes a death.
    pub fn observe(
        &mut self,
        sample: &PlayerSample,
        thresholds: &DetectionThresholds,
    ) -> Option<Location> {
        let mut death = None;

        if self.was_valid && !sample.valid && !self.death_location_saved {
            if let Some(stable) = &self.stable {
                death = Some(stable.clone());
                self.death_location_saved = true;
            }
        }
        self.was_valid = sample.valid;

        let current = sample.position()?;

        match &self.last_known {
            Some(previous) => {
                let moved = previous.distance(current);
                if moved > thresholds.respawn_distance {
                    if !self.death_location_saved {
                        death = Some(previous.clone());
                        self.death_location_saved = true;
                    }
                    self.stable = Some(current.clone());
                } else if moved < thresholds.stability_distance {
                    self.stable = Some(current.clone());
                    self.death_location_saved = false;
                }
            }
            None => self.stable = Some(current.clone()),
        }
        self.last_known = Some(current.clone());

        death
    }

    /// Forgets positions, e.g. after the player changed worlds.
    fn reset(&mut self, world: WorldId) {
        *self = Self::new(world);
    }
}

pub struct DeathRespawnDetector {
    states: DashMap<PlayerId, PlayerMotionState>,
    history: Arc<LocationHistoryStore>,
    dispatcher: Arc<dyn SimulationDispatcher>,
    thresholds: DetectionThresholds,
    record_deaths: bool,
}

impl DeathRespawnDetector {
    pub fn new(
        history: Arc<LocationHistoryStore>,
        dispatcher: Arc<dyn SimulationDispatcher>,
        config: &DeathConfig,
    ) -> Self {
        Self {
            states: DashMap::new(),
            history,
            dispatcher,
            thresholds: DetectionThresholds::from(config),
            record_deaths: config.enabled,
        }
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        self.thresholds
    }

    /// Starts watching a player. Tracking an already tracked player keeps its
    /// state.
    pub fn track(&self, player: PlayerId, world: WorldId) {
        self.states
            .entry(player)
            .or_insert_with(|| PlayerMotionState::new(world));
    }

    /// Moves a tracked player to another world and forgets their positions,
    /// so the world change is not mistaken for a respawn.
    pub fn set_world(&self, player: PlayerId, world: WorldId) {
        match self.states.get_mut(&player) {
            Some(mut state) => state.reset(world),
            None => {
                self.states.insert(player, PlayerMotionState::new(world));
            }
        }
    }

    pub fn remove_player(&self, player: PlayerId) {
        self.states.remove(&player);
    }

    pub fn is_tracked(&self, player: PlayerId) -> bool {
        self.states.contains_key(&player)
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    /// Settled position if there is one, otherwise the last sampled one.
    pub fn last_known_position(&self, player: PlayerId) -> Option<Location> {
        self.states
            .get(&player)
            .and_then(|state| state.stable.clone().or_else(|| state.last_known.clone()))
    }

    /// Records a death reported by a caller that knows for sure, bypassing
    /// the heuristic. Suppresses inference until the player settles again.
    pub fn record_death(&self, player: PlayerId, location: Location) {
        if let Some(mut state) = self.states.get_mut(&player) {
            state.death_location_saved = true;
        }
        if self.record_deaths {
            info!("Recorded death of {} at {}", player, location);
            self.history.push_death(player, location);
        }
    }

    /// Posts one sampling task per world that has tracked players. Returns
    /// how many worlds were reached.
    pub fn poll_once(self: &Arc<Self>) -> usize {
        let mut by_world: HashMap<WorldId, Vec<PlayerId>> = HashMap::new();
        for entry in self.states.iter() {
            by_world
                .entry(entry.world.clone())
                .or_default()
                .push(*entry.key());
        }

        let mut reached = 0;
        for (world, players) in by_world {
            let detector = Arc::clone(self);
            let result = self.dispatcher.dispatch(
                &world,
                Box::new(move |ctx: &mut dyn WorldContext| detector.poll_world(ctx, &players)),
            );
            match result {
                Ok(()) => reached += 1,
                Err(e) => debug!("Death poll skipped for {}: {}", world, e),
            }
        }
        reached
    }

    pub fn spawn_poller(self: &Arc<Self>, initial_delay: Duration, every: Duration) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        let every = timer_period(every);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                detector.poll_once();
            }
        })
    }

    /// One poll cycle for a world, run on its simulation thread.
    fn poll_world(&self, ctx: &mut dyn WorldContext, players: &[PlayerId]) {
        for player in players {
            let sample = ctx.sample(player);

            let death = match self.states.get_mut(player) {
                // Changed worlds since this task was posted
                Some(state) if state.world != *ctx.world_id() => None,
                Some(mut state) => state.observe(&sample, &self.thresholds),
                None => None,
            };

            if let Some(location) = death {
                self.emit(ctx, *player, location);
            }
        }
    }

    fn emit(&self, ctx: &mut dyn WorldContext, player: PlayerId, location: Location) {
        if !self.record_deaths {
            debug!("Inferred death of {} at {} (not recorded)", player, location);
            return;
        }
        info!("Inferred death of {} at {}", player, location);
        self.history.push_death(player, location.clone());
        ctx.notify(&player, Notice::DeathLocationSaved { location });
    }
}
