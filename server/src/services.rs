//! The five coordination components wired together
//!
//! [`CoreServices`] owns one instance of every per-player registry, starts
//! their background loops, mirrors player lifecycle events across all of them
//! and exposes the teleport flows command handlers call.

use crate::config::CoreConfig;
use crate::cooldown::{CommandKey, CooldownRegistry};
use crate::death::DeathRespawnDetector;
use crate::dispatch::{SimulationDispatcher, WorldContext};
use crate::error::{ConfigError, RequestError, TeleportError};
use crate::history::LocationHistoryStore;
use crate::requests::{PairedRequestBroker, TeleportRequest};
use crate::warmup::{WarmupAction, WarmupCoordinator, WarmupRequest, WarmupStart};
use dashmap::DashMap;
use log::{info, warn};
use shared::{Location, Notice, PlayerId, RequestKind, WorldId};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct OnlinePlayer {
    name: String,
    world: WorldId,
}

pub struct CoreServices {
    config: CoreConfig,
    cooldowns: Arc<CooldownRegistry>,
    history: Arc<LocationHistoryStore>,
    requests: Arc<PairedRequestBroker>,
    warmups: WarmupCoordinator,
    detector: Arc<DeathRespawnDetector>,
    online: DashMap<PlayerId, OnlinePlayer>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreServices {
    /// Builds the components from `config`, which is validated first.
    pub fn new(
        config: CoreConfig,
        dispatcher: Arc<dyn SimulationDispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let history = Arc::new(LocationHistoryStore::new(config.back.max_history));
        let detector = Arc::new(DeathRespawnDetector::new(
            Arc::clone(&history),
            Arc::clone(&dispatcher),
            &config.death,
        ));
        let warmups = WarmupCoordinator::new(
            dispatcher,
            config.warmup.movement_tolerance,
            config.warmup.check_interval(),
        );

        Ok(Self {
            cooldowns: Arc::new(CooldownRegistry::new()),
            history,
            requests: Arc::new(PairedRequestBroker::new(config.tpa.timeout())),
            warmups,
            detector,
            online: DashMap::new(),
            background: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &Arc<CooldownRegistry> {
        &self.cooldowns
    }

    pub fn history(&self) -> &Arc<LocationHistoryStore> {
        &self.history
    }

    pub fn requests(&self) -> &Arc<PairedRequestBroker> {
        &self.requests
    }

    pub fn warmups(&self) -> &WarmupCoordinator {
        &self.warmups
    }

    pub fn detector(&self) -> &Arc<DeathRespawnDetector> {
        &self.detector
    }

    /// Spawns the request sweep and the death poll.
    pub fn start(&self) {
        let sweeper = self.requests.spawn_sweeper(self.config.tpa.sweep_interval());
        let poller = self
            .detector
            .spawn_poller(self.config.death.initial_delay(), self.config.death.poll_interval());

        let mut background = self.background_tasks();
        background.push(sweeper);
        background.push(poller);
        info!("Core services started");
    }

    /// Cancels every warmup and stops the background loops, waiting at most
    /// the configured grace period for them to wind down.
    pub async fn shutdown(&self) {
        self.warmups.shutdown();

        let handles: Vec<JoinHandle<()>> = self.background_tasks().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        let grace = self.config.shutdown_grace();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!("Background tasks still running after {:?}", grace);
        }

        self.requests.clear();
        info!("Core services stopped");
    }

    pub fn player_joined(&self, player: PlayerId, name: &str, world: WorldId) {
        self.detector.track(player, world.clone());
        self.online.insert(
            player,
            OnlinePlayer {
                name: name.to_string(),
                world,
            },
        );
        info!("{} ({}) joined", name, player);
    }

    /// Drops every piece of per-player state. Returns the player's back
    /// history, newest first, so the caller can persist it.
    pub fn player_left(&self, player: PlayerId) -> Vec<Location> {
        let saved = self.history.history(player);

        self.detector.remove_player(player);
        self.warmups.cancel(player);
        self.requests.remove_player(player);
        self.cooldowns.clear_all(player);
        self.history.clear(player);

        if let Some((_, online)) = self.online.remove(&player) {
            info!("{} ({}) left", online.name, player);
        }
        saved
    }

    pub fn player_changed_world(&self, player: PlayerId, world: WorldId) {
        if let Some(mut online) = self.online.get_mut(&player) {
            online.world = world.clone();
        }
        self.detector.set_world(player, world);
        self.warmups.cancel(player);
    }

    pub fn is_online(&self, player: PlayerId) -> bool {
        self.online.contains_key(&player)
    }

    pub fn world_of(&self, player: PlayerId) -> Option<WorldId> {
        self.online.get(&player).map(|online| online.world.clone())
    }

    /// Teleports a player after the command's warmup, unless the command is
    /// on cooldown. On completion the location being left is pushed onto the
    /// back history and the cooldown starts.
    pub fn teleport(
        &self,
        ctx: &mut dyn WorldContext,
        player: PlayerId,
        command: &str,
        destination: Location,
    ) -> Result<WarmupStart, TeleportError> {
        let key = CommandKey::parse(command)?;
        self.check_cooldown(ctx, player, &key)?;
        self.start_teleport(ctx, player, key, destination, true, None)
    }

    /// Returns the player to their newest back location. That entry is only
    /// consumed once the warmup completes; anything recorded meanwhile stays.
    pub fn back(
        &self,
        ctx: &mut dyn WorldContext,
        player: PlayerId,
    ) -> Result<WarmupStart, TeleportError> {
        let key = CommandKey::parse("back")?;
        self.check_cooldown(ctx, player, &key)?;
        let destination = self.history.peek(player).ok_or(TeleportError::NoHistory)?;

        let history = Arc::clone(&self.history);
        let used = destination.clone();
        let consume: Box<dyn FnOnce() + Send> = Box::new(move || {
            history.remove(player, &used);
        });
        self.start_teleport(ctx, player, key, destination, false, Some(consume))
    }

    pub fn request_teleport(
        &self,
        requester: PlayerId,
        target: PlayerId,
        kind: RequestKind,
    ) -> Result<TeleportRequest, TeleportError> {
        let requester_name = self.name_of(requester)?;
        let target_name = self.name_of(target)?;
        let request = self
            .requests
            .create_request(requester, &requester_name, target, &target_name, kind)?;
        Ok(request)
    }

    /// Resolves a request addressed to `target` (the newest one, or the one
    /// from `requester`) and starts the warmup for whoever travels. Must run
    /// on the world both players are in.
    pub fn accept_teleport(
        &self,
        ctx: &mut dyn WorldContext,
        target: PlayerId,
        requester: Option<PlayerId>,
    ) -> Result<WarmupStart, TeleportError> {
        let request = match requester {
            Some(requester) => self.requests.accept_from(target, requester)?,
            None => self
                .requests
                .accept_request(target)
                .ok_or(RequestError::NoPendingRequest)?,
        };

        let traveller = request.traveller();
        let destination = ctx
            .sample(&request.anchor())
            .position()
            .cloned()
            .ok_or(TeleportError::PlayerUnavailable)?;

        let command = match request.kind {
            RequestKind::Direct => "tpa",
            RequestKind::Reverse => "tpahere",
        };
        let key = CommandKey::parse(command)?;
        self.start_teleport(ctx, traveller, key, destination, true, None)
    }

    pub fn deny_teleport(
        &self,
        target: PlayerId,
        requester: Option<PlayerId>,
    ) -> Result<TeleportRequest, TeleportError> {
        let request = match requester {
            Some(requester) => self.requests.deny_from(target, requester)?,
            None => self
                .requests
                .deny_request(target)
                .ok_or(RequestError::NoPendingRequest)?,
        };
        Ok(request)
    }

    fn name_of(&self, player: PlayerId) -> Result<String, TeleportError> {
        self.online
            .get(&player)
            .map(|online| online.name.clone())
            .ok_or(TeleportError::PlayerUnavailable)
    }

    fn check_cooldown(
        &self,
        ctx: &mut dyn WorldContext,
        player: PlayerId,
        key: &CommandKey,
    ) -> Result<(), TeleportError> {
        let seconds = self.cooldowns.remaining(key, player);
        if seconds == 0 {
            return Ok(());
        }
        ctx.notify(
            &player,
            Notice::OnCooldown {
                command: key.to_string(),
                seconds,
            },
        );
        Err(TeleportError::OnCooldown {
            command: key.to_string(),
            seconds,
        })
    }

    fn start_teleport(
        &self,
        ctx: &mut dyn WorldContext,
        player: PlayerId,
        key: CommandKey,
        destination: Location,
        remember_origin: bool,
        before_teleport: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<WarmupStart, TeleportError> {
        let sample = ctx.sample(&player);
        if !sample.valid {
            return Err(TeleportError::PlayerUnavailable);
        }

        let timing = self.config.timing(key.as_str());
        let history = Arc::clone(&self.history);
        let cooldowns = Arc::clone(&self.cooldowns);
        let action_key = key.clone();

        let action: WarmupAction = Box::new(move |ctx: &mut dyn WorldContext| {
            let origin = ctx.sample(&player).position().cloned();
            if let Some(before) = before_teleport {
                before();
            }
            if !ctx.teleport(&player, &destination) {
                warn!("Teleport of {} to {} failed", player, destination);
                return;
            }
            if remember_origin {
                if let Some(origin) = origin {
                    history.push(player, origin);
                }
            }
            cooldowns.set_cooldown(&action_key, player, timing.cooldown_seconds);
        });

        let request = WarmupRequest {
            player,
            command: key.to_string(),
            start_position: sample.position().cloned(),
            seconds: timing.warmup_seconds,
            silent: timing.silent,
        };
        Ok(self.warmups.start(ctx, request, action))
    }

    fn background_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
