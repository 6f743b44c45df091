use clap::Parser;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use server::config::CoreConfig;
use server::dispatch::{SimulationDispatcher, WorldContext, WorldRegistry};
use server::error::TeleportError;
use server::services::CoreServices;
use server::warmup::WarmupStart;
use server::world::{spawn_world, WorldCommand, WorldState};
use shared::{Location, Notice, PlayerId, RequestKind, WorldId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

/// Main-method of the application.
/// Loads the config, starts one simulated world with a handful of wandering
/// players and drives them through warmups, requests, deaths and back
/// teleports until the run ends or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Path to the JSON config file (defaults are used when missing)
        #[clap(short, long, default_value = "essentials.json")]
        config: String,
        /// Tick rate of the simulated world (updates per second)
        #[clap(short, long, default_value = "20")]
        tick_rate: u32,
        /// Number of simulated players
        #[clap(short, long, default_value = "8")]
        players: usize,
        /// How long to run, in seconds
        #[clap(short, long, default_value = "60")]
        duration_secs: u64,
    }

    let args = Args::parse();
    let config = CoreConfig::load_or_default(&args.config)?;

    let default_level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // One world, reachable through the registry
    let registry = Arc::new(WorldRegistry::new());
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let world = spawn_world(
        &registry,
        WorldState::new(WorldId::default()),
        args.tick_rate,
        Some(notice_tx),
    );
    let notice_logger = tokio::spawn(log_notices(notice_rx));

    let services = Arc::new(CoreServices::new(config, registry.clone())?);
    services.start();

    let mut rng = StdRng::from_entropy();
    let mut simulation = Simulation {
        world: world.id.clone(),
        registry: Arc::clone(&registry),
        services: Arc::clone(&services),
        commands: world.commands.clone(),
        players: Vec::new(),
        dead: HashSet::new(),
    };
    for i in 0..args.players {
        simulation.join(format!("player{}", i + 1), &mut rng);
    }

    let mut step_timer = interval(Duration::from_secs(1));
    step_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let run_for = sleep(Duration::from_secs(args.duration_secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(run_for);
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = step_timer.tick() => simulation.step(&mut rng),
            _ = &mut run_for => {
                info!("Run finished after {}s", args.duration_secs);
                break;
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    for player in simulation.players.clone() {
        let history = services.player_left(player);
        debug!("{} left with {} back locations", player, history.len());
    }
    services.shutdown().await;

    let _ = world.commands.send(WorldCommand::Shutdown);
    match world.task.await {
        Ok(state) => info!("World {} stopped after {} ticks", state.id, state.tick),
        Err(e) => warn!("World task failed: {}", e),
    }
    notice_logger.abort();

    Ok(())
}

/// Prints every notice the world raises as JSON.
async fn log_notices(mut notices: mpsc::UnboundedReceiver<(PlayerId, Notice)>) {
    while let Some((player, notice)) = notices.recv().await {
        match serde_json::to_string(&notice) {
            Ok(json) => info!("-> {}: {}", player, json),
            Err(e) => warn!("Failed to encode notice for {}: {}", player, e),
        }
    }
}

/// Random walk of the demo players.
struct Simulation {
    world: WorldId,
    registry: Arc<WorldRegistry>,
    services: Arc<CoreServices>,
    commands: mpsc::UnboundedSender<WorldCommand>,
    players: Vec<PlayerId>,
    dead: HashSet<PlayerId>,
}

impl Simulation {
    fn join(&mut self, name: String, rng: &mut StdRng) {
        let id = PlayerId::new_random();
        let location = self.random_spot(rng, 50.0);
        self.send(WorldCommand::AddPlayer {
            id,
            name: name.clone(),
            location,
        });
        self.services.player_joined(id, &name, self.world.clone());
        self.players.push(id);
    }

    fn step(&mut self, rng: &mut StdRng) {
        let players = self.players.clone();
        for player in players {
            if self.dead.remove(&player) {
                // Respawn far from where they died
                let location = self.random_spot(rng, 500.0);
                self.send(WorldCommand::Respawn { id: player, location });
                continue;
            }

            let roll: f64 = rng.gen();
            if roll < 0.03 {
                self.dead.insert(player);
                self.send(WorldCommand::Kill { id: player });
            } else if roll < 0.10 {
                let destination = self.random_spot(rng, 200.0);
                let command = if rng.gen_bool(0.5) { "home" } else { "rtp" };
                self.run_command(player, command, move |services, ctx| {
                    services.teleport(ctx, player, command, destination)
                });
            } else if roll < 0.13 {
                self.run_command(player, "back", move |services, ctx| {
                    services.back(ctx, player)
                });
            } else if roll < 0.18 {
                self.request(player, rng);
            } else if roll < 0.25 {
                self.run_command(player, "tpaccept", move |services, ctx| {
                    services.accept_teleport(ctx, player, None)
                });
            } else if roll < 0.60 {
                // Stand still, which lets pending warmups finish
                self.send(WorldCommand::SetVelocity {
                    id: player,
                    velocity: (0.0, 0.0),
                });
            } else {
                let velocity = (rng.gen_range(-4.0..4.0), rng.gen_range(-4.0..4.0));
                self.send(WorldCommand::SetVelocity { id: player, velocity });
            }
        }
    }

    fn request(&self, requester: PlayerId, rng: &mut StdRng) {
        let Some(&target) = self.players.choose(rng) else {
            return;
        };
        let kind = if rng.gen_bool(0.5) {
            RequestKind::Direct
        } else {
            RequestKind::Reverse
        };
        if let Err(e) = self.services.request_teleport(requester, target, kind) {
            debug!("Request {} -> {} rejected: {}", requester, target, e);
        }
    }

    /// Runs a command on the world's simulation thread, the way a command
    /// handler would.
    fn run_command<F>(&self, player: PlayerId, label: &'static str, command: F)
    where
        F: FnOnce(&CoreServices, &mut dyn WorldContext) -> Result<WarmupStart, TeleportError>
            + Send
            + 'static,
    {
        let services = Arc::clone(&self.services);
        let result = self.registry.dispatch(
            &self.world,
            Box::new(move |ctx: &mut dyn WorldContext| match command(&services, ctx) {
                Ok(outcome) => debug!("{} for {}: {:?}", label, player, outcome),
                Err(e) => debug!("{} for {} rejected: {}", label, player, e),
            }),
        );
        if let Err(e) = result {
            warn!("Could not run {} for {}: {}", label, player, e);
        }
    }

    fn random_spot(&self, rng: &mut StdRng, radius: f64) -> Location {
        Location::new(
            self.world.clone(),
            rng.gen_range(-radius..radius),
            64.0,
            rng.gen_range(-radius..radius),
        )
    }

    fn send(&self, command: WorldCommand) {
        if self.commands.send(command).is_err() {
            warn!("World {} is no longer accepting commands", self.world);
        }
    }
}
