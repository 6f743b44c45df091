//! Stand-still warmups before a deferred action
//!
//! A player asks for something that should only happen after standing still
//! for a few seconds (usually a teleport). Each warmup is a session with two
//! timers on the runtime:
//!
//! - a movement check firing every `check_interval`, which posts a recheck to
//!   the player's simulation thread where the position is sampled and
//!   compared against the start position;
//! - a completion timer firing once at the deadline, which posts the
//!   completion to the simulation thread.
//!
//! Both rechecks run as world tasks and verify that the session id they were
//! scheduled for is still the one registered for the player before doing
//! anything. Cancellation only stops future timer firings, so a task posted
//! just before a cancel or a replacement finds a different (or no) session and
//! does nothing. Removing the session from the map is the single point that
//! decides which of completion, cancellation or replacement wins.

use crate::dispatch::{SimulationDispatcher, WorldContext};
use crate::utils::{deadline_after, seconds_until, timer_period};
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::{Location, Notice, PlayerId, WorldId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// Action executed on the simulation thread once a warmup completes.
pub type WarmupAction = Box<dyn FnOnce(&mut dyn WorldContext) + Send + 'static>;

#[derive(Debug, Clone)]
pub struct WarmupRequest {
    pub player: PlayerId,
    /// Command name, used for notices and logs
    pub command: String,
    /// Where the player stood when the command ran; `None` when unknown
    pub start_position: Option<Location>,
    pub seconds: u32,
    /// Suppress countdown notices
    pub silent: bool,
}

/// How [`WarmupCoordinator::start`] disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupStart {
    /// No warmup was needed and the action already ran.
    Immediate,
    /// A session is now active.
    Started { session: u64 },
}

struct WarmupSession {
    id: u64,
    command: String,
    world: WorldId,
    start_position: Location,
    deadline: Instant,
    last_announced: u32,
    silent: bool,
    on_complete: Mutex<Option<WarmupAction>>,
    movement_check: Option<JoinHandle<()>>,
    completion: Option<JoinHandle<()>>,
}

impl WarmupSession {
    fn abort_timers(&mut self) {
        if let Some(handle) = self.movement_check.take() {
            handle.abort();
        }
        if let Some(handle) = self.completion.take() {
            handle.abort();
        }
    }
}

struct Inner {
    sessions: DashMap<PlayerId, WarmupSession>,
    dispatcher: Arc<dyn SimulationDispatcher>,
    movement_tolerance: f64,
    check_interval: Duration,
    next_id: AtomicU64,
}

/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct WarmupCoordinator {
    inner: Arc<Inner>,
}

impl WarmupCoordinator {
    pub fn new(
        dispatcher: Arc<dyn SimulationDispatcher>,
        movement_tolerance: f64,
        check_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                dispatcher,
                movement_tolerance,
                check_interval,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Starts a warmup for `request.player`, replacing any session they
    /// already have.
    ///
    /// Must be called on the simulation thread of the player's world, which
    /// is what `ctx` stands for. When no warmup is needed (zero seconds or no
    /// known start position) `on_complete` runs right here, synchronously.
    pub fn start(
        &self,
        ctx: &mut dyn WorldContext,
        request: WarmupRequest,
        on_complete: WarmupAction,
    ) -> WarmupStart {
        let player = request.player;
        if self.inner.discard(player) {
            debug!("Replaced pending warmup for {}", player);
        }

        let start_position = match request.start_position {
            Some(position) if request.seconds > 0 => position,
            Some(_) => {
                on_complete(ctx);
                return WarmupStart::Immediate;
            }
            None => {
                warn!(
                    "Missing start position for {} ({}), executing immediately",
                    player, request.command
                );
                on_complete(ctx);
                return WarmupStart::Immediate;
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = deadline_after(Instant::now(), request.seconds);
        let world = ctx.world_id().clone();

        info!(
            "Starting {}s warmup for {} ({})",
            request.seconds, player, request.command
        );

        self.inner.sessions.insert(
            player,
            WarmupSession {
                id,
                command: request.command.clone(),
                world: world.clone(),
                start_position,
                deadline,
                last_announced: request.seconds,
                silent: request.silent,
                on_complete: Mutex::new(Some(on_complete)),
                movement_check: None,
                completion: None,
            },
        );

        let movement_check = spawn_movement_check(
            Arc::downgrade(&self.inner),
            world.clone(),
            player,
            id,
        );
        let completion = spawn_completion(Arc::downgrade(&self.inner), world, player, id, deadline);

        match self.inner.sessions.get_mut(&player) {
            Some(mut session) if session.id == id => {
                session.movement_check = Some(movement_check);
                session.completion = Some(completion);
            }
            _ => {
                // Cancelled between insert and here
                movement_check.abort();
                completion.abort();
            }
        }

        if !request.silent {
            ctx.notify(
                &player,
                Notice::WarmupStarted {
                    command: request.command,
                    seconds: request.seconds,
                },
            );
        }

        WarmupStart::Started { session: id }
    }

    /// Cancels the player's warmup, if any. Returns whether one was active.
    pub fn cancel(&self, player: PlayerId) -> bool {
        let cancelled = self.inner.discard(player);
        if cancelled {
            info!("Cancelled warmup for {}", player);
        }
        cancelled
    }

    pub fn has_active(&self, player: PlayerId) -> bool {
        self.inner.sessions.contains_key(&player)
    }

    /// Whole seconds until the player's warmup completes.
    pub fn remaining_seconds(&self, player: PlayerId) -> Option<u32> {
        self.inner
            .sessions
            .get(&player)
            .map(|session| seconds_until(session.deadline, Instant::now()))
    }

    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Cancels every session and stops their timers.
    pub fn shutdown(&self) {
        let players: Vec<PlayerId> = self
            .inner
            .sessions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let mut cancelled = 0;
        for player in players {
            if self.inner.discard(player) {
                cancelled += 1;
            }
        }
        info!("Warmups stopped ({} cancelled)", cancelled);
    }
}

impl Inner {
    /// Removes the player's session and stops its timers.
    fn discard(&self, player: PlayerId) -> bool {
        match self.sessions.remove(&player) {
            Some((_, mut session)) => {
                session.abort_timers();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, player: PlayerId, id: u64) -> bool {
        self.sessions
            .get(&player)
            .map(|session| session.id == id)
            .unwrap_or(false)
    }

    fn remove_current(&self, player: PlayerId, id: u64) -> Option<WarmupSession> {
        self.sessions
            .remove_if(&player, |_, session| session.id == id)
            .map(|(_, session)| session)
    }

    fn has_moved(&self, start: &Location, current: &Location) -> bool {
        start.distance(current) > self.movement_tolerance
    }

    /// Movement recheck, run on the simulation thread.
    fn check_movement(&self, ctx: &mut dyn WorldContext, player: PlayerId, id: u64) {
        let (start, deadline) = match self.sessions.get(&player) {
            Some(session) if session.id == id => {
                (session.start_position.clone(), session.deadline)
            }
            _ => return,
        };

        let sample = ctx.sample(&player);
        let current = match sample.position() {
            Some(current) => current.clone(),
            None => {
                debug!("No position for {} this cycle, skipping warmup check", player);
                return;
            }
        };

        if self.has_moved(&start, &current) {
            if let Some(mut session) = self.remove_current(player, id) {
                session.abort_timers();
                info!("Warmup for {} ({}) cancelled: player moved", player, session.command);
                ctx.notify(
                    &player,
                    Notice::WarmupCancelled {
                        command: session.command,
                    },
                );
            }
            return;
        }

        let remaining = seconds_until(deadline, Instant::now());
        if remaining == 0 {
            return;
        }

        let announce = match self.sessions.get_mut(&player) {
            Some(mut session) if session.id == id => {
                if session.silent || session.last_announced == remaining {
                    None
                } else {
                    session.last_announced = remaining;
                    Some(session.command.clone())
                }
            }
            _ => None,
        };

        if let Some(command) = announce {
            ctx.notify(
                &player,
                Notice::WarmupCountdown {
                    command,
                    seconds: remaining,
                },
            );
        }
    }

    /// Completion recheck, run on the simulation thread.
    fn complete(&self, ctx: &mut dyn WorldContext, player: PlayerId, id: u64) {
        let mut session = match self.remove_current(player, id) {
            Some(session) => session,
            None => {
                debug!("Stale warmup completion for {} ignored", player);
                return;
            }
        };
        session.abort_timers();

        let sample = ctx.sample(&player);
        let current = match sample.position() {
            Some(current) => current,
            None => {
                info!(
                    "Warmup for {} ({}) dropped: player unavailable at completion",
                    player, session.command
                );
                return;
            }
        };

        if self.has_moved(&session.start_position, current) {
            info!("Warmup for {} ({}) cancelled: player moved", player, session.command);
            ctx.notify(
                &player,
                Notice::WarmupCancelled {
                    command: session.command,
                },
            );
            return;
        }

        info!("Warmup complete for {} ({})", player, session.command);
        let action = session
            .on_complete
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(action) = action {
            action(ctx);
        }
    }

    fn world_of(&self, player: PlayerId, id: u64) -> Option<WorldId> {
        self.sessions
            .get(&player)
            .filter(|session| session.id == id)
            .map(|session| session.world.clone())
    }
}

fn spawn_movement_check(
    inner: Weak<Inner>,
    world: WorldId,
    player: PlayerId,
    id: u64,
) -> JoinHandle<()> {
    let every = match inner.upgrade() {
        Some(inner) => timer_period(inner.check_interval),
        None => Duration::from_millis(500),
    };

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let Some(strong) = inner.upgrade() else { break };
            if !strong.is_current(player, id) {
                break;
            }

            let task_inner = Arc::clone(&strong);
            let result = strong.dispatcher.dispatch(
                &world,
                Box::new(move |ctx: &mut dyn WorldContext| {
                    task_inner.check_movement(ctx, player, id)
                }),
            );
            if let Err(e) = result {
                debug!("Warmup check for {} skipped: {}", player, e);
            }
        }
    })
}

fn spawn_completion(
    inner: Weak<Inner>,
    world: WorldId,
    player: PlayerId,
    id: u64,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep_until(deadline).await;

        let Some(strong) = inner.upgrade() else { return };
        if strong.world_of(player, id).is_none() {
            return;
        }

        let task_inner = Arc::clone(&strong);
        let result = strong.dispatcher.dispatch(
            &world,
            Box::new(move |ctx: &mut dyn WorldContext| task_inner.complete(ctx, player, id)),
        );

        if let Err(e) = result {
            // Nothing will ever complete this session, so drop it
            warn!("Warmup for {} abandoned: {}", player, e);
            if let Some(mut session) = strong.remove_current(player, id) {
                if let Some(handle) = session.movement_check.take() {
                    handle.abort();
                }
            }
        }
    })
}
