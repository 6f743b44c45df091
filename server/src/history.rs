//! Per-player back stack of previous locations
//!
//! Teleports push the location the player is leaving and the death detector
//! pushes inferred death points. The newest entry sits at the front; once a
//! history reaches `max_depth` every push drops the oldest entry.

use dashmap::DashMap;
use log::debug;
use shared::{Location, PlayerId};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct LocationHistoryStore {
    histories: DashMap<PlayerId, VecDeque<Location>>,
    max_depth: usize,
}

impl LocationHistoryStore {
    pub fn new(max_depth: usize) -> Self {
        Self {
            histories: DashMap::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Records a location the player can return to. A store configured with
    /// zero depth keeps nothing.
    pub fn push(&self, player: PlayerId, location: Location) {
        if self.max_depth == 0 {
            return;
        }

        let mut history = self.histories.entry(player).or_default();
        history.push_front(location);
        history.truncate(self.max_depth);
        debug!("Back location saved for {} (history size: {})", player, history.len());
    }

    /// Records a death location. Whether deaths are recorded at all is
    /// decided by the caller.
    pub fn push_death(&self, player: PlayerId, location: Location) {
        debug!("Recording death location for {}: {}", player, location);
        self.push(player, location);
    }

    pub fn peek(&self, player: PlayerId) -> Option<Location> {
        self.histories
            .get(&player)
            .and_then(|history| history.front().cloned())
    }

    pub fn pop(&self, player: PlayerId) -> Option<Location> {
        let mut history = self.histories.get_mut(&player)?;
        let location = history.pop_front();
        if let Some(location) = &location {
            debug!("Popped back location for {}: {}", player, location);
        }
        location
    }

    /// Removes the newest entry equal to `location`, wherever it sits in the
    /// history. Entries pushed after it was read stay in place.
    pub fn remove(&self, player: PlayerId, location: &Location) -> bool {
        let Some(mut history) = self.histories.get_mut(&player) else {
            return false;
        };
        match history.iter().position(|entry| entry == location) {
            Some(index) => {
                history.remove(index);
                debug!("Consumed back location for {}: {}", player, location);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, player: PlayerId) {
        self.histories.remove(&player);
    }

    pub fn history_size(&self, player: PlayerId) -> usize {
        self.histories
            .get(&player)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    /// Snapshot of a player's history, newest first.
    pub fn history(&self, player: PlayerId) -> Vec<Location> {
        self.histories
            .get(&player)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces a player's history with one loaded from persistent storage,
    /// newest first. Anything past `max_depth` is dropped.
    pub fn restore(&self, player: PlayerId, locations: Vec<Location>) {
        let mut history: VecDeque<Location> = locations.into();
        history.truncate(self.max_depth);
        if history.is_empty() {
            self.histories.remove(&player);
        } else {
            self.histories.insert(player, history);
        }
    }

    /// Number of players with a history.
    pub fn player_count(&self) -> usize {
        self.histories.len()
    }
}
