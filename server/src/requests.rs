//! Paired teleport requests between players
//!
//! Requests are queued per target in creation order. A bare accept or deny
//! resolves the newest live request first; expired entries are skipped and
//! discarded on the way. A periodic sweep purges whatever expired without
//! being looked at, so queues stay bounded on busy servers.

use crate::error::RequestError;
use crate::utils::{get_timestamp, seconds_until, timer_period};
use dashmap::DashMap;
use log::{debug, info};
use shared::{PlayerId, RequestKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct TeleportRequest {
    pub requester_id: PlayerId,
    pub requester_name: String,
    pub target_id: PlayerId,
    pub target_name: String,
    pub kind: RequestKind,
    /// Wall-clock creation time in milliseconds since the epoch
    pub created_at: u64,
    pub expires_at: Instant,
}

impl TeleportRequest {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_seconds(&self) -> u32 {
        seconds_until(self.expires_at, Instant::now())
    }

    /// The player who gets teleported once the request is accepted.
    pub fn traveller(&self) -> PlayerId {
        match self.kind {
            RequestKind::Direct => self.requester_id,
            RequestKind::Reverse => self.target_id,
        }
    }

    /// The player whose position is the destination.
    pub fn anchor(&self) -> PlayerId {
        match self.kind {
            RequestKind::Direct => self.target_id,
            RequestKind::Reverse => self.requester_id,
        }
    }
}

#[derive(Debug)]
pub struct PairedRequestBroker {
    /// Target -> pending requests in creation order
    pending: DashMap<PlayerId, Vec<TeleportRequest>>,
    timeout: Duration,
}

impl PairedRequestBroker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn create_request(
        &self,
        requester_id: PlayerId,
        requester_name: &str,
        target_id: PlayerId,
        target_name: &str,
        kind: RequestKind,
    ) -> Result<TeleportRequest, RequestError> {
        if requester_id == target_id {
            return Err(RequestError::SelfRequest);
        }

        // The entry guard serialises this check-then-append against other
        // writers of the same target queue
        let mut queue = self.pending.entry(target_id).or_default();
        let now = Instant::now();

        let already_pending = queue
            .iter()
            .any(|r| r.requester_id == requester_id && !r.is_expired_at(now));
        if already_pending {
            return Err(RequestError::AlreadyPending);
        }

        // Expired leftovers from this requester go before the new one is queued
        queue.retain(|r| r.requester_id != requester_id);

        let request = TeleportRequest {
            requester_id,
            requester_name: requester_name.to_string(),
            target_id,
            target_name: target_name.to_string(),
            kind,
            created_at: get_timestamp(),
            expires_at: now + self.timeout,
        };
        queue.push(request.clone());

        info!(
            "Teleport request created: {} -> {} ({:?})",
            requester_name, target_name, kind
        );
        Ok(request)
    }

    /// Resolves the newest live request for `target`.
    pub fn accept_request(&self, target_id: PlayerId) -> Option<TeleportRequest> {
        let request = self.take_newest(target_id)?;
        info!(
            "Teleport request accepted: {} -> {}",
            request.requester_name, request.target_name
        );
        Some(request)
    }

    /// Drops the newest live request for `target`.
    pub fn deny_request(&self, target_id: PlayerId) -> Option<TeleportRequest> {
        let request = self.take_newest(target_id)?;
        info!(
            "Teleport request denied: {} -> {}",
            request.requester_name, request.target_name
        );
        Some(request)
    }

    pub fn accept_from(
        &self,
        target_id: PlayerId,
        requester_id: PlayerId,
    ) -> Result<TeleportRequest, RequestError> {
        let request = self.take_from(target_id, requester_id)?;
        info!(
            "Teleport request accepted: {} -> {}",
            request.requester_name, request.target_name
        );
        Ok(request)
    }

    pub fn deny_from(
        &self,
        target_id: PlayerId,
        requester_id: PlayerId,
    ) -> Result<TeleportRequest, RequestError> {
        let request = self.take_from(target_id, requester_id)?;
        info!(
            "Teleport request denied: {} -> {}",
            request.requester_name, request.target_name
        );
        Ok(request)
    }

    /// Removes every request `requester_id` has sent.
    pub fn cancel_outgoing(&self, requester_id: PlayerId) -> usize {
        let mut removed = 0;
        for mut queue in self.pending.iter_mut() {
            let before = queue.len();
            queue.retain(|r| r.requester_id != requester_id);
            removed += before - queue.len();
        }
        if removed > 0 {
            debug!("Cancelled {} outgoing requests from {}", removed, requester_id);
        }
        removed
    }

    /// Forgets everything involving a player who left.
    pub fn remove_player(&self, player: PlayerId) {
        self.pending.remove(&player);
        self.cancel_outgoing(player);
    }

    /// Live requests waiting on `target`, oldest first.
    pub fn pending_for(&self, target_id: PlayerId) -> Vec<TeleportRequest> {
        let now = Instant::now();
        self.pending
            .get(&target_id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|r| !r.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_pending(&self, target_id: PlayerId) -> bool {
        let now = Instant::now();
        self.pending
            .get(&target_id)
            .map(|queue| queue.iter().any(|r| !r.is_expired_at(now)))
            .unwrap_or(false)
    }

    /// Purges expired requests and empty queues. Returns how many requests
    /// were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.pending.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|r| !r.is_expired_at(now));
            removed += before - queue.len();
            !queue.is_empty()
        });
        if removed > 0 {
            debug!("Swept {} expired teleport requests", removed);
        }
        removed
    }

    /// Number of stored requests, expired or not.
    pub fn stored_len(&self) -> usize {
        self.pending.iter().map(|queue| queue.len()).sum()
    }

    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Starts the periodic sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        let every = timer_period(every);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broker.sweep_expired();
            }
        })
    }

    fn take_newest(&self, target_id: PlayerId) -> Option<TeleportRequest> {
        let mut queue = self.pending.get_mut(&target_id)?;
        let now = Instant::now();

        while let Some(request) = queue.pop() {
            if !request.is_expired_at(now) {
                return Some(request);
            }
            debug!(
                "Discarding expired request {} -> {}",
                request.requester_name, request.target_name
            );
        }
        None
    }

    fn take_from(
        &self,
        target_id: PlayerId,
        requester_id: PlayerId,
    ) -> Result<TeleportRequest, RequestError> {
        let mut queue = self
            .pending
            .get_mut(&target_id)
            .ok_or(RequestError::NoPendingRequest)?;
        let index = queue
            .iter()
            .position(|r| r.requester_id == requester_id)
            .ok_or(RequestError::NoPendingRequest)?;

        let request = queue.remove(index);
        if request.is_expired() {
            return Err(RequestError::Expired);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> PairedRequestBroker {
        PairedRequestBroker::new(Duration::from_secs(30))
    }

    fn send(
        broker: &PairedRequestBroker,
        from: PlayerId,
        to: PlayerId,
    ) -> Result<TeleportRequest, RequestError> {
        broker.create_request(from, "from", to, "to", RequestKind::Direct)
    }

    #[test]
    fn test_self_request_rejected() {
        let broker = broker();
        let alice = PlayerId::new_random();
        assert_eq!(send(&broker, alice, alice), Err(RequestError::SelfRequest));
        assert_eq!(broker.stored_len(), 0);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let broker = broker();
        let alice = PlayerId::new_random();
        let bob = PlayerId::new_random();

        assert!(send(&broker, alice, bob).is_ok());
        assert_eq!(send(&broker, alice, bob), Err(RequestError::AlreadyPending));
        assert_eq!(broker.stored_len(), 1);

        // A different target is a different pair
        let carol = PlayerId::new_random();
        assert!(send(&broker, alice, carol).is_ok());
    }

    #[test]
    fn test_accept_with_nothing_pending() {
        let broker = broker();
        assert_eq!(broker.accept_request(PlayerId::new_random()), None);
        assert_eq!(broker.deny_request(PlayerId::new_random()), None);
    }

    #[test]
    fn test_accept_is_lifo() {
        let broker = broker();
        let target = PlayerId::new_random();
        let first = PlayerId::new_random();
        let second = PlayerId::new_random();

        send(&broker, first, target).unwrap();
        send(&broker, second, target).unwrap();

        assert_eq!(broker.accept_request(target).unwrap().requester_id, second);
        assert_eq!(broker.accept_request(target).unwrap().requester_id, first);
        assert_eq!(broker.accept_request(target), None);
    }

    #[test]
    fn test_deny_removes_newest() {
        let broker = broker();
        let target = PlayerId::new_random();
        let first = PlayerId::new_random();
        let second = PlayerId::new_random();
        send(&broker, first, target).unwrap();
        send(&broker, second, target).unwrap();

        assert_eq!(broker.deny_request(target).unwrap().requester_id, second);
        let pending = broker.pending_for(target);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_id, first);
    }

    #[test]
    fn test_accept_and_deny_from_specific_requester() {
        let broker = broker();
        let target = PlayerId::new_random();
        let first = PlayerId::new_random();
        let second = PlayerId::new_random();
        send(&broker, first, target).unwrap();
        send(&broker, second, target).unwrap();

        let accepted = broker.accept_from(target, first).unwrap();
        assert_eq!(accepted.requester_id, first);
        assert_eq!(
            broker.accept_from(target, first),
            Err(RequestError::NoPendingRequest)
        );

        assert_eq!(broker.deny_from(target, second).unwrap().requester_id, second);
        assert!(!broker.has_pending(target));
        assert_eq!(
            broker.deny_from(PlayerId::new_random(), second),
            Err(RequestError::NoPendingRequest)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_request_is_invisible() {
        let broker = broker();
        let target = PlayerId::new_random();
        let requester = PlayerId::new_random();
        send(&broker, requester, target).unwrap();
        assert!(broker.has_pending(target));

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!broker.has_pending(target));
        assert!(broker.pending_for(target).is_empty());
        assert_eq!(broker.accept_request(target), None);
        // The expired entry was discarded during the scan
        assert_eq!(broker.stored_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_skips_expired_newer_entries() {
        let broker = PairedRequestBroker::new(Duration::from_secs(10));
        let target = PlayerId::new_random();
        let old = PlayerId::new_random();
        let young = PlayerId::new_random();

        send(&broker, old, target).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        send(&broker, young, target).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        // The old one has expired, the young one is still live
        assert_eq!(broker.accept_request(target).unwrap().requester_id, young);
        assert_eq!(broker.stored_len(), 1);
        assert_eq!(broker.accept_request(target), None);
        assert_eq!(broker.stored_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_from_expired_reports_expired() {
        let broker = broker();
        let target = PlayerId::new_random();
        let requester = PlayerId::new_random();
        send(&broker, requester, target).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(
            broker.accept_from(target, requester),
            Err(RequestError::Expired)
        );
        assert_eq!(broker.stored_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_can_be_resent_after_expiry() {
        let broker = broker();
        let target = PlayerId::new_random();
        let requester = PlayerId::new_random();
        send(&broker, requester, target).unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(send(&broker, requester, target).is_ok());
        assert_eq!(broker.stored_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_purges_expired() {
        let broker = broker();
        let target = PlayerId::new_random();
        send(&broker, PlayerId::new_random(), target).unwrap();
        send(&broker, PlayerId::new_random(), PlayerId::new_random()).unwrap();

        assert_eq!(broker.sweep_expired(), 0);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(broker.sweep_expired(), 2);
        assert_eq!(broker.stored_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_periodically() {
        let broker = Arc::new(PairedRequestBroker::new(Duration::from_secs(2)));
        let target = PlayerId::new_random();
        send(&broker, PlayerId::new_random(), target).unwrap();

        let sweeper = broker.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        assert_eq!(broker.stored_len(), 0);
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_survives_zero_interval() {
        let broker = Arc::new(PairedRequestBroker::new(Duration::from_secs(2)));
        send(&broker, PlayerId::new_random(), PlayerId::new_random()).unwrap();

        let sweeper = broker.spawn_sweeper(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert!(!sweeper.is_finished());
        assert_eq!(broker.stored_len(), 0);
        sweeper.abort();
    }

    #[test]
    fn test_cancel_outgoing_across_targets() {
        let broker = broker();
        let leaver = PlayerId::new_random();
        let stayer = PlayerId::new_random();
        let bob = PlayerId::new_random();
        let carol = PlayerId::new_random();

        send(&broker, leaver, bob).unwrap();
        send(&broker, leaver, carol).unwrap();
        send(&broker, stayer, bob).unwrap();

        assert_eq!(broker.cancel_outgoing(leaver), 2);
        assert_eq!(broker.pending_for(bob).len(), 1);
        assert!(!broker.has_pending(carol));
    }

    #[test]
    fn test_remove_player_drops_incoming_and_outgoing() {
        let broker = broker();
        let leaver = PlayerId::new_random();
        let other = PlayerId::new_random();

        send(&broker, other, leaver).unwrap();
        send(&broker, leaver, other).unwrap();

        broker.remove_player(leaver);
        assert_eq!(broker.stored_len(), 0);
    }

    #[test]
    fn test_traveller_and_anchor() {
        let broker = broker();
        let requester = PlayerId::new_random();
        let target = PlayerId::new_random();

        let direct = broker
            .create_request(requester, "a", target, "b", RequestKind::Direct)
            .unwrap();
        assert_eq!(direct.traveller(), requester);
        assert_eq!(direct.anchor(), target);

        broker.accept_request(target);
        let reverse = broker
            .create_request(requester, "a", target, "b", RequestKind::Reverse)
            .unwrap();
        assert_eq!(reverse.traveller(), target);
        assert_eq!(reverse.anchor(), requester);
        assert!(reverse.remaining_seconds() > 0);
    }
}
