//! Client session state and the subscription registry.
//!
//! Uses DashMap for the shared maps so fan-out never serializes behind
//! a single lock.

use crate::error::{GatewayError, Result};
use crate::protocol::{Feed, ServerMessage};
use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique session identifier.
pub type ClientId = Uuid;

/// Outcome of counting one inbound frame against the rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over budget; the window reopens at this instant (ms since epoch).
    Limited { reset_at_ms: i64 },
}

#[derive(Debug)]
struct RateWindow {
    window_start_ms: i64,
    count: u32,
}

/// State for a single accepted connection.
#[derive(Debug)]
pub struct ClientState {
    pub id: ClientId,
    /// Channel to the session's WebSocket write task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Feeds this session is a member of (mirror of the registry index).
    pub subscriptions: DashSet<Feed>,
    /// Connect time, ms since epoch.
    pub connected_at: i64,
    last_ping: AtomicI64,
    rate: Mutex<RateWindow>,
    limit_per_minute: u32,
}

impl ClientState {
    pub fn new(tx: mpsc::UnboundedSender<Message>, limit_per_minute: u32) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            tx,
            subscriptions: DashSet::new(),
            connected_at: now,
            last_ping: AtomicI64::new(now),
            rate: Mutex::new(RateWindow {
                window_start_ms: now,
                count: 0,
            }),
            limit_per_minute,
        }
    }

    /// Serialize and send one frame to this session.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.send_raw(&json)
    }

    /// Send a pre-serialized frame. Broadcast paths serialize once and
    /// use this for every member.
    pub fn send_raw(&self, json: &str) -> Result<()> {
        self.tx
            .send(Message::Text(json.to_owned().into()))
            .map_err(|_| GatewayError::ChannelSend)
    }

    pub fn update_ping(&self) {
        self.last_ping
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_ping_time(&self) -> i64 {
        self.last_ping.load(Ordering::Relaxed)
    }

    pub fn is_subscribed(&self, feed: Feed) -> bool {
        self.subscriptions.contains(&feed)
    }

    /// Count one inbound frame against the 60 second window. The window
    /// is fixed: it reopens exactly 60 s after it started.
    pub fn admit_frame(&self) -> RateDecision {
        let now = Utc::now().timestamp_millis();
        let mut rate = self.rate.lock();
        if now - rate.window_start_ms >= 60_000 {
            rate.window_start_ms = now;
            rate.count = 0;
        }
        rate.count += 1;
        if rate.count > self.limit_per_minute {
            RateDecision::Limited {
                reset_at_ms: rate.window_start_ms + 60_000,
            }
        } else {
            RateDecision::Allowed
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_rate_window(&self, ms: i64) {
        self.rate.lock().window_start_ms -= ms;
    }
}

/// Registry of connected sessions and per-feed membership sets.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientState>>,
    feeds: DashMap<Feed, DashSet<ClientId>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        let feeds = DashMap::new();
        for feed in Feed::ALL {
            feeds.insert(feed, DashSet::new());
        }
        Self {
            clients: DashMap::new(),
            feeds,
        }
    }

    pub fn register(&self, client: Arc<ClientState>) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        debug!(client = %id, "session registered");
        id
    }

    /// Remove a session and its membership in every feed.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            for feed in client.subscriptions.iter() {
                if let Some(members) = self.feeds.get(&*feed) {
                    members.remove(id);
                }
            }
            debug!(client = %id, "session unregistered");
        }
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientState>> {
        self.clients.get(id).map(|c| c.clone())
    }

    /// Add a session to a feed. Idempotent.
    pub fn subscribe(&self, id: &ClientId, feed: Feed) {
        if let Some(client) = self.clients.get(id) {
            client.subscriptions.insert(feed);
        }
        if let Some(members) = self.feeds.get(&feed) {
            members.insert(*id);
        }
    }

    /// Remove a session from a feed. Tolerates absence.
    pub fn unsubscribe(&self, id: &ClientId, feed: Feed) {
        if let Some(client) = self.clients.get(id) {
            client.subscriptions.remove(&feed);
        }
        if let Some(members) = self.feeds.get(&feed) {
            members.remove(id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn subscriber_count(&self, feed: Feed) -> usize {
        self.feeds.get(&feed).map_or(0, |m| m.len())
    }

    pub fn has_subscribers(&self, feed: Feed) -> bool {
        self.subscriber_count(feed) > 0
    }

    /// Fan a frame out to every member of a feed. Sessions whose channel
    /// has closed are pruned; this is the only implicit removal path
    /// besides an explicit unsubscribe or session close.
    ///
    /// Returns the number of sessions the frame reached.
    pub fn broadcast_to(&self, feed: Feed, msg: &ServerMessage) -> usize {
        let ids: Vec<ClientId> = match self.feeds.get(&feed) {
            Some(members) => members.iter().map(|id| *id).collect(),
            None => return 0,
        };
        if ids.is_empty() {
            return 0;
        }

        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                warn!(feed = feed.as_str(), error = %e, "failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in ids {
            match self.clients.get(&id) {
                Some(client) if client.send_raw(&json).is_ok() => delivered += 1,
                _ => dead.push(id),
            }
        }
        for id in dead {
            debug!(client = %id, feed = feed.as_str(), "pruning dead subscriber");
            self.unregister(&id);
        }
        delivered
    }

    /// Send a frame to every open session that is NOT a member of
    /// `feed`. Compatibility path for clients predating subscriptions;
    /// together with [`broadcast_to`](Self::broadcast_to) each session
    /// sees exactly one frame per change.
    pub fn broadcast_to_unsubscribed(&self, feed: Feed, msg: &ServerMessage) -> usize {
        let clients: Vec<Arc<ClientState>> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_subscribed(feed))
            .map(|entry| entry.value().clone())
            .collect();
        if clients.is_empty() {
            return 0;
        }

        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize legacy broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for client in clients {
            if client.send_raw(&json).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Remove sessions that have been silent past the keepalive horizon.
    pub fn sweep_stale(&self, max_idle_ms: i64) -> usize {
        let now = Utc::now().timestamp_millis();
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| now - entry.value().last_ping_time() > max_idle_ms)
            .map(|entry| *entry.key())
            .collect();

        let swept = stale.len();
        for id in stale {
            info!(client = %id, "removing idle session");
            self.unregister(&id);
        }
        swept
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(limit: u32) -> (Arc<ClientState>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ClientState::new(tx, limit)), rx)
    }

    #[test]
    fn subscribe_is_idempotent_and_unsubscribe_tolerates_absence() {
        let registry = ClientRegistry::new();
        let (client, _rx) = session(100);
        let id = registry.register(client);

        registry.subscribe(&id, Feed::Blocks);
        registry.subscribe(&id, Feed::Blocks);
        assert_eq!(registry.subscriber_count(Feed::Blocks), 1);

        registry.unsubscribe(&id, Feed::Blocks);
        registry.unsubscribe(&id, Feed::Blocks);
        assert_eq!(registry.subscriber_count(Feed::Blocks), 0);
        registry.unsubscribe(&id, Feed::Witnesses);
    }

    #[test]
    fn unregister_removes_every_membership() {
        let registry = ClientRegistry::new();
        let (client, _rx) = session(100);
        let id = registry.register(client);
        registry.subscribe(&id, Feed::GlobalProperties);
        registry.subscribe(&id, Feed::Witnesses);

        registry.unregister(&id);
        assert!(!registry.contains(&id));
        assert_eq!(registry.subscriber_count(Feed::GlobalProperties), 0);
        assert_eq!(registry.subscriber_count(Feed::Witnesses), 0);
    }

    #[test]
    fn broadcast_prunes_sessions_with_closed_channels() {
        let registry = ClientRegistry::new();
        let (alive, mut alive_rx) = session(100);
        let (dead, dead_rx) = session(100);
        let alive_id = registry.register(alive);
        let dead_id = registry.register(dead);
        registry.subscribe(&alive_id, Feed::Blocks);
        registry.subscribe(&dead_id, Feed::Blocks);

        drop(dead_rx);
        let delivered = registry.broadcast_to(
            Feed::Blocks,
            &ServerMessage::subscription_update(Feed::Blocks, serde_json::json!({ "h": 1 })),
        );

        assert_eq!(delivered, 1);
        assert!(alive_rx.try_recv().is_ok());
        assert!(!registry.contains(&dead_id));
        assert_eq!(registry.subscriber_count(Feed::Blocks), 1);
    }

    #[test]
    fn legacy_broadcast_excludes_subscribers() {
        let registry = ClientRegistry::new();
        let (subscriber, mut sub_rx) = session(100);
        let (plain, mut plain_rx) = session(100);
        let sub_id = registry.register(subscriber);
        registry.register(plain);
        registry.subscribe(&sub_id, Feed::GlobalProperties);

        let delivered = registry.broadcast_to_unsubscribed(
            Feed::GlobalProperties,
            &ServerMessage::legacy_broadcast(serde_json::json!({ "h": 2 })),
        );

        assert_eq!(delivered, 1);
        assert!(plain_rx.try_recv().is_ok());
        assert!(sub_rx.try_recv().is_err());
    }

    #[test]
    fn rate_window_limits_and_names_the_reset() {
        let (client, _rx) = session(3);
        for _ in 0..3 {
            assert_eq!(client.admit_frame(), RateDecision::Allowed);
        }
        match client.admit_frame() {
            RateDecision::Limited { reset_at_ms } => {
                let start = client.rate.lock().window_start_ms;
                assert_eq!(reset_at_ms, start + 60_000);
            }
            RateDecision::Allowed => panic!("fourth frame should be limited"),
        }
    }

    #[test]
    fn rate_window_reopens_after_sixty_seconds() {
        let (client, _rx) = session(1);
        assert_eq!(client.admit_frame(), RateDecision::Allowed);
        assert!(matches!(
            client.admit_frame(),
            RateDecision::Limited { .. }
        ));

        client.backdate_rate_window(61_000);
        assert_eq!(client.admit_frame(), RateDecision::Allowed);
    }

    #[test]
    fn sweep_removes_only_idle_sessions() {
        let registry = ClientRegistry::new();
        let (fresh, _fresh_rx) = session(100);
        let (idle, _idle_rx) = session(100);
        let idle_id = idle.id;
        registry.register(fresh);
        registry.register(idle);

        if let Some(client) = registry.get(&idle_id) {
            client
                .last_ping
                .store(Utc::now().timestamp_millis() - 300_000, Ordering::Relaxed);
        }

        assert_eq!(registry.sweep_stale(120_000), 1);
        assert!(!registry.contains(&idle_id));
        assert_eq!(registry.client_count(), 1);
    }
}
