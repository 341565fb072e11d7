//! HTTP session manager.
//!
//! Sessions are keyed by a cryptographically random id issued on
//! initialize and echoed by the client in `Mcp-Session-Id`. Each session
//! tracks its subscription set, last activity, negotiated protocol
//! version, log level, and an ordered event queue that backs SSE
//! resumption via `Last-Event-ID`. An inactivity sweep evicts idle
//! sessions.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use harbormcp_auth::clock::{Clock, SystemClock};
use harbormcp_protocol::types::LoggingLevel;
use harbormcp_protocol::{JsonRpcNotification, RequestId};

/// Events retained per session for replay.
const EVENT_QUEUE_CAPACITY: usize = 256;
/// Live-stream fanout buffer.
const LIVE_CHANNEL_CAPACITY: usize = 64;

/// One stored outbound event, replayable by id.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Monotonic per-session event id
    pub id: u64,
    /// Serialized JSON-RPC envelope
    pub data: String,
}

/// One HTTP session.
pub struct Session {
    /// Session id (32 hex chars of CSPRNG output)
    pub id: String,
    /// Authenticated user, when the server runs behind auth
    pub user_id: Option<String>,
    /// Creation time (Unix milliseconds)
    pub created_at_ms: u64,
    last_activity_ms: AtomicU64,
    initialized: AtomicBool,
    protocol_version: Mutex<Option<String>>,
    subscriptions: Mutex<HashSet<String>>,
    log_level: Mutex<LoggingLevel>,
    cancelled: Mutex<HashSet<String>>,
    events: Mutex<VecDeque<StoredEvent>>,
    next_event_id: AtomicU64,
    live: broadcast::Sender<StoredEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}

impl Session {
    fn new(id: String, user_id: Option<String>, now_ms: u64) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            id,
            user_id,
            created_at_ms: now_ms,
            last_activity_ms: AtomicU64::new(now_ms),
            initialized: AtomicBool::new(false),
            protocol_version: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            log_level: Mutex::new(LoggingLevel::Info),
            cancelled: Mutex::new(HashSet::new()),
            events: Mutex::new(VecDeque::new()),
            next_event_id: AtomicU64::new(1),
            live,
        }
    }

    /// Record activity. Called before handler dispatch for every inbound
    /// message on the session.
    pub fn touch(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Last activity (Unix milliseconds).
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }

    /// Mark the handshake complete (`notifications/initialized` received).
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Whether the client confirmed initialization.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Record the negotiated protocol version.
    pub fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock() = Some(version.to_string());
    }

    /// The negotiated protocol version, when initialize has run.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.lock().clone()
    }

    /// Add a resource URI to the subscription set. Idempotent.
    pub fn subscribe(&self, uri: &str) {
        self.subscriptions.lock().insert(uri.to_string());
    }

    /// Remove a resource URI from the subscription set. Idempotent.
    pub fn unsubscribe(&self, uri: &str) {
        self.subscriptions.lock().remove(uri);
    }

    /// Snapshot of the subscription set.
    pub fn subscriptions(&self) -> HashSet<String> {
        self.subscriptions.lock().clone()
    }

    /// Whether the session subscribes to `uri`.
    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.lock().contains(uri)
    }

    /// Set the minimum log level forwarded to this session.
    pub fn set_log_level(&self, level: LoggingLevel) {
        *self.log_level.lock() = level;
    }

    /// Minimum log level forwarded to this session.
    pub fn log_level(&self) -> LoggingLevel {
        *self.log_level.lock()
    }

    /// Mark a request id as cancelled by the client.
    pub fn cancel(&self, id: &RequestId) {
        self.cancelled.lock().insert(id.to_string());
    }

    /// Consume a cancellation marker; true when the id was cancelled.
    pub fn take_cancelled(&self, id: &RequestId) -> bool {
        self.cancelled.lock().remove(&id.to_string())
    }

    /// Queue an outbound notification for this session and push it to any
    /// live stream.
    pub fn push_notification(&self, notification: &JsonRpcNotification) {
        let data = match serde_json::to_string(notification) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "failed to serialize outbound notification");
                return;
            }
        };
        let event = StoredEvent {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            data,
        };
        {
            let mut events = self.events.lock();
            if events.len() >= EVENT_QUEUE_CAPACITY {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        let _ = self.live.send(event);
    }

    /// Allocate an event id for a response frame (not stored for replay).
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Stored events newer than `after` (for `Last-Event-ID` resumption).
    pub fn replay_after(&self, after: u64) -> Vec<StoredEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.id > after)
            .cloned()
            .collect()
    }

    /// Subscribe to live events for the GET side channel.
    pub fn subscribe_live(&self) -> broadcast::Receiver<StoredEvent> {
        self.live.subscribe()
    }
}

/// Manager of every active session.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("count", &self.count())
            .finish()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Session ids are v4 UUIDs rendered as 32 hex chars: 122 bits of
/// CSPRNG-backed randomness, enough to rule out enumeration.
fn random_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl SessionManager {
    /// Manager on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Manager with an explicit clock (deterministic sweeps in tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// The clock sessions are timed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create a session with a fresh random id.
    pub fn allocate(&self, user_id: Option<String>) -> Arc<Session> {
        let id = random_session_id();
        let session = Arc::new(Session::new(id.clone(), user_id, self.clock.unix_millis()));
        self.sessions.insert(id, Arc::clone(&session));
        debug!(session_id = %session.id, "session allocated");
        session
    }

    /// Look a session up by id.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Remove a session. Idempotent; returns whether it existed.
    pub fn terminate(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session terminated");
        }
        removed
    }

    /// Add a subscription to a session's set. Idempotent; false when the
    /// session is unknown.
    pub fn subscribe_resource(&self, id: &str, uri: &str) -> bool {
        match self.lookup(id) {
            Some(session) => {
                session.subscribe(uri);
                true
            }
            None => false,
        }
    }

    /// Remove a subscription from a session's set. Idempotent.
    pub fn unsubscribe_resource(&self, id: &str, uri: &str) -> bool {
        match self.lookup(id) {
            Some(session) => {
                session.unsubscribe(uri);
                true
            }
            None => false,
        }
    }

    /// Remove every session idle longer than `max_idle`; returns how many
    /// were removed.
    pub fn sweep_inactive(&self, max_idle: Duration) -> usize {
        let now = self.clock.unix_millis();
        let threshold = now.saturating_sub(max_idle.as_millis() as u64);
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_activity_ms() < threshold)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), "inactive sessions swept");
        }
        stale.len()
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Deliver a notification to every session.
    pub fn broadcast(&self, notification: &JsonRpcNotification) {
        for entry in self.sessions.iter() {
            entry.push_notification(notification);
        }
    }

    /// Visit every active session.
    pub fn for_each(&self, mut f: impl FnMut(Arc<Session>)) {
        for entry in self.sessions.iter() {
            f(Arc::clone(&entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbormcp_auth::clock::ManualClock;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_ids_are_32_hex_and_unique() {
        let manager = SessionManager::new();
        let a = manager.allocate(None);
        let b = manager.allocate(None);
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id, b.id);
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn terminate_is_idempotent() {
        let manager = SessionManager::new();
        let session = manager.allocate(None);
        assert!(manager.terminate(&session.id));
        assert!(!manager.terminate(&session.id));
        assert!(manager.lookup(&session.id).is_none());
    }

    #[test]
    fn subscribe_then_unsubscribe_restores_the_pre_state() {
        let manager = SessionManager::new();
        let session = manager.allocate(None);
        let before = session.subscriptions();

        assert!(manager.subscribe_resource(&session.id, "memo://a"));
        assert!(manager.subscribe_resource(&session.id, "memo://a"));
        assert!(session.is_subscribed("memo://a"));

        assert!(manager.unsubscribe_resource(&session.id, "memo://a"));
        assert!(manager.unsubscribe_resource(&session.id, "memo://a"));
        assert_eq!(session.subscriptions(), before);
    }

    #[test]
    fn sweep_removes_only_idle_sessions() {
        let clock = ManualClock::new();
        let manager = SessionManager::with_clock(Arc::new(clock.clone()));

        let s1 = manager.allocate(None);
        let s2 = manager.allocate(None);
        let s3 = manager.allocate(None);

        // Age s1 past the threshold; keep the others fresh.
        clock.advance(Duration::from_secs(120));
        s2.touch(manager.clock().unix_millis());
        s3.touch(manager.clock().unix_millis());

        let removed = manager.sweep_inactive(Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert_eq!(manager.count(), 2);
        assert!(manager.lookup(&s1.id).is_none());
        assert!(manager.lookup(&s2.id).is_some());
    }

    #[test]
    fn event_queue_replays_after_an_id() {
        let manager = SessionManager::new();
        let session = manager.allocate(None);

        for i in 0..3 {
            session.push_notification(&JsonRpcNotification::new(
                format!("notifications/test/{i}"),
                None,
            ));
        }

        let all = session.replay_after(0);
        assert_eq!(all.len(), 3);
        let tail = session.replay_after(all[0].id);
        assert_eq!(tail.len(), 2);
        assert!(tail[0].data.contains("notifications/test/1"));
    }

    #[test]
    fn cancellation_markers_are_consumed_once() {
        let manager = SessionManager::new();
        let session = manager.allocate(None);
        let id = RequestId::Number(4);
        session.cancel(&id);
        assert!(session.take_cancelled(&id));
        assert!(!session.take_cancelled(&id));
    }
}
