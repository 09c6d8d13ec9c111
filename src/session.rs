//! HTTP-frontend session manager: creation, SSE subscription, idle sweep,
//! and explicit termination (§4.F.2, §5).
//!
//! An `RwLock`-guarded session table, a per-session broadcast channel, and
//! an `async_stream`-built SSE response, plus an idle-TTL sweeper task.
//! Per-session subscriber state (`last_event_id`, the broadcast sender) is
//! guarded by a lock that is *part of* the session's own `Arc`, independent
//! of the session table's lock — these must never be the same lock (§5).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// One session's mutable state, guarded by its own lock — never the
/// session table's.
struct SessionInner {
    tx: broadcast::Sender<SessionEvent>,
    last_activity: Instant,
    closed: bool,
}

/// One connected HTTP caller's session (§3).
pub struct Session {
    id: String,
    created_at: Instant,
    inner: Mutex<SessionInner>,
}

/// An event delivered to a session's SSE subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A JSON-RPC response/notification body.
    Message {
        /// Monotonic event id, scoped to this session.
        id: u64,
        /// The JSON-encoded payload.
        data: String,
    },
    /// The session has closed; subscribers should stop.
    Eof,
}

impl Session {
    fn new(id: String, buffer: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer);
        Self {
            id,
            created_at: Instant::now(),
            inner: Mutex::new(SessionInner {
                tx,
                last_activity: Instant::now(),
                closed: false,
            }),
        }
    }

    /// This session's opaque id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time since session creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session last had a public method touch it.
    fn idle_for(&self) -> Duration {
        self.inner.lock().last_activity.elapsed()
    }

    /// Bump `last_activity`. Every public session-touching method does
    /// this first (§4.F.2).
    fn touch(&self) {
        self.inner.lock().last_activity = Instant::now();
    }

    /// Subscribe a new SSE receiver to this session's events.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.lock().tx.subscribe()
    }

    /// Broadcast an event. A subscriber whose buffer is full silently
    /// drops it rather than blocking the broadcaster (§5) — `broadcast`'s
    /// own semantics already give us this: `send` never blocks, and a lag
    /// only affects the lagging receiver.
    fn send(&self, event: SessionEvent) {
        let inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let _ = inner.tx.send(event);
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let _ = inner.tx.send(SessionEvent::Eof);
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Owns every live session, a sweeper task, and the monotonic event-id
/// counter used to stamp SSE frames.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    event_counter: AtomicU64,
    ttl: Duration,
    sse_buffer: usize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Build a manager with the given idle TTL and per-session SSE buffer
    /// depth. Call [`Self::spawn_sweeper`] to start the background sweep.
    #[must_use]
    pub fn new(ttl: Duration, sse_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            event_counter: AtomicU64::new(1),
            ttl,
            sse_buffer,
            sweeper: Mutex::new(None),
        })
    }

    /// Start the background sweeper, running every `max(ttl/2, 500ms)`
    /// (§4.F.2). Idempotent: calling it twice replaces the previous task.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = std::cmp::max(self.ttl / 2, Duration::from_millis(500));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Stop the sweeper. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let sessions = self.sessions.read().values().cloned().collect::<Vec<_>>();
        for session in sessions {
            session.close();
        }
    }

    fn sweep(&self) {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.idle_for() >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(session) = self.sessions.write().remove(&id) {
                session.close();
                info!(session_id = %id, "swept idle session");
            }
        }
    }

    /// Create a new session and return it.
    pub fn create(&self) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), self.sse_buffer));
        self.sessions.write().insert(id.clone(), Arc::clone(&session));
        debug!(session_id = %id, "created session");
        session
    }

    /// Look up a live session by id, bumping its activity timestamp.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().get(id).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Whether `id` currently resolves to a live session.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Terminate a session: close every subscriber, then remove it from
    /// the table. Returns `true` iff a session with that id existed.
    pub fn terminate(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = removed {
            session.close();
            info!(session_id = %id, "terminated session");
            true
        } else {
            false
        }
    }

    /// Number of currently live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Broadcast one JSON-encoded payload to a session, stamping it with
    /// the next monotonic event id.
    pub fn send(&self, session: &Session, data: String) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        session.send(SessionEvent::Message { id, data });
    }
}

/// Build the SSE response for a GET subscription to `session`. The stream
/// ends on `Eof` (session closed) or when the underlying broadcast channel
/// closes (manager dropped).
pub fn subscribe_sse(
    session: Arc<Session>,
    keep_alive_interval: Duration,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = session.subscribe();
    let already_closed = session.is_closed();

    let stream = stream! {
        if already_closed {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Message { id, data }) => {
                    yield Ok(Event::default().event("message").id(id.to_string()).data(data));
                }
                Ok(SessionEvent::Eof) => break,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // A slow subscriber missed events; keep going rather
                    // than tearing down the stream (§5: a lagging reader
                    // never stalls delivery to others, and is not itself
                    // treated as a fatal condition).
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive_interval).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup_round_trips() {
        let manager = SessionManager::new(Duration::from_secs(60), 16);
        let session = manager.create();
        assert!(manager.has(session.id()));
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn terminate_removes_and_closes() {
        let manager = SessionManager::new(Duration::from_secs(60), 16);
        let session = manager.create();
        let id = session.id().to_string();
        assert!(manager.terminate(&id));
        assert!(!manager.has(&id));
        assert!(session.is_closed());
        assert!(!manager.terminate(&id));
    }

    #[test]
    fn unknown_session_lookup_returns_none() {
        let manager = SessionManager::new(Duration::from_secs(60), 16);
        assert!(manager.get("does-not-exist").is_none());
    }

    #[tokio::test]
    async fn sweeper_removes_idle_sessions() {
        let manager = SessionManager::new(Duration::from_millis(50), 16);
        let session = manager.create();
        let id = session.id().to_string();
        manager.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!manager.has(&id));
        manager.stop();
    }

    #[tokio::test]
    async fn closing_a_session_broadcasts_eof() {
        let manager = SessionManager::new(Duration::from_secs(60), 16);
        let session = manager.create();
        let mut rx = session.subscribe();
        session.close();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Eof));
    }

    #[test]
    fn stop_is_idempotent() {
        let manager = SessionManager::new(Duration::from_secs(60), 16);
        manager.create();
        manager.stop();
        manager.stop();
    }
}
