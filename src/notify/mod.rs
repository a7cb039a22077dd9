//! # Failure notification
//!
//! Escalates persistent save failures to operators: a severe log event and a
//! message to every connected session with the admin permission. Notices
//! are throttled so that a sustained outage does not flood either channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Permission required to receive failure notices.
pub const ADMIN_PERMISSION: &str = "tradelog.admin";

/// A connected operator session (e.g. a player or console).
pub trait OperatorSession: Send + Sync {
    /// Stable session identifier
    fn id(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;

    /// Delivers a message. Best effort.
    fn send_message(&self, message: &str);
}

/// Currently connected operator sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn OperatorSession>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, replacing one with the same id
    pub fn connect(&self, session: Arc<dyn OperatorSession>) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session.id().to_string(), session);
        }
    }

    /// Remove a session
    pub fn disconnect(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `message` to every session holding `permission`.
    ///
    /// Returns the number of recipients.
    pub fn broadcast(&self, permission: &str, message: &str) -> usize {
        let sessions = match self.sessions.read() {
            Ok(s) => s,
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for session in sessions.values() {
            if session.has_permission(permission) {
                session.send_message(message);
                delivered += 1;
            }
        }
        delivered
    }
}

/// Lets an action through at most once per interval.
///
/// The first request always passes.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns `true` and restarts the window if the action may run at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Throttled escalation of failed saves.
#[derive(Debug)]
pub struct FailureNotifier {
    throttle: Throttle,
    sessions: Arc<SessionRegistry>,
}

impl FailureNotifier {
    pub fn new(interval: Duration, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            throttle: Throttle::new(interval),
            sessions,
        }
    }

    /// Reports a save that gave up with records still unsaved.
    ///
    /// Returns whether a notice went out, or the throttle suppressed it.
    pub fn on_save_failed(&mut self, storage_type: &str, now: Instant) -> bool {
        if !self.throttle.try_acquire(now) {
            return false;
        }

        tracing::error!(
            storage = storage_type,
            "Logging records to the {} trade log failed; retrying later. Please check the logs for details",
            storage_type
        );
        let message = format!(
            "[TradeLog] Logging records to the {} trade log failed! Please check the server logs for details.",
            storage_type
        );
        let recipients = self.sessions.broadcast(ADMIN_PERMISSION, &message);
        tracing::debug!(recipients, "sent trade log failure notice");
        true
    }
}
