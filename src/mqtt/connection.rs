//! Connection state shared between the MQTT event loop and health endpoints.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// MQTT connection state.
///
/// Written only by the event-loop task, read by `/health` and `/ready`.
///
/// # Memory Ordering
///
/// All atomic operations use `SeqCst` for simplicity. Connection state
/// drives readiness decisions, so it must be immediately visible across
/// threads; the cost is negligible at this update rate.
#[derive(Debug)]
pub struct ConnectionState {
    /// Whether the broker has acknowledged the current connection
    connected: AtomicBool,
    /// Whether the wildcard subscription is active on the current connection
    subscribed: AtomicBool,
    /// Consecutive event-loop errors since the last successful ConnAck
    consecutive_failures: AtomicU32,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a broker ConnAck. Resets the failure streak; the subscription
    /// must be re-established on every new connection.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.subscribed.store(false, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a connection error. Returns the failure streak length.
    pub fn mark_failed(&self) -> u32 {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribed.store(false, Ordering::SeqCst);
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a clean disconnect at shutdown.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribed.store(false, Ordering::SeqCst);
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
