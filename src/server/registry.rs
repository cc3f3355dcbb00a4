use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// The endpoint currently subscribed to pad data reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSession {
    pub address: SocketAddr,
    pub last_request_at: Instant,
}

/// Holds at most one subscriber. Staleness is checked on demand; nothing is ever evicted.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    session: Option<ClientSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ClientSession> {
        self.session
    }

    /// Replaces any existing session. Returns the address it displaced, if different.
    pub fn register(&mut self, address: SocketAddr, now: Instant) -> Option<SocketAddr> {
        let previous = self.session.replace(ClientSession {
            address,
            last_request_at: now,
        });
        previous
            .map(|session| session.address)
            .filter(|prev| *prev != address)
    }

    pub fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        self.live_session(now, timeout).is_some()
    }

    /// The session if it was refreshed within `timeout` of `now`.
    pub fn live_session(&self, now: Instant, timeout: Duration) -> Option<ClientSession> {
        self.session
            .filter(|session| now.saturating_duration_since(session.last_request_at) <= timeout)
    }
}
