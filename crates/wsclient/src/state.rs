//! Connection lifecycle.
//!
//! ```text
//! Connecting ──► Connected ◄──► Open
//!     │              │           │
//!     │              ▼           ▼
//!     │           Closing ───► Closed ──► Connecting (fresh connect)
//!     └──────────────────────────▲
//! ```
//!
//! `Open` marks a write in flight and falls back to `Connected` once the
//! write completes. Any active state may jump straight to `Closed` when the
//! server closes or the transport fails.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Connection state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, or a connect attempt is in progress.
    Connecting = 0,
    /// Handshake done, no write in flight.
    Connected = 1,
    /// A write is in flight.
    Open = 2,
    /// Local close started.
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Whether data may be sent in this state.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Connected | Self::Open)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Connecting, Connected | Closed)
                | (Connected, Open | Closing | Closed)
                | (Open, Connected | Closing | Closed)
                | (Closing, Closed)
                | (Closed, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free state cell shared between the session handle and its receive
/// task.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from exactly `from` to `to`. Fails with the current state when it
    /// is not `from` or the transition is illegal.
    pub fn transition_from(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        if !from.can_transition_to(to) {
            return Err(from);
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| tracing::trace!(%from, %to, "state transition"))
            .map_err(ConnectionState::from_u8)
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new(ConnectionState::Connecting)
    }
}
