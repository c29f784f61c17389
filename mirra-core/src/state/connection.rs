//! Session state machine shared by the producer and the consumer.
//!
//! Models the lifecycle of one peer session with validated transitions
//! that return `Result` instead of panicking.

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::MirraError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of a streaming session.
///
/// ```text
///  Idle ──► AwaitingPeer ──► Configuring ──► Active
///   ▲            ▲                │             │
///   │            └────────────────┴─────────────┤ peer replaced / error
///   └───────────────────────────────────────────┘ stop
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Not serving anyone. Initial / terminal state.
    #[default]
    Idle,

    /// Producer listening for a handshake, or consumer waiting for the
    /// config reply.
    AwaitingPeer,

    /// A peer is known; the session config is being exchanged.
    Configuring { peer: SocketAddr },

    /// Session config exchanged; frames flow.
    Active {
        peer: SocketAddr,
        /// When the session became active.
        since: Instant,
    },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AwaitingPeer => write!(f, "AwaitingPeer"),
            Self::Configuring { peer } => write!(f, "Configuring({peer})"),
            Self::Active { peer, .. } => write!(f, "Active({peer})"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The peer of a configuring or active session.
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Self::Configuring { peer } | Self::Active { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    /// How long the session has been active.
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Active { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `AwaitingPeer`.
    ///
    /// Valid from: `Idle`, `AwaitingPeer` (retry).
    pub fn begin_waiting(&mut self) -> Result<(), MirraError> {
        match self {
            Self::Idle | Self::AwaitingPeer => {
                *self = Self::AwaitingPeer;
                Ok(())
            }
            _ => Err(MirraError::ProtocolViolation(
                "cannot wait for a peer: a session is in progress",
            )),
        }
    }

    /// Transition to `Configuring`.
    ///
    /// Valid from: `AwaitingPeer`.
    pub fn peer_found(&mut self, peer: SocketAddr) -> Result<(), MirraError> {
        match self {
            Self::AwaitingPeer => {
                *self = Self::Configuring { peer };
                Ok(())
            }
            _ => Err(MirraError::ProtocolViolation(
                "cannot configure: not awaiting a peer",
            )),
        }
    }

    /// Transition to `Active`.
    ///
    /// Valid from: `Configuring`.
    pub fn configured(&mut self) -> Result<(), MirraError> {
        match self {
            Self::Configuring { peer } => {
                *self = Self::Active {
                    peer: *peer,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(MirraError::ProtocolViolation(
                "cannot activate: not configuring",
            )),
        }
    }

    /// Transition back to `AwaitingPeer` after the peer was replaced or
    /// the session failed.
    ///
    /// Valid from: `Configuring`, `Active`.
    pub fn peer_lost(&mut self) -> Result<(), MirraError> {
        match self {
            Self::Configuring { .. } | Self::Active { .. } => {
                *self = Self::AwaitingPeer;
                Ok(())
            }
            _ => Err(MirraError::ProtocolViolation(
                "cannot lose a peer: no session in progress",
            )),
        }
    }

    /// Explicit stop: back to `Idle` from anywhere.
    pub fn stop(&mut self) {
        *self = Self::Idle;
    }
}

// ── Tests ────────────────────────────────────────────────────────
