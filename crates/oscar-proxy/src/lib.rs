//! Rendezvous proxy (relay) login protocol.
//!
//! A relay splices two TCP connections that logged in under the same cookie.
//! One side creates the session (`INIT_SEND`) and is told where the relay
//! listens for the other side (`ACK`); the other side joins it (`INIT_RECV`).
//! The relay answers both with `READY`, after which the login socket carries
//! the peer-to-peer stream unchanged.

pub mod client;
pub mod frame;
pub mod message;

use thiserror::Error;

pub use client::{RelayAssignment, await_ready, create, join};
pub use frame::{PROXY_VERSION, ProxyCommand, ProxyFrame, read_frame, write_frame};
pub use message::ProxyMessage;

/// Well-known AOL rendezvous relay.
pub const DEFAULT_PROXY_HOST: &str = "ars.oscar.aol.com";
pub const DEFAULT_PROXY_PORT: u16 = 5190;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported proxy protocol version 0x{0:04x}")]
    BadVersion(u16),
    #[error("proxy frame too short ({0} bytes)")]
    ShortFrame(usize),
    #[error("unknown proxy command 0x{0:04x}")]
    UnknownCommand(u16),
    #[error("unexpected {0:?} during relay login")]
    Unexpected(ProxyCommand),
    #[error("relay refused login: {0}")]
    Rejected(RelayErrorCode),
}

/// Error code carried by a relay `ERROR` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayErrorCode(pub u16);

impl RelayErrorCode {
    pub fn description(self) -> &'static str {
        match self.0 {
            0x000d | 0x000e => "bad request",
            0x0010 => "request timed out",
            0x001a => "accept period timed out",
            _ => "unknown error",
        }
    }
}

impl std::fmt::Display for RelayErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:04x})", self.description(), self.0)
    }
}
