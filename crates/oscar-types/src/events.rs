use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConnectionMethod, Cookie, FileMeta, PeerHints, ProxyStage};

/// A channel-2 rendezvous propose, as parsed (inbound) or to be built
/// (outbound) by the ICBM envelope layer.
///
/// `reqnum` 1 is the initial request; 2 and 3 re-propose an existing cookie
/// with a different connection method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousPropose {
    pub peer: String,
    pub reqnum: u16,
    pub capability: Uuid,
    pub cookie: Cookie,
    pub hints: PeerHints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Rendezvous notifications delivered by the ICBM envelope layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IcbmEvent {
    Propose(RendezvousPropose),
    Cancel { peer: String, cookie: Cookie },
    Accept { peer: String, cookie: Cookie },
}

/// Rendezvous messages the engine asks the ICBM envelope layer to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IcbmCommand {
    Propose(RendezvousPropose),
    Cancel { peer: String, cookie: Cookie },
}

/// Why a transfer ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    PeerUnreachable,
    ProxyLoginFailed { code: u16 },
    CancelledByPeer,
    CancelledLocally,
    ConnectionLost(String),
    LocalIo(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerUnreachable => f.write_str("Unable to establish a connection with the remote user"),
            Self::ProxyLoginFailed { code } => {
                write!(f, "The proxy server refused the connection (code 0x{:04x})", code)
            }
            Self::CancelledByPeer => f.write_str("The remote user cancelled the transfer"),
            Self::CancelledLocally => f.write_str("You cancelled the transfer"),
            Self::ConnectionLost(detail) => write!(f, "Connection lost: {}", detail),
            Self::LocalIo(detail) => write!(f, "Local file error: {}", detail),
        }
    }
}

/// Events sent to the UI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RendezvousEvent {
    /// A peer wants to send us a file; answer with an accept/deny decision.
    TransferRequested {
        cookie: Cookie,
        peer: String,
        file: FileMeta,
    },

    /// A peer wants to open a direct IM session.
    DirectImRequested { cookie: Cookie, peer: String },

    /// A connection attempt is starting.
    Connecting {
        cookie: Cookie,
        method: ConnectionMethod,
        stage: ProxyStage,
    },

    /// A live socket is bound to the transfer.
    Connected {
        cookie: Cookie,
        method: ConnectionMethod,
        stage: ProxyStage,
    },

    Progress {
        cookie: Cookie,
        bytes_done: u64,
        bytes_total: u64,
    },

    Completed {
        cookie: Cookie,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_to: Option<PathBuf>,
    },

    Failed { cookie: Cookie, reason: FailureReason },

    /// A message arrived on a connected direct IM session.
    DirectImReceived {
        cookie: Cookie,
        peer: String,
        text: String,
        images: Vec<ReceivedImage>,
    },
}

impl RendezvousEvent {
    pub fn cookie(&self) -> Cookie {
        match self {
            Self::TransferRequested { cookie, .. }
            | Self::DirectImRequested { cookie, .. }
            | Self::Connecting { cookie, .. }
            | Self::Connected { cookie, .. }
            | Self::Progress { cookie, .. }
            | Self::Completed { cookie, .. }
            | Self::Failed { cookie, .. }
            | Self::DirectImReceived { cookie, .. } => *cookie,
        }
    }

    /// Terminal events end the transfer; nothing follows them for that cookie.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// An inline image carried by a direct IM message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedImage {
    pub id: u32,
    pub name: String,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = RendezvousEvent::Failed {
            cookie: Cookie([1; 8]),
            reason: FailureReason::CancelledByPeer,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Failed");
        assert_eq!(json["data"]["reason"], "CancelledByPeer");
    }

    #[test]
    fn failure_messages_are_distinct() {
        let reasons = [
            FailureReason::PeerUnreachable,
            FailureReason::ProxyLoginFailed { code: 0x1a },
            FailureReason::CancelledByPeer,
            FailureReason::CancelledLocally,
        ];
        let texts: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        for (i, a) in texts.iter().enumerate() {
            for b in &texts[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(texts[1].contains("0x001a"));
    }
}
