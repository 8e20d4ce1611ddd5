//! Client side of the relay login exchange.
//!
//! The functions take the already-connected relay socket by reference so the
//! caller keeps ownership: after `READY` the same socket is the data channel.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use uuid::Uuid;

use oscar_types::Cookie;

use crate::frame::{read_frame, write_frame};
use crate::message::ProxyMessage;
use crate::{ProxyError, RelayErrorCode};

/// Where the relay listens for the joining side of a created session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayAssignment {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Send `INIT_SEND` and wait for the relay's `ACK`.
pub async fn create<S>(
    stream: &mut S,
    screen_name: &str,
    cookie: Cookie,
    capability: Uuid,
) -> Result<RelayAssignment, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = ProxyMessage::InitSend {
        screen_name: screen_name.to_string(),
        cookie,
        capability,
    };
    write_frame(stream, &request.to_frame()).await?;
    debug!(cookie = %cookie, "relay: sent INIT_SEND");

    match next_message(stream).await? {
        ProxyMessage::Ack { port, ip } => {
            debug!(cookie = %cookie, %ip, port, "relay: session created");
            Ok(RelayAssignment { ip, port })
        }
        other => Err(ProxyError::Unexpected(other.command())),
    }
}

/// Wait for `READY` on a created session once the peer has joined.
pub async fn await_ready<S>(stream: &mut S) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match next_message(stream).await? {
        ProxyMessage::Ready => Ok(()),
        other => Err(ProxyError::Unexpected(other.command())),
    }
}

/// Send `INIT_RECV` for a session the peer created and wait for `READY`.
pub async fn join<S>(
    stream: &mut S,
    screen_name: &str,
    port: u16,
    cookie: Cookie,
    capability: Uuid,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = ProxyMessage::InitRecv {
        screen_name: screen_name.to_string(),
        port,
        cookie,
        capability,
    };
    write_frame(stream, &request.to_frame()).await?;
    debug!(cookie = %cookie, port, "relay: sent INIT_RECV");

    await_ready(stream).await
}

/// Next relay message, with `ERROR` turned into `ProxyError::Rejected`.
async fn next_message<S>(stream: &mut S) -> Result<ProxyMessage, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let frame = read_frame(stream).await?;
    match ProxyMessage::from_frame(&frame)? {
        ProxyMessage::Error { code } => Err(ProxyError::Rejected(RelayErrorCode(code))),
        msg => Ok(msg),
    }
}
