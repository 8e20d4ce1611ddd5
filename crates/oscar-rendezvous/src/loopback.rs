//! In-process stand-in for the OSCAR server's ICBM relay.
//!
//! Forwards one session's outbound rendezvous commands to another session as
//! inbound events, stamping the sender's screen name and server-observed
//! address the way the real server would.

use std::net::Ipv4Addr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use oscar_types::{IcbmCommand, IcbmEvent, RendezvousPropose};

use crate::handle::SessionHandle;

/// One side of a bridged conversation.
pub struct LoopbackPeer {
    pub screen_name: String,
    /// Address the "server" reports as verified for this peer. `None` copies
    /// the peer's self-declared client IP.
    pub observed_ip: Option<Ipv4Addr>,
    pub handle: SessionHandle,
    pub icbm: mpsc::UnboundedReceiver<IcbmCommand>,
}

/// Wire two sessions together. The returned tasks end when either session
/// drops its command channel.
pub fn bridge(a: LoopbackPeer, b: LoopbackPeer) -> (JoinHandle<()>, JoinHandle<()>) {
    let a_to_b = tokio::spawn(forward(
        a.screen_name.clone(),
        a.observed_ip,
        a.icbm,
        b.handle.clone(),
    ));
    let b_to_a = tokio::spawn(forward(b.screen_name, b.observed_ip, b.icbm, a.handle));
    (a_to_b, b_to_a)
}

/// Deliver everything `from` sends to the session behind `to`.
pub async fn forward(
    from: String,
    observed_ip: Option<Ipv4Addr>,
    mut commands: mpsc::UnboundedReceiver<IcbmCommand>,
    to: SessionHandle,
) {
    while let Some(command) = commands.recv().await {
        let event = stamp(&from, observed_ip, command);
        debug!(%from, cookie = %event_cookie(&event), "relaying rendezvous ICBM");
        if to.deliver(event).is_err() {
            break;
        }
    }
}

/// Rewrite an outbound command into what the recipient would receive.
pub fn stamp(from: &str, observed_ip: Option<Ipv4Addr>, command: IcbmCommand) -> IcbmEvent {
    match command {
        IcbmCommand::Propose(mut propose) => {
            propose.hints.verified_ip = observed_ip.or(propose.hints.client_ip);
            IcbmEvent::Propose(RendezvousPropose {
                peer: from.to_string(),
                ..propose
            })
        }
        IcbmCommand::Cancel { cookie, .. } => IcbmEvent::Cancel {
            peer: from.to_string(),
            cookie,
        },
    }
}

fn event_cookie(event: &IcbmEvent) -> oscar_types::Cookie {
    match event {
        IcbmEvent::Propose(p) => p.cookie,
        IcbmEvent::Cancel { cookie, .. } | IcbmEvent::Accept { cookie, .. } => *cookie,
    }
}
