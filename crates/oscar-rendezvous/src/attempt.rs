//! One connection attempt per task.
//!
//! Each attempt reports back to the session through its `Reporter` and never
//! touches transfer state. Aborting the task drops whatever socket or
//! listener it holds.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use oscar_types::{Cookie, ProxyStage};

use crate::error::RendezvousError;
use crate::session::Reporter;
use crate::transport::{PeerStream, Transport, tune_socket};

/// A relay session created at some stage, as advertised to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendezvousProxyInfo {
    pub cookie: Cookie,
    pub stage: ProxyStage,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Relay login parameters shared by both login roles.
#[derive(Debug, Clone)]
pub(crate) struct RelayLogin {
    pub host: String,
    pub port: u16,
    pub screen_name: String,
    pub cookie: Cookie,
    pub capability: Uuid,
    pub stage: ProxyStage,
}

#[derive(Debug, Clone)]
pub(crate) enum AttemptPlan {
    Connect { ip: Ipv4Addr, port: u16 },
    Listen { ip: IpAddr },
    ProxyCreate(RelayLogin),
    /// `port` is the relay port the peer advertised.
    ProxyJoin { login: RelayLogin, port: u16 },
}

pub(crate) enum AttemptReport {
    /// Listener bound; the session should propose this port.
    Listening { port: u16 },
    /// Relay session created; the session should advertise it.
    RelayAssigned(RendezvousProxyInfo),
    Connected(PeerStream),
    Failed(RendezvousError),
}

pub(crate) fn spawn_attempt(
    plan: AttemptPlan,
    transport: Arc<dyn Transport>,
    reporter: Reporter,
) -> AbortHandle {
    tokio::spawn(async move {
        let result = match plan {
            AttemptPlan::Connect { ip, port } => transport
                .connect(&ip.to_string(), port)
                .await
                .map_err(RendezvousError::from),
            AttemptPlan::Listen { ip } => listen(ip, &reporter).await,
            AttemptPlan::ProxyCreate(login) => proxy_create(login, transport, &reporter).await,
            AttemptPlan::ProxyJoin { login, port } => proxy_join(login, port, transport).await,
        };
        reporter.attempt(match result {
            Ok(stream) => AttemptReport::Connected(stream),
            Err(e) => AttemptReport::Failed(e),
        });
    })
    .abort_handle()
}

async fn listen(ip: IpAddr, reporter: &Reporter) -> Result<PeerStream, RendezvousError> {
    let listener = TcpListener::bind((ip, 0)).await?;
    let port = listener.local_addr()?.port();
    reporter.attempt(AttemptReport::Listening { port });

    let (stream, addr) = listener.accept().await?;
    debug!(cookie = %reporter.cookie, %addr, "peer connected to listener");
    tune_socket(&stream)?;
    Ok(Box::new(stream))
}

async fn proxy_create(
    login: RelayLogin,
    transport: Arc<dyn Transport>,
    reporter: &Reporter,
) -> Result<PeerStream, RendezvousError> {
    let mut stream = transport.connect(&login.host, login.port).await?;
    let assigned = oscar_proxy::create(
        &mut stream,
        &login.screen_name,
        login.cookie,
        login.capability,
    )
    .await?;
    reporter.attempt(AttemptReport::RelayAssigned(RendezvousProxyInfo {
        cookie: login.cookie,
        stage: login.stage,
        ip: assigned.ip,
        port: assigned.port,
    }));

    oscar_proxy::await_ready(&mut stream).await?;
    Ok(stream)
}

async fn proxy_join(
    login: RelayLogin,
    port: u16,
    transport: Arc<dyn Transport>,
) -> Result<PeerStream, RendezvousError> {
    let mut stream = transport.connect(&login.host, login.port).await?;
    oscar_proxy::join(
        &mut stream,
        &login.screen_name,
        port,
        login.cookie,
        login.capability,
    )
    .await?;
    Ok(stream)
}
