//! Two rendezvous sessions on one machine, bridged by an in-process ICBM
//! relay. Sends a file, or opens a direct IM and says hello.
//!
//!     oscar-peer <path>          send <path> from alice to bob
//!     oscar-peer --im <text>     direct IM <text> from alice to bob

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::mpsc;
use tracing::info;

use oscar_rendezvous::loopback::{self, LoopbackPeer};
use oscar_rendezvous::{Decision, RendezvousConfig, RendezvousSession, SessionHandle, TcpTransport};
use oscar_types::{Cookie, RendezvousEvent};

enum Mode {
    SendFile(String),
    DirectIm(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oscar_rendezvous=debug,oscar_proxy=debug,oscar_peer=info".into()),
        )
        .init();

    let mode = parse_args(std::env::args().skip(1).collect())?;

    let base = RendezvousConfig::from_env();
    let alice_config = peer_config(&base, "alice");
    let mut bob_config = peer_config(&base, "bob");
    bob_config.download_dir = base.download_dir.join("received");

    let transport = Arc::new(TcpTransport);
    let (alice, alice_out, _) = RendezvousSession::spawn(alice_config, transport.clone());
    let (bob, bob_out, _) = RendezvousSession::spawn(bob_config, transport);
    loopback::bridge(
        LoopbackPeer {
            screen_name: "alice".into(),
            observed_ip: None,
            handle: alice.clone(),
            icbm: alice_out.icbm,
        },
        LoopbackPeer {
            screen_name: "bob".into(),
            observed_ip: None,
            handle: bob.clone(),
            icbm: bob_out.icbm,
        },
    );

    let (cookie, greeting) = match mode {
        Mode::SendFile(path) => (
            alice
                .propose_send("bob", &path)
                .await
                .with_context(|| format!("cannot offer {path}"))?,
            None,
        ),
        Mode::DirectIm(text) => (alice.propose_direct_im("bob").await?, Some(text)),
    };
    info!(%cookie, "proposed rendezvous");

    let bob_task = tokio::spawn(run_bob(bob, bob_out.events));
    run_alice(alice, alice_out.events, cookie, greeting).await?;
    bob_task.await??;
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Mode> {
    match args.as_slice() {
        [flag, text @ ..] if flag == "--im" && !text.is_empty() => Ok(Mode::DirectIm(text.join(" "))),
        [path] => Ok(Mode::SendFile(path.clone())),
        _ => bail!("usage: oscar-peer <path> | oscar-peer --im <text>"),
    }
}

fn peer_config(base: &RendezvousConfig, screen_name: &str) -> RendezvousConfig {
    let mut config = base.clone();
    config.screen_name = screen_name.to_string();
    if config.listen_ip.is_unspecified() {
        config.listen_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    }
    config
}

async fn run_alice(
    handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<RendezvousEvent>,
    cookie: Cookie,
    greeting: Option<String>,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        log_event("alice", &event);
        match &event {
            RendezvousEvent::Connected { .. } => {
                if let Some(text) = &greeting {
                    handle.send_im(cookie, text.as_str())?;
                }
            }
            RendezvousEvent::DirectImReceived { .. } => handle.close(cookie)?,
            RendezvousEvent::Failed { reason, .. } => bail!("alice: {reason}"),
            RendezvousEvent::Completed { .. } => return Ok(()),
            _ => {}
        }
    }
    bail!("alice's session ended early")
}

async fn run_bob(
    handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<RendezvousEvent>,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        log_event("bob", &event);
        match &event {
            RendezvousEvent::TransferRequested { cookie, .. }
            | RendezvousEvent::DirectImRequested { cookie, .. } => {
                handle.respond(*cookie, Decision::Accept { save_to: None })?;
            }
            RendezvousEvent::DirectImReceived { cookie, text, .. } => {
                handle.send_im(*cookie, format!("bob got: {text}"))?;
            }
            RendezvousEvent::Failed { reason, .. } => bail!("bob: {reason}"),
            RendezvousEvent::Completed { .. } => return Ok(()),
            _ => {}
        }
    }
    bail!("bob's session ended early")
}

fn log_event(who: &str, event: &RendezvousEvent) {
    match event {
        RendezvousEvent::Progress { .. } => {}
        _ => info!(peer = who, event = %serde_json::to_string(event).unwrap_or_default(), "rendezvous event"),
    }
}
