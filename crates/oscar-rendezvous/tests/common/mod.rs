#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use oscar_oft::{OftFrameType, OftHeader, checksum, read_header, write_header};
use oscar_proxy::{ProxyMessage, read_frame, write_frame};
use oscar_rendezvous::{PeerStream, RendezvousConfig, TimeoutPolicy, Transport};
use oscar_types::{Capability, Cookie, FileMeta, IcbmEvent, PeerHints, RendezvousEvent, RendezvousPropose};

pub const RELAY_HOST: &str = "relay.test";
pub const RELAY_PORT: u16 = 5190;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("oscar_rendezvous=debug")
        .with_test_writer()
        .try_init();
}

pub fn config(screen_name: &str) -> RendezvousConfig {
    RendezvousConfig {
        screen_name: screen_name.to_string(),
        listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        advertise_ip: None,
        proxy_host: RELAY_HOST.to_string(),
        proxy_port: RELAY_PORT,
        always_use_proxy: false,
        download_dir: scratch_dir(screen_name),
        chunk_size: 4096,
        timeouts: TimeoutPolicy::default(),
    }
}

pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("oscar_rendezvous_{}_{}", tag, std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn propose(
    peer: &str,
    cookie: Cookie,
    reqnum: u16,
    capability: Capability,
    hints: PeerHints,
    file: Option<FileMeta>,
) -> IcbmEvent {
    IcbmEvent::Propose(RendezvousPropose {
        peer: peer.to_string(),
        reqnum,
        capability: capability.uuid(),
        cookie,
        hints,
        file,
        message: None,
    })
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<RendezvousEvent>) -> RendezvousEvent {
    tokio::time::timeout(Duration::from_secs(3600), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("session closed")
}

/// Read events until one matches, returning it.
pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<RendezvousEvent>, mut pred: F) -> RendezvousEvent
where
    F: FnMut(&RendezvousEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

#[derive(Clone)]
pub enum Route {
    Refuse,
    Hang,
    Accept(mpsc::UnboundedSender<DuplexStream>),
}

/// Transport whose connections are decided by the test. Accepted
/// connections hand the far end of an in-memory pipe to the test.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<(String, u16), Route>>>,
    attempts: Arc<Mutex<Vec<(String, u16)>>>,
}

impl ScriptedTransport {
    pub fn route(&self, host: &str, port: u16, route: Route) {
        self.routes
            .lock()
            .unwrap()
            .insert((host.to_string(), port), route);
    }

    pub fn accept(&self, host: &str, port: u16) -> mpsc::UnboundedReceiver<DuplexStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.route(host, port, Route::Accept(tx));
        rx
    }

    pub fn attempts(&self) -> Vec<(String, u16)> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<PeerStream>> {
        let key = (host.to_string(), port);
        self.attempts.lock().unwrap().push(key.clone());
        let route = self.routes.lock().unwrap().get(&key).cloned();
        Box::pin(async move {
            match route {
                Some(Route::Accept(tx)) => {
                    let (near, far) = tokio::io::duplex(64 * 1024);
                    tx.send(far)
                        .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
                    Ok(Box::new(near) as PeerStream)
                }
                Some(Route::Hang) => std::future::pending().await,
                Some(Route::Refuse) | None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            }
        })
    }
}

pub async fn relay_expect<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> ProxyMessage {
    let frame = read_frame(stream).await.unwrap();
    ProxyMessage::from_frame(&frame).unwrap()
}

pub async fn relay_send<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, message: ProxyMessage) {
    write_frame(stream, &message.to_frame()).await.unwrap();
}

/// Play the sending side of the OFT exchange over `stream`.
pub async fn peer_sends_file<S>(stream: &mut S, cookie: Cookie, name: &str, data: &[u8])
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sum = checksum(data);
    let prompt = OftHeader::prompt(cookie, name, data.len() as u32, sum, 0);
    write_header(stream, &prompt).await.unwrap();

    let ack = read_header(stream).await.unwrap();
    assert_eq!(ack.frame_type, OftFrameType::Ack);
    assert_eq!(ack.cookie, cookie);

    stream.write_all(data).await.unwrap();
    stream.flush().await.unwrap();

    let done = read_header(stream).await.unwrap();
    assert_eq!(done.frame_type, OftFrameType::Done);
    assert_eq!(done.bytes_received as usize, data.len());
    assert_eq!(done.received_checksum, sum);
}

/// Play the receiving side of the OFT exchange; returns the bytes received.
pub async fn peer_receives_file<S>(stream: &mut S, cookie: Cookie) -> (OftHeader, Vec<u8>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let prompt = read_header(stream).await.unwrap();
    assert_eq!(prompt.frame_type, OftFrameType::Prompt);
    let ack = prompt.ack(cookie);
    write_header(stream, &ack).await.unwrap();

    let mut data = vec![0u8; prompt.size as usize];
    stream.read_exact(&mut data).await.unwrap();
    write_header(stream, &ack.done(prompt.size, checksum(&data)))
        .await
        .unwrap();
    (prompt, data)
}
