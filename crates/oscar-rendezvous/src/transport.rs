use std::io;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Anything that can carry a rendezvous byte stream.
pub trait PeerIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerIo for T {}

pub type PeerStream = Box<dyn PeerIo>;

/// Outbound connection seam. Host names (the relay) are resolved inside the
/// returned future, on the runtime.
pub trait Transport: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<PeerStream>>;
}

/// Plain, unauthenticated TCP, as OSCAR rendezvous has always been.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<PeerStream>> {
        let host = host.to_string();
        Box::pin(async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            tune_socket(&stream)?;
            Ok(Box::new(stream) as PeerStream)
        })
    }
}

/// Latency matters more than throughput for the small handshake frames.
pub(crate) fn tune_socket(stream: &TcpStream) -> io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_nodelay(true)?;
    Ok(())
}
