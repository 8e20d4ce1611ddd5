/// Relay frame layout (big-endian):
///
/// ```text
/// [0..2]   length of everything after this field
/// [2..4]   version (0x044a)
/// [4..6]   command
/// [6..10]  reserved
/// [10..12] flags
/// [12..]   payload
/// ```
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProxyError;

pub const PROXY_VERSION: u16 = 0x044a;

/// Bytes following the length field before the payload starts.
const FIXED_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCommand {
    Error,
    /// Create a relay session.
    InitSend,
    /// Relay address assigned to a created session.
    Ack,
    /// Join a relay session.
    InitRecv,
    /// Both legs are connected; the socket now carries peer data.
    Ready,
}

impl ProxyCommand {
    pub fn code(self) -> u16 {
        match self {
            Self::Error => 0x0001,
            Self::InitSend => 0x0002,
            Self::Ack => 0x0003,
            Self::InitRecv => 0x0004,
            Self::Ready => 0x0005,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ProxyError> {
        Ok(match code {
            0x0001 => Self::Error,
            0x0002 => Self::InitSend,
            0x0003 => Self::Ack,
            0x0004 => Self::InitRecv,
            0x0005 => Self::Ready,
            other => return Err(ProxyError::UnknownCommand(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyFrame {
    pub command: ProxyCommand,
    pub flags: u16,
    pub payload: Bytes,
}

impl ProxyFrame {
    pub fn new(command: ProxyCommand, payload: Bytes) -> Self {
        Self {
            command,
            flags: 0,
            payload,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(2 + FIXED_LEN + self.payload.len());
        buf.put_u16((FIXED_LEN + self.payload.len()) as u16);
        buf.put_u16(PROXY_VERSION);
        buf.put_u16(self.command.code());
        buf.put_u32(0);
        buf.put_u16(self.flags);
        buf.put_slice(&self.payload);
        buf
    }
}

/// Read one length-prefixed relay frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<ProxyFrame, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    if len < FIXED_LEN {
        return Err(ProxyError::ShortFrame(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let version = u16::from_be_bytes([body[0], body[1]]);
    if version != PROXY_VERSION {
        return Err(ProxyError::BadVersion(version));
    }
    let command = ProxyCommand::from_code(u16::from_be_bytes([body[2], body[3]]))?;
    let flags = u16::from_be_bytes([body[8], body[9]]);
    let payload = Bytes::from(body).slice(FIXED_LEN..);

    Ok(ProxyFrame {
        command,
        flags,
        payload,
    })
}

pub async fn write_frame<W>(writer: &mut W, frame: &ProxyFrame) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}
