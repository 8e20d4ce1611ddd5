use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use oscar_types::Cookie;

use crate::ProxyError;
use crate::frame::{ProxyCommand, ProxyFrame};

/// TLV type carrying the rendezvous capability in login requests.
const TLV_CAPABILITY: u16 = 0x0001;

/// Typed view of a relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMessage {
    InitSend {
        screen_name: String,
        cookie: Cookie,
        capability: Uuid,
    },
    InitRecv {
        screen_name: String,
        port: u16,
        cookie: Cookie,
        capability: Uuid,
    },
    Ack {
        port: u16,
        ip: Ipv4Addr,
    },
    Ready,
    Error {
        code: u16,
    },
}

impl ProxyMessage {
    pub fn command(&self) -> ProxyCommand {
        match self {
            Self::InitSend { .. } => ProxyCommand::InitSend,
            Self::InitRecv { .. } => ProxyCommand::InitRecv,
            Self::Ack { .. } => ProxyCommand::Ack,
            Self::Ready => ProxyCommand::Ready,
            Self::Error { .. } => ProxyCommand::Error,
        }
    }

    pub fn to_frame(&self) -> ProxyFrame {
        let mut payload = BytesMut::new();
        match self {
            Self::InitSend {
                screen_name,
                cookie,
                capability,
            } => {
                put_screen_name(&mut payload, screen_name);
                payload.put_slice(cookie.as_bytes());
                put_capability(&mut payload, capability);
            }
            Self::InitRecv {
                screen_name,
                port,
                cookie,
                capability,
            } => {
                put_screen_name(&mut payload, screen_name);
                payload.put_u16(*port);
                payload.put_slice(cookie.as_bytes());
                put_capability(&mut payload, capability);
            }
            Self::Ack { port, ip } => {
                payload.put_u16(*port);
                payload.put_slice(&ip.octets());
            }
            Self::Ready => {}
            Self::Error { code } => payload.put_u16(*code),
        }
        ProxyFrame::new(self.command(), payload.freeze())
    }

    pub fn from_frame(frame: &ProxyFrame) -> Result<Self, ProxyError> {
        let mut buf: Bytes = frame.payload.clone();
        let short = |buf: &Bytes| ProxyError::ShortFrame(buf.len());
        match frame.command {
            ProxyCommand::InitSend => {
                let screen_name = get_screen_name(&mut buf)?;
                if buf.remaining() < 8 {
                    return Err(short(&buf));
                }
                let cookie = get_cookie(&mut buf);
                let capability = get_capability(&mut buf)?;
                Ok(Self::InitSend {
                    screen_name,
                    cookie,
                    capability,
                })
            }
            ProxyCommand::InitRecv => {
                let screen_name = get_screen_name(&mut buf)?;
                if buf.remaining() < 10 {
                    return Err(short(&buf));
                }
                let port = buf.get_u16();
                let cookie = get_cookie(&mut buf);
                let capability = get_capability(&mut buf)?;
                Ok(Self::InitRecv {
                    screen_name,
                    port,
                    cookie,
                    capability,
                })
            }
            ProxyCommand::Ack => {
                if buf.remaining() < 6 {
                    return Err(short(&buf));
                }
                let port = buf.get_u16();
                let ip = Ipv4Addr::from(buf.get_u32());
                Ok(Self::Ack { port, ip })
            }
            ProxyCommand::Ready => Ok(Self::Ready),
            ProxyCommand::Error => {
                let code = if buf.remaining() >= 2 { buf.get_u16() } else { 0 };
                Ok(Self::Error { code })
            }
        }
    }
}

fn put_screen_name(buf: &mut BytesMut, screen_name: &str) {
    let bytes = screen_name.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&bytes[..len]);
}

fn get_screen_name(buf: &mut Bytes) -> Result<String, ProxyError> {
    if !buf.has_remaining() {
        return Err(ProxyError::ShortFrame(0));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(ProxyError::ShortFrame(buf.remaining()));
    }
    let name = buf.split_to(len);
    Ok(String::from_utf8_lossy(&name).into_owned())
}

fn get_cookie(buf: &mut Bytes) -> Cookie {
    let mut cookie = [0u8; 8];
    buf.copy_to_slice(&mut cookie);
    Cookie(cookie)
}

fn put_capability(buf: &mut BytesMut, capability: &Uuid) {
    buf.put_u16(TLV_CAPABILITY);
    buf.put_u16(16);
    buf.put_slice(capability.as_bytes());
}

/// Walk the trailing TLV block looking for the capability.
fn get_capability(buf: &mut Bytes) -> Result<Uuid, ProxyError> {
    while buf.remaining() >= 4 {
        let tlv_type = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(ProxyError::ShortFrame(buf.remaining()));
        }
        let value = buf.split_to(len);
        if tlv_type == TLV_CAPABILITY && len == 16 {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&value);
            return Ok(Uuid::from_bytes(raw));
        }
    }
    Err(ProxyError::ShortFrame(buf.remaining()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscar_types::Capability;

    #[test]
    fn init_recv_layout() {
        let msg = ProxyMessage::InitRecv {
            screen_name: "abc".into(),
            port: 0x1388,
            cookie: Cookie([7; 8]),
            capability: Capability::SendFile.uuid(),
        };
        let payload = msg.to_frame().payload;
        assert_eq!(&payload[..4], &[3, b'a', b'b', b'c']);
        assert_eq!(&payload[4..6], &[0x13, 0x88]);
        assert_eq!(&payload[6..14], &[7; 8]);
        assert_eq!(&payload[14..18], &[0x00, 0x01, 0x00, 0x10]);
        assert_eq!(&payload[18..], Capability::SendFile.uuid().as_bytes());
    }

    #[test]
    fn messages_decode_from_frames() {
        let messages = [
            ProxyMessage::InitSend {
                screen_name: "someone".into(),
                cookie: Cookie([1; 8]),
                capability: Capability::DirectIm.uuid(),
            },
            ProxyMessage::Ack {
                port: 4443,
                ip: Ipv4Addr::new(64, 12, 0, 1),
            },
            ProxyMessage::Ready,
            ProxyMessage::Error { code: 0x001a },
        ];
        for msg in messages {
            assert_eq!(ProxyMessage::from_frame(&msg.to_frame()).unwrap(), msg);
        }
    }

    #[test]
    fn truncated_ack_is_rejected() {
        let frame = ProxyFrame::new(ProxyCommand::Ack, Bytes::from_static(&[0x13]));
        assert!(matches!(ProxyMessage::from_frame(&frame), Err(ProxyError::ShortFrame(1))));
    }
}
