/// ODC2 direct-IM framing.
///
/// ```text
/// [0..4]    "ODC2"
/// [4..6]    header length (76)
/// [6..8]    type (0x0001)
/// [8..10]   subtype (0x0006)
/// [10..12]  reserved
/// [12..20]  cookie
/// [20..24]  reserved
/// [24..28]  payload length
/// [28..30]  text encoding
/// [30..32]  reserved
/// [32..34]  flags
/// [34..38]  reserved
/// [38..70]  sender screen name, null padded
/// [70..76]  reserved
/// [76..]    payload
/// ```
///
/// The payload is message text, optionally followed by a
/// `<BINARY><DATA ID=".." SIZE="..">bytes</DATA>...</BINARY>` section that
/// carries the inline images the text references with `<IMG ... ID="..">`.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use oscar_types::Cookie;

use crate::OftError;

pub const ODC_MAGIC: [u8; 4] = *b"ODC2";
pub const ODC_HEADER_LEN: usize = 76;

const ODC_TYPE_MESSAGE: u16 = 0x0001;
const ODC_SUBTYPE_MESSAGE: u16 = 0x0006;

/// Largest message payload either side puts on or accepts from the wire.
pub const ODC_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

pub const FLAG_AUTO_RESPONSE: u16 = 0x0001;

pub const ENCODING_ASCII: u16 = 0x0000;
pub const ENCODING_UCS2BE: u16 = 0x0002;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdcFrame {
    pub frame_type: u16,
    pub subtype: u16,
    pub cookie: Cookie,
    pub encoding: u16,
    pub flags: u16,
    pub screen_name: String,
    pub payload: Bytes,
}

impl OdcFrame {
    pub fn message(cookie: Cookie, screen_name: &str, payload: Bytes, flags: u16) -> Self {
        Self {
            frame_type: ODC_TYPE_MESSAGE,
            subtype: ODC_SUBTYPE_MESSAGE,
            cookie,
            encoding: ENCODING_ASCII,
            flags,
            screen_name: screen_name.to_string(),
            payload,
        }
    }

    /// Empty frame each side sends first to prove it holds the cookie.
    pub fn cookie_frame(cookie: Cookie, screen_name: &str) -> Self {
        Self::message(cookie, screen_name, Bytes::new(), 0)
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ODC_HEADER_LEN + self.payload.len());
        buf.put_slice(&ODC_MAGIC);
        buf.put_u16(ODC_HEADER_LEN as u16);
        buf.put_u16(self.frame_type);
        buf.put_u16(self.subtype);
        buf.put_u16(0);
        buf.put_slice(self.cookie.as_bytes());
        buf.put_u32(0);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.encoding);
        buf.put_u16(0);
        buf.put_u16(self.flags);
        buf.put_u32(0);
        let mut name = [0u8; 32];
        let sn = self.screen_name.as_bytes();
        let n = sn.len().min(31);
        name[..n].copy_from_slice(&sn[..n]);
        buf.put_slice(&name);
        buf.put_bytes(0, 6);
        buf.put_slice(&self.payload);
        buf
    }

    /// Decode a frame header, returning it with an empty payload plus the
    /// payload length still to be read.
    fn decode_header(data: &[u8; ODC_HEADER_LEN]) -> Result<(Self, u32), OftError> {
        let mut buf = &data[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != ODC_MAGIC {
            return Err(OftError::BadMagic(magic));
        }
        let header_len = buf.get_u16();
        if header_len as usize != ODC_HEADER_LEN {
            return Err(OftError::BadHeaderLength(header_len));
        }
        let frame_type = buf.get_u16();
        let subtype = buf.get_u16();
        buf.advance(2);
        let mut cookie = [0u8; 8];
        buf.copy_to_slice(&mut cookie);
        buf.advance(4);
        let payload_len = buf.get_u32();
        let encoding = buf.get_u16();
        buf.advance(2);
        let flags = buf.get_u16();
        buf.advance(4);
        let name = &buf[..32];
        let end = name.iter().position(|&b| b == 0).unwrap_or(32);
        let screen_name = String::from_utf8_lossy(&name[..end]).into_owned();

        if payload_len > ODC_MAX_PAYLOAD {
            return Err(OftError::PayloadTooLarge(payload_len));
        }

        Ok((
            Self {
                frame_type,
                subtype,
                cookie: Cookie(cookie),
                encoding,
                flags,
                screen_name,
                payload: Bytes::new(),
            },
            payload_len,
        ))
    }
}

pub async fn read_frame<R>(reader: &mut R) -> Result<OdcFrame, OftError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; ODC_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (mut frame, payload_len) = OdcFrame::decode_header(&header)?;
    if payload_len > 0 {
        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload).await?;
        frame.payload = Bytes::from(payload);
    }
    Ok(frame)
}

pub async fn write_frame<W>(writer: &mut W, frame: &OdcFrame) -> Result<(), OftError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(frame.payload.len()).unwrap_or(u32::MAX);
    if len > ODC_MAX_PAYLOAD {
        return Err(OftError::PayloadTooLarge(len));
    }
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub id: u32,
    pub name: String,
    pub data: Vec<u8>,
}

/// An `<IMG>` tag found in message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgTag {
    /// Byte range of the whole tag in the text.
    pub start: usize,
    pub end: usize,
    pub id: Option<u32>,
    pub src: Option<String>,
}

/// Scan text for `<IMG ...>` tags.
pub fn img_tags(text: &str) -> Vec<ImgTag> {
    let bytes = text.as_bytes();
    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_ci(bytes, b"<img", pos) {
        let Some(close) = bytes[start..].iter().position(|&b| b == b'>') else {
            break;
        };
        let end = start + close + 1;
        let tag = &text[start + 4..end - 1];
        tags.push(ImgTag {
            start,
            end,
            id: attr(tag, "id").and_then(|v| v.parse().ok()),
            src: attr(tag, "src").map(str::to_string),
        });
        pos = end;
    }
    tags
}

/// Text plus inline images, the payload of an ODC2 message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectImBody {
    pub text: String,
    pub images: Vec<InlineImage>,
}

impl DirectImBody {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            self.text.len() + self.images.iter().map(|i| i.data.len() + 48).sum::<usize>(),
        );
        buf.put_slice(self.text.as_bytes());
        if !self.images.is_empty() {
            buf.put_slice(b"<BINARY>");
            for image in &self.images {
                buf.put_slice(
                    format!("<DATA ID=\"{}\" SIZE=\"{}\">", image.id, image.data.len()).as_bytes(),
                );
                buf.put_slice(&image.data);
                buf.put_slice(b"</DATA>");
            }
            buf.put_slice(b"</BINARY>");
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, OftError> {
        let Some(binary_start) = find_ci(payload, b"<binary>", 0) else {
            return Ok(Self {
                text: String::from_utf8_lossy(payload).into_owned(),
                images: Vec::new(),
            });
        };
        let text = String::from_utf8_lossy(&payload[..binary_start]).into_owned();
        let names: Vec<(u32, String)> = img_tags(&text)
            .into_iter()
            .filter_map(|tag| Some((tag.id?, tag.src?)))
            .collect();

        let mut images = Vec::new();
        let mut pos = binary_start + b"<binary>".len();
        loop {
            while pos < payload.len() && payload[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if starts_with_ci(&payload[pos..], b"</binary>") {
                break;
            }
            if !starts_with_ci(&payload[pos..], b"<data") {
                return Err(OftError::MalformedBody("expected <DATA> in binary section"));
            }
            let close = payload[pos..]
                .iter()
                .position(|&b| b == b'>')
                .ok_or(OftError::MalformedBody("unterminated <DATA> tag"))?;
            let tag = std::str::from_utf8(&payload[pos + 5..pos + close])
                .map_err(|_| OftError::MalformedBody("non-utf8 <DATA> tag"))?;
            let id: u32 = attr(tag, "id")
                .and_then(|v| v.parse().ok())
                .ok_or(OftError::MalformedBody("<DATA> without ID"))?;
            let size: usize = attr(tag, "size")
                .and_then(|v| v.parse().ok())
                .ok_or(OftError::MalformedBody("<DATA> without SIZE"))?;

            let data_start = pos + close + 1;
            let data_end = data_start
                .checked_add(size)
                .filter(|&end| end <= payload.len())
                .ok_or(OftError::MalformedBody("<DATA> runs past end of payload"))?;
            if !starts_with_ci(&payload[data_end..], b"</data>") {
                return Err(OftError::MalformedBody("missing </DATA>"));
            }

            let name = names
                .iter()
                .find(|(image_id, _)| *image_id == id)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| format!("image{}", id));
            images.push(InlineImage {
                id,
                name,
                data: payload[data_start..data_end].to_vec(),
            });
            pos = data_end + b"</data>".len();
        }

        Ok(Self { text, images })
    }
}

fn starts_with_ci(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn find_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|i| i + from)
}

/// Value of `key="value"` or `key=value` inside a tag, key matched
/// case-insensitively.
fn attr<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let bytes = tag.as_bytes();
    let mut pos = 0;
    while let Some(at) = find_ci(bytes, key.as_bytes(), pos) {
        let preceded_ok = at == 0 || bytes[at - 1].is_ascii_whitespace();
        let mut i = at + key.len();
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if preceded_ok && i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'"' {
                let rest = &tag[i + 1..];
                return rest.find('"').map(|end| &rest[..end]);
            }
            let rest = &tag[i..];
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '/')
                .unwrap_or(rest.len());
            return Some(&rest[..end]);
        }
        pos = at + key.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let cookie = Cookie([9; 8]);
        let frame = OdcFrame::message(cookie, "buddy", Bytes::from_static(b"hi"), 0);
        let wire = frame.encode();
        assert_eq!(wire.len(), ODC_HEADER_LEN + 2);
        assert_eq!(&wire[0..4], b"ODC2");
        assert_eq!(&wire[4..6], &[0, 76]);
        assert_eq!(&wire[6..10], &[0, 1, 0, 6]);
        assert_eq!(&wire[12..20], &[9; 8]);
        assert_eq!(&wire[24..28], &[0, 0, 0, 2]);
        assert_eq!(&wire[38..43], b"buddy");
        assert_eq!(&wire[76..], b"hi");
    }

    #[tokio::test]
    async fn frame_survives_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let frame = OdcFrame::message(Cookie([3; 8]), "me", Bytes::from_static(b"hello"), FLAG_AUTO_RESPONSE);
        write_frame(&mut a, &frame).await.unwrap();
        write_frame(&mut a, &OdcFrame::cookie_frame(Cookie([3; 8]), "me")).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), frame);
        assert!(read_frame(&mut b).await.unwrap().payload.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_is_not_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        let payload = Bytes::from(vec![0u8; ODC_MAX_PAYLOAD as usize + 1]);
        let frame = OdcFrame::message(Cookie([5; 8]), "me", payload, 0);
        assert!(matches!(
            write_frame(&mut a, &frame).await,
            Err(OftError::PayloadTooLarge(n)) if n == ODC_MAX_PAYLOAD + 1
        ));
    }

    #[test]
    fn body_with_images() {
        let body = DirectImBody {
            text: "look <IMG SRC=\"cat.png\" ID=\"1\" DATASIZE=\"4\"> and <img src=\"dog.gif\" id=\"2\" datasize=\"3\">".into(),
            images: vec![
                InlineImage { id: 1, name: "cat.png".into(), data: vec![0, b'<', b'>', 255] },
                InlineImage { id: 2, name: "dog.gif".into(), data: b"</D".to_vec() },
            ],
        };
        let decoded = DirectImBody::decode(&body.encode()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn body_without_binary_section() {
        let decoded = DirectImBody::decode(b"<HTML>plain</HTML>").unwrap();
        assert_eq!(decoded.text, "<HTML>plain</HTML>");
        assert!(decoded.images.is_empty());
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let payload = b"x<BINARY><DATA ID=\"1\" SIZE=\"50\">abc</DATA></BINARY>";
        assert!(matches!(
            DirectImBody::decode(payload),
            Err(OftError::MalformedBody(_))
        ));
    }

    #[test]
    fn img_tag_attributes() {
        let tags = img_tags("a <IMG ID=\"7\"> b <img src=x.png id=8>");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].id, Some(7));
        assert_eq!(tags[0].src, None);
        assert_eq!(tags[1].id, Some(8));
        assert_eq!(tags[1].src.as_deref(), Some("x.png"));
    }
}
