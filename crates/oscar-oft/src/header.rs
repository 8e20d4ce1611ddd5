/// OFT2 file header.
///
/// ```text
/// [0..4]     "OFT2"
/// [4..6]     header length (>= 256)
/// [6..8]     frame type
/// [8..16]    cookie
/// [16..28]   encrypt, compress, total files, files left, total parts, parts left (u16 each)
/// [28..68]   total size, size, mod time, checksum, resource fork checksum,
///            resource fork size, creation time, resource fork checksum,
///            bytes received, received checksum (u32 each)
/// [68..100]  id string, "Cool FileXfer" null padded
/// [100..103] flags, name offset, size offset
/// [103..172] reserved
/// [172..188] mac file info
/// [188..192] name encoding, name language
/// [192..]    file name, null padded to at least 64 bytes
/// ```
///
/// All integers are big-endian.
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use oscar_types::Cookie;

use crate::OftError;
use crate::checksum::CHECKSUM_INITIAL;

pub const OFT_MAGIC: [u8; 4] = *b"OFT2";

/// Length of a header whose name fits the fixed 64-byte field.
pub const OFT_HEADER_LEN: usize = 256;

/// Offset of the name field.
const NAME_OFFSET: usize = 192;

/// Minimum size of the name field.
const NAME_FIELD_MIN: usize = 64;

/// Headers longer than this are treated as garbage.
const MAX_HEADER_LEN: usize = 2048;

const ID_STRING: &[u8] = b"Cool FileXfer";

const FLAGS_DEFAULT: u8 = 0x20;
const FLAGS_DONE: u8 = 0x21;

const ENCODING_ASCII: u16 = 0x0000;
const ENCODING_UCS2BE: u16 = 0x0002;
const ENCODING_LATIN1: u16 = 0x0003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OftFrameType {
    Prompt,
    Ack,
    Done,
    Resume,
    ResumeAccept,
    ResumeAck,
}

impl OftFrameType {
    pub fn code(self) -> u16 {
        match self {
            Self::Prompt => 0x0101,
            Self::Ack => 0x0202,
            Self::Done => 0x0204,
            Self::Resume => 0x0205,
            Self::ResumeAccept => 0x0106,
            Self::ResumeAck => 0x0207,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, OftError> {
        Ok(match code {
            0x0101 => Self::Prompt,
            0x0202 => Self::Ack,
            0x0204 => Self::Done,
            0x0205 => Self::Resume,
            0x0106 => Self::ResumeAccept,
            0x0207 => Self::ResumeAck,
            other => return Err(OftError::UnknownFrameType(other)),
        })
    }
}

/// Parsed OFT2 header. Fields the engine never interprets are still carried
/// so a header can be echoed back unchanged apart from type and cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OftHeader {
    pub frame_type: OftFrameType,
    pub cookie: Cookie,
    pub encrypt: u16,
    pub compress: u16,
    pub total_files: u16,
    pub files_left: u16,
    pub total_parts: u16,
    pub parts_left: u16,
    pub total_size: u32,
    pub size: u32,
    pub mod_time: u32,
    pub checksum: u32,
    pub rfork_received_checksum: u32,
    pub rfork_size: u32,
    pub create_time: u32,
    pub rfork_checksum: u32,
    pub bytes_received: u32,
    pub received_checksum: u32,
    pub id_string: [u8; 32],
    pub flags: u8,
    pub name_offset: u8,
    pub size_offset: u8,
    pub mac_file_info: [u8; 16],
    pub name_encoding: u16,
    pub name_language: u16,
    pub name: String,
}

impl OftHeader {
    /// PROMPT describing a single file.
    pub fn prompt(cookie: Cookie, name: &str, size: u32, checksum: u32, mod_time: u32) -> Self {
        let mut id_string = [0u8; 32];
        id_string[..ID_STRING.len()].copy_from_slice(ID_STRING);
        Self {
            frame_type: OftFrameType::Prompt,
            cookie,
            encrypt: 0,
            compress: 0,
            total_files: 1,
            files_left: 1,
            total_parts: 1,
            parts_left: 1,
            total_size: size,
            size,
            mod_time,
            checksum,
            rfork_received_checksum: CHECKSUM_INITIAL,
            rfork_size: 0,
            create_time: 0,
            rfork_checksum: CHECKSUM_INITIAL,
            bytes_received: 0,
            received_checksum: CHECKSUM_INITIAL,
            id_string,
            flags: FLAGS_DEFAULT,
            name_offset: 0x1c,
            size_offset: 0x11,
            mac_file_info: [0; 16],
            name_encoding: ENCODING_ASCII,
            name_language: 0,
            name: name.to_string(),
        }
    }

    /// Receiver's answer to a PROMPT, carrying the receiver's own cookie.
    pub fn ack(&self, cookie: Cookie) -> Self {
        Self {
            frame_type: OftFrameType::Ack,
            cookie,
            ..self.clone()
        }
    }

    /// Receiver's report once the declared size has arrived.
    pub fn done(&self, bytes_received: u32, received_checksum: u32) -> Self {
        Self {
            frame_type: OftFrameType::Done,
            flags: FLAGS_DONE,
            files_left: 0,
            parts_left: 0,
            bytes_received,
            received_checksum,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> BytesMut {
        let (encoding, name_bytes, nul_width) = encode_name(&self.name);
        let field_len = (name_bytes.len() + nul_width)
            .max(NAME_FIELD_MIN)
            .min(MAX_HEADER_LEN - NAME_OFFSET);
        let header_len = NAME_OFFSET + field_len;

        let mut buf = BytesMut::with_capacity(header_len);
        buf.put_slice(&OFT_MAGIC);
        buf.put_u16(header_len as u16);
        buf.put_u16(self.frame_type.code());
        buf.put_slice(self.cookie.as_bytes());
        buf.put_u16(self.encrypt);
        buf.put_u16(self.compress);
        buf.put_u16(self.total_files);
        buf.put_u16(self.files_left);
        buf.put_u16(self.total_parts);
        buf.put_u16(self.parts_left);
        buf.put_u32(self.total_size);
        buf.put_u32(self.size);
        buf.put_u32(self.mod_time);
        buf.put_u32(self.checksum);
        buf.put_u32(self.rfork_received_checksum);
        buf.put_u32(self.rfork_size);
        buf.put_u32(self.create_time);
        buf.put_u32(self.rfork_checksum);
        buf.put_u32(self.bytes_received);
        buf.put_u32(self.received_checksum);
        buf.put_slice(&self.id_string);
        buf.put_u8(self.flags);
        buf.put_u8(self.name_offset);
        buf.put_u8(self.size_offset);
        buf.put_bytes(0, 69);
        buf.put_slice(&self.mac_file_info);
        buf.put_u16(encoding);
        buf.put_u16(self.name_language);

        let copy = name_bytes.len().min(field_len - nul_width);
        buf.put_slice(&name_bytes[..copy]);
        buf.put_bytes(0, field_len - copy);
        debug_assert_eq!(buf.len(), header_len);
        buf
    }

    /// Decode a complete header (magic through end of name field).
    pub fn decode(data: &[u8]) -> Result<Self, OftError> {
        if data.len() < OFT_HEADER_LEN {
            return Err(OftError::ShortHeader(data.len()));
        }
        let mut buf = data;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != OFT_MAGIC {
            return Err(OftError::BadMagic(magic));
        }
        let header_len = buf.get_u16();
        if (header_len as usize) < OFT_HEADER_LEN || header_len as usize > MAX_HEADER_LEN {
            return Err(OftError::BadHeaderLength(header_len));
        }
        if data.len() < header_len as usize {
            return Err(OftError::ShortHeader(data.len()));
        }
        let frame_type = OftFrameType::from_code(buf.get_u16())?;
        let mut cookie = [0u8; 8];
        buf.copy_to_slice(&mut cookie);

        let encrypt = buf.get_u16();
        let compress = buf.get_u16();
        let total_files = buf.get_u16();
        let files_left = buf.get_u16();
        let total_parts = buf.get_u16();
        let parts_left = buf.get_u16();
        let total_size = buf.get_u32();
        let size = buf.get_u32();
        let mod_time = buf.get_u32();
        let checksum = buf.get_u32();
        let rfork_received_checksum = buf.get_u32();
        let rfork_size = buf.get_u32();
        let create_time = buf.get_u32();
        let rfork_checksum = buf.get_u32();
        let bytes_received = buf.get_u32();
        let received_checksum = buf.get_u32();
        let mut id_string = [0u8; 32];
        buf.copy_to_slice(&mut id_string);
        let flags = buf.get_u8();
        let name_offset = buf.get_u8();
        let size_offset = buf.get_u8();
        buf.advance(69);
        let mut mac_file_info = [0u8; 16];
        buf.copy_to_slice(&mut mac_file_info);
        let name_encoding = buf.get_u16();
        let name_language = buf.get_u16();
        let name = decode_name(name_encoding, &data[NAME_OFFSET..header_len as usize]);

        Ok(Self {
            frame_type,
            cookie: Cookie(cookie),
            encrypt,
            compress,
            total_files,
            files_left,
            total_parts,
            parts_left,
            total_size,
            size,
            mod_time,
            checksum,
            rfork_received_checksum,
            rfork_size,
            create_time,
            rfork_checksum,
            bytes_received,
            received_checksum,
            id_string,
            flags,
            name_offset,
            size_offset,
            mac_file_info,
            name_encoding,
            name_language,
            name,
        })
    }
}

/// ASCII names go out as-is, anything else as UCS-2BE.
fn encode_name(name: &str) -> (u16, Vec<u8>, usize) {
    if name.is_ascii() {
        (ENCODING_ASCII, name.as_bytes().to_vec(), 1)
    } else {
        let bytes = name.encode_utf16().flat_map(u16::to_be_bytes).collect();
        (ENCODING_UCS2BE, bytes, 2)
    }
}

fn decode_name(encoding: u16, field: &[u8]) -> String {
    match encoding {
        ENCODING_UCS2BE => {
            let units: Vec<u16> = field
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect();
            String::from_utf16_lossy(&units)
        }
        ENCODING_LATIN1 => field
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect(),
        _ => {
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            String::from_utf8_lossy(&field[..end]).into_owned()
        }
    }
}

/// Read one header off the stream.
pub async fn read_header<R>(reader: &mut R) -> Result<OftHeader, OftError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 6];
    reader.read_exact(&mut prefix).await?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&prefix[..4]);
    if magic != OFT_MAGIC {
        return Err(OftError::BadMagic(magic));
    }
    let header_len = u16::from_be_bytes([prefix[4], prefix[5]]);
    if (header_len as usize) < OFT_HEADER_LEN || header_len as usize > MAX_HEADER_LEN {
        return Err(OftError::BadHeaderLength(header_len));
    }

    let mut data = vec![0u8; header_len as usize];
    data[..6].copy_from_slice(&prefix);
    reader.read_exact(&mut data[6..]).await?;
    OftHeader::decode(&data)
}

pub async fn write_header<W>(writer: &mut W, header: &OftHeader) -> Result<(), OftError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}
