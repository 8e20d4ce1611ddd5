//! Wire framing for data carried over a live rendezvous connection.
//!
//! - OFT2 file headers exchanged around a file body (PROMPT / ACK / DONE)
//! - The AIM rolling file checksum
//! - ODC2 direct-IM frames and their text + inline-image message bodies

pub mod checksum;
pub mod header;
pub mod odc;

use thiserror::Error;

pub use checksum::{OftChecksum, CHECKSUM_INITIAL, checksum};
pub use header::{OftFrameType, OftHeader, OFT_HEADER_LEN, OFT_MAGIC, read_header, write_header};
pub use odc::{
    DirectImBody, ImgTag, InlineImage, ODC_HEADER_LEN, ODC_MAGIC, ODC_MAX_PAYLOAD, OdcFrame,
    img_tags, read_frame, write_frame,
};

#[derive(Debug, Error)]
pub enum OftError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("header too short: {0} bytes")]
    ShortHeader(usize),
    #[error("unsupported header length {0}")]
    BadHeaderLength(u16),
    #[error("unknown frame type 0x{0:04x}")]
    UnknownFrameType(u16),
    #[error("frame payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),
    #[error("malformed message body: {0}")]
    MalformedBody(&'static str),
}
