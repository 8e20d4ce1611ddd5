/// AIM rolling file checksum.
///
/// A 16-bit one's-complement style sum kept in the upper half of a u32. Bytes
/// at even file offsets contribute as the high byte of a 16-bit word, bytes
/// at odd offsets as the low byte, so the running value only depends on the
/// data and not on how it was chunked.
///
/// The value is informational: both ends compute it, nothing rejects a
/// mismatch.

/// Checksum of zero bytes.
pub const CHECKSUM_INITIAL: u32 = 0xffff_0000;

#[derive(Debug, Clone, Copy)]
pub struct OftChecksum {
    value: u32,
    offset: u64,
}

impl OftChecksum {
    pub fn new() -> Self {
        Self {
            value: CHECKSUM_INITIAL,
            offset: 0,
        }
    }

    /// Fold the next chunk of the file into the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        let mut sum = (self.value >> 16) & 0xffff;
        for (i, &byte) in data.iter().enumerate() {
            let old = sum;
            let word = if (self.offset + i as u64) & 1 == 1 {
                byte as u32
            } else {
                (byte as u32) << 8
            };
            sum = sum.wrapping_sub(word);
            if sum > old {
                sum = sum.wrapping_sub(1);
            }
        }
        sum = (sum & 0xffff) + (sum >> 16);
        sum = (sum & 0xffff) + (sum >> 16);
        self.value = sum << 16;
        self.offset += data.len() as u64;
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Bytes folded in so far.
    pub fn len(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }
}

impl Default for OftChecksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum of a complete buffer.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum = OftChecksum::new();
    sum.update(data);
    sum.value()
}
