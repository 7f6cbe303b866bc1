//! Segment entry wire format.
//!
//! Every entry in a segment is a fixed 10-byte header followed by its
//! payload:
//!
//! ```text
//! | type (1) | reserved (1) | length (4) | checksum (4) | payload (N) |
//! ```
//!
//! All integers are little-endian. The checksum is CRC32 (IEEE) over the
//! `type`, `reserved`, and `length` fields followed by the payload, and is
//! sufficient to detect truncation or corruption of a single entry.
//!
//! Two entry types are structural and reserved: a segment always begins
//! with a `SegHeader` entry carrying a [`SegmentHeader`] payload, and a
//! sealed segment ends with a `SegFooter` entry carrying a
//! [`SegmentFooter`] payload whose checksum covers every byte written
//! before the footer's header.

use crate::error::{EngineError, EngineResult};

/// CRC32 (IEEE) lookup table, built at compile time.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Incremental CRC32 (IEEE) hasher.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Creates a fresh hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    /// Feeds bytes into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.state ^ u32::from(byte)) & 0xFF) as usize;
            self.state = (self.state >> 8) ^ CRC32_TABLE[index];
        }
    }

    /// Finishes the computation and returns the checksum.
    #[must_use]
    pub const fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the CRC32 checksum of a byte slice in one shot.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}

/// Type tag of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogEntryType {
    /// Unrecognized or uninitialized entry. Never written by the engine.
    Invalid = 0,
    /// Structural entry carrying the [`SegmentHeader`]; always first.
    SegHeader = 1,
    /// Structural entry carrying the [`SegmentFooter`]; terminates iteration.
    SegFooter = 2,
    /// A stored object.
    Object = 3,
    /// A deletion marker covering a previously stored object.
    Tombstone = 4,
}

impl LogEntryType {
    /// Converts a byte to an entry type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::SegHeader),
            2 => Some(Self::SegFooter),
            3 => Some(Self::Object),
            4 => Some(Self::Tombstone),
            _ => None,
        }
    }

    /// Converts the entry type to its wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns whether this is one of the reserved structural types.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::SegHeader | Self::SegFooter)
    }
}

/// The fixed-size prefix written before every entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Entry type tag.
    pub entry_type: LogEntryType,
    /// Payload byte count.
    pub length: u32,
    /// CRC32 over type, reserved, length, and payload.
    pub checksum: u32,
}

impl EntryHeader {
    /// Encoded size of the header in bytes.
    pub const SIZE: usize = 10;

    /// Creates a header for the given payload, computing its checksum.
    #[must_use]
    pub fn new(entry_type: LogEntryType, payload: &[u8]) -> Self {
        let length = payload.len() as u32;
        Self {
            entry_type,
            length,
            checksum: Self::compute_checksum(entry_type, length, payload),
        }
    }

    /// Computes the checksum an entry of this shape must carry.
    #[must_use]
    pub fn compute_checksum(entry_type: LogEntryType, length: u32, payload: &[u8]) -> u32 {
        let mut crc = Crc32::new();
        crc.update(&[entry_type.as_byte(), 0]);
        crc.update(&length.to_le_bytes());
        crc.update(payload);
        crc.finalize()
    }

    /// Encodes the header into its 10-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.entry_type.as_byte();
        buf[1] = 0;
        buf[2..6].copy_from_slice(&self.length.to_le_bytes());
        buf[6..10].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decodes a header from the front of `data`.
    ///
    /// Only the header itself is parsed; use [`EntryHeader::verify`] to
    /// check the payload against the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SegmentCorruption`] if `data` is too short or
    /// the type byte is unknown.
    pub fn decode(data: &[u8]) -> EngineResult<Self> {
        if data.len() < Self::SIZE {
            return Err(EngineError::segment_corruption("entry header truncated"));
        }
        let entry_type = LogEntryType::from_byte(data[0])
            .ok_or_else(|| EngineError::segment_corruption(format!("unknown entry type {}", data[0])))?;
        let length = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
        let checksum = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
        Ok(Self {
            entry_type,
            length,
            checksum,
        })
    }

    /// Verifies the stored checksum against the payload.
    #[must_use]
    pub fn verify(&self, payload: &[u8]) -> bool {
        payload.len() == self.length as usize
            && self.checksum == Self::compute_checksum(self.entry_type, self.length, payload)
    }
}

/// Payload of the structural `SegHeader` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Identity of the segment.
    pub segment_id: u64,
    /// Declared capacity; must equal the length of the buffer an iterator
    /// is constructed over.
    pub segment_capacity: u64,
}

impl SegmentHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Encodes the header into its 16-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..8].copy_from_slice(&self.segment_id.to_le_bytes());
        buf[8..].copy_from_slice(&self.segment_capacity.to_le_bytes());
        buf
    }

    /// Decodes a segment header.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SegmentCorruption`] if `data` is not exactly
    /// [`SegmentHeader::SIZE`] bytes.
    pub fn decode(data: &[u8]) -> EngineResult<Self> {
        if data.len() != Self::SIZE {
            return Err(EngineError::segment_corruption(format!(
                "segment header must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let segment_id = data[..8]
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| EngineError::segment_corruption("invalid segment id"))?;
        let segment_capacity = data[8..]
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| EngineError::segment_corruption("invalid segment capacity"))?;
        Ok(Self {
            segment_id,
            segment_capacity,
        })
    }
}

/// Payload of the structural `SegFooter` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    /// CRC32 over every segment byte preceding the footer's entry header.
    pub segment_checksum: u32,
}

impl SegmentFooter {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Encodes the footer payload.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.segment_checksum.to_le_bytes()
    }

    /// Decodes a footer payload.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SegmentCorruption`] if `data` is not exactly
    /// [`SegmentFooter::SIZE`] bytes.
    pub fn decode(data: &[u8]) -> EngineResult<Self> {
        if data.len() != Self::SIZE {
            return Err(EngineError::segment_corruption(format!(
                "segment footer must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let segment_checksum = data
            .try_into()
            .map(u32::from_le_bytes)
            .map_err(|_| EngineError::segment_corruption("invalid segment checksum"))?;
        Ok(Self { segment_checksum })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        // Known test vector: "123456789" should give 0xCBF43926
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(compute_crc32(b""), 0x0000_0000);
    }

    #[test]
    fn crc32_incremental_matches_one_shot() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finalize(), compute_crc32(b"123456789"));
    }

    #[test]
    fn entry_type_roundtrip() {
        for t in [
            LogEntryType::SegHeader,
            LogEntryType::SegFooter,
            LogEntryType::Object,
            LogEntryType::Tombstone,
        ] {
            assert_eq!(LogEntryType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(LogEntryType::from_byte(0), None);
        assert_eq!(LogEntryType::from_byte(200), None);
    }

    #[test]
    fn entry_header_roundtrip() {
        let payload = b"hello segment";
        let header = EntryHeader::new(LogEntryType::Object, payload);
        let decoded = EntryHeader::decode(&header.encode()).unwrap();

        assert_eq!(header, decoded);
        assert!(decoded.verify(payload));
    }

    #[test]
    fn entry_header_detects_payload_corruption() {
        let header = EntryHeader::new(LogEntryType::Object, b"payload");
        assert!(!header.verify(b"paXload"));
        assert!(!header.verify(b"payloa"));
    }

    #[test]
    fn entry_header_rejects_unknown_type() {
        let mut encoded = EntryHeader::new(LogEntryType::Object, b"x").encode();
        encoded[0] = 99;
        assert!(EntryHeader::decode(&encoded).is_err());
    }

    #[test]
    fn segment_header_roundtrip() {
        let header = SegmentHeader {
            segment_id: 7,
            segment_capacity: 64 * 1024,
        };
        let decoded = SegmentHeader::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn segment_footer_roundtrip() {
        let footer = SegmentFooter {
            segment_checksum: 0xDEAD_BEEF,
        };
        let decoded = SegmentFooter::decode(&footer.encode()).unwrap();
        assert_eq!(footer, decoded);
    }
}
