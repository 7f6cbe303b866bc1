//! Bounded forward iteration over a segment buffer.
//!
//! ## Iteration Policy
//!
//! The iterator distinguishes **hard format errors** (construction fails,
//! no entries are produced) from **tolerated corruption** (iteration stops
//! cleanly at the last valid entry):
//!
//! ### Hard format errors (constructor returns `Err`)
//!
//! - Buffer shorter than a header entry
//! - First entry is not a valid `SegHeader` of exactly
//!   [`SegmentHeader::SIZE`] bytes
//! - Declared `segment_capacity` differs from the buffer length
//!
//! ### Tolerated conditions (iteration terminates, `is_done` becomes true)
//!
//! - An entry whose header or payload would extend past the buffer end
//! - An entry whose checksum does not verify
//! - An unknown entry type byte
//! - A `SegFooter` entry (yielded, then done)
//!
//! A sealed segment always ends in a footer, so termination without
//! [`SegmentIterator::saw_footer`] means the tail of the segment is
//! damaged; callers quarantine such segments.
//!
//! ## Invariants
//!
//! - Entries are yielded in append order, starting with the `SegHeader`
//! - The cursor only moves forward; `reset` restarts from the first entry
//! - Entry queries are only answerable while not done, which the
//!   [`SegmentIterator::entry`] `Option` encodes directly

use crate::error::{EngineError, EngineResult};
use crate::segment::entry::{EntryHeader, LogEntryType, SegmentHeader};

/// A single entry observed during iteration.
#[derive(Debug, Clone, Copy)]
pub struct EntryRef<'a> {
    /// Type tag of the entry.
    pub entry_type: LogEntryType,
    /// Byte offset of the payload within the segment buffer.
    pub offset: u32,
    /// The entry payload.
    pub payload: &'a [u8],
}

impl EntryRef<'_> {
    /// Returns the payload length in bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.payload.len() as u32
    }
}

/// Forward iterator over the entries of a segment buffer.
pub struct SegmentIterator<'a> {
    buffer: &'a [u8],
    /// Offset of the current entry's header, `None` once an invalid entry
    /// was reached.
    current: Option<usize>,
    /// Decoded view of the current entry.
    entry: Option<EntryRef<'a>>,
    /// True once a footer entry has been stepped past.
    saw_footer: bool,
}

impl<'a> SegmentIterator<'a> {
    /// Constructs an iterator over `buffer`, validating the segment's
    /// structural header.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidFormat`] if the buffer cannot hold a header
    ///   or the first entry is not a well-formed `SegHeader`
    /// - [`EngineError::CapacityMismatch`] if the declared capacity does
    ///   not equal the buffer length
    pub fn new(buffer: &'a [u8]) -> EngineResult<Self> {
        if buffer.len() < EntryHeader::SIZE + SegmentHeader::SIZE {
            return Err(EngineError::invalid_format(format!(
                "buffer of {} bytes cannot hold a segment header",
                buffer.len()
            )));
        }

        let first = Self::entry_at(buffer, 0)
            .ok_or_else(|| EngineError::invalid_format("first entry is not valid"))?;
        if first.entry_type != LogEntryType::SegHeader {
            return Err(EngineError::invalid_format(format!(
                "segment does not begin with a header entry (found {:?})",
                first.entry_type
            )));
        }
        if first.payload.len() != SegmentHeader::SIZE {
            return Err(EngineError::invalid_format(format!(
                "header entry has wrong length {}",
                first.payload.len()
            )));
        }

        let header = SegmentHeader::decode(first.payload)?;
        if header.segment_capacity != buffer.len() as u64 {
            return Err(EngineError::CapacityMismatch {
                declared: header.segment_capacity,
                actual: buffer.len() as u64,
            });
        }

        Ok(Self {
            buffer,
            current: Some(0),
            entry: Some(first),
            saw_footer: false,
        })
    }

    /// Decodes and validates the entry whose header starts at `offset`.
    ///
    /// Returns `None` when the bytes at `offset` do not form an entry that
    /// lies fully within the buffer with a verifying checksum.
    fn entry_at(buffer: &'a [u8], offset: usize) -> Option<EntryRef<'a>> {
        let header = EntryHeader::decode(buffer.get(offset..)?).ok()?;
        let payload_start = offset.checked_add(EntryHeader::SIZE)?;
        let payload_end = payload_start.checked_add(header.length as usize)?;
        let payload = buffer.get(payload_start..payload_end)?;
        if !header.verify(payload) {
            return None;
        }
        Some(EntryRef {
            entry_type: header.entry_type,
            offset: payload_start as u32,
            payload,
        })
    }

    /// Returns true once iteration has terminated: a footer was stepped
    /// past, or the next entry was invalid.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.entry.is_none()
    }

    /// Returns true if iteration observed the segment's footer.
    ///
    /// When false after [`SegmentIterator::is_done`], the segment is
    /// truncated or corrupt past the last yielded entry.
    #[must_use]
    pub fn saw_footer(&self) -> bool {
        self.saw_footer
    }

    /// Returns the current entry, or `None` once iteration is done.
    #[must_use]
    pub fn entry(&self) -> Option<EntryRef<'a>> {
        self.entry
    }

    /// Advances past the current entry.
    ///
    /// Stepping past a footer terminates iteration; so does an invalid or
    /// out-of-bounds next entry.
    pub fn advance(&mut self) {
        let Some(offset) = self.current else {
            return;
        };
        let Some(current) = self.entry.take() else {
            self.current = None;
            return;
        };

        if current.entry_type == LogEntryType::SegFooter {
            self.saw_footer = true;
            self.current = None;
            return;
        }

        let next = offset + EntryHeader::SIZE + current.payload.len();
        debug_assert!(next > offset, "cursor must move forward");
        match Self::entry_at(self.buffer, next) {
            Some(entry) => {
                self.current = Some(next);
                self.entry = Some(entry);
            }
            None => {
                self.current = None;
            }
        }
    }

    /// Restarts iteration from the first entry.
    pub fn reset(&mut self) {
        self.current = Some(0);
        self.entry = Self::entry_at(self.buffer, 0);
        self.saw_footer = false;
    }
}

impl<'a> Iterator for SegmentIterator<'a> {
    type Item = EntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entry()?;
        self.advance();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::entry::{compute_crc32, SegmentFooter};

    /// Builds a raw segment buffer of exactly `capacity` bytes with the
    /// given non-structural entries, optionally terminated by a footer.
    fn build_segment(capacity: usize, entries: &[(LogEntryType, &[u8])], footer: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(capacity);
        let header = SegmentHeader {
            segment_id: 1,
            segment_capacity: capacity as u64,
        };
        let header_payload = header.encode();
        buf.extend_from_slice(&EntryHeader::new(LogEntryType::SegHeader, &header_payload).encode());
        buf.extend_from_slice(&header_payload);

        for (ty, payload) in entries {
            buf.extend_from_slice(&EntryHeader::new(*ty, payload).encode());
            buf.extend_from_slice(payload);
        }

        if footer {
            let footer_payload = SegmentFooter {
                segment_checksum: compute_crc32(&buf),
            }
            .encode();
            buf.extend_from_slice(&EntryHeader::new(LogEntryType::SegFooter, &footer_payload).encode());
            buf.extend_from_slice(&footer_payload);
        }

        assert!(buf.len() <= capacity, "entries overflow declared capacity");
        buf.resize(capacity, 0);
        buf
    }

    #[test]
    fn iterates_entries_in_order() {
        let buf = build_segment(
            1024,
            &[
                (LogEntryType::Object, b"alpha"),
                (LogEntryType::Tombstone, b"beta"),
                (LogEntryType::Object, b"gamma"),
            ],
            true,
        );

        let types: Vec<_> = SegmentIterator::new(&buf)
            .unwrap()
            .map(|e| e.entry_type)
            .collect();
        assert_eq!(
            types,
            vec![
                LogEntryType::SegHeader,
                LogEntryType::Object,
                LogEntryType::Tombstone,
                LogEntryType::Object,
                LogEntryType::SegFooter,
            ]
        );
    }

    #[test]
    fn payloads_and_offsets_are_exact() {
        let buf = build_segment(512, &[(LogEntryType::Object, b"payload-bytes")], true);
        let mut it = SegmentIterator::new(&buf).unwrap();

        let header = it.entry().unwrap();
        assert_eq!(header.offset as usize, EntryHeader::SIZE);
        it.advance();

        let object = it.entry().unwrap();
        assert_eq!(object.payload, b"payload-bytes");
        assert_eq!(
            object.offset as usize,
            EntryHeader::SIZE + SegmentHeader::SIZE + EntryHeader::SIZE
        );
    }

    #[test]
    fn footer_terminates_iteration() {
        let buf = build_segment(256, &[(LogEntryType::Object, b"x")], true);
        let mut it = SegmentIterator::new(&buf).unwrap();
        while !it.is_done() {
            it.advance();
        }
        assert!(it.saw_footer());
    }

    #[test]
    fn header_only_buffer_is_done_after_header() {
        // Capacity exactly header entry + segment header, no footer.
        let capacity = EntryHeader::SIZE + SegmentHeader::SIZE;
        let buf = build_segment(capacity, &[], false);

        let mut it = SegmentIterator::new(&buf).unwrap();
        assert_eq!(it.entry().unwrap().entry_type, LogEntryType::SegHeader);
        it.advance();
        assert!(it.is_done());
        assert!(!it.saw_footer());
    }

    #[test]
    fn rejects_undersized_buffer() {
        let buf = vec![0u8; EntryHeader::SIZE + SegmentHeader::SIZE - 1];
        assert!(matches!(
            SegmentIterator::new(&buf),
            Err(EngineError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn rejects_capacity_mismatch() {
        let mut buf = build_segment(512, &[], true);
        // Hand the iterator a longer buffer than the header declares.
        buf.resize(600, 0);
        assert!(matches!(
            SegmentIterator::new(&buf),
            Err(EngineError::CapacityMismatch { .. })
        ));
    }

    #[test]
    fn rejects_wrong_first_entry() {
        let mut buf = build_segment(512, &[], true);
        // Rewrite the first entry as an Object with a valid checksum.
        let payload: Vec<u8> = buf[EntryHeader::SIZE..EntryHeader::SIZE + SegmentHeader::SIZE].to_vec();
        buf[..EntryHeader::SIZE]
            .copy_from_slice(&EntryHeader::new(LogEntryType::Object, &payload).encode());
        assert!(SegmentIterator::new(&buf).is_err());
    }

    #[test]
    fn corrupt_length_stops_at_prior_entry() {
        let mut buf = build_segment(
            512,
            &[
                (LogEntryType::Object, b"first"),
                (LogEntryType::Object, b"second"),
            ],
            true,
        );
        // Corrupt the second object's length field so the entry would
        // extend past capacity.
        let second_header = EntryHeader::SIZE + SegmentHeader::SIZE + EntryHeader::SIZE + 5;
        buf[second_header + 2..second_header + 6].copy_from_slice(&10_000u32.to_le_bytes());

        let entries: Vec<_> = SegmentIterator::new(&buf).unwrap().collect();
        assert_eq!(entries.len(), 2); // SegHeader + "first"
        assert_eq!(entries[1].payload, b"first");

        let mut it = SegmentIterator::new(&buf).unwrap();
        while !it.is_done() {
            it.advance();
        }
        assert!(!it.saw_footer());
    }

    #[test]
    fn corrupt_payload_byte_stops_iteration() {
        let mut buf = build_segment(512, &[(LogEntryType::Object, b"payload")], true);
        let payload_start = EntryHeader::SIZE + SegmentHeader::SIZE + EntryHeader::SIZE;
        buf[payload_start] ^= 0xFF;

        let entries: Vec<_> = SegmentIterator::new(&buf).unwrap().collect();
        assert_eq!(entries.len(), 1); // only the SegHeader survives
    }

    #[test]
    fn reset_restarts_from_first_entry() {
        let buf = build_segment(512, &[(LogEntryType::Object, b"again")], true);
        let mut it = SegmentIterator::new(&buf).unwrap();
        while !it.is_done() {
            it.advance();
        }
        it.reset();
        assert_eq!(it.entry().unwrap().entry_type, LogEntryType::SegHeader);
        assert!(!it.saw_footer());
    }

    #[test]
    fn entry_past_done_is_unobservable() {
        let buf = build_segment(256, &[], true);
        let mut it = SegmentIterator::new(&buf).unwrap();
        while !it.is_done() {
            it.advance();
        }
        assert!(it.entry().is_none());
    }
}
