//! Core type definitions for emberlog.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a log segment.
///
/// Segment IDs are monotonically increasing and never reused. A segment
/// produced by in-memory compaction keeps the identity of the segment it
/// replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// The location of an entry's payload within the log.
///
/// Locations are the identity handed to the entry handler: the live
/// directory of a store built on this engine maps keys to locations, and
/// relocation produces a fresh location for each surviving entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    /// Segment containing the entry.
    pub segment: SegmentId,
    /// Byte offset of the entry's payload within the segment buffer.
    pub offset: u32,
}

impl EntryLocation {
    /// Creates a new entry location.
    #[must_use]
    pub const fn new(segment: SegmentId, offset: u32) -> Self {
        Self { segment, offset }
    }
}

impl fmt::Display for EntryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.segment, self.offset)
    }
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
///
/// Entry timestamps and segment creation times are second-granularity; the
/// cleaner only uses them for relative age comparisons.
#[must_use]
pub fn wall_time_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_ordering() {
        let a = SegmentId::new(1);
        let b = SegmentId::new(2);
        assert!(a < b);
    }

    #[test]
    fn segment_id_display() {
        assert_eq!(format!("{}", SegmentId::new(42)), "seg:42");
    }

    #[test]
    fn entry_location_display() {
        let loc = EntryLocation::new(SegmentId::new(3), 128);
        assert_eq!(format!("{loc}"), "seg:3+128");
    }

    #[test]
    fn wall_time_is_nonzero() {
        assert!(wall_time_secs() > 0);
    }
}
