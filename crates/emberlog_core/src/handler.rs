//! Per-entry liveness and relocation callbacks.
//!
//! The cleaner knows nothing about payload formats. The store built on
//! top of the engine implements [`EntryHandler`] to answer, per entry:
//! is it still live, how old is it, and should it be carried into a
//! survivor segment?
//!
//! During cleaning the handler is invoked with an [`EntryRelocator`]
//! wrapping the current survivor. The handler either appends the entry
//! (possibly transformed) or declines, which is terminal for the entry.
//! If an append was attempted but the survivor lacked space, the cleaner
//! seals the survivor, allocates a fresh one, and retries the same entry.

use std::sync::Arc;
use std::time::Instant;

use crate::segment::{EntryHeader, LogEntryType, LogSegment};
use crate::types::EntryLocation;

/// Liveness oracle and relocation callback for log entries.
///
/// Implementations must be deterministic modulo the state of their live
/// directory: two calls with the same directory state and the same entry
/// must make the same decision.
pub trait EntryHandler: Send + Sync {
    /// Returns the entry's embedded wall-clock creation time in seconds.
    /// Cached by the cleaner when live entries are first discovered so
    /// age sorting never re-reads payloads.
    fn timestamp(&self, entry_type: LogEntryType, payload: &[u8]) -> u32;

    /// Cheap probe: could this entry still be live? Used to extract the
    /// live set before relocation; false positives cost a relocation
    /// callback, false negatives lose data and are forbidden.
    fn check_liveness(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        location: EntryLocation,
    ) -> bool;

    /// Decides the entry's fate. Append through the relocator to keep the
    /// entry; do nothing to let it die.
    ///
    /// A relocated entry may be transformed but must not grow: compaction
    /// sizes its target from the source's live accounting.
    fn relocate(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        location: EntryLocation,
        relocator: &mut EntryRelocator<'_>,
    );
}

/// Single-shot writer into the current survivor segment, handed to
/// [`EntryHandler::relocate`].
pub struct EntryRelocator<'a> {
    survivor: Option<&'a Arc<LogSegment>>,
    appended: Option<EntryLocation>,
    appended_bytes: u32,
    append_ticks: u64,
    failed: bool,
}

impl<'a> EntryRelocator<'a> {
    /// Creates a relocator targeting `survivor`. A `None` survivor makes
    /// any append attempt fail, which prompts the cleaner to allocate one.
    #[must_use]
    pub fn new(survivor: Option<&'a Arc<LogSegment>>) -> Self {
        Self {
            survivor,
            appended: None,
            appended_bytes: 0,
            append_ticks: 0,
            failed: false,
        }
    }

    /// Appends the entry into the survivor segment.
    ///
    /// Returns true on success. On false the survivor was missing or out
    /// of space; the cleaner will retry the entry against a fresh
    /// survivor, so the handler should simply return.
    pub fn append(&mut self, entry_type: LogEntryType, payload: &[u8]) -> bool {
        debug_assert!(
            self.appended.is_none() && !self.failed,
            "relocator is single-shot"
        );

        let Some(survivor) = self.survivor else {
            self.failed = true;
            return false;
        };

        let started = Instant::now();
        match survivor.append(entry_type, payload) {
            Some(offset) => {
                self.appended = Some(EntryLocation::new(survivor.id(), offset));
                self.appended_bytes = (EntryHeader::SIZE + payload.len()) as u32;
                self.append_ticks = started.elapsed().as_nanos() as u64;
                true
            }
            None => {
                self.failed = true;
                false
            }
        }
    }

    /// Returns true iff an append was attempted and the survivor had
    /// insufficient capacity. The cleaner retries such entries; any other
    /// outcome is terminal.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Returns whether the entry was appended.
    #[must_use]
    pub fn did_append(&self) -> bool {
        self.appended.is_some()
    }

    /// Returns the relocated entry's new location, if it was appended.
    /// Handlers use this to repoint their live directory.
    #[must_use]
    pub fn new_location(&self) -> Option<EntryLocation> {
        self.appended
    }

    /// Returns the total bytes (header plus payload) the append consumed.
    #[must_use]
    pub fn appended_bytes(&self) -> u32 {
        self.appended_bytes
    }

    /// Returns the nanoseconds spent in the survivor append.
    #[must_use]
    pub fn append_ticks(&self) -> u64 {
        self.append_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentGeometry;
    use crate::segment::SegmentState;
    use crate::types::SegmentId;

    fn survivor() -> Arc<LogSegment> {
        let geometry = SegmentGeometry::new(4096, 256).unwrap();
        Arc::new(LogSegment::new(
            SegmentId::new(9),
            geometry,
            16,
            1000,
            SegmentState::Survivor,
        ))
    }

    #[test]
    fn append_records_new_location() {
        let survivor = survivor();
        let mut relocator = EntryRelocator::new(Some(&survivor));

        assert!(relocator.append(LogEntryType::Object, b"moved"));
        assert!(!relocator.failed());
        assert!(relocator.did_append());

        let location = relocator.new_location().unwrap();
        assert_eq!(location.segment, SegmentId::new(9));
        assert_eq!(relocator.appended_bytes() as usize, EntryHeader::SIZE + 5);
    }

    #[test]
    fn missing_survivor_fails_the_append() {
        let mut relocator = EntryRelocator::new(None);
        assert!(!relocator.append(LogEntryType::Object, b"anything"));
        assert!(relocator.failed());
        assert!(!relocator.did_append());
    }

    #[test]
    fn full_survivor_fails_the_append() {
        let geometry = SegmentGeometry::new(4096, 256).unwrap();
        let tiny = Arc::new(LogSegment::new(
            SegmentId::new(3),
            geometry,
            1,
            1000,
            SegmentState::Survivor,
        ));
        let mut relocator = EntryRelocator::new(Some(&tiny));

        assert!(!relocator.append(LogEntryType::Object, &[0u8; 500]));
        assert!(relocator.failed());
    }

    #[test]
    fn declining_is_not_failure() {
        let relocator = EntryRelocator::new(None);
        assert!(!relocator.failed());
        assert!(!relocator.did_append());
    }
}
