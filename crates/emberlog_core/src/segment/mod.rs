//! Log segments: wire format, iteration, and the segment object.
//!
//! ## Segment Layout
//!
//! ```text
//! Segment ::= Entry(SegHeader) SegmentHeader
//!             { Entry(T) Payload(T) }*
//!             Entry(SegFooter) SegmentFooter
//! ```
//!
//! Every entry carries a 10-byte header with a CRC32 covering its own
//! bytes; the footer additionally carries a whole-segment checksum. An
//! invalid or truncated entry terminates iteration.

mod entry;
mod iterator;
mod log;

pub use entry::{
    compute_crc32, Crc32, EntryHeader, LogEntryType, SegmentFooter, SegmentHeader,
};
pub use iterator::{EntryRef, SegmentIterator};
pub use log::{LogSegment, SegmentReader, SegmentState};

pub(crate) use log::METADATA_BYTES;
