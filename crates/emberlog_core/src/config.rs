//! Engine and cleaner configuration.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::segment::{EntryHeader, SegmentFooter, SegmentHeader};

/// Fixed sizing of segments and their seglets.
///
/// Segments are contiguous buffers carved into fixed-size seglets, the unit
/// of memory reclamation. The geometry is validated once at construction:
/// `seglets_per_segment * seglet_size == segment_size` must hold exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentGeometry {
    segment_size: u32,
    seglet_size: u32,
}

impl SegmentGeometry {
    /// Minimum bytes a segment must hold: the structural header entry plus
    /// room for a footer entry.
    pub const MIN_SEGMENT_SIZE: u32 = (EntryHeader::SIZE
        + SegmentHeader::SIZE
        + EntryHeader::SIZE
        + SegmentFooter::SIZE) as u32;

    /// Creates a validated geometry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidGeometry`] if either size is zero, the
    /// seglet size does not evenly divide the segment size, or the segment
    /// is too small to hold its structural entries.
    pub fn new(segment_size: u32, seglet_size: u32) -> EngineResult<Self> {
        if segment_size == 0 || seglet_size == 0 {
            return Err(EngineError::invalid_geometry("sizes must be non-zero"));
        }
        if segment_size % seglet_size != 0 {
            return Err(EngineError::invalid_geometry(format!(
                "seglet size {seglet_size} does not divide segment size {segment_size}"
            )));
        }
        if segment_size < Self::MIN_SEGMENT_SIZE {
            return Err(EngineError::invalid_geometry(format!(
                "segment size {segment_size} below minimum {}",
                Self::MIN_SEGMENT_SIZE
            )));
        }
        Ok(Self {
            segment_size,
            seglet_size,
        })
    }

    /// Returns the full segment size in bytes.
    #[must_use]
    pub const fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// Returns the seglet size in bytes.
    #[must_use]
    pub const fn seglet_size(&self) -> u32 {
        self.seglet_size
    }

    /// Returns the number of seglets composing a full segment.
    #[must_use]
    pub const fn seglets_per_segment(&self) -> u32 {
        self.segment_size / self.seglet_size
    }

    /// Rounds a byte count up to a whole number of seglets.
    #[must_use]
    pub const fn seglets_for_bytes(&self, bytes: u64) -> u32 {
        (bytes.div_ceil(self.seglet_size as u64)) as u32
    }
}

/// Configuration for the log cleaner.
///
/// All thresholds are integer percentages. Defaults follow the engine's
/// production tuning; tests typically shrink the survivor reserve and the
/// per-pass budget.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// In-memory compaction work ratio beyond which a disk pass is forced.
    /// Compaction cannot free tombstones, so unbounded compaction can spin
    /// on segments whose dead space is all tombstone-covered.
    pub write_cost_threshold: f64,

    /// If true, only disk cleaning runs.
    pub disable_in_memory_cleaning: bool,

    /// Number of parallel cleaner worker threads.
    pub num_threads: usize,

    /// Memory utilization percentage at which in-memory compaction starts.
    pub min_memory_utilization: u32,

    /// Backup disk utilization percentage at which disk cleaning starts.
    pub min_disk_utilization: u32,

    /// Segments above this in-memory utilization are never selected for
    /// cleaning. Keeps worst-case survivor fragmentation from consuming
    /// more seglets than the sources free.
    pub max_cleanable_utilization: u32,

    /// Upper bound on live data processed per disk pass, in units of full
    /// segments.
    pub max_live_segments_per_pass: u32,

    /// Number of full survivor segments to keep reserved with the segment
    /// manager.
    pub survivor_segments_to_reserve: u32,

    /// Idle sleep between polls when no cleaning work is found.
    pub poll_interval: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            write_cost_threshold: 6.0,
            disable_in_memory_cleaning: false,
            num_threads: 1,
            min_memory_utilization: 90,
            min_disk_utilization: 95,
            max_cleanable_utilization: 98,
            max_live_segments_per_pass: 10,
            survivor_segments_to_reserve: 15,
            poll_interval: Duration::from_micros(10_000),
        }
    }
}

impl CleanerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the write cost threshold that forces a disk pass.
    #[must_use]
    pub const fn write_cost_threshold(mut self, value: f64) -> Self {
        self.write_cost_threshold = value;
        self
    }

    /// Disables or enables in-memory compaction.
    #[must_use]
    pub const fn disable_in_memory_cleaning(mut self, value: bool) -> Self {
        self.disable_in_memory_cleaning = value;
        self
    }

    /// Sets the number of cleaner worker threads.
    #[must_use]
    pub const fn num_threads(mut self, value: usize) -> Self {
        self.num_threads = value;
        self
    }

    /// Sets the in-memory compaction trigger percentage.
    #[must_use]
    pub const fn min_memory_utilization(mut self, value: u32) -> Self {
        self.min_memory_utilization = value;
        self
    }

    /// Sets the disk cleaning trigger percentage.
    #[must_use]
    pub const fn min_disk_utilization(mut self, value: u32) -> Self {
        self.min_disk_utilization = value;
        self
    }

    /// Sets the utilization cap above which segments are not cleanable.
    #[must_use]
    pub const fn max_cleanable_utilization(mut self, value: u32) -> Self {
        self.max_cleanable_utilization = value;
        self
    }

    /// Sets the per-pass live data budget in full segments.
    #[must_use]
    pub const fn max_live_segments_per_pass(mut self, value: u32) -> Self {
        self.max_live_segments_per_pass = value;
        self
    }

    /// Sets the survivor segment reserve.
    #[must_use]
    pub const fn survivor_segments_to_reserve(mut self, value: u32) -> Self {
        self.survivor_segments_to_reserve = value;
        self
    }

    /// Sets the idle poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if a threshold is not a
    /// percentage, no worker threads are configured, or the per-pass budget
    /// is zero.
    pub fn validate(&self) -> EngineResult<()> {
        if self.num_threads == 0 {
            return Err(EngineError::invalid_config("num_threads must be >= 1"));
        }
        for (name, value) in [
            ("min_memory_utilization", self.min_memory_utilization),
            ("min_disk_utilization", self.min_disk_utilization),
            ("max_cleanable_utilization", self.max_cleanable_utilization),
        ] {
            if value > 100 {
                return Err(EngineError::invalid_config(format!(
                    "{name} must be a percentage, got {value}"
                )));
            }
        }
        if self.max_live_segments_per_pass == 0 {
            return Err(EngineError::invalid_config(
                "max_live_segments_per_pass must be >= 1",
            ));
        }
        if self.survivor_segments_to_reserve == 0 {
            return Err(EngineError::invalid_config(
                "survivor_segments_to_reserve must be >= 1",
            ));
        }
        // Sources only release their seglets when a pass completes, so
        // the reserve must cover a whole pass's survivors (budget plus
        // one segment of fragmentation slack) or relocation can wait
        // forever mid-pass.
        if self.survivor_segments_to_reserve <= self.max_live_segments_per_pass {
            return Err(EngineError::invalid_config(format!(
                "survivor_segments_to_reserve ({}) must exceed max_live_segments_per_pass ({})",
                self.survivor_segments_to_reserve, self.max_live_segments_per_pass
            )));
        }
        if !self.write_cost_threshold.is_finite() || self.write_cost_threshold <= 1.0 {
            return Err(EngineError::invalid_config(
                "write_cost_threshold must be a finite ratio above 1.0",
            ));
        }
        Ok(())
    }
}
