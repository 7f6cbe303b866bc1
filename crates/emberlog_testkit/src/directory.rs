//! A scripted live directory implementing the engine's entry handler.
//!
//! Real deployments resolve liveness through the store's hash table; the
//! testkit stands in with a key directory over a simple payload layout:
//!
//! ```text
//! Object    ::= key (8) | timestamp (4) | data
//! Tombstone ::= key (8) | timestamp (4) | covered segment id (8)
//! ```
//!
//! An object is live while the directory still points at that exact copy.
//! A tombstone is live while the segment that held the deleted object is
//! still part of the log; once that segment is gone, nothing can
//! resurrect the object and the tombstone may die.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use emberlog_core::{
    EngineResult, EntryHandler, EntryHeader, EntryLocation, EntryRelocator, LogEntryType,
    SegmentId, SegmentManager,
};

/// Bytes of the object payload prefix before user data.
pub const OBJECT_PREFIX: usize = 12;

/// Encodes an object payload.
#[must_use]
pub fn encode_object(key: u64, timestamp: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(OBJECT_PREFIX + data.len());
    payload.extend_from_slice(&key.to_le_bytes());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}

/// Encodes a tombstone payload covering an object that lived in
/// `covered`.
#[must_use]
pub fn encode_tombstone(key: u64, timestamp: u32, covered: SegmentId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&key.to_le_bytes());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&covered.as_u64().to_le_bytes());
    payload
}

/// Extracts the key from any testkit payload.
#[must_use]
pub fn payload_key(payload: &[u8]) -> u64 {
    u64::from_le_bytes(payload[..8].try_into().expect("payload has a key"))
}

/// Extracts the embedded creation timestamp from any testkit payload.
#[must_use]
pub fn payload_timestamp(payload: &[u8]) -> u32 {
    u32::from_le_bytes(payload[8..12].try_into().expect("payload has a timestamp"))
}

/// Extracts the covered segment from a tombstone payload.
#[must_use]
pub fn tombstone_covered(payload: &[u8]) -> SegmentId {
    SegmentId::new(u64::from_le_bytes(
        payload[12..20].try_into().expect("tombstone has a segment"),
    ))
}

/// Extracts the user data from an object payload.
#[must_use]
pub fn object_data(payload: &[u8]) -> &[u8] {
    &payload[OBJECT_PREFIX..]
}

#[derive(Debug, Clone, Copy)]
struct ObjectRecord {
    location: EntryLocation,
    entry_bytes: u32,
}

/// Key directory that doubles as the cleaner's entry handler.
pub struct DirectoryHandler {
    manager: Arc<SegmentManager>,
    objects: Mutex<HashMap<u64, ObjectRecord>>,
}

impl DirectoryHandler {
    /// Creates a directory over the given segment manager.
    #[must_use]
    pub fn new(manager: Arc<SegmentManager>) -> Self {
        Self {
            manager,
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn free_record(&self, record: ObjectRecord) {
        if let Some(segment) = self.manager.segment(record.location.segment) {
            segment.free(record.entry_bytes);
        }
    }

    /// Writes an object, superseding any previous version of the key.
    ///
    /// # Errors
    ///
    /// Propagates append failures from the segment manager.
    pub fn put(&self, key: u64, data: &[u8], timestamp: u32) -> EngineResult<EntryLocation> {
        let payload = encode_object(key, timestamp, data);
        let location = self.manager.append(LogEntryType::Object, &payload)?;
        let record = ObjectRecord {
            location,
            entry_bytes: (EntryHeader::SIZE + payload.len()) as u32,
        };

        let previous = self.objects.lock().insert(key, record);
        if let Some(previous) = previous {
            self.free_record(previous);
        }
        Ok(location)
    }

    /// Deletes a key, appending a tombstone covering the old object's
    /// segment.
    ///
    /// # Errors
    ///
    /// Propagates append failures from the segment manager.
    pub fn delete(&self, key: u64, timestamp: u32) -> EngineResult<()> {
        let previous = self.objects.lock().remove(&key);
        if let Some(previous) = previous {
            let payload = encode_tombstone(key, timestamp, previous.location.segment);
            self.manager.append(LogEntryType::Tombstone, &payload)?;
            self.free_record(previous);
        }
        Ok(())
    }

    /// Drops a key from the directory without writing a tombstone, as if
    /// the object had been superseded long ago and its tombstone already
    /// reclaimed. Lets tests shape segment utilization precisely.
    pub fn evict(&self, key: u64) {
        let previous = self.objects.lock().remove(&key);
        if let Some(previous) = previous {
            self.free_record(previous);
        }
    }

    /// Returns whether the directory still holds the key.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.objects.lock().contains_key(&key)
    }

    /// Returns the key's current location.
    #[must_use]
    pub fn location_of(&self, key: u64) -> Option<EntryLocation> {
        self.objects.lock().get(&key).map(|r| r.location)
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns all live keys.
    #[must_use]
    pub fn live_keys(&self) -> Vec<u64> {
        self.objects.lock().keys().copied().collect()
    }

    /// Reads a live object's data back through its directory location.
    #[must_use]
    pub fn read(&self, key: u64) -> Option<Vec<u8>> {
        let location = self.location_of(key)?;
        let segment = self.manager.segment(location.segment)?;
        let reader = segment.read();
        let buffer = reader.buffer();

        let header_offset = location.offset as usize - EntryHeader::SIZE;
        let header = EntryHeader::decode(&buffer[header_offset..]).ok()?;
        let payload =
            &buffer[location.offset as usize..location.offset as usize + header.length as usize];
        Some(object_data(payload).to_vec())
    }
}

impl EntryHandler for DirectoryHandler {
    fn timestamp(&self, _entry_type: LogEntryType, payload: &[u8]) -> u32 {
        payload_timestamp(payload)
    }

    fn check_liveness(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        location: EntryLocation,
    ) -> bool {
        match entry_type {
            LogEntryType::Object => self
                .objects
                .lock()
                .get(&payload_key(payload))
                .is_some_and(|r| r.location == location),
            LogEntryType::Tombstone => self.manager.contains_segment(tombstone_covered(payload)),
            _ => false,
        }
    }

    fn relocate(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        location: EntryLocation,
        relocator: &mut EntryRelocator<'_>,
    ) {
        match entry_type {
            LogEntryType::Object => {
                let key = payload_key(payload);
                let mut objects = self.objects.lock();
                let Some(record) = objects.get_mut(&key) else {
                    return; // deleted since extraction
                };
                if record.location != location {
                    return; // superseded copy
                }
                if relocator.append(entry_type, payload) {
                    record.location = relocator
                        .new_location()
                        .expect("successful append yields a location");
                }
            }
            LogEntryType::Tombstone => {
                if self.manager.contains_segment(tombstone_covered(payload)) {
                    relocator.append(entry_type, payload);
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for DirectoryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryHandler")
            .field("live_keys", &self.live_count())
            .finish()
    }
}
