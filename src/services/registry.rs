//! src/services/registry.rs
//!
//! FileRegistry — the concurrent metadata registry. One reader/writer lock
//! guards the whole map: info reads run concurrently, every mutation is
//! exclusive. `try_consume` performs the full validate/increment/remove
//! sequence inside a single write-lock critical section, so two simultaneous
//! downloads of a limit-1 file can never both pass the quota check. No I/O
//! ever happens under the lock; eviction hands back snapshots and the caller
//! deletes payload bytes afterwards.

use crate::models::file_entry::FileEntry;
use crate::services::relay_service::RelayError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, hash_map::Entry};
use std::sync::RwLock;
use uuid::Uuid;

/// Result of one retrieval attempt, decided atomically.
///
/// `Expired` and `LimitReached` carry the evicted record so the caller can
/// remove the backing blob outside the lock.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Counter incremented; `exhausted` is true when this retrieval used the
    /// last allowed download, in which case the record is already removed.
    Consumed { entry: FileEntry, exhausted: bool },
    /// No record under this id.
    Missing,
    /// TTL passed; the record has been removed.
    Expired(FileEntry),
    /// Quota already used up; the record has been removed.
    LimitReached(FileEntry),
}

/// In-memory registry of live file records.
///
/// One lock per instance, not process-wide, so independent registries can
/// coexist in tests.
#[derive(Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<Uuid, FileEntry>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly admitted file under its id.
    ///
    /// An id collision indicates a generator fault and is reported, never
    /// silently overwritten.
    pub fn insert(&self, entry: FileEntry) -> Result<(), RelayError> {
        let mut files = self.files.write().unwrap();
        match files.entry(entry.id) {
            Entry::Occupied(_) => Err(RelayError::Conflict(entry.id)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Read-only snapshot of a record.
    ///
    /// Does not touch expiry or quota state: an expired record that no
    /// retrieval or sweep has evicted yet is still returned.
    pub fn get(&self, id: Uuid) -> Option<FileEntry> {
        self.files.read().unwrap().get(&id).cloned()
    }

    /// Validate, count, and possibly evict one retrieval, atomically.
    ///
    /// Expiry is inclusive: a request at exactly `expires_at` is rejected.
    pub fn try_consume(&self, id: Uuid, now: DateTime<Utc>) -> ConsumeOutcome {
        let mut files = self.files.write().unwrap();
        match files.entry(id) {
            Entry::Vacant(_) => ConsumeOutcome::Missing,
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    return ConsumeOutcome::Expired(slot.remove());
                }
                if slot.get().quota_reached() {
                    return ConsumeOutcome::LimitReached(slot.remove());
                }
                slot.get_mut().download_count += 1;
                let exhausted = slot.get().quota_reached();
                let entry = if exhausted {
                    slot.remove()
                } else {
                    slot.get().clone()
                };
                ConsumeOutcome::Consumed { entry, exhausted }
            }
        }
    }

    /// Remove every record whose expiry lies strictly in the past and return
    /// the evicted snapshots for blob cleanup.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<FileEntry> {
        let mut files = self.files.write().unwrap();
        let expired: Vec<Uuid> = files
            .iter()
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| files.remove(&id))
            .collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.files.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
