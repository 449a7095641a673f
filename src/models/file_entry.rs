//! Represents an uploaded file awaiting retrieval.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Metadata record for a single relayed file.
///
/// The record tracks lifetime and quota; the payload bytes live in the
/// `BlobStore` under `content_path`. The `id` is the only reference ever
/// handed out to clients.
#[derive(Serialize, Clone, Debug)]
pub struct FileEntry {
    /// Opaque download handle, assigned at admission.
    pub id: Uuid,

    /// Filename as supplied by the uploader, used for the attachment header.
    #[serde(rename = "name")]
    pub original_name: String,

    /// Location of the payload on disk. Never serialized.
    #[serde(skip_serializing)]
    pub content_path: PathBuf,

    /// Payload size measured during the streaming write.
    pub size_bytes: u64,

    /// MD5 hex digest of the payload.
    pub etag: String,

    /// Timestamp when the file was admitted.
    pub created_at: DateTime<Utc>,

    /// `created_at` plus the configured TTL.
    pub expires_at: DateTime<Utc>,

    /// Maximum number of downloads; `0` means unlimited.
    pub download_limit: u32,

    /// Number of downloads started so far.
    pub download_count: u32,
}

impl FileEntry {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when a finite download limit has been used up.
    pub fn quota_reached(&self) -> bool {
        self.download_limit > 0 && self.download_count >= self.download_limit
    }
}
