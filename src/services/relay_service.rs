//! src/services/relay_service.rs
//!
//! RelayService — admission and retrieval over the registry and the blob
//! store. The blob is always written before the registry record exists and
//! the record is always evicted before its blob disappears, so a registered
//! id always has readable bytes behind it. All disk I/O happens outside the
//! registry lock.

use crate::models::file_entry::FileEntry;
use crate::services::blob_store::BlobStore;
use crate::services::registry::{ConsumeOutcome, FileRegistry};
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use futures::Stream;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Delay between the final permitted download starting and the blob being
/// removed, so an in-flight transfer is not truncated. The registry record
/// is already gone by then; no new download can begin during the window.
pub const EXHAUSTED_DELETE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("file `{0}` not found")]
    NotFound(Uuid),
    #[error("file `{0}` has expired")]
    Expired(Uuid),
    #[error("download limit reached for file `{0}`")]
    QuotaExhausted(Uuid),
    #[error("file exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("identifier `{0}` is already registered")]
    Conflict(Uuid),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Tunables consumed by the service core.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Lifetime granted to each admitted file.
    pub ttl: TimeDelta,
    /// Admission cap in bytes.
    pub max_bytes: u64,
    /// Download quota stamped onto new records; 0 = unlimited.
    pub default_limit: u32,
    /// Grace delay before removing the blob of an exhausted record.
    pub grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ttl: TimeDelta::minutes(60),
            max_bytes: 100 * 1024 * 1024,
            default_limit: 5,
            grace: EXHAUSTED_DELETE_GRACE,
        }
    }
}

/// RelayService wires the registry and the blob store together:
/// - Admit a file (write bytes to disk, then register metadata)
/// - Consume a download handle (atomic quota/TTL check, lazy cleanup)
/// - Inspect metadata without consuming
/// - Periodically sweep expired records and their blobs
#[derive(Clone)]
pub struct RelayService {
    registry: Arc<FileRegistry>,
    blobs: BlobStore,
    cfg: RelayConfig,
}

impl RelayService {
    pub fn new(registry: Arc<FileRegistry>, blobs: BlobStore, cfg: RelayConfig) -> Self {
        Self {
            registry,
            blobs,
            cfg,
        }
    }

    /// Directory the blob store writes under. Used by the readiness probe.
    pub fn upload_dir(&self) -> &Path {
        self.blobs.base_path()
    }

    /// Number of live records. Used by the readiness probe.
    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }

    /// Admit a new file: write the payload, then register the record.
    ///
    /// The declared size (when the transport knows it) is rejected up front;
    /// the streaming write enforces the same cap regardless. The record is
    /// inserted only after the blob write succeeds, so no id ever points at
    /// missing bytes.
    pub async fn admit<S>(
        &self,
        original_name: &str,
        declared_size: Option<u64>,
        stream: S,
    ) -> RelayResult<FileEntry>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if let Some(size) = declared_size {
            if size > self.cfg.max_bytes {
                return Err(RelayError::TooLarge {
                    limit: self.cfg.max_bytes,
                });
            }
        }

        let id = Uuid::new_v4();
        let blob = self
            .blobs
            .write_stream(
                &blob_file_name(id, original_name),
                self.cfg.max_bytes,
                stream,
            )
            .await?;

        let now = Utc::now();
        let entry = FileEntry {
            id,
            original_name: original_name.to_string(),
            content_path: blob.path.clone(),
            size_bytes: blob.size_bytes,
            etag: blob.etag,
            created_at: now,
            expires_at: now + self.cfg.ttl,
            download_limit: self.cfg.default_limit,
            download_count: 0,
        };

        if let Err(err) = self.registry.insert(entry.clone()) {
            // Generator fault; do not leave orphan bytes behind.
            error!(%id, "identifier collision on admission");
            if let Err(cleanup_err) = self.blobs.delete(&blob.path).await {
                warn!(%id, "failed to remove orphan blob: {cleanup_err}");
            }
            return Err(err);
        }

        info!(
            %id,
            name = %entry.original_name,
            size = entry.size_bytes,
            expires_at = %entry.expires_at,
            "admitted file"
        );
        Ok(entry)
    }

    /// Consume one download against `id`.
    ///
    /// Returns the record snapshot and whether this retrieval used the last
    /// allowed download. Expired and quota-exhausted records are evicted and
    /// their blobs removed here (lazy cleanup); the distinct rejection kinds
    /// are logged before the HTTP layer folds them into one not-found answer.
    pub async fn consume(&self, id: Uuid) -> RelayResult<(FileEntry, bool)> {
        match self.registry.try_consume(id, Utc::now()) {
            ConsumeOutcome::Consumed { entry, exhausted } => {
                debug!(%id, count = entry.download_count, exhausted, "download consumed");
                Ok((entry, exhausted))
            }
            ConsumeOutcome::Missing => Err(RelayError::NotFound(id)),
            ConsumeOutcome::Expired(evicted) => {
                debug!(%id, "download rejected: expired");
                self.remove_blob_best_effort(&evicted).await;
                Err(RelayError::Expired(id))
            }
            ConsumeOutcome::LimitReached(evicted) => {
                debug!(%id, "download rejected: quota exhausted");
                self.remove_blob_best_effort(&evicted).await;
                Err(RelayError::QuotaExhausted(id))
            }
        }
    }

    /// Open the payload of a consumed record for streaming out.
    pub async fn open_blob(&self, entry: &FileEntry) -> RelayResult<File> {
        self.blobs.open(&entry.content_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                RelayError::NotFound(entry.id)
            } else {
                RelayError::Io(err)
            }
        })
    }

    /// Metadata snapshot without consuming a download.
    pub fn inspect(&self, id: Uuid) -> RelayResult<FileEntry> {
        self.registry.get(id).ok_or(RelayError::NotFound(id))
    }

    /// Remove the blob of an exhausted record after the grace delay.
    ///
    /// The record is already out of the registry, so this only has to wait
    /// out the transfer that triggered the exhaustion.
    pub fn schedule_removal(&self, entry: &FileEntry) {
        let blobs = self.blobs.clone();
        let path = entry.content_path.clone();
        let id = entry.id;
        let grace = self.cfg.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match blobs.delete(&path).await {
                Ok(()) => info!(%id, "removed blob after final download"),
                Err(err) => warn!(%id, "failed to remove blob after final download: {err}"),
            }
        });
    }

    /// Run the periodic sweep: evict expired records, then delete their
    /// blobs outside the lock. Blob-deletion failures are logged and
    /// skipped; the registry is authoritative either way.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let blobs = self.blobs.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = registry.sweep_expired(Utc::now());
                for entry in expired {
                    match blobs.delete(&entry.content_path).await {
                        Ok(()) => info!(id = %entry.id, "cleaned up expired file"),
                        Err(err) => {
                            warn!(id = %entry.id, "failed to remove expired blob: {err}")
                        }
                    }
                }
            }
        })
    }

    async fn remove_blob_best_effort(&self, entry: &FileEntry) {
        if let Err(err) = self.blobs.delete(&entry.content_path).await {
            warn!(id = %entry.id, "failed to remove evicted blob: {err}");
        }
    }
}

/// On-disk name for a payload: the id plus the original extension, when the
/// extension is plain ASCII. The id alone keys the file; the extension only
/// helps someone poking around the upload directory.
fn blob_file_name(id: Uuid, original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 16)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn service(temp_dir: &TempDir, cfg: RelayConfig) -> RelayService {
        RelayService::new(
            Arc::new(FileRegistry::new()),
            BlobStore::new(temp_dir.path()),
            cfg,
        )
    }

    fn payload(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    fn short_lived(limit: u32) -> RelayConfig {
        RelayConfig {
            ttl: TimeDelta::seconds(60),
            max_bytes: 1024,
            default_limit: limit,
            grace: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn admit_consume_twice_then_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let relay = service(&temp_dir, short_lived(2));

        let entry = relay
            .admit("notes.txt", Some(10), payload(b"ten bytes!"))
            .await
            .unwrap();
        assert_eq!(entry.size_bytes, 10);
        assert_eq!(entry.download_count, 0);
        assert!(entry.content_path.exists());

        let (first, exhausted) = relay.consume(entry.id).await.unwrap();
        assert_eq!(first.download_count, 1);
        assert!(!exhausted);
        assert!(relay.inspect(entry.id).is_ok());

        let (second, exhausted) = relay.consume(entry.id).await.unwrap();
        assert_eq!(second.download_count, 2);
        assert!(exhausted);
        assert!(matches!(
            relay.inspect(entry.id),
            Err(RelayError::NotFound(_))
        ));

        assert!(matches!(
            relay.consume(entry.id).await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let relay = service(&temp_dir, short_lived(5));

        let result = relay
            .admit("huge.iso", Some(4096), payload(b"irrelevant"))
            .await;
        assert!(matches!(result, Err(RelayError::TooLarge { limit: 1024 })));

        let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_consume_evicts_record_and_blob() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = RelayConfig {
            ttl: TimeDelta::zero(),
            ..short_lived(5)
        };
        let relay = service(&temp_dir, cfg);

        let entry = relay.admit("gone.txt", None, payload(b"bytes")).await.unwrap();
        assert!(entry.content_path.exists());

        assert!(matches!(
            relay.consume(entry.id).await,
            Err(RelayError::Expired(_))
        ));
        assert!(!entry.content_path.exists());
        assert!(matches!(
            relay.consume(entry.id).await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_blob_is_removed_after_grace() {
        let temp_dir = TempDir::new().unwrap();
        let relay = service(&temp_dir, short_lived(1));

        let entry = relay.admit("once.txt", None, payload(b"bytes")).await.unwrap();
        let (snapshot, exhausted) = relay.consume(entry.id).await.unwrap();
        assert!(exhausted);

        relay.schedule_removal(&snapshot);
        // Still present inside the grace window.
        assert!(snapshot.content_path.exists());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!snapshot.content_path.exists());
    }

    #[tokio::test]
    async fn reaper_removes_expired_records_and_blobs() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = RelayConfig {
            ttl: TimeDelta::zero(),
            ..short_lived(5)
        };
        let relay = service(&temp_dir, cfg);

        let entry = relay.admit("swept.txt", None, payload(b"bytes")).await.unwrap();
        assert_eq!(relay.registry_len(), 1);

        let reaper = relay.spawn_reaper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        reaper.abort();

        assert_eq!(relay.registry_len(), 0);
        assert!(!entry.content_path.exists());
    }

    #[test]
    fn blob_file_names_keep_only_plain_extensions() {
        let id = Uuid::new_v4();
        assert_eq!(blob_file_name(id, "report.pdf"), format!("{id}.pdf"));
        assert_eq!(blob_file_name(id, "archive.tar.gz"), format!("{id}.gz"));
        assert_eq!(blob_file_name(id, "no-extension"), id.to_string());
        assert_eq!(blob_file_name(id, "weird.na me"), id.to_string());
    }
}
