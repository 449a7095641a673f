//! src/services/blob_store.rs
//!
//! BlobStore — payload bytes on the local filesystem, nothing else. Writes
//! stream through a temporary file and rename into place so a crashed or
//! oversized upload never leaves a readable blob behind. Deletion is
//! idempotent: a missing path is a no-op, which lets the reaper and the
//! lazy cleanup path race harmlessly over the same file.

use crate::services::relay_service::RelayError;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Outcome of a completed streaming write.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Final on-disk location of the payload.
    pub path: PathBuf,
    /// Bytes written.
    pub size_bytes: u64,
    /// MD5 hex digest computed while streaming.
    pub etag: String,
}

/// On-disk store rooted at a single base directory.
#[derive(Clone, Debug)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name)
    }

    /// Stream a payload to disk under `file_name`, capped at `max_bytes`.
    ///
    /// - Writes incrementally to a temporary file.
    /// - Computes MD5 and size while streaming.
    /// - Rejects with `TooLarge` before any byte past the cap is written.
    /// - Syncs and atomically renames into the final location.
    ///
    /// Every failure path removes the temporary file.
    pub async fn write_stream<S>(
        &self,
        file_name: &str,
        max_bytes: u64,
        stream: S,
    ) -> Result<StoredBlob, RelayError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.base_path).await?;
        let final_path = self.blob_path(file_name);
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(RelayError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if size_bytes > max_bytes {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RelayError::TooLarge { limit: max_bytes });
            }
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RelayError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RelayError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RelayError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&final_path).await?;
                fs::rename(&tmp_path, &final_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RelayError::Io(err));
            }
        }

        Ok(StoredBlob {
            path: final_path,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Open a stored payload for streaming out.
    pub async fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path).await
    }

    /// Remove a stored payload. Deleting a missing path is not an error.
    pub async fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("removed blob {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        let owned: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn write_then_open_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path());

        let blob = store
            .write_stream("abc.txt", 1024, chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();
        assert_eq!(blob.size_bytes, 11);
        assert_eq!(blob.etag, format!("{:x}", md5::compute(b"hello world")));

        let mut file = store.open(&blob.path).await.unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "hello world");
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_and_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path());

        let result = store
            .write_stream("big.bin", 8, chunks(&[b"12345", b"67890"]))
            .await;
        assert!(matches!(result, Err(RelayError::TooLarge { limit: 8 })));

        // Neither the final file nor the temp file survives.
        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_error_propagates_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path());

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        let result = store.write_stream("cut.bin", 1024, broken).await;
        assert!(matches!(result, Err(RelayError::Io(_))));

        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path());

        let blob = store
            .write_stream("gone.txt", 64, chunks(&[b"bytes"]))
            .await
            .unwrap();
        assert!(blob.path.exists());

        store.delete(&blob.path).await.unwrap();
        assert!(!blob.path.exists());
        // Second delete is a no-op, not an error.
        store.delete(&blob.path).await.unwrap();
    }
}
