//! Filesystem-backed object store
//!
//! Layout under the configured root `D`:
//!
//! ```text
//! D/{bucket}/{key...}              # object bodies, `/` in keys maps to directories
//! D/.multipart/{upload_id}/part-N  # staged multipart parts
//! ```
//!
//! Keys ending in `/` are folder markers: an empty directory, size 0, no
//! file body. Every write path is canonicalized against the root first so
//! a key with `..` segments can never escape it.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Directory holding staged multipart parts, excluded from size scans.
const MULTIPART_DIR: &str = ".multipart";

/// Errors from the byte store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("path escapes storage root: {0}")]
    PathEscape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Other(String),
}

/// Inclusive byte range for a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// A streaming object body
pub type ObjectStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Async-safe path existence check (avoids blocking the runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Atomically write data to a file using write-to-temp + fsync + rename.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Other("cannot write to a path with no parent".into()))?
        .to_path_buf();
    let path = path.to_path_buf();
    let data = data.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// Filesystem object store rooted at a single directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store, ensuring the root directory exists.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.staging_dir(upload_id).join(format!("part-{}", part_number))
    }

    /// Join bucket and key under the root, resolving `.`/`..` lexically.
    /// A key whose `..` segments would climb out of the bucket (and thus
    /// potentially out of the root) is refused.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') {
            return Err(StorageError::PathEscape(bucket.to_string()));
        }

        let mut depth: i64 = 0;
        let mut cleaned = PathBuf::new();
        for part in Path::new(key).components() {
            match part {
                Component::Normal(seg) => {
                    depth += 1;
                    cleaned.push(seg);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(StorageError::PathEscape(format!("{}/{}", bucket, key)));
                    }
                    cleaned.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::PathEscape(format!("{}/{}", bucket, key)));
                }
            }
        }

        Ok(self.bucket_dir(bucket).join(cleaned))
    }

    /// The advisory storage-path string recorded on metadata rows.
    pub fn storage_path_of(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", bucket, key)
    }

    // === Bucket directories ===

    #[instrument(skip(self))]
    pub async fn create_bucket_dir(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir).await?;
        debug!("created bucket directory {:?}", dir);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_bucket_dir(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket);
        if path_exists(&dir).await {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    // === Object bodies ===

    /// Write an object body. A key ending in `/` is a folder marker:
    /// an empty directory is created and no file body is written.
    #[instrument(skip(self, data))]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;

        if key.ends_with('/') {
            self.reshape_colliding_files(bucket, &path).await?;
            fs::create_dir_all(&path).await?;
            debug!("created folder marker {}/{}", bucket, key);
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            self.reshape_colliding_files(bucket, parent).await?;
            fs::create_dir_all(parent).await?;
        }
        atomic_write(&path, data).await?;
        debug!("wrote {} bytes to {}/{}", data.len(), bucket, key);
        Ok(())
    }

    /// Folder-marker collision handling: when a needed directory segment
    /// already exists as a file (a prior folder-marker write landed as a
    /// zero-byte file, or a key shadowed a prefix), remove the file so a
    /// directory can take its place. Racy under concurrent prefix-sharing
    /// writes; callers accept last-writer-wins.
    async fn reshape_colliding_files(
        &self,
        bucket: &str,
        target_dir: &Path,
    ) -> Result<(), StorageError> {
        let bucket_dir = self.bucket_dir(bucket);
        let mut ancestors: Vec<&Path> = target_dir
            .ancestors()
            .take_while(|p| p.starts_with(&bucket_dir) && *p != bucket_dir)
            .collect();
        ancestors.reverse();

        for ancestor in ancestors {
            if is_file(ancestor).await {
                warn!("replacing file {:?} with a directory (folder-marker collision)", ancestor);
                fs::remove_file(ancestor).await?;
            }
        }
        Ok(())
    }

    /// Open an object for reading, optionally positioned at a byte range
    /// (inclusive end, already validated against the object size).
    #[instrument(skip(self))]
    pub async fn read_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, StorageError> {
        let path = self.object_path(bucket, key)?;

        // Folder markers have no file body
        if key.ends_with('/') || is_dir(&path).await {
            return Ok(stream::empty().boxed());
        }

        if !path_exists(&path).await {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        let mut file = fs::File::open(&path).await?;
        let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match range {
            Some(ByteRange { start, end }) => {
                file.seek(std::io::SeekFrom::Start(start)).await?;
                Box::new(file.take(end - start + 1))
            }
            None => Box::new(file),
        };

        Ok(ReaderStream::new(reader).boxed())
    }

    /// Read a whole object body into memory (CopyObject path).
    pub async fn read_object_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        if key.ends_with('/') || is_dir(&path).await {
            return Ok(Vec::new());
        }
        if !path_exists(&path).await {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        Ok(fs::read(&path).await?)
    }

    /// Remove an object body (file or folder marker). Missing paths are
    /// fine: DeleteObject is idempotent. Empty parent directories are
    /// pruned up to the bucket root.
    #[instrument(skip(self))]
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;

        if is_dir(&path).await {
            // Folder marker; only removed when empty
            let _ = fs::remove_dir(&path).await;
        } else if path_exists(&path).await {
            fs::remove_file(&path).await?;
        }

        self.prune_empty_parents(bucket, &path).await;
        Ok(())
    }

    async fn prune_empty_parents(&self, bucket: &str, path: &Path) {
        let bucket_dir = self.bucket_dir(bucket);
        let mut current = path.parent();
        while let Some(dir) = current {
            if !dir.starts_with(&bucket_dir) || dir == bucket_dir {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break; // not empty, or already gone
            }
            current = dir.parent();
        }
    }

    // === Multipart staging ===

    /// Stage a part body. Returns the advisory staging path string.
    #[instrument(skip(self, data))]
    pub async fn stage_part(
        &self,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let path = self.part_path(upload_id, part_number);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        atomic_write(&path, data).await?;
        debug!(
            "staged part {} ({} bytes) for upload {}",
            part_number,
            data.len(),
            upload_id
        );
        Ok(format!("{}/{}/part-{}", MULTIPART_DIR, upload_id, part_number))
    }

    /// Assemble staged parts, in the given (already ascending) order,
    /// into the destination object, then purge the staging directory.
    /// Returns the assembled size.
    #[instrument(skip(self, part_numbers))]
    pub async fn assemble_parts(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
        bucket: &str,
        key: &str,
    ) -> Result<u64, StorageError> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            self.reshape_colliding_files(bucket, parent).await?;
            fs::create_dir_all(parent).await?;
        }

        let mut out = fs::File::create(&dest).await?;
        let mut total: u64 = 0;
        for &n in part_numbers {
            let part = self.part_path(upload_id, n);
            let mut file = fs::File::open(&part).await.map_err(|_| {
                StorageError::NotFound(format!("part {} of upload {}", n, upload_id))
            })?;
            total += tokio::io::copy(&mut file, &mut out).await?;
        }
        out.sync_all().await?;
        drop(out);

        self.purge_staging(upload_id).await?;
        debug!(
            "assembled {} parts ({} bytes) into {}/{}",
            part_numbers.len(),
            total,
            bucket,
            key
        );
        Ok(total)
    }

    /// Remove the staging directory for an upload. Idempotent.
    #[instrument(skip(self))]
    pub async fn purge_staging(&self, upload_id: &str) -> Result<(), StorageError> {
        let dir = self.staging_dir(upload_id);
        if path_exists(&dir).await {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    // === Size reporting ===

    /// Cumulative byte size under the root, excluding multipart staging.
    pub async fn total_size(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        if !path_exists(&self.root).await {
            return Ok(0);
        }
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_str() == Some(MULTIPART_DIR) {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                total += dir_size(&path).await?;
            } else {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }
}

/// Recursive directory size
fn dir_size(
    path: &Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, StorageError>> + Send + '_>> {
    Box::pin(async move {
        let mut total = 0;
        if is_dir(path).await {
            let mut entries = fs::read_dir(path).await?;
            while let Some(entry) = entries.next_entry().await? {
                let child = entry.path();
                if entry.file_type().await?.is_dir() {
                    total += dir_size(&child).await?;
                } else {
                    total += entry.metadata().await?.len();
                }
            }
        }
        Ok(total)
    })
}
