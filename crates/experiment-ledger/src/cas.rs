use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::LedgerError;
use crate::fs_ledger::blocking;
use crate::storage_traits::{BlobStore, ContentDigest, LedgerResult};

/// Filesystem-backed model blob store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
pub struct FsBlobStore {
    objects_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> LedgerResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8]) -> LedgerResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);
        let shard_dir = self.objects_dir.join(&digest.as_str()[..2]);
        let data = data.to_vec();

        blocking(move || {
            if path.exists() {
                return Ok(());
            }
            fs::create_dir_all(&shard_dir)?;
            // Atomic write: write to temp file in the same directory, then rename.
            let mut tmp = NamedTempFile::new_in(&shard_dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await?;
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> LedgerResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let missing = digest.as_str().to_string();
        blocking(move || {
            fs::read(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LedgerError::NotFound { digest: missing }
                } else {
                    LedgerError::Io(e)
                }
            })
        })
        .await
    }

    async fn contains(&self, digest: &ContentDigest) -> LedgerResult<bool> {
        let path = self.blob_path(digest);
        blocking(move || Ok(path.exists())).await
    }
}
