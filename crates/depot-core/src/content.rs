//! Content-addressed storage for package archive blobs.
//!
//! Blobs are keyed by their blake3 digest and laid out as
//! `objects/<first-two-hex>/<digest>`. The store is append-only: a blob,
//! once written, is never modified; duplicate puts are no-ops.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use depot_utils::hash::{digest_bytes, is_valid_digest};
use tracing::{debug, error, trace};

use crate::error::{ErrorContext, Result, StoreError};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct ContentStore {
    objects_dir: PathBuf,
}

impl ContentStore {
    /// Opens a content store rooted at `path`, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let objects_dir = path.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)
            .with_context(|| format!("creating content store at {}", objects_dir.display()))?;
        debug!(path = %objects_dir.display(), "opened content store");
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.objects_dir.join(&digest[..2]).join(digest)
    }

    /// Stores a blob and returns its digest.
    ///
    /// Idempotent: identical content maps to the same address and is not
    /// rewritten. The blob is durable on disk before this returns; the
    /// write goes to a temporary file that is fsynced and then renamed
    /// into place, so a crash never leaves a partial blob at its address.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let digest = digest_bytes(bytes);
        let path = self.blob_path(&digest);

        if path.exists() {
            trace!(%digest, "blob already stored");
            return Ok(digest);
        }

        let parent = path.parent().expect("blob path has a shard directory");
        fs::create_dir_all(parent)
            .with_context(|| format!("creating shard directory {}", parent.display()))?;

        let tmp_path = parent.join(format!(
            ".{digest}.{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result: Result<()> = (|| {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("creating temporary blob {}", tmp_path.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("writing blob {digest}"))?;
            file.sync_all()
                .with_context(|| format!("syncing blob {digest}"))?;
            fs::rename(&tmp_path, &path)
                .with_context(|| format!("publishing blob {digest}"))?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        trace!(%digest, size = bytes.len(), "stored blob");
        Ok(digest)
    }

    /// Fetches a blob by digest.
    ///
    /// The stored bytes are re-hashed on every read; a mismatch means
    /// on-disk corruption and surfaces as [`StoreError::Integrity`]
    /// rather than being silently repaired.
    pub fn get(&self, digest: &str) -> Result<Vec<u8>> {
        if !is_valid_digest(digest) {
            return Err(StoreError::InvalidDigest(digest.to_string()));
        }

        let path = self.blob_path(digest);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(digest.to_string()));
            }
            Err(err) => {
                return Err(StoreError::IoError {
                    action: format!("reading blob {digest}"),
                    source: err,
                });
            }
        };

        let actual = digest_bytes(&bytes);
        if !actual.eq_ignore_ascii_case(digest) {
            error!(expected = %digest, %actual, "content store corruption detected");
            return Err(StoreError::Integrity {
                digest: digest.to_string(),
                actual,
            });
        }

        Ok(bytes)
    }

    /// Whether a blob with this digest is stored.
    pub fn exists(&self, digest: &str) -> bool {
        is_valid_digest(digest) && self.blob_path(digest).exists()
    }
}
