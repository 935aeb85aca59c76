//! Content-addressed bot artifact storage, per spec.md §3 (`BotArtifact`)
//! and §6's persisted-state layout.
//!
//! Grounded on `original_source/backend/app/bots/artifacts.py::ArtifactStore`:
//! sha256-keyed, idempotent write-if-absent, `<botId>/<sha256>/<filename>`
//! layout. Only the filesystem backend is implemented; the object-store
//! backend from the original is left as a documented extension point (a
//! second `impl` of the same trait), per SPEC_FULL §3.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum StorageError {
    #[display(fmt = "i/o error persisting artifact: {}", _0)]
    Io(std::io::Error),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A reference to a stored, content-addressed bot archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub storage_path: PathBuf,
}

/// Persists uploaded bot archives under `<root>/artifacts/<botId>/<sha256>/<filename>`.
/// Content-addressing means a re-upload of identical bytes is a no-op write.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn store(
        &self,
        bot_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        let sha256 = hex_sha256(bytes);
        let dir = self.root.join("artifacts").join(bot_id).join(&sha256);
        let path = dir.join(filename);
        if !path.exists() {
            fs::create_dir_all(&dir)?;
            fs::write(&path, bytes)?;
        }
        Ok(ArtifactRef {
            artifact_id: format!("{bot_id}:{sha256}"),
            filename: filename.to_string(),
            sha256,
            size_bytes: bytes.len() as u64,
            storage_path: path,
        })
    }

    pub fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(&artifact.storage_path)?)
    }

    /// `<runtime>/uploads/<seatId>/<uuid>_<filename>.zip` per spec.md §6 — a
    /// transient staging location for an in-flight upload, cleaned up by the
    /// caller once `store()` has produced a durable `ArtifactRef`.
    pub fn staging_path(&self, seat_label: &str, unique: &str, filename: &str) -> PathBuf {
        self.root
            .join("uploads")
            .join(seat_label)
            .join(format!("{unique}_{filename}"))
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_idempotent_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bytes = b"pretend zip bytes";
        let r1 = store.store("bot-1", "mybot.zip", bytes).unwrap();
        let r2 = store.store("bot-1", "mybot.zip", bytes).unwrap();
        assert_eq!(r1.sha256, r2.sha256);
        assert_eq!(r1.storage_path, r2.storage_path);
        assert_eq!(store.read(&r1).unwrap(), bytes);
    }

    #[test]
    fn different_bytes_get_different_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let r1 = store.store("bot-1", "a.zip", b"one").unwrap();
        let r2 = store.store("bot-1", "a.zip", b"two").unwrap();
        assert_ne!(r1.sha256, r2.sha256);
        assert_ne!(r1.storage_path, r2.storage_path);
    }

    fn path_is_nonempty(p: &Path) -> bool {
        !p.as_os_str().is_empty()
    }

    #[test]
    fn staging_path_is_well_formed() {
        let store = ArtifactStore::new("/tmp/runtime");
        let p = store.staging_path("seat-1", "abc123", "bot.zip");
        assert!(path_is_nonempty(&p));
        assert!(p.ends_with("abc123_bot.zip"));
    }
}
