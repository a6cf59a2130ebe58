//! Narrow trait boundaries for the external collaborators the lifecycle
//! orchestrator and HTTP surface consume: NVRAM persistence and the
//! secure-mount directory. (The revocation-notification transport gets the
//! same treatment in `revocation::NotificationTransport`, alongside the
//! `RevocationEvent` type it delivers.) Kept deliberately thin — the real
//! implementations (the TPM NVRAM area, a tmpfs mount, a TLS socket to the
//! verifier) are out of scope; these traits exist so the core state machine
//! is exercisable without them.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persists the final U share to TPM NVRAM so a reboot can resume by
/// fetching a fresh V alone.
pub trait NvramStore: Send + Sync {
    /// Persist `u` to NVRAM, replacing any previous value.
    fn write_u(&self, u: &[u8]) -> std::io::Result<()>;

    /// Read back a previously persisted U, if any.
    fn read_u(&self) -> std::io::Result<Option<Vec<u8>>>;
}

/// A file-backed NVRAM stand-in, for deployments and tests that don't have
/// a real TPM NVRAM area.
pub struct FileNvramStore {
    path: PathBuf,
}

impl FileNvramStore {
    /// Persist U under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NvramStore for FileNvramStore {
    fn write_u(&self, u: &[u8]) -> std::io::Result<()> {
        std::fs::write(&self.path, u)
    }

    fn read_u(&self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory NVRAM stand-in for unit tests.
#[derive(Default)]
pub struct InMemoryNvramStore {
    value: Mutex<Option<Vec<u8>>>,
}

impl NvramStore for InMemoryNvramStore {
    fn write_u(&self, u: &[u8]) -> std::io::Result<()> {
        *self.value.lock().expect("nvram mutex poisoned") = Some(u.to_vec());
        Ok(())
    }

    fn read_u(&self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.value.lock().expect("nvram mutex poisoned").clone())
    }
}

/// The secure (tmpfs-backed) directory the node's identity and derived key
/// live under. The first mount is idempotent; every write here uses a full
/// absolute path under it.
pub trait SecureMount: Send + Sync {
    /// `true` if the secure directory is currently mounted/present.
    fn is_present(&self) -> bool;

    /// Absolute path of the secure directory.
    fn path(&self) -> &Path;

    /// Mount (or verify) the secure directory; idempotent.
    fn ensure_mounted(&self) -> std::io::Result<()>;
}

/// A plain-directory stand-in for the secure mount, used when no real
/// tmpfs mount is configured (tests, non-Linux development).
pub struct PlainDirSecureMount {
    path: PathBuf,
}

impl PlainDirSecureMount {
    /// Use `path` as the secure directory, creating it if absent.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecureMount for PlainDirSecureMount {
    fn is_present(&self) -> bool {
        self.path.is_dir()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_mounted(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_nvram_round_trips() {
        let store = InMemoryNvramStore::default();
        assert_eq!(store.read_u().unwrap(), None);
        store.write_u(b"final-u-value").unwrap();
        assert_eq!(store.read_u().unwrap(), Some(b"final-u-value".to_vec()));
    }

    #[test]
    fn file_nvram_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileNvramStore::new(dir.path().join("nvram_u"));
        assert_eq!(store.read_u().unwrap(), None);
        store.write_u(b"persisted").unwrap();
        assert_eq!(store.read_u().unwrap(), Some(b"persisted".to_vec()));
    }

    #[test]
    fn plain_dir_secure_mount_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let secure_path = dir.path().join("secure");
        let mount = PlainDirSecureMount::new(&secure_path);
        assert!(!mount.is_present());
        mount.ensure_mounted().unwrap();
        assert!(mount.is_present());
    }
}
