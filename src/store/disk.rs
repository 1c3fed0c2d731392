//! JSON persistence for the credential store.
//!
//! Layout is a single object keyed by identifier, in enrollment order.
//! Every write goes to a sibling temp file which is synced and renamed over
//! the original, so a crash leaves either the old or the new file.
//! Read-modify-write cycles from different processes are serialized with an
//! exclusive `flock` on a sibling `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StoreError;

use super::credential::{Credential, PersistedCredential};

/// Load credentials from `path`. A missing file is an empty store.
pub(crate) fn load(path: &Path) -> Result<Vec<Credential>, StoreError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No credential store file, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(persistence(path, format!("stat failed: {}", e))),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(StoreError::InsecurePermissions {
                path: path.to_path_buf(),
                mode: mode & 0o777,
            });
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    let content = fs::read_to_string(path)
        .map_err(|e| persistence(path, format!("read failed: {}", e)))?;

    let entries: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&content).map_err(|e| corrupt(path, e.to_string()))?;

    let mut credentials = Vec::with_capacity(entries.len());
    for (identifier, value) in entries {
        let record: PersistedCredential = serde_json::from_value(value)
            .map_err(|e| corrupt(path, format!("entry '{}': {}", identifier, e)))?;
        let credential = record
            .into_credential(identifier.clone())
            .map_err(|e| corrupt(path, format!("entry '{}': {}", identifier, e)))?;
        credentials.push(credential);
    }

    Ok(credentials)
}

/// Atomically replace the file at `path` with `credentials`.
pub(crate) fn save(path: &Path, credentials: &[Credential]) -> Result<(), StoreError> {
    let mut entries = serde_json::Map::with_capacity(credentials.len());
    for credential in credentials {
        let record = PersistedCredential::from_credential(credential);
        let value = serde_json::to_value(record).map_err(|e| persistence(path, e.to_string()))?;
        entries.insert(credential.identifier.clone(), value);
    }
    let json = serde_json::to_vec_pretty(&serde_json::Value::Object(entries))
        .map_err(|e| persistence(path, e.to_string()))?;

    ensure_parent(path)?;

    let tmp = temp_path(path);
    {
        let mut file = open_private(&tmp, true)
            .map_err(|e| persistence(path, format!("open temp failed: {}", e)))?;
        file.write_all(&json)
            .map_err(|e| persistence(path, format!("write failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| persistence(path, format!("sync failed: {}", e)))?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(persistence(path, format!("rename failed: {}", e)));
    }

    // Directory entry durability; failure here only widens the crash window.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
            warn!(error = %e, path = %parent.display(), "Failed to sync store directory");
        }
    }

    Ok(())
}

/// Run `f` while holding an exclusive lock on the store's `.lock` file.
///
/// Blocks until any other holder, in this or another process, releases it.
pub(crate) fn with_exclusive_lock<T>(
    path: &Path,
    f: impl FnOnce() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    ensure_parent(path)?;
    let lock_path = sibling(path, ".lock");
    let file = open_private(&lock_path, false)
        .map_err(|e| persistence(path, format!("open lock file failed: {}", e)))?;

    let mut lock = fd_lock::RwLock::new(file);
    let _guard = lock
        .write()
        .map_err(|e| persistence(path, format!("lock failed: {}", e)))?;
    f()
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| persistence(path, format!("create dir failed: {}", e)))?;
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "credentials".into());
    name.push(suffix);
    path.with_file_name(name)
}

fn open_private(path: &Path, truncate: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(truncate);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn persistence(path: &Path, message: String) -> StoreError {
    StoreError::Persistence {
        path: path.to_path_buf(),
        message,
    }
}

fn corrupt(path: &Path, message: String) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        message,
    }
}
