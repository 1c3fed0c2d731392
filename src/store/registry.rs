//! Thread-safe credential registry with replay-safe counter advancement.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::StoreError;

use super::credential::{Credential, CredentialKey};
use super::disk;

/// Default cap on enrolled credentials.
pub const DEFAULT_MAX_CREDENTIALS: usize = 64;

/// Hard ceiling for `max_credentials`. Every unmatched beacon costs one
/// HMAC per credential, and the 64-bit tag's accidental collision odds grow
/// with fleet size.
pub const MAX_CREDENTIALS_CEILING: usize = 1024;

/// Credential registry.
///
/// All reads and writes go through one mutex, which is also the
/// serialization point for `try_advance`. With a backing file, every
/// mutation also holds the file's exclusive lock, re-reads the file and is
/// persisted before it becomes visible, so the daemon and the CLI can share
/// one store file.
pub struct CredentialStore {
    /// Credentials in enrollment order.
    credentials: Mutex<Vec<Credential>>,
    /// Backing file, `None` for in-memory stores.
    path: Option<PathBuf>,
    max_credentials: usize,
}

impl CredentialStore {
    /// Create an empty store that is never written to disk.
    pub fn in_memory(max_credentials: usize) -> Self {
        Self {
            credentials: Mutex::new(Vec::new()),
            path: None,
            max_credentials,
        }
    }

    /// Open a file-backed store, loading existing credentials if present.
    pub fn open<P: AsRef<Path>>(path: P, max_credentials: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let credentials = disk::load(path)?;
        if credentials.len() > max_credentials {
            return Err(StoreError::CapacityExceeded {
                max: max_credentials,
            });
        }

        info!(
            path = %path.display(),
            credentials = credentials.len(),
            "Credential store loaded"
        );

        Ok(Self {
            credentials: Mutex::new(credentials),
            path: Some(path.to_path_buf()),
            max_credentials,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Credential>> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `op` to the current credential list and publish the result.
    ///
    /// For a file-backed store the list `op` sees is the file's contents
    /// merged with this process's counters, read under the file lock. `op`
    /// returns whether it changed anything; changes are saved before the
    /// in-memory list is replaced. On any error nothing is published.
    fn update<T>(
        &self,
        op: impl FnOnce(&mut Vec<Credential>) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut credentials = self.lock();
        let Some(path) = &self.path else {
            let mut working = credentials.clone();
            let (value, _) = op(&mut working)?;
            *credentials = working;
            return Ok(value);
        };

        disk::with_exclusive_lock(path, || {
            let mut working = merge_counters(disk::load(path)?, &credentials);
            let (value, changed) = op(&mut working)?;
            if changed {
                disk::save(path, &working)?;
            }
            *credentials = working;
            Ok(value)
        })
    }

    /// Enroll a new credential. A random key is generated when `key` is `None`.
    pub fn create(
        &self,
        identifier: &str,
        name: &str,
        key: Option<CredentialKey>,
    ) -> Result<Credential, StoreError> {
        let key = match key {
            Some(k) => k,
            None => CredentialKey::generate()?,
        };
        let max = self.max_credentials;

        let credential = self.update(|credentials| {
            if credentials.iter().any(|c| c.identifier == identifier) {
                return Err(StoreError::DuplicateIdentifier {
                    identifier: identifier.to_string(),
                });
            }
            if credentials.len() >= max {
                return Err(StoreError::CapacityExceeded { max });
            }

            let credential = Credential {
                identifier: identifier.to_string(),
                display_name: name.to_string(),
                key,
                last_nonce: 0,
                created_at: unix_now(),
            };
            credentials.push(credential.clone());
            Ok((credential, true))
        })?;

        info!(identifier = %identifier, name = %name, "Credential enrolled");
        Ok(credential)
    }

    /// Remove a credential. Absent identifiers are not an error.
    pub fn delete(&self, identifier: &str) -> Result<(), StoreError> {
        let removed = self.update(|credentials| {
            let Some(index) = credentials.iter().position(|c| c.identifier == identifier) else {
                return Ok((false, false));
            };
            credentials.remove(index);
            Ok((true, true))
        })?;

        if removed {
            info!(identifier = %identifier, "Credential removed");
        } else {
            debug!(identifier = %identifier, "Delete of unknown credential ignored");
        }
        Ok(())
    }

    /// Change a credential's display name.
    pub fn rename(&self, identifier: &str, name: &str) -> Result<(), StoreError> {
        self.update(|credentials| {
            let credential = credentials
                .iter_mut()
                .find(|c| c.identifier == identifier)
                .ok_or_else(|| StoreError::NotFound {
                    identifier: identifier.to_string(),
                })?;
            credential.display_name = name.to_string();
            Ok(((), true))
        })
    }

    /// Look up one credential.
    pub fn get(&self, identifier: &str) -> Result<Credential, StoreError> {
        self.lock()
            .iter()
            .find(|c| c.identifier == identifier)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    /// All credentials in enrollment order.
    pub fn all(&self) -> Vec<Credential> {
        self.lock().clone()
    }

    /// Advance the replay counter if `nonce` is newer than the stored one.
    ///
    /// Returns `Ok(true)` once the new counter is persisted, `Ok(false)` if
    /// the nonce is stale. On a persistence failure the counter is left
    /// untouched and the error is returned; the nonce must not be treated
    /// as accepted.
    pub fn try_advance(&self, identifier: &str, nonce: u32) -> Result<bool, StoreError> {
        let previous = self.update(|credentials| {
            let credential = credentials
                .iter_mut()
                .find(|c| c.identifier == identifier)
                .ok_or_else(|| StoreError::NotFound {
                    identifier: identifier.to_string(),
                })?;

            let previous = credential.last_nonce;
            if nonce <= previous {
                return Ok((None, false));
            }
            credential.last_nonce = nonce;
            Ok((Some(previous), true))
        })?;

        match previous {
            Some(previous) => {
                debug!(identifier = %identifier, nonce, previous, "Replay counter advanced");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-read the backing file, picking up enrollments made by another
    /// process. Counters never move backwards: for credentials known on
    /// both sides the higher nonce wins.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };

        let loaded = disk::load(path)?;
        if loaded.len() > self.max_credentials {
            return Err(StoreError::CapacityExceeded {
                max: self.max_credentials,
            });
        }

        let mut credentials = self.lock();
        *credentials = merge_counters(loaded, &credentials);

        info!(
            path = %path.display(),
            credentials = credentials.len(),
            "Credential store reloaded"
        );
        Ok(credentials.len())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_credentials(&self) -> usize {
        self.max_credentials
    }

    /// Backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Keep the membership and order of `on_disk`, raising each counter to the
/// value held in `in_memory` for the same credential if that is higher.
///
/// A credential only matches if its key matches too, so a re-enrolled
/// identifier starts from the counter on disk.
fn merge_counters(mut on_disk: Vec<Credential>, in_memory: &[Credential]) -> Vec<Credential> {
    for credential in on_disk.iter_mut() {
        if let Some(current) = in_memory
            .iter()
            .find(|c| c.identifier == credential.identifier && c.key == credential.key)
        {
            credential.last_nonce = credential.last_nonce.max(current.last_nonce);
        }
    }
    on_disk
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::credential::KEY_LEN;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn zero_key() -> Option<CredentialKey> {
        Some(CredentialKey::from_bytes([0; KEY_LEN]))
    }

    #[test]
    fn test_create_and_get() {
        let store = CredentialStore::in_memory(8);
        let created = store.create("aa11bb22cc33", "phone", zero_key()).unwrap();
        assert_eq!(created.last_nonce, 0);
        assert_eq!(store.get("aa11bb22cc33").unwrap(), created);
    }

    #[test]
    fn test_create_generates_key() {
        let store = CredentialStore::in_memory(8);
        let a = store.create("a", "a", None).unwrap();
        let b = store.create("b", "b", None).unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let store = CredentialStore::in_memory(8);
        store.create("a", "first", None).unwrap();
        assert!(matches!(
            store.create("a", "second", None),
            Err(StoreError::DuplicateIdentifier { .. })
        ));
        assert_eq!(store.get("a").unwrap().display_name, "first");
    }

    #[test]
    fn test_capacity_enforced() {
        let store = CredentialStore::in_memory(2);
        store.create("a", "a", None).unwrap();
        store.create("b", "b", None).unwrap();
        assert!(matches!(
            store.create("c", "c", None),
            Err(StoreError::CapacityExceeded { max: 2 })
        ));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let store = CredentialStore::in_memory(8);
        store.delete("missing").unwrap();
        store.create("a", "a", None).unwrap();
        store.delete("a").unwrap();
        assert!(matches!(store.get("a"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_all_in_insertion_order() {
        let store = CredentialStore::in_memory(8);
        for id in ["c", "a", "b"] {
            store.create(id, id, None).unwrap();
        }
        let ids: Vec<_> = store.all().into_iter().map(|c| c.identifier).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_try_advance_is_strictly_increasing() {
        let store = CredentialStore::in_memory(8);
        store.create("a", "a", zero_key()).unwrap();

        assert!(store.try_advance("a", 5).unwrap());
        assert!(!store.try_advance("a", 5).unwrap());
        assert!(!store.try_advance("a", 4).unwrap());
        assert_eq!(store.get("a").unwrap().last_nonce, 5);
        assert!(store.try_advance("a", 6).unwrap());
    }

    #[test]
    fn test_try_advance_zero_never_accepted() {
        let store = CredentialStore::in_memory(8);
        store.create("a", "a", zero_key()).unwrap();
        assert!(!store.try_advance("a", 0).unwrap());
    }

    #[test]
    fn test_try_advance_unknown() {
        let store = CredentialStore::in_memory(8);
        assert!(matches!(
            store.try_advance("nope", 1),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_same_nonce_accepted_once() {
        let store = Arc::new(CredentialStore::in_memory(8));
        store.create("a", "a", zero_key()).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.try_advance("a", 7).unwrap())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(store.get("a").unwrap().last_nonce, 7);
    }

    #[test]
    fn test_counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        {
            let store = CredentialStore::open(&path, 8).unwrap();
            store.create("a", "phone", zero_key()).unwrap();
            assert!(store.try_advance("a", 5).unwrap());
        }

        let reopened = CredentialStore::open(&path, 8).unwrap();
        assert_eq!(reopened.get("a").unwrap().last_nonce, 5);
        assert!(!reopened.try_advance("a", 5).unwrap());
    }

    #[test]
    fn test_reopen_over_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        {
            let store = CredentialStore::open(&path, 8).unwrap();
            store.create("a", "a", None).unwrap();
            store.create("b", "b", None).unwrap();
        }
        assert!(matches!(
            CredentialStore::open(&path, 1),
            Err(StoreError::CapacityExceeded { max: 1 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_persist_leaves_counter_untouched() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let path = state_dir.join("devices.json");
        let store = CredentialStore::open(&path, 8).unwrap();
        store.create("a", "a", zero_key()).unwrap();

        // Replace the directory with a file so the temp file cannot be created.
        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, b"not a directory").unwrap();

        assert!(matches!(
            store.try_advance("a", 3),
            Err(StoreError::Persistence { .. })
        ));
        assert_eq!(store.get("a").unwrap().last_nonce, 0);
    }

    #[test]
    fn test_reload_picks_up_enrollment_without_rolling_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let daemon = CredentialStore::open(&path, 8).unwrap();
        daemon.create("a", "phone", zero_key()).unwrap();

        // The CLI loads before the daemon accepts nonce 5, then writes its stale view.
        let cli = CredentialStore::open(&path, 8).unwrap();
        assert!(daemon.try_advance("a", 5).unwrap());
        cli.create("b", "watch", None).unwrap();

        assert_eq!(daemon.reload().unwrap(), 2);
        assert_eq!(daemon.get("a").unwrap().last_nonce, 5);
        assert!(daemon.get("b").is_ok());
        assert!(!daemon.try_advance("a", 5).unwrap());
    }

    #[test]
    fn test_enrollment_from_other_process_survives_accept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let daemon = CredentialStore::open(&path, 8).unwrap();
        daemon.create("a", "phone", zero_key()).unwrap();

        // The CLI enrolls while the daemon is running, then the daemon accepts.
        let cli = CredentialStore::open(&path, 8).unwrap();
        cli.create("b", "watch", None).unwrap();
        assert!(daemon.try_advance("a", 5).unwrap());

        let on_disk = CredentialStore::open(&path, 8).unwrap();
        assert_eq!(on_disk.get("a").unwrap().last_nonce, 5);
        assert!(on_disk.get("b").is_ok());
        // The daemon now knows the new credential without a reload.
        assert!(daemon.get("b").is_ok());
    }

    #[test]
    fn test_stale_cli_write_does_not_roll_back_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let daemon = CredentialStore::open(&path, 8).unwrap();
        daemon.create("a", "phone", zero_key()).unwrap();

        // The CLI loads first, the daemon accepts nonce 5, then the CLI writes.
        let cli = CredentialStore::open(&path, 8).unwrap();
        assert!(daemon.try_advance("a", 5).unwrap());
        cli.rename("a", "old phone").unwrap();

        let on_disk = CredentialStore::open(&path, 8).unwrap();
        let a = on_disk.get("a").unwrap();
        assert_eq!(a.last_nonce, 5);
        assert_eq!(a.display_name, "old phone");

        // A restarted daemon still refuses the replay.
        assert!(!on_disk.try_advance("a", 5).unwrap());
    }

    #[test]
    fn test_removal_by_other_process_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let daemon = CredentialStore::open(&path, 8).unwrap();
        daemon.create("a", "phone", zero_key()).unwrap();

        let cli = CredentialStore::open(&path, 8).unwrap();
        cli.delete("a").unwrap();

        assert!(matches!(
            daemon.try_advance("a", 1),
            Err(StoreError::NotFound { .. })
        ));
        assert!(daemon.is_empty());
        assert!(CredentialStore::open(&path, 8).unwrap().is_empty());
    }

    #[test]
    fn test_capacity_counts_other_process_enrollments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let first = CredentialStore::open(&path, 2).unwrap();
        let second = CredentialStore::open(&path, 2).unwrap();

        first.create("a", "a", None).unwrap();
        second.create("b", "b", None).unwrap();
        assert!(matches!(
            first.create("c", "c", None),
            Err(StoreError::CapacityExceeded { max: 2 })
        ));
        assert!(matches!(
            second.create("a", "dup", None),
            Err(StoreError::DuplicateIdentifier { .. })
        ));
    }

    #[test]
    fn test_concurrent_stores_on_one_file_accept_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        CredentialStore::open(&path, 8)
            .unwrap()
            .create("a", "a", zero_key())
            .unwrap();

        // Separate stores stand in for separate processes.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = CredentialStore::open(&path, 8).unwrap();
                thread::spawn(move || store.try_advance("a", 9).unwrap())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_rename() {
        let store = CredentialStore::in_memory(8);
        store.create("a", "old", None).unwrap();
        store.rename("a", "new").unwrap();
        assert_eq!(store.get("a").unwrap().display_name, "new");
        assert!(matches!(
            store.rename("b", "x"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
