use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::record::Policy;

/// The persisted mapping from UID to its stored policy string.
///
/// Values are kept as raw strings so an unreadable entry survives a
/// load/save cycle untouched; use [`Policy::parse`] to interpret them.
pub type RecordMap = BTreeMap<String, String>;

struct StoreInner {
    path: PathBuf,
    /// Held for the full span of every file access, including
    /// load-mutate-save sequences
    lock: Mutex<()>,
}

/// JSON-file backed record store.
///
/// Every public operation takes one store-wide lock, and the
/// read-modify-write helpers ([`update`](Self::update), [`upsert`](Self::upsert),
/// [`remove`](Self::remove)) hold it from the read until the write completes,
/// so concurrent writers never lose each other's updates.
///
/// Cloning is cheap; all clones share the same file and lock.
///
/// # Example
///
/// ```rust,no_run
/// use uidkeep_core::{Policy, RecordStore, StoreConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), uidkeep_core::StorageError> {
///     let store = RecordStore::with_config(StoreConfig::default().with_path("uids.json"));
///     store.upsert("555", Policy::Permanent).await?;
///     assert!(store.remove("555").await?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self::new(config.path)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Reads the whole store.
    ///
    /// A missing file is created holding an empty object first.
    ///
    /// # Errors
    ///
    /// `StorageError::Corrupt` if the file exists but is not a JSON object of
    /// strings, `StorageError::Io` for filesystem faults.
    pub async fn load(&self) -> Result<RecordMap, StorageError> {
        let _guard = self.inner.lock.lock().await;
        self.read_locked().await
    }

    /// Replaces the whole store with `records`.
    pub async fn save(&self, records: &RecordMap) -> Result<(), StorageError> {
        let _guard = self.inner.lock.lock().await;
        self.write_locked(records).await
    }

    /// Runs `mutate` against the current contents with the lock held from
    /// the read until the write finishes. The file is only rewritten when
    /// `mutate` actually changed something.
    pub async fn update<F, R>(&self, mutate: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut RecordMap) -> R,
    {
        let _guard = self.inner.lock.lock().await;
        let mut records = self.read_locked().await?;
        let before = records.clone();
        let output = mutate(&mut records);
        if records != before {
            self.write_locked(&records).await?;
        }
        Ok(output)
    }

    /// Sets the policy for `uid`, returning the previously stored value.
    pub async fn upsert(
        &self,
        uid: impl Into<String>,
        policy: Policy,
    ) -> Result<Option<String>, StorageError> {
        let uid = uid.into();
        self.update(move |records| records.insert(uid, policy.to_stored()))
            .await
    }

    /// Removes `uid`. Returns `true` if it was present.
    #[must_use = "returns whether the UID existed"]
    pub async fn remove(&self, uid: &str) -> Result<bool, StorageError> {
        self.update(|records| records.remove(uid).is_some()).await
    }

    /// Returns the raw stored value for `uid`
    pub async fn get(&self, uid: &str) -> Result<Option<String>, StorageError> {
        let records = self.load().await?;
        Ok(records.get(uid).cloned())
    }

    async fn read_locked(&self) -> Result<RecordMap, StorageError> {
        let path = &self.inner.path;
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!("Creating empty store at {}", path.display());
                let empty = RecordMap::new();
                self.write_locked(&empty).await?;
                Ok(empty)
            }
            Err(source) => Err(StorageError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Writes to a sibling temp file and renames it over the target so
    /// readers never see a partial document.
    async fn write_locked(&self, records: &RecordMap) -> Result<(), StorageError> {
        let path = &self.inner.path;
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec(records).map_err(StorageError::Encode)?;
        let tmp = temp_path(path);
        fs::write(&tmp, &bytes).await.map_err(io_err)?;
        if let Err(err) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(err));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("uids.json"));
        (dir, store)
    }

    fn expiring(day: u32) -> Policy {
        Policy::ExpiresAt(
            NaiveDate::from_ymd_opt(2030, 1, day)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let (_dir, store) = create_test_store();
        assert!(!store.path().exists());

        let records = store.load().await.unwrap();

        assert!(records.is_empty());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_load_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("nested/state/uids.json"));

        assert!(store.load().await.unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let (_dir, store) = create_test_store();
        std::fs::write(store.path(), "{not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_non_string_values_are_corrupt() {
        let (_dir, store) = create_test_store();
        std::fs::write(store.path(), r#"{"1": 42}"#).unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_reads_legacy_file_format() {
        let (_dir, store) = create_test_store();
        std::fs::write(
            store.path(),
            r#"{"555": "permanent", "100200300": "2030-01-05 08:30:00"}"#,
        )
        .unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records.get("555").map(String::as_str), Some("permanent"));
        assert_eq!(
            Policy::parse(&records["100200300"]),
            Some(expiring(5))
        );
    }

    #[tokio::test]
    async fn test_save_load_round_trip_is_idempotent() {
        let (_dir, store) = create_test_store();
        store.upsert("1", Policy::Permanent).await.unwrap();
        store.upsert("2", expiring(2)).await.unwrap();
        store.upsert("3", expiring(3)).await.unwrap();

        let first = store.load().await.unwrap();
        let bytes_before = std::fs::read(store.path()).unwrap();
        store.save(&first).await.unwrap();
        let second = store.load().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_before, std::fs::read(store.path()).unwrap());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let (_dir, store) = create_test_store();
        assert_eq!(store.upsert("1", expiring(1)).await.unwrap(), None);

        let previous = store.upsert("1", Policy::Permanent).await.unwrap();

        assert_eq!(previous, Some(expiring(1).to_stored()));
        assert_eq!(store.get("1").await.unwrap().as_deref(), Some("permanent"));
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (_dir, store) = create_test_store();
        store.upsert("1", Policy::Permanent).await.unwrap();

        assert!(store.remove("1").await.unwrap());
        assert!(!store.remove("1").await.unwrap());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_leaves_file_untouched() {
        let (_dir, store) = create_test_store();
        // Pretty-printed on purpose: any rewrite would compact it
        std::fs::write(store.path(), "{\n  \"7\": \"permanent\"\n}").unwrap();
        let before = std::fs::read(store.path()).unwrap();

        assert!(!store.remove("8").await.unwrap());

        assert_eq!(before, std::fs::read(store.path()).unwrap());
    }

    #[tokio::test]
    async fn test_malformed_values_survive_updates() {
        let (_dir, store) = create_test_store();
        std::fs::write(store.path(), r#"{"bad": "next tuesday"}"#).unwrap();

        store.upsert("good", Policy::Permanent).await.unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records["bad"], "next tuesday");
        assert_eq!(records["good"], "permanent");
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let (dir, store) = create_test_store();
        store.upsert("1", Policy::Permanent).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("uids.json")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_lose_nothing() {
        let (_dir, store) = create_test_store();
        let mut handles = vec![];

        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(format!("uid{i}"), Policy::Permanent).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_and_removes() {
        let (_dir, store) = create_test_store();
        for i in 0..32 {
            store.upsert(format!("old{i}"), Policy::Permanent).await.unwrap();
        }

        let mut handles = vec![];
        for i in 0..32 {
            let adder = store.clone();
            handles.push(tokio::spawn(async move {
                adder.upsert(format!("new{i}"), expiring(9)).await.map(|_| ())
            }));
            let remover = store.clone();
            handles.push(tokio::spawn(async move {
                remover.remove(&format!("old{i}")).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 32);
        assert!(records.keys().all(|uid| uid.starts_with("new")));
    }
}
