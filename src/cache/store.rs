//! Durable keyed storage.
//!
//! [`KeyedStore`] is the seam between the middleware and persistence: a
//! policy-free map from string keys to byte values with a per-key TTL.
//! [`FileStore`] implements it on a local directory.
//!
//! On-disk layout: `<root>/<aa>/<bb>/<sha256(key)>`, where `aa` and `bb` are
//! the first two byte pairs of the hex digest. Each file starts with an
//! 8-byte big-endian expiry (unix milliseconds) followed by the value. Writes
//! go to a `tmp_*` file in the root and are renamed into place, so readers see
//! either the previous entry or the new one, never a partial write.

use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs as async_fs;
use tracing::{trace, warn};

use super::error::StoreError;

const EXPIRY_HEADER_LEN: usize = 8;
const TEMP_PREFIX: &str = "tmp_";
const TEMP_RAND_LEN: usize = 16;
/// Marks a temp file holding an entry the sweeper has detached.
const REAP_MARKER: &str = "reap_";
const SHARD_LEN: usize = 2;
const DIGEST_LEN: usize = 64;
/// Temporary files younger than this may belong to an in-flight write.
const TEMP_FILE_GRACE: Duration = Duration::from_secs(60);

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub removed: usize,
    pub bytes_reclaimed: u64,
}

/// A durable key/value map with per-key expiry.
///
/// Implementations must tolerate concurrent callers; for a single key the
/// last completed `set` wins.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Fetch a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store `value` under `key`, replacing any previous entry, expiring
    /// after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether an entry for `key` is physically present, expired or not.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every expired entry.
    async fn sweep_expired(&self) -> Result<SweepStats, StoreError>;
}

/// File-per-key store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating `root` (and parents) when it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let id = hash_key(key);
        self.root.join(&id[..2]).join(&id[2..4]).join(&id)
    }
}

#[async_trait]
impl KeyedStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.entry_path(key);
        let data = match async_fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let expires_at = read_expiry(&data).ok_or_else(|| {
            StoreError::corrupt(format!(
                "entry {} is shorter than its expiry header",
                path.display()
            ))
        })?;

        // Expired entries are left for the sweeper; deleting here could race
        // with a concurrent write of a fresh value.
        if expires_at <= now_millis() {
            return Ok(None);
        }

        Ok(Some(Bytes::from(data).slice(EXPIRY_HEADER_LEN..)))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        let root = self.root.clone();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);

        tokio::task::spawn_blocking(move || write_entry(&root, &path, expires_at, &value))
            .await
            .map_err(io::Error::other)??;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match async_fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(async_fs::try_exists(self.entry_path(key)).await?)
    }

    async fn sweep_expired(&self) -> Result<SweepStats, StoreError> {
        let root = self.root.clone();
        let stats = tokio::task::spawn_blocking(move || sweep_dir(&root, now_millis()))
            .await
            .map_err(io::Error::other)??;
        Ok(stats)
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn read_expiry(data: &[u8]) -> Option<u64> {
    let header: [u8; EXPIRY_HEADER_LEN] = data.get(..EXPIRY_HEADER_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(header))
}

fn write_entry(root: &Path, path: &Path, expires_at: u64, value: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .rand_bytes(TEMP_RAND_LEN)
        .tempfile_in(root)?;
    file.write_all(&expires_at.to_be_bytes())?;
    file.write_all(value)?;
    file.flush()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn sweep_dir(root: &Path, now: u64) -> io::Result<SweepStats> {
    let mut stats = SweepStats::default();

    for shard1 in fs::read_dir(root)? {
        let shard1 = shard1?;
        let file_type = shard1.file_type()?;
        if file_type.is_file() {
            remove_stale_temp_file(&shard1.path(), &mut stats);
            continue;
        }
        if !file_type.is_dir() {
            continue;
        }
        let Some(outer) = shard_name(&shard1) else {
            continue;
        };

        for shard2 in fs::read_dir(shard1.path())? {
            let shard2 = shard2?;
            if !shard2.file_type()?.is_dir() {
                continue;
            }
            let Some(inner) = shard_name(&shard2) else {
                continue;
            };
            let prefix = format!("{outer}{inner}");

            for entry in fs::read_dir(shard2.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    continue;
                };
                if !is_entry_name(name, &prefix) {
                    continue;
                }
                stats.scanned += 1;
                sweep_entry(root, &entry.path(), name, now, &mut stats);
            }
        }
    }

    Ok(stats)
}

fn is_lower_hex(name: &str, len: usize) -> bool {
    name.len() == len && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Name of a shard directory, when it is one the store could have created.
fn shard_name(entry: &fs::DirEntry) -> Option<String> {
    let name = entry.file_name().into_string().ok()?;
    is_lower_hex(&name, SHARD_LEN).then_some(name)
}

/// Entries are named by the full digest, which starts with both shard names.
fn is_entry_name(name: &str, shard_prefix: &str) -> bool {
    is_lower_hex(name, DIGEST_LEN) && name.starts_with(shard_prefix)
}

fn is_temp_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(TEMP_PREFIX) else {
        return false;
    };
    match rest.strip_prefix(REAP_MARKER) {
        Some(digest) => is_lower_hex(digest, DIGEST_LEN),
        None => rest.len() == TEMP_RAND_LEN && rest.bytes().all(|b| b.is_ascii_alphanumeric()),
    }
}

/// Expiry stamp of an entry file; `None` when the file is too short to hold one.
fn read_entry_expiry(path: &Path) -> io::Result<Option<u64>> {
    let mut header = [0u8; EXPIRY_HEADER_LEN];
    match fs::File::open(path).and_then(|mut file| file.read_exact(&mut header)) {
        Ok(()) => Ok(Some(u64::from_be_bytes(header))),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err),
    }
}

fn sweep_entry(root: &Path, path: &Path, name: &str, now: u64, stats: &mut SweepStats) {
    match read_entry_expiry(path) {
        Ok(Some(expires_at)) if expires_at > now => return,
        // Expired, or too short to hold its header and never readable.
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(err) => {
            warn!(
                op = "sweep_entry",
                path = %path.display(),
                error = %err,
                "failed to read cache entry header"
            );
            return;
        }
    }

    match reap_entry(root, path, name, now) {
        Ok(Some(size)) => {
            trace!(path = %path.display(), "removed expired cache entry");
            stats.removed += 1;
            stats.bytes_reclaimed += size;
        }
        Ok(None) => {}
        Err(err) => {
            warn!(
                op = "sweep_entry",
                path = %path.display(),
                error = %err,
                "failed to remove expired cache entry"
            );
        }
    }
}

/// Remove an entry already judged expired, unless a concurrent `set` has
/// replaced it since.
///
/// The file is renamed out of its slot first, which detaches it from the key
/// atomically, and the detached copy is checked again. A copy that turns out
/// to be live is linked back into the slot unless a newer write already
/// occupies it. Returns the reclaimed size when the entry was removed.
fn reap_entry(root: &Path, path: &Path, name: &str, now: u64) -> io::Result<Option<u64>> {
    let claimed = root.join(format!("{TEMP_PREFIX}{REAP_MARKER}{name}"));
    match fs::rename(path, &claimed) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }

    let size = fs::metadata(&claimed).map(|meta| meta.len()).unwrap_or(0);
    let live = matches!(read_entry_expiry(&claimed), Ok(Some(expires_at)) if expires_at > now);
    if live {
        let relinked = match fs::hard_link(&claimed, path) {
            Err(err) if err.kind() != ErrorKind::AlreadyExists => Err(err),
            _ => Ok(()),
        };
        fs::remove_file(&claimed)?;
        relinked?;
        return Ok(None);
    }

    fs::remove_file(&claimed)?;
    Ok(Some(size))
}

fn remove_stale_temp_file(path: &Path, stats: &mut SweepStats) {
    let is_temp = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_temp_name);
    if !is_temp {
        return;
    }

    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    let stale = meta
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= TEMP_FILE_GRACE);
    if stale && fs::remove_file(path).is_ok() {
        stats.bytes_reclaimed += meta.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = FileStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).expect("open nested store");
        assert!(store.root().is_dir());
    }

    #[test]
    fn open_rejects_a_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(FileStore::open(&file).is_err());
    }

    #[test]
    fn entry_path_is_sharded_by_digest() {
        let (dir, store) = store();
        let path = store.entry_path("GET localhost/");
        let relative = path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = relative.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 64);
        assert!(parts[2].starts_with(&format!("{}{}", parts[0], parts[1])));
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let (_dir, store) = store();
        store
            .set("k", Bytes::from("value"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("value")));
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_replaces_previous_value() {
        let (_dir, store) = store();
        let ttl = Duration::from_secs(30);
        store.set("k", Bytes::from("old"), ttl).await.unwrap();
        store.set("k", Bytes::from("new"), ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing_until_swept() {
        let (_dir, store) = store();
        store
            .set("k", Bytes::from("v"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.exists("k").await.unwrap());

        let stats = store.sweep_expired().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.removed, 1);
        assert!(stats.bytes_reclaimed > 0);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_keeps_live_entries() {
        let (_dir, store) = store();
        store
            .set("live", Bytes::from("v"), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("dead", Bytes::from("v"), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = store.sweep_expired().await.unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.removed, 1);
        assert!(store.exists("live").await.unwrap());
        assert!(!store.exists("dead").await.unwrap());
    }

    #[tokio::test]
    async fn truncated_entry_is_corrupt_and_swept() {
        let (_dir, store) = store();
        let path = store.entry_path("k");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [1u8, 2, 3]).unwrap();

        assert!(matches!(store.get("k").await, Err(StoreError::Corrupt(_))));

        let stats = store.sweep_expired().await.unwrap();
        assert_eq!(stats.removed, 1);
        assert!(!store.exists("k").await.unwrap());
    }

    fn age(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn fresh_temp_files_survive_sweep() {
        let (dir, store) = store();
        let temp = dir.path().join("tmp_Ab3dEf6hIj9kLm0n");
        fs::write(&temp, b"partial").unwrap();

        store.sweep_expired().await.unwrap();
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn abandoned_temp_files_are_reclaimed_but_foreign_ones_are_not() {
        let (dir, store) = store();
        let abandoned = dir.path().join("tmp_Ab3dEf6hIj9kLm0n");
        let detached = dir.path().join(format!("tmp_reap_{}", hash_key("k")));
        let foreign = dir.path().join("tmp_foreign.log");
        for path in [&abandoned, &detached, &foreign] {
            fs::write(path, b"partial").unwrap();
            age(path, Duration::from_secs(120));
        }

        let stats = store.sweep_expired().await.unwrap();
        assert!(!abandoned.exists());
        assert!(!detached.exists());
        assert!(foreign.exists());
        assert_eq!(stats.bytes_reclaimed, 14);
    }

    #[tokio::test]
    async fn sweep_only_touches_files_shaped_like_entries() {
        let (dir, store) = store();
        let root = dir.path();

        let pid = root.join("myapp").join("state").join("app.pid");
        fs::create_dir_all(pid.parent().unwrap()).unwrap();
        fs::write(&pid, b"4242").unwrap();
        let blob = pid.with_file_name("blob.bin");
        fs::write(&blob, [0u8; 32]).unwrap();

        let notes = root.join("ab").join("cd").join("notes.txt");
        fs::create_dir_all(notes.parent().unwrap()).unwrap();
        fs::write(&notes, [0u8; 16]).unwrap();

        // A digest-named file filed under shards it does not start with.
        let misplaced = notes.with_file_name("f".repeat(64));
        fs::write(&misplaced, [0u8; 8]).unwrap();

        let digest = "ABCD".to_string() + &"0".repeat(60);
        let upper = root.join("AB").join("CD").join(&digest);
        fs::create_dir_all(upper.parent().unwrap()).unwrap();
        fs::write(&upper, [0u8; 8]).unwrap();

        let stats = store.sweep_expired().await.unwrap();
        assert_eq!(stats, SweepStats::default());
        for path in [&pid, &blob, &notes, &misplaced, &upper] {
            assert!(path.exists(), "{} was removed", path.display());
        }
    }

    #[tokio::test]
    async fn reaping_a_rewritten_entry_keeps_it() {
        let (dir, store) = store();
        store
            .set("k", Bytes::from("fresh"), Duration::from_secs(60))
            .await
            .unwrap();
        let path = store.entry_path("k");
        let name = hash_key("k");

        let reclaimed = reap_entry(dir.path(), &path, &name, now_millis()).unwrap();
        assert_eq!(reclaimed, None);
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("fresh")));
        assert!(!dir.path().join(format!("tmp_reap_{name}")).exists());
    }

    #[tokio::test]
    async fn reaping_an_expired_entry_removes_it() {
        let (dir, store) = store();
        store
            .set("k", Bytes::from("stale"), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let path = store.entry_path("k");

        let reclaimed = reap_entry(dir.path(), &path, &hash_key("k"), now_millis()).unwrap();
        assert_eq!(reclaimed, Some(13));
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(
            reap_entry(dir.path(), &path, &hash_key("k"), now_millis()).unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store
            .set("k", Bytes::from("v"), Duration::from_secs(30))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }
}
