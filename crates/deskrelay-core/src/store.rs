//! Durable per-device conversation history.
//!
//! Layout under the data directory:
//!
//! ```text
//! devices/<stem>.json     roster metadata, rewritten atomically on registration
//! history/<stem>.jsonl    append-only log, one message per line
//! ```
//!
//! `<stem>` is a filesystem-safe, injective encoding of the device id.
//! Write failures degrade durability but never block delivery: they are
//! logged and the in-memory state stays authoritative.

use dashmap::DashMap;
use deskrelay_protocol::{DeviceInfo, DeviceStatus, MessageRecord};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEVICES_DIR: &str = "devices";
const HISTORY_DIR: &str = "history";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The device has never registered.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Filesystem error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be serialized.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Everything persisted about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub info: DeviceInfo,
    pub history: Vec<MessageRecord>,
}

#[derive(Debug, Default)]
struct DeviceLog {
    info: Option<DeviceInfo>,
    history: Vec<MessageRecord>,
}

/// Append-only history keyed by device id, optionally backed by disk.
pub struct ConversationStore {
    /// Data directory; `None` keeps everything in memory.
    root: Option<PathBuf>,
    /// Per-device logs. Each log has its own lock so appends to different
    /// devices never wait on each other.
    logs: DashMap<String, Arc<Mutex<DeviceLog>>>,
}

impl ConversationStore {
    /// Create a store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            root: None,
            logs: DashMap::new(),
        }
    }

    /// Open a disk-backed store, loading everything already persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directories cannot be created or read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [root.join(DEVICES_DIR), root.join(HISTORY_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let records = Self::load(&root)?;
        info!(
            path = %root.display(),
            devices = records.len(),
            "Opened conversation store"
        );

        let logs = DashMap::new();
        for (id, record) in records {
            logs.insert(
                id,
                Arc::new(Mutex::new(DeviceLog {
                    info: Some(record.info),
                    history: record.history,
                })),
            );
        }

        Ok(Self {
            root: Some(root),
            logs,
        })
    }

    /// Read every persisted device from a data directory.
    ///
    /// All devices come back offline: no connection survives a restart.
    /// Unreadable device files and torn history lines are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or history file cannot be read.
    pub fn load(root: &Path) -> Result<HashMap<String, DeviceRecord>, StoreError> {
        let devices_dir = root.join(DEVICES_DIR);
        let mut records = HashMap::new();

        if !devices_dir.exists() {
            return Ok(records);
        }

        let entries = fs::read_dir(&devices_dir).map_err(|e| StoreError::io(&devices_dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&devices_dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let mut info: DeviceInfo = match fs::read_to_string(&path)
                .map_err(|e| StoreError::io(&path, e))
                .and_then(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            {
                Ok(info) => info,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable device record");
                    continue;
                }
            };
            info.status = DeviceStatus::Offline;

            let history = read_history(&history_path(root, &info.client_id))?;
            debug!(device = %info.client_id, messages = history.len(), "Loaded device");
            records.insert(info.client_id.clone(), DeviceRecord { info, history });
        }

        Ok(records)
    }

    /// Check if a device is known.
    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.logs.contains_key(device_id)
    }

    /// Roster metadata of every known device.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.logs
            .iter()
            .filter_map(|entry| lock(entry.value()).info.clone())
            .collect()
    }

    /// Persist a device's roster metadata.
    pub fn save_device(&self, info: &DeviceInfo) {
        let log = self.log(&info.client_id);
        let mut log = lock(&log);
        log.info = Some(info.clone());

        if let Some(root) = &self.root {
            if let Err(e) = write_device(root, info) {
                warn!(device = %info.client_id, error = %e, "Failed to persist device record");
            }
        }
    }

    /// Append a message to a device's history.
    ///
    /// The line is flushed to disk before this returns. A write failure is
    /// logged and the message is kept in memory.
    pub fn append(&self, device_id: &str, record: MessageRecord) {
        self.append_with(device_id, record, |_| true);
    }

    /// Run `deliver` and, if it returns `true`, append `record`, all under
    /// the device's lock.
    ///
    /// Fan-out done inside `deliver` therefore reaches recipients in the same
    /// order the records land in history. Returns what `deliver` returned.
    /// The closure must not call back into this store for the same device.
    pub fn append_with<F>(&self, device_id: &str, record: MessageRecord, deliver: F) -> bool
    where
        F: FnOnce(&MessageRecord) -> bool,
    {
        let log = self.log(device_id);
        let mut log = lock(&log);

        if !deliver(&record) {
            return false;
        }

        if let Some(root) = &self.root {
            if let Err(e) = append_line(&history_path(root, device_id), &record) {
                warn!(device = %device_id, error = %e, "Failed to persist message; keeping it in memory");
            }
        }

        log.history.push(record);
        true
    }

    /// Full history of a device, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the device has never registered.
    pub fn history_of(&self, device_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let log = self
            .logs
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;
        let history = lock(&log).history.clone();
        Ok(history)
    }

    /// Get or lazily create a device's log, releasing the map shard at once.
    fn log(&self, device_id: &str) -> Arc<Mutex<DeviceLog>> {
        Arc::clone(
            self.logs
                .entry(device_id.to_string())
                .or_default()
                .value(),
        )
    }
}

fn lock(log: &Mutex<DeviceLog>) -> MutexGuard<'_, DeviceLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode a device id as a file stem. Bytes outside `[A-Za-z0-9.@-]`
/// become `_xx`, so distinct ids never share a file.
fn file_stem(device_id: &str) -> String {
    let mut stem = String::with_capacity(device_id.len());
    for b in device_id.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'@') {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("_{b:02x}"));
        }
    }
    stem
}

fn device_path(root: &Path, device_id: &str) -> PathBuf {
    root.join(DEVICES_DIR)
        .join(format!("{}.json", file_stem(device_id)))
}

fn history_path(root: &Path, device_id: &str) -> PathBuf {
    root.join(HISTORY_DIR)
        .join(format!("{}.jsonl", file_stem(device_id)))
}

fn write_device(root: &Path, info: &DeviceInfo) -> Result<(), StoreError> {
    let path = device_path(root, &info.client_id);
    let data = serde_json::to_vec_pretty(info)?;
    write_atomic(&path, &data)
}

/// Write via a temporary sibling and rename, so readers never see a partial file.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(data).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Append one JSON line. A torn tail left by an earlier crash is closed off
/// first so the new record starts on its own line.
fn append_line(path: &Path, record: &MessageRecord) -> Result<(), StoreError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    if !ends_with_newline(&mut file).map_err(|e| StoreError::io(path, e))? {
        line.insert(0, b'\n');
    }

    file.write_all(&line).map_err(|e| StoreError::io(path, e))?;
    file.sync_data().map_err(|e| StoreError::io(path, e))
}

/// Empty files count as terminated.
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Read a history log. Lines that fail to parse, including ones cut inside
/// a multi-byte character, are skipped with a warning.
fn read_history(path: &Path) -> Result<Vec<MessageRecord>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut history = Vec::new();
    for (index, line) in raw.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice(line) {
            Ok(record) => history.push(record),
            Err(e) => {
                warn!(path = %path.display(), line = index + 1, error = %e, "Skipping torn history line");
            }
        }
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrelay_protocol::DeviceMetadata;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo::online(
            id,
            DeviceMetadata {
                hostname: "host1".into(),
                username: "alice".into(),
                platform: "linux".into(),
            },
        )
    }

    #[test]
    fn test_file_stem_is_injective() {
        assert_eq!(file_stem("alice@host1"), "alice@host1");
        assert_eq!(file_stem("a/b"), "a_2fb");
        assert_ne!(file_stem("a_2fb"), file_stem("a/b"));
        assert!(!file_stem("../etc/passwd").contains('/'));
    }

    #[test]
    fn test_history_of_unknown_device() {
        let store = ConversationStore::in_memory();
        assert!(matches!(
            store.history_of("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_append_preserves_order_per_device() {
        let store = ConversationStore::in_memory();
        store.save_device(&device("d1"));
        store.save_device(&device("d2"));

        for i in 0..5 {
            store.append("d1", MessageRecord::from_device("d1", format!("d1-{i}")));
            store.append("d2", MessageRecord::from_device("d2", format!("d2-{i}")));
        }

        let history = store.history_of("d1").unwrap();
        let lines: Vec<_> = history.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(lines, ["d1-0", "d1-1", "d1-2", "d1-3", "d1-4"]);
        assert_eq!(store.history_of("d2").unwrap().len(), 5);
    }

    #[test]
    fn test_concurrent_appends_to_distinct_devices() {
        let store = Arc::new(ConversationStore::in_memory());
        let workers: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let id = format!("dev-{n}");
                    for i in 0..50 {
                        store.append(&id, MessageRecord::from_device(&id, i.to_string()));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        for n in 0..4 {
            let history = store.history_of(&format!("dev-{n}")).unwrap();
            let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
            let actual: Vec<String> = history.into_iter().map(|r| r.message).collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_reload_forces_offline_and_keeps_history() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = ConversationStore::open(dir.path()).unwrap();
            store.save_device(&device("alice@host1"));
            store.save_device(&device("bob@host2"));
            store.append("alice@host1", MessageRecord::from_device("alice@host1", "hello"));
            store.append(
                "alice@host1",
                MessageRecord::from_admin("IT", "alice@host1", "hi"),
            );
            store.append("bob@host2", MessageRecord::from_device("bob@host2", "vpn down"));
        }

        let records = ConversationStore::load(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.values().all(|r| r.info.status == DeviceStatus::Offline));

        let alice = &records["alice@host1"];
        assert_eq!(alice.history.len(), 2);
        assert_eq!(alice.history[0].message, "hello");
        assert_eq!(alice.history[1].from, "IT");

        let reopened = ConversationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.history_of("bob@host2").unwrap().len(), 1);
        assert!(reopened.devices().iter().all(|d| !d.is_online()));
    }

    #[test]
    fn test_load_skips_torn_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        store.save_device(&device("d1"));
        store.append("d1", MessageRecord::from_device("d1", "complete"));

        let mut file = OpenOptions::new()
            .append(true)
            .open(history_path(dir.path(), "d1"))
            .unwrap();
        file.write_all(br#"{"from":"d1","mess"#).unwrap();

        let records = ConversationStore::load(dir.path()).unwrap();
        assert_eq!(records["d1"].history.len(), 1);
    }

    #[test]
    fn test_open_skips_line_cut_inside_multibyte_char() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConversationStore::open(dir.path()).unwrap();
            store.save_device(&device("d1"));
            store.append("d1", MessageRecord::from_device("d1", "café ok"));
        }

        // "é" is 0xC3 0xA9; stop after the first byte.
        let mut file = OpenOptions::new()
            .append(true)
            .open(history_path(dir.path(), "d1"))
            .unwrap();
        file.write_all(b"{\"from\":\"d1\",\"message\":\"caf\xC3").unwrap();

        let store = ConversationStore::open(dir.path()).unwrap();
        let history = store.history_of("d1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "café ok");
    }

    #[test]
    fn test_append_after_torn_tail_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConversationStore::open(dir.path()).unwrap();
            store.save_device(&device("d1"));
            store.append("d1", MessageRecord::from_device("d1", "before"));
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(history_path(dir.path(), "d1"))
            .unwrap();
        file.write_all(br#"{"from":"d1","mess"#).unwrap();
        drop(file);

        {
            let store = ConversationStore::open(dir.path()).unwrap();
            store.append("d1", MessageRecord::from_device("d1", "after restart"));
        }

        let store = ConversationStore::open(dir.path()).unwrap();
        let lines: Vec<String> = store
            .history_of("d1")
            .unwrap()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(lines, ["before", "after restart"]);
    }

    #[test]
    fn test_append_with_rejected_delivery_appends_nothing() {
        let store = ConversationStore::in_memory();
        store.save_device(&device("d1"));

        let appended = store.append_with("d1", MessageRecord::from_device("d1", "lost"), |_| false);
        assert!(!appended);
        assert!(store.history_of("d1").unwrap().is_empty());

        let appended = store.append_with("d1", MessageRecord::from_device("d1", "kept"), |r| {
            r.message == "kept"
        });
        assert!(appended);
        assert_eq!(store.history_of("d1").unwrap().len(), 1);
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        store.save_device(&device("d1"));

        // Replace the history directory with a plain file so appends fail.
        let history_dir = dir.path().join(HISTORY_DIR);
        fs::remove_dir_all(&history_dir).unwrap();
        fs::write(&history_dir, b"").unwrap();

        store.append("d1", MessageRecord::from_device("d1", "still delivered"));

        let history = store.history_of("d1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "still delivered");
    }
}
