//! Snapshot Manager
//!
//! Writes the whole keyspace to a JSON file and reads it back at startup.
//!
//! ## File Format
//!
//! A flat JSON object mapping each key to its value encoded as standard
//! base64 with padding:
//!
//! ```text
//! {"color":"cmVk","name":"a2l0ZQ=="}
//! ```
//!
//! Expiry information is not written: every key loaded from a snapshot is
//! persistent.
//!
//! ## Scheduling
//!
//! A background task evaluates the save rules against the store's dirty
//! counter and the time since the last save, saves when a rule is met, and
//! sleeps for the delay [`evaluate`] asks for otherwise.

use crate::persistence::rules::{evaluate, SaveDecision, SaveRule, MIN_CHECK_DELAY};
use crate::storage::Db;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace};

/// Delay before retrying after a failed automatic save.
pub const SAVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors that can occur while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a JSON object of strings
    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is not valid base64
    #[error("invalid base64 value for key '{key}'")]
    Base64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    /// `set_store` was never called
    #[error("no store attached to the snapshot manager")]
    NoStore,
}

/// Where snapshots go and when they are taken.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Directory holding the snapshot file, created on first save
    pub dir: PathBuf,
    /// File name inside `dir`
    pub filename: String,
    /// Automatic save rules; empty disables automatic saves
    pub rules: Vec<SaveRule>,
}

impl SnapshotConfig {
    /// Full path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

/// Result of loading a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No snapshot file; the store starts empty
    NotFound,
    /// This many keys were loaded
    Loaded(usize),
    /// The file was unreadable or corrupt; the store was left empty
    Discarded,
}

/// Saves and restores the store, and runs automatic saves.
///
/// # Example
///
/// ```no_run
/// use redkite::persistence::{SaveRule, SnapshotConfig, SnapshotManager};
/// use redkite::storage::Db;
///
/// # #[tokio::main]
/// # async fn main() {
/// let db = Db::new();
/// let snapshots = SnapshotManager::new(SnapshotConfig {
///     dir: "./data".into(),
///     filename: "dump.json".into(),
///     rules: SaveRule::from_config("900 1 300 10"),
/// });
/// snapshots.set_store(db.clone());
/// snapshots.load_initial().unwrap();
/// snapshots.start();
/// # }
/// ```
#[derive(Debug)]
pub struct SnapshotManager {
    inner: Arc<Inner>,
    task: Mutex<Option<CheckTask>>,
}

#[derive(Debug)]
struct Inner {
    config: SnapshotConfig,
    path: PathBuf,
    db: Mutex<Option<Db>>,
    /// Held for a whole save, from capture to `mark_saved`
    saving: Mutex<()>,
    /// Monotonic time of the last successful save, for rule evaluation
    last_save: Mutex<Instant>,
    /// Wall clock time of the last successful save, for `LASTSAVE`
    last_save_unix: AtomicU64,
}

#[derive(Debug)]
struct CheckTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CheckTask {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig) -> Self {
        let path = config.path();
        Self {
            inner: Arc::new(Inner {
                config,
                path,
                db: Mutex::new(None),
                saving: Mutex::new(()),
                last_save: Mutex::new(Instant::now()),
                last_save_unix: AtomicU64::new(unix_now()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Attaches the store to save from and load into.
    pub fn set_store(&self, db: Db) {
        *lock(&self.inner.db) = Some(db);
    }

    /// Starts automatic saves.
    ///
    /// A running scheduler is replaced. Without save rules nothing is started.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            previous.stop();
        }

        if self.inner.config.rules.is_empty() {
            info!("No save rules configured, automatic snapshots disabled");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(check_loop(Arc::clone(&self.inner), shutdown_rx));
        *task = Some(CheckTask {
            shutdown_tx,
            handle,
        });

        info!(
            path = %self.inner.path.display(),
            rules = self.inner.config.rules.len(),
            "Snapshot scheduler started"
        );
    }

    /// Stops automatic saves. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.stop();
            info!("Snapshot scheduler stopped");
        }
    }

    /// Returns true while the automatic save task is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Evaluates the save rules once, saving if one is met.
    pub fn check_now(&self) -> SaveDecision {
        let decision = self.inner.evaluate();
        if decision == SaveDecision::SaveNow {
            // Failures are logged by `save_to`.
            let _ = self.inner.save_to(&self.inner.path);
        }
        decision
    }

    /// Saves to the configured path. Returns the number of keys written.
    pub fn save_now(&self) -> Result<usize, SnapshotError> {
        self.inner.save_to(&self.inner.path)
    }

    /// Saves to `path`. Returns the number of keys written.
    pub fn save_to(&self, path: &Path) -> Result<usize, SnapshotError> {
        self.inner.save_to(path)
    }

    /// Loads the configured snapshot file into the store.
    pub fn load_initial(&self) -> Result<LoadOutcome, SnapshotError> {
        self.inner.load_from(&self.inner.path)
    }

    /// Loads `path` into the store, replacing its content.
    ///
    /// A missing file is not an error. A corrupt file is logged and leaves the
    /// store empty. Only a missing store is reported as an error.
    pub fn load_from(&self, path: &Path) -> Result<LoadOutcome, SnapshotError> {
        self.inner.load_from(path)
    }

    /// Unix time in seconds of the last successful save (or of startup).
    pub fn last_save_unix(&self) -> u64 {
        self.inner.last_save_unix.load(Ordering::Relaxed)
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn rules(&self) -> &[SaveRule] {
        &self.inner.config.rules
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.inner.config
    }
}

impl Drop for SnapshotManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn store(&self) -> Result<Db, SnapshotError> {
        lock(&self.db).clone().ok_or(SnapshotError::NoStore)
    }

    fn evaluate(&self) -> SaveDecision {
        let Ok(db) = self.store() else {
            return SaveDecision::CheckIn(SAVE_RETRY_DELAY);
        };
        let elapsed = lock(&self.last_save).elapsed();
        evaluate(&self.config.rules, db.dirty_count(), elapsed)
    }

    /// One scheduler step. Returns the delay until the next one.
    fn run_check(&self) -> Duration {
        match self.evaluate() {
            SaveDecision::CheckIn(delay) => delay,
            SaveDecision::SaveNow => match self.save_to(&self.path) {
                Ok(_) => match self.evaluate() {
                    SaveDecision::CheckIn(delay) => delay,
                    SaveDecision::SaveNow => MIN_CHECK_DELAY,
                },
                Err(_) => SAVE_RETRY_DELAY,
            },
        }
    }

    fn save_to(&self, path: &Path) -> Result<usize, SnapshotError> {
        let result = self.write_snapshot(path);
        if let Err(e) = &result {
            error!(path = %path.display(), error = %e, "Failed to save snapshot");
        }
        result
    }

    fn write_snapshot(&self, path: &Path) -> Result<usize, SnapshotError> {
        let db = self.store()?;
        let _saving = lock(&self.saving);

        // Entries and the dirty count are captured together; the file is
        // written without holding the store lock.
        let (entries, captured) = db.snapshot();
        let json = encode_snapshot(&entries)?;
        write_atomic(path, &json)?;

        db.mark_saved(captured);
        *lock(&self.last_save) = Instant::now();
        self.last_save_unix.store(unix_now(), Ordering::Relaxed);

        info!(
            keys = entries.len(),
            path = %path.display(),
            "Snapshot saved"
        );
        Ok(entries.len())
    }

    fn load_from(&self, path: &Path) -> Result<LoadOutcome, SnapshotError> {
        let db = self.store()?;

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                return Ok(LoadOutcome::NotFound);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read snapshot, starting empty");
                db.clear();
                return Ok(LoadOutcome::Discarded);
            }
        };

        match decode_snapshot(&bytes) {
            Ok(entries) => {
                let loaded = db.replace_all(entries);
                info!(keys = loaded, path = %path.display(), "Snapshot loaded");
                Ok(LoadOutcome::Loaded(loaded))
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Corrupt snapshot discarded, starting empty");
                db.clear();
                Ok(LoadOutcome::Discarded)
            }
        }
    }
}

/// The automatic save loop.
async fn check_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let delay = inner.run_check();
        trace!(delay_ms = delay.as_millis() as u64, "Next save rule check scheduled");

        tokio::select! {
            _ = time::sleep(delay) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot scheduler received shutdown signal");
                    return;
                }
            }
        }
    }
}

fn encode_snapshot(entries: &BTreeMap<String, Bytes>) -> Result<Vec<u8>, SnapshotError> {
    let encoded: BTreeMap<&str, String> = entries
        .iter()
        .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
        .collect();
    Ok(serde_json::to_vec(&encoded)?)
}

fn decode_snapshot(bytes: &[u8]) -> Result<Vec<(String, Bytes)>, SnapshotError> {
    let encoded: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
    encoded
        .into_iter()
        .map(|(key, value)| match STANDARD.decode(value.as_bytes()) {
            Ok(decoded) => Ok((key, Bytes::from(decoded))),
            Err(source) => Err(SnapshotError::Base64 { key, source }),
        })
        .collect()
}

/// Writes a uniquely named temporary file next to `path`, syncs it, then
/// renames it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    // Dropping the temp file on an early return removes it.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
