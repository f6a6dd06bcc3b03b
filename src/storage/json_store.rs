//! Directory-backed store of per-user feed configurations.
//!
//! Every `*.json` file below the store directory describes one aggregate feed.
//! The parsed files form an immutable snapshot that is published with a single
//! reference swap, so a lookup sees either the complete old mapping or the
//! complete new one. Filesystem events do not rescan directly; they reset a
//! [`Debouncer`] so that a burst of writes (editor temp files, renames) turns
//! into one rescan after the quiet window.

use super::types::{ConfigFile, FeedConfiguration, StoreError, UrlsUpdate};
use crate::util::{validate_url_list, Debouncer};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

/// File extension of configuration files.
pub const CONFIG_EXTENSION: &str = "json";

/// Immutable identifier -> configuration mapping.
pub type Snapshot = HashMap<String, Arc<FeedConfiguration>>;

pub struct ConfigStore {
    inner: Arc<StoreInner>,
    watch: Mutex<Option<DirWatch>>,
}

struct StoreInner {
    dir: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes rescans against each other.
    rescan_lock: Mutex<()>,
    /// One lock per identifier so writers of the same file never interleave.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

struct DirWatch {
    _watcher: RecommendedWatcher,
    debouncer: Arc<Debouncer>,
}

impl ConfigStore {
    /// Starts watching `dir`, then scans it synchronously.
    ///
    /// The watch is registered first so a file written during the initial
    /// scan still produces an event. Must be called from within a Tokio
    /// runtime; the debounce timer runs on it. The directory is created if
    /// it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>, quiet: Duration) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let store = Self::unscanned(dir.clone());

        let weak: Weak<StoreInner> = Arc::downgrade(&store.inner);
        let debouncer = Arc::new(Debouncer::new(runtime, quiet, move || {
            if let Some(inner) = weak.upgrade() {
                inner.rescan();
            }
        }));

        let on_event = Arc::clone(&debouncer);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Config directory changed");
                        on_event.reset();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Config directory watch error"),
            })?;
        watcher.watch(&dir, RecursiveMode::Recursive)?;

        tracing::info!(
            dir = %dir.display(),
            quiet_secs = quiet.as_secs_f64(),
            "Watching config directory"
        );

        *store.watch.lock().unwrap_or_else(|p| p.into_inner()) = Some(DirWatch {
            _watcher: watcher,
            debouncer,
        });
        store.inner.rescan();
        Ok(store)
    }

    /// Scans `dir` once without watching it. Refreshes must be triggered with
    /// [`rescan_now`](Self::rescan_now).
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let store = Self::unscanned(dir.into());
        store.inner.rescan();
        store
    }

    fn unscanned(dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                dir,
                snapshot: RwLock::new(Arc::new(HashMap::new())),
                rescan_lock: Mutex::new(()),
                write_locks: Mutex::new(HashMap::new()),
            }),
            watch: Mutex::new(None),
        }
    }

    /// Looks up one configuration in the current snapshot.
    pub fn get(&self, identifier: &str) -> Option<Arc<FeedConfiguration>> {
        self.snapshot().get(identifier).cloned()
    }

    /// The current snapshot. Holding it pins that version of the mapping.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.inner.snapshot.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Rebuilds the snapshot from disk immediately. Returns the number of
    /// configurations loaded.
    pub fn rescan_now(&self) -> usize {
        self.inner.rescan()
    }

    /// Schedules a debounced rescan, as a filesystem event would.
    /// Falls back to an immediate rescan when the store is not watching.
    pub fn schedule_rescan(&self) {
        let watch = self.watch.lock().unwrap_or_else(|p| p.into_inner());
        match watch.as_ref() {
            Some(w) => w.debouncer.reset(),
            None => {
                drop(watch);
                self.inner.rescan();
            }
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Stops watching the directory and cancels a pending rescan. The store
    /// keeps serving its last snapshot and can still be refreshed manually.
    pub fn close(&self) {
        let taken = self.watch.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(watch) = taken {
            watch.debouncer.stop();
            tracing::debug!(dir = %self.inner.dir.display(), "Stopped watching config directory");
        }
    }

    /// Replaces the URL list of `identifier` with `new_urls`.
    ///
    /// `new_urls` is raw user input that must be a JSON array of absolute
    /// http(s) URLs; blank input means an empty list. Invalid input is handed
    /// back untouched as [`UrlsUpdate::Rejected`] and nothing is written.
    ///
    /// The file is rewritten in place of the one the configuration was loaded
    /// from. The snapshot itself only changes on the next rescan.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownIdentifier`] if no such configuration is loaded
    /// - [`StoreError::Io`] / [`StoreError::Json`] if the file cannot be written
    pub fn write(&self, identifier: &str, new_urls: &str) -> Result<UrlsUpdate, StoreError> {
        let raw = if new_urls.trim().is_empty() {
            "[]"
        } else {
            new_urls
        };

        let urls = match validate_url_list(raw) {
            Ok(urls) => urls,
            Err(e) => {
                tracing::debug!(identifier = %identifier, error = %e, "Rejected URL list");
                return Ok(UrlsUpdate::Rejected {
                    input: new_urls.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let config = self
            .get(identifier)
            .ok_or_else(|| StoreError::UnknownIdentifier(identifier.to_string()))?;

        let lock = self.inner.write_lock(identifier);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        let file = config.to_file(urls);
        let content = serde_json::to_string_pretty(&file)?;
        write_atomically(config.source(), content.as_bytes())?;

        tracing::info!(
            identifier = %identifier,
            path = %config.source().display(),
            urls = file.urls.len(),
            "Saved feed configuration"
        );
        Ok(UrlsUpdate::Saved(serde_json::to_string_pretty(&file.urls)?))
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("dir", &self.inner.dir)
            .field("configurations", &self.snapshot().len())
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl StoreInner {
    fn rescan(&self) -> usize {
        let _guard = self.rescan_lock.lock().unwrap_or_else(|p| p.into_inner());

        let mut files = Vec::new();
        collect_files(&self.dir, &mut files);
        // Stable order: when two files share an identifier the later path wins.
        files.sort();

        let mut fresh: Snapshot = HashMap::with_capacity(files.len());
        let mut skipped = 0usize;
        for file in &files {
            match parse_file(file) {
                Ok(config) => {
                    let id = config.identifier().to_string();
                    if let Some(previous) = fresh.insert(id.clone(), Arc::new(config)) {
                        tracing::warn!(
                            identifier = %id,
                            replaced = %previous.source().display(),
                            by = %file.display(),
                            "Duplicate feed identifier, last file scanned wins"
                        );
                    }
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(path = %file.display(), error = %e, "Could not parse config file, skipping");
                }
            }
        }

        let count = fresh.len();
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(fresh);

        tracing::info!(
            dir = %self.dir.display(),
            loaded = count,
            skipped = skipped,
            "Feed configurations rescanned"
        );
        count
    }

    fn write_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            locks
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Could not scan config directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => collect_files(&path, out),
            Ok(_) if path.extension().is_some_and(|ext| ext == CONFIG_EXTENSION) => out.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not stat config entry")
            }
        }
    }
}

/// Reads and validates a single configuration file.
///
/// The document must be a JSON object; derived `Deserialize` would also
/// accept a positional array.
pub fn parse_file(path: &Path) -> Result<FeedConfiguration, StoreError> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    if !value.is_object() {
        return Err(StoreError::NotAnObject(path.to_path_buf()));
    }
    let file: ConfigFile = serde_json::from_value(value)?;
    FeedConfiguration::from_file(file, path)
}

/// Writes `content` to `path` via a temp file and rename, so readers and the
/// scanner never observe a half-written file.
fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    // Randomized temp name; it also lacks the config extension so a
    // concurrent scan ignores it.
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = (|| {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);

        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}
