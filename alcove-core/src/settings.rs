//! Shared workspace settings document with plugin-namespaced views
//!
//! All plugin settings live in one TOML document keyed `plugin.<id>.<key>`.
//! The key prefix is the only isolation between plugins: a [`PluginSettings`]
//! view cannot read or write outside its own namespace. Writes are persisted
//! with a short debounce so bursts of settings churn produce one disk write.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use alcove_plugin_api::SettingsHandle;

/// How long a write burst may continue before the document is flushed
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Settings persistence errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

struct SettingsInner {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
    /// Writes since the last flush. The worker flushes once the count
    /// stops moving for a debounce interval.
    pending: Mutex<u64>,
    wake: Condvar,
    worker_started: AtomicBool,
}

impl Drop for SettingsInner {
    fn drop(&mut self) {
        // Unflushed writes go to disk before the document disappears
        if *self.pending.get_mut() > 0
            && let Err(e) = write_document(&self.path, self.values.get_mut())
        {
            warn!(error = %e, "Failed to flush settings document on drop");
        }
    }
}

fn write_document(path: &Path, values: &HashMap<String, String>) -> Result<(), SettingsError> {
    let content =
        toml::to_string_pretty(values).map_err(|e| SettingsError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.exists()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// The shared settings document
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<SettingsInner>,
}

impl SettingsStore {
    /// Load the document from a TOML file, empty if the file is missing
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| SettingsError::Serialization(e.to_string()))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            inner: Arc::new(SettingsInner {
                path: path.to_path_buf(),
                values: Mutex::new(values),
                pending: Mutex::new(0),
                wake: Condvar::new(),
                worker_started: AtomicBool::new(false),
            }),
        })
    }

    /// Read a raw key
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.values.lock().get(key).cloned()
    }

    /// Write a raw key and schedule a debounced flush
    pub fn set(&self, key: &str, value: &str) {
        self.inner
            .values
            .lock()
            .insert(key.to_string(), value.to_string());
        self.schedule_flush();
    }

    /// Remove a raw key and schedule a debounced flush
    pub fn remove(&self, key: &str) {
        self.inner.values.lock().remove(key);
        self.schedule_flush();
    }

    /// Write the document to disk immediately
    pub fn flush(&self) -> Result<(), SettingsError> {
        // Clearing the counter first means a write racing this flush
        // bumps it again and gets its own debounced flush.
        *self.inner.pending.lock() = 0;
        let values = self.inner.values.lock();
        write_document(&self.inner.path, &values)
    }

    /// Create a plugin-namespaced view over this document
    pub fn namespaced(&self, plugin_id: &str) -> PluginSettings {
        PluginSettings {
            store: self.clone(),
            prefix: format!("plugin.{plugin_id}."),
        }
    }

    fn schedule_flush(&self) {
        {
            let mut pending = self.inner.pending.lock();
            *pending += 1;
        }
        self.inner.wake.notify_one();

        // One long-lived worker per store, started on the first write
        if !self.inner.worker_started.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(&self.inner);
            std::thread::spawn(move || flush_worker(weak));
        }
    }
}

/// The store's flush thread: parks until a write arrives, waits out the
/// debounce interval, writes the document once. Exits when the store is
/// dropped.
fn flush_worker(weak: Weak<SettingsInner>) {
    loop {
        {
            let Some(inner) = weak.upgrade() else { return };
            let mut pending = inner.pending.lock();
            if *pending == 0 {
                // Time out so a dropped store is noticed
                inner.wake.wait_for(&mut pending, Duration::from_secs(1));
                if *pending == 0 {
                    continue;
                }
            }
        }

        std::thread::sleep(DEBOUNCE);

        let Some(inner) = weak.upgrade() else { return };
        {
            let mut pending = inner.pending.lock();
            if *pending == 0 {
                // An explicit flush beat us to it
                continue;
            }
            *pending = 0;
        }
        let values = inner.values.lock();
        if let Err(e) = write_document(&inner.path, &values) {
            warn!(error = %e, "Failed to flush settings document");
        }
    }
}

/// One plugin's view of the shared document.
///
/// Keys are transparently prefixed `plugin.<id>.`.
pub struct PluginSettings {
    store: SettingsStore,
    prefix: String,
}

impl SettingsHandle for PluginSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.store.get(&format!("{}{key}", self.prefix))
    }

    fn set(&self, key: &str, value: &str) {
        self.store.set(&format!("{}{key}", self.prefix), value);
    }

    fn remove(&self, key: &str) {
        self.store.remove(&format!("{}{key}", self.prefix));
    }
}
