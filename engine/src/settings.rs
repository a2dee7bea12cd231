use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::{fs, path::{Path, PathBuf}};
use uuid::Uuid;

use crate::utils::os::{app_support_dir, default_download_dir};

pub const DARK_MODE: &str = "dark_mode";
pub const DOWNLOAD_PATH: &str = "download_path";

/// Where we store settings.json, e.g. on Linux:
///   ~/.config/ytdl-desk/settings.json
pub fn settings_json_path() -> PathBuf {
    app_support_dir().join("settings.json")
}

/// Flat key-value preference document backed by a JSON file.
///
/// Known keys are `dark_mode` and `download_path`. Anything else found in the
/// file is carried along untouched so a newer build's keys survive a save.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl PreferenceStore {
    /// In-memory store holding only the built-in defaults. Nothing is read
    /// until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Self::defaults(),
        }
    }

    /// Store at the per-user default location, already loaded.
    pub fn open_default() -> Self {
        let mut store = Self::new(settings_json_path());
        store.load();
        store
    }

    pub fn defaults() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(DARK_MODE.into(), Value::Bool(false));
        m.insert(
            DOWNLOAD_PATH.into(),
            Value::String(default_download_dir().to_string_lossy().to_string()),
        );
        m
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the on-disk document over the current values. A missing file or
    /// anything that isn't a JSON object leaves the store as it was.
    pub fn load(&mut self) {
        let body = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("settings not loaded from {}: {e}", self.path.display());
                return;
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&body) {
            Ok(doc) => self.values.extend(doc),
            Err(e) => tracing::warn!("ignoring unreadable settings {}: {e}", self.path.display()),
        }
    }

    /// Best-effort write of the whole document. Failures are logged, never returned.
    pub fn save(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let body = match serde_json::to_string_pretty(&self.values) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("failed to serialize settings: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, body) {
            tracing::warn!("failed to write {}: {e}", self.path.display());
        }
    }

    /// Typed read; a missing key or a value of the wrong shape yields `default`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// In-memory only; call [`save`](Self::save) to persist.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn dark_mode(&self) -> bool {
        self.get(DARK_MODE, false)
    }

    pub fn set_dark_mode(&mut self, on: bool) {
        self.set(DARK_MODE, on);
    }

    pub fn download_path(&self) -> PathBuf {
        PathBuf::from(self.get(DOWNLOAD_PATH, default_download_dir().to_string_lossy().to_string()))
    }

    pub fn set_download_path(&mut self, path: &Path) {
        self.set(DOWNLOAD_PATH, path.to_string_lossy().to_string());
    }

    /// The stored download directory if it is usable, otherwise the default
    /// Downloads dir (created if needed). Does not rewrite the stored value.
    pub fn resolved_download_dir(&self) -> PathBuf {
        validated_download_dir(&self.download_path())
    }
}

fn dir_is_writable(p: &Path) -> bool {
    if !p.is_dir() {
        return false;
    }
    let test = p.join(format!(".writecheck-{}.tmp", Uuid::new_v4()));
    match fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&test)
    {
        Ok(_) => {
            let _ = fs::remove_file(test);
            true
        }
        Err(_) => false,
    }
}

/// Validate a candidate directory. If invalid, return the default Downloads dir (and try to create it).
fn validated_download_dir(candidate: &Path) -> PathBuf {
    validated_download_dir_or(candidate, &default_download_dir())
}

fn validated_download_dir_or(candidate: &Path, fallback: &Path) -> PathBuf {
    let trimmed = candidate.to_string_lossy().trim().to_string();
    let mut path = PathBuf::from(trimmed);

    // Empty or non-absolute? → fallback
    if path.as_os_str().is_empty() || !path.is_absolute() {
        path = fallback.to_path_buf();
    }

    if !path.exists() {
        if let Err(e) = fs::create_dir_all(&path) {
            tracing::warn!("cannot create {}: {e}; using default", path.display());
            path = fallback.to_path_buf();
            let _ = fs::create_dir_all(&path);
        }
    }

    if !dir_is_writable(&path) {
        tracing::warn!("{} is not writable; using default", path.display());
        let _ = fs::create_dir_all(fallback);
        return fallback.to_path_buf();
    }

    path
}
