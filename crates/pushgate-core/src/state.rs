use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FolderId, GatewayError, Result};

/// Everything the adapters persist per device between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub folder_to_native: BTreeMap<String, String>,
    #[serde(default)]
    pub native_to_folder: BTreeMap<String, String>,
    #[serde(default)]
    pub sent_folder: Option<FolderId>,
    #[serde(default)]
    pub trash_folder: Option<FolderId>,
}

pub trait DeviceStateStore {
    fn load(&self) -> Result<DeviceState>;
    fn save(&self, state: &DeviceState) -> Result<()>;
}

pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStateStore { path: path.into() }
    }

    pub fn for_device(dir: &Path, device_id: &str) -> Self {
        let name: String = device_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        JsonFileStateStore::new(dir.join(format!("{name}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStateStore for JsonFileStateStore {
    fn load(&self) -> Result<DeviceState> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no device state yet");
                return Ok(DeviceState::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, state: &DeviceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), folders = state.folder_to_native.len(), "device state saved");
        Ok(())
    }
}

/// Shared in-process store; clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<DeviceState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        MemoryStateStore::default()
    }

    pub fn snapshot(&self) -> Result<DeviceState> {
        self.load()
    }
}

impl DeviceStateStore for MemoryStateStore {
    fn load(&self) -> Result<DeviceState> {
        self.inner
            .lock()
            .map(|state| state.clone())
            .map_err(|_| GatewayError::State("state lock poisoned".to_string()))
    }

    fn save(&self, state: &DeviceState) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| GatewayError::State("state lock poisoned".to_string()))?;
        *guard = state.clone();
        Ok(())
    }
}
