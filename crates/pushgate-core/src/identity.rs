use rand_core::{OsRng, RngCore};
use tracing::{debug, warn};

use crate::{DeviceState, DeviceStateStore, FolderId, GatewayError, Result};

/// Two-way mapping between native folder paths and the short opaque ids
/// handed to the device. Both directions change together and are flushed
/// to the device state store whenever an id is minted.
pub struct IdentityMap {
    store: Box<dyn DeviceStateStore>,
    state: DeviceState,
    dirty: bool,
}

impl IdentityMap {
    pub fn load(store: Box<dyn DeviceStateStore>) -> Result<Self> {
        let state = store.load()?;
        debug!(folders = state.folder_to_native.len(), "identity map loaded");
        Ok(IdentityMap {
            store,
            state,
            dirty: false,
        })
    }

    /// Id for a native path, minting and persisting one if the path is new.
    pub fn forward(&mut self, native: &str) -> FolderId {
        if let Some(id) = self.lookup(native) {
            return id;
        }
        let id = loop {
            let candidate = mint_id();
            if !self.state.folder_to_native.contains_key(&candidate) {
                break candidate;
            }
        };
        self.state
            .folder_to_native
            .insert(id.clone(), native.to_string());
        self.state
            .native_to_folder
            .insert(native.to_string(), id.clone());
        debug!(native, id = %id, "minted folder id");
        self.dirty = true;
        self.flush_logged();
        FolderId::new(id)
    }

    /// Id for a native path without minting.
    pub fn lookup(&self, native: &str) -> Option<FolderId> {
        self.state.native_to_folder.get(native).map(FolderId::new)
    }

    pub fn reverse(&self, id: &FolderId) -> Result<String> {
        self.state
            .folder_to_native
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| GatewayError::FolderHierarchyChanged(format!("unknown folder id {id}")))
    }

    pub fn sent_folder(&self) -> Option<&FolderId> {
        self.state.sent_folder.as_ref()
    }

    pub fn trash_folder(&self) -> Option<&FolderId> {
        self.state.trash_folder.as_ref()
    }

    pub fn remember_sent(&mut self, id: &FolderId) {
        if self.state.sent_folder.as_ref() != Some(id) {
            self.state.sent_folder = Some(id.clone());
            self.dirty = true;
        }
    }

    pub fn remember_trash(&mut self, id: &FolderId) {
        if self.state.trash_folder.as_ref() != Some(id) {
            self.state.trash_folder = Some(id.clone());
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.store.save(&self.state)?;
        self.dirty = false;
        Ok(())
    }

    fn flush_logged(&mut self) {
        if let Err(err) = self.flush() {
            warn!(%err, "device state not saved, retrying at logoff");
        }
    }
}

fn mint_id() -> String {
    let mut rng = OsRng;
    let high = rng.next_u32() & 0xffff;
    let low = rng.next_u32() & 0xffff;
    format!("{high:04x}{low:04x}")
}
