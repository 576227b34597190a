use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    AttachmentData, AttachmentRef, BodyRequest, FolderId, FolderIdentity, FolderStat,
    ItemFingerprint, Result, SearchResults, StructuredContactItem, StructuredMailItem,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "item", rename_all = "lowercase")]
pub enum SyncItem {
    Mail(StructuredMailItem),
    Contact(StructuredContactItem),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub folder_id: FolderId,
    pub item_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    New,
    Reply,
    Forward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub mime: Vec<u8>,
    pub mode: SendMode,
    pub source: Option<ItemRef>,
    pub save_in_sent: bool,
}

impl SendRequest {
    pub fn new_message(mime: Vec<u8>) -> Self {
        SendRequest {
            mime,
            mode: SendMode::New,
            source: None,
            save_in_sent: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxQuery {
    pub free_text: String,
    pub folder_id: Option<FolderId>,
    pub deep_traversal: bool,
    pub since: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailHit {
    pub folder_id: FolderId,
    pub item_id: String,
    pub long_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub email_address: String,
    pub display_name: String,
    pub phone: String,
    pub office: String,
    pub title: String,
    pub company: String,
    pub alias: String,
    pub first_name: String,
    pub last_name: String,
    pub home_phone: String,
    pub mobile_phone: String,
}

/// What the sync engine calls on a store adapter. One instance serves one
/// device session and is driven strictly sequentially.
///
/// The provided methods are the negative answers an adapter gives for
/// operations its store does not support.
pub trait SyncBackend {
    fn list_folders(&mut self) -> Result<Vec<FolderIdentity>>;

    fn get_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderIdentity>>;

    fn stat_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderStat>>;

    fn change_folder(
        &mut self,
        parent_id: &FolderId,
        old_id: Option<&FolderId>,
        display_name: &str,
    ) -> Result<Option<FolderStat>> {
        debug!(parent = %parent_id, old = ?old_id, display_name, "change_folder unsupported");
        Ok(None)
    }

    fn delete_folder(&mut self, folder_id: &FolderId) -> Result<bool> {
        debug!(folder = %folder_id, "delete_folder unsupported");
        Ok(false)
    }

    /// `cutoff` is a unix timestamp; zero means no lower bound.
    fn list_items(&mut self, folder_id: &FolderId, cutoff: i64) -> Result<Vec<ItemFingerprint>>;

    fn stat_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<Option<ItemFingerprint>>;

    fn get_item(
        &mut self,
        folder_id: &FolderId,
        item_id: &str,
        request: &BodyRequest,
    ) -> Result<Option<SyncItem>>;

    /// `item_id == None` creates a new item.
    fn change_item(
        &mut self,
        folder_id: &FolderId,
        item_id: Option<&str>,
        item: &SyncItem,
    ) -> Result<Option<ItemFingerprint>>;

    fn delete_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<bool>;

    fn move_item(
        &mut self,
        folder_id: &FolderId,
        item_id: &str,
        new_folder_id: &FolderId,
    ) -> Result<Option<String>> {
        debug!(folder = %folder_id, item_id, target = %new_folder_id, "move_item unsupported");
        Ok(None)
    }

    fn set_read_flag(&mut self, _folder_id: &FolderId, _item_id: &str, _read: bool) -> Result<bool> {
        Ok(false)
    }

    fn set_star_flag(&mut self, _folder_id: &FolderId, _item_id: &str, _star: bool) -> Result<bool> {
        Ok(false)
    }

    fn get_attachment(&mut self, reference: &AttachmentRef) -> Result<Option<AttachmentData>> {
        debug!(reference = %reference, "get_attachment unsupported");
        Ok(None)
    }

    fn send_mail(&mut self, _request: &SendRequest) -> Result<bool> {
        Ok(false)
    }

    fn register_sink(&mut self, _folder_id: &FolderId) -> bool {
        false
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Vec<FolderId>> {
        Ok(Vec::new())
    }

    fn search_directory(
        &mut self,
        _query: &str,
        _range: Option<&str>,
    ) -> Result<SearchResults<DirectoryRecord>> {
        Ok(SearchResults::empty())
    }

    fn search_mailbox(&mut self, _query: &MailboxQuery) -> Result<SearchResults<MailHit>> {
        Ok(SearchResults::empty())
    }

    /// Flushes device state at the end of a session.
    fn logoff(&mut self) -> Result<()> {
        Ok(())
    }
}
