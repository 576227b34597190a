use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod backend;
mod error;
mod identity;
mod search;
mod state;
mod text;

pub use backend::{
    DirectoryRecord, ItemRef, MailHit, MailboxQuery, SendMode, SendRequest, SyncBackend, SyncItem,
};
pub use error::{GatewayError, Result, negative};
pub use identity::IdentityMap;
pub use search::{DIRECTORY_DEFAULT_RANGE_END, SearchRange, SearchResults};
pub use state::{DeviceState, DeviceStateStore, JsonFileStateStore, MemoryStateStore};
pub use text::{normalize_crlf, truncate_body, truncate_utf8};

/// Opaque folder id handed to the sync engine. The root of the hierarchy is `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub const ROOT: &'static str = "0";

    pub fn new(id: impl Into<String>) -> Self {
        FolderId(id.into())
    }

    pub fn root() -> Self {
        FolderId(Self::ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FolderId {
    fn from(value: &str) -> Self {
        FolderId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderType {
    Inbox,
    Drafts,
    WasteBasket,
    SentMail,
    UserMail,
    Contacts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderIdentity {
    pub id: FolderId,
    pub native_path: String,
    pub parent: FolderId,
    pub display_name: String,
    pub folder_type: FolderType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStat {
    pub id: FolderId,
    pub parent: FolderId,
    pub mod_token: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
    pub read: bool,
    pub starred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFingerprint {
    pub id: String,
    pub mod_token: String,
    pub flags: ItemFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyPreference {
    Plain,
    Html,
    Rtf,
    Mime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRequest {
    pub accepted: Vec<BodyPreference>,
    pub truncation_size: Option<usize>,
    pub preview_size: Option<usize>,
}

impl BodyRequest {
    pub fn plain() -> Self {
        BodyRequest::default()
    }

    pub fn accepting(kind: BodyPreference) -> Self {
        BodyRequest {
            accepted: vec![kind],
            ..BodyRequest::default()
        }
    }

    /// RTF wins over HTML, HTML over MIME; plain text is the fallback.
    pub fn best_match(&self) -> BodyPreference {
        for kind in [BodyPreference::Rtf, BodyPreference::Html, BodyPreference::Mime] {
            if self.accepted.contains(&kind) {
                return kind;
            }
        }
        BodyPreference::Plain
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBody {
    pub format: BodyPreference,
    /// Text body. Empty for [`BodyPreference::Mime`], whose document is in `raw`.
    pub data: String,
    /// The stored document byte for byte, set only for MIME bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
    pub truncated: bool,
    pub estimated_size: usize,
    pub preview: Option<String>,
}

/// Engine-visible handle for one attachment, rendered as `folder:item:part`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub folder_id: FolderId,
    pub item_id: String,
    pub part_index: usize,
}

impl fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.folder_id, self.item_id, self.part_index)
    }
}

impl FromStr for AttachmentRef {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(folder), Some(item), Some(part)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GatewayError::NotFound(format!("attachment reference {s}")));
        };
        if folder.is_empty() || item.is_empty() {
            return Err(GatewayError::NotFound(format!("attachment reference {s}")));
        }
        let part_index = part
            .parse::<usize>()
            .map_err(|_| GatewayError::NotFound(format!("attachment reference {s}")))?;
        Ok(AttachmentRef {
            folder_id: FolderId::new(folder),
            item_id: item.to_string(),
            part_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAttachment {
    pub display_name: String,
    pub reference: AttachmentRef,
    pub mime_type: String,
    pub size: usize,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentData {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    pub fn level(self) -> u8 {
        match self {
            Importance::Low => 0,
            Importance::Normal => 1,
            Importance::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagStatus {
    Clear,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFlag {
    pub status: FlagStatus,
    pub flag_type: Option<String>,
}

impl MailFlag {
    pub fn follow_up() -> Self {
        MailFlag {
            status: FlagStatus::Active,
            flag_type: Some("FollowUp".to_string()),
        }
    }

    pub fn clear() -> Self {
        MailFlag {
            status: FlagStatus::Clear,
            flag_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMailItem {
    pub subject: String,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub reply_to: Vec<String>,
    pub display_to: Option<String>,
    pub date_received: Option<i64>,
    pub thread_topic: Option<String>,
    pub message_class: String,
    pub importance: Importance,
    pub read: bool,
    pub flag: Option<MailFlag>,
    pub body: MailBody,
    pub attachments: Vec<MailAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactBody {
    pub data: String,
    pub truncated: bool,
    pub estimated_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredContactItem {
    pub file_as: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nickname: Option<String>,
    pub home_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub business_phone: Option<String>,
    pub business_fax: Option<String>,
    pub pager: Option<String>,
    pub email1: Option<String>,
    pub email2: Option<String>,
    pub email3: Option<String>,
    pub webpage: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub department: Option<String>,
    pub business_street: Option<String>,
    pub business_city: Option<String>,
    pub business_state: Option<String>,
    pub business_postal_code: Option<String>,
    pub business_country: Option<String>,
    pub home_street: Option<String>,
    pub home_city: Option<String>,
    pub home_state: Option<String>,
    pub home_postal_code: Option<String>,
    pub home_country: Option<String>,
    pub im_address: Option<String>,
    pub birthday: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<Vec<u8>>,
    pub categories: Vec<String>,
    pub body: Option<ContactBody>,
}

/// Plain string fields of a contact that participate in the card mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    FileAs,
    FirstName,
    LastName,
    HomePhone,
    MobilePhone,
    BusinessPhone,
    BusinessFax,
    Pager,
    Email1,
    Email2,
    Email3,
    WebPage,
    JobTitle,
    CompanyName,
    Department,
    BusinessStreet,
    BusinessCity,
    BusinessState,
    BusinessPostalCode,
    BusinessCountry,
    HomeStreet,
    HomeCity,
    HomeState,
    HomePostalCode,
    HomeCountry,
    ImAddress,
}

impl StructuredContactItem {
    fn slot_mut(&mut self, field: ContactField) -> &mut Option<String> {
        match field {
            ContactField::FileAs => &mut self.file_as,
            ContactField::FirstName => &mut self.first_name,
            ContactField::LastName => &mut self.last_name,
            ContactField::HomePhone => &mut self.home_phone,
            ContactField::MobilePhone => &mut self.mobile_phone,
            ContactField::BusinessPhone => &mut self.business_phone,
            ContactField::BusinessFax => &mut self.business_fax,
            ContactField::Pager => &mut self.pager,
            ContactField::Email1 => &mut self.email1,
            ContactField::Email2 => &mut self.email2,
            ContactField::Email3 => &mut self.email3,
            ContactField::WebPage => &mut self.webpage,
            ContactField::JobTitle => &mut self.job_title,
            ContactField::CompanyName => &mut self.company_name,
            ContactField::Department => &mut self.department,
            ContactField::BusinessStreet => &mut self.business_street,
            ContactField::BusinessCity => &mut self.business_city,
            ContactField::BusinessState => &mut self.business_state,
            ContactField::BusinessPostalCode => &mut self.business_postal_code,
            ContactField::BusinessCountry => &mut self.business_country,
            ContactField::HomeStreet => &mut self.home_street,
            ContactField::HomeCity => &mut self.home_city,
            ContactField::HomeState => &mut self.home_state,
            ContactField::HomePostalCode => &mut self.home_postal_code,
            ContactField::HomeCountry => &mut self.home_country,
            ContactField::ImAddress => &mut self.im_address,
        }
    }

    pub fn field(&self, field: ContactField) -> Option<&str> {
        let value = match field {
            ContactField::FileAs => &self.file_as,
            ContactField::FirstName => &self.first_name,
            ContactField::LastName => &self.last_name,
            ContactField::HomePhone => &self.home_phone,
            ContactField::MobilePhone => &self.mobile_phone,
            ContactField::BusinessPhone => &self.business_phone,
            ContactField::BusinessFax => &self.business_fax,
            ContactField::Pager => &self.pager,
            ContactField::Email1 => &self.email1,
            ContactField::Email2 => &self.email2,
            ContactField::Email3 => &self.email3,
            ContactField::WebPage => &self.webpage,
            ContactField::JobTitle => &self.job_title,
            ContactField::CompanyName => &self.company_name,
            ContactField::Department => &self.department,
            ContactField::BusinessStreet => &self.business_street,
            ContactField::BusinessCity => &self.business_city,
            ContactField::BusinessState => &self.business_state,
            ContactField::BusinessPostalCode => &self.business_postal_code,
            ContactField::BusinessCountry => &self.business_country,
            ContactField::HomeStreet => &self.home_street,
            ContactField::HomeCity => &self.home_city,
            ContactField::HomeState => &self.home_state,
            ContactField::HomePostalCode => &self.home_postal_code,
            ContactField::HomeCountry => &self.home_country,
            ContactField::ImAddress => &self.im_address,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Empty values clear the field.
    pub fn set_field(&mut self, field: ContactField, value: impl Into<String>) {
        let value = value.into();
        *self.slot_mut(field) = if value.is_empty() { None } else { Some(value) };
    }

    pub fn is_field_set(&self, field: ContactField) -> bool {
        self.field(field).is_some()
    }
}
