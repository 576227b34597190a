use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactOptions {
    /// Native path of the single address book exposed to the device.
    pub address_book: String,
    /// Shown in the folder name as `<username> AddressBook`.
    pub username: String,
    pub read_only: bool,
    pub gal_search_limit: Option<usize>,
}

impl Default for ContactOptions {
    fn default() -> Self {
        ContactOptions {
            address_book: "contacts".to_string(),
            username: String::new(),
            read_only: false,
            gal_search_limit: None,
        }
    }
}

impl ContactOptions {
    pub fn display_name(&self) -> String {
        format!("{} AddressBook", self.username)
    }
}
