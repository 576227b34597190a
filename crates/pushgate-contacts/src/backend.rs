use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use tracing::{debug, info, warn};

use pushgate_content::{VCard, card_to_contact, contact_to_card};
use pushgate_core::{
    BodyRequest, DIRECTORY_DEFAULT_RANGE_END, DirectoryRecord, FolderId, FolderIdentity, FolderStat,
    FolderType, GatewayError, IdentityMap, ItemFingerprint, ItemFlags, Result, SearchRange,
    SearchResults, SyncBackend, SyncItem, negative,
};

use crate::client::{CardRecord, CardStoreClient};
use crate::config::ContactOptions;
use crate::gal::{MIN_QUERY_CHARS, directory_record};

/// Id for a new card: UTC timestamp followed by random hex groups, in the
/// shape `20120427T111858Z-6F53-4F561080-F-7B4FC200`.
pub fn new_card_id(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 11];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        now.format("%Y%m%dT%H%M%SZ"),
        &hex[0..4],
        &hex[4..12],
        &hex[12..13],
        &hex[14..22]
    )
}

/// Contact adapter exposing one address book as a single folder.
pub struct ContactBackend<S: CardStoreClient> {
    store: S,
    identity: IdentityMap,
    options: ContactOptions,
    /// Cards seen during this session, keyed by id.
    cache: HashMap<String, CardRecord>,
}

impl<S: CardStoreClient> ContactBackend<S> {
    pub fn connect(mut store: S, identity: IdentityMap, options: ContactOptions) -> Result<Self> {
        if !store.check_connection()? {
            return Err(GatewayError::ConnectionFailure(format!(
                "card store refused {}",
                options.username
            )));
        }
        info!(user = %options.username, book = %options.address_book, "card store connected");
        Ok(ContactBackend {
            store,
            identity,
            options,
            cache: HashMap::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn folder_id(&mut self) -> FolderId {
        self.identity.forward(&self.options.address_book)
    }

    fn folder_identity(&mut self) -> FolderIdentity {
        FolderIdentity {
            id: self.folder_id(),
            native_path: self.options.address_book.clone(),
            parent: FolderId::root(),
            display_name: self.options.display_name(),
            folder_type: FolderType::Contacts,
        }
    }

    fn book(&self, folder_id: &FolderId) -> Result<String> {
        let native = self.identity.reverse(folder_id)?;
        if native != self.options.address_book {
            return Err(GatewayError::NotFound(format!("address book {native}")));
        }
        Ok(native)
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.options.read_only {
            return Err(GatewayError::ReadOnlyDenied(format!("{operation} on read-only address book")));
        }
        Ok(())
    }

    fn card(&mut self, book: &str, id: &str, with_data: bool) -> Result<Option<CardRecord>> {
        if let Some(cached) = self.cache.get(id) {
            if !with_data || cached.data.is_some() {
                return Ok(Some(cached.clone()));
            }
        }
        let Some(record) = self.store.fetch_card(book, id)? else {
            debug!(book, id, "card not found");
            return Ok(None);
        };
        self.cache.insert(id.to_string(), record.clone());
        Ok(Some(record))
    }
}

fn fingerprint(record: &CardRecord) -> ItemFingerprint {
    ItemFingerprint {
        id: record.id.clone(),
        mod_token: record.etag.clone(),
        flags: ItemFlags {
            read: true,
            starred: false,
        },
    }
}

impl<S: CardStoreClient> SyncBackend for ContactBackend<S> {
    fn list_folders(&mut self) -> Result<Vec<FolderIdentity>> {
        let folder = self.folder_identity();
        if let Err(err) = self.identity.flush() {
            warn!(%err, "device state not saved");
        }
        Ok(vec![folder])
    }

    fn get_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderIdentity>> {
        if self.identity.reverse(folder_id)? != self.options.address_book {
            return Ok(None);
        }
        Ok(Some(self.folder_identity()))
    }

    fn stat_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderStat>> {
        Ok(self.get_folder(folder_id)?.map(|folder| FolderStat {
            id: folder.id,
            parent: folder.parent,
            mod_token: folder.display_name,
        }))
    }

    fn list_items(&mut self, folder_id: &FolderId, _cutoff: i64) -> Result<Vec<ItemFingerprint>> {
        let book = self.book(folder_id)?;
        let records = match self.store.list_cards(&book) {
            Ok(records) => records,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(book = %book, %err, "card listing failed, treating book as empty");
                return Ok(Vec::new());
            }
        };
        let items: Vec<ItemFingerprint> = records.iter().map(fingerprint).collect();
        for record in records {
            let fresh = self
                .cache
                .get(&record.id)
                .is_none_or(|cached| cached.etag != record.etag);
            if fresh {
                self.cache.insert(record.id.clone(), record);
            }
        }
        debug!(book = %book, count = items.len(), "cards listed");
        Ok(items)
    }

    fn stat_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<Option<ItemFingerprint>> {
        let book = self.book(folder_id)?;
        Ok(self.card(&book, item_id, false)?.as_ref().map(fingerprint))
    }

    fn get_item(
        &mut self,
        folder_id: &FolderId,
        item_id: &str,
        request: &BodyRequest,
    ) -> Result<Option<SyncItem>> {
        let book = self.book(folder_id)?;
        let Some(data) = self.card(&book, item_id, true)?.and_then(|c| c.data) else {
            return Ok(None);
        };
        match card_to_contact(&data, request) {
            Ok(contact) => Ok(Some(SyncItem::Contact(contact))),
            Err(err @ GatewayError::MalformedContent(_)) => {
                warn!(book = %book, id = item_id, %err, "unparsable card skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn change_item(
        &mut self,
        folder_id: &FolderId,
        item_id: Option<&str>,
        item: &SyncItem,
    ) -> Result<Option<ItemFingerprint>> {
        self.ensure_writable("change_item")?;
        let SyncItem::Contact(contact) = item else {
            debug!(folder = %folder_id, "non-contact change ignored");
            return Ok(None);
        };
        let book = self.book(folder_id)?;
        let written = match item_id {
            Some(id) => self
                .store
                .update_card(&book, id, &contact_to_card(contact, id))
                .map(|()| id.to_string()),
            None => {
                let id = new_card_id(Utc::now());
                self.store
                    .create_card(&book, &id, &contact_to_card(contact, &id))
                    .inspect(|assigned| info!(book = %book, id = %assigned, "card created"))
            }
        };
        let Some(id) = negative(written.map(Some), None, "change_item")? else {
            return Ok(None);
        };
        self.cache.remove(&id);
        self.stat_item(folder_id, &id)
    }

    fn delete_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<bool> {
        self.ensure_writable("delete_item")?;
        let book = self.book(folder_id)?;
        self.cache.remove(item_id);
        negative(self.store.delete_card(&book, item_id), false, "delete_item")
    }

    fn search_directory(
        &mut self,
        query: &str,
        range: Option<&str>,
    ) -> Result<SearchResults<DirectoryRecord>> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            debug!(query, "directory query too short");
            return Ok(SearchResults::empty());
        }
        let book = self.options.address_book.clone();
        let found = match self
            .store
            .search_cards(&book, query, self.options.gal_search_limit)
        {
            Ok(found) => found,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(query, %err, "directory search failed");
                return Ok(SearchResults::empty());
            }
        };
        let records: Vec<DirectoryRecord> = found
            .iter()
            .filter_map(|record| {
                let data = record.data.as_deref()?;
                match VCard::parse(data) {
                    Ok(card) => Some(directory_record(&card)),
                    Err(err) => {
                        warn!(id = %record.id, %err, "unparsable card left out of results");
                        None
                    }
                }
            })
            .collect();
        let results = SearchResults::windowed(
            records,
            SearchRange::parse(range, DIRECTORY_DEFAULT_RANGE_END),
        );
        info!(query, total = results.total, returned = results.items.len(), "directory searched");
        Ok(results)
    }

    fn logoff(&mut self) -> Result<()> {
        self.cache.clear();
        self.identity.flush()
    }
}
