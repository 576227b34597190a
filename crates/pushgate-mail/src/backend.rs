use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pushgate_content::{
    ComposeOptions, ItemContext, OriginalContext, attachment_data, compose_outgoing,
    parse_mail_date, to_structured_mail,
};
use pushgate_core::{
    AttachmentData, AttachmentRef, BodyRequest, FlagStatus, FolderId, FolderIdentity, FolderStat,
    FolderType, GatewayError, IdentityMap, ItemFingerprint, ItemFlags, MailHit, MailboxQuery,
    Result, SearchResults, SendMode, SendRequest, SyncBackend, SyncItem, negative,
};

use crate::client::{MailStoreClient, NativeFlag, NativeFolder, Overview};
use crate::config::MailOptions;
use crate::hierarchy::{self, DEFAULT_DELIMITER};
use crate::mutf7;
use crate::search::{self, imap_date};
use crate::sink::ChangeSink;
use crate::submit::MailSubmitter;

const SENT_FALLBACKS: [&str; 3] = ["INBOX.Sent", "Sent", "Sent Items"];

/// Mail adapter for one device session.
pub struct MailBackend<C: MailStoreClient> {
    client: C,
    submitter: Option<Box<dyn MailSubmitter>>,
    identity: IdentityMap,
    options: MailOptions,
    sink: ChangeSink,
    folders: Option<Vec<NativeFolder>>,
}

impl<C: MailStoreClient> MailBackend<C> {
    pub fn new(client: C, identity: IdentityMap, options: MailOptions) -> Self {
        MailBackend {
            client,
            submitter: None,
            identity,
            options,
            sink: ChangeSink::new(Duration::from_secs(5)),
            folders: None,
        }
    }

    pub fn with_submitter(mut self, submitter: Box<dyn MailSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.sink = ChangeSink::new(interval);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// The waste basket's id: the remembered one, else a native `Trash`.
    pub fn waste_basket(&mut self) -> Result<Option<FolderId>> {
        if let Some(id) = self.identity.trash_folder() {
            return Ok(Some(id.clone()));
        }
        let found = self
            .native_folders(false)?
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("trash"))
            .map(|f| f.name.clone());
        let Some(native) = found else {
            return Ok(None);
        };
        let id = self.identity.forward(&native);
        self.identity.remember_trash(&id);
        self.flush_identity();
        Ok(Some(id))
    }

    fn native_folders(&mut self, refresh: bool) -> Result<&[NativeFolder]> {
        if refresh || self.folders.is_none() {
            let listed = self.client.list_folders()?;
            debug!(count = listed.len(), "native folders listed");
            self.folders = Some(listed);
        }
        Ok(self.folders.as_deref().unwrap_or_default())
    }

    fn delimiter(&mut self) -> Result<String> {
        Ok(self
            .native_folders(false)?
            .iter()
            .find_map(|f| f.delimiter.clone())
            .unwrap_or_else(|| DEFAULT_DELIMITER.to_string()))
    }

    fn identify(&mut self, native: &str) -> Result<FolderIdentity> {
        let delimiter = self.delimiter()?;
        let known: HashSet<String> = self
            .native_folders(false)?
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let placement = hierarchy::place(
            native,
            &delimiter,
            self.options.sent_folder.as_deref(),
            |path| known.contains(path),
        );
        let id = self.identity.forward(native);
        match placement.folder_type {
            FolderType::SentMail => self.identity.remember_sent(&id),
            FolderType::WasteBasket => self.identity.remember_trash(&id),
            _ => {}
        }
        let parent = match placement.parent.as_deref() {
            Some(parent) => self.identity.forward(parent),
            None => FolderId::root(),
        };
        Ok(FolderIdentity {
            id,
            native_path: native.to_string(),
            parent,
            display_name: placement.display_name,
            folder_type: placement.folder_type,
        })
    }

    fn flush_identity(&mut self) {
        if let Err(err) = self.identity.flush() {
            warn!(%err, "device state not saved");
        }
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.options.read_only {
            return Err(GatewayError::ReadOnlyDenied(format!("{operation} on read-only mail store")));
        }
        Ok(())
    }

    fn overview(&mut self, native: &str, uid: u32) -> Result<Option<Overview>> {
        let found = self.client.overviews(native, Some(&[uid]))?;
        Ok(found.into_iter().find(|o| o.uid == uid))
    }

    fn save_sent_copy(&mut self, copy: &[u8]) {
        let candidates: Vec<String> = match self.identity.sent_folder().cloned() {
            Some(id) => self.identity.reverse(&id).into_iter().collect(),
            None => match &self.options.sent_folder {
                Some(name) => vec![name.clone()],
                None => SENT_FALLBACKS.iter().map(|s| s.to_string()).collect(),
            },
        };
        for folder in &candidates {
            match self.client.append(folder, copy, true) {
                Ok(()) => {
                    debug!(folder = %folder, "sent copy saved");
                    return;
                }
                Err(err) => debug!(folder = %folder, %err, "sent folder refused copy"),
            }
        }
        warn!(tried = ?candidates, "could not save sent copy");
    }

    fn original_for(&mut self, request: &SendRequest) -> Result<Option<Vec<u8>>> {
        if request.mode == SendMode::New {
            return Ok(None);
        }
        let Some(source) = &request.source else {
            debug!(mode = ?request.mode, "no source item, sending as new");
            return Ok(None);
        };
        let missing = || GatewayError::NotFound(format!("source item {}:{}", source.folder_id, source.item_id));
        let native = self.identity.reverse(&source.folder_id)?;
        let uid = parse_uid(&source.item_id).ok_or_else(missing)?;
        self.client.fetch_raw(&native, uid)?.map(Some).ok_or_else(missing)
    }
}

fn parse_uid(item_id: &str) -> Option<u32> {
    item_id.trim().parse().ok()
}

fn fingerprint(overview: &Overview) -> ItemFingerprint {
    ItemFingerprint {
        id: overview.uid.to_string(),
        mod_token: overview.date.clone().unwrap_or_default(),
        flags: ItemFlags {
            read: overview.seen,
            starred: overview.flagged,
        },
    }
}

impl<C: MailStoreClient> SyncBackend for MailBackend<C> {
    fn list_folders(&mut self) -> Result<Vec<FolderIdentity>> {
        let natives: Vec<String> = self
            .native_folders(true)?
            .iter()
            .filter(|f| f.selectable)
            .map(|f| f.name.clone())
            .collect();
        let mut out = Vec::with_capacity(natives.len());
        for native in natives.iter().rev() {
            if hierarchy::is_excluded(native, &self.options.excluded_folders) {
                debug!(folder = %native, "folder excluded");
                continue;
            }
            out.push(self.identify(native)?);
        }
        self.flush_identity();
        info!(count = out.len(), "folders listed");
        Ok(out)
    }

    fn get_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderIdentity>> {
        let native = self.identity.reverse(folder_id)?;
        if !self.native_folders(false)?.iter().any(|f| f.name == native) {
            debug!(folder = %folder_id, native = %native, "folder gone from store");
            return Ok(None);
        }
        let identity = self.identify(&native)?;
        self.flush_identity();
        Ok(Some(identity))
    }

    fn stat_folder(&mut self, folder_id: &FolderId) -> Result<Option<FolderStat>> {
        Ok(self.get_folder(folder_id)?.map(|folder| FolderStat {
            id: folder.id,
            parent: folder.parent,
            mod_token: folder.display_name,
        }))
    }

    fn change_folder(
        &mut self,
        parent_id: &FolderId,
        old_id: Option<&FolderId>,
        display_name: &str,
    ) -> Result<Option<FolderStat>> {
        self.ensure_writable("change_folder")?;
        if let Some(old) = old_id {
            debug!(folder = %old, display_name, "folder rename unsupported");
            return Ok(None);
        }
        let encoded = mutf7::encode(display_name);
        let native = if parent_id.is_root() {
            encoded
        } else {
            let parent = self.identity.reverse(parent_id)?;
            format!("{parent}{}{encoded}", self.delimiter()?)
        };
        if !negative(self.client.create_folder(&native).map(|_| true), false, "create_folder")? {
            return Ok(None);
        }
        info!(folder = %native, "folder created");
        self.folders = None;
        let id = self.identity.forward(&native);
        self.stat_folder(&id)
    }

    fn list_items(&mut self, folder_id: &FolderId, cutoff: i64) -> Result<Vec<ItemFingerprint>> {
        let native = self.identity.reverse(folder_id)?;
        self.client.select(&native, true)?;

        let mut wanted = None;
        if cutoff > 0 {
            if let Some(since) = DateTime::from_timestamp(cutoff, 0) {
                let criteria = format!("SINCE {}", imap_date(since.date_naive()));
                match self.client.search(&native, &criteria) {
                    Ok(uids) if uids.is_empty() => return Ok(Vec::new()),
                    Ok(uids) => wanted = Some(uids),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => warn!(folder = %native, %err, "date search failed, listing all"),
                }
            }
        }

        let overviews = match self.client.overviews(&native, wanted.as_deref()) {
            Ok(overviews) => overviews,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(folder = %native, %err, "overview failed, treating folder as empty");
                return Ok(Vec::new());
            }
        };
        let items: Vec<ItemFingerprint> = overviews
            .iter()
            .filter(|o| !o.deleted)
            .filter(|o| {
                cutoff <= 0
                    || o.date
                        .as_deref()
                        .and_then(parse_mail_date)
                        .is_none_or(|ts| ts >= cutoff)
            })
            .map(fingerprint)
            .collect();
        debug!(folder = %native, count = items.len(), "items listed");
        Ok(items)
    }

    fn stat_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<Option<ItemFingerprint>> {
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(None);
        };
        Ok(self.overview(&native, uid)?.as_ref().map(fingerprint))
    }

    fn get_item(
        &mut self,
        folder_id: &FolderId,
        item_id: &str,
        request: &BodyRequest,
    ) -> Result<Option<SyncItem>> {
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(None);
        };
        let Some(overview) = self.overview(&native, uid)? else {
            debug!(folder = %native, uid, "item not found");
            return Ok(None);
        };
        let Some(raw) = self.client.fetch_raw(&native, uid)? else {
            return Ok(None);
        };
        let ctx = ItemContext {
            folder_id,
            item_id,
            read: overview.seen,
            starred: overview.flagged,
        };
        match to_structured_mail(&raw, &ctx, request) {
            Ok(mail) => Ok(Some(SyncItem::Mail(mail))),
            Err(err @ GatewayError::MalformedContent(_)) => {
                warn!(folder = %native, uid, %err, "unparsable message skipped");
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
        let Some(item_id) = item_id else {
            debug!(folder = %folder_id, "creating mail items is unsupported");
            return Ok(None);
        };
        let SyncItem::Mail(mail) = item else {
            debug!(folder = %folder_id, item_id, "non-mail change ignored");
            return Ok(None);
        };
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(None);
        };
        if let Some(flag) = &mail.flag {
            let on = flag.status == FlagStatus::Active;
            let applied = self.client.set_flags(&native, uid, &[NativeFlag::Flagged], on);
            if !negative(applied.map(|_| true), false, "change_item")? {
                return Ok(None);
            }
        }
        self.stat_item(folder_id, item_id)
    }

    fn delete_item(&mut self, folder_id: &FolderId, item_id: &str) -> Result<bool> {
        self.ensure_writable("delete_item")?;
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(false);
        };
        let deleted = self
            .client
            .set_flags(&native, uid, &[NativeFlag::Deleted], true)
            .and_then(|_| self.client.expunge(&native));
        negative(deleted.map(|_| true), false, "delete_item")
    }

    fn move_item(
        &mut self,
        folder_id: &FolderId,
        item_id: &str,
        new_folder_id: &FolderId,
    ) -> Result<Option<String>> {
        if self.options.read_only {
            debug!(folder = %folder_id, item_id, "move refused on read-only store");
            return Ok(None);
        }
        let source = self.identity.reverse(folder_id)?;
        let target = self.identity.reverse(new_folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(None);
        };
        let Some(overview) = self.overview(&source, uid)? else {
            return Ok(None);
        };
        let guessed = negative(
            self.client.status(&target).map(|s| s.uid_next),
            None,
            "move_item status",
        )?;
        if !negative(
            self.client.move_message(&source, uid, &target).map(|_| true),
            false,
            "move_item",
        )? {
            return Ok(None);
        }
        self.client.select(&target, true)?;
        let new_uid = match guessed {
            Some(uid) => uid,
            None => {
                let all = negative(self.client.search(&target, "ALL"), Vec::new(), "move_item search")?;
                let Some(max) = all.into_iter().max() else {
                    return Ok(None);
                };
                max
            }
        };

        let restore: Vec<NativeFlag> = [
            (overview.seen, NativeFlag::Seen),
            (overview.flagged, NativeFlag::Flagged),
            (overview.answered, NativeFlag::Answered),
        ]
        .into_iter()
        .filter_map(|(set, flag)| set.then_some(flag))
        .collect();
        let reapplied = self
            .client
            .set_flags(
                &target,
                new_uid,
                &[NativeFlag::Seen, NativeFlag::Flagged, NativeFlag::Answered],
                false,
            )
            .and_then(|_| {
                if restore.is_empty() {
                    Ok(())
                } else {
                    self.client.set_flags(&target, new_uid, &restore, true)
                }
            });
        negative(reapplied, (), "move_item flags")?;
        info!(from = %source, to = %target, uid, new_uid, "item moved");
        Ok(Some(new_uid.to_string()))
    }

    fn set_read_flag(&mut self, folder_id: &FolderId, item_id: &str, read: bool) -> Result<bool> {
        if self.options.read_only {
            return Ok(false);
        }
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(false);
        };
        let applied = self.client.set_flags(&native, uid, &[NativeFlag::Seen], read);
        negative(applied.map(|_| true), false, "set_read_flag")
    }

    fn set_star_flag(&mut self, folder_id: &FolderId, item_id: &str, star: bool) -> Result<bool> {
        if self.options.read_only {
            return Ok(false);
        }
        let native = self.identity.reverse(folder_id)?;
        let Some(uid) = parse_uid(item_id) else {
            return Ok(false);
        };
        let applied = self.client.set_flags(&native, uid, &[NativeFlag::Flagged], star);
        negative(applied.map(|_| true), false, "set_star_flag")
    }

    fn get_attachment(&mut self, reference: &AttachmentRef) -> Result<Option<AttachmentData>> {
        let native = self.identity.reverse(&reference.folder_id)?;
        let Some(uid) = parse_uid(&reference.item_id) else {
            return Err(GatewayError::NotFound(format!("attachment reference {reference}")));
        };
        let Some(raw) = self.client.fetch_raw(&native, uid)? else {
            return Ok(None);
        };
        attachment_data(&raw, reference.part_index)
    }

    fn send_mail(&mut self, request: &SendRequest) -> Result<bool> {
        let original = self.original_for(request)?;
        let context = original.as_deref().map(|raw| match request.mode {
            SendMode::Forward => OriginalContext::Forward(raw),
            _ => OriginalContext::Reply(raw),
        });
        let options = ComposeOptions {
            default_from: self.options.default_from.clone(),
            inline_forward: self.options.inline_forward,
        };
        let outgoing = compose_outgoing(&request.mime, context, &options)?;
        let Some(submitter) = self.submitter.as_mut() else {
            warn!("no outgoing relay configured");
            return Ok(false);
        };
        submitter.submit(
            outgoing.envelope_from.as_deref(),
            &outgoing.recipients,
            &outgoing.message,
        )?;
        info!(recipients = outgoing.recipients.len(), mode = ?request.mode, "mail submitted");
        if request.save_in_sent {
            self.save_sent_copy(&outgoing.sent_copy);
        }
        Ok(true)
    }

    fn register_sink(&mut self, folder_id: &FolderId) -> bool {
        match self.identity.reverse(folder_id) {
            Ok(native) => {
                self.sink.register(folder_id.clone(), native);
                true
            }
            Err(err) => {
                debug!(folder = %folder_id, %err, "sink registration refused");
                false
            }
        }
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<FolderId>> {
        self.sink.poll(&mut self.client, timeout)
    }

    fn search_mailbox(&mut self, query: &MailboxQuery) -> Result<SearchResults<MailHit>> {
        let results = search::search_mailbox(
            &mut self.client,
            &mut self.identity,
            query,
            self.options.search_window,
            self.options.search_max_results,
            Utc::now().date_naive(),
        )?;
        info!(total = results.total, "mailbox searched");
        Ok(results)
    }

    fn logoff(&mut self) -> Result<()> {
        self.identity.flush()?;
        self.client.logout()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pushgate_core::{
        AttachmentRef, BodyPreference, BodyRequest, FolderId, FolderType, GatewayError,
        IdentityMap, ItemRef, MailFlag, MemoryStateStore, SendMode, SendRequest, SyncBackend,
        SyncItem,
    };

    use super::MailBackend;
    use crate::config::MailOptions;
    use crate::fake::{FakeMailStore, FakeSubmitter};

    const PLAIN: &[u8] = b"From: Ann <ann@example.com>\r\nTo: bob@example.com\r\nSubject: plain\r\nDate: Tue, 5 Mar 2024 09:00:00 +0000\r\n\r\nJust text.\r\n";

    const WITH_FILE: &[u8] = b"From: ann@example.com\r\nTo: bob@example.com\r\nSubject: file\r\nDate: Fri, 1 Mar 2024 09:00:00 +0000\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"b1\"\r\n\r\n--b1\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n--b1\r\nContent-Type: application/pdf; name=\"a.pdf\"\r\nContent-Disposition: attachment; filename=\"a.pdf\"\r\nContent-Transfer-Encoding: base64\r\n\r\nJVBERi0=\r\n--b1--\r\n";

    fn backend(store: FakeMailStore, options: MailOptions) -> anyhow::Result<MailBackend<FakeMailStore>> {
        let identity = IdentityMap::load(Box::new(MemoryStateStore::new()))?;
        Ok(MailBackend::new(store, identity, options).with_poll_interval(Duration::from_millis(1)))
    }

    fn inbox_store() -> FakeMailStore {
        let mut store = FakeMailStore::new();
        store.add_folder("INBOX");
        store
    }

    fn id_of(backend: &MailBackend<FakeMailStore>, native: &str) -> anyhow::Result<FolderId> {
        backend
            .identity()
            .lookup(native)
            .ok_or_else(|| anyhow::anyhow!("no id for {native}"))
    }

    #[test]
    fn folders_are_classified_and_listed_in_reverse() -> anyhow::Result<()> {
        let mut store = inbox_store();
        for name in ["INBOX.Sent", "INBOX.Trash", "INBOX.Junk", "Projects", "Projects.Q1"] {
            store.add_folder(name);
        }
        store.add_container("Shared");
        let options = MailOptions {
            excluded_folders: vec!["junk".to_string()],
            ..MailOptions::default()
        };
        let mut backend = backend(store, options)?;

        let folders = backend.list_folders()?;
        let names: Vec<&str> = folders.iter().map(|f| f.native_path.as_str()).collect();
        assert_eq!(names, vec!["Projects.Q1", "Projects", "INBOX.Trash", "INBOX.Sent", "INBOX"]);

        let inbox = id_of(&backend, "INBOX")?;
        assert!(folders[4].parent.is_root());
        assert_eq!(folders[4].folder_type, FolderType::Inbox);
        assert_eq!(folders[3].folder_type, FolderType::SentMail);
        assert_eq!(folders[3].parent, inbox);
        assert_eq!(folders[0].parent, id_of(&backend, "Projects")?);
        assert_eq!(folders[0].display_name, "Q1");

        assert_eq!(backend.identity().sent_folder(), Some(&folders[3].id));
        assert_eq!(backend.waste_basket()?, Some(folders[2].id.clone()));

        let stat = backend.stat_folder(&folders[0].id)?.ok_or_else(|| anyhow::anyhow!("stat"))?;
        assert_eq!(stat.mod_token, "Q1");
        Ok(())
    }

    #[test]
    fn unknown_folder_id_is_a_hierarchy_change() -> anyhow::Result<()> {
        let mut backend = backend(inbox_store(), MailOptions::default())?;
        let err = backend.list_items(&FolderId::new("deadbeef"), 0);
        assert!(matches!(err, Err(GatewayError::FolderHierarchyChanged(_))));
        Ok(())
    }

    #[test]
    fn listing_skips_deleted_items_and_respects_cutoff() -> anyhow::Result<()> {
        let mut store = inbox_store();
        store.deliver("INBOX", WITH_FILE);
        store.deliver("INBOX", PLAIN);
        let gone = store.deliver("INBOX", PLAIN);
        if let Some(message) = store.message_mut("INBOX", gone) {
            message.deleted = true;
        }
        if let Some(message) = store.message_mut("INBOX", 2) {
            message.seen = true;
            message.flagged = true;
        }
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;

        let items = backend.list_items(&inbox, 0)?;
        assert_eq!(items.len(), 2);
        assert!(items[1].flags.read && items[1].flags.starred);
        assert_eq!(items[1].mod_token, "Tue, 5 Mar 2024 09:00:00 +0000");

        // 2024-03-03T00:00:00Z
        let recent = backend.list_items(&inbox, 1_709_424_000)?;
        let ids: Vec<&str> = recent.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
        Ok(())
    }

    #[test]
    fn failed_overview_reads_as_empty_folder() -> anyhow::Result<()> {
        let mut store = inbox_store();
        store.deliver("INBOX", PLAIN);
        store.fail_overviews = true;
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;
        assert!(backend.list_items(&inbox, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn html_request_without_html_part_falls_back_to_plain() -> anyhow::Result<()> {
        let mut store = inbox_store();
        let uid = store.deliver("INBOX", PLAIN);
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;

        let item = backend.get_item(&inbox, &uid.to_string(), &BodyRequest::accepting(BodyPreference::Html))?;
        let Some(SyncItem::Mail(mail)) = item else {
            anyhow::bail!("expected a mail item");
        };
        assert_eq!(mail.body.format, BodyPreference::Plain);
        assert_eq!(mail.subject, "plain");
        assert!(backend.get_item(&inbox, "99", &BodyRequest::plain())?.is_none());
        Ok(())
    }

    #[test]
    fn attachment_is_fetched_by_reference() -> anyhow::Result<()> {
        let mut store = inbox_store();
        let uid = store.deliver("INBOX", WITH_FILE);
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let reference = AttachmentRef {
            folder_id: id_of(&backend, "INBOX")?,
            item_id: uid.to_string(),
            part_index: 1,
        };
        let data = backend
            .get_attachment(&reference)?
            .ok_or_else(|| anyhow::anyhow!("attachment"))?;
        assert_eq!(data.content_type, "application/pdf");
        assert_eq!(data.data, b"%PDF-");
        Ok(())
    }

    #[test]
    fn flag_change_and_delete_reach_the_store() -> anyhow::Result<()> {
        let mut store = inbox_store();
        let uid = store.deliver("INBOX", PLAIN);
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;
        let id = uid.to_string();

        let Some(SyncItem::Mail(mut mail)) = backend.get_item(&inbox, &id, &BodyRequest::plain())? else {
            anyhow::bail!("expected a mail item");
        };
        mail.flag = Some(MailFlag::follow_up());
        let changed = backend
            .change_item(&inbox, Some(&id), &SyncItem::Mail(mail.clone()))?
            .ok_or_else(|| anyhow::anyhow!("fingerprint"))?;
        assert!(changed.flags.starred);
        assert!(backend.change_item(&inbox, None, &SyncItem::Mail(mail))?.is_none());

        assert!(backend.set_read_flag(&inbox, &id, true)?);
        assert!(backend.client().message("INBOX", uid).is_some_and(|m| m.seen));

        assert!(backend.delete_item(&inbox, &id)?);
        assert!(backend.client().uids("INBOX").is_empty());
        Ok(())
    }

    #[test]
    fn read_only_store_denies_writes() -> anyhow::Result<()> {
        let mut store = inbox_store();
        let uid = store.deliver("INBOX", PLAIN);
        let options = MailOptions {
            read_only: true,
            ..MailOptions::default()
        };
        let mut backend = backend(store, options)?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;

        let err = backend.delete_item(&inbox, &uid.to_string());
        assert!(matches!(err, Err(GatewayError::ReadOnlyDenied(_))));
        assert!(!backend.set_star_flag(&inbox, &uid.to_string(), true)?);
        assert_eq!(backend.client().uids("INBOX"), vec![uid]);
        Ok(())
    }

    #[test]
    fn move_guesses_new_id_and_keeps_flags() -> anyhow::Result<()> {
        let mut store = inbox_store();
        store.add_folder("Archive");
        store.deliver("Archive", PLAIN);
        let uid = store.deliver("INBOX", PLAIN);
        if let Some(message) = store.message_mut("INBOX", uid) {
            message.seen = true;
            message.answered = true;
        }
        let mut backend = backend(store, MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;
        let archive = id_of(&backend, "Archive")?;

        let new_id = backend.move_item(&inbox, &uid.to_string(), &archive)?;
        assert_eq!(new_id.as_deref(), Some("2"));
        let moved = backend
            .client()
            .message("Archive", 2)
            .ok_or_else(|| anyhow::anyhow!("moved message"))?;
        assert!(moved.seen && moved.answered && !moved.flagged);
        assert!(backend.client().uids("INBOX").is_empty());
        Ok(())
    }

    #[test]
    fn created_folder_name_is_encoded_under_parent() -> anyhow::Result<()> {
        let mut backend = backend(inbox_store(), MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;

        let stat = backend
            .change_folder(&inbox, None, "Entwürfe")?
            .ok_or_else(|| anyhow::anyhow!("created"))?;
        assert_eq!(stat.parent, inbox);
        assert_eq!(id_of(&backend, "INBOX.Entw&APw-rfe")?, stat.id);
        assert!(backend.change_folder(&inbox, Some(&stat.id), "Renamed")?.is_none());
        Ok(())
    }

    #[test]
    fn sent_copy_falls_back_through_known_names() -> anyhow::Result<()> {
        let mut store = inbox_store();
        store.add_folder("Sent Items");
        let submitter = FakeSubmitter::default();
        let mut backend = backend(store, MailOptions::default())?.with_submitter(Box::new(submitter.clone()));

        let mime = b"From: ann@example.com\r\nTo: Bob <bob@example.com>\r\nSubject: hi\r\n\r\nhello\r\n".to_vec();
        assert!(backend.send_mail(&SendRequest::new_message(mime))?);

        let sent = submitter.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_deref(), Some("ann@example.com"));
        assert_eq!(sent[0].1, vec!["bob@example.com".to_string()]);
        let appended = &backend.client().appended;
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].0, "Sent Items");
        assert!(appended[0].2);
        Ok(())
    }

    #[test]
    fn refused_submission_is_an_error_and_saves_nothing() -> anyhow::Result<()> {
        let mut store = inbox_store();
        store.add_folder("Sent");
        let submitter = FakeSubmitter {
            refuse: true,
            ..FakeSubmitter::default()
        };
        let mut backend = backend(store, MailOptions::default())?.with_submitter(Box::new(submitter));
        let mime = b"From: ann@example.com\r\nTo: bob@example.com\r\nSubject: hi\r\n\r\nhello\r\n".to_vec();
        let err = backend.send_mail(&SendRequest::new_message(mime));
        assert!(matches!(err, Err(GatewayError::SubmissionFailed(_))));
        assert!(backend.client().appended.is_empty());
        Ok(())
    }

    #[test]
    fn reply_to_missing_source_is_not_found() -> anyhow::Result<()> {
        let mut backend = backend(inbox_store(), MailOptions::default())?
            .with_submitter(Box::new(FakeSubmitter::default()));
        backend.list_folders()?;
        let request = SendRequest {
            mode: SendMode::Reply,
            source: Some(ItemRef {
                folder_id: id_of(&backend, "INBOX")?,
                item_id: "42".to_string(),
            }),
            ..SendRequest::new_message(b"To: bob@example.com\r\nSubject: re\r\n\r\nok\r\n".to_vec())
        };
        assert!(matches!(backend.send_mail(&request), Err(GatewayError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn sink_reports_new_mail_after_baseline() -> anyhow::Result<()> {
        let mut backend = backend(inbox_store(), MailOptions::default())?;
        backend.list_folders()?;
        let inbox = id_of(&backend, "INBOX")?;

        assert!(!backend.register_sink(&FolderId::new("ffffffff")));
        assert!(backend.register_sink(&inbox));
        assert!(backend.poll(Duration::ZERO)?.is_empty());
        backend.client_mut().deliver("INBOX", PLAIN);
        assert_eq!(backend.poll(Duration::ZERO)?, vec![inbox]);
        Ok(())
    }
}
