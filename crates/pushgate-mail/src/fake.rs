use std::cell::RefCell;
use std::rc::Rc;

use chrono::NaiveDate;

use pushgate_core::{GatewayError, Result};

use crate::client::{MailStoreClient, MailboxStatus, NativeFlag, NativeFolder, Overview, header_value};
use crate::submit::MailSubmitter;

#[derive(Debug, Clone, Default)]
pub struct FakeMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
    pub seen: bool,
    pub flagged: bool,
    pub answered: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
struct FakeFolder {
    name: String,
    selectable: bool,
    messages: Vec<FakeMessage>,
    uid_next: u32,
    recent: u32,
}

/// In-memory mail store speaking the client trait.
#[derive(Debug, Default)]
pub struct FakeMailStore {
    folders: Vec<FakeFolder>,
    selected: Option<String>,
    pub delimiter: String,
    pub selects: usize,
    pub fail_overviews: bool,
    pub reject_append: Vec<String>,
    pub appended: Vec<(String, Vec<u8>, bool)>,
}

impl FakeMailStore {
    pub fn new() -> Self {
        FakeMailStore {
            delimiter: ".".to_string(),
            ..FakeMailStore::default()
        }
    }

    pub fn add_folder(&mut self, name: &str) {
        self.folders.push(FakeFolder {
            name: name.to_string(),
            selectable: true,
            messages: Vec::new(),
            uid_next: 1,
            recent: 0,
        });
    }

    pub fn add_container(&mut self, name: &str) {
        self.add_folder(name);
        if let Some(folder) = self.folders.last_mut() {
            folder.selectable = false;
        }
    }

    pub fn deliver(&mut self, folder: &str, raw: &[u8]) -> u32 {
        let Some(folder) = self.folders.iter_mut().find(|f| f.name == folder) else {
            return 0;
        };
        let uid = folder.uid_next;
        folder.uid_next += 1;
        folder.recent += 1;
        folder.messages.push(FakeMessage {
            uid,
            raw: raw.to_vec(),
            ..FakeMessage::default()
        });
        uid
    }

    pub fn message(&self, folder: &str, uid: u32) -> Option<&FakeMessage> {
        self.folder(folder)
            .ok()?
            .messages
            .iter()
            .find(|m| m.uid == uid)
    }

    pub fn message_mut(&mut self, folder: &str, uid: u32) -> Option<&mut FakeMessage> {
        self.folder_mut(folder)
            .ok()?
            .messages
            .iter_mut()
            .find(|m| m.uid == uid)
    }

    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.folder(folder)
            .map(|f| f.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    fn folder(&self, name: &str) -> Result<&FakeFolder> {
        self.folders
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| GatewayError::Transient(format!("no mailbox {name}")))
    }

    fn folder_mut(&mut self, name: &str) -> Result<&mut FakeFolder> {
        self.folders
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| GatewayError::Transient(format!("no mailbox {name}")))
    }
}

impl MailStoreClient for FakeMailStore {
    fn list_folders(&mut self) -> Result<Vec<NativeFolder>> {
        Ok(self
            .folders
            .iter()
            .map(|f| NativeFolder {
                name: f.name.clone(),
                delimiter: Some(self.delimiter.clone()),
                selectable: f.selectable,
            })
            .collect())
    }

    fn status(&mut self, folder: &str) -> Result<MailboxStatus> {
        let folder = self.folder(folder)?;
        Ok(MailboxStatus {
            messages: folder.messages.len() as u32,
            recent: folder.recent,
            unseen: folder.messages.iter().filter(|m| !m.seen).count() as u32,
            uid_next: Some(folder.uid_next),
        })
    }

    fn select(&mut self, folder: &str, force: bool) -> Result<()> {
        if !force && self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        self.folder(folder)?;
        self.selects += 1;
        self.selected = Some(folder.to_string());
        Ok(())
    }

    fn overviews(&mut self, folder: &str, uids: Option<&[u32]>) -> Result<Vec<Overview>> {
        self.select(folder, false)?;
        if self.fail_overviews {
            return Err(GatewayError::Transient("overview unavailable".to_string()));
        }
        let folder = self.folder(folder)?;
        Ok(folder
            .messages
            .iter()
            .filter(|m| uids.is_none_or(|wanted| wanted.contains(&m.uid)))
            .map(|m| Overview {
                uid: m.uid,
                date: header_value(&m.raw, "Date"),
                seen: m.seen,
                flagged: m.flagged,
                answered: m.answered,
                deleted: m.deleted,
            })
            .collect())
    }

    fn search(&mut self, folder: &str, criteria: &str) -> Result<Vec<u32>> {
        self.select(folder, false)?;
        let filter = Criteria::parse(criteria);
        let folder = self.folder(folder)?;
        Ok(folder
            .messages
            .iter()
            .filter(|m| filter.matches(&m.raw))
            .map(|m| m.uid)
            .collect())
    }

    fn fetch_raw(&mut self, folder: &str, uid: u32) -> Result<Option<Vec<u8>>> {
        self.select(folder, false)?;
        Ok(self.message(folder, uid).map(|m| m.raw.clone()))
    }

    fn set_flags(&mut self, folder: &str, uid: u32, flags: &[NativeFlag], on: bool) -> Result<()> {
        self.select(folder, false)?;
        let Some(message) = self.message_mut(folder, uid) else {
            return Ok(());
        };
        for flag in flags {
            match flag {
                NativeFlag::Seen => message.seen = on,
                NativeFlag::Flagged => message.flagged = on,
                NativeFlag::Answered => message.answered = on,
                NativeFlag::Deleted => message.deleted = on,
            }
        }
        Ok(())
    }

    fn expunge(&mut self, folder: &str) -> Result<()> {
        self.select(folder, false)?;
        self.folder_mut(folder)?.messages.retain(|m| !m.deleted);
        Ok(())
    }

    fn move_message(&mut self, folder: &str, uid: u32, target: &str) -> Result<()> {
        self.select(folder, false)?;
        self.folder(target)?;
        let source = self.folder_mut(folder)?;
        let Some(pos) = source.messages.iter().position(|m| m.uid == uid) else {
            return Err(GatewayError::Transient(format!("no message {uid}")));
        };
        let message = source.messages.remove(pos);
        let target = self.folder_mut(target)?;
        let uid = target.uid_next;
        target.uid_next += 1;
        // Like a plain server copy, the moved message arrives without flags.
        target.messages.push(FakeMessage {
            uid,
            raw: message.raw,
            ..FakeMessage::default()
        });
        Ok(())
    }

    fn append(&mut self, folder: &str, content: &[u8], seen: bool) -> Result<()> {
        if self.reject_append.iter().any(|f| f == folder) || self.folder(folder).is_err() {
            return Err(GatewayError::Transient(format!("append to {folder} refused")));
        }
        let uid = self.deliver(folder, content);
        if let Some(message) = self.message_mut(folder, uid) {
            message.seen = seen;
        }
        self.appended.push((folder.to_string(), content.to_vec(), seen));
        Ok(())
    }

    fn create_folder(&mut self, name: &str) -> Result<()> {
        if self.folder(name).is_ok() {
            return Err(GatewayError::Transient(format!("{name} exists")));
        }
        self.add_folder(name);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.selected = None;
        Ok(())
    }
}

/// The subset of search keys the adapter emits.
#[derive(Debug, Default)]
struct Criteria {
    since: Option<NaiveDate>,
    before: Option<NaiveDate>,
    body: Option<String>,
}

impl Criteria {
    fn parse(text: &str) -> Self {
        let tokens = tokenize(text);
        let mut out = Criteria::default();
        let mut iter = tokens.into_iter();
        while let Some(key) = iter.next() {
            match key.to_ascii_uppercase().as_str() {
                "SINCE" => out.since = iter.next().and_then(|d| parse_imap_date(&d)),
                "BEFORE" => out.before = iter.next().and_then(|d| parse_imap_date(&d)),
                "BODY" => out.body = iter.next().map(|b| b.to_lowercase()),
                _ => {}
            }
        }
        out
    }

    fn matches(&self, raw: &[u8]) -> bool {
        let date = header_value(raw, "Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.date_naive());
        if let Some(since) = self.since {
            if date.is_none_or(|d| d < since) {
                return false;
            }
        }
        if let Some(before) = self.before {
            if date.is_none_or(|d| d >= before) {
                return false;
            }
        }
        if let Some(body) = &self.body {
            let text = String::from_utf8_lossy(raw).to_lowercase();
            let body_text = text.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
            if !body_text.contains(body.as_str()) {
                return false;
            }
        }
        true
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if ch == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            token.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

fn parse_imap_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%d-%b-%Y").ok()
}

pub type Submitted = (Option<String>, Vec<String>, Vec<u8>);

/// Records submitted messages; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct FakeSubmitter {
    pub sent: Rc<RefCell<Vec<Submitted>>>,
    pub refuse: bool,
}

impl MailSubmitter for FakeSubmitter {
    fn submit(&mut self, envelope_from: Option<&str>, recipients: &[String], message: &[u8]) -> Result<()> {
        if self.refuse {
            return Err(GatewayError::SubmissionFailed("relay refused".to_string()));
        }
        self.sent.borrow_mut().push((
            envelope_from.map(str::to_string),
            recipients.to_vec(),
            message.to_vec(),
        ));
        Ok(())
    }
}
