use imap::types::Flag;
use imap::{ClientBuilder, ConnectionMode};
use tracing::{debug, warn};

use pushgate_core::{GatewayError, Result};

use crate::config::ImapConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFolder {
    pub name: String,
    pub delimiter: Option<String>,
    pub selectable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub messages: u32,
    pub recent: u32,
    pub unseen: u32,
    pub uid_next: Option<u32>,
}

/// Header-level metadata of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overview {
    pub uid: u32,
    pub date: Option<String>,
    pub seen: bool,
    pub flagged: bool,
    pub answered: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFlag {
    Seen,
    Flagged,
    Answered,
    Deleted,
}

impl NativeFlag {
    pub fn as_imap(self) -> &'static str {
        match self {
            NativeFlag::Seen => "\\Seen",
            NativeFlag::Flagged => "\\Flagged",
            NativeFlag::Answered => "\\Answered",
            NativeFlag::Deleted => "\\Deleted",
        }
    }
}

/// Primitives the mail adapter needs from the native store. Item-level calls
/// select their folder first; implementations remember the selected folder
/// and skip redundant selects unless `force` is set.
pub trait MailStoreClient {
    fn list_folders(&mut self) -> Result<Vec<NativeFolder>>;
    fn status(&mut self, folder: &str) -> Result<MailboxStatus>;
    fn select(&mut self, folder: &str, force: bool) -> Result<()>;
    /// `None` fetches every message in the folder.
    fn overviews(&mut self, folder: &str, uids: Option<&[u32]>) -> Result<Vec<Overview>>;
    fn search(&mut self, folder: &str, criteria: &str) -> Result<Vec<u32>>;
    fn fetch_raw(&mut self, folder: &str, uid: u32) -> Result<Option<Vec<u8>>>;
    fn set_flags(&mut self, folder: &str, uid: u32, flags: &[NativeFlag], on: bool) -> Result<()>;
    fn expunge(&mut self, folder: &str) -> Result<()>;
    fn move_message(&mut self, folder: &str, uid: u32, target: &str) -> Result<()>;
    fn append(&mut self, folder: &str, content: &[u8], seen: bool) -> Result<()>;
    fn create_folder(&mut self, name: &str) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
}

pub fn store_error(context: &str, err: imap::Error) -> GatewayError {
    let lost = matches!(err, imap::Error::Io(_) | imap::Error::ConnectionLost)
        || err.to_string().to_lowercase().contains("bye response");
    if lost {
        GatewayError::ConnectionFailure(format!("{context}: {err}"))
    } else {
        GatewayError::Transient(format!("{context}: {err}"))
    }
}

pub struct ImapStore {
    session: imap::Session<imap::Connection>,
    selected: Option<String>,
    exists: u32,
}

impl ImapStore {
    pub fn connect(config: &ImapConfig) -> Result<Self> {
        debug!(host = %config.host, port = config.port, "imap connect");
        let client = ClientBuilder::new(config.host.as_str(), config.port)
            .tls_kind(imap::TlsKind::Native)
            .mode(ConnectionMode::AutoTls)
            .danger_skip_tls_verify(config.skip_tls_verify)
            .connect()
            .map_err(|e| GatewayError::ConnectionFailure(format!("connect {}: {e}", config.host)))?;
        let session = client
            .login(&config.username, &config.password)
            .map_err(|e| e.0)
            .map_err(|e| GatewayError::ConnectionFailure(format!("login {}: {e}", config.username)))?;
        debug!(user = %config.username, "imap login ok");
        Ok(ImapStore {
            session,
            selected: None,
            exists: 0,
        })
    }

    fn ensure_selected(&mut self, folder: &str) -> Result<()> {
        self.select(folder, false)
    }
}

impl MailStoreClient for ImapStore {
    fn list_folders(&mut self) -> Result<Vec<NativeFolder>> {
        let list = self
            .session
            .list(None, Some("*"))
            .map_err(|e| store_error("list", e))?;
        debug!(count = list.len(), "imap folders listed");
        Ok(list
            .iter()
            .map(|name| NativeFolder {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(str::to_string),
                selectable: !name
                    .attributes()
                    .iter()
                    .any(|attr| matches!(attr, imap_proto::NameAttribute::NoSelect)),
            })
            .collect())
    }

    fn status(&mut self, folder: &str) -> Result<MailboxStatus> {
        let mailbox = self
            .session
            .status(folder, "(MESSAGES RECENT UNSEEN UIDNEXT)")
            .map_err(|e| store_error(&format!("status {folder}"), e))?;
        Ok(MailboxStatus {
            messages: mailbox.exists,
            recent: mailbox.recent,
            unseen: mailbox.unseen.unwrap_or(0),
            uid_next: mailbox.uid_next,
        })
    }

    fn select(&mut self, folder: &str, force: bool) -> Result<()> {
        if !force && self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        match self.session.select(folder) {
            Ok(mailbox) => {
                self.exists = mailbox.exists;
                self.selected = Some(folder.to_string());
                Ok(())
            }
            Err(err) => {
                self.selected = None;
                Err(store_error(&format!("select {folder}"), err))
            }
        }
    }

    fn overviews(&mut self, folder: &str, uids: Option<&[u32]>) -> Result<Vec<Overview>> {
        self.ensure_selected(folder)?;
        let uid_set = match uids {
            Some([]) => return Ok(Vec::new()),
            Some(uids) => uid_set(uids),
            None if self.exists == 0 => return Ok(Vec::new()),
            None => "1:*".to_string(),
        };
        let fetches = self
            .session
            .uid_fetch(uid_set, "(UID FLAGS BODY.PEEK[HEADER])")
            .map_err(|e| store_error(&format!("overview {folder}"), e))?;
        let mut out = Vec::new();
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let mut overview = Overview {
                uid,
                date: fetch.header().and_then(|h| header_value(h, "Date")),
                ..Overview::default()
            };
            for flag in fetch.flags().iter() {
                match flag {
                    Flag::Seen => overview.seen = true,
                    Flag::Flagged => overview.flagged = true,
                    Flag::Answered => overview.answered = true,
                    Flag::Deleted => overview.deleted = true,
                    _ => {}
                }
            }
            out.push(overview);
        }
        out.sort_by_key(|o| o.uid);
        Ok(out)
    }

    fn search(&mut self, folder: &str, criteria: &str) -> Result<Vec<u32>> {
        self.ensure_selected(folder)?;
        debug!(folder, criteria, "imap uid search");
        let uids = self
            .session
            .uid_search(criteria)
            .map_err(|e| store_error(&format!("search {folder}"), e))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_raw(&mut self, folder: &str, uid: u32) -> Result<Option<Vec<u8>>> {
        self.ensure_selected(folder)?;
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(|e| store_error(&format!("fetch {folder}/{uid}"), e))?;
        Ok(fetches.iter().find_map(|f| f.body().map(|b| b.to_vec())))
    }

    fn set_flags(&mut self, folder: &str, uid: u32, flags: &[NativeFlag], on: bool) -> Result<()> {
        if flags.is_empty() {
            return Ok(());
        }
        self.ensure_selected(folder)?;
        let names = flags
            .iter()
            .map(|f| f.as_imap())
            .collect::<Vec<_>>()
            .join(" ");
        let op = if on { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
        self.session
            .uid_store(uid.to_string(), format!("{op} ({names})"))
            .map_err(|e| store_error(&format!("store {folder}/{uid}"), e))?;
        Ok(())
    }

    fn expunge(&mut self, folder: &str) -> Result<()> {
        self.ensure_selected(folder)?;
        self.session
            .expunge()
            .map_err(|e| store_error(&format!("expunge {folder}"), e))?;
        Ok(())
    }

    fn move_message(&mut self, folder: &str, uid: u32, target: &str) -> Result<()> {
        self.ensure_selected(folder)?;
        let uid = uid.to_string();
        if let Err(err) = self.session.uid_mv(&uid, target) {
            // Servers without MOVE get copy + delete.
            debug!(%err, "uid move failed, falling back to copy");
            self.session
                .uid_copy(&uid, target)
                .map_err(|e| store_error(&format!("copy {folder}/{uid}"), e))?;
            self.session
                .uid_store(&uid, "+FLAGS.SILENT (\\Deleted)")
                .map_err(|e| store_error(&format!("store {folder}/{uid}"), e))?;
            self.session
                .expunge()
                .map_err(|e| store_error(&format!("expunge {folder}"), e))?;
        }
        Ok(())
    }

    fn append(&mut self, folder: &str, content: &[u8], seen: bool) -> Result<()> {
        let mut cmd = self.session.append(folder, content);
        if seen {
            cmd.flag(Flag::Seen);
        }
        cmd.finish()
            .map(|_| ())
            .map_err(|e| store_error(&format!("append {folder}"), e))
    }

    fn create_folder(&mut self, name: &str) -> Result<()> {
        self.session
            .create(name)
            .map_err(|e| store_error(&format!("create {name}"), e))
    }

    fn logout(&mut self) -> Result<()> {
        self.selected = None;
        if let Err(err) = self.session.logout() {
            warn!(%err, "imap logout failed");
        }
        Ok(())
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn header_value(raw: &[u8], name: &str) -> Option<String> {
    let (headers, _) = mailparse::parse_headers(raw).ok()?;
    headers
        .iter()
        .find(|h| h.get_key_ref().eq_ignore_ascii_case(name))
        .map(|h| h.get_value())
}
