//! Mail adapter: exposes an IMAP mailbox to the sync engine through
//! [`pushgate_core::SyncBackend`], with SMTP submission for outgoing mail.

mod backend;
mod client;
mod config;
mod hierarchy;
mod mutf7;
mod search;
mod sink;
mod submit;

#[cfg(test)]
mod fake;

pub use backend::MailBackend;
pub use client::{ImapStore, MailStoreClient, MailboxStatus, NativeFlag, NativeFolder, Overview};
pub use config::{ImapConfig, MailOptions, SearchWindow, SinkOptions, SmtpConfig};
pub use hierarchy::{Placement, is_excluded, place};
pub use mutf7::{decode as decode_folder_name, encode as encode_folder_name};
pub use sink::{ChangeSink, snapshot_token};
pub use submit::{MailSubmitter, SmtpSubmitter};
