//! Contact adapter: one card-store address book exposed to the sync engine
//! as a contacts folder, plus directory (GAL) search over its cards.

mod backend;
mod client;
mod config;
mod directory;
mod gal;

#[cfg(test)]
mod fake;

pub use backend::{ContactBackend, new_card_id};
pub use client::{CardRecord, CardStoreClient};
pub use config::ContactOptions;
pub use directory::DirectoryCardStore;
pub use gal::{MIN_QUERY_CHARS, directory_record};
