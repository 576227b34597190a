use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use pushgate_core::{GatewayError, Result};

use crate::client::{CardRecord, CardStoreClient};

const CARD_EXTENSION: &str = "vcf";

/// Card store backed by a directory tree: each address book is a
/// subdirectory holding one `<id>.vcf` file per card. Entity tags are
/// derived from file modification time and size.
pub struct DirectoryCardStore {
    root: PathBuf,
}

impl DirectoryCardStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryCardStore { root: root.into() }
    }

    fn book_dir(&self, book: &str) -> Result<PathBuf> {
        check_name(book)?;
        Ok(self.root.join(book))
    }

    fn card_path(&self, book: &str, id: &str) -> Result<PathBuf> {
        check_name(id)?;
        Ok(self.book_dir(book)?.join(format!("{id}.{CARD_EXTENSION}")))
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(GatewayError::NotFound(format!("invalid card path segment {name:?}")));
    }
    Ok(())
}

fn io_error(context: &str, path: &Path, err: std::io::Error) -> GatewayError {
    GatewayError::Transient(format!("{context} {}: {err}", path.display()))
}

fn etag(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).map_err(|e| io_error("stat", path, e))?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    Ok(format!("{modified:x}-{:x}", meta.len()))
}

fn read_record(path: &Path, id: &str, with_data: bool) -> Result<CardRecord> {
    let data = if with_data {
        Some(fs::read_to_string(path).map_err(|e| io_error("read", path, e))?)
    } else {
        None
    };
    Ok(CardRecord {
        id: id.to_string(),
        etag: etag(path)?,
        data,
    })
}

impl CardStoreClient for DirectoryCardStore {
    fn check_connection(&mut self) -> Result<bool> {
        Ok(self.root.is_dir())
    }

    fn list_cards(&mut self, book: &str) -> Result<Vec<CardRecord>> {
        let dir = self.book_dir(book)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(book, "address book directory missing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error("list", &dir, e)),
        };
        let mut cards = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error("list", &dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CARD_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            cards.push(read_record(&path, id, false)?);
        }
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cards)
    }

    fn fetch_card(&mut self, book: &str, id: &str) -> Result<Option<CardRecord>> {
        let path = self.card_path(book, id)?;
        if !path.is_file() {
            return Ok(None);
        }
        read_record(&path, id, true).map(Some)
    }

    fn search_cards(&mut self, book: &str, query: &str, limit: Option<usize>) -> Result<Vec<CardRecord>> {
        let needle = query.to_lowercase();
        let mut found = Vec::new();
        for card in self.list_cards(book)? {
            if limit.is_some_and(|max| found.len() >= max) {
                break;
            }
            let Some(card) = self.fetch_card(book, &card.id)? else {
                continue;
            };
            if card
                .data
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            {
                found.push(card);
            }
        }
        Ok(found)
    }

    fn create_card(&mut self, book: &str, id: &str, data: &str) -> Result<String> {
        let dir = self.book_dir(book)?;
        fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
        let path = self.card_path(book, id)?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, data.as_bytes()))
            .map_err(|e| io_error("create", &path, e))?;
        debug!(book, id, "card created");
        Ok(id.to_string())
    }

    fn update_card(&mut self, book: &str, id: &str, data: &str) -> Result<()> {
        let path = self.card_path(book, id)?;
        if !path.is_file() {
            return Err(GatewayError::NotFound(format!("card {id} in {book}")));
        }
        fs::write(&path, data).map_err(|e| io_error("update", &path, e))?;
        debug!(book, id, "card updated");
        Ok(())
    }

    fn delete_card(&mut self, book: &str, id: &str) -> Result<bool> {
        let path = self.card_path(book, id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete", &path, e)),
        }
    }
}
