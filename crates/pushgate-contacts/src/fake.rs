use std::collections::BTreeMap;

use pushgate_core::{GatewayError, Result};

use crate::client::{CardRecord, CardStoreClient};

/// In-memory card store; every write bumps the card's entity tag.
#[derive(Debug, Default)]
pub struct FakeCardStore {
    books: BTreeMap<String, BTreeMap<String, (u32, String)>>,
    pub online: bool,
    pub fetches: usize,
    pub last_limit: Option<usize>,
}

impl FakeCardStore {
    pub fn new() -> Self {
        FakeCardStore {
            online: true,
            ..FakeCardStore::default()
        }
    }

    pub fn insert(&mut self, book: &str, id: &str, data: &str) {
        let cards = self.books.entry(book.to_string()).or_default();
        let version = cards.get(id).map(|(v, _)| v + 1).unwrap_or(1);
        cards.insert(id.to_string(), (version, data.to_string()));
    }

    pub fn data(&self, book: &str, id: &str) -> Option<&str> {
        self.books.get(book)?.get(id).map(|(_, d)| d.as_str())
    }

    fn record(id: &str, version: u32, data: Option<&str>) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            etag: format!("\"v{version}\""),
            data: data.map(str::to_string),
        }
    }
}

impl CardStoreClient for FakeCardStore {
    fn check_connection(&mut self) -> Result<bool> {
        Ok(self.online)
    }

    fn list_cards(&mut self, book: &str) -> Result<Vec<CardRecord>> {
        Ok(self
            .books
            .get(book)
            .map(|cards| {
                cards
                    .iter()
                    .map(|(id, (v, _))| Self::record(id, *v, None))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_card(&mut self, book: &str, id: &str) -> Result<Option<CardRecord>> {
        self.fetches += 1;
        Ok(self
            .books
            .get(book)
            .and_then(|cards| cards.get(id))
            .map(|(v, d)| Self::record(id, *v, Some(d))))
    }

    fn search_cards(&mut self, book: &str, query: &str, limit: Option<usize>) -> Result<Vec<CardRecord>> {
        self.last_limit = limit;
        let needle = query.to_lowercase();
        let Some(cards) = self.books.get(book) else {
            return Ok(Vec::new());
        };
        Ok(cards
            .iter()
            .filter(|(_, (_, d))| d.to_lowercase().contains(&needle))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, (v, d))| Self::record(id, *v, Some(d)))
            .collect())
    }

    fn create_card(&mut self, book: &str, id: &str, data: &str) -> Result<String> {
        if self.data(book, id).is_some() {
            return Err(GatewayError::Transient(format!("card {id} exists")));
        }
        self.insert(book, id, data);
        Ok(id.to_string())
    }

    fn update_card(&mut self, book: &str, id: &str, data: &str) -> Result<()> {
        if self.data(book, id).is_none() {
            return Err(GatewayError::NotFound(format!("card {id}")));
        }
        self.insert(book, id, data);
        Ok(())
    }

    fn delete_card(&mut self, book: &str, id: &str) -> Result<bool> {
        Ok(self
            .books
            .get_mut(book)
            .and_then(|cards| cards.remove(id))
            .is_some())
    }
}
