use pushgate_core::Result;

/// One card as the store reports it. `data` is absent when the store
/// listed the card without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    pub id: String,
    pub etag: String,
    pub data: Option<String>,
}

/// Primitives the contact adapter needs from a card store. `book` is the
/// native path of an address book.
pub trait CardStoreClient {
    fn check_connection(&mut self) -> Result<bool>;
    fn list_cards(&mut self, book: &str) -> Result<Vec<CardRecord>>;
    fn fetch_card(&mut self, book: &str, id: &str) -> Result<Option<CardRecord>>;
    /// Free-text search; `limit` caps how many records the store returns.
    fn search_cards(&mut self, book: &str, query: &str, limit: Option<usize>) -> Result<Vec<CardRecord>>;
    /// Stores a new card under `id` and returns the id the store assigned.
    fn create_card(&mut self, book: &str, id: &str, data: &str) -> Result<String>;
    fn update_card(&mut self, book: &str, id: &str, data: &str) -> Result<()>;
    fn delete_card(&mut self, book: &str, id: &str) -> Result<bool>;
}
