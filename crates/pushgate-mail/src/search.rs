use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

use pushgate_core::{
    FolderId, IdentityMap, MailHit, MailboxQuery, Result, SearchRange, SearchResults,
};

use crate::client::MailStoreClient;
use crate::config::SearchWindow;

pub(crate) fn imap_date(date: NaiveDate) -> String {
    imap_date_from_parts(date.year(), date.month(), date.day())
}

pub(crate) fn imap_date_from_parts(year: i32, month: u32, day: u32) -> String {
    let month = match month {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        12 => "Dec",
        _ => "Jan",
    };
    format!("{}-{}-{}", day, month, year)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Native search criteria for a mailbox query. Without an explicit lower
/// bound the configured sync window applies.
pub fn criteria(query: &MailboxQuery, window: SearchWindow, today: NaiveDate) -> String {
    let mut parts = Vec::new();
    if let Some(since) = query.since.or_else(|| window.since(today)) {
        parts.push(format!("SINCE {}", quote(&imap_date(since))));
    }
    if let Some(before) = query.before {
        parts.push(format!("BEFORE {}", quote(&imap_date(before))));
    }
    let text = query.free_text.trim();
    if !text.is_empty() {
        parts.push(format!("BODY {}", quote(text)));
    }
    if parts.is_empty() {
        return "ALL".to_string();
    }
    parts.join(" ")
}

/// Runs a mailbox search in one folder, or across every folder the device
/// already knows when deep traversal is requested, and windows the merged
/// hits.
pub fn search_mailbox(
    client: &mut dyn MailStoreClient,
    identity: &mut IdentityMap,
    query: &MailboxQuery,
    window: SearchWindow,
    max_results: usize,
    today: NaiveDate,
) -> Result<SearchResults<MailHit>> {
    let filter = criteria(query, window, today);
    let mut scopes: Vec<(FolderId, String)> = Vec::new();
    if query.deep_traversal {
        for folder in client.list_folders()? {
            // Folders the device has never seen have no id to report.
            if let Some(id) = identity.lookup(&folder.name) {
                scopes.push((id, folder.name));
            }
        }
    } else {
        let id = match &query.folder_id {
            Some(id) => id.clone(),
            None => identity.forward("INBOX"),
        };
        let native = identity.reverse(&id)?;
        scopes.push((id, native));
    }

    let mut hits = Vec::new();
    for (id, native) in scopes {
        let found = match client.search(&native, &filter) {
            Ok(found) => found,
            Err(err) if err.is_fatal() || !query.deep_traversal => return Err(err),
            Err(err) => {
                warn!(folder = %native, %err, "search failed, skipping folder");
                continue;
            }
        };
        debug!(folder = %native, count = found.len(), "folder searched");
        hits.extend(found.into_iter().map(|uid| MailHit {
            folder_id: id.clone(),
            item_id: uid.to_string(),
            long_id: format!("{id}:{uid}"),
        }));
    }

    let default_end = max_results.max(1) - 1;
    Ok(SearchResults::windowed(
        hits,
        SearchRange::parse(query.range.as_deref(), default_end),
    ))
}
