use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use pushgate_core::{FolderId, Result};

use crate::client::{MailStoreClient, MailboxStatus};

/// Upper bound on a single wait when the requested timeout does not fit.
const LONGEST_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

pub fn snapshot_token(status: &MailboxStatus) -> String {
    format!("M:{}-R:{}-U:{}", status.messages, status.recent, status.unseen)
}

/// Polling replacement for push notifications. The first snapshot of each
/// registered folder is its baseline; later polls report folders whose
/// snapshot moved.
pub struct ChangeSink {
    folders: Vec<(FolderId, String)>,
    snapshots: HashMap<String, String>,
    interval: Duration,
}

impl ChangeSink {
    pub fn new(interval: Duration) -> Self {
        ChangeSink {
            folders: Vec::new(),
            snapshots: HashMap::new(),
            interval,
        }
    }

    pub fn register(&mut self, id: FolderId, native: String) {
        if self.folders.iter().any(|(known, _)| *known == id) {
            return;
        }
        debug!(folder = %id, native = %native, "sink folder registered");
        self.folders.push((id, native));
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Blocks until a registered folder changes or `timeout` elapses. At
    /// least one round of snapshots is taken.
    pub fn poll(&mut self, client: &mut dyn MailStoreClient, timeout: Duration) -> Result<Vec<FolderId>> {
        let deadline = deadline_after(Instant::now(), timeout);
        loop {
            let changed = self.round(client)?;
            if !changed.is_empty() {
                debug!(count = changed.len(), "sink detected changes");
                return Ok(changed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(self.interval.min(deadline - now));
        }
    }

    fn round(&mut self, client: &mut dyn MailStoreClient) -> Result<Vec<FolderId>> {
        let mut changed = Vec::new();
        for (id, native) in &self.folders {
            let status = match client.status(native) {
                Ok(status) => status,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(folder = %id, %err, "could not stat folder for sink");
                    continue;
                }
            };
            let token = snapshot_token(&status);
            match self.snapshots.get(native) {
                None => {
                    self.snapshots.insert(native.clone(), token);
                }
                Some(previous) if *previous != token => {
                    debug!(folder = %id, from = %previous, to = %token, "folder changed");
                    self.snapshots.insert(native.clone(), token);
                    changed.push(id.clone());
                }
                Some(_) => {}
            }
        }
        Ok(changed)
    }
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(LONGEST_WAIT))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pushgate_core::FolderId;

    use super::{ChangeSink, LONGEST_WAIT, deadline_after, snapshot_token};
    use crate::client::MailboxStatus;
    use crate::fake::FakeMailStore;

    #[test]
    fn token_has_counts() {
        let status = MailboxStatus {
            messages: 12,
            recent: 1,
            unseen: 3,
            uid_next: Some(40),
        };
        assert_eq!(snapshot_token(&status), "M:12-R:1-U:3");
    }

    #[test]
    fn first_poll_sets_baseline_then_reports_changes() -> anyhow::Result<()> {
        let mut store = FakeMailStore::new();
        store.add_folder("INBOX");
        store.add_folder("Archive");
        let inbox = FolderId::new("aaaa0001");
        let mut sink = ChangeSink::new(Duration::from_millis(1));
        sink.register(inbox.clone(), "INBOX".to_string());
        sink.register(FolderId::new("aaaa0002"), "Archive".to_string());

        assert!(sink.poll(&mut store, Duration::ZERO)?.is_empty());

        store.deliver("INBOX", b"Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(sink.poll(&mut store, Duration::ZERO)?, vec![inbox]);
        assert!(sink.poll(&mut store, Duration::ZERO)?.is_empty());
        Ok(())
    }

    #[test]
    fn quiet_poll_waits_for_timeout() -> anyhow::Result<()> {
        let mut store = FakeMailStore::new();
        store.add_folder("INBOX");
        let mut sink = ChangeSink::new(Duration::from_millis(5));
        sink.register(FolderId::new("aaaa0001"), "INBOX".to_string());

        let started = Instant::now();
        assert!(sink.poll(&mut store, Duration::from_millis(30))?.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn unreadable_folder_is_skipped() -> anyhow::Result<()> {
        let mut store = FakeMailStore::new();
        store.add_folder("INBOX");
        let inbox = FolderId::new("aaaa0001");
        let mut sink = ChangeSink::new(Duration::from_millis(1));
        sink.register(FolderId::new("aaaa0009"), "Gone".to_string());
        sink.register(inbox.clone(), "INBOX".to_string());

        sink.poll(&mut store, Duration::ZERO)?;
        store.deliver("INBOX", b"Subject: again\r\n\r\nbody\r\n");
        assert_eq!(sink.poll(&mut store, Duration::ZERO)?, vec![inbox]);
        Ok(())
    }

    #[test]
    fn oversized_timeout_is_capped() -> anyhow::Result<()> {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + LONGEST_WAIT);
        assert_eq!(deadline_after(now, Duration::from_secs(2)), now + Duration::from_secs(2));

        let mut store = FakeMailStore::new();
        store.add_folder("INBOX");
        let inbox = FolderId::new("aaaa0001");
        let mut sink = ChangeSink::new(Duration::from_millis(1));
        sink.register(inbox.clone(), "INBOX".to_string());
        sink.poll(&mut store, Duration::ZERO)?;
        store.deliver("INBOX", b"Subject: late\r\n\r\nbody\r\n");
        assert_eq!(sink.poll(&mut store, Duration::from_secs(u64::MAX))?, vec![inbox]);
        Ok(())
    }
}
