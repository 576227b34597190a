use std::ops::Range;

use serde::{Deserialize, Serialize};

pub const DIRECTORY_DEFAULT_RANGE_END: usize = 50;

/// Inclusive `start-end` window requested by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRange {
    pub start: usize,
    pub end: usize,
}

impl SearchRange {
    /// Absent, zero, or unparsable ranges fall back to `0-default_end`.
    pub fn parse(raw: Option<&str>, default_end: usize) -> Self {
        let fallback = SearchRange {
            start: 0,
            end: default_end,
        };
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty() && *r != "0") else {
            return fallback;
        };
        let Some((start, end)) = raw.split_once('-') else {
            return fallback;
        };
        match (start.trim().parse::<usize>(), end.trim().parse::<usize>()) {
            (Ok(start), Ok(end)) if end >= start => SearchRange { start, end },
            _ => fallback,
        }
    }

    /// Slice of a result set of `total` entries covered by this window.
    pub fn bounds(&self, total: usize) -> Option<Range<usize>> {
        let limit = total.min(self.end.saturating_add(1));
        if self.start >= limit {
            return None;
        }
        Some(self.start..limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults<T> {
    /// Inclusive window of `items`; `None` when nothing is returned.
    pub range: Option<(usize, usize)>,
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> SearchResults<T> {
    pub fn empty() -> Self {
        SearchResults {
            range: None,
            total: 0,
            items: Vec::new(),
        }
    }

    pub fn windowed(all: Vec<T>, range: SearchRange) -> Self {
        let total = all.len();
        let Some(bounds) = range.bounds(total) else {
            return SearchResults {
                range: None,
                total,
                items: Vec::new(),
            };
        };
        let reported = (bounds.start, bounds.end - 1);
        let items = all
            .into_iter()
            .skip(bounds.start)
            .take(bounds.end - bounds.start)
            .collect();
        SearchResults {
            range: Some(reported),
            total,
            items,
        }
    }

    pub fn range_label(&self) -> Option<String> {
        self.range.map(|(start, end)| format!("{start}-{end}"))
    }
}
