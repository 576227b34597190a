use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub skip_tls_verify: bool,
}

impl Default for ImapConfig {
    fn default() -> Self {
        ImapConfig {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            skip_tls_verify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub skip_tls_verify: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            host: String::new(),
            port: 465,
            username: String::new(),
            password: String::new(),
            skip_tls_verify: false,
        }
    }
}

/// Lower bound applied to mailbox searches that carry no explicit date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchWindow {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "2w")]
    TwoWeeks,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl SearchWindow {
    pub fn days(self) -> Option<i64> {
        match self {
            SearchWindow::OneDay => Some(1),
            SearchWindow::ThreeDays => Some(3),
            SearchWindow::OneWeek => Some(7),
            SearchWindow::TwoWeeks => Some(14),
            SearchWindow::OneMonth => Some(31),
            SearchWindow::ThreeMonths => Some(93),
            SearchWindow::SixMonths => Some(186),
            SearchWindow::All => None,
        }
    }

    pub fn since(self, today: NaiveDate) -> Option<NaiveDate> {
        let days = self.days()?;
        today.checked_sub_signed(chrono::Duration::days(days))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailOptions {
    /// Case-insensitive substrings; matching folders are hidden from the device.
    pub excluded_folders: Vec<String>,
    pub sent_folder: Option<String>,
    pub default_from: Option<String>,
    pub inline_forward: bool,
    pub read_only: bool,
    pub search_max_results: usize,
    pub search_window: SearchWindow,
}

impl Default for MailOptions {
    fn default() -> Self {
        MailOptions {
            excluded_folders: Vec::new(),
            sent_folder: None,
            default_from: None,
            inline_forward: false,
            read_only: false,
            search_max_results: 10,
            search_window: SearchWindow::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkOptions {
    pub poll_interval_secs: u64,
}

impl SinkOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            poll_interval_secs: 5,
        }
    }
}
