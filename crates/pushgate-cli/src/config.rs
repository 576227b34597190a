use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use pushgate_contacts::ContactOptions;
use pushgate_mail::{ImapConfig, MailOptions, SinkOptions, SmtpConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct GatewayConfig {
    pub(crate) imap: ImapConfig,
    pub(crate) smtp: Option<SmtpConfig>,
    pub(crate) mail: MailOptions,
    pub(crate) sink: SinkOptions,
    pub(crate) state: StateConfig,
    pub(crate) contacts: Option<ContactsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct StateConfig {
    pub(crate) dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactsConfig {
    /// Root holding one subdirectory of `.vcf` files per address book.
    pub(crate) dir: PathBuf,
    #[serde(flatten)]
    pub(crate) options: ContactOptions,
}

impl GatewayConfig {
    pub(crate) fn state_dir(&self) -> PathBuf {
        self.state
            .dir
            .clone()
            .unwrap_or_else(|| xdg_state_dir().join("pushgate").join("devices"))
    }
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => vec![xdg_config_dir().join("pushgate").join("pushgate.toml")],
    }
}

pub(crate) fn parse_config(text: &str) -> Result<GatewayConfig> {
    Ok(toml::from_str(text)?)
}

pub(crate) fn load_config(explicit: Option<&Path>) -> Result<GatewayConfig> {
    for path in config_path_candidates(explicit) {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                return parse_config(&text).with_context(|| format!("parsing {}", path.display()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
    anyhow::bail!("no pushgate.toml found (use --config)")
}
