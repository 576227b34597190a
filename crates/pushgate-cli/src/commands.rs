use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use pushgate_contacts::{ContactBackend, DirectoryCardStore};
use pushgate_core::{
    AttachmentRef, BodyPreference, BodyRequest, FolderId, IdentityMap, ItemRef, JsonFileStateStore,
    MailboxQuery, SendMode, SendRequest, SyncBackend,
};
use pushgate_mail::{ImapStore, MailBackend, SmtpSubmitter};

use crate::cli::{BodyKind, CliCommand, GalCmd, SendCmd};
use crate::config::GatewayConfig;

pub(crate) const CLI_SCHEMA_VERSION: &str = "pushgate.cli.v1";

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

fn identity_for(config: &GatewayConfig, device: &str) -> Result<IdentityMap> {
    let store = JsonFileStateStore::for_device(&config.state_dir(), device);
    debug!(path = %store.path().display(), "device state");
    Ok(IdentityMap::load(Box::new(store))?)
}

fn open_mail(config: &GatewayConfig, device: &str) -> Result<MailBackend<ImapStore>> {
    let store = ImapStore::connect(&config.imap)?;
    let mut backend = MailBackend::new(store, identity_for(config, device)?, config.mail.clone())
        .with_poll_interval(config.sink.interval());
    if let Some(smtp) = &config.smtp {
        backend = backend.with_submitter(Box::new(SmtpSubmitter::new(smtp)?));
    }
    Ok(backend)
}

fn body_request(kind: BodyKind, truncate: Option<usize>, preview: Option<usize>) -> BodyRequest {
    let preference = match kind {
        BodyKind::Plain => BodyPreference::Plain,
        BodyKind::Html => BodyPreference::Html,
        BodyKind::Mime => BodyPreference::Mime,
        BodyKind::Rtf => BodyPreference::Rtf,
    };
    BodyRequest {
        accepted: vec![preference],
        truncation_size: truncate,
        preview_size: preview,
    }
}

pub(crate) fn parse_item_ref(raw: &str) -> Result<ItemRef> {
    let (folder, item) = raw
        .split_once(':')
        .filter(|(f, i)| !f.is_empty() && !i.is_empty())
        .with_context(|| format!("expected folder:item, got {raw:?}"))?;
    Ok(ItemRef {
        folder_id: FolderId::new(folder),
        item_id: item.to_string(),
    })
}

pub(crate) fn parse_day(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|d| {
        NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").with_context(|| format!("bad date {d:?}"))
    })
    .transpose()
}

pub(crate) fn send_request(cmd: &SendCmd) -> Result<SendRequest> {
    let mime = std::fs::read(&cmd.file).with_context(|| format!("reading {}", cmd.file.display()))?;
    let (mode, source) = match (&cmd.reply, &cmd.forward) {
        (Some(reply), _) => (SendMode::Reply, Some(parse_item_ref(reply)?)),
        (None, Some(forward)) => (SendMode::Forward, Some(parse_item_ref(forward)?)),
        (None, None) => (SendMode::New, None),
    };
    Ok(SendRequest {
        mime,
        mode,
        source,
        save_in_sent: !cmd.no_save,
    })
}

pub(crate) fn run(command: CliCommand, config: &GatewayConfig, device: &str) -> Result<()> {
    if let CliCommand::Gal(cmd) = &command {
        return run_gal(cmd, config, device);
    }
    let mut backend = open_mail(config, device)?;
    let result = run_mail(&mut backend, command);
    let logoff = backend.logoff();
    let value = result?;
    logoff?;
    output_ok(value)
}

fn run_mail(backend: &mut MailBackend<ImapStore>, command: CliCommand) -> Result<JsonValue> {
    match command {
        CliCommand::Folders => {
            let folders = backend.list_folders()?;
            let waste_basket = backend.waste_basket()?;
            Ok(json!({ "folders": folders, "waste_basket": waste_basket }))
        }
        CliCommand::Items(cmd) => {
            let items = backend.list_items(&FolderId::new(cmd.folder), cmd.cutoff)?;
            Ok(json!(items))
        }
        CliCommand::Get(cmd) => {
            let request = body_request(cmd.body, cmd.truncate, cmd.preview);
            let item = backend
                .get_item(&FolderId::new(cmd.folder), &cmd.id, &request)?
                .context("item not found")?;
            Ok(serde_json::to_value(item)?)
        }
        CliCommand::Attachment(cmd) => {
            let reference: AttachmentRef = cmd.reference.parse()?;
            let data = backend
                .get_attachment(&reference)?
                .context("attachment not found")?;
            std::fs::write(&cmd.out, &data.data)
                .with_context(|| format!("writing {}", cmd.out.display()))?;
            Ok(json!({
                "content_type": data.content_type,
                "bytes": data.data.len(),
                "path": cmd.out,
            }))
        }
        CliCommand::Flag(cmd) => {
            let folder = FolderId::new(cmd.folder);
            let mut out = serde_json::Map::new();
            if let Some(read) = cmd.read {
                out.insert("read".to_string(), json!(backend.set_read_flag(&folder, &cmd.id, read)?));
            }
            if let Some(star) = cmd.star {
                out.insert("star".to_string(), json!(backend.set_star_flag(&folder, &cmd.id, star)?));
            }
            Ok(JsonValue::Object(out))
        }
        CliCommand::Watch(cmd) => {
            for folder in &cmd.folders {
                let id = FolderId::new(folder.as_str());
                if !backend.register_sink(&id) {
                    anyhow::bail!("unknown folder id {folder}");
                }
            }
            // Baseline round, then wait for a change.
            backend.poll(Duration::ZERO)?;
            let changed = backend.poll(Duration::from_secs(cmd.timeout))?;
            Ok(json!({ "changed": changed }))
        }
        CliCommand::Search(cmd) => {
            let query = MailboxQuery {
                free_text: cmd.text,
                folder_id: cmd.folder.map(FolderId::new),
                deep_traversal: cmd.deep,
                since: parse_day(cmd.since.as_deref())?,
                before: parse_day(cmd.before.as_deref())?,
                range: cmd.range,
            };
            Ok(serde_json::to_value(backend.search_mailbox(&query)?)?)
        }
        CliCommand::Send(cmd) => {
            let request = send_request(&cmd)?;
            let sent = backend.send_mail(&request)?;
            if !sent {
                anyhow::bail!("no [smtp] relay configured");
            }
            Ok(json!({ "sent": true, "saved": request.save_in_sent }))
        }
        CliCommand::Gal(_) => anyhow::bail!("directory search needs the contact adapter"),
    }
}

fn run_gal(cmd: &GalCmd, config: &GatewayConfig, device: &str) -> Result<()> {
    let contacts = config
        .contacts
        .as_ref()
        .context("no [contacts] section configured")?;
    let identity = identity_for(config, &format!("{device}-contacts"))?;
    let mut backend = ContactBackend::connect(
        DirectoryCardStore::new(&contacts.dir),
        identity,
        contacts.options.clone(),
    )?;
    let results = backend.search_directory(&cmd.query, cmd.range.as_deref())?;
    backend.logoff()?;
    output_ok(serde_json::to_value(results)?)
}
