use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tracing::debug;

use pushgate_core::{
    AttachmentData, AttachmentRef, BodyPreference, BodyRequest, FolderId, Importance, MailAttachment,
    MailBody, MailFlag, Result, StructuredMailItem, normalize_crlf, truncate_body, truncate_utf8,
};

use crate::{
    collect_text, disposition, header_addresses, html_to_text, leaf_parts, parse_mail_date,
    part_name, strip_markup,
};

/// Where an item lives and the flags the store reported for it.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub folder_id: &'a FolderId,
    pub item_id: &'a str,
    pub read: bool,
    pub starred: bool,
}

pub fn to_structured_mail(
    raw: &[u8],
    ctx: &ItemContext<'_>,
    request: &BodyRequest,
) -> Result<StructuredMailItem> {
    let parsed = mailparse::parse_mail(raw)?;

    let mut plain = String::new();
    collect_text(&parsed, "plain", &mut plain);
    let mut html = String::new();
    collect_text(&parsed, "html", &mut html);
    if plain.is_empty() {
        plain = html_to_text(&html);
    }
    let plain = normalize_crlf(&plain);
    let html = normalize_crlf(&html);

    let preview = request
        .preview_size
        .map(|size| truncate_utf8(&strip_markup(&plain), size).to_string());
    let mut format = request.best_match();
    let body = if format == BodyPreference::Mime {
        let (kept, truncated) = truncate_bytes(raw, request.truncation_size);
        MailBody {
            format,
            data: String::new(),
            raw: Some(kept.to_vec()),
            truncated,
            estimated_size: kept.len(),
            preview,
        }
    } else {
        let data = match format {
            BodyPreference::Html if html.is_empty() => {
                debug!(item = ctx.item_id, "no html body, falling back to plain");
                format = BodyPreference::Plain;
                plain.clone()
            }
            BodyPreference::Html => html,
            BodyPreference::Rtf => BASE64_STD.encode(plain.as_bytes()),
            _ => plain.clone(),
        };
        let (data, truncated, estimated_size) = truncate_body(data, request.truncation_size);
        MailBody {
            format,
            data,
            raw: None,
            truncated,
            estimated_size,
            preview,
        }
    };

    let to = header_addresses(&parsed.headers, "To");
    let display_to = to
        .iter()
        .map(|a| a.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string);

    let attachments = if format == BodyPreference::Mime {
        Vec::new()
    } else {
        collect_attachments(&parsed, ctx)
    };

    Ok(StructuredMailItem {
        subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
        from: parsed.headers.get_first_value("From"),
        to: to.iter().map(|a| a.display()).collect(),
        cc: header_addresses(&parsed.headers, "Cc")
            .iter()
            .map(|a| a.display())
            .collect(),
        reply_to: header_addresses(&parsed.headers, "Reply-To")
            .iter()
            .map(|a| a.display())
            .collect(),
        display_to,
        date_received: parsed
            .headers
            .get_first_value("Date")
            .and_then(|d| parse_mail_date(&d)),
        thread_topic: parsed.headers.get_first_value("Thread-Topic"),
        message_class: "IPM.Note".to_string(),
        importance: importance(&parsed),
        read: ctx.read,
        flag: Some(if ctx.starred {
            MailFlag::follow_up()
        } else {
            MailFlag::clear()
        }),
        body,
        attachments,
    })
}

/// Byte-level cut for documents that are not necessarily UTF-8.
fn truncate_bytes(raw: &[u8], budget: Option<usize>) -> (&[u8], bool) {
    match budget {
        Some(max) if raw.len() > max => (&raw[..max], true),
        _ => (raw, false),
    }
}

/// Body of the leaf at `part_index`, using the same numbering as the
/// attachment references handed out by [`to_structured_mail`].
pub fn attachment_data(raw: &[u8], part_index: usize) -> Result<Option<AttachmentData>> {
    let parsed = mailparse::parse_mail(raw)?;
    let leaves = leaf_parts(&parsed);
    let Some(part) = leaves.get(part_index) else {
        return Ok(None);
    };
    Ok(Some(AttachmentData {
        content_type: part.ctype.mimetype.to_ascii_lowercase(),
        data: part.get_body_raw()?,
    }))
}

fn importance(parsed: &ParsedMail) -> Importance {
    let Some(raw) = parsed.headers.get_first_value("X-Priority") else {
        return Importance::Normal;
    };
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u32>() {
        Ok(p) if p > 3 => Importance::Low,
        Ok(3) => Importance::Normal,
        Ok(_) => Importance::High,
        Err(_) => Importance::Normal,
    }
}

fn collect_attachments(parsed: &ParsedMail, ctx: &ItemContext<'_>) -> Vec<MailAttachment> {
    let mut out = Vec::new();
    for (index, part) in leaf_parts(parsed).into_iter().enumerate() {
        let disposition = disposition(part);
        let marked = matches!(
            disposition,
            Some(DispositionType::Attachment | DispositionType::Inline)
        );
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        let is_text = mimetype
            .parse::<mime::Mime>()
            .map(|m| m.type_() == mime::TEXT)
            .unwrap_or(false);
        // Unnamed inline text is already part of the body.
        let inline_unnamed =
            matches!(disposition, Some(DispositionType::Inline)) && part_name(part).is_none();
        if is_text && (!marked || inline_unnamed) {
            continue;
        }
        let size = part
            .get_content_disposition()
            .params
            .get("size")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or_else(|| part.get_body_raw().map(|b| b.len()).unwrap_or(0));
        let content_id = part
            .headers
            .get_first_value("Content-ID")
            .map(|cid| cid.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|cid| !cid.is_empty());
        out.push(MailAttachment {
            display_name: part_name(part).unwrap_or_else(|| "unknown attachment".to_string()),
            reference: AttachmentRef {
                folder_id: ctx.folder_id.clone(),
                item_id: ctx.item_id.to_string(),
                part_index: index,
            },
            mime_type: mimetype,
            size,
            content_id,
            is_inline: matches!(disposition, Some(DispositionType::Inline)),
        });
    }
    out
}
