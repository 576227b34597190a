use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail};

use pushgate_core::normalize_crlf;

mod contact;
mod inbound;
mod outbound;
mod vcard;

pub use contact::{card_to_contact, contact_to_card};
pub use inbound::{ItemContext, attachment_data, to_structured_mail};
pub use outbound::{ComposeOptions, OriginalContext, OutgoingMail, compose_outgoing};
pub use vcard::{VCard, VCardProperty};

const TEXT_WIDTH: usize = 1000;

pub fn html_to_text(html: &str) -> String {
    let sanitized = ammonia::Builder::default().clean(html).to_string();
    let text = html2text::from_read(sanitized.as_bytes(), TEXT_WIDTH);
    let text = html_escape::decode_html_entities(&text);
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Like [`html_to_text`], but leaves text without markup untouched.
pub fn strip_markup(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let looks_like_html = lower.contains("</") || lower.contains("<br") || lower.contains("<p>");
    if looks_like_html {
        html_to_text(text)
    } else {
        text.to_string()
    }
}

/// Plain body of a message, falling back to the HTML body rendered as text.
pub fn extract_body_text(parsed: &ParsedMail) -> String {
    let mut plain = String::new();
    collect_text(parsed, "plain", &mut plain);
    if plain.is_empty() {
        let mut html = String::new();
        collect_text(parsed, "html", &mut html);
        plain = html_to_text(&html);
    }
    normalize_crlf(&plain)
}

pub(crate) fn collect_text(part: &ParsedMail, subtype: &str, out: &mut String) {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        if mimetype.strip_prefix("text/") == Some(subtype) {
            if let Ok(body) = part.get_body() {
                out.push_str(&body);
            }
        }
        return;
    }
    for sub in &part.subparts {
        if matches!(disposition(sub), Some(DispositionType::Attachment)) {
            continue;
        }
        collect_text(sub, subtype, out);
    }
}

/// Disposition of a part, `None` when the header is absent.
pub(crate) fn disposition(part: &ParsedMail) -> Option<DispositionType> {
    part.headers.get_first_value("Content-Disposition")?;
    Some(part.get_content_disposition().disposition)
}

/// Depth-first list of non-container parts. A single-part message has none.
pub(crate) fn leaf_parts<'m, 'a>(parsed: &'m ParsedMail<'a>) -> Vec<&'m ParsedMail<'a>> {
    let mut out = Vec::new();
    if !parsed.subparts.is_empty() {
        push_leaves(parsed, &mut out);
    }
    out
}

fn push_leaves<'m, 'a>(part: &'m ParsedMail<'a>, out: &mut Vec<&'m ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        out.push(part);
        return;
    }
    for sub in &part.subparts {
        push_leaves(sub, out);
    }
}

pub(crate) fn part_name(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
        .or_else(|| part.headers.get_first_value("Content-Description"))
        .filter(|name| !name.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Address {
    pub name: String,
    pub addr: String,
}

impl Address {
    pub fn display(&self) -> String {
        format_address(&self.name, &self.addr)
    }
}

pub(crate) fn header_addresses(headers: &[MailHeader], key: &str) -> Vec<Address> {
    let mut out = Vec::new();
    for header in headers.get_all_headers(key) {
        let Ok(list) = mailparse::addrparse_header(header) else {
            continue;
        };
        for entry in list.iter() {
            match entry {
                MailAddr::Single(info) => out.push(Address {
                    name: info.display_name.clone().unwrap_or_default(),
                    addr: info.addr.clone(),
                }),
                MailAddr::Group(group) => {
                    for info in &group.addrs {
                        out.push(Address {
                            name: info.display_name.clone().unwrap_or_default(),
                            addr: info.addr.clone(),
                        });
                    }
                }
            }
        }
    }
    out
}

/// `addr` alone when the name adds nothing, otherwise `"name" <addr>`.
pub fn format_address(name: &str, addr: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == addr {
        return addr.to_string();
    }
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        return format!("{name} <{addr}>");
    }
    format!("\"{}\" <{addr}>", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Epoch seconds of an RFC 2822 date, ignoring trailing comments like `(CET)`.
pub fn parse_mail_date(raw: &str) -> Option<i64> {
    let mut cleaned = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }
    mailparse::dateparse(cleaned.trim()).ok()
}
