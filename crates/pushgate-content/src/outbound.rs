use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use mailparse::{DispositionType, MailHeaderMap, ParsedContentType, ParsedMail};
use rand_core::{OsRng, RngCore};
use tracing::debug;

use pushgate_core::{Result, normalize_crlf};

use crate::{Address, disposition, extract_body_text, header_addresses, leaf_parts, part_name};

const MULTIPART_PREAMBLE: &str = "This is a multi-part message in MIME format";
const FORWARD_FILE_NAME: &str = "forwarded_message.eml";
const BASE64_LINE: usize = 76;

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Used for `From` and `Return-Path` when the device leaves them out.
    pub default_from: Option<String>,
    /// Quote the original into the body instead of attaching it as a file.
    pub inline_forward: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum OriginalContext<'a> {
    Reply(&'a [u8]),
    Forward(&'a [u8]),
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub envelope_from: Option<String>,
    pub recipients: Vec<String>,
    /// Document handed to the relay; carries no `Bcc` header.
    pub message: Vec<u8>,
    /// Document stored in the sent folder.
    pub sent_copy: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferEncoding {
    SevenBit,
    EightBit,
    QuotedPrintable,
    Base64,
    Binary,
}

impl TransferEncoding {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("quoted-printable") => TransferEncoding::QuotedPrintable,
            Some("base64") => TransferEncoding::Base64,
            Some("8bit") => TransferEncoding::EightBit,
            Some("binary") => TransferEncoding::Binary,
            _ => TransferEncoding::SevenBit,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
            TransferEncoding::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone)]
enum Content {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Leaf {
    mimetype: String,
    content_type: String,
    encoding: TransferEncoding,
    headers: Vec<(String, String)>,
    is_attachment: bool,
    content: Content,
}

impl Leaf {
    fn append_text(&mut self, extra: &str) {
        if let Content::Text(text) = &mut self.content {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push_str("\r\n");
            }
            text.push_str(extra);
        }
    }

    fn append_html(&mut self, extra: &str) {
        let Content::Text(html) = &mut self.content else {
            return;
        };
        let block = format!("<pre>{}</pre>", html_escape::encode_text(extra));
        match html.to_ascii_lowercase().rfind("</body>") {
            Some(pos) => html.insert_str(pos, &block),
            None => html.push_str(&block),
        }
    }

    fn encoded_body(&self) -> Vec<u8> {
        let bytes = match &self.content {
            Content::Text(text) => normalize_crlf(text).into_bytes(),
            Content::Bytes(bytes) => bytes.clone(),
        };
        match self.effective_encoding() {
            TransferEncoding::Base64 => wrap_base64(&bytes),
            TransferEncoding::QuotedPrintable => quoted_printable::encode(&bytes),
            _ => bytes,
        }
    }

    /// 7bit text that gained non-ASCII characters is promoted to quoted-printable.
    fn effective_encoding(&self) -> TransferEncoding {
        match (&self.content, self.encoding) {
            (Content::Text(text), TransferEncoding::SevenBit) if !text.is_ascii() => {
                TransferEncoding::QuotedPrintable
            }
            (_, encoding) => encoding,
        }
    }
}

#[derive(Debug, Clone)]
enum Part {
    Leaf(Leaf),
    Multipart {
        subtype: String,
        boundary: String,
        parts: Vec<Part>,
    },
}

impl Part {
    fn from_parsed(parsed: &ParsedMail, is_root: bool) -> Result<Part> {
        if !parsed.subparts.is_empty() {
            let subtype = parsed
                .ctype
                .mimetype
                .split_once('/')
                .map(|(_, sub)| sub.to_ascii_lowercase())
                .unwrap_or_else(|| "mixed".to_string());
            let boundary = parsed
                .ctype
                .params
                .get("boundary")
                .cloned()
                .unwrap_or_else(new_boundary);
            let parts = parsed
                .subparts
                .iter()
                .map(|sub| Part::from_parsed(sub, false))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Part::Multipart {
                subtype,
                boundary,
                parts,
            });
        }

        let mimetype = parsed.ctype.mimetype.to_ascii_lowercase();
        let encoding = TransferEncoding::parse(
            parsed
                .headers
                .get_first_value("Content-Transfer-Encoding")
                .as_deref(),
        );
        let headers = if is_root {
            Vec::new()
        } else {
            parsed
                .headers
                .iter()
                .filter(|h| !is_content_framing(&h.get_key_ref()))
                .map(|h| (h.get_key(), raw_header_value(h.get_value_raw())))
                .collect()
        };
        let is_attachment = matches!(disposition(parsed), Some(DispositionType::Attachment));
        let (content_type, content) = if mimetype.starts_with("text/") {
            (utf8_content_type(&parsed.ctype), Content::Text(parsed.get_body()?))
        } else {
            let declared = parsed
                .headers
                .get_first_value("Content-Type")
                .unwrap_or_else(|| mimetype.clone());
            (declared, Content::Bytes(parsed.get_body_raw()?))
        };
        Ok(Part::Leaf(Leaf {
            mimetype,
            content_type,
            encoding,
            headers,
            is_attachment,
            content,
        }))
    }

    fn first_body_leaf(&mut self, mimetype: &str) -> Option<&mut Leaf> {
        match self {
            Part::Leaf(leaf) if leaf.mimetype == mimetype && !leaf.is_attachment => Some(leaf),
            Part::Leaf(_) => None,
            Part::Multipart { parts, .. } => parts
                .iter_mut()
                .find_map(|part| part.first_body_leaf(mimetype)),
        }
    }

    /// Adds `extras` to a top-level `multipart/mixed`, wrapping the
    /// current tree in a new one when it is anything else.
    fn attach(self, extras: Vec<Leaf>) -> Part {
        if extras.is_empty() {
            return self;
        }
        let extras = extras.into_iter().map(Part::Leaf);
        match self {
            Part::Multipart {
                subtype,
                boundary,
                mut parts,
            } if subtype == "mixed" => {
                parts.extend(extras);
                Part::Multipart {
                    subtype,
                    boundary,
                    parts,
                }
            }
            other => {
                let mut parts = vec![other];
                parts.extend(extras);
                Part::Multipart {
                    subtype: "mixed".to_string(),
                    boundary: new_boundary(),
                    parts,
                }
            }
        }
    }

    fn write_headers(&self, out: &mut Vec<u8>) {
        match self {
            Part::Leaf(leaf) => {
                push_header(out, "Content-Type", &leaf.content_type);
                push_header(
                    out,
                    "Content-Transfer-Encoding",
                    leaf.effective_encoding().as_str(),
                );
                for (key, value) in &leaf.headers {
                    push_header(out, key, value);
                }
            }
            Part::Multipart {
                subtype, boundary, ..
            } => {
                push_header(
                    out,
                    "Content-Type",
                    &format!("multipart/{subtype}; boundary=\"{boundary}\""),
                );
            }
        }
    }

    fn write_body(&self, out: &mut Vec<u8>, top_level: bool) {
        match self {
            Part::Leaf(leaf) => out.extend_from_slice(&leaf.encoded_body()),
            Part::Multipart {
                boundary, parts, ..
            } => {
                if top_level {
                    out.extend_from_slice(MULTIPART_PREAMBLE.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                for part in parts {
                    out.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
                    part.write_headers(out);
                    out.extend_from_slice(b"\r\n");
                    part.write_body(out, false);
                }
                out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
            }
        }
    }
}

/// Builds the outgoing document for a device submission, merging in the
/// replied-to or forwarded original when there is one.
pub fn compose_outgoing(
    mime: &[u8],
    original: Option<OriginalContext<'_>>,
    options: &ComposeOptions,
) -> Result<OutgoingMail> {
    let parsed = mailparse::parse_mail(mime)?;

    let mut kept: Vec<(String, String)> = Vec::new();
    let mut subject = String::new();
    let mut has_from = false;
    let mut has_return_path = false;
    let mut has_date = false;
    for header in parsed.headers.iter() {
        let key = header.get_key_ref().to_ascii_lowercase();
        let value = raw_header_value(header.get_value_raw());
        match key.as_str() {
            "subject" => subject = value,
            "to" | "cc" | "bcc" => {}
            k if is_content_framing(k) || k == "mime-version" => {}
            "from" | "return-path" if value.is_empty() => {}
            _ => {
                has_from |= key == "from";
                has_return_path |= key == "return-path";
                has_date |= key == "date";
                kept.push((header.get_key(), value));
            }
        }
    }
    if let Some(default_from) = options.default_from.as_deref() {
        if !has_from {
            kept.push(("From".to_string(), default_from.to_string()));
        }
        if !has_return_path {
            kept.push(("Return-Path".to_string(), default_from.to_string()));
        }
    }
    if !has_date {
        kept.push(("Date".to_string(), chrono::Utc::now().to_rfc2822()));
    }

    let to = header_addresses(&parsed.headers, "To");
    let cc = header_addresses(&parsed.headers, "Cc");
    let bcc = header_addresses(&parsed.headers, "Bcc");

    let mut root = Part::from_parsed(&parsed, true)?;
    match original {
        None => {}
        Some(OriginalContext::Reply(raw)) => {
            let original = mailparse::parse_mail(raw)?;
            let quoted = format!("\r\n{}", extract_body_text(&original));
            append_to_body(&mut root, &quoted);
        }
        Some(OriginalContext::Forward(raw)) if options.inline_forward => {
            let original = mailparse::parse_mail(raw)?;
            let quote = format!("\r\n\r\n{}", quote_block(&original));
            append_to_body(&mut root, &quote);
            let extras = reattachable_parts(&original)?;
            debug!(count = extras.len(), "inline forward re-attaching parts");
            root = root.attach(extras);
        }
        Some(OriginalContext::Forward(raw)) => {
            root = root.attach(vec![forwarded_file(raw)]);
        }
    }

    let envelope_from = kept
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("from"))
        .and_then(|(_, v)| first_address(v))
        .or_else(|| options.default_from.as_deref().and_then(first_address));
    let mut recipients: Vec<String> = Vec::new();
    for address in to.iter().chain(cc.iter()).chain(bcc.iter()) {
        if !recipients.contains(&address.addr) {
            recipients.push(address.addr.clone());
        }
    }

    let message = render_document(&kept, &to, &cc, None, &subject, &root);
    let sent_copy = render_document(&kept, &to, &cc, Some(bcc.as_slice()), &subject, &root);
    Ok(OutgoingMail {
        envelope_from,
        recipients,
        message,
        sent_copy,
    })
}

fn append_to_body(root: &mut Part, text: &str) {
    let mut placed = false;
    if let Some(leaf) = root.first_body_leaf("text/plain") {
        leaf.append_text(text);
        placed = true;
    }
    if let Some(leaf) = root.first_body_leaf("text/html") {
        leaf.append_html(text);
        placed = true;
    }
    if !placed {
        debug!("no text body to extend, adding one");
        let body = Leaf {
            mimetype: "text/plain".to_string(),
            content_type: "text/plain; charset=\"utf-8\"".to_string(),
            encoding: TransferEncoding::QuotedPrintable,
            headers: Vec::new(),
            is_attachment: false,
            content: Content::Text(text.trim_start().to_string()),
        };
        let current = std::mem::replace(
            root,
            Part::Multipart {
                subtype: "mixed".to_string(),
                boundary: String::new(),
                parts: Vec::new(),
            },
        );
        *root = Part::Multipart {
            subtype: "mixed".to_string(),
            boundary: new_boundary(),
            parts: vec![Part::Leaf(body), current],
        };
    }
}

fn quote_block(original: &ParsedMail) -> String {
    let headers = &original.headers;
    let mut out = String::from("-----Original Message-----\r\n");
    if let Some(from) = headers.get_first_value("From") {
        out.push_str(&format!("From: {from}\r\n"));
    }
    for key in ["To", "Cc"] {
        if let Some(value) = headers.get_first_value(key).filter(|v| !v.is_empty()) {
            out.push_str(&format!("{key}: {value}\r\n"));
        }
    }
    if let Some(date) = headers.get_first_value("Date") {
        out.push_str(&format!("Sent: {date}\r\n"));
    }
    if let Some(subject) = headers.get_first_value("Subject") {
        out.push_str(&format!("Subject: {subject}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(&extract_body_text(original));
    out
}

fn reattachable_parts(original: &ParsedMail) -> Result<Vec<Leaf>> {
    let mut out = Vec::new();
    for part in leaf_parts(original) {
        let kind = disposition(part);
        if !matches!(
            kind,
            Some(DispositionType::Attachment | DispositionType::Inline)
        ) {
            continue;
        }
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "text/html" {
            continue;
        }
        let name = part_name(part).unwrap_or_else(|| "unknown attachment".to_string());
        let disposition_kind = if matches!(kind, Some(DispositionType::Inline)) {
            "inline"
        } else {
            "attachment"
        };
        let mut headers = vec![(
            "Content-Disposition".to_string(),
            format!("{disposition_kind}; filename=\"{}\"", quote_param(&name)),
        )];
        if let Some(cid) = part.headers.get_first_value("Content-ID") {
            headers.push(("Content-ID".to_string(), cid));
        }
        out.push(Leaf {
            content_type: format!("{mimetype}; name=\"{}\"", quote_param(&name)),
            mimetype,
            encoding: TransferEncoding::Base64,
            headers,
            is_attachment: true,
            content: Content::Bytes(part.get_body_raw()?),
        });
    }
    Ok(out)
}

fn forwarded_file(raw: &[u8]) -> Leaf {
    let mimetype = mime_guess::from_path(FORWARD_FILE_NAME)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "message/rfc822".to_string());
    // message/* bodies may not be base64 or quoted-printable encoded.
    let encoding = if !mimetype.starts_with("message/") {
        TransferEncoding::Base64
    } else if raw.is_ascii() {
        TransferEncoding::SevenBit
    } else {
        TransferEncoding::EightBit
    };
    Leaf {
        content_type: format!("{mimetype}; name=\"{FORWARD_FILE_NAME}\""),
        mimetype,
        encoding,
        headers: vec![
            (
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{FORWARD_FILE_NAME}\""),
            ),
            ("Content-Description".to_string(), FORWARD_FILE_NAME.to_string()),
        ],
        is_attachment: true,
        content: Content::Bytes(raw.to_vec()),
    }
}

fn render_document(
    kept: &[(String, String)],
    to: &[Address],
    cc: &[Address],
    bcc: Option<&[Address]>,
    subject: &str,
    root: &Part,
) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in kept {
        push_header(&mut out, key, value);
    }
    for (key, list) in [("To", Some(to)), ("Cc", Some(cc)), ("Bcc", bcc)] {
        if let Some(list) = list.filter(|l| !l.is_empty()) {
            let joined = list.iter().map(Address::display).collect::<Vec<_>>().join(", ");
            push_header(&mut out, key, &joined);
        }
    }
    push_header(&mut out, "Subject", subject);
    push_header(&mut out, "MIME-Version", "1.0");
    root.write_headers(&mut out);
    out.extend_from_slice(b"\r\n");
    root.write_body(&mut out, true);
    out
}

fn push_header(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
}

fn is_content_framing(key: &str) -> bool {
    key.eq_ignore_ascii_case("content-type") || key.eq_ignore_ascii_case("content-transfer-encoding")
}

fn raw_header_value(raw: &[u8]) -> String {
    normalize_crlf(String::from_utf8_lossy(raw).trim())
}

/// Content type of a decoded text part, with the charset forced to UTF-8.
fn utf8_content_type(ctype: &ParsedContentType) -> String {
    let mut out = format!("{}; charset=\"utf-8\"", ctype.mimetype.to_ascii_lowercase());
    let mut params: Vec<(&String, &String)> = ctype
        .params
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("charset"))
        .collect();
    params.sort();
    for (key, value) in params {
        out.push_str(&format!("; {key}=\"{}\"", quote_param(value)));
    }
    out
}

fn quote_param(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn first_address(value: &str) -> Option<String> {
    let list = mailparse::addrparse(value).ok()?;
    list.iter().find_map(|entry| match entry {
        mailparse::MailAddr::Single(info) => Some(info.addr.clone()),
        mailparse::MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
    })
}

fn wrap_base64(bytes: &[u8]) -> Vec<u8> {
    let encoded = BASE64_STD.encode(bytes);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn new_boundary() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
