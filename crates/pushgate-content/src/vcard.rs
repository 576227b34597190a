use std::fmt;

use pushgate_core::{GatewayError, Result};

const FOLD_WIDTH: usize = 75;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VCardProperty {
    /// Upper-cased, with any `group.` prefix removed.
    pub name: String,
    /// Upper-cased keys; `TYPE` values are kept in `types` instead.
    pub params: Vec<(String, String)>,
    /// Lower-cased type tags, from `TYPE=` lists and bare parameters.
    pub types: Vec<String>,
    /// Value as it appears on the wire, still escaped.
    pub value: String,
}

impl VCardProperty {
    pub fn text(name: &str, value: &str) -> Self {
        VCardProperty {
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            types: Vec::new(),
            value: escape(value),
        }
    }

    pub fn structured(name: &str, components: &[&str]) -> Self {
        let value = components
            .iter()
            .map(|c| escape(c))
            .collect::<Vec<_>>()
            .join(";");
        VCardProperty {
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            types: Vec::new(),
            value,
        }
    }

    pub fn list(name: &str, items: &[String]) -> Self {
        let value = items
            .iter()
            .map(|c| escape(c))
            .collect::<Vec<_>>()
            .join(",");
        VCardProperty {
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            types: Vec::new(),
            value,
        }
    }

    /// Value written verbatim, for payloads like base64 that need no escaping.
    pub fn raw(name: &str, value: String) -> Self {
        VCardProperty {
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            types: Vec::new(),
            value,
        }
    }

    pub fn with_type(mut self, kind: &str) -> Self {
        self.types.push(kind.to_ascii_lowercase());
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_ascii_uppercase(), value.to_string()));
        self
    }

    pub fn has_type(&self, kind: &str) -> bool {
        self.types.iter().any(|t| t.eq_ignore_ascii_case(kind))
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn decoded_value(&self) -> String {
        if self
            .param("ENCODING")
            .is_some_and(|e| e.eq_ignore_ascii_case("QUOTED-PRINTABLE"))
        {
            if let Ok(decoded) = quoted_printable::decode(
                self.value.as_bytes(),
                quoted_printable::ParseMode::Robust,
            ) {
                return String::from_utf8_lossy(&decoded).into_owned();
            }
        }
        self.value.clone()
    }

    pub fn unescaped(&self) -> String {
        unescape(&self.decoded_value())
    }

    /// `;`-separated components, each unescaped.
    pub fn components(&self) -> Vec<String> {
        split_unescaped(&self.decoded_value(), ';')
    }

    /// `,`-separated items, each unescaped.
    pub fn items(&self) -> Vec<String> {
        split_unescaped(&self.decoded_value(), ',')
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_line(line: &str) -> Option<VCardProperty> {
        let colon = find_value_colon(line)?;
        let (head, value) = (&line[..colon], &line[colon + 1..]);
        let mut segments = head.split(';');
        let name = segments.next()?.trim();
        let name = name.rsplit('.').next().unwrap_or(name).to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }
        let mut params = Vec::new();
        let mut types = Vec::new();
        for segment in segments {
            match segment.split_once('=') {
                Some((key, val)) if key.eq_ignore_ascii_case("TYPE") => {
                    types.extend(
                        val.trim_matches('"')
                            .split(',')
                            .map(|t| t.trim().to_ascii_lowercase())
                            .filter(|t| !t.is_empty()),
                    );
                }
                Some((key, val)) => {
                    params.push((key.trim().to_ascii_uppercase(), val.trim_matches('"').to_string()))
                }
                None if segment.eq_ignore_ascii_case("QUOTED-PRINTABLE")
                    || segment.eq_ignore_ascii_case("BASE64") =>
                {
                    params.push(("ENCODING".to_string(), segment.to_ascii_uppercase()))
                }
                None => types.push(segment.trim().to_ascii_lowercase()),
            }
        }
        Some(VCardProperty {
            name,
            params,
            types,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for VCardProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = self.name.clone();
        if !self.types.is_empty() {
            line.push_str(";TYPE=");
            line.push_str(&self.types.join(","));
        }
        for (key, value) in &self.params {
            line.push_str(&format!(";{key}={value}"));
        }
        line.push(':');
        line.push_str(&self.value);
        f.write_str(&fold(&line))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    pub properties: Vec<VCardProperty>,
}

impl VCard {
    pub fn parse(text: &str) -> Result<VCard> {
        let mut lines: Vec<String> = Vec::new();
        for raw in text.split('\n') {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            if let Some(rest) = raw.strip_prefix([' ', '\t']) {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                    continue;
                }
            }
            // Soft line breaks of quoted-printable values continue on the next line.
            if let Some(last) = lines.last_mut() {
                if last.ends_with('=') && last.to_ascii_uppercase().contains("QUOTED-PRINTABLE") {
                    last.pop();
                    last.push_str(raw);
                    continue;
                }
            }
            lines.push(raw.to_string());
        }

        let mut inside = false;
        let mut closed = false;
        let mut properties = Vec::new();
        for line in lines.iter().filter(|l| !l.trim().is_empty()) {
            let Some(property) = VCardProperty::parse_line(line) else {
                continue;
            };
            match (property.name.as_str(), property.value.trim().to_ascii_uppercase().as_str()) {
                ("BEGIN", "VCARD") => inside = true,
                ("END", "VCARD") => {
                    closed = inside;
                    break;
                }
                _ if inside => properties.push(property),
                _ => {}
            }
        }
        if !closed {
            return Err(GatewayError::MalformedContent(
                "card is not wrapped in BEGIN:VCARD/END:VCARD".to_string(),
            ));
        }
        Ok(VCard { properties })
    }

    pub fn first(&self, name: &str) -> Option<&VCardProperty> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VCardProperty> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn push(&mut self, property: VCardProperty) {
        self.properties.push(property);
    }
}

impl fmt::Display for VCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BEGIN:VCARD\r\n")?;
        for property in &self.properties {
            write!(f, "{property}\r\n")?;
        }
        f.write_str("END:VCARD\r\n")
    }
}

/// Index of the colon separating the property head from its value,
/// skipping colons inside quoted parameter values.
fn find_value_colon(line: &str) -> Option<usize> {
    let mut quoted = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ':' if !quoted => return Some(idx),
            _ => {}
        }
    }
    None
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn split_unescaped(value: &str, separator: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            current.push(ch);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if ch == separator {
            out.push(unescape(&current));
            current.clear();
        } else {
            current.push(ch);
        }
    }
    out.push(unescape(&current));
    out
}

fn fold(line: &str) -> String {
    if line.len() <= FOLD_WIDTH {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / FOLD_WIDTH * 3);
    let mut width = 0;
    let mut limit = FOLD_WIDTH;
    for ch in line.chars() {
        if width + ch.len_utf8() > limit {
            out.push_str("\r\n ");
            width = 0;
            limit = FOLD_WIDTH - 1;
        }
        out.push(ch);
        width += ch.len_utf8();
    }
    out
}
