use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use pushgate_core::{
    BodyRequest, ContactBody, ContactField, Result, StructuredContactItem, normalize_crlf,
    truncate_body,
};

use crate::strip_markup;
use crate::vcard::{VCard, VCardProperty};

const PRODID: &str = "-//pushgate//NONSGML pushgate AddressBook//EN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selector {
    Whole,
    Typed(&'static str),
    /// Any occurrence; fills the first slot still empty.
    Any,
    Component(usize),
    TypedComponent(&'static str, usize),
}

impl Selector {
    fn type_tag(self) -> Option<&'static str> {
        match self {
            Selector::Typed(t) | Selector::TypedComponent(t, _) => Some(t),
            _ => None,
        }
    }

    fn component(self) -> Option<usize> {
        match self {
            Selector::Component(i) | Selector::TypedComponent(_, i) => Some(i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Both,
    InboundOnly,
}

#[derive(Debug, Clone, Copy)]
struct FieldRule {
    property: &'static str,
    selector: Selector,
    field: ContactField,
    direction: Direction,
}

impl FieldRule {
    fn applies_to(&self, property: &VCardProperty) -> bool {
        property.name == self.property
            && self.selector.type_tag().is_none_or(|t| property.has_type(t))
    }
}

const fn rule(property: &'static str, selector: Selector, field: ContactField) -> FieldRule {
    FieldRule {
        property,
        selector,
        field,
        direction: Direction::Both,
    }
}

const fn inbound(property: &'static str, selector: Selector, field: ContactField) -> FieldRule {
    FieldRule {
        property,
        selector,
        field,
        direction: Direction::InboundOnly,
    }
}

fn address_rules(kind: &'static str, fields: [ContactField; 5]) -> [FieldRule; 5] {
    let mut out = [rule("ADR", Selector::TypedComponent(kind, 2), fields[0]); 5];
    for (offset, field) in fields.into_iter().enumerate() {
        out[offset] = rule("ADR", Selector::TypedComponent(kind, offset + 2), field);
    }
    out
}

/// Ordered mapping between card properties and contact fields. Within a
/// property, more specific rules come first.
fn field_rules() -> &'static [FieldRule] {
    static RULES: OnceLock<Vec<FieldRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        use ContactField::*;
        let mut rules = vec![
            rule("FN", Selector::Whole, FileAs),
            rule("N", Selector::Component(0), LastName),
            rule("N", Selector::Component(1), FirstName),
            rule("TEL", Selector::Typed("cell"), MobilePhone),
            rule("TEL", Selector::Typed("fax"), BusinessFax),
            rule("TEL", Selector::Typed("pager"), Pager),
            rule("TEL", Selector::Typed("home"), HomePhone),
            rule("TEL", Selector::Typed("work"), BusinessPhone),
            rule("EMAIL", Selector::Typed("work"), Email1),
            rule("EMAIL", Selector::Typed("home"), Email2),
            inbound("EMAIL", Selector::Any, Email1),
            inbound("EMAIL", Selector::Any, Email2),
            inbound("EMAIL", Selector::Any, Email3),
            rule("URL", Selector::Typed("work"), WebPage),
            rule("TITLE", Selector::Whole, JobTitle),
            rule("ORG", Selector::Component(0), CompanyName),
            rule("ORG", Selector::Component(1), Department),
            rule("X-AIM", Selector::Whole, ImAddress),
        ];
        rules.extend(address_rules(
            "work",
            [
                BusinessStreet,
                BusinessCity,
                BusinessState,
                BusinessPostalCode,
                BusinessCountry,
            ],
        ));
        rules.extend(address_rules(
            "home",
            [HomeStreet, HomeCity, HomeState, HomePostalCode, HomeCountry],
        ));
        rules
    })
}

/// Maps a card document onto a contact item. Properties without a rule
/// are dropped.
pub fn card_to_contact(text: &str, request: &BodyRequest) -> Result<StructuredContactItem> {
    let card = VCard::parse(text)?;
    let rules = field_rules();
    let mut contact = StructuredContactItem::default();

    for property in &card.properties {
        let mut components: Option<Vec<String>> = None;
        for rule in rules.iter().filter(|r| r.applies_to(property)) {
            if contact.is_field_set(rule.field) {
                continue;
            }
            match rule.selector.component() {
                Some(idx) => {
                    let parts = components.get_or_insert_with(|| property.components());
                    if let Some(value) = parts.get(idx).map(|v| v.trim()) {
                        contact.set_field(rule.field, value);
                    }
                }
                None => {
                    let value = property.unescaped();
                    let value = value.trim();
                    if !value.is_empty() {
                        contact.set_field(rule.field, value);
                        break;
                    }
                }
            }
        }
    }

    if let Some(note) = card.first("NOTE") {
        let text = normalize_crlf(&strip_markup(&note.unescaped()));
        if !text.trim().is_empty() {
            let (data, truncated, estimated_size) = truncate_body(text, request.truncation_size);
            contact.body = Some(ContactBody {
                data,
                truncated,
                estimated_size,
            });
        }
    }
    if let Some(bday) = card.first("BDAY") {
        contact.birthday = parse_birthday(&bday.unescaped());
        if contact.birthday.is_none() {
            debug!(value = %bday.value, "unparsed birthday");
        }
    }
    if let Some(photo) = card.first("PHOTO") {
        contact.picture = decode_photo(photo);
    }
    contact.categories = card.all("CATEGORIES").flat_map(|p| p.items()).collect();
    contact.nickname = card
        .first("NICKNAME")
        .and_then(|p| p.items().into_iter().next());

    Ok(contact)
}

/// Builds a vCard 3.0 document for a contact item.
pub fn contact_to_card(contact: &StructuredContactItem, id: &str) -> String {
    let mut card = VCard::default();
    card.push(VCardProperty::text("VERSION", "3.0"));
    card.push(VCardProperty::raw("UID", format!("{id}.vcf")));
    card.push(VCardProperty::raw("PRODID", PRODID.to_string()));

    // Component rules sharing a property and type build one structured value.
    let mut structured: Vec<(&'static str, Option<&'static str>, Vec<String>)> = Vec::new();
    for rule in field_rules().iter().filter(|r| r.direction == Direction::Both) {
        let type_tag = rule.selector.type_tag();
        match rule.selector.component() {
            Some(idx) => {
                let pos = structured
                    .iter()
                    .position(|(p, t, _)| *p == rule.property && *t == type_tag)
                    .unwrap_or_else(|| {
                        structured.push((rule.property, type_tag, Vec::new()));
                        structured.len() - 1
                    });
                let parts = &mut structured[pos].2;
                if parts.len() <= idx {
                    parts.resize(idx + 1, String::new());
                }
                if let Some(value) = contact.field(rule.field) {
                    parts[idx] = value.to_string();
                }
            }
            None => {
                let Some(value) = contact.field(rule.field) else {
                    continue;
                };
                let mut property = VCardProperty::text(rule.property, value);
                if let Some(t) = type_tag {
                    property = property.with_type(t);
                }
                card.push(property);
            }
        }
    }
    for (name, type_tag, parts) in structured {
        if parts.iter().all(|p| p.is_empty()) {
            continue;
        }
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let mut property = VCardProperty::structured(name, &refs);
        if let Some(t) = type_tag {
            property = property.with_type(t);
        }
        card.push(property);
    }

    if let Some(nickname) = contact.nickname.as_deref().filter(|n| !n.is_empty()) {
        card.push(VCardProperty::text("NICKNAME", nickname));
    }
    if let Some(body) = contact.body.as_ref().filter(|b| !b.data.is_empty()) {
        card.push(VCardProperty::text("NOTE", &body.data));
    }
    if !contact.categories.is_empty() {
        card.push(VCardProperty::list("CATEGORIES", &contact.categories));
    }
    if let Some(picture) = contact.picture.as_ref().filter(|p| !p.is_empty()) {
        card.push(
            VCardProperty::raw("PHOTO", STANDARD.encode(picture))
                .with_param("ENCODING", "b")
                .with_type("JPEG"),
        );
    }
    if let Some(date) = contact
        .birthday
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    {
        card.push(VCardProperty::raw(
            "BDAY",
            date.format("%Y-%m-%d").to_string(),
        ));
    }
    card.to_string()
}

/// Birthday as UTC epoch seconds at midnight, or at the stated instant.
fn parse_birthday(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for format in ["%Y%m%dT%H%M%SZ", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    for format in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
        }
    }
    None
}

fn decode_photo(property: &VCardProperty) -> Option<Vec<u8>> {
    let value = property.value.trim();
    let payload = match value.strip_prefix("data:") {
        Some(uri) => uri.split_once("base64,")?.1,
        None => value,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(err) => {
            debug!(%err, "photo is not base64");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pushgate_core::{BodyRequest, ContactBody, ContactField, StructuredContactItem};

    use super::{card_to_contact, contact_to_card};

    fn card(lines: &[&str]) -> String {
        let mut text = String::from("BEGIN:VCARD\r\nVERSION:3.0\r\n");
        for line in lines {
            text.push_str(line);
            text.push_str("\r\n");
        }
        text.push_str("END:VCARD\r\n");
        text
    }

    #[test]
    fn organization_survives_a_round_trip() -> anyhow::Result<()> {
        let mut contact = StructuredContactItem::default();
        contact.set_field(ContactField::CompanyName, "Acme");
        contact.set_field(ContactField::Department, "R&D");

        let text = contact_to_card(&contact, "abc");
        assert!(text.contains("ORG:Acme;R&D\r\n"), "{text}");

        let back = card_to_contact(&text, &BodyRequest::plain())?;
        assert_eq!(back.company_name.as_deref(), Some("Acme"));
        assert_eq!(back.department.as_deref(), Some("R&D"));
        Ok(())
    }

    #[test]
    fn home_url_has_no_contact_field() -> anyhow::Result<()> {
        let contact = card_to_contact(
            &card(&["FN:Ann", "URL;TYPE=home:https://ann.example.com"]),
            &BodyRequest::plain(),
        )?;
        assert_eq!(contact.webpage, None);
        assert!(!contact_to_card(&contact, "x").contains("URL"));
        Ok(())
    }

    #[test]
    fn phones_and_emails_map_by_type() -> anyhow::Result<()> {
        let contact = card_to_contact(
            &card(&[
                "N:Lee;Ann;;;",
                "TEL;TYPE=work,fax:555-0199",
                "TEL;TYPE=CELL:555-0150",
                "TEL;TYPE=work:555-0101",
                "EMAIL;TYPE=home:ann@home.example",
                "EMAIL:ann@one.example",
                "EMAIL:ann@two.example",
            ]),
            &BodyRequest::plain(),
        )?;
        assert_eq!(contact.last_name.as_deref(), Some("Lee"));
        assert_eq!(contact.first_name.as_deref(), Some("Ann"));
        assert_eq!(contact.business_fax.as_deref(), Some("555-0199"));
        assert_eq!(contact.mobile_phone.as_deref(), Some("555-0150"));
        assert_eq!(contact.business_phone.as_deref(), Some("555-0101"));
        assert_eq!(contact.email2.as_deref(), Some("ann@home.example"));
        assert_eq!(contact.email1.as_deref(), Some("ann@one.example"));
        assert_eq!(contact.email3.as_deref(), Some("ann@two.example"));
        Ok(())
    }

    #[test]
    fn address_skips_box_and_extended_components() -> anyhow::Result<()> {
        let contact = card_to_contact(
            &card(&["ADR;TYPE=work:PO 7;Suite 3;1 Main St;Springfield;IL;62701;USA"]),
            &BodyRequest::plain(),
        )?;
        assert_eq!(contact.business_street.as_deref(), Some("1 Main St"));
        assert_eq!(contact.business_city.as_deref(), Some("Springfield"));
        assert_eq!(contact.business_country.as_deref(), Some("USA"));

        let text = contact_to_card(&contact, "x");
        assert!(text.contains("ADR;TYPE=work:;;1 Main St;Springfield;IL;62701;USA"), "{text}");
        Ok(())
    }

    #[test]
    fn special_fields_are_converted() -> anyhow::Result<()> {
        let contact = card_to_contact(
            &card(&[
                "BDAY:1980-05-17",
                "NICKNAME:Annie,Nan",
                "CATEGORIES:Friends,Work",
                "PHOTO;ENCODING=b;TYPE=JPEG:/9j/4AAQ",
                "NOTE:<p>Met at the conference</p><p>Call in May</p>",
            ]),
            &BodyRequest::plain(),
        )?;
        assert_eq!(contact.birthday, Some(327_369_600));
        assert_eq!(contact.nickname.as_deref(), Some("Annie"));
        assert_eq!(contact.categories, vec!["Friends".to_string(), "Work".to_string()]);
        assert_eq!(contact.picture, Some(vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10]));
        let body = contact.body.as_ref().ok_or_else(|| anyhow::anyhow!("no body"))?;
        assert!(body.data.contains("Met at the conference"), "{}", body.data);
        assert!(!body.data.contains("<p>"));

        let text = contact_to_card(&contact, "x");
        assert!(text.contains("BDAY:1980-05-17\r\n"));
        assert!(text.contains("CATEGORIES:Friends,Work\r\n"));
        assert!(text.contains("PHOTO;TYPE=jpeg;ENCODING=b:/9j/4AAQ\r\n"), "{text}");
        Ok(())
    }

    #[test]
    fn data_uri_photo_and_compact_birthday() -> anyhow::Result<()> {
        let contact = card_to_contact(
            &card(&["PHOTO:data:image/jpeg;base64,/9j/4AAQ", "BDAY:19800517"]),
            &BodyRequest::plain(),
        )?;
        assert_eq!(contact.birthday, Some(327_369_600));
        assert_eq!(contact.picture.map(|p| p.len()), Some(6));
        Ok(())
    }

    #[test]
    fn note_is_truncated_with_crlf_endings() -> anyhow::Result<()> {
        let request = BodyRequest {
            truncation_size: Some(8),
            ..BodyRequest::plain()
        };
        let contact = card_to_contact(&card(&["NOTE:first\\nsecond line"]), &request)?;
        assert_eq!(
            contact.body,
            Some(ContactBody {
                data: "first\r\ns".to_string(),
                truncated: true,
                estimated_size: 8,
            })
        );
        Ok(())
    }

    #[test]
    fn outbound_card_has_envelope_and_uid() {
        let mut contact = StructuredContactItem::default();
        contact.set_field(ContactField::FileAs, "Ann Lee");
        contact.set_field(ContactField::Email1, "ann@example.com");
        let text = contact_to_card(&contact, "20240101T000000Z-ABCD");
        assert!(text.starts_with("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:20240101T000000Z-ABCD.vcf\r\n"));
        assert!(text.contains("FN:Ann Lee\r\n"));
        assert!(text.contains("EMAIL;TYPE=work:ann@example.com\r\n"));
        assert!(text.ends_with("END:VCARD\r\n"));
    }
}
