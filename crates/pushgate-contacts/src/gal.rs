use pushgate_content::{VCard, VCardProperty};
use pushgate_core::DirectoryRecord;

/// Queries shorter than this return no directory results.
pub const MIN_QUERY_CHARS: usize = 5;

fn value(property: Option<&VCardProperty>) -> String {
    property.map(|p| p.unescaped().trim().to_string()).unwrap_or_default()
}

fn component(property: Option<&VCardProperty>, idx: usize) -> String {
    property
        .and_then(|p| p.components().get(idx).map(|c| c.trim().to_string()))
        .unwrap_or_default()
}

fn typed_phone(card: &VCard, kind: &str) -> String {
    value(card.all("TEL").find(|p| p.has_type(kind)))
}

/// Shapes a card into the fixed directory record. The display name falls
/// back to the email address.
pub fn directory_record(card: &VCard) -> DirectoryRecord {
    let email_address = value(card.first("EMAIL"));
    let display_name = match value(card.first("FN")) {
        name if name.is_empty() => email_address.clone(),
        name => name,
    };
    let name = card.first("N");
    DirectoryRecord {
        display_name,
        phone: value(card.first("TEL")),
        office: String::new(),
        title: value(card.first("TITLE")),
        company: component(card.first("ORG"), 0),
        alias: String::new(),
        first_name: component(name, 1),
        last_name: component(name, 0),
        home_phone: typed_phone(card, "home"),
        mobile_phone: typed_phone(card, "cell"),
        email_address,
    }
}
