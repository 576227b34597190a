use pushgate_core::FolderType;

use crate::mutf7;

pub const DEFAULT_DELIMITER: &str = ".";

/// Where a native folder sits in the device's folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder_type: FolderType,
    pub display_name: String,
    /// Native path of the parent; `None` for folders under the root.
    pub parent: Option<String>,
}

/// Classifies a native folder by name and resolves its parent. `exists`
/// answers whether a native path is a real folder; intermediate segments
/// that are not folders are folded into the display name.
pub fn place(
    native: &str,
    delimiter: &str,
    sent_folder: Option<&str>,
    exists: impl Fn(&str) -> bool,
) -> Placement {
    let lower = native.to_lowercase();
    let first_segment = || native.split(delimiter).next().map(str::to_string);
    let special = |folder_type, name: &str, parent| Placement {
        folder_type,
        display_name: name.to_string(),
        parent,
    };
    let nested = |name: &str| lower == format!("inbox.{name}") || lower == format!("inbox/{name}");

    match lower.as_str() {
        "inbox" => return special(FolderType::Inbox, "Inbox", None),
        "drafts" => return special(FolderType::Drafts, "Drafts", None),
        "trash" => return special(FolderType::WasteBasket, "Trash", None),
        "sent" | "sent items" => return special(FolderType::SentMail, "Sent", None),
        _ => {}
    }
    if sent_folder.is_some_and(|s| s.to_lowercase() == lower) {
        return special(FolderType::SentMail, "Sent", None);
    }
    if nested("drafts") {
        return special(FolderType::Drafts, "Drafts", first_segment());
    }
    if nested("trash") {
        return special(FolderType::WasteBasket, "Trash", first_segment());
    }
    if nested("sent") {
        return special(FolderType::SentMail, "Sent", first_segment());
    }

    let segments: Vec<&str> = if delimiter.is_empty() {
        vec![native]
    } else {
        native.split(delimiter).collect()
    };
    if segments.len() < 2 {
        return Placement {
            folder_type: FolderType::UserMail,
            display_name: mutf7::decode(native),
            parent: None,
        };
    }
    let (display, parent) = resolve_parent(segments, delimiter, exists);
    Placement {
        folder_type: FolderType::UserMail,
        display_name: mutf7::decode(&display),
        parent: Some(parent),
    }
}

/// Pops trailing segments into the display name until the remaining path
/// is a single segment or an existing folder.
fn resolve_parent(
    mut segments: Vec<&str>,
    delimiter: &str,
    exists: impl Fn(&str) -> bool,
) -> (String, String) {
    let mut display = segments.pop().unwrap_or_default().to_string();
    loop {
        let parent = segments.join(delimiter);
        if segments.len() <= 1 || exists(&parent) {
            return (display, parent);
        }
        if let Some(segment) = segments.pop() {
            display = format!("{segment}{delimiter}{display}");
        }
    }
}

/// Case-insensitive substring match against configured exclusions, which
/// are written in plain text and compared in the server's encoding.
pub fn is_excluded(native: &str, patterns: &[String]) -> bool {
    let lower = native.to_lowercase();
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| lower.contains(&mutf7::encode(p).to_lowercase()))
}

#[cfg(test)]
mod tests {
    use pushgate_core::FolderType;

    use super::{Placement, is_excluded, place};

    fn known(paths: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |p| paths.contains(&p)
    }

    #[test]
    fn well_known_names_are_classified() {
        let inbox = place("INBOX", ".", None, known(&[]));
        assert_eq!(inbox.folder_type, FolderType::Inbox);
        assert_eq!(inbox.parent, None);

        let sent = place("Sent Items", ".", None, known(&[]));
        assert_eq!(sent.folder_type, FolderType::SentMail);

        let custom = place("Gesendet", ".", Some("gesendet"), known(&[]));
        assert_eq!(custom.folder_type, FolderType::SentMail);
        assert_eq!(custom.display_name, "Sent");

        let trash = place("INBOX/Trash", "/", None, known(&[]));
        assert_eq!(
            trash,
            Placement {
                folder_type: FolderType::WasteBasket,
                display_name: "Trash".to_string(),
                parent: Some("INBOX".to_string()),
            }
        );
        assert_eq!(place("inbox.drafts", ".", None, known(&[])).folder_type, FolderType::Drafts);
    }

    #[test]
    fn non_folder_segments_join_the_display_name() {
        let placed = place("INBOX.a.b.c", ".", None, known(&["INBOX"]));
        assert_eq!(placed.parent.as_deref(), Some("INBOX"));
        assert_eq!(placed.display_name, "a.b.c");

        let placed = place("INBOX.a.b.c", ".", None, known(&["INBOX", "INBOX.a"]));
        assert_eq!(placed.parent.as_deref(), Some("INBOX.a"));
        assert_eq!(placed.display_name, "b.c");

        let placed = place("Projects.Q1", ".", None, known(&[]));
        assert_eq!(placed.parent.as_deref(), Some("Projects"));
        assert_eq!(placed.display_name, "Q1");
    }

    #[test]
    fn user_folders_decode_display_names() {
        let placed = place("Entw&APw-rfe", ".", None, known(&[]));
        assert_eq!(placed.folder_type, FolderType::UserMail);
        assert_eq!(placed.display_name, "Entwürfe");
        assert_eq!(placed.parent, None);
    }

    #[test]
    fn exclusions_match_encoded_substrings() {
        let patterns = vec!["junk".to_string(), "Entwürfe".to_string()];
        assert!(is_excluded("INBOX.Junk", &patterns));
        assert!(is_excluded("Entw&APw-rfe", &patterns));
        assert!(!is_excluded("INBOX", &patterns));
    }
}
