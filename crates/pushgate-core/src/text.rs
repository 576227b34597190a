/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub fn normalize_crlf(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 32);
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            _ => out.push(ch),
        }
    }
    out
}

/// Applies a byte budget. Returns the kept data, whether anything was cut,
/// and the size reported to the device (the length of the kept data).
pub fn truncate_body(data: String, budget: Option<usize>) -> (String, bool, usize) {
    match budget {
        Some(max) if data.len() > max => {
            let kept = truncate_utf8(&data, max).to_string();
            let size = kept.len();
            (kept, true, size)
        }
        _ => {
            let size = data.len();
            (data, false, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_crlf, truncate_body, truncate_utf8};

    #[test]
    fn truncation_never_splits_a_character() {
        let text = "grüße";
        assert_eq!(truncate_utf8(text, 3), "gr");
        assert_eq!(truncate_utf8(text, 4), "grü");
        assert_eq!(truncate_utf8(text, 100), text);
    }

    #[test]
    fn body_budget_sets_truncated_flag() {
        let (data, truncated, size) = truncate_body("x".repeat(1000), Some(100));
        assert!(truncated);
        assert_eq!(size, data.len());
        assert!(data.len() <= 100);

        let (data, truncated, size) = truncate_body("short".to_string(), Some(100));
        assert!(!truncated);
        assert_eq!((data.as_str(), size), ("short", 5));
    }

    #[test]
    fn line_endings_become_crlf() {
        assert_eq!(normalize_crlf("a\nb\r\nc\rd"), "a\r\nb\r\nc\r\nd");
    }
}
