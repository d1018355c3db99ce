#![forbid(unsafe_code)]

//! Turns list titles into names that are safe on every filesystem we write
//! to.

/// Characters rejected by at least one target filesystem.
const ILLEGAL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const AT_MARKER: &str = "feat";
const FALLBACK_NAME: &str = "untitled";

/// Derives a file stem from a display title.
///
/// Illegal characters become `_`, `@` becomes `feat`, and emoji (astral plane
/// code points plus the miscellaneous-symbols and dingbats blocks) are
/// dropped. Control characters are dropped as well.
pub fn sanitize_title(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.chars() {
        if ILLEGAL_CHARS.contains(&c) {
            name.push('_');
        } else if c == '@' {
            name.push_str(AT_MARKER);
        } else if is_emoji(c) || c.is_control() {
            continue;
        } else {
            name.push(c);
        }
    }

    let trimmed = name.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1_0000..=0x10_FFFF | 0x2600..=0x26FF | 0x2700..=0x27BF)
}
