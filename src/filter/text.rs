//! Case-insensitive substring helpers for word filtering.
//!
//! Matching compares one character at a time through `char::to_lowercase`,
//! so byte offsets always refer to the original string even when a
//! character's lowercase form has a different UTF-8 length.

fn chars_eq_ci(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Byte range of the first case-insensitive occurrence of `needle`.
pub fn find_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }

    for (start, _) in haystack.char_indices() {
        let mut rest = haystack[start..].char_indices();
        let mut end = start;
        let matched = needle.chars().all(|n| match rest.next() {
            Some((offset, c)) if chars_eq_ci(c, n) => {
                end = start + offset + c.len_utf8();
                true
            }
            _ => false,
        });
        if matched {
            return Some((start, end));
        }
    }
    None
}

/// Whether `haystack` contains `needle`, ignoring case.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    find_ci(haystack, needle).is_some()
}

/// Replace every case-insensitive occurrence of `needle` with `replacement`.
///
/// Replacement text is never rescanned.
pub fn replace_ci(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_owned();
    }

    let mut out = String::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some((start, end)) = find_ci(rest, needle) {
        out.push_str(&rest[..start]);
        out.push_str(replacement);
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}
