//! Server-name sanitization (§4.2, testable property 3).
//!
//! Strips bytes outside the printable range `[0x20, 0x7D]`, removes every
//! character in the forbidden set, collapses runs of whitespace, and trims.

const FORBIDDEN: &[char] = &['#', '%', '&', '[', ']', '^', '{', '}', '~'];

/// Sanitizes a raw server name per §4.2. Never panics; always returns a
/// string satisfying testable property 3 (bytes in range, no forbidden
/// bytes, no double spaces).
pub fn sanitize_name(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|&c| {
            let code = c as u32;
            (0x20..=0x7D).contains(&code) && !FORBIDDEN.contains(&c)
        })
        .collect();

    let collapsed = collapse_whitespace(&filtered);
    collapsed.trim().to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(c);
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Truncates a raw byte buffer at the first embedded NUL, then interprets
/// the remainder as lossy UTF-8 before sanitizing (used when decoding the
/// fixed-width name field out of the hello/name-update wire messages).
pub fn sanitize_name_bytes(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    sanitize_name(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_forbidden_and_nonprintable() {
        assert_eq!(sanitize_name("fo#o%ba[r]"), "foobar");
        assert_eq!(sanitize_name("a\u{0001}b\u{007F}c"), "abc");
    }

    #[test]
    fn collapses_double_spaces_and_trims() {
        assert_eq!(sanitize_name("  hello    world  "), "hello world");
    }

    #[test]
    fn truncates_at_embedded_nul() {
        let mut buf = b"testsrv".to_vec();
        buf.push(0);
        buf.extend_from_slice(b"garbage");
        assert_eq!(sanitize_name_bytes(&buf), "testsrv");
    }

    #[test]
    fn no_byte_outside_printable_range_survives() {
        let raw: String = (0u8..=255).map(|b| b as char).collect();
        let sanitized = sanitize_name(&raw);
        for c in sanitized.chars() {
            let code = c as u32;
            assert!((0x20..=0x7D).contains(&code));
            assert!(!FORBIDDEN.contains(&c));
        }
        assert!(!sanitized.contains("  "));
    }
}
