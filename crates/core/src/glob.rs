//! Minimal glob matcher for banlist address/name patterns: `*` matches an
//! arbitrary (possibly empty) run of characters, every other character
//! matches literally. No character classes, no `?` — that's all the
//! banlist format (`helpers/classes.py`) ever used.

/// Returns true if `pattern` matches `text` in full.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => {
            // '*' either consumes nothing (drop it) or consumes one byte of
            // text and stays put — the classic backtracking recursion.
            glob_match_bytes(&pattern[1..], text)
                || (!text.is_empty() && glob_match_bytes(pattern, &text[1..]))
        }
        Some(&p) => match text.first() {
            Some(&t) if t == p => glob_match_bytes(&pattern[1..], &text[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(glob_match("10.0.0.1", "10.0.0.1"));
        assert!(!glob_match("10.0.0.1", "10.0.0.2"));
    }

    #[test]
    fn wildcard_matches_any_run() {
        assert!(glob_match("10.*", "10.0.0.9"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("ace*", "ace01"));
        assert!(!glob_match("ace*", "notace"));
    }

    #[test]
    fn wildcard_in_middle() {
        assert!(glob_match("10.*.0.1", "10.255.0.1"));
        assert!(!glob_match("10.*.0.1", "10.255.0.2"));
    }

    #[test]
    fn empty_pattern_matches_only_empty() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }
}
