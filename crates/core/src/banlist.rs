//! Banlist entries and the ban/prefer matcher (§4.3, component C).

use serde::{Deserialize, Serialize};

use crate::glob::glob_match;

/// §3 `BanlistEntry.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanlistType {
    Ban,
    Whitelist,
    Prefer,
    Unprefer,
}

impl BanlistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanlistType::Ban => "ban",
            BanlistType::Whitelist => "whitelist",
            BanlistType::Prefer => "prefer",
            BanlistType::Unprefer => "unprefer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ban" => Some(BanlistType::Ban),
            "whitelist" => Some(BanlistType::Whitelist),
            "prefer" => Some(BanlistType::Prefer),
            "unprefer" => Some(BanlistType::Unprefer),
            _ => None,
        }
    }
}

/// One row of the `banlist` table. The tuple
/// `(address, type, note, origin, reserved)` is the logical key (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanlistEntry {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: BanlistType,
    #[serde(default)]
    pub note: String,
    pub origin: String,
    #[serde(default)]
    pub reserved: String,
}

impl BanlistEntry {
    /// The logical key used for idempotent add/delete (§3, testable property 5).
    pub fn key(&self) -> (String, &'static str, String, String, String) {
        (
            self.address.clone(),
            self.kind.as_str(),
            self.note.clone(),
            self.origin.clone(),
            self.reserved.clone(),
        )
    }
}

/// Walks `entries` to answer the four matcher questions of §4.3.
/// `127.0.0.1` is never banned; mirror addresses are implicitly
/// whitelisted (callers pass `mirror_addrs` so this module stays free of
/// any direct dependency on the mirror table).
pub struct Matcher<'a> {
    entries: &'a [BanlistEntry],
}

impl<'a> Matcher<'a> {
    pub fn new(entries: &'a [BanlistEntry]) -> Self {
        Self { entries }
    }

    pub fn banned(&self, ip: &str, mirror_addrs: &[String]) -> bool {
        if ip == "127.0.0.1" {
            return false;
        }
        if mirror_addrs.iter().any(|m| m == ip) {
            return false;
        }
        if self.whitelisted(ip) {
            return false;
        }
        self.entries
            .iter()
            .filter(|e| e.kind == BanlistType::Ban)
            .any(|e| glob_match(&e.address, ip))
    }

    pub fn whitelisted(&self, ip: &str) -> bool {
        self.entries
            .iter()
            .filter(|e| e.kind == BanlistType::Whitelist)
            .any(|e| glob_match(&e.address, ip))
    }

    pub fn preferred(&self, ip: &str, name: &str) -> bool {
        self.match_prefer_kind(BanlistType::Prefer, ip, name)
    }

    pub fn unpreferred(&self, ip: &str, name: &str) -> bool {
        self.match_prefer_kind(BanlistType::Unprefer, ip, name)
    }

    fn match_prefer_kind(&self, kind: BanlistType, ip: &str, name: &str) -> bool {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .any(|e| {
                glob_match(&e.address, ip)
                    && (e.reserved.is_empty() || glob_match(&e.reserved, name))
            })
    }

    /// §4.2 reserved-name enforcement: does any `whitelist` row with a
    /// non-empty `reserved` glob claim `name` for an IP range that does
    /// NOT include `ip`?
    pub fn name_is_reserved_elsewhere(&self, ip: &str, name: &str) -> bool {
        self.entries
            .iter()
            .filter(|e| e.kind == BanlistType::Whitelist && !e.reserved.is_empty())
            .any(|e| glob_match(&e.reserved, name) && !glob_match(&e.address, ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: &str, kind: BanlistType, reserved: &str) -> BanlistEntry {
        BanlistEntry {
            address: address.to_string(),
            kind,
            note: String::new(),
            origin: "self".to_string(),
            reserved: reserved.to_string(),
        }
    }

    #[test]
    fn localhost_never_banned() {
        let entries = vec![entry("*", BanlistType::Ban, "")];
        let m = Matcher::new(&entries);
        assert!(!m.banned("127.0.0.1", &[]));
    }

    #[test]
    fn whitelist_overrides_ban() {
        let entries = vec![
            entry("10.*", BanlistType::Ban, ""),
            entry("10.0.0.5", BanlistType::Whitelist, ""),
        ];
        let m = Matcher::new(&entries);
        assert!(m.banned("10.0.0.9", &[]));
        assert!(!m.banned("10.0.0.5", &[]));
    }

    #[test]
    fn mirror_addresses_are_implicitly_whitelisted() {
        let entries = vec![entry("10.*", BanlistType::Ban, "")];
        let m = Matcher::new(&entries);
        let mirrors = vec!["10.0.0.1".to_string()];
        assert!(!m.banned("10.0.0.1", &mirrors));
    }

    #[test]
    fn reserved_name_requires_ip_match() {
        let entries = vec![entry("10.*", BanlistType::Whitelist, "ace*")];
        let m = Matcher::new(&entries);
        assert!(m.name_is_reserved_elsewhere("192.0.2.5", "ace01"));
        assert!(!m.name_is_reserved_elsewhere("10.0.0.9", "ace01"));
        assert!(!m.name_is_reserved_elsewhere("192.0.2.5", "notace"));
    }

    #[test]
    fn prefer_with_reserved_requires_name_match() {
        let entries = vec![entry("10.*", BanlistType::Prefer, "ace*")];
        let m = Matcher::new(&entries);
        assert!(m.preferred("10.0.0.9", "ace01"));
        assert!(!m.preferred("10.0.0.9", "other"));
    }
}
