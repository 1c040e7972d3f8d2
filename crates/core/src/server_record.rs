//! In-memory representation of one advertised game server (§4.2).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::mode::Mode;
use crate::sanitize::sanitize_name;
use crate::time::now;

/// A single changed field, recorded so `flush_updates` can report only what
/// actually moved since the last flush.
#[derive(Debug, Clone, PartialEq)]
enum Change {
    Port(u16),
    Private(bool),
    Plusonly(bool),
    Version(String),
    Mode(Mode),
    Players(u32),
    Max(u32),
    Name(String),
    Prefer(bool),
}

/// One row of the `servers` table (§3 DATA MODEL).
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub created: i64,
    pub lifesign: i64,
    pub last_ping: i64,
    pub private: bool,
    pub plusonly: bool,
    pub remote: bool,
    pub origin: String,
    pub version: String,
    pub mode: Mode,
    pub players: u32,
    pub max: u32,
    pub name: String,
    pub prefer: bool,

    changes: Vec<Change>,
}

/// The sparse, JSON-friendly delta produced by `flush_updates` — always
/// includes `id`; every other field is present only if it changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerDelta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plusonly: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer: Option<bool>,
}

impl ServerRecord {
    /// Creates a fresh, local row for `id` (ip:port of the control
    /// connection). `origin` is the daemon's own address.
    pub fn create(id: impl Into<String>, ip: impl Into<String>, origin: impl Into<String>) -> Self {
        let t = now();
        Self {
            id: id.into(),
            ip: ip.into(),
            port: 0,
            created: t,
            lifesign: t,
            last_ping: 0,
            private: false,
            plusonly: false,
            remote: false,
            origin: origin.into(),
            version: String::new(),
            mode: Mode::Unknown,
            players: 0,
            max: 0,
            name: String::new(),
            prefer: false,
            changes: Vec::new(),
        }
    }

    /// Rehydrates a record already present in storage; used by the store
    /// layer, never applies "construct without create" semantics since the
    /// row is known to exist by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn from_row(
        id: String,
        ip: String,
        port: u16,
        created: i64,
        lifesign: i64,
        last_ping: i64,
        private: bool,
        plusonly: bool,
        remote: bool,
        origin: String,
        version: String,
        mode: Mode,
        players: u32,
        max: u32,
        name: String,
        prefer: bool,
    ) -> Self {
        Self {
            id,
            ip,
            port,
            created,
            lifesign,
            last_ping,
            private,
            plusonly,
            remote,
            origin,
            version,
            mode,
            players,
            max,
            name,
            prefer,
            changes: Vec::new(),
        }
    }

    /// §4.2: "construction-without-create... fails with ServerUnknown".
    /// Callers that only want to read an existing row go through the store,
    /// which returns this error instead of calling `create`.
    pub fn unknown(id: impl Into<String>) -> CoreError {
        CoreError::ServerUnknown { id: id.into() }
    }

    fn touch(&mut self) {
        self.lifesign = now();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
        self.touch();
        self.changes.push(Change::Port(port));
    }

    pub fn set_private(&mut self, private: bool) {
        self.private = private;
        self.touch();
        self.changes.push(Change::Private(private));
    }

    pub fn set_plusonly(&mut self, plusonly: bool) {
        self.plusonly = plusonly;
        self.touch();
        self.changes.push(Change::Plusonly(plusonly));
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        self.version = version.clone();
        self.touch();
        self.changes.push(Change::Version(version));
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.touch();
        self.changes.push(Change::Mode(mode));
    }

    /// Clamps to `[0, max_players]` per §4.2, then records the delta.
    pub fn set_players(&mut self, players: u32, max_players: u32) {
        let clamped = players.min(max_players);
        self.players = clamped;
        self.touch();
        self.changes.push(Change::Players(clamped));
    }

    /// Clamps to `[0, max_players]`; if the new max now sits below the
    /// current player count, players is clamped down too (keeps the
    /// `players <= max` invariant intact at every mutation).
    pub fn set_max(&mut self, max: u32, max_players: u32) {
        let clamped = max.min(max_players);
        self.max = clamped;
        if self.players > self.max {
            self.players = self.max;
            self.changes.push(Change::Players(self.players));
        }
        self.touch();
        self.changes.push(Change::Max(clamped));
    }

    /// §4.2 reserved-name enforcement is applied by the caller (it needs
    /// the banlist); this just sanitizes and clamps double-spaces etc.
    pub fn set_name(&mut self, raw: &str) {
        let clean = sanitize_name(raw);
        self.name = clean.clone();
        self.touch();
        self.changes.push(Change::Name(clean));
    }

    pub fn set_prefer(&mut self, prefer: bool) {
        self.prefer = prefer;
        self.touch();
        self.changes.push(Change::Prefer(prefer));
    }

    /// Returns the accumulated delta (always including `id`) and resets
    /// the change buffer. A record that was only read returns `{id}`.
    pub fn flush_updates(&mut self) -> ServerDelta {
        let mut delta = ServerDelta {
            id: self.id.clone(),
            ..Default::default()
        };
        for change in self.changes.drain(..) {
            match change {
                Change::Port(v) => delta.port = Some(v),
                Change::Private(v) => delta.private = Some(v),
                Change::Plusonly(v) => delta.plusonly = Some(v),
                Change::Version(v) => delta.version = Some(v),
                Change::Mode(v) => delta.mode = Some(v.as_str().to_string()),
                Change::Players(v) => delta.players = Some(v),
                Change::Max(v) => delta.max = Some(v),
                Change::Name(v) => delta.name = Some(v),
                Change::Prefer(v) => delta.prefer = Some(v),
            }
        }
        delta
    }

    /// Whether `remote=1` rows are still within the eviction window (§3).
    pub fn is_alive(&self, timeout_secs: i64) -> bool {
        self.lifesign >= now() - timeout_secs
    }

    /// Snapshot of every field as an owned map, used to build a full
    /// `server` sync message (§4.8) rather than a partial delta.
    pub fn to_full_map(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut m = BTreeMap::new();
        m.insert("id", serde_json::Value::String(self.id.clone()));
        m.insert("ip", serde_json::Value::String(self.ip.clone()));
        m.insert("port", serde_json::Value::from(self.port));
        m.insert("private", serde_json::Value::from(self.private));
        m.insert("plusonly", serde_json::Value::from(self.plusonly));
        m.insert("version", serde_json::Value::String(self.version.clone()));
        m.insert(
            "mode",
            serde_json::Value::String(self.mode.as_str().to_string()),
        );
        m.insert("players", serde_json::Value::from(self.players));
        m.insert("max", serde_json::Value::from(self.max));
        m.insert("name", serde_json::Value::String(self.name.clone()));
        m.insert("prefer", serde_json::Value::from(self.prefer));
        m.insert("created", serde_json::Value::from(self.created));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_on_untouched_record_is_just_id() {
        let mut r = ServerRecord::create("1.2.3.4:1000", "1.2.3.4", "self");
        let delta = r.flush_updates();
        assert_eq!(delta.id, "1.2.3.4:1000");
        assert_eq!(delta.name, None);
        assert_eq!(delta.players, None);
    }

    #[test]
    fn flush_reports_only_changed_fields() {
        let mut r = ServerRecord::create("1.2.3.4:1000", "1.2.3.4", "self");
        r.set_players(5, 32);
        let delta = r.flush_updates();
        assert_eq!(delta.players, Some(5));
        assert_eq!(delta.name, None);
        // second flush is empty again
        let delta2 = r.flush_updates();
        assert_eq!(delta2.players, None);
    }

    #[test]
    fn players_and_max_stay_clamped() {
        let mut r = ServerRecord::create("x", "1.2.3.4", "self");
        r.set_max(100, 32);
        assert_eq!(r.max, 32);
        r.set_players(50, 32);
        assert_eq!(r.players, 32);
        assert!(r.players <= r.max);
    }

    #[test]
    fn lowering_max_below_players_clamps_players_too() {
        let mut r = ServerRecord::create("x", "1.2.3.4", "self");
        r.set_max(32, 32);
        r.set_players(30, 32);
        r.set_max(10, 32);
        assert_eq!(r.max, 10);
        assert_eq!(r.players, 10);
    }
}
