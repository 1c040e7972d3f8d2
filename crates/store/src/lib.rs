//! Persistent tables — servers, banlist, mirrors, settings — behind a
//! single process-wide critical section (§4.1, component A).
//!
//! The original `j2lsnek` store is a thin wrapper around `sqlite3`; we keep
//! that engine (rather than the teacher's `rocksdb`/`sled` key-value
//! stores) because the spec's `query`/`fetch_one`/`fetch_all` surface and
//! its relational invariants (unique ids, tuple-keyed banlist rows) map
//! directly onto SQL tables. `rusqlite` is the natural Rust analogue, and
//! the "one lock per statement" discipline is expressed as a single
//! `parking_lot::Mutex<Connection>` guarding every call — exactly the
//! single-writer-task shape the teacher's `neo-persistence` documents for
//! its own storage engines, just expressed with a mutex instead of an
//! actor since SQLite itself is the serialization point.

mod banlist;
mod error;
mod mirrors;
mod servers;
mod settings;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

pub use error::{Result, StoreError};

/// Well-known upstream mirror seeded on first boot (§4.1).
pub const MASTER_MIRROR_HOST: &str = "list.jj2.plus";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the SQLite file at `path`, creates the
    /// schema if missing, then performs the startup truncations §4.1
    /// requires: `servers` is always emptied (no state outlives a
    /// restart) and foreign (non-self-origin) `banlist` rows are dropped.
    pub fn open(path: &str, self_origin: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        store.truncate_servers()?;
        store.truncate_foreign_banlist(self_origin)?;
        info!(path, "store opened and startup truncations applied");
        Ok(store)
    }

    /// In-memory store for tests — same schema, same invariants, no file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS servers (
                id        TEXT PRIMARY KEY,
                ip        TEXT NOT NULL,
                port      INTEGER NOT NULL,
                created   INTEGER NOT NULL,
                lifesign  INTEGER NOT NULL,
                last_ping INTEGER NOT NULL DEFAULT 0,
                private   INTEGER NOT NULL DEFAULT 0,
                plusonly  INTEGER NOT NULL DEFAULT 0,
                remote    INTEGER NOT NULL DEFAULT 0,
                origin    TEXT NOT NULL,
                version   TEXT NOT NULL DEFAULT '',
                mode      TEXT NOT NULL DEFAULT 'unknown',
                players   INTEGER NOT NULL DEFAULT 0,
                max       INTEGER NOT NULL DEFAULT 0,
                name      TEXT NOT NULL DEFAULT '',
                prefer    INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS banlist (
                address  TEXT NOT NULL,
                type     TEXT NOT NULL,
                note     TEXT NOT NULL DEFAULT '',
                origin   TEXT NOT NULL,
                reserved TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (address, type, note, origin, reserved)
            );
            CREATE TABLE IF NOT EXISTS mirrors (
                name     TEXT PRIMARY KEY,
                address  TEXT NOT NULL UNIQUE,
                lifesign INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS settings (
                item  TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn truncate_servers(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM servers", [])?;
        debug!("servers table truncated on startup");
        Ok(())
    }

    fn truncate_foreign_banlist(&self, self_origin: &str) -> Result<()> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM banlist WHERE origin != ?1",
            [self_origin],
        )?;
        if removed > 0 {
            debug!(removed, "foreign banlist entries truncated on startup");
        }
        Ok(())
    }

    /// Seeds the master peer into `mirrors` on first boot, if it resolves
    /// and isn't the local daemon (§4.1). The DNS lookup and self-address
    /// comparison are the caller's responsibility; this just performs the
    /// idempotent insert once a candidate address is known.
    pub fn seed_master_mirror_if_absent(&self, name: &str, address: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM mirrors WHERE name = ?1 OR address = ?2)",
            rusqlite::params![name, address],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO mirrors (name, address, lifesign) VALUES (?1, ?2, 0)",
            rusqlite::params![name, address],
        )?;
        info!(name, address, "seeded master mirror");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_servers_start_empty() {
        let store = Store::open_in_memory().unwrap();
        store.create_schema().unwrap(); // calling twice must not fail
        assert_eq!(store.all_servers().unwrap().len(), 0);
    }
}
