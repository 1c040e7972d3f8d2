//! `servers` table operations (§3 ServerRecord, §4.1).

use ld_core::{Mode, ServerDelta, ServerRecord};
use rusqlite::{params, Row};

use crate::{Result, Store};

fn row_to_record(row: &Row) -> rusqlite::Result<ServerRecord> {
    Ok(ServerRecord::from_row(
        row.get("id")?,
        row.get("ip")?,
        row.get::<_, i64>("port")? as u16,
        row.get("created")?,
        row.get("lifesign")?,
        row.get("last_ping")?,
        row.get::<_, i64>("private")? != 0,
        row.get::<_, i64>("plusonly")? != 0,
        row.get::<_, i64>("remote")? != 0,
        row.get("origin")?,
        row.get("version")?,
        Mode::from_str_loose(&row.get::<_, String>("mode")?),
        row.get::<_, i64>("players")? as u32,
        row.get::<_, i64>("max")? as u32,
        row.get("name")?,
        row.get::<_, i64>("prefer")? != 0,
    ))
}

const SELECT_COLUMNS: &str = "id, ip, port, created, lifesign, last_ping, private, plusonly, \
     remote, origin, version, mode, players, max, name, prefer";

/// §4.7 ordering, shared by the ASCII and binary list emitters.
const ORDER_CLAUSE: &str =
    "ORDER BY prefer DESC, private ASC, (players = max) ASC, players DESC, created ASC";

impl Store {
    pub fn get_server(&self, id: &str) -> Result<Option<ServerRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM servers WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    pub fn all_servers(&self) -> Result<Vec<ServerRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM servers"))?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// §4.7: the same row ordering feeds both the ASCII and binary list
    /// emitters; the binary emitter additionally drops `plusonly` rows.
    pub fn list_servers_ordered(&self) -> Result<Vec<ServerRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM servers {ORDER_CLAUSE}"))?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Inserts a brand new row (§4.2 `create`).
    pub fn insert_server(&self, record: &ServerRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO servers (id, ip, port, created, lifesign, last_ping, private, \
             plusonly, remote, origin, version, mode, players, max, name, prefer) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            params![
                record.id,
                record.ip,
                record.port as i64,
                record.created,
                record.lifesign,
                record.last_ping,
                record.private as i64,
                record.plusonly as i64,
                record.remote as i64,
                record.origin,
                record.version,
                record.mode.as_str(),
                record.players as i64,
                record.max as i64,
                record.name,
                record.prefer as i64,
            ],
        )?;
        Ok(())
    }

    /// `INSERT OR REPLACE` of a full record — used when a mirror
    /// announces a `server` sync item wholesale (§4.8).
    pub fn upsert_server_full(&self, record: &ServerRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO servers (id, ip, port, created, lifesign, last_ping, private, \
             plusonly, remote, origin, version, mode, players, max, name, prefer) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16) \
             ON CONFLICT(id) DO UPDATE SET \
             ip=excluded.ip, port=excluded.port, lifesign=excluded.lifesign, \
             private=excluded.private, plusonly=excluded.plusonly, remote=excluded.remote, \
             origin=excluded.origin, version=excluded.version, mode=excluded.mode, \
             players=excluded.players, max=excluded.max, name=excluded.name, \
             prefer=excluded.prefer",
            params![
                record.id,
                record.ip,
                record.port as i64,
                record.created,
                record.lifesign,
                record.last_ping,
                record.private as i64,
                record.plusonly as i64,
                record.remote as i64,
                record.origin,
                record.version,
                record.mode.as_str(),
                record.players as i64,
                record.max as i64,
                record.name,
                record.prefer as i64,
            ],
        )?;
        Ok(())
    }

    /// Applies a sparse delta (§4.2 `flush_updates`) as a dynamic `UPDATE`
    /// touching only the columns that actually changed.
    pub fn apply_delta(&self, delta: &ServerDelta) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        macro_rules! push {
            ($col:literal, $val:expr) => {
                sets.push(format!("{} = ?{}", $col, values.len() + 1));
                values.push(Box::new($val));
            };
        }

        if let Some(v) = &delta.ip {
            push!("ip", v.clone());
        }
        if let Some(v) = delta.port {
            push!("port", v as i64);
        }
        if let Some(v) = delta.private {
            push!("private", v as i64);
        }
        if let Some(v) = delta.plusonly {
            push!("plusonly", v as i64);
        }
        if let Some(v) = &delta.version {
            push!("version", v.clone());
        }
        if let Some(v) = &delta.mode {
            push!("mode", v.clone());
        }
        if let Some(v) = delta.players {
            push!("players", v as i64);
        }
        if let Some(v) = delta.max {
            push!("max", v as i64);
        }
        if let Some(v) = &delta.name {
            push!("name", v.clone());
        }
        if let Some(v) = delta.prefer {
            push!("prefer", v as i64);
        }

        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE servers SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len() + 1
        );
        values.push(Box::new(delta.id.clone()));

        let conn = self.conn.lock();
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    pub fn delete_server(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM servers WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// §4.6: "reject if the IP already owns MAXSERVERS rows".
    pub fn count_local_by_ip(&self, ip: &str) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM servers WHERE ip = ?1 AND remote = 0",
            params![ip],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// §4.6: "reject if the same (ip, port) is already listed".
    pub fn exists_ip_port(&self, ip: &str, port: u16) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM servers WHERE ip = ?1 AND port = ?2)",
            params![ip, port as i64],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// §3: sweeps remote rows whose lifesign has fallen behind `now - timeout_secs`.
    /// Returns the ids removed, so callers can broadcast nothing (sweeps are
    /// local bookkeeping, not re-announced).
    pub fn sweep_expired_remote(&self, now: i64, timeout_secs: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM servers WHERE remote = 1 AND lifesign < ?1",
        )?;
        let cutoff = now - timeout_secs;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if !ids.is_empty() {
            conn.execute(
                "DELETE FROM servers WHERE remote = 1 AND lifesign < ?1",
                params![cutoff],
            )?;
        }
        Ok(ids)
    }

    /// §4.10: the locally-owned row with the oldest `last_ping`, provided
    /// it's older than `now - 300`.
    pub fn oldest_unpinged_local(&self, now: i64) -> Result<Option<ServerRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM servers WHERE remote = 0 AND last_ping < ?1 \
             ORDER BY last_ping ASC LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![now - 300])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    pub fn touch_last_ping(&self, id: &str, epoch: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE servers SET last_ping = ?1 WHERE id = ?2",
            params![epoch, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_delete_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let record = ServerRecord::create("1.2.3.4:1000", "1.2.3.4", "self");
        store.insert_server(&record).unwrap();

        let fetched = store.get_server("1.2.3.4:1000").unwrap().unwrap();
        assert_eq!(fetched.id, "1.2.3.4:1000");

        store.delete_server("1.2.3.4:1000").unwrap();
        assert!(store.get_server("1.2.3.4:1000").unwrap().is_none());
    }

    #[test]
    fn apply_delta_updates_only_touched_columns() {
        let store = Store::open_in_memory().unwrap();
        let mut record = ServerRecord::create("x", "1.2.3.4", "self");
        store.insert_server(&record).unwrap();

        record.set_players(5, 32);
        let delta = record.flush_updates();
        store.apply_delta(&delta).unwrap();

        let fetched = store.get_server("x").unwrap().unwrap();
        assert_eq!(fetched.players, 5);
        assert_eq!(fetched.name, "");
    }

    #[test]
    fn ordering_matches_spec_sort_key() {
        let store = Store::open_in_memory().unwrap();
        let mut a = ServerRecord::create("a", "1.1.1.1", "self");
        a.set_players(10, 32);
        a.set_max(32, 32);
        store.insert_server(&a).unwrap();

        let mut b = ServerRecord::create("b", "1.1.1.2", "self");
        b.set_prefer(true);
        store.insert_server(&b).unwrap();

        let ordered = store.list_servers_ordered().unwrap();
        assert_eq!(ordered[0].id, "b"); // prefer=1 sorts first
    }

    #[test]
    fn sweep_removes_only_stale_remote_rows() {
        let store = Store::open_in_memory().unwrap();
        let mut remote = ServerRecord::create("r", "2.2.2.2", "peer");
        remote.remote = true;
        remote.lifesign = 0;
        store.insert_server(&remote).unwrap();

        let mut local = ServerRecord::create("l", "3.3.3.3", "self");
        local.lifesign = 0;
        store.insert_server(&local).unwrap();

        let removed = store.sweep_expired_remote(1000, 40).unwrap();
        assert_eq!(removed, vec!["r".to_string()]);
        assert!(store.get_server("l").unwrap().is_some());
    }
}
