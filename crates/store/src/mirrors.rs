//! `mirrors` table operations (§3). The in-process mirror set used by the
//! listener/broadcaster is a cache rebuilt from this table (§9 design
//! note: "mirror list as two sources of truth" — keep only the table).

use ld_core::Mirror;
use rusqlite::{params, Row};

use crate::{Result, Store};

fn row_to_mirror(row: &Row) -> rusqlite::Result<Mirror> {
    Ok(Mirror {
        name: row.get("name")?,
        address: row.get("address")?,
        lifesign: row.get("lifesign")?,
    })
}

impl Store {
    pub fn all_mirrors(&self) -> Result<Vec<Mirror>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT name, address, lifesign FROM mirrors")?;
        let rows = stmt.query_map([], row_to_mirror)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Inserts `mirror` unless its name or address already exists (§4.8).
    /// `"web"` as a name is rejected by the caller before this is reached.
    pub fn add_mirror(&self, mirror: &Mirror) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM mirrors WHERE name = ?1 OR address = ?2)",
            params![mirror.name, mirror.address],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO mirrors (name, address, lifesign) VALUES (?1, ?2, ?3)",
            params![mirror.name, mirror.address, mirror.lifesign],
        )?;
        Ok(true)
    }

    pub fn delete_mirror(&self, name: &str, address: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM mirrors WHERE name = ?1 AND address = ?2",
            params![name, address],
        )?;
        Ok(changed > 0)
    }

    pub fn touch_mirror_lifesign(&self, address: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE mirrors SET lifesign = ?1 WHERE address = ?2",
            params![now, address],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_mirror_rejects_duplicate_name_or_address() {
        let store = Store::open_in_memory().unwrap();
        let m = Mirror {
            name: "peerA".into(),
            address: "10.0.0.1".into(),
            lifesign: 0,
        };
        assert!(store.add_mirror(&m).unwrap());
        assert!(!store.add_mirror(&m).unwrap());

        let same_addr = Mirror {
            name: "peerB".into(),
            address: "10.0.0.1".into(),
            lifesign: 0,
        };
        assert!(!store.add_mirror(&same_addr).unwrap());
    }
}
