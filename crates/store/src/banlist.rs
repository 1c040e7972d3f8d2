//! `banlist` table operations (§3, testable property 5: tuple idempotence).

use ld_core::{BanlistEntry, BanlistType};
use rusqlite::{params, Row};

use crate::{Result, Store};

fn row_to_entry(row: &Row) -> rusqlite::Result<BanlistEntry> {
    let kind: String = row.get("type")?;
    Ok(BanlistEntry {
        address: row.get("address")?,
        kind: BanlistType::parse(&kind).unwrap_or(BanlistType::Ban),
        note: row.get("note")?,
        origin: row.get("origin")?,
        reserved: row.get("reserved")?,
    })
}

impl Store {
    pub fn all_banlist(&self) -> Result<Vec<BanlistEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT address, type, note, origin, reserved FROM banlist")?;
        let rows = stmt.query_map([], row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Inserts `entry` if its full tuple isn't already present. Returns
    /// whether a row was actually inserted (an identical repeat add-banlist
    /// yields exactly one row, per testable property 5).
    pub fn add_banlist(&self, entry: &BanlistEntry) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO banlist (address, type, note, origin, reserved) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.address,
                entry.kind.as_str(),
                entry.note,
                entry.origin,
                entry.reserved,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_banlist(&self, entry: &BanlistEntry) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM banlist WHERE address = ?1 AND type = ?2 AND note = ?3 \
             AND origin = ?4 AND reserved = ?5",
            params![
                entry.address,
                entry.kind.as_str(),
                entry.note,
                entry.origin,
                entry.reserved,
            ],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BanlistEntry {
        BanlistEntry {
            address: "10.*".to_string(),
            kind: BanlistType::Ban,
            note: "spam".to_string(),
            origin: "self".to_string(),
            reserved: String::new(),
        }
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_banlist(&entry()).unwrap());
        assert!(!store.add_banlist(&entry()).unwrap());
        assert_eq!(store.all_banlist().unwrap().len(), 1);
    }

    #[test]
    fn delete_by_tuple() {
        let store = Store::open_in_memory().unwrap();
        store.add_banlist(&entry()).unwrap();
        assert!(store.delete_banlist(&entry()).unwrap());
        assert_eq!(store.all_banlist().unwrap().len(), 0);
    }
}
