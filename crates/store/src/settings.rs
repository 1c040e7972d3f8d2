//! `settings` table operations (§3) — currently just the MOTD trio.

use rusqlite::params;

use crate::{Result, Store};

impl Store {
    pub fn get_setting(&self, item: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE item = ?1")?;
        let mut rows = stmt.query(params![item])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn set_setting(&self, item: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (item, value) VALUES (?1, ?2) \
             ON CONFLICT(item) DO UPDATE SET value = excluded.value",
            params![item, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_setting("motd").unwrap(), None);
        store.set_setting("motd", "hello").unwrap();
        assert_eq!(store.get_setting("motd").unwrap(), Some("hello".to_string()));
        store.set_setting("motd", "bye").unwrap();
        assert_eq!(store.get_setting("motd").unwrap(), Some("bye".to_string()));
    }
}
