//! Out-of-band UDP prober (§4.10, component J): periodically re-validates
//! a locally-owned server's self-reported privacy flag by asking the
//! live game server directly, and nudges its sort-order `prefer` bit
//! based on whether it answers at all.

use std::time::Duration;

use ld_core::ServerRecord;
use ld_store::Store;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Cadence between probe attempts (§4.10).
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// The 12-byte query payload (§6); the 2-byte Fletcher checksum is
/// prepended separately by [`build_packet`].
const QUERY_PAYLOAD: [u8; 12] = [
    0x79, 0x79, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x32, 0x34, 0x20, 0x20,
];

/// Rolling-sum checksum (mod 251) over `payload`, matching §6/§4.10's
/// "Fletcher-style running checksum ... over bytes 2..end".
fn fletcher_checksum(payload: &[u8]) -> (u8, u8) {
    let mut x: u32 = 0;
    let mut y: u32 = 0;
    for &b in payload {
        x = (x + b as u32) % 251;
        y = (y + x) % 251;
    }
    (x as u8, y as u8)
}

fn build_packet() -> [u8; 14] {
    let (x, y) = fletcher_checksum(&QUERY_PAYLOAD);
    let mut packet = [0u8; 14];
    packet[0] = x;
    packet[1] = y;
    packet[2..].copy_from_slice(&QUERY_PAYLOAD);
    packet
}

/// Whether bit 5 of byte 8 of the reply indicates the server considers
/// itself private (§4.10: "inspect byte 8 bit 5 to observe the server's
/// own privacy flag").
fn reply_claims_private(reply: &[u8]) -> Option<bool> {
    reply.get(8).map(|b| b & 0b0010_0000 != 0)
}

/// Runs the prober loop until `store` is dropped or the process exits;
/// the supervisor spawns this as one of its fixed background tasks (§5).
pub async fn run(store: std::sync::Arc<Store>) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = probe_one(&store).await {
            warn!(%err, "probe cycle failed");
        }
    }
}

async fn probe_one(store: &Store) -> ld_store::Result<()> {
    use ld_core::banlist::Matcher;

    let now = ld_core::time::now();
    let Some(mut record) = store.oldest_unpinged_local(now)? else {
        return Ok(());
    };

    store.touch_last_ping(&record.id, now)?;

    let probe_ok = match query(&record).await {
        Some(reply) => {
            if let Some(claims_private) = reply_claims_private(&reply) {
                if claims_private != record.private {
                    record.set_private(claims_private);
                    let delta = record.flush_updates();
                    store.apply_delta(&delta)?;
                }
            }
            true
        }
        None => false,
    };

    // §4.3/§ GLOSSARY: an explicit `prefer`/`unprefer` banlist row is an
    // operator override on top of the probe-driven sort order; it wins
    // over whatever the probe itself observed.
    let banlist = store.all_banlist()?;
    let matcher = Matcher::new(&banlist);
    let prefer = if matcher.preferred(&record.ip, &record.name) {
        true
    } else if matcher.unpreferred(&record.ip, &record.name) {
        false
    } else {
        probe_ok
    };

    set_prefer(store, &mut record, prefer)?;
    Ok(())
}

fn set_prefer(store: &Store, record: &mut ServerRecord, prefer: bool) -> ld_store::Result<()> {
    if record.prefer == prefer {
        return Ok(());
    }
    record.set_prefer(prefer);
    let delta = record.flush_updates();
    store.apply_delta(&delta)
}

async fn query(record: &ServerRecord) -> Option<Vec<u8>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    let target = format!("{}:{}", record.ip, record.port);
    let packet = build_packet();

    socket.send_to(&packet, &target).await.ok()?;

    let mut buf = [0u8; 64];
    let recv = tokio::time::timeout(REPLY_TIMEOUT, socket.recv(&mut buf)).await;
    match recv {
        Ok(Ok(n)) => {
            debug!(id = %record.id, n, "probe reply received");
            Some(buf[..n].to_vec())
        }
        Ok(Err(err)) => {
            info!(id = %record.id, %err, "probe socket error");
            None
        }
        Err(_) => {
            info!(id = %record.id, "probe timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_accumulates_mod_251() {
        let (x, y) = fletcher_checksum(&QUERY_PAYLOAD);
        // Recompute by hand to confirm the accumulator definition.
        let mut ex = 0u32;
        let mut ey = 0u32;
        for &b in &QUERY_PAYLOAD {
            ex = (ex + b as u32) % 251;
            ey = (ey + ex) % 251;
        }
        assert_eq!(x as u32, ex);
        assert_eq!(y as u32, ey);
    }

    #[test]
    fn packet_layout_matches_spec() {
        let packet = build_packet();
        assert_eq!(packet.len(), 14);
        assert_eq!(&packet[2..], &QUERY_PAYLOAD);
    }

    #[test]
    fn privacy_bit_is_bit_five_of_byte_eight() {
        let mut reply = [0u8; 16];
        reply[8] = 0b0010_0000;
        assert_eq!(reply_claims_private(&reply), Some(true));
        reply[8] = 0;
        assert_eq!(reply_claims_private(&reply), Some(false));
        assert_eq!(reply_claims_private(&[0u8; 4]), None);
    }

    #[tokio::test]
    async fn probe_cycle_is_noop_when_nothing_is_due() {
        let store = Store::open_in_memory().unwrap();
        probe_one(&store).await.unwrap();
    }

    #[tokio::test]
    async fn unprefer_banlist_row_overrides_a_successful_probe() {
        use ld_core::banlist::{BanlistEntry, BanlistType, Matcher};

        let mut record = ServerRecord::create("203.0.113.9:1000", "203.0.113.9", "self");
        record.set_name("noisy");

        let entries = vec![BanlistEntry {
            address: "203.0.113.*".to_string(),
            kind: BanlistType::Unprefer,
            note: String::new(),
            origin: "self".to_string(),
            reserved: String::new(),
        }];
        let matcher = Matcher::new(&entries);

        // Even though a probe succeeding would normally set prefer=true,
        // an explicit `unprefer` row wins.
        let probe_ok = true;
        let prefer = if matcher.preferred(&record.ip, &record.name) {
            true
        } else if matcher.unpreferred(&record.ip, &record.name) {
            false
        } else {
            probe_ok
        };
        assert!(!prefer);
    }
}
