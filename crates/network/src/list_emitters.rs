//! Short-lived read-only responders: ASCII list, binary list, stats, MOTD
//! (§4.7, component G).

use std::net::SocketAddr;

use async_trait::async_trait;
use ld_core::ServerRecord;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

use crate::context::Context;
use crate::listener::Handler;

/// Reserved test-net IPs (§4.7, §8 scenario 6) used for the three fixed
/// binary-list "advertisement" entries promoting the mod client.
const AD_ENTRIES: [(&str, [u8; 4], &str); 3] = [
    ("192.0.2.0", [192, 0, 2, 0], "Get Jazz2Plus at jj2.plus"),
    ("192.0.2.1", [192, 0, 2, 1], "Mod required for modded servers"),
    ("192.0.2.2", [192, 0, 2, 2], "http://jj2.plus"),
];
const AD_PORT: u16 = 80;

pub struct AsciiListHandler;
pub struct BinaryListHandler;
pub struct StatsHandler {
    pub started_at: i64,
    pub source_link: String,
}
pub struct MotdHandler;

#[async_trait]
impl Handler for AsciiListHandler {
    async fn handle(&self, ctx: Context, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = respond(&ctx, &mut stream).await {
            info!(%peer, %err, "ascii list emitter failed");
        }
    }
}

async fn respond(ctx: &Context, stream: &mut TcpStream) -> std::io::Result<()> {
    let body = render_ascii_list(ctx).unwrap_or_default();
    stream.write_all(body.as_bytes()).await
}

fn render_ascii_list(ctx: &Context) -> ld_store::Result<String> {
    let settings = ctx.settings.get();
    let now = ld_core::time::now();
    // §4.7: "cleanup + query" — sweep lifesign-expired remote rows before
    // reading, so §8 testable property 2 holds at the moment of the read.
    ctx.store.sweep_expired_remote(now, settings.timeout_secs)?;
    let rows = ctx.store.list_servers_ordered()?;
    let mut out = String::new();
    for row in &rows {
        out.push_str(&render_ascii_line(row, now));
    }
    Ok(out)
}

fn render_ascii_line(row: &ServerRecord, now: i64) -> String {
    let origin = if row.remote { "mirror" } else { "local" };
    let visibility = if row.private { "private" } else { "public" };
    let uptime = (now - row.created).max(0);
    let version = format!("{:<6}", row.version);
    format!(
        "{}:{} {} {} {} {} {} [{}/{}] {}\r\n",
        row.ip, row.port, origin, visibility, row.mode, version, uptime, row.players, row.max, row.name
    )
}

#[async_trait]
impl Handler for BinaryListHandler {
    async fn handle(&self, ctx: Context, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = respond_binary(&ctx, &mut stream).await {
            info!(%peer, %err, "binary list emitter failed");
        }
    }
}

async fn respond_binary(ctx: &Context, stream: &mut TcpStream) -> std::io::Result<()> {
    let body = render_binary_list(ctx).unwrap_or_default();
    stream.write_all(&body).await
}

fn render_binary_list(ctx: &Context) -> ld_store::Result<Vec<u8>> {
    let settings = ctx.settings.get();
    let now = ld_core::time::now();
    ctx.store.sweep_expired_remote(now, settings.timeout_secs)?;
    let rows = ctx.store.list_servers_ordered()?;
    let mut out = Vec::new();
    out.extend_from_slice(&[0x07, b'L', b'I', b'S', b'T', 0x01, 0x01]);

    for (_, ip_bytes, name) in &AD_ENTRIES {
        push_entry(&mut out, *ip_bytes, AD_PORT, name);
    }

    for row in rows.iter().filter(|r| !r.plusonly) {
        if let Some(octets) = parse_ipv4(&row.ip) {
            push_entry(&mut out, octets, row.port, &row.name);
        }
    }

    Ok(out)
}

fn push_entry(out: &mut Vec<u8>, ip: [u8; 4], port: u16, name: &str) {
    let name_bytes = name.as_bytes();
    out.push((name_bytes.len() + 7) as u8);
    // Reversed octet order per §4.7/§8 scenario 6.
    out.push(ip[3]);
    out.push(ip[2]);
    out.push(ip[1]);
    out.push(ip[0]);
    out.extend_from_slice(&port.to_le_bytes());
    out.extend_from_slice(name_bytes);
}

fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let ip: std::net::Ipv4Addr = s.parse().ok()?;
    Some(ip.octets())
}

#[async_trait]
impl Handler for StatsHandler {
    async fn handle(&self, ctx: Context, mut stream: TcpStream, peer: SocketAddr) {
        let body = render_stats(&ctx, self.started_at, &self.source_link).unwrap_or_default();
        if let Err(err) = stream.write_all(body.as_bytes()).await {
            info!(%peer, %err, "stats emitter failed");
        }
    }
}

fn render_stats(ctx: &Context, started_at: i64, source_link: &str) -> ld_store::Result<String> {
    let now = ld_core::time::now();
    let rows = ctx.store.all_servers()?;
    let (local, remote): (Vec<_>, Vec<_>) = rows.iter().partition(|r| !r.remote);
    let total_players: u32 = rows.iter().map(|r| r.players).sum();
    let uptime = ld_core::format_uptime(now - started_at);

    // The in-memory mirror cache doesn't track `lifesign` updates (§4.8
    // only touches it on mesh admission); read the store directly so a
    // mirror that's still alive isn't shown as inactive.
    let mut mirrors: Vec<String> = ctx
        .store
        .all_mirrors()?
        .into_iter()
        .map(|m| {
            if m.is_stale(now) {
                format!("{} ({}) (inactive)", m.name, m.address)
            } else {
                format!("{} ({})", m.name, m.address)
            }
        })
        .collect();
    mirrors.sort();

    let settings = ctx.settings.get();
    Ok(format!(
        "address: {}\nstarted: {}\nuptime: {}\nlocal servers: {}\nmirrored servers: {}\ntotal players: {}\nmirrors: {}\nversion: {}\nsource: {}\n",
        &*ctx.self_address,
        started_at,
        uptime,
        local.len(),
        remote.len(),
        total_players,
        mirrors.join(", "),
        settings.version,
        source_link,
    ))
}

#[async_trait]
impl Handler for MotdHandler {
    async fn handle(&self, ctx: Context, mut stream: TcpStream, peer: SocketAddr) {
        let body = render_motd(&ctx).unwrap_or_default();
        if let Err(err) = stream.write_all(body.as_bytes()).await {
            info!(%peer, %err, "motd emitter failed");
        }
    }
}

fn render_motd(ctx: &Context) -> ld_store::Result<String> {
    use ld_core::setting::{MOTD, MOTD_EXPIRES};
    let now = ld_core::time::now();
    let expires: i64 = ctx
        .store
        .get_setting(MOTD_EXPIRES)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if expires <= now {
        return Ok(String::new());
    }
    Ok(ctx.store.get_setting(MOTD)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ld_core::ServerRecord;

    #[test]
    fn ascii_line_matches_expected_shape() {
        let mut row = ServerRecord::create("1.2.3.4:10112", "1.2.3.4", "self");
        row.set_port(10112);
        row.set_players(1, 32);
        row.set_max(32, 32);
        row.set_version("1.24  ");
        row.set_name("testsrv");
        let line = render_ascii_line(&row, row.created);
        assert!(line.starts_with("1.2.3.4:10112 local public unknown 1.24  "));
        assert!(line.contains("[1/32] testsrv"));
    }

    #[test]
    fn binary_list_begins_with_fixed_header_and_ad_entries() {
        use ld_store::Store;
        let store = Store::open_in_memory().unwrap();
        let ctx_mirrors: crate::context::MirrorCache = std::sync::Arc::new(dashmap::DashMap::new());
        let ctx = Context::new(
            std::sync::Arc::new(store),
            ld_config::SharedSettings::new(ld_config::Settings::default()),
            ctx_mirrors,
            std::sync::Arc::new(crate::webhook::NullSink),
            "self".to_string(),
        );
        let body = render_binary_list(&ctx).unwrap();
        assert_eq!(&body[0..7], &[0x07, b'L', b'I', b'S', b'T', 0x01, 0x01]);
        // first ad entry: len = name.len()+7, reversed 192.0.2.0, port 80 LE
        let name_len = AD_ENTRIES[0].2.len();
        assert_eq!(body[7] as usize, name_len + 7);
        assert_eq!(&body[8..12], &[0, 2, 0, 192]);
        assert_eq!(&body[12..14], &80u16.to_le_bytes());
    }

    #[test]
    fn motd_empty_when_expired() {
        use ld_store::Store;
        let store = Store::open_in_memory().unwrap();
        store.set_setting(ld_core::setting::MOTD, "hi").unwrap();
        store.set_setting(ld_core::setting::MOTD_EXPIRES, "1").unwrap();
        let ctx_mirrors: crate::context::MirrorCache = std::sync::Arc::new(dashmap::DashMap::new());
        let ctx = Context::new(
            std::sync::Arc::new(store),
            ld_config::SharedSettings::new(ld_config::Settings::default()),
            ctx_mirrors,
            std::sync::Arc::new(crate::webhook::NullSink),
            "self".to_string(),
        );
        assert_eq!(render_motd(&ctx).unwrap(), "");
    }
}
