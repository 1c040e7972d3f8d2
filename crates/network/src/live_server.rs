//! Live-server session protocol, port 10054 (§4.6, component F).
//!
//! One task per session, owning its `ServerRecord` exclusively for the
//! session's lifetime (§5: "within a single live-server session, updates
//! are applied in arrival order and broadcast in the same order").

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use ld_core::banlist::Matcher;
use ld_core::{Mode, ServerRecord};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::broadcaster::{self, Envelope};
use crate::context::Context;
use crate::error::NetworkError;
use crate::listener::Handler;

const HELLO_LEN: usize = 42;
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(32);

pub struct LiveServerHandler;

#[async_trait]
impl Handler for LiveServerHandler {
    async fn handle(&self, ctx: Context, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = run_session(ctx, stream, peer).await {
            info!(%peer, %err, "live-server session ended");
        }
    }
}

async fn run_session(ctx: Context, mut stream: TcpStream, peer: SocketAddr) -> crate::Result<()> {
    let mut buf = [0u8; HELLO_LEN];
    let read = tokio::time::timeout(HELLO_TIMEOUT, stream.read_exact(&mut buf)).await;
    let read = match read {
        Ok(r) => r,
        Err(_) => return Err(NetworkError::Transient(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "hello timeout",
        ))),
    };
    read.map_err(NetworkError::Transient)?;

    let hello = match parse_hello(&buf) {
        Some(h) => h,
        None => {
            reply_error(&mut stream, "malformed hello").await;
            return Err(NetworkError::ProtocolViolation("malformed hello".into()));
        }
    };

    let ip = peer.ip().to_string();
    let id = format!("{ip}:{}", peer.port());

    let settings = ctx.settings.get();
    let banlist = ctx.store.all_banlist()?;
    let mirror_addrs: Vec<String> = ctx.mirrors.iter().map(|e| e.key().clone()).collect();
    let matcher = Matcher::new(&banlist);

    if !matcher.whitelisted(&ip) {
        let owned = ctx.store.count_local_by_ip(&ip)?;
        if owned >= settings.max_servers {
            reply_error(&mut stream, "too many servers from this address").await;
            return Err(NetworkError::StateConflict("MAXSERVERS exceeded".into()));
        }
    }

    if ctx.store.exists_ip_port(&ip, hello.port)? {
        reply_error(&mut stream, "reconnecting too fast").await;
        return Err(NetworkError::StateConflict("duplicate ip:port".into()));
    }

    let mut record = ServerRecord::create(&id, &ip, &*ctx.self_address);
    record.set_port(hello.port);
    record.set_players(hello.players as u32, settings.max_players);
    record.set_max(hello.max_players as u32, settings.max_players);
    record.set_private(hello.private);
    record.set_plusonly(hello.plusonly);
    record.set_mode(hello.mode);
    record.set_version(hello.version);
    apply_name(&mut record, &hello.name, &matcher, &ip);
    record.flush_updates(); // discard: the upsert below writes the full row

    ctx.store.insert_server(&record)?;
    broadcast_full(&ctx, &record).await;
    info!(%ip, port = hello.port, name = %record.name, "server listed");

    let result = session_loop(&ctx, &mut stream, &mut record, &mirror_addrs).await;

    ctx.store.delete_server(&record.id)?;
    broadcast_delist(&ctx, &record.id).await;
    info!(id = %record.id, "server delisted");

    result
}

async fn session_loop(
    ctx: &Context,
    stream: &mut TcpStream,
    record: &mut ServerRecord,
    mirror_addrs: &[String],
) -> crate::Result<()> {
    let settings = ctx.settings.get();
    let mut probed = false;

    loop {
        if ctx.halt.is_tripped() {
            return Ok(());
        }

        let banlist = ctx.store.all_banlist()?;
        let matcher = Matcher::new(&banlist);
        if matcher.banned(&record.ip, mirror_addrs) {
            return Err(NetworkError::AuthorizationFailure("banned while listed".into()));
        }

        let mut opcode = [0u8; 2];
        let read = tokio::time::timeout(IDLE_TIMEOUT, stream.read_exact(&mut opcode)).await;

        let n = match read {
            Ok(Ok(())) => Some(()),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => None,
            Ok(Err(err)) => return Err(NetworkError::Transient(err)),
            Err(_) => {
                // §4.6 timeout path: send one probe byte, see if it lands.
                if probed {
                    return Ok(());
                }
                probed = true;
                if stream.write_all(&[0u8]).await.is_err() {
                    return Ok(());
                }
                continue;
            }
        };
        probed = false;

        let Some(()) = n else { return Ok(()) };

        let applied = match opcode[0] {
            0x00 => {
                let players = opcode[1] as u32;
                if players != record.players {
                    record.set_players(players, settings.max_players);
                }
                true
            }
            0x01 => {
                record.set_mode(Mode::from_code(opcode[1]));
                true
            }
            0x02 => {
                // §4.6: the name update is `0x02` followed by 32 bytes of
                // name, but `opcode[1]` already holds the first of those 32
                // — only 31 more remain on the wire.
                let mut rest = [0u8; 31];
                if stream.read_exact(&mut rest).await.is_err() {
                    return Ok(());
                }
                let name_buf = name_update_buf(opcode[1], &rest);
                let raw = ld_core::sanitize_name_bytes(&name_buf);
                let banlist = ctx.store.all_banlist()?;
                let matcher = Matcher::new(&banlist);
                let ip = record.ip.clone();
                apply_name(record, &raw, &matcher, &ip);
                true
            }
            0x03 => {
                record.set_max(opcode[1] as u32, settings.max_players);
                true
            }
            0x04 => {
                record.set_private(opcode[1] & 1 != 0);
                true
            }
            0x05 => {
                record.set_plusonly(opcode[1] & 1 != 0);
                true
            }
            _ => {
                reply_error(stream, "unknown opcode").await;
                return Err(NetworkError::ProtocolViolation(format!(
                    "unknown opcode {:#x}",
                    opcode[0]
                )));
            }
        };

        if applied {
            let delta = record.flush_updates();
            ctx.store.apply_delta(&delta)?;
            let data = serde_json::to_value(&delta).map_err(NetworkError::Serialization)?;
            broadcaster::broadcast(
                ctx,
                &Envelope {
                    action: "server",
                    data: serde_json::Value::Array(vec![data]),
                    origin: &ctx.self_address,
                    fragment: None,
                },
            )
            .await;
        }
    }
}

/// Reassembles the 32-byte name out of the opcode's second byte (the
/// first name byte) and the 31 bytes read after it (§4.6 opcode `0x02`).
fn name_update_buf(first: u8, rest: &[u8; 31]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[0] = first;
    buf[1..].copy_from_slice(rest);
    buf
}

fn apply_name(record: &mut ServerRecord, raw: &str, matcher: &Matcher<'_>, ip: &str) {
    if matcher.name_is_reserved_elsewhere(ip, raw) {
        record.set_name(&format!("Server on {ip}"));
    } else {
        record.set_name(raw);
    }
}

async fn broadcast_full(ctx: &Context, record: &ServerRecord) {
    let data = serde_json::Value::Object(
        record
            .to_full_map()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    );
    broadcaster::broadcast(
        ctx,
        &Envelope {
            action: "server",
            data: serde_json::Value::Array(vec![data]),
            origin: &ctx.self_address,
            fragment: None,
        },
    )
    .await;
}

async fn broadcast_delist(ctx: &Context, id: &str) {
    broadcaster::broadcast(
        ctx,
        &Envelope {
            action: "delist",
            data: serde_json::Value::Array(vec![serde_json::json!({ "id": id })]),
            origin: &ctx.self_address,
            fragment: None,
        },
    )
    .await;
}

async fn reply_error(stream: &mut TcpStream, reason: &str) {
    let line = NetworkError::guru_meditation(reason);
    let _ = stream.write_all(line.as_bytes()).await;
}

struct Hello {
    port: u16,
    name: String,
    players: u8,
    max_players: u8,
    private: bool,
    mode: Mode,
    plusonly: bool,
    version: String,
}

/// Parses the dominant 42-byte hello layout (§4.6); the spec flags an
/// alternate 32-byte-name layout as unconfirmed (§9) and it is not
/// implemented here.
fn parse_hello(buf: &[u8; HELLO_LEN]) -> Option<Hello> {
    let port = u16::from_le_bytes([buf[0], buf[1]]);
    let name = ld_core::sanitize_name_bytes(&buf[2..35]);
    let players = buf[35];
    let max_players = buf[36];
    let flags = buf[37];
    let private = flags & 0b0000_0001 != 0;
    let mode_code = (flags >> 1) & 0b0001_1111;
    let plusonly = flags & 0b1000_0000 != 0;

    let version_tag = std::str::from_utf8(&buf[38..42]).ok()?;
    let base = match &version_tag[0..2.min(version_tag.len())] {
        "21" => "1.23",
        _ => "1.24",
    };
    let version = format!("{base}{}", &version_tag[2.min(version_tag.len())..]);

    Some(Hello {
        port,
        name,
        players,
        max_players,
        private,
        mode: Mode::from_code(mode_code),
        plusonly,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_bytes(port: u16, name: &str, players: u8, max: u8, flags: u8, version: &str) -> [u8; HELLO_LEN] {
        let mut buf = [0u8; HELLO_LEN];
        buf[0..2].copy_from_slice(&port.to_le_bytes());
        let name_bytes = name.as_bytes();
        buf[2..2 + name_bytes.len().min(33)].copy_from_slice(&name_bytes[..name_bytes.len().min(33)]);
        buf[35] = players;
        buf[36] = max;
        buf[37] = flags;
        let v = version.as_bytes();
        buf[38..38 + v.len().min(4)].copy_from_slice(&v[..v.len().min(4)]);
        buf
    }

    #[test]
    fn parses_standard_hello() {
        let buf = hello_bytes(10112, "testsrv", 1, 32, 0b0000_0010, "24  ");
        let hello = parse_hello(&buf).unwrap();
        assert_eq!(hello.port, 10112);
        assert_eq!(hello.name, "testsrv");
        assert_eq!(hello.players, 1);
        assert_eq!(hello.max_players, 32);
        assert_eq!(hello.mode, Mode::Battle);
        assert_eq!(hello.version, "1.24  ");
        assert!(!hello.private);
        assert!(!hello.plusonly);
    }

    #[test]
    fn version_tag_21_maps_to_123() {
        let buf = hello_bytes(1, "x", 0, 1, 0, "21a ");
        let hello = parse_hello(&buf).unwrap();
        assert_eq!(hello.version, "1.23a ");
    }

    #[test]
    fn flag_bits_decode_private_and_plusonly() {
        let buf = hello_bytes(1, "x", 0, 1, 0b1000_0001, "24  ");
        let hello = parse_hello(&buf).unwrap();
        assert!(hello.private);
        assert!(hello.plusonly);
    }

    #[test]
    fn name_update_buf_places_opcode_byte_first() {
        let rest = [b'e', b's', b't', b's', b'r', b'v', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let buf = name_update_buf(b't', &rest);
        assert_eq!(&buf[..7], b"testsrv");
        assert_eq!(buf.len(), 32);
    }
}
