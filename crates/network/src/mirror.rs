//! Mirror mesh JSON protocol, ports 10056 and 10059 (§4.8, component H).
//!
//! Inbound envelopes are parsed once into a typed [`Action`] (§9 design
//! note: "model the mirror protocol as a tagged union of messages with
//! typed payloads... unknown actions are explicitly rejected") and then
//! dispatched. Both the peer-mesh port and the admin port funnel through
//! [`handle_envelope`]; admission differs (checked by the caller) and the
//! admin port additionally allows `get-*` reads and is tagged with
//! `origin = "web"` for the rebroadcast-policy check.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use ld_core::{BanlistEntry, Mirror, ServerRecord};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::broadcaster::{self, Envelope};
use crate::context::Context;
use crate::error::NetworkError;
use crate::listener::Handler;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_READ_BYTES: usize = 12 * 2048;

/// Reparsed inbound wire message (§4.8 wire envelope).
#[derive(Debug, Deserialize)]
struct RawMessage {
    action: String,
    #[serde(default)]
    data: Vec<Value>,
    origin: String,
    #[serde(default)]
    fragment: Option<String>,
    #[serde(default)]
    mode: Option<u8>,
    #[serde(default)]
    lines: Option<u32>,
}

/// Admission context the caller already checked, passed in rather than
/// re-derived: which port this arrived on, and whether the connection is
/// the admin channel (enables `get-*` and tags `origin` as `"web"` for the
/// rebroadcast policy per §4.8).
pub struct Admission {
    pub is_admin: bool,
}

pub struct MirrorMeshHandler;

#[async_trait]
impl Handler for MirrorMeshHandler {
    async fn handle(&self, ctx: Context, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = run_over(ctx, stream, peer, Admission { is_admin: false }).await {
            info!(%peer, %err, "mirror mesh connection ended");
        }
    }
}

/// Runs the envelope protocol over any duplex stream — a plain
/// `TcpStream` for port 10056, or a `tokio_rustls` `TlsStream` for the
/// admin port (§9 design note: the handler is transport-agnostic once the
/// caller has performed admission/handshake checks).
pub(crate) async fn run_over<S>(
    ctx: Context,
    mut stream: S,
    peer: SocketAddr,
    admission: Admission,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ip = peer.ip().to_string();

    if !admission.is_admin {
        let known = ctx.mirrors.contains_key(&ip);
        if !known || Context::is_loopback(peer) || ctx.is_self(&ip) {
            warn!(%ip, "rejected on mirror mesh port: not a known peer");
            return Err(NetworkError::AuthorizationFailure("not a known mirror".into()));
        }
        ctx.store.touch_mirror_lifesign(&ip, ld_core::time::now())?;
    }

    let body = read_envelope(&mut stream).await?;
    let msg: RawMessage = serde_json::from_slice(&body).map_err(NetworkError::Serialization)?;

    if ctx.is_self(&msg.origin) {
        return Ok(()); // §8 testable property 7: loop suppression
    }

    let reply_origin: String = if admission.is_admin {
        "web".to_string()
    } else {
        msg.origin.clone()
    };

    let outcome = dispatch(&ctx, &msg, &reply_origin, &ip).await?;

    if let Some(reply) = outcome.direct_reply {
        let bytes = serde_json::to_vec(&reply).map_err(NetworkError::Serialization)?;
        stream.write_all(&bytes).await.map_err(NetworkError::Transient)?;
    }

    if reply_origin == "web" {
        rebroadcast(&ctx, &msg.action, &outcome.rebroadcast_items, &ip).await;
    }

    Ok(())
}

async fn read_envelope<S>(stream: &mut S) -> crate::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    let read_all = tokio::time::timeout(READ_TIMEOUT, async {
        loop {
            if buf.len() >= MAX_READ_BYTES {
                break Ok(());
            }
            if serde_json::from_slice::<Value>(&buf).is_ok() && !buf.is_empty() {
                break Ok(());
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break Err(std::io::Error::new(ErrorKind::UnexpectedEof, "closed mid-message"));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    })
    .await;

    match read_all {
        Ok(Ok(())) => Ok(buf),
        Ok(Err(err)) => Err(NetworkError::Transient(err)),
        Err(_) => Err(NetworkError::Transient(std::io::Error::new(
            ErrorKind::TimedOut,
            "mirror envelope read timeout",
        ))),
    }
}

#[derive(Default)]
struct Outcome {
    direct_reply: Option<Value>,
    /// Items that succeeded and qualify for rebroadcast under §4.8's policy.
    rebroadcast_items: Vec<Value>,
}

async fn dispatch(
    ctx: &Context,
    msg: &RawMessage,
    reply_origin: &str,
    sender_ip: &str,
) -> crate::Result<Outcome> {
    let mut outcome = Outcome::default();

    match msg.action.as_str() {
        "server" => {
            for item in &msg.data {
                if let Err(err) = apply_server(ctx, item.clone()) {
                    warn!(%err, "rejected server sync item");
                    continue;
                }
                outcome.rebroadcast_items.push(item.clone());
            }
        }
        "delist" => {
            for item in &msg.data {
                match apply_delist(ctx, item, &msg.origin) {
                    Ok(true) => outcome.rebroadcast_items.push(item.clone()),
                    Ok(false) => { /* cross-origin refusal, logged inside */ }
                    Err(err) => warn!(%err, "delist item failed"),
                }
            }
        }
        "add-banlist" => {
            for item in &msg.data {
                if let Ok(entry) = serde_json::from_value::<BanlistEntry>(item.clone()) {
                    if ctx.store.add_banlist(&entry).unwrap_or(false) {
                        outcome.rebroadcast_items.push(item.clone());
                    }
                }
            }
        }
        "delete-banlist" => {
            for item in &msg.data {
                if let Ok(entry) = serde_json::from_value::<BanlistEntry>(item.clone()) {
                    if ctx.store.delete_banlist(&entry).unwrap_or(false) {
                        outcome.rebroadcast_items.push(item.clone());
                    }
                }
            }
        }
        "add-mirror" => {
            for item in &msg.data {
                if let Ok(mirror) = serde_json::from_value::<Mirror>(item.clone()) {
                    if Mirror::is_reserved_name(&mirror.name) {
                        warn!(name = %mirror.name, "rejected reserved mirror name");
                        continue;
                    }
                    if ctx.store.add_mirror(&mirror).unwrap_or(false) {
                        ctx.mirrors.insert(mirror.address.clone(), mirror.clone());
                        outcome.rebroadcast_items.push(item.clone());
                        send_hello(ctx, &mirror.address).await;
                    }
                }
            }
        }
        "delete-mirror" => {
            for item in &msg.data {
                if let (Some(name), Some(address)) =
                    (item.get("name").and_then(Value::as_str), item.get("address").and_then(Value::as_str))
                {
                    if ctx.store.delete_mirror(name, address).unwrap_or(false) {
                        ctx.mirrors.remove(address);
                        outcome.rebroadcast_items.push(item.clone());
                    }
                }
            }
        }
        "set-motd" => {
            for item in &msg.data {
                if apply_set_motd(ctx, item).unwrap_or(false) {
                    outcome.rebroadcast_items.push(item.clone());
                }
            }
        }
        "request" | "hello" => {
            push_state(ctx, sender_ip, msg.fragment.as_deref(), reply_origin).await;
            if msg.action == "hello" {
                send_request(ctx, sender_ip, reply_origin).await;
            }
        }
        "request-log-from" => {
            for item in &msg.data {
                if let Some(target) = item.get("to").and_then(Value::as_str) {
                    send_request_log(ctx, target, msg.lines.unwrap_or(200), reply_origin).await;
                }
            }
        }
        "request-log" => {
            let lines = read_log_tail(msg.lines.unwrap_or(200));
            send_log(ctx, sender_ip, &lines, reply_origin).await;
        }
        "send-log" => {
            for item in &msg.data {
                if let Some(text) = item.get("lines").and_then(Value::as_str) {
                    persist_received_log(sender_ip, text);
                }
            }
        }
        "reload" => {
            if let Some(level) = msg.mode {
                info!(level, "reload requested via mirror mesh");
                // Supervisor inspects the stored request after this handler
                // returns (§4.11); persisted as a setting so it survives
                // the handler task ending.
                let _ = ctx.store.set_setting("reload-requested", &level.to_string());
            }
        }
        "ping" => {
            // Lifesign already touched at admission for the mesh port.
            // §9 open question: whether admin-port pings touch lifesign is
            // left unresolved by the source; this daemon does NOT touch it
            // for admin-port pings (decision recorded in DESIGN.md).
        }
        action if action.starts_with("get-") && reply_origin == "web" => {
            outcome.direct_reply = Some(handle_admin_read(ctx, action)?);
        }
        other => {
            warn!(action = %other, "unknown mirror action rejected");
            return Err(NetworkError::ProtocolViolation(format!("unknown action {other}")));
        }
    }

    Ok(outcome)
}

fn apply_server(ctx: &Context, item: Value) -> crate::Result<()> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| NetworkError::ProtocolViolation("server item missing id".into()))?
        .to_string();

    let existing = ctx.store.get_server(&id)?;
    let newly_created = existing.is_none();

    let ip = item.get("ip").and_then(Value::as_str).map(str::to_string);
    let port = item.get("port").and_then(Value::as_u64).map(|p| p as u16);

    if newly_created && (ip.is_none() || port.is_none()) {
        // §4.8: "if newly created and lacks ip/port, forget (partial
        // update before first announce)".
        return Ok(());
    }

    let mut record = existing.unwrap_or_else(|| {
        ServerRecord::create(&id, ip.clone().unwrap_or_default(), &item_origin(&item))
    });
    record.remote = true;

    if let Some(ip) = ip {
        record.ip = ip;
    }
    if let Some(port) = port {
        record.port = port;
    }
    if let Some(private) = item.get("private").and_then(Value::as_bool) {
        record.private = private;
    }
    if let Some(plusonly) = item.get("plusonly").and_then(Value::as_bool) {
        record.plusonly = plusonly;
    }
    if let Some(version) = item.get("version").and_then(Value::as_str) {
        record.version = version.to_string();
    }
    if let Some(mode) = item.get("mode").and_then(Value::as_str) {
        record.mode = ld_core::Mode::from_str_loose(mode);
    }
    if let Some(players) = item.get("players").and_then(Value::as_u64) {
        record.players = players as u32;
    }
    if let Some(max) = item.get("max").and_then(Value::as_u64) {
        record.max = max as u32;
    }
    if let Some(name) = item.get("name").and_then(Value::as_str) {
        record.name = ld_core::sanitize_name(name);
    }
    record.lifesign = ld_core::time::now();

    ctx.store.upsert_server_full(&record)?;
    Ok(())
}

fn item_origin(item: &Value) -> String {
    item.get("origin")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn apply_delist(ctx: &Context, item: &Value, msg_origin: &str) -> crate::Result<bool> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| NetworkError::ProtocolViolation("delist item missing id".into()))?;

    let Some(record) = ctx.store.get_server(id)? else {
        warn!(id, "delist for unknown server");
        return Err(NetworkError::StateConflict("unknown id".into()));
    };

    // §4.8: refuse cross-origin delistings of locally-owned servers.
    if !record.remote && record.origin != msg_origin {
        warn!(id, origin = msg_origin, "refused cross-origin delist of local server");
        return Ok(false);
    }

    ctx.store.delete_server(id)?;
    Ok(true)
}

fn apply_set_motd(ctx: &Context, item: &Value) -> crate::Result<bool> {
    use ld_core::setting::{DEFAULT_MOTD_LIFETIME_SECS, MOTD, MOTD_EXPIRES, MOTD_UPDATED};

    let updated: i64 = item
        .get("motd-updated")
        .and_then(Value::as_i64)
        .ok_or_else(|| NetworkError::ProtocolViolation("set-motd missing motd-updated".into()))?;

    let local_updated: i64 = ctx
        .store
        .get_setting(MOTD_UPDATED)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // §8 testable property 6: strictly-newer-wins.
    if updated <= local_updated {
        return Ok(false);
    }

    let text = item.get("motd").and_then(Value::as_str).unwrap_or_default();
    let expires = match item.get("motd-expires") {
        Some(Value::String(raw)) => parse_motd_expiry(raw).unwrap_or(updated + DEFAULT_MOTD_LIFETIME_SECS),
        Some(v) => v.as_i64().unwrap_or(updated + DEFAULT_MOTD_LIFETIME_SECS),
        None => updated + DEFAULT_MOTD_LIFETIME_SECS,
    };

    ctx.store.set_setting(MOTD, text)?;
    ctx.store.set_setting(MOTD_UPDATED, &updated.to_string())?;
    ctx.store.set_setting(MOTD_EXPIRES, &expires.to_string())?;
    Ok(true)
}

/// Parses `"DD-MM-YYYY HH:MM"` into an epoch, per §4.8.
fn parse_motd_expiry(raw: &str) -> Option<i64> {
    use chrono::{NaiveDateTime, TimeZone, Utc};
    let parsed = NaiveDateTime::parse_from_str(raw, "%d-%m-%Y %H:%M").ok()?;
    Some(Utc.from_utc_datetime(&parsed).timestamp())
}

async fn push_state(ctx: &Context, target_ip: &str, fragment: Option<&str>, reply_origin: &str) {
    // §9 open question: the source is ambiguous about whether an absent
    // fragment includes mirrors. This daemon pushes all fragments except
    // mirrors when the hint is absent (decision recorded in DESIGN.md).
    let want = |name: &str| match fragment {
        Some(f) => f == name,
        None => name != "mirrors",
    };

    if want("servers") {
        if let Ok(rows) = ctx.store.all_servers() {
            let data: Vec<Value> = rows
                .iter()
                .map(|r| Value::Object(r.to_full_map().into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
                .collect();
            send_envelope(ctx, target_ip, "server", Value::Array(data), reply_origin).await;
        }
    }
    if want("banlist") {
        if let Ok(rows) = ctx.store.all_banlist() {
            let data: Vec<Value> = rows.iter().filter_map(|e| serde_json::to_value(e).ok()).collect();
            send_envelope(ctx, target_ip, "add-banlist", Value::Array(data), reply_origin).await;
        }
    }
    if want("mirrors") {
        let data: Vec<Value> = ctx
            .mirrors
            .iter()
            .filter_map(|e| serde_json::to_value(e.value()).ok())
            .collect();
        send_envelope(ctx, target_ip, "add-mirror", Value::Array(data), reply_origin).await;
    }
    if want("motd") {
        if let Ok(Some(text)) = ctx.store.get_setting(ld_core::setting::MOTD) {
            // Stored as epoch strings; the wire envelope carries them as
            // JSON numbers, matching what `apply_set_motd` parses with
            // `Value::as_i64`.
            let updated: i64 = ctx
                .store
                .get_setting(ld_core::setting::MOTD_UPDATED)
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let expires: i64 = ctx
                .store
                .get_setting(ld_core::setting::MOTD_EXPIRES)
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            send_envelope(
                ctx,
                target_ip,
                "set-motd",
                Value::Array(vec![serde_json::json!({
                    "motd": text,
                    "motd-updated": updated,
                    "motd-expires": expires,
                })]),
                reply_origin,
            )
            .await;
        }
    }
}

async fn send_request(ctx: &Context, target_ip: &str, reply_origin: &str) {
    send_envelope(ctx, target_ip, "request", Value::Array(vec![]), reply_origin).await;
}

async fn send_hello(ctx: &Context, target_ip: &str) {
    send_envelope(
        ctx,
        target_ip,
        "hello",
        Value::Array(vec![serde_json::json!({"from": &*ctx.self_address})]),
        &ctx.self_address,
    )
    .await;
}

async fn send_request_log(ctx: &Context, target_ip: &str, lines: u32, reply_origin: &str) {
    send_envelope(
        ctx,
        target_ip,
        "request-log",
        Value::Array(vec![serde_json::json!({"lines": lines})]),
        reply_origin,
    )
    .await;
}

async fn send_log(ctx: &Context, target_ip: &str, lines: &str, reply_origin: &str) {
    send_envelope(
        ctx,
        target_ip,
        "send-log",
        Value::Array(vec![serde_json::json!({"lines": lines})]),
        reply_origin,
    )
    .await;
}

async fn send_envelope(ctx: &Context, target_ip: &str, action: &str, data: Value, origin: &str) {
    broadcaster::send_to(
        ctx,
        target_ip,
        &Envelope { action, data, origin, fragment: None },
    )
    .await;
}

/// Tail of the local log file (§4.8 `request-log`). Log rotation and file
/// naming are an external collaborator's concern (§1 non-goals); this just
/// reads whatever the logging layer currently writes to.
fn read_log_tail(lines: u32) -> String {
    let path = std::env::var("LISTD_LOG_FILE").unwrap_or_else(|_| "listd.log".to_string());
    match std::fs::read_to_string(&path) {
        Ok(content) => content
            .lines()
            .rev()
            .take(lines as usize)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n"),
        Err(_) => String::new(),
    }
}

fn persist_received_log(source_ip: &str, text: &str) {
    let filename = format!("mirror-log-{}-{}.txt", source_ip.replace(['.', ':'], "_"), ld_core::time::now());
    if let Err(err) = std::fs::write(&filename, text) {
        warn!(%err, %filename, "failed to persist received mirror log");
    }
}

fn handle_admin_read(ctx: &Context, action: &str) -> crate::Result<Value> {
    let value = match action {
        "get-servers" => serde_json::to_value(ctx.store.all_servers()?).map_err(NetworkError::Serialization)?,
        "get-banlist" => serde_json::to_value(ctx.store.all_banlist()?).map_err(NetworkError::Serialization)?,
        "get-motd" => Value::String(ctx.store.get_setting(ld_core::setting::MOTD)?.unwrap_or_default()),
        "get-motd-expires" => Value::String(ctx.store.get_setting(ld_core::setting::MOTD_EXPIRES)?.unwrap_or_default()),
        "get-mirrors" => {
            let mirrors: Vec<Mirror> = ctx.mirrors.iter().map(|e| e.value().clone()).collect();
            serde_json::to_value(mirrors).map_err(NetworkError::Serialization)?
        }
        other => return Err(NetworkError::ProtocolViolation(format!("unknown admin read {other}"))),
    };
    Ok(value)
}

/// Fans successful items out to all mirrors excluding the sender, per the
/// §4.8 rebroadcast policy (admin-origin, non-exempt actions only).
async fn rebroadcast(ctx: &Context, action: &str, items: &[Value], sender_ip: &str) {
    const EXEMPT: &[&str] = &["hello", "request", "delist", "request-log", "send-log", "request-log-from"];
    if items.is_empty() || EXEMPT.contains(&action) || action.starts_with("get-") {
        return;
    }
    for entry in ctx.mirrors.iter() {
        let address = entry.key();
        if address == sender_ip {
            continue;
        }
        send_envelope(
            ctx,
            address,
            action,
            Value::Array(items.to_vec()),
            &ctx.self_address,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_motd_expiry_format() {
        let epoch = parse_motd_expiry("25-12-2026 10:30").unwrap();
        assert!(epoch > 0);
    }

    #[test]
    fn rejects_malformed_motd_expiry() {
        assert!(parse_motd_expiry("not a date").is_none());
    }
}
