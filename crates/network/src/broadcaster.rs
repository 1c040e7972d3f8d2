//! Outbound fan-out to peer mirrors (§4.9, component I).

use std::net::IpAddr;
use std::time::Duration;

use ld_core::Mirror;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{error, info};

use crate::context::Context;
use crate::ports;

const CONNECT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct Envelope<'a> {
    pub action: &'a str,
    pub data: serde_json::Value,
    pub origin: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<&'a str>,
}

/// Sends `envelope` to every mirror in the cache except loopback addresses
/// and the daemon's own address (§4.9: "never targets loopback nor the
/// daemon's own IP").
pub async fn broadcast(ctx: &Context, envelope: &Envelope<'_>) {
    let targets: Vec<Mirror> = ctx
        .mirrors
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|m| !is_loopback_str(&m.address) && !ctx.is_self(&m.address))
        .collect();

    for mirror in targets {
        send_one(&mirror.address, envelope).await;
    }
}

/// Sends `envelope` to a single named recipient, used for request/hello
/// replies and rebroadcast-excluding-sender fan-out (§4.8).
pub async fn send_to(ctx: &Context, address: &str, envelope: &Envelope<'_>) {
    if is_loopback_str(address) || ctx.is_self(address) {
        return;
    }
    send_one(address, envelope).await;
}

async fn send_one(address: &str, envelope: &Envelope<'_>) {
    let body = match serde_json::to_vec(envelope) {
        Ok(b) => b,
        Err(err) => {
            error!(%err, %address, "failed to serialize broadcast envelope");
            return;
        }
    };

    let target = format!("{address}:{}", ports::MIRROR_MESH);
    let attempt = tokio::time::timeout(CONNECT_SEND_TIMEOUT, async {
        let mut stream = TcpStream::connect(&target).await?;
        stream.write_all(&body).await?;
        stream.shutdown().await
    })
    .await;

    match attempt {
        Ok(Ok(())) => {}
        Ok(Err(err)) => info!(%err, %address, "broadcast send failed"),
        Err(_) => info!(%address, "broadcast send timed out"),
    }
}

fn is_loopback_str(address: &str) -> bool {
    address.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_addresses_are_recognized() {
        assert!(is_loopback_str("127.0.0.1"));
        assert!(is_loopback_str("::1"));
        assert!(!is_loopback_str("10.0.0.1"));
        assert!(!is_loopback_str("not-an-ip"));
    }
}
