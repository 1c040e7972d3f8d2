//! Generic per-port accept loop (§4.5, component E).
//!
//! One [`Listener`] owns one port, one [`RateLimiter`] and one bind-retry
//! policy. Ban/whitelist checks re-read the banlist from the store on every
//! accept since it is the single source of truth (§9 design note); the rate
//! limiter is the only state this loop owns privately (§5: "the connection
//! registry per listener [is] owned by exactly one thread").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use ld_core::banlist::Matcher;

use crate::context::Context;
use crate::ports::{ACCEPT_TIMEOUT_SECS, BIND_RETRY_INTERVAL_SECS, BIND_RETRY_WINDOW_SECS};
use crate::rate_limiter::RateLimiter;

/// Upper bound on simultaneous handlers for a single port (§9 redesign
/// flag: "impose an upper bound on simultaneous handlers per port").
const MAX_CONCURRENT_HANDLERS: usize = 256;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, stream: TcpStream, peer: SocketAddr);
}

/// Binds `port` on all interfaces, retrying on contention for up to five
/// minutes (§4.5). Returns `None` if the port never became available, in
/// which case the caller downgrades it to unavailable rather than crashing
/// the daemon (§7).
pub async fn bind_with_retry(port: u16) -> Option<TcpListener> {
    bind_host_with_retry("0.0.0.0", port).await
}

/// Binds `port` on loopback only (§4.5: the admin port "is bound to
/// loopback only"). Kept as a distinct entry point rather than a flag on
/// [`bind_with_retry`] so the admin listener can never accidentally end up
/// on a public interface.
pub async fn bind_loopback_with_retry(port: u16) -> Option<TcpListener> {
    bind_host_with_retry("127.0.0.1", port).await
}

async fn bind_host_with_retry(host: &str, port: u16) -> Option<TcpListener> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(BIND_RETRY_WINDOW_SECS);
    loop {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Some(listener),
            Err(err) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!(%err, port, "giving up binding port after retry window");
                    return None;
                }
                warn!(%err, port, "bind failed, retrying");
                tokio::time::sleep(Duration::from_secs(BIND_RETRY_INTERVAL_SECS)).await;
            }
        }
    }
}

/// Runs the accept loop for `listener` until `ctx.halt` is tripped.
pub async fn serve(ctx: Context, port: u16, listener: TcpListener, handler: Arc<dyn Handler>) {
    let mut rate_limiter = {
        let settings = ctx.settings.get();
        RateLimiter::new(
            settings.ticks_max,
            settings.ticks_decay,
            settings.ticks_max_age_secs,
        )
    };
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_HANDLERS));

    while !ctx.halt.is_tripped() {
        let accepted = tokio::time::timeout(
            Duration::from_secs(ACCEPT_TIMEOUT_SECS),
            listener.accept(),
        )
        .await;

        let (stream, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => {
                warn!(%err, port, "accept failed");
                continue;
            }
            Err(_) => continue, // quantum elapsed, re-check halt flag
        };

        let ip = peer.ip().to_string();

        let banlist = match ctx.store.all_banlist() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, port, "could not load banlist, refusing connection");
                continue;
            }
        };
        let mirror_addrs: Vec<String> = ctx.mirrors.iter().map(|e| e.key().clone()).collect();
        let matcher = Matcher::new(&banlist);
        if matcher.banned(&ip, &mirror_addrs) {
            warn!(%ip, port, "rejected: banned");
            continue;
        }

        if !matcher.whitelisted(&ip) {
            let now = ld_core::time::now();
            if !rate_limiter.admit(&ip, now) {
                warn!(%ip, port, "rejected: rate limited");
                continue;
            }
        }

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!(%ip, port, "rejected: too many concurrent handlers");
            continue;
        };

        let ctx = ctx.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handler.handle(ctx, stream, peer).await;
        });
    }
    info!(port, "listener halted");
}
