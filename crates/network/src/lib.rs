//! Port listener pool, live-server session protocol, list emitters, mirror
//! mesh and broadcaster.
//!
//! Every TCP/UDP port the daemon listens on (§2, components A/E/F/G/H) is
//! built on the same shape: a [`listener`] accept loop that consults a
//! [`RateLimiter`] and the banlist `Matcher` before handing the connection
//! to a port-specific handler. The mirror mesh (§4.8) and broadcaster
//! (§4.9) reuse the `Context` that carries the shared `Store`, `Settings`
//! and in-memory mirror cache.

pub mod broadcaster;
pub mod context;
pub mod error;
pub mod list_emitters;
pub mod live_server;
pub mod listener;
pub mod mirror;
pub mod ports;
pub mod rate_limiter;
pub mod tls;
pub mod webhook;

pub use context::Context;
pub use error::{NetworkError, Result};
pub use rate_limiter::RateLimiter;
