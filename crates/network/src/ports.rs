//! Fixed port assignments (§6 EXTERNAL INTERFACES).

/// Binary list (read-only, vanilla clients).
pub const BINARY_LIST: u16 = 10053;
/// Live-server registration session (long-lived).
pub const LIVE_SERVER: u16 = 10054;
/// Human-readable stats block.
pub const STATS: u16 = 10055;
/// Mirror mesh inbound, JSON.
pub const MIRROR_MESH: u16 = 10056;
/// ASCII list (read-only).
pub const ASCII_LIST: u16 = 10057;
/// Message-of-the-day.
pub const MOTD: u16 = 10058;
/// Admin/API, mutual TLS, loopback only.
pub const ADMIN: u16 = 10059;

/// Accept-loop quantum so a halt flag is observed promptly (§5).
pub const ACCEPT_TIMEOUT_SECS: u64 = 5;
/// Bind-contention retry window (§4.5).
pub const BIND_RETRY_WINDOW_SECS: u64 = 300;
pub const BIND_RETRY_INTERVAL_SECS: u64 = 5;
