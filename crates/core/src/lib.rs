//! Domain types and pure logic for the list-server daemon: server records,
//! banlist matching, mirrors, settings, name sanitization and the small
//! glob matcher the banlist uses. Nothing here touches sockets or SQL —
//! those live in `ld-network` and `ld-store` respectively, following the
//! teacher's split between a `neo-core` domain crate and the I/O-heavy
//! `neo-network`/`neo-persistence` crates.

pub mod banlist;
pub mod error;
pub mod glob;
pub mod mirror;
pub mod mode;
pub mod sanitize;
pub mod server_record;
pub mod setting;
pub mod time;

pub use banlist::{BanlistEntry, BanlistType, Matcher};
pub use error::{CoreError, Result};
pub use mirror::Mirror;
pub use mode::Mode;
pub use sanitize::{sanitize_name, sanitize_name_bytes};
pub use server_record::{ServerDelta, ServerRecord};
pub use time::{format_uptime, now};
