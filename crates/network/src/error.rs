//! Error taxonomy for the network layer (§7 ERROR HANDLING DESIGN).
//!
//! One variant per failure class the spec names: transient I/O, protocol
//! violation, authorization failure, state conflict, resource contention,
//! store failure. Handler code returns these via `?`; only the supervisor
//! decides which ones are fatal (store failure only).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    /// Transient I/O: timeout, reset. Logged at info, never surfaced.
    #[error("transient I/O error: {0}")]
    Transient(#[from] std::io::Error),

    /// Malformed JSON, wrong-length hello, unknown opcode (§4.6, §4.8).
    /// Carries the human-readable GURU MEDITATION reason sent on the wire.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Non-mirror on 10056, non-loopback/bad cert on 10059, banned IP.
    #[error("authorization failure: {0}")]
    AuthorizationFailure(String),

    /// Cross-origin delist, stale MOTD write, etc — item rejected, batch continues.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Bind-in-use past the retry window.
    #[error("resource contention: {0}")]
    ResourceContention(String),

    /// Fatal: supervisor halts.
    #[error("store failure: {0}")]
    Store(#[from] ld_store::StoreError),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// The wire-format error line (§7): `"/!\ GURU MEDITATION /!\ <reason>"`.
    pub fn guru_meditation(reason: &str) -> String {
        format!("/!\\ GURU MEDITATION /!\\ {reason}")
    }
}
