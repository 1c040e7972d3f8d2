//! Error types shared by the domain layer.
//!
//! Mirrors the teacher's `NetworkError` shape: one variant per failure
//! class, `thiserror`-derived `Display`, no `From<io::Error>` blanket impls
//! so call sites stay explicit about what failed.

use thiserror::Error;

/// Errors raised while constructing or mutating a [`crate::ServerRecord`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Construction requested "do not create" semantics and the row did not exist.
    #[error("server {id} is not known")]
    ServerUnknown { id: String },

    /// A field setter received a value outside its domain.
    #[error("invalid value for field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
