//! Error taxonomy for ingestion, reconciliation and retrieval.
//!
//! Each variant names a distinct failure the operator can act on, and maps
//! to its own process exit code so scripts can tell an expired session from
//! a corrupt log file.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::Source;

pub type Result<T, E = ConvosError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConvosError {
    /// Raw input does not match the provider's documented shape. Fatal for
    /// that input unit only.
    #[error("malformed {provider} input in {unit}: {reason}")]
    MalformedInput {
        provider: Source,
        unit: String,
        reason: String,
    },

    #[error("{provider}: no credential found; set {credential} (tried {tried})")]
    MissingCredential {
        provider: Source,
        credential: String,
        tried: String,
    },

    #[error("{provider}: credentials from {origin} are expired or invalid; refresh {credential}")]
    ExpiredCredential {
        provider: Source,
        origin: String,
        credential: String,
    },

    #[error("{provider}: permission denied for {url}")]
    PermissionDenied { provider: Source, url: String },

    #[error("{provider}: network failure: {reason}")]
    Network { provider: Source, reason: String },

    #[error("prefix '{prefix}' matches {matches} {kind}s; use a longer prefix")]
    AmbiguousPrefix {
        kind: &'static str,
        prefix: String,
        matches: usize,
    },

    #[error("no {kind} matches '{prefix}'")]
    NotFound { kind: &'static str, prefix: String },

    #[error("identity collision on {id}: '{first}' and '{second}'")]
    IdentityCollision {
        id: String,
        first: String,
        second: String,
    },

    #[error("reconcile {label} failed after {batch} records")]
    Reconcile {
        label: String,
        batch: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvosError {
    pub fn malformed(provider: Source, unit: impl Into<String>, reason: impl Into<String>) -> Self {
        ConvosError::MalformedInput {
            provider,
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ConvosError::MissingCredential { .. }
                | ConvosError::ExpiredCredential { .. }
                | ConvosError::PermissionDenied { .. }
        )
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvosError::MalformedInput { .. } => 2,
            ConvosError::ExpiredCredential { .. } => 3,
            ConvosError::MissingCredential { .. } => 4,
            ConvosError::PermissionDenied { .. } => 5,
            ConvosError::Network { .. } => 6,
            ConvosError::AmbiguousPrefix { .. } | ConvosError::NotFound { .. } => 7,
            ConvosError::IdentityCollision { .. } => 8,
            ConvosError::Reconcile { .. } | ConvosError::Database(_) => 9,
            ConvosError::Io { .. } => 1,
        }
    }
}

/// Exit code for an application-level error chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ConvosError>())
        .map(ConvosError::exit_code)
        .unwrap_or(1)
}
