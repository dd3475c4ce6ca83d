//! Upgrade error types.

use std::time::Duration;

use thiserror::Error;

use upgrid_registry::ClientError;
use upgrid_state::UpgradeState;

/// Errors that end an upgrade invocation.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Bad arguments or options. Raised before any remote call.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A transient failure that outlived the retry budget.
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    Transient {
        operation: String,
        attempts: u32,
        source: ClientError,
    },

    /// A failure that retrying cannot fix.
    #[error("{operation} failed: {source}")]
    Terminal {
        operation: String,
        source: ClientError,
    },

    /// The batch loop stopped part way. Steps already applied stay applied.
    #[error("upgrade aborted after {completed}/{total} batches: {source}")]
    Partial {
        completed: u32,
        total: u32,
        source: Box<UpgradeError>,
    },

    #[error("{service}: {healthy}/{expected} instances healthy after {timeout:?}")]
    HealthGateTimeout {
        service: String,
        healthy: u32,
        expected: u32,
        timeout: Duration,
    },

    #[error("invalid upgrade transition {from} -> {to}")]
    InvalidTransition { from: UpgradeState, to: UpgradeState },
}

impl UpgradeError {
    /// The registry error at the root of this failure, if any.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            UpgradeError::Transient { source, .. } | UpgradeError::Terminal { source, .. } => {
                Some(source)
            }
            UpgradeError::Partial { source, .. } => source.client_error(),
            _ => None,
        }
    }
}

pub type UpgradeResult<T> = Result<T, UpgradeError>;
