//! Error taxonomy.
//!
//! Every failure in this crate is a caller or configuration bug: construction
//! errors surface eagerly, and batch errors reject the whole batch before any
//! statistic is touched.

use crate::spec::DType;

/// Errors returned by agents, policies, stores and adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Arm count mismatch, non-positive dimensions, unsupported spec shapes, bad hyperparameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A context, matrix or vector did not have the configured length.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// An emitted action does not match the element type declared by its spec.
    #[error("action at `{path}` has dtype {got:?}, expected {expected:?} from the action spec")]
    DtypeMismatch {
        path: String,
        expected: DType,
        got: DType,
    },

    /// An observation referenced an arm outside `[0, num_actions)`.
    #[error("action {action} out of range for {num_actions} arms")]
    ActionOutOfRange { action: i64, num_actions: usize },

    /// A context or reward in the batch was NaN or infinite.
    #[error("non-finite value in observation {index}")]
    NonFiniteObservation { index: usize },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
