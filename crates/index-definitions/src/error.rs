use std::path::PathBuf;
use std::time::Duration;

use crate::definition::DefinitionKind;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to compile {kind} '{name}' ({id}): {message}")]
    Compile {
        kind: DefinitionKind,
        id: u32,
        name: String,
        message: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Cannot modify indexes while indexing is in progress (already waited {}s). Try again later",
        waited.as_secs()
    )]
    GateTimeout { waited: Duration },

    #[error("Persistence error for {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DefinitionError {
    pub(crate) fn compile(
        kind: DefinitionKind,
        id: u32,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Compile {
            kind,
            id,
            name: name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Only a gate timeout leaves the registry untouched and can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GateTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
