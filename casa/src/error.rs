//! Error types shared by every scenario-analysis component.

use thiserror::Error;

/// Closed set of failure categories reported by the API.
///
/// Every public operation that can fail maps its failure to exactly one of
/// these kinds; the accompanying message carries the detail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// File or stream input/output failed.
    IoError,
    /// An allocation-sized request could not be satisfied.
    MemAllocError,
    /// A name or index did not resolve to an existing object.
    NonexistingId,
    /// A value was requested before it was defined.
    UndefinedValue,
    /// A value lies outside its declared range.
    OutOfRangeValue,
    /// The operation is declared but not available.
    NotImplementedApi,
    /// An object with the same identity already exists.
    AlreadyDefined,
    /// Case mutation could not be applied to the project deck.
    MutationError,
    /// A mutated deck failed its read-back validation.
    ValidationError,
    /// The Monte-Carlo solver rejected its configuration or state.
    MonteCarloSolverError,
    /// Response-surface construction or evaluation failed.
    RsProxyError,
    /// A numerical kernel (least squares, kriging system) broke down.
    NumericsError,
    /// The run manager could not submit or track jobs.
    RunManagerError,
    /// The run manager was aborted on request.
    RunManagerAborted,
    /// A filesystem location could not be created or entered.
    WrongPath,
    /// Writing a scenario state file failed.
    SerializationError,
    /// Reading a scenario state file failed.
    DeserializationError,
    /// Anything that escaped the categories above.
    Unknown,
}

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An error that originates in this crate.
    #[error("{kind:?}: {message}")]
    Casa {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Constructs an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Casa {
            kind,
            message: message.into(),
        }
    }

    /// Returns the failure category. External errors report [`ErrorKind::Unknown`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Casa { kind, .. } => *kind,
            Self::Other(_) => ErrorKind::Unknown,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, err.to_string())
    }
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_of_io_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(err.to_string(), "IoError: gone");
    }

    #[test]
    fn kind_of_external_error() {
        let err: Error = anyhow::anyhow!("outside").into();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }
}
