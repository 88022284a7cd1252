use std::error;
use std::fmt;

/// Result type used throughout the sync engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error raised by the sync engine.
///
/// A [`SyncError`] is either a single error, identified by an [`ErrorKind`] and a static
/// description with optional dynamic detail, or an aggregate of several errors collected
/// while processing independent units of work.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<SyncError>),
}

/// Categories of errors raised by the sync engine.
///
/// The categories decide how a failure is handled: configuration errors are surfaced
/// immediately, transient errors are retried with backoff (see [`ErrorKind::is_transient`]),
/// schema migration errors abort the stream before materialization.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration errors
    ConfigError,
    InvalidStreamIdentifier,
    UnsupportedType,

    // Transient destination errors
    DestinationConnectionFailed,
    DestinationTimeout,
    AuthenticationExpired,

    // Destination errors
    DestinationQueryFailed,
    SchemaMigrationFailed,

    // Data errors
    InvalidData,
    SerializationError,
    DeserializationError,

    // State & workflow errors
    InvalidState,
    OperationCanceled,
    StreamSyncWorkerPanic,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` if an operation failing with this kind may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::DestinationConnectionFailed
                | ErrorKind::DestinationTimeout
                | ErrorKind::AuthenticationExpired
        )
    }

    /// Returns `true` if this kind signals an invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigError | ErrorKind::InvalidStreamIdentifier | ErrorKind::UnsupportedType
        )
    }
}

impl SyncError {
    /// Aggregates multiple errors into one.
    pub fn many(errors: Vec<SyncError>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if there is none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the dynamic detail of the error, if any.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns `true` if every contained error is transient.
    pub fn is_transient(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty() && kinds.iter().all(|kind| kind.is_transient())
    }

    /// Re-labels this error with `kind`, keeping the original message as detail.
    pub fn with_kind(self, kind: ErrorKind, description: &'static str) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, self.to_string()),
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")
                } else if errors.len() == 1 {
                    errors[0].fmt(f)
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

impl error::Error for SyncError {}

impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(errors: Vec<E>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Maps [`serde_json::Error`] to a serialization or deserialization error.
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON I/O operation failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// A warehouse call exceeding its deadline is a transient failure.
impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(err: tokio::time::error::Elapsed) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::DestinationTimeout,
                "Destination operation timed out",
                err.to_string(),
            ),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> SyncError {
        let (kind, description) = if err.is_panic() {
            (ErrorKind::StreamSyncWorkerPanic, "Stream sync worker panicked")
        } else {
            (ErrorKind::OperationCanceled, "Stream sync worker was aborted")
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}
