use std::error;
use std::fmt;

/// Result type used by every fixture operation.
pub type FixtureResult<T> = Result<T, FixtureError>;

/// Error raised by a fixture operation.
///
/// Carries an [`ErrorKind`], a static description and optionally a dynamic
/// detail, or a list of errors when several independent checks failed.
#[derive(Debug, Clone)]
pub struct FixtureError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<FixtureError>),
}

/// Categories of fixture failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Database
    ConnectionFailed,
    QueryFailed,
    EmptyResult,

    // Processes
    CommandFailed,
    Timeout,

    // Scenario checks
    AssertionFailed,
    DataMismatch,

    // Inputs and environment
    InvalidInput,
    ConfigError,
    IoError,
    ConversionError,

    Unknown,
}

impl FixtureError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<FixtureError>) -> FixtureError {
        FixtureError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`], or the first one for aggregated errors.
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

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for FixtureError {
    fn eq(&self, other: &FixtureError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [single] => single.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for FixtureError {}

impl From<(ErrorKind, &'static str)> for FixtureError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> FixtureError {
        FixtureError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for FixtureError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> FixtureError {
        FixtureError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for FixtureError
where
    E: Into<FixtureError>,
{
    fn from(errors: Vec<E>) -> FixtureError {
        FixtureError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for FixtureError {
    fn from(err: std::io::Error) -> FixtureError {
        (ErrorKind::IoError, "I/O error occurred", err.to_string()).into()
    }
}

impl From<std::num::ParseIntError> for FixtureError {
    fn from(err: std::num::ParseIntError) -> FixtureError {
        (
            ErrorKind::ConversionError,
            "Integer parsing failed",
            err.to_string(),
        )
            .into()
    }
}

impl From<std::num::ParseFloatError> for FixtureError {
    fn from(err: std::num::ParseFloatError) -> FixtureError {
        (
            ErrorKind::ConversionError,
            "Float parsing failed",
            err.to_string(),
        )
            .into()
    }
}

impl From<regex::Error> for FixtureError {
    fn from(err: regex::Error) -> FixtureError {
        (ErrorKind::InvalidInput, "Invalid pattern", err.to_string()).into()
    }
}

impl From<config::ConfigError> for FixtureError {
    fn from(err: config::ConfigError) -> FixtureError {
        (
            ErrorKind::ConfigError,
            "Configuration could not be loaded",
            err.to_string(),
        )
            .into()
    }
}

impl From<gpfixture_config::shared::ValidationError> for FixtureError {
    fn from(err: gpfixture_config::shared::ValidationError) -> FixtureError {
        (
            ErrorKind::ConfigError,
            "Configuration is invalid",
            err.to_string(),
        )
            .into()
    }
}

/// Classifies [`tokio_postgres::Error`] by SQLSTATE.
///
/// Errors without a code come from the client side, which for a fixture
/// almost always means the cluster is down or unreachable.
impl From<tokio_postgres::Error> for FixtureError {
    fn from(err: tokio_postgres::Error) -> FixtureError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::CANNOT_CONNECT_NOW
                | SqlState::TOO_MANY_CONNECTIONS
                | SqlState::ADMIN_SHUTDOWN => (
                    ErrorKind::ConnectionFailed,
                    "Greenplum connection error",
                ),
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::ConnectionFailed,
                    "Greenplum authentication failed",
                ),
                SqlState::INVALID_CATALOG_NAME => {
                    (ErrorKind::QueryFailed, "Greenplum database does not exist")
                }
                SqlState::UNDEFINED_TABLE
                | SqlState::UNDEFINED_COLUMN
                | SqlState::UNDEFINED_FUNCTION
                | SqlState::UNDEFINED_SCHEMA
                | SqlState::UNDEFINED_OBJECT => (
                    ErrorKind::QueryFailed,
                    "Greenplum schema object not found",
                ),
                SqlState::DATA_EXCEPTION
                | SqlState::INVALID_TEXT_REPRESENTATION
                | SqlState::INVALID_DATETIME_FORMAT
                | SqlState::NUMERIC_VALUE_OUT_OF_RANGE => (
                    ErrorKind::ConversionError,
                    "Greenplum data conversion error",
                ),
                _ => (ErrorKind::QueryFailed, "Greenplum query failed"),
            },
            None => (ErrorKind::ConnectionFailed, "Greenplum client error"),
        };

        (kind, description, err.to_string()).into()
    }
}
