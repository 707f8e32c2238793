//! Error definitions for monodoc

use thiserror::Error;

/// Represents errors that can occur while compiling or executing a statement.
///
/// # Example
/// ```rust
/// use monodoc_common::DocError;
///
/// fn example() -> monodoc_common::Result<()> {
///     Err(DocError::Range("Limit must be greater than zero".into()))
/// }
///
/// match example() {
///     Ok(_) => println!("Success"),
///     Err(e) => println!("Error occurred: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocError {
    #[error("{0}")]
    Parse(ParseError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Incompatible options: {0}")]
    Incompatible(String),

    #[error("{0}")]
    Capability(String),

    #[error("{0}")]
    Server(ServerError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, DocError>;

impl DocError {
    /// Get the inner message without the type prefix.
    pub fn message(&self) -> &str {
        match self {
            DocError::Parse(err) => &err.message,
            DocError::Bind(msg) => msg,
            DocError::Range(msg) => msg,
            DocError::Incompatible(msg) => msg,
            DocError::Capability(msg) => msg,
            DocError::Server(err) => &err.message,
            DocError::Network(msg) => msg,
            DocError::Io(msg) => msg,
            DocError::Config(msg) => msg,
            DocError::Json(msg) => msg,
        }
    }

    /// Get a short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            DocError::Parse(_) => "parse_error",
            DocError::Bind(_) => "bind_error",
            DocError::Range(_) => "range_error",
            DocError::Incompatible(_) => "incompatible_options",
            DocError::Capability(_) => "capability_error",
            DocError::Server(err) if err.is_uniqueness() => "uniqueness_error",
            DocError::Server(_) => "server_error",
            DocError::Network(_) => "network_error",
            DocError::Io(_) => "io_error",
            DocError::Config(_) => "config_error",
            DocError::Json(_) => "json_error",
        }
    }

    /// Server error code, when the failure was reported by the execution side.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            DocError::Server(err) => Some(err.code),
            _ => None,
        }
    }

    pub fn server(code: u32, message: impl Into<String>) -> Self {
        DocError::Server(ServerError::new(code, message))
    }
}

impl From<ParseError> for DocError {
    fn from(err: ParseError) -> Self {
        DocError::Parse(err)
    }
}

/// Convert std::io::Error to DocError
impl From<std::io::Error> for DocError {
    fn from(err: std::io::Error) -> Self {
        DocError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::Json(err.to_string())
    }
}

/// Category of an expression compile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input ran out while a token was still required
    NoTokens,
    /// A token that cannot appear at this point
    UnexpectedToken,
    /// A character the lexer does not recognise
    InvalidToken,
    UnterminatedString,
    /// Non-literal element inside a bracketed `IN`/`OVERLAPS` list
    NonLiteralListElement,
    InvalidPath,
    /// A specific token was required but something else was found
    Expected,
}

/// A deterministic compile failure.
///
/// `position` is a byte offset for lexer failures and a token index for
/// parser failures, matching the message text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, position: Option<usize>) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }

    pub fn no_tokens(position: usize) -> Self {
        Self::new(
            ParseErrorKind::NoTokens,
            format!("No more tokens when expecting one at token pos {position}"),
            Some(position),
        )
    }

    pub fn unexpected(lexeme: &str, position: usize) -> Self {
        Self::new(
            ParseErrorKind::UnexpectedToken,
            format!("Expression has unexpected token '{lexeme}' at position {position}."),
            Some(position),
        )
    }
}

/// An error reported by the execution collaborator, passed through unmodified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServerError {
    pub code: u32,
    pub message: String,
}

impl ServerError {
    pub const COLLECTION_EXISTS: u32 = 1050;
    pub const UNKNOWN_COLUMN: u32 = 1054;
    pub const DUPLICATE_ENTRY: u32 = 1062;
    pub const NO_SUCH_COLLECTION: u32 = 1146;
    pub const LOCK_WAIT_TIMEOUT: u32 = 1205;
    pub const LOCK_NOWAIT: u32 = 3572;
    pub const DUPLICATE_KEY: u32 = 5116;
    pub const INVALID_GROUPING: u32 = 5154;
    pub const MISSING_ID: u32 = 5115;
    pub const INVALID_UPDATE: u32 = 5050;
    pub const FORBIDDEN_ID_UPDATE: u32 = 5053;
    pub const INVALID_GROUP_FUNCTION: u32 = 1111;
    pub const NO_SUCH_FUNCTION: u32 = 1305;
    pub const PARAM_COUNT: u32 = 1582;
    pub const INVALID_REGEXP: u32 = 3685;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Duplicate identifier on insert or replace.
    pub fn is_uniqueness(&self) -> bool {
        matches!(self.code, Self::DUPLICATE_ENTRY | Self::DUPLICATE_KEY)
    }

    /// Row lock could not be acquired.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self.code, Self::LOCK_WAIT_TIMEOUT | Self::LOCK_NOWAIT)
    }
}
