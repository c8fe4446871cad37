//! Purpose: Error taxonomy shared by every layer of the data-access core.
//! Exports: `Error`, `ErrorKind`, `NativeError`, `Classification`, `http_code`, message constants.
//! Role: Single status type; replaces per-call status structs with `Result<_, Error>`.
//! Invariants: Kind is the only thing callers branch on; messages are diagnostics.
//! Invariants: `http_code` mapping is stable (Client 400, NotFound 404, Server 500).
use std::error::Error as StdError;
use std::fmt;

pub const ERR_CONNECT: &str = "failed to connect to the management server";
pub const ERR_SESSION_INIT: &str = "failed to initialize session handle";
pub const ERR_START_TX: &str = "failed to start transaction";
pub const ERR_OP_EXISTS: &str = "an operation has already been created";
pub const ERR_START_READ: &str = "failed to start read operation";
pub const ERR_INVALID_DATA: &str = "invalid column data";
pub const ERR_EXECUTE: &str = "failed to execute transaction";
pub const ERR_NO_TABLE: &str = "database/table does not exist";
pub const ERR_NO_COLUMN: &str = "column does not exist";
pub const ERR_PK_COUNT: &str = "wrong number of primary-key columns";
pub const ERR_PK_COLUMN: &str = "wrong primary-key column";
pub const ERR_PK_TYPE: &str = "column type is not supported as a primary key";
pub const ERR_UNSUPPORTED_TYPE: &str = "column type is not supported";
pub const ERR_RETURN_TYPE: &str = "unsupported data return type";
pub const ERR_CAPACITY: &str = "response buffer capacity exhausted";
pub const ERR_MALFORMED_REQUEST: &str = "malformed request buffer";
pub const ERR_NO_API_NODE: &str = "no free API node available";
pub const ERR_POOL_CLOSED: &str = "session pool is shut down";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed or inconsistent request; the caller's fault.
    Client,
    /// Valid request that cannot match any row.
    NotFound,
    /// Native client failures, capacity exhaustion, unsupported column types.
    Server,
}

/// Error classification reported by the native database client.
///
/// Discriminants match the native client's numbering so they can be
/// surfaced unchanged to callers that already understand them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    NoError = 0,
    ApplicationError = 1,
    NoDataFound = 2,
    ConstraintViolation = 3,
    SchemaError = 4,
    UserDefinedError = 5,
    InsufficientSpace = 6,
    TemporaryResourceError = 7,
    NodeRecoveryError = 8,
    OverloadError = 9,
    TimeoutExpired = 10,
    UnknownResultError = 11,
    InternalError = 12,
    FunctionNotImplemented = 13,
    UnknownErrorCode = 14,
    NodeShutdown = 15,
    SchemaObjectExists = 17,
    InternalTemporary = 18,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NativeStatus {
    Success = 0,
    TemporaryError = 1,
    PermanentError = 2,
    UnknownResult = 3,
}

/// Error detail as reported by the native database client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NativeError {
    pub status: NativeStatus,
    pub classification: Classification,
    pub code: i32,
    pub mysql_code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(classification: Classification, code: i32, message: impl Into<String>) -> Self {
        let status = match classification {
            Classification::NoError => NativeStatus::Success,
            Classification::TemporaryResourceError
            | Classification::NodeRecoveryError
            | Classification::OverloadError
            | Classification::TimeoutExpired
            | Classification::NodeShutdown
            | Classification::InternalTemporary => NativeStatus::TemporaryError,
            Classification::UnknownResultError => NativeStatus::UnknownResult,
            _ => NativeStatus::PermanentError,
        };
        Self {
            status,
            classification,
            code,
            mysql_code: -1,
            message: message.into(),
        }
    }

    pub fn no_data_found() -> Self {
        Self::new(Classification::NoDataFound, 626, "Tuple did not exist")
    }

    pub fn with_mysql_code(mut self, mysql_code: i32) -> Self {
        self.mysql_code = mysql_code;
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native error {} ({:?}/{:?}): {}",
            self.code, self.status, self.classification, self.message
        )
    }
}

impl StdError for NativeError {}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    column: Option<String>,
    offset: Option<u64>,
    native: Option<NativeError>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            column: None,
            offset: None,
            native: None,
            source: None,
        }
    }

    /// Server error wrapping a native client failure.
    pub fn native(message: impl Into<String>, native: NativeError) -> Self {
        Self::new(ErrorKind::Server)
            .with_message(message)
            .with_native(native)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn native_error(&self) -> Option<&NativeError> {
        self.native.as_ref()
    }

    pub fn http_code(&self) -> u32 {
        http_code(self.kind)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_native(mut self, native: NativeError) -> Self {
        self.native = Some(native);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(column) = &self.column {
            write!(f, " (column: {column})")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        if let Some(native) = &self.native {
            write!(f, " [{native}]")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        if let Some(source) = &self.source {
            return Some(source.as_ref() as &(dyn StdError + 'static));
        }
        self.native
            .as_ref()
            .map(|native| native as &(dyn StdError + 'static))
    }
}

pub fn http_code(kind: ErrorKind) -> u32 {
    match kind {
        ErrorKind::Client => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Server => 500,
    }
}

/// Client error for a column whose key text does not parse as its declared type.
pub(crate) fn expecting(column: &str, type_name: &str) -> Error {
    Error::new(ErrorKind::Client)
        .with_message(format!("{ERR_INVALID_DATA}; expecting {type_name}"))
        .with_column(column)
}
