use std::fmt::Display;
use std::io::ErrorKind;

use crate::common::{InvalidContainerName, JoinSafelyError, WrappedIoError};
use crate::stats::{ParseDeviceNumberError, ParseFlatKeyedDataError};

/// Closed set of error codes surfaced by the resource-handler API. Success
/// travels in the `Ok` arm of `Result`, so it has no code here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            StatusCode::NotFound => "not found",
            StatusCode::AlreadyExists => "already exists",
            StatusCode::InvalidArgument => "invalid argument",
            StatusCode::FailedPrecondition => "failed precondition",
            StatusCode::Unavailable => "unavailable",
            StatusCode::Internal => "internal",
        };

        write!(f, "{print}")
    }
}

/// Error returned by every operation on factories, handlers and
/// controllers. The message names the cgroup path or subsystem at fault
/// where one exists.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
}

impl From<WrappedIoError> for Status {
    fn from(err: WrappedIoError) -> Self {
        let code = match err.inner().kind() {
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::AlreadyExists => StatusCode::AlreadyExists,
            ErrorKind::PermissionDenied => StatusCode::FailedPrecondition,
            _ => StatusCode::Internal,
        };

        Status::new(code, err.to_string())
    }
}

impl From<InvalidContainerName> for Status {
    fn from(err: InvalidContainerName) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

impl From<JoinSafelyError> for Status {
    fn from(err: JoinSafelyError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

impl From<ParseFlatKeyedDataError> for Status {
    fn from(err: ParseFlatKeyedDataError) -> Self {
        match err {
            ParseFlatKeyedDataError::WrappedIo(err) => err.into(),
            other => Status::internal(other.to_string()),
        }
    }
}

impl From<ParseDeviceNumberError> for Status {
    fn from(err: ParseDeviceNumberError) -> Self {
        Status::internal(err.to_string())
    }
}
