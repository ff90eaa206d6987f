#![warn(clippy::pedantic)]

//! This crate is part of the `ocsync-rs` project, and implements the
//! filesystem-shaped surface a sync engine drives to read and write a
//! remote WebDAV server.
//!
//! The engine talks to a backend through the [`base::Vio`] trait, which
//! exposes the familiar stat/opendir/readdir/open/sendfile operations.
//! Failures surface as an errno-like [`ErrorKind`] plus a human-readable
//! string kept on the session.

use std::fmt;

pub mod base;
pub mod module;
pub mod webdav;

pub use webdav::{WebdavDefinition, WebdavVio};

/// See [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The entry does not exist on the server.
    NoSuchEntity,
    /// The server rejected the credentials or the operation.
    PermissionDenied,
    /// The entry is locked.
    AccessDenied,
    /// The entry already exists.
    AlreadyExists,
    InvalidArgument,
    FileTooLarge,
    NoSpace,
    /// A transient condition; retrying later may succeed.
    TryAgain,
    Io,
    /// Hostname lookup failed for the server or the proxy.
    LookupError,
    /// The server did not accept the user.
    UserUnknown,
    /// The proxy did not accept the user.
    ProxyAuth,
    Connect,
    Timeout,
    Precondition,
    Retry,
    Redirect,
    ServiceUnavailable,
    /// The server replied with something other than XML.
    WrongContent,
    GeneralError,
    Unsupported,
    /// No status code could be recovered from an error message.
    ErrorString,
}

impl ErrorKind {
    /// Maps an HTTP status to the errno-shaped kind, `None` for statuses
    /// that are not failures.
    #[must_use]
    pub fn from_http_status(status: u16) -> Option<ErrorKind> {
        match status {
            200..=207 | 304 => None,
            401 | 402 | 405 | 407 => Some(ErrorKind::PermissionDenied),
            301 | 303 | 404 | 410 => Some(ErrorKind::NoSuchEntity),
            408 | 504 => Some(ErrorKind::TryAgain),
            423 => Some(ErrorKind::AccessDenied),
            400 | 403 | 409 | 411 | 412 | 414 | 415 | 424 | 501 => {
                Some(ErrorKind::InvalidArgument)
            }
            413 => Some(ErrorKind::FileTooLarge),
            507 => Some(ErrorKind::NoSpace),
            503 => Some(ErrorKind::ServiceUnavailable),
            _ => Some(ErrorKind::Io),
        }
    }

    /// Recovers a status from the leading integer of an error message, the
    /// way the transport library formats its own failures.
    #[must_use]
    pub fn from_error_string(message: &str) -> ErrorKind {
        let digits = message
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>();

        match digits.parse::<u16>() {
            Ok(status) => ErrorKind::from_http_status(status).unwrap_or(ErrorKind::Io),
            Err(_) => ErrorKind::ErrorString,
        }
    }

    #[must_use]
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoSuchEntity => "no such file or directory",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::AlreadyExists => "entry already exists",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::FileTooLarge => "file too large",
            ErrorKind::NoSpace => "no space left on server",
            ErrorKind::TryAgain => "try again",
            ErrorKind::Io => "input/output error",
            ErrorKind::LookupError => "hostname lookup failed",
            ErrorKind::UserUnknown => "user unknown on server",
            ErrorKind::ProxyAuth => "proxy authentication failed",
            ErrorKind::Connect => "could not connect to server",
            ErrorKind::Timeout => "connection timed out",
            ErrorKind::Precondition => "precondition failed",
            ErrorKind::Retry => "retry request",
            ErrorKind::Redirect => "redirected",
            ErrorKind::ServiceUnavailable => "service unavailable",
            ErrorKind::WrongContent => "server reply has the wrong content type",
            ErrorKind::GeneralError => "general error",
            ErrorKind::Unsupported => "operation not supported",
            ErrorKind::ErrorString => "error message carries no status",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure from a backend operation.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.kind),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }
}

impl From<ocdav::DavError> for Error {
    fn from(error: ocdav::DavError) -> Error {
        use ocdav::DavError;

        let kind = match &error {
            DavError::BadStatusCode(status) => {
                ErrorKind::from_http_status(status.as_u16()).unwrap_or(ErrorKind::Io)
            }
            DavError::WrongContent(_) => ErrorKind::WrongContent,
            DavError::Timeout => ErrorKind::Timeout,
            DavError::Network(source) => {
                if source.is_connect() {
                    ErrorKind::Connect
                } else if source.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::GeneralError
                }
            }
            DavError::InvalidInput(_) | DavError::InvalidUrl(_) => ErrorKind::InvalidArgument,
            DavError::Io(_) => ErrorKind::Io,
            DavError::NotConnected => ErrorKind::Connect,
            DavError::Xml(_)
            | DavError::InvalidStatusCode(_)
            | DavError::InvalidEtag(_)
            | DavError::InvalidResponse(_)
            | DavError::NotUtf8(_) => ErrorKind::Io,
            DavError::Auth(_) => ErrorKind::GeneralError,
        };

        Error::new(kind, error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
