#![warn(clippy::pedantic)]

//! WebDAV client for ownCloud-style servers.
//!
//! This library implements the wire side of a remote filesystem backend: a
//! lazily-connected session speaking HTTP/1.1 with the WebDAV extensions an
//! ownCloud server understands (`PROPFIND`, `PUT`, `GET`, `MKCOL`, `DELETE`,
//! `MOVE`, `PROPPATCH`). It should not be considered a general purpose
//! webdav implementation.
//!
//! See [`DavSession`] as the entry point.

use std::string::FromUtf8Error;

use http::status::InvalidStatusCode;
use http::StatusCode;

pub mod auth;
pub mod dates;
mod listing;
pub mod names;
mod ops;
pub mod proxy;
mod session;
mod ssl;
mod transfer;
pub mod uri;

pub use listing::{Resource, ResourceKind};
pub use session::DavSession;
pub use transfer::ProgressFn;
pub use uri::ServerUrl;

/// A generic error for WebDav operations.
#[derive(thiserror::Error, Debug)]
pub enum DavError {
    #[error("http error executing request")]
    Network(#[from] hyper::Error),

    #[error("request did not complete within the read timeout")]
    Timeout,

    #[error("no connection has been established yet")]
    NotConnected,

    #[error("could not parse XML response")]
    Xml(#[from] roxmltree::Error),

    #[error("invalid status code in response")]
    InvalidStatusCode(#[from] InvalidStatusCode),

    #[error("http request returned {0}")]
    BadStatusCode(http::StatusCode),

    #[error("response has content type '{0}' instead of xml")]
    WrongContent(String),

    #[error("failed to build URL with the given input")]
    InvalidInput(#[from] http::Error),

    #[error("the input URL is not valid: {0}")]
    InvalidUrl(&'static str),

    #[error("internal error with specified authentication")]
    Auth(#[from] auth::AuthError),

    #[error("the server returned an response with an invalid etag header")]
    InvalidEtag(#[from] FromUtf8Error),

    #[error("the server returned an invalid response: {0}")]
    InvalidResponse(Box<dyn std::error::Error + Send + Sync>),

    #[error("could not decode response as utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("error reading or writing a local file")]
    Io(#[from] std::io::Error),
}

impl From<StatusCode> for DavError {
    fn from(status: StatusCode) -> Self {
        DavError::BadStatusCode(status)
    }
}

#[inline]
pub(crate) fn check_status(status: StatusCode) -> Result<(), StatusCode> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status)
    }
}
