// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Authentication-related types.

use base64::{prelude::BASE64_STANDARD, write::EncoderWriter};
use core::fmt;
use http::{request::Builder, HeaderValue};
use std::io::Write;
use std::sync::Arc;

use crate::uri::ServerUrl;

/// Wrapper around a [`String`] that is not printed when debugging.
///
/// # Display
///
/// The [`core::fmt::Display`] trait is intentionally not implemented. Use
/// either [`Password::into_string`] or [`Password::as_str()`].
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl<S> From<S> for Password
where
    String: From<S>,
{
    fn from(value: S) -> Self {
        Password(String::from(value))
    }
}

impl Password {
    /// Returns the underlying string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns a reference to the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// A line-oriented prompt provided by the host.
///
/// The same callback answers credential questions and certificate-trust
/// questions; `echo` tells the host whether the typed reply may be shown.
pub trait AuthPrompt: Send + Sync {
    /// Ask the host for one line of input. `None` means the host declined.
    fn prompt(&self, message: &str, echo: bool) -> Option<String>;
}

/// Authentication used for requests on a session.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Basic {
        username: String,
        password: Option<Password>,
    },
}

/// Internal error resolving authentication.
///
/// This error is returned when there is an internal error handling
/// authentication (e.g.: the input is invalid). It IS NOT returned when
/// authentication was rejected by the server.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct AuthError(#[from] std::io::Error);

/// Renders `username:password` as a Basic authorization header value.
pub(crate) fn basic_value(username: &str, password: Option<&Password>) -> Result<HeaderValue, AuthError> {
    let mut sequence = b"Basic ".to_vec();
    let mut encoder = EncoderWriter::new(sequence, &BASE64_STANDARD);
    if let Some(pwd) = password {
        write!(encoder, "{username}:{}", pwd.0)?;
    } else {
        write!(encoder, "{username}:")?;
    }
    sequence = encoder.finish()?;

    let mut header =
        HeaderValue::from_bytes(&sequence).expect("base64 string contains only ascii characters");
    header.set_sensitive(true);
    Ok(header)
}

pub(crate) trait AuthExt: Sized {
    /// Apply this authentication to an object.
    fn authenticate(self, auth: &Auth) -> Result<Self, AuthError>;
}

impl AuthExt for Builder {
    /// Apply this authentication to a request builder.
    fn authenticate(self, auth: &Auth) -> Result<Builder, AuthError> {
        match auth {
            Auth::None => Ok(self),
            Auth::Basic { username, password } => {
                let header = basic_value(username, password.as_ref())?;
                Ok(self.header(hyper::header::AUTHORIZATION, header))
            }
        }
    }
}

/// Decides the credentials for a server.
///
/// Credentials embedded in the URL win; without them the host prompt is
/// asked twice, echoing the username and hiding the password.
pub(crate) fn resolve_credentials(url: &ServerUrl, prompt: Option<&Arc<dyn AuthPrompt>>) -> Auth {
    if let Some(username) = &url.username {
        return Auth::Basic {
            username: username.clone(),
            password: url.password.clone(),
        };
    }

    if let Some(cb) = prompt {
        if let Some(username) = cb.prompt("Enter your username: ", true) {
            let password = cb.prompt("Enter your password: ", false).map(Password::from);
            return Auth::Basic { username, password };
        }
    }

    log::debug!("No credentials available for {}", url.host);
    Auth::None
}
