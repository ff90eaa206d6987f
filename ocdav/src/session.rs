// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! The WebDAV session.
//!
//! A session is created lazily on the first I/O operation and lives until
//! the backend is dropped; individual request failures leave it intact.
//! Besides the HTTP client it owns the pieces of state that outlive single
//! requests: the captured session cookie, the last error string, and the
//! running server-clock delta.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{COOKIE, PROXY_AUTHORIZATION, SET_COOKIE, USER_AGENT};
use http::response::Parts;
use http::{HeaderValue, Request, StatusCode};
use hyper::{body::Bytes, Body, Client, Response};
use hyper_rustls::HttpsConnectorBuilder;
use tokio::time::timeout;

use crate::auth::{self, Auth, AuthExt, AuthPrompt};
use crate::proxy::{ProxiedConnector, ProxySettings};
use crate::ssl::InteractiveVerifier;
use crate::uri::ServerUrl;
use crate::DavError;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A delta change between consecutive samples beyond this many seconds is
/// suspicious enough to warn about, but does not fail the request.
const MAX_EXPECTED_DELTA_JUMP: i64 = 5;

/// Server-clock drift bookkeeping.
///
/// The sum and count keep the running average observable in logs; only the
/// most recent sample is used to translate timestamps.
#[derive(Debug, Default, Clone, Copy)]
struct TimeDelta {
    sum: i64,
    count: u64,
    previous: i64,
    current: i64,
}

impl TimeDelta {
    fn observe(&mut self, server_time: i64, local_time: i64) {
        let sample = server_time - local_time;
        self.sum += sample;
        self.count += 1;
        self.previous = self.current;

        let jump = (self.current - sample).abs();
        if self.count == 1 {
            log::debug!("First server time delta is {sample}");
        } else if jump > MAX_EXPECTED_DELTA_JUMP {
            log::warn!("The server time delta changed by more than {MAX_EXPECTED_DELTA_JUMP} seconds ({jump})");
        } else {
            log::debug!("Server time delta remained (almost) the same: {sample}");
        }
        self.current = sample;
    }
}

struct Connected {
    client: Client<ProxiedConnector>,
    server: ServerUrl,
    auth: Auth,
    user_agent: String,
    proxied: bool,
    proxy_authorization: Option<HeaderValue>,
}

/// A lazily-connected session against one server.
pub struct DavSession {
    state: Option<Connected>,
    auth_prompt: Option<Arc<dyn AuthPrompt>>,
    proxy: ProxySettings,
    read_timeout: Duration,
    session_cookie: Option<String>,
    last_error: Option<String>,
    time_delta: TimeDelta,
}

impl DavSession {
    #[must_use]
    pub fn new(auth_prompt: Option<Arc<dyn AuthPrompt>>) -> DavSession {
        DavSession {
            state: None,
            auth_prompt,
            proxy: ProxySettings::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            session_cookie: None,
            last_error: None,
            time_delta: TimeDelta::default(),
        }
    }

    /// Establishes the connection state for `base_url`.
    ///
    /// Calling this on a connected session is a no-op, so it is safe (and
    /// expected) to call from every operation entry point.
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed or the TLS trust store is unusable.
    pub fn connect(&mut self, base_url: &str) -> Result<(), DavError> {
        if self.state.is_some() {
            return Ok(());
        }

        self.time_delta = TimeDelta::default();

        let server = ServerUrl::parse(base_url)?;
        log::debug!(
            "Connecting to {}://{}",
            server.transport.scheme(),
            server.authority()
        );

        let auth = auth::resolve_credentials(&server, self.auth_prompt.as_ref());

        let verifier = Arc::new(InteractiveVerifier::new(self.auth_prompt.clone())?);
        let tls = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();

        let endpoint = self.proxy.resolve();
        let proxy_authorization = match (&endpoint, &self.proxy.user) {
            (Some(_), Some(user)) => Some(auth::basic_value(user, self.proxy.password.as_ref())?),
            _ => None,
        };
        let connector = ProxiedConnector::new(https, endpoint.as_ref());

        self.state = Some(Connected {
            client: Client::builder().build(connector),
            user_agent: format!("csyncoC/{}", env!("CARGO_PKG_VERSION")),
            proxied: endpoint.is_some(),
            proxy_authorization,
            auth,
            server,
        });
        Ok(())
    }

    fn connected(&self) -> Result<&Connected, DavError> {
        self.state.as_ref().ok_or(DavError::NotConnected)
    }

    /// A clone of the HTTP client, sharing the session's connection pool.
    pub(crate) fn client(&self) -> Result<Client<ProxiedConnector>, DavError> {
        Ok(self.connected()?.client.clone())
    }

    /// The read timeout applied to request dispatch and body reads.
    ///
    /// Zero restores the default of 30 seconds.
    pub fn set_read_timeout(&mut self, seconds: u64) {
        self.read_timeout = if seconds == 0 {
            DEFAULT_READ_TIMEOUT
        } else {
            Duration::from_secs(seconds)
        };
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Replaces the session cookie sent with every request.
    pub fn set_session_cookie(&mut self, cookie: String) {
        self.session_cookie = Some(cookie);
    }

    /// Proxy values applied when the connection is (lazily) established.
    pub fn proxy_mut(&mut self) -> &mut ProxySettings {
        &mut self.proxy
    }

    /// The most recent human-readable failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Seconds the server clock is ahead of the local clock, from the most
    /// recent `Date` header observed.
    #[must_use]
    pub fn time_delta(&self) -> i64 {
        self.time_delta.current
    }

    pub(crate) fn observe_server_time(&mut self, server_time: i64) {
        self.time_delta.observe(server_time, current_epoch());
    }

    /// The absolute URL for an escaped path on this server.
    pub(crate) fn absolute_url(&self, target: &str) -> Result<String, DavError> {
        let conn = self.connected()?;
        Ok(format!(
            "{}://{}{}",
            conn.server.transport.scheme(),
            conn.server.authority(),
            target
        ))
    }

    /// Returns a request builder for an escaped path, with the session
    /// headers (user-agent, authorization, cookie, proxy keep-alive) set.
    pub(crate) fn request_builder(
        &self,
        method: &str,
        target: &str,
    ) -> Result<http::request::Builder, DavError> {
        let conn = self.connected()?;
        let mut builder = Request::builder()
            .method(method)
            .uri(self.absolute_url(target)?)
            .header(USER_AGENT, conn.user_agent.as_str())
            .authenticate(&conn.auth)?;

        if let Some(cookie) = &self.session_cookie {
            builder = builder.header(COOKIE, cookie.as_str());
        }
        if conn.proxied {
            // Keep-alive on the proxy link is required for NTLM.
            builder = builder.header("Proxy-Connection", "Keep-Alive");
            if let Some(credentials) = &conn.proxy_authorization {
                builder = builder.header(PROXY_AUTHORIZATION, credentials.clone());
            }
        }
        Ok(builder)
    }

    /// Sends a request, bounded by the read timeout.
    ///
    /// The response headers have been seen when this returns; the body has
    /// not been read yet.
    pub(crate) async fn send(&mut self, request: Request<Body>) -> Result<Response<Body>, DavError> {
        let client = self.connected()?.client.clone();
        match timeout(self.read_timeout, client.request(request)).await {
            Ok(Ok(response)) => {
                self.capture_session_cookie(response.status(), response.headers());
                Ok(response)
            }
            Ok(Err(error)) => {
                self.record_error(error.to_string());
                Err(DavError::Network(error))
            }
            Err(_) => {
                self.record_error("request did not complete within the read timeout");
                Err(DavError::Timeout)
            }
        }
    }

    /// Sends a request and reads the whole response body.
    pub(crate) async fn dispatch(
        &mut self,
        request: Request<Body>,
    ) -> Result<(Parts, Bytes), DavError> {
        let response = self.send(request).await?;
        let (head, body) = response.into_parts();
        let body = match timeout(self.read_timeout, hyper::body::to_bytes(body)).await {
            Ok(Ok(body)) => body,
            Ok(Err(error)) => {
                self.record_error(error.to_string());
                return Err(DavError::Network(error));
            }
            Err(_) => {
                self.record_error("response body did not arrive within the read timeout");
                return Err(DavError::Timeout);
            }
        };

        log::debug!("Response ({}): {} bytes", head.status, body.len());
        Ok((head, body))
    }

    /// Stores the server's session cookie from a response.
    ///
    /// Cookies are also taken from 401 responses so that a session issued
    /// during a challenge round-trip survives.
    pub(crate) fn capture_session_cookie(
        &mut self,
        status: StatusCode,
        headers: &http::HeaderMap,
    ) {
        if !(status.is_success() || status == StatusCode::UNAUTHORIZED) {
            log::debug!("Request failed, don't take session header.");
            return;
        }

        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            log::debug!("Set-Cookie found: {value}");
            if let Some(key) = parse_session_cookie(value) {
                log::debug!("Session key: {key}");
                self.session_cookie = Some(key);
            }
        }
    }
}

/// Extracts the session key from a `Set-Cookie` header value.
///
/// This parses the convention the server is known to emit: the key is
/// everything up to the first `;`, and `, ` separates multiple cookies
/// folded into one header. The last key found wins.
pub(crate) fn parse_session_cookie(header: &str) -> Option<String> {
    let mut key = None;
    let mut rest = header;

    loop {
        let Some(idx) = rest.find(|c: char| c == ';' || c == ',') else {
            break;
        };
        if rest.as_bytes()[idx] == b';' {
            key = Some(rest[..idx].to_string());
            // Skip ahead to the next folded entry, if any.
            match rest[idx..].find(',') {
                Some(offset) if idx + offset + 2 <= rest.len() => {
                    rest = &rest[idx + offset + 2..];
                }
                _ => break,
            }
        } else if rest.as_bytes().get(idx + 1) == Some(&b' ') {
            rest = &rest[idx + 2..];
        } else {
            break;
        }
    }

    key
}

fn current_epoch() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}
