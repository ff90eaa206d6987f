// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Proxy configuration.
//!
//! The host configures proxying with the string names its own settings
//! use (`NoProxy`, `HttpProxy`, ...). Plain-http requests are routed
//! through the configured proxy by dialling it instead of the origin;
//! SOCKS and FTP proxies are not supported.

use std::task::{Context, Poll};

use http::Uri;
use hyper::client::HttpConnector;
use hyper::service::Service;
use hyper_rustls::HttpsConnector;

use crate::auth::Password;

const DEFAULT_PROXY_PORT: u16 = 8080;

/// Proxy-related values accepted from the property surface.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    pub kind: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<Password>,
}

/// A proxy endpoint that requests should be routed through.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxySettings {
    /// Decides the endpoint for this configuration.
    ///
    /// Returns `None` when no proxying should happen: either nothing was
    /// configured, the kind is unsupported, or the host is missing.
    pub(crate) fn resolve(&self) -> Option<ProxyEndpoint> {
        let kind = match &self.kind {
            // Go by NoProxy per default.
            None => return None,
            Some(kind) => kind.as_str(),
        };

        match kind {
            "NoProxy" => {
                log::debug!("No proxy configured.");
                None
            }
            "DefaultProxy" | "HttpProxy" | "HttpCachingProxy" => {
                let port = self.port.unwrap_or(DEFAULT_PROXY_PORT);
                if let Some(host) = &self.host {
                    log::debug!("{kind} at {host}:{port}");
                    Some(ProxyEndpoint {
                        host: host.clone(),
                        port,
                    })
                } else {
                    log::debug!("{kind} requested but no proxy host defined.");
                    None
                }
            }
            "FtpCachingProxy" | "Socks5Proxy" => {
                log::warn!("Unsupported proxy: {kind}");
                None
            }
            other => {
                log::warn!("Unknown proxy type: {other}");
                None
            }
        }
    }
}

type Inner = HttpsConnector<HttpConnector>;

/// Connector that dials the configured proxy instead of the origin.
///
/// Only plain-http targets are routed; https targets keep their direct
/// connection since this backend does not speak `CONNECT`.
#[derive(Clone)]
pub(crate) struct ProxiedConnector {
    inner: Inner,
    proxy: Option<Uri>,
}

impl ProxiedConnector {
    pub(crate) fn new(inner: Inner, endpoint: Option<&ProxyEndpoint>) -> ProxiedConnector {
        let proxy = endpoint.and_then(|endpoint| {
            Uri::builder()
                .scheme("http")
                .authority(format!("{}:{}", endpoint.host, endpoint.port))
                .path_and_query("/")
                .build()
                .map_err(|e| log::warn!("Proxy endpoint is not a valid authority: {e}"))
                .ok()
        });

        ProxiedConnector { inner, proxy }
    }
}

impl Service<Uri> for ProxiedConnector {
    type Response = <Inner as Service<Uri>>::Response;
    type Error = <Inner as Service<Uri>>::Error;
    type Future = <Inner as Service<Uri>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        if let Some(proxy) = &self.proxy {
            if dst.scheme_str() == Some("http") {
                return self.inner.call(proxy.clone());
            }
            log::debug!("Not routing {dst} through the proxy; tunnelling is unsupported");
        }
        self.inner.call(dst)
    }
}
