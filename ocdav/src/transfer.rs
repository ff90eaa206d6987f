// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Whole-file transfers.
//!
//! Uploads stream a host-owned descriptor into a `PUT`; downloads stream a
//! `GET` body into one, transparently inflating gzip responses. There are
//! no partial-range transfers; the wire carries whole files only.

use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, ETAG};
use http::StatusCode;
use hyper::body::{Bytes, HttpBody};
use hyper::Body;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;

use crate::listing::strip_quotes;
use crate::{DavError, DavSession};

/// Byte-progress notifications: `(transferred, total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Counts bytes handed to the transport and reports them.
struct CountingStream {
    inner: ReaderStream<tokio::fs::File>,
    sent: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl Stream for CountingStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            this.sent += chunk.len() as u64;
            if let Some(notify) = &this.progress {
                if this.total > 0 {
                    notify(this.sent, this.total);
                }
            }
        }
        polled
    }
}

impl DavSession {
    /// Uploads `length` bytes from `source` to the escaped path `target`.
    ///
    /// The returned status is whatever the server said; callers decide how
    /// lenient to be with non-2xx answers.
    ///
    /// # Errors
    ///
    /// Only for transport-level failures; an HTTP error status is returned
    /// as a status.
    pub async fn put_streaming(
        &mut self,
        target: &str,
        source: tokio::fs::File,
        length: u64,
        progress: Option<ProgressFn>,
    ) -> Result<StatusCode, DavError> {
        let body = Body::wrap_stream(CountingStream {
            inner: ReaderStream::new(source),
            sent: 0,
            total: length,
            progress,
        });
        let request = self
            .request_builder("PUT", target)?
            .header(CONTENT_LENGTH, length)
            .body(body)?;

        // No read timeout here: a large upload legitimately takes longer
        // than any reasonable socket timeout.
        let client = self.client()?;
        let response = match client.request(request).await {
            Ok(response) => response,
            Err(error) => {
                self.record_error(error.to_string());
                return Err(DavError::Network(error));
            }
        };
        self.capture_session_cookie(response.status(), response.headers());

        let (head, body) = response.into_parts();
        // Drain whatever the server said about the upload.
        let _ = hyper::body::to_bytes(body).await;
        Ok(head.status)
    }

    /// Downloads the escaped path `target` into `dest`.
    ///
    /// Gzip content negotiation is always offered; a gzip response is
    /// inflated before it reaches the descriptor. On success the response's
    /// quote-stripped `ETag` is returned alongside the status. Error bodies
    /// are drained, not written to `dest`.
    ///
    /// # Errors
    ///
    /// For transport failures, timeouts, undecodable gzip data, and local
    /// write failures.
    pub async fn get_streaming(
        &mut self,
        target: &str,
        dest: &mut tokio::fs::File,
        progress: Option<ProgressFn>,
    ) -> Result<(StatusCode, Option<String>), DavError> {
        let request = self
            .request_builder("GET", target)?
            .header(ACCEPT_ENCODING, "gzip")
            .body(Body::empty())?;

        let response = self.send(request).await?;
        let (head, mut body) = response.into_parts();

        if !head.status.is_success() {
            let _ = hyper::body::to_bytes(body).await;
            return Ok((head.status, None));
        }

        let etag = head
            .headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| strip_quotes(value).to_string());

        let gzipped = head
            .headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            == Some("gzip");
        log::debug!(
            "Content encoding is {} with status {}",
            if gzipped { "gzip" } else { "identity" },
            head.status
        );

        let total = head
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0_u64);

        let mut decoder = gzipped.then(|| flate2::write::GzDecoder::new(Vec::new()));
        let mut received = 0_u64;

        loop {
            let chunk = match timeout(self.read_timeout(), body.data()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(error))) => {
                    self.record_error(error.to_string());
                    return Err(DavError::Network(error));
                }
                Ok(None) => break,
                Err(_) => {
                    self.record_error("response body did not arrive within the read timeout");
                    return Err(DavError::Timeout);
                }
            };

            received += chunk.len() as u64;
            if let Some(notify) = &progress {
                if total > 0 {
                    notify(received, total);
                }
            }

            match &mut decoder {
                Some(decoder) => {
                    decoder.write_all(&chunk)?;
                    let inflated = std::mem::take(decoder.get_mut());
                    if !inflated.is_empty() {
                        dest.write_all(&inflated).await?;
                    }
                }
                None => dest.write_all(&chunk).await?,
            }
        }

        if let Some(decoder) = decoder {
            let rest = decoder.finish()?;
            if !rest.is_empty() {
                dest.write_all(&rest).await?;
            }
        }
        dest.flush().await?;

        Ok((head.status, etag))
    }
}
