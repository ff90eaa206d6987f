// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Directory listings via `PROPFIND`.

use http::header::{CONTENT_TYPE, DATE, LOCATION};
use hyper::Body;
use percent_encoding::percent_decode_str;

use crate::dates::parse_http_date;
use crate::names::{
    COLLECTION, GETCONTENTLENGTH, GETETAG, GETLASTMODIFIED, HREF, RESOURCETYPE, RESPONSE,
};
use crate::{DavError, DavSession};

/// The exact content type a multistatus reply must carry. Anything else is
/// typically an HTML error page from a broken server.
const PROPFIND_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// What a listed entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Regular { size: u64 },
    Collection,
}

/// A server entry discovered by a `PROPFIND`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Absolute decoded path on the server.
    pub path: String,
    /// The last path component.
    pub name: String,
    pub kind: ResourceKind,
    /// Modification instant as reported by the server, in server time.
    pub modtime: Option<i64>,
    /// Content identifier with the surrounding quotes stripped.
    pub etag: Option<String>,
}

impl Resource {
    #[must_use]
    pub fn size(&self) -> u64 {
        match self.kind {
            ResourceKind::Regular { size } => size,
            ResourceKind::Collection => 0,
        }
    }
}

impl DavSession {
    /// Lists `target` (an escaped path) at the given depth.
    ///
    /// Depth 0 describes only the target; depth 1 adds its immediate
    /// children. The entry for the target itself is part of the result.
    ///
    /// As a side effect every successful listing feeds the server-clock
    /// delta from the response's `Date` header.
    ///
    /// # Errors
    ///
    /// - [`DavError::BadStatusCode`] for non-2xx replies.
    /// - [`DavError::WrongContent`] if the reply is not XML.
    /// - If the multistatus body cannot be parsed.
    pub async fn propfind(
        &mut self,
        target: &str,
        depth: u8,
    ) -> Result<Vec<Resource>, DavError> {
        let request = self
            .request_builder("PROPFIND", target)?
            .header(CONTENT_TYPE, PROPFIND_CONTENT_TYPE)
            .header("Depth", depth.to_string())
            .body(Body::from(
                r#"<propfind xmlns="DAV:"><prop><getlastmodified/><getcontentlength/><resourcetype/><getetag/></prop></propfind>"#,
            ))?;

        let (head, body) = self.dispatch(request).await?;

        if head.status.is_redirection() {
            if let Some(location) = head.headers.get(LOCATION) {
                log::debug!("Permanently moved to {}", String::from_utf8_lossy(location.as_bytes()));
            }
        }
        if !head.status.is_success() {
            log::debug!("PROPFIND on {target} failed: {}", head.status);
            self.record_error(head.status.to_string());
            return Err(DavError::BadStatusCode(head.status));
        }

        let content_type = head
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type != PROPFIND_CONTENT_TYPE {
            log::debug!("Content type of propfind request not XML: {content_type}");
            self.record_error("Server error: PROPFIND reply is not XML formatted!");
            return Err(DavError::WrongContent(content_type.to_string()));
        }

        match head
            .headers
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .map(parse_http_date)
        {
            Some(Ok(server_time)) => self.observe_server_time(server_time),
            _ => log::debug!("Unable to parse server time from the Date header."),
        }

        parse_multistatus(&body)
    }
}

/// Parses a multistatus body into resources, in server order.
pub(crate) fn parse_multistatus(body: &[u8]) -> Result<Vec<Resource>, DavError> {
    let body = std::str::from_utf8(body)?;
    let doc = roxmltree::Document::parse(body)?;
    let root = doc.root_element();
    let responses = root.descendants().filter(|node| node.tag_name() == RESPONSE);

    let mut resources = Vec::new();
    for response in responses {
        let path = response
            .descendants()
            .find(|node| node.tag_name() == HREF)
            .ok_or(DavError::InvalidResponse("missing href in response".into()))?
            .text()
            .map(percent_decode_str)
            .ok_or(DavError::InvalidResponse("missing text in href".into()))?
            .decode_utf8()?
            .into_owned();

        let modtime = response
            .descendants()
            .find(|node| node.tag_name() == GETLASTMODIFIED)
            .and_then(|node| node.text())
            .and_then(|text| parse_http_date(text).ok());
        let length = response
            .descendants()
            .find(|node| node.tag_name() == GETCONTENTLENGTH)
            .and_then(|node| node.text());
        let etag = response
            .descendants()
            .find(|node| node.tag_name() == GETETAG)
            .and_then(|node| node.text())
            .map(|etag| strip_quotes(etag).to_string());
        let is_collection = response
            .descendants()
            .find(|node| node.tag_name() == RESOURCETYPE)
            .map_or(false, |node| {
                node.descendants().any(|child| child.tag_name() == COLLECTION)
            });

        // A collection reports no content length; anything with one is a
        // regular entry even if the resourcetype claims otherwise.
        let kind = match length {
            None if is_collection => ResourceKind::Collection,
            length => ResourceKind::Regular {
                size: length.and_then(|raw| raw.parse().ok()).unwrap_or(0),
            },
        };

        resources.push(Resource {
            name: basename(&path).to_string(),
            path,
            kind,
            modtime,
            etag,
        });
    }

    Ok(resources)
}

/// The last component of a path, ignoring a trailing slash.
pub(crate) fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Strips one pair of surrounding double quotes, if present.
pub(crate) fn strip_quotes(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(raw)
}
