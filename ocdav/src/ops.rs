// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Namespace operations: `MKCOL`, `DELETE`, `MOVE` and `PROPPATCH`.

use std::str::FromStr;

use http::header::CONTENT_TYPE;
use http::status::InvalidStatusCode;
use http::StatusCode;
use hyper::Body;
use roxmltree::Node;

use crate::names::{LASTMODIFIED, STATUS};
use crate::{check_status, DavError, DavSession};

impl DavSession {
    /// Creates the collection at the escaped path `target`.
    ///
    /// The request path always carries a trailing slash; some servers
    /// insist on it for collections.
    ///
    /// # Errors
    ///
    /// If the request fails; the status is reported as-is, so callers can
    /// tell an existing collection (405) apart from other failures.
    pub async fn mkcol(&mut self, target: &str) -> Result<StatusCode, DavError> {
        let mut path = target.to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        log::debug!("MKCOL on {path}");

        let request = self.request_builder("MKCOL", &path)?.body(Body::empty())?;
        let (head, _body) = self.dispatch(request).await?;
        if !head.status.is_success() {
            self.record_error(head.status.to_string());
        }
        Ok(head.status)
    }

    /// Deletes the entry at the escaped path `target`.
    ///
    /// The target MAY be a collection; deletion is the same request either
    /// way.
    ///
    /// # Errors
    ///
    /// Only for transport-level failures.
    pub async fn delete(&mut self, target: &str) -> Result<StatusCode, DavError> {
        let request = self.request_builder("DELETE", target)?.body(Body::empty())?;
        let (head, _body) = self.dispatch(request).await?;
        if !head.status.is_success() {
            self.record_error(head.status.to_string());
        }
        Ok(head.status)
    }

    /// Moves `source` over `target` (both escaped paths), replacing any
    /// existing entry.
    ///
    /// # Errors
    ///
    /// Only for transport-level failures.
    pub async fn move_to(&mut self, source: &str, target: &str) -> Result<StatusCode, DavError> {
        log::debug!("MOVE: {source} => {target}");

        let destination = self.absolute_url(target)?;
        let request = self
            .request_builder("MOVE", source)?
            .header("Destination", destination)
            .header("Overwrite", "T")
            .body(Body::empty())?;
        let (head, _body) = self.dispatch(request).await?;
        if !head.status.is_success() {
            self.record_error(head.status.to_string());
        }
        Ok(head.status)
    }

    /// Sets the `DAV:lastmodified` property on the escaped path `target`
    /// to a seconds-since-epoch value.
    ///
    /// # Errors
    ///
    /// If the request fails, or the multistatus reply rejects the update.
    pub async fn proppatch_lastmodified(
        &mut self,
        target: &str,
        seconds: i64,
    ) -> Result<(), DavError> {
        let request = self
            .request_builder("PROPPATCH", target)?
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(Body::from(format!(
                r#"<propertyupdate xmlns="DAV:">
                <set>
                    <prop>
                        <lastmodified xmlns="DAV:">{seconds}</lastmodified>
                    </prop>
                </set>
            </propertyupdate>"#
            )))?;

        let (head, body) = self.dispatch(request).await?;
        if let Err(status) = check_status(head.status) {
            self.record_error(status.to_string());
            return Err(DavError::BadStatusCode(status));
        }

        let body = std::str::from_utf8(body.as_ref())?;
        let doc = roxmltree::Document::parse(body)?;
        let root = doc.root_element();

        let props = root
            .descendants()
            .filter(|node| node.tag_name() == LASTMODIFIED)
            .collect::<Vec<_>>();

        if props.len() == 1 {
            return Ok(());
        }

        check_multistatus(root)?;

        Err(DavError::InvalidResponse(
            "missing property in response but no error".into(),
        ))
    }
}

/// Check all the statuses in a `multistatus` response.
///
/// # Errors
///
/// - If any of the `<DAV:status>` nodes is missing the status text, returns
///   [`DavError::InvalidResponse`].
/// - If the text inside a `<DAV:status>` node is not a valid status line,
///   returns [`DavError::InvalidStatusCode`].
/// - If any of the statuses are non-success, returns
///   [`DavError::BadStatusCode`].
pub(crate) fn check_multistatus(root: Node) -> Result<(), DavError> {
    let statuses = root.descendants().filter(|node| node.tag_name() == STATUS);
    for status in statuses {
        let status = status.text().ok_or(DavError::InvalidResponse(
            "missing text inside 'DAV:status'".into(),
        ))?;
        check_status(parse_statusline(status)?)?;
    }

    Ok(())
}

/// Parses a status line string into a [`StatusCode`].
///
/// Example input string: `HTTP/1.1 200 OK`.
///
/// # Errors
///
/// If the input string does not match a status line.
pub(crate) fn parse_statusline<S: AsRef<str>>(
    status_line: S,
) -> Result<StatusCode, InvalidStatusCode> {
    let mut iter = status_line.as_ref().splitn(3, ' ');
    iter.next();
    let code = iter.next().unwrap_or("");
    StatusCode::from_str(code)
}
