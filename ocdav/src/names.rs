// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Names of common dav attributes.

use roxmltree::ExpandedName;

/// Namespace for properties defined in the WebDav specifications.
pub const DAV: &str = "DAV:";

pub const COLLECTION: ExpandedName = ExpandedName::from_static(DAV, "collection");
pub const GETCONTENTLENGTH: ExpandedName = ExpandedName::from_static(DAV, "getcontentlength");
pub const GETETAG: ExpandedName = ExpandedName::from_static(DAV, "getetag");
pub const GETLASTMODIFIED: ExpandedName = ExpandedName::from_static(DAV, "getlastmodified");
pub const HREF: ExpandedName = ExpandedName::from_static(DAV, "href");
pub const PROPSTAT: ExpandedName = ExpandedName::from_static(DAV, "propstat");
pub const RESOURCETYPE: ExpandedName = ExpandedName::from_static(DAV, "resourcetype");
pub const RESPONSE: ExpandedName = ExpandedName::from_static(DAV, "response");
pub const STATUS: ExpandedName = ExpandedName::from_static(DAV, "status");

/// The writable variant of the modification time, used with `PROPPATCH`.
pub const LASTMODIFIED: ExpandedName = ExpandedName::from_static(DAV, "lastmodified");
