//! The WebDAV-backed implementation of [`Vio`].
//!
//! One instance owns the session plus the three single-entry caches that
//! make a sync run cheap: the most recent listing, the most recent stat,
//! and the most recent content id seen on a download. Mutating the server
//! invalidates all of them before the engine can observe stale state.
#![allow(clippy::module_name_repetitions)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use percent_encoding::percent_decode_str;

use ocdav::auth::AuthPrompt;
use ocdav::uri::{clean_path, quote_href};
use ocdav::{DavSession, ResourceKind};

use crate::base::{
    Capabilities, DirHandle, FileHandle, FileKind, FileStat, Listing, OpenFlags, Progress,
    ProgressCallback, PropertyValue, Transfer, TransferMethod, Vio,
};
use crate::{Error, ErrorKind, Result};

/// `drwxr-xr-x`; the protocol has no permissions, so directories get this.
const DIRECTORY_MODE: u32 = 0o040_755;
/// `-rw-r--r--`; the protocol has no permissions, so files get this.
const REGULAR_MODE: u32 = 0o100_644;

const CAPABILITIES: Capabilities = Capabilities {
    atomic_copy: true,
    do_post_copy_stat: false,
    time_sync_required: false,
    unix_extensions: 0,
    propagate_on_fd: true,
};

#[derive(Debug)]
struct IdCache {
    url: String,
    id: String,
}

/// A remote filesystem on an ownCloud-style WebDAV server.
pub struct WebdavVio {
    session: DavSession,
    listing_cache: Option<Arc<Listing>>,
    stat_cache: Option<FileStat>,
    id_cache: Option<IdCache>,
    /// The last directory known to exist, so repeated uploads into the
    /// same place skip the preflight stat.
    last_parent: Option<String>,
    progress: Option<ProgressCallback>,
    context: Option<Arc<dyn Any + Send + Sync>>,
}

impl WebdavVio {
    #[must_use]
    pub fn new(prompt: Option<Arc<dyn AuthPrompt>>) -> WebdavVio {
        WebdavVio {
            session: DavSession::new(prompt),
            listing_cache: None,
            stat_cache: None,
            id_cache: None,
            last_parent: None,
            progress: None,
            context: None,
        }
    }

    fn clean_caches(&mut self) {
        self.listing_cache = None;
        self.stat_cache = None;
        self.id_cache = None;
    }

    fn notify(&self, url: &str, event: &Progress) {
        if let Some(callback) = &self.progress {
            callback(url, event);
        }
    }

    /// Byte-progress plumbing for a transfer on `url`.
    fn byte_progress(&self, url: &str) -> Option<ocdav::ProgressFn> {
        let callback = Arc::clone(self.progress.as_ref()?);
        let url = url.to_string();
        Some(Arc::new(move |current, total| {
            callback(&url, &Progress::Transfer { current, total });
        }))
    }

    fn soft_failure(&mut self, url: &str, status: StatusCode) -> Transfer {
        log::debug!("sendfile request failed with http status {status}");
        self.session.record_error(status.to_string());
        self.notify(
            url,
            &Progress::Error {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            },
        );
        Transfer::Skipped {
            status: status.as_u16(),
        }
    }

    /// Lists `uri`, serving repeats of the most recent target from cache.
    ///
    /// Readers share ownership of the listing with the cache; replacing
    /// the cache releases its share and the listing dies with its last
    /// reader.
    async fn fetch_resource_list(&mut self, uri: &str, depth: u8) -> Result<Arc<Listing>> {
        let target = clean_path(uri)?;

        if let Some(cached) = &self.listing_cache {
            if cached.target == target {
                return Ok(Arc::clone(cached));
            }
        }

        match self.session.propfind(&target, depth).await {
            Ok(resources) => {
                let listing = Arc::new(Listing { target, resources });
                self.listing_cache = Some(Arc::clone(&listing));
                Ok(listing)
            }
            Err(error) => {
                if let ocdav::DavError::BadStatusCode(status) = &error {
                    self.notify(
                        uri,
                        &Progress::Error {
                            status: status.as_u16(),
                            reason: status.canonical_reason().unwrap_or_default().to_string(),
                        },
                    );
                }
                Err(error.into())
            }
        }
    }

    /// Translates a listed resource into the engine's stat shape.
    ///
    /// The server's timestamp is moved onto the local clock by subtracting
    /// the current time delta.
    fn resource_to_stat(&self, resource: &ocdav::Resource) -> FileStat {
        let (kind, size, mode) = match resource.kind {
            ResourceKind::Regular { size } => (FileKind::Regular, Some(size), REGULAR_MODE),
            ResourceKind::Collection => (FileKind::Directory, None, DIRECTORY_MODE),
        };

        FileStat {
            name: resource.name.clone(),
            kind: Some(kind),
            size,
            mtime: resource
                .modtime
                .map(|modtime| modtime - self.session.time_delta()),
            mode: Some(mode),
            file_id: resource.etag.clone(),
        }
    }
}

#[async_trait]
impl Vio for WebdavVio {
    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn file_id(&mut self, uri: &str) -> Result<String> {
        if let Some(cached) = &self.id_cache {
            if cached.url == uri {
                return Ok(cached.id.clone());
            }
        }

        let stat = self.stat(uri).await?;
        stat.file_id
            .ok_or_else(|| Error::from(ErrorKind::NoSuchEntity))
    }

    async fn open(&mut self, uri: &str, flags: OpenFlags) -> Result<FileHandle> {
        log::debug!("open called for {uri}");
        let target = clean_path(uri)?;
        self.session.connect(uri)?;

        let method = if flags.is_write() {
            TransferMethod::Put
        } else {
            TransferMethod::Get
        };

        if method == TransferMethod::Put {
            if let Some(parent) = parent_url(uri) {
                if self.last_parent.as_deref() == Some(parent.as_str()) {
                    log::debug!("Parent {parent} is there, we know it already.");
                } else if self.stat(&parent).await.is_ok() {
                    self.last_parent = Some(parent);
                } else {
                    log::debug!("Parent directory of {uri} does not exist.");
                    return Err(ErrorKind::NoSuchEntity.into());
                }
            }
        }

        Ok(FileHandle {
            method,
            url: uri.to_string(),
            target,
        })
    }

    async fn creat(&mut self, uri: &str) -> Result<FileHandle> {
        self.open(
            uri,
            OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE,
        )
        .await
    }

    fn close(&mut self, handle: FileHandle) -> Result<()> {
        if handle.method == TransferMethod::Put {
            // The next stat or id lookup must see the uploaded state.
            self.clean_caches();
        }
        Ok(())
    }

    fn read(&mut self, _handle: &mut FileHandle, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write(&mut self, _handle: &mut FileHandle, _buf: &[u8]) -> Result<usize> {
        Ok(0)
    }

    async fn sendfile(
        &mut self,
        file: &mut tokio::fs::File,
        handle: &mut FileHandle,
    ) -> Result<Transfer> {
        log::debug!("sendfile handling a {:?} request", handle.method);

        match handle.method {
            TransferMethod::Put => {
                let length = file
                    .metadata()
                    .await
                    .map_err(|source| Error::new(ErrorKind::Io, source))?
                    .len();
                let source = file
                    .try_clone()
                    .await
                    .map_err(|source| Error::new(ErrorKind::Io, source))?;

                self.notify(&handle.url, &Progress::StartUpload);
                let progress = self.byte_progress(&handle.url);

                match self
                    .session
                    .put_streaming(&handle.target, source, length, progress)
                    .await
                {
                    Ok(status) if status.is_success() => {
                        self.notify(&handle.url, &Progress::FinishedUpload);
                        Ok(Transfer::Complete)
                    }
                    Ok(status) => Ok(self.soft_failure(&handle.url, status)),
                    Err(error) => {
                        self.notify(
                            &handle.url,
                            &Progress::Error {
                                status: 0,
                                reason: error.to_string(),
                            },
                        );
                        Err(error.into())
                    }
                }
            }
            TransferMethod::Get => {
                self.notify(&handle.url, &Progress::StartDownload);
                let progress = self.byte_progress(&handle.url);

                match self
                    .session
                    .get_streaming(&handle.target, file, progress)
                    .await
                {
                    Ok((status, etag)) => {
                        if let Some(id) = etag {
                            self.id_cache = Some(IdCache {
                                url: handle.url.clone(),
                                id,
                            });
                        }
                        if status.is_success() {
                            self.notify(&handle.url, &Progress::FinishedDownload);
                            Ok(Transfer::Complete)
                        } else {
                            Ok(self.soft_failure(&handle.url, status))
                        }
                    }
                    Err(error) => {
                        self.notify(
                            &handle.url,
                            &Progress::Error {
                                status: 0,
                                reason: error.to_string(),
                            },
                        );
                        Err(error.into())
                    }
                }
            }
        }
    }

    fn lseek(&mut self, _handle: &mut FileHandle, _offset: i64) -> Result<u64> {
        Err(ErrorKind::Unsupported.into())
    }

    async fn opendir(&mut self, uri: &str) -> Result<DirHandle> {
        log::debug!("opendir called on {uri}");
        self.session.connect(uri)?;

        let listing = self.fetch_resource_list(uri, 1).await?;
        Ok(DirHandle { listing, cursor: 0 })
    }

    fn closedir(&mut self, handle: DirHandle) -> Result<()> {
        drop(handle);
        Ok(())
    }

    fn readdir(&mut self, handle: &mut DirHandle) -> Option<FileStat> {
        while let Some(resource) = handle.listing.resources.get(handle.cursor) {
            handle.cursor += 1;

            // Server hrefs are only partially escaped; re-escape before
            // comparing with the fully escaped request target.
            let escaped = quote_href(resource.path.as_bytes());
            if paths_equal(escaped.as_ref(), &handle.listing.target) {
                log::debug!("Skipping target resource.");
                continue;
            }

            let stat = self.resource_to_stat(resource);
            self.stat_cache = Some(stat.clone());
            return Some(stat);
        }

        None
    }

    async fn mkdir(&mut self, uri: &str) -> Result<()> {
        let target = clean_path(uri)?;
        self.session.connect(uri)?;

        let status = self.session.mkcol(&target).await?;
        // MKCOL announces an existing collection as 405.
        if status == StatusCode::METHOD_NOT_ALLOWED {
            return Err(ErrorKind::AlreadyExists.into());
        }
        match ErrorKind::from_http_status(status.as_u16()) {
            None => {
                self.clean_caches();
                Ok(())
            }
            Some(kind) => Err(kind.into()),
        }
    }

    async fn rmdir(&mut self, uri: &str) -> Result<()> {
        let target = clean_path(uri)?;
        self.session.connect(uri)?;

        let status = self.session.delete(&target).await?;
        match ErrorKind::from_http_status(status.as_u16()) {
            None => {
                self.clean_caches();
                Ok(())
            }
            Some(kind) => Err(kind.into()),
        }
    }

    async fn stat(&mut self, uri: &str) -> Result<FileStat> {
        log::debug!("stat {uri} called");
        let name = basename(uri);

        if let Some(cached) = &self.stat_cache {
            if cached.name == name {
                return Ok(cached.clone());
            }
        }

        self.session.connect(uri)?;
        let listing = self.fetch_resource_list(uri, 1).await?;

        let decoded = percent_decode_str(&listing.target)
            .decode_utf8()
            .map_err(|source| Error::new(ErrorKind::InvalidArgument, source))?;
        let wanted = decoded.trim_end_matches('/');

        let resource = listing
            .resources
            .iter()
            .find(|resource| resource.path.trim_end_matches('/') == wanted);
        let Some(resource) = resource else {
            log::debug!("No entry for {wanted} in its own listing");
            return Err(ErrorKind::NoSuchEntity.into());
        };

        log::debug!("Working on file {}", resource.name);
        Ok(self.resource_to_stat(resource))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.session.connect(from)?;
        let source = clean_path(from)?;
        let target = clean_path(to)?;

        let status = self.session.move_to(&source, &target).await?;
        match ErrorKind::from_http_status(status.as_u16()) {
            None => {
                self.clean_caches();
                Ok(())
            }
            Some(kind) => Err(kind.into()),
        }
    }

    async fn unlink(&mut self, uri: &str) -> Result<()> {
        let target = clean_path(uri)?;
        self.session.connect(uri)?;

        // Deletion failures are logged, not surfaced; the next listing
        // shows whether the entry is really gone.
        match self.session.delete(&target).await {
            Ok(status) if !status.is_success() => {
                log::warn!("DELETE on {uri} returned {status}");
            }
            Err(error) => log::warn!("DELETE on {uri} failed: {error}"),
            Ok(_) => self.clean_caches(),
        }
        Ok(())
    }

    fn chmod(&mut self, _uri: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn chown(&mut self, _uri: &str, _owner: u32, _group: u32) -> Result<()> {
        Ok(())
    }

    async fn utimes(&mut self, uri: &str, _atime: i64, mtime: i64) -> Result<()> {
        let target = clean_path(uri)?;
        self.session.connect(uri)?;

        // Inverse of the translation in stat: the server stores its own
        // clock, so the delta is added back.
        let stamped = mtime + self.session.time_delta();
        log::debug!("Setting lastmodified of {target} to {stamped}");
        self.session.proppatch_lastmodified(&target, stamped).await?;

        self.clean_caches();
        Ok(())
    }

    fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<()> {
        match (key, value) {
            ("session_key", PropertyValue::Str(value)) => self.session.set_session_cookie(value),
            ("proxy_type", PropertyValue::Str(value)) => {
                self.session.proxy_mut().kind = Some(value);
            }
            ("proxy_host", PropertyValue::Str(value)) => {
                self.session.proxy_mut().host = Some(value);
            }
            ("proxy_user", PropertyValue::Str(value)) => {
                self.session.proxy_mut().user = Some(value);
            }
            ("proxy_pwd", PropertyValue::Str(value)) => {
                self.session.proxy_mut().password = Some(value.into());
            }
            ("proxy_port", PropertyValue::Int(value)) => {
                let port = u16::try_from(value)
                    .map_err(|source| Error::new(ErrorKind::InvalidArgument, source))?;
                self.session.proxy_mut().port = Some(port);
            }
            ("progress_callback", PropertyValue::Progress(callback)) => {
                self.progress = Some(callback);
            }
            ("read_timeout", PropertyValue::Int(value)) => {
                let seconds = u64::try_from(value)
                    .map_err(|source| Error::new(ErrorKind::InvalidArgument, source))?;
                self.session.set_read_timeout(seconds);
            }
            ("csync_context", PropertyValue::Context(context)) => self.context = Some(context),
            _ => return Err(ErrorKind::InvalidArgument.into()),
        }
        Ok(())
    }

    fn error_string(&self) -> Option<&str> {
        self.session.last_error()
    }
}

/// Definition for a [`WebdavVio`] instance.
///
/// Everything here can also be set later through the property surface;
/// the definition exists so hosts can deserialise their configuration
/// straight into a backend.
#[derive(Debug, Default, serde::Deserialize)]
pub struct WebdavDefinition {
    /// Read timeout in seconds; absent keeps the default of 30.
    #[serde(default)]
    pub read_timeout: Option<u64>,
    #[serde(default)]
    pub proxy_type: Option<String>,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub proxy_user: Option<String>,
    #[serde(default)]
    pub proxy_pwd: Option<String>,
}

impl WebdavDefinition {
    /// Creates a backend for this definition.
    #[must_use]
    pub fn vio(self, prompt: Option<Arc<dyn AuthPrompt>>) -> WebdavVio {
        let mut vio = WebdavVio::new(prompt);
        if let Some(seconds) = self.read_timeout {
            vio.session.set_read_timeout(seconds);
        }

        let proxy = vio.session.proxy_mut();
        proxy.kind = self.proxy_type;
        proxy.host = self.proxy_host;
        proxy.port = self.proxy_port;
        proxy.user = self.proxy_user;
        proxy.password = self.proxy_pwd.map(Into::into);
        vio
    }
}

/// The parent collection of a URI, with its trailing slash.
fn parent_url(uri: &str) -> Option<String> {
    let trimmed = uri.trim_end_matches('/');
    let start = trimmed.find("://").map_or(0, |idx| idx + 3);
    let slash = trimmed[start..].rfind('/')? + start;
    Some(trimmed[..=slash].to_string())
}

/// The last component of a URI, ignoring a trailing slash.
fn basename(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn paths_equal(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}
