//! Traits and common types for virtual-I/O backends.
//!
//! The sync engine drives a backend exclusively through [`Vio`]; the
//! types here are the currency of that trait. Backends are single-caller:
//! the engine issues one operation at a time, which is why mutating
//! operations take `&mut self` and nothing here is locked.

use std::any::Any;
use std::ops::BitOr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Static description of what a backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The server moves files atomically, so no temporary-name dance is
    /// needed when propagating.
    pub atomic_copy: bool,
    /// Whether the engine should stat a file again right after copying it.
    pub do_post_copy_stat: bool,
    /// Whether the engine must synchronise clocks before relying on
    /// timestamps.
    pub time_sync_required: bool,
    /// Level of unix extension support; zero means none.
    pub unix_extensions: i32,
    /// The backend can propagate straight from a file descriptor via
    /// [`Vio::sendfile`].
    pub propagate_on_fd: bool,
}

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
}

/// The stat shape handed back to the engine.
///
/// Fields that the wire protocol does not carry stay `None`; permissions
/// are synthesised, since WebDAV has no mode bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    pub kind: Option<FileKind>,
    pub size: Option<u64>,
    /// Modification time translated into the local clock.
    pub mtime: Option<i64>,
    pub mode: Option<u32>,
    /// Content identifier (etag) with quotes stripped.
    pub file_id: Option<String>,
}

/// POSIX-shaped open flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(1);
    pub const READ_WRITE: OpenFlags = OpenFlags(1 << 1);
    pub const CREATE: OpenFlags = OpenFlags(1 << 6);
    pub const TRUNCATE: OpenFlags = OpenFlags(1 << 9);

    #[must_use]
    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Whether these flags ask for an upload rather than a download.
    #[must_use]
    pub fn is_write(self) -> bool {
        self.contains(OpenFlags::WRITE_ONLY)
            || self.contains(OpenFlags::READ_WRITE)
            || self.contains(OpenFlags::CREATE)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// A notification about an ongoing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Bytes on the wire so far, and the total expected.
    Transfer { current: u64, total: u64 },
    StartUpload,
    FinishedUpload,
    StartDownload,
    FinishedDownload,
    Error { status: u16, reason: String },
}

/// Called with the decoded URL an event refers to.
pub type ProgressCallback = Arc<dyn Fn(&str, &Progress) + Send + Sync>;

/// A runtime-configurable backend property.
#[non_exhaustive]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Progress(ProgressCallback),
    /// Opaque host state, passed back through callbacks that need it.
    Context(Arc<dyn Any + Send + Sync>),
}

/// The outcome of a transfer on one file.
///
/// Server-side rejections of a single file do not abort a whole sync run;
/// they surface as [`Transfer::Skipped`] and the engine moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Complete,
    Skipped { status: u16 },
}

/// A directory listing shared between readers and the backend's cache.
#[derive(Debug)]
pub struct Listing {
    /// The escaped request target this listing answers for.
    pub(crate) target: String,
    pub(crate) resources: Vec<ocdav::Resource>,
}

/// Handle for an open file transfer.
///
/// The handle only records what to do; bytes move when the engine calls
/// [`Vio::sendfile`].
#[derive(Debug)]
pub struct FileHandle {
    pub(crate) method: TransferMethod,
    /// The URL as the host spelled it, used in progress events.
    pub(crate) url: String,
    /// The escaped request target.
    pub(crate) target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferMethod {
    Get,
    Put,
}

/// Cursor over a [`Listing`].
#[derive(Debug)]
pub struct DirHandle {
    pub(crate) listing: Arc<Listing>,
    pub(crate) cursor: usize,
}

/// The operation set a backend exposes to the engine.
///
/// # Note for implementors
///
/// The auto-generated documentation for this trait is rather hard to read
/// due to the usage of `#[async_trait]`. You might want to consider
/// clicking on the `source` link on the right and reading the
/// documentation from the raw code for this trait.
#[async_trait]
pub trait Vio: Send {
    /// Static capabilities of this backend.
    fn capabilities(&self) -> Capabilities;

    /// A stable content identifier for the entry at `uri`.
    async fn file_id(&mut self, uri: &str) -> Result<String>;

    /// Prepares a transfer on `uri`. Write-ish flags mean an upload.
    async fn open(&mut self, uri: &str, flags: OpenFlags) -> Result<FileHandle>;

    /// Shorthand for opening with `CREATE | WRITE_ONLY | TRUNCATE`.
    async fn creat(&mut self, uri: &str) -> Result<FileHandle>;

    /// Releases a handle. Closing an upload invalidates cached state.
    fn close(&mut self, handle: FileHandle) -> Result<()>;

    /// Byte-wise reads are not part of this backend; always reads nothing.
    fn read(&mut self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize>;

    /// Byte-wise writes are not part of this backend; always writes nothing.
    fn write(&mut self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize>;

    /// Streams between the host-owned `file` and the handle's URL.
    ///
    /// The descriptor stays owned by the host and is never closed here.
    async fn sendfile(
        &mut self,
        file: &mut tokio::fs::File,
        handle: &mut FileHandle,
    ) -> Result<Transfer>;

    /// Seeking is not supported on transfer handles.
    fn lseek(&mut self, handle: &mut FileHandle, offset: i64) -> Result<u64>;

    /// Lists the collection at `uri` and returns a cursor over it.
    async fn opendir(&mut self, uri: &str) -> Result<DirHandle>;

    /// Releases a directory cursor.
    fn closedir(&mut self, handle: DirHandle) -> Result<()>;

    /// The next entry, skipping the listed collection itself.
    fn readdir(&mut self, handle: &mut DirHandle) -> Option<FileStat>;

    async fn mkdir(&mut self, uri: &str) -> Result<()>;

    async fn rmdir(&mut self, uri: &str) -> Result<()>;

    async fn stat(&mut self, uri: &str) -> Result<FileStat>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    async fn unlink(&mut self, uri: &str) -> Result<()>;

    /// The protocol carries no mode bits; succeeds without doing anything.
    fn chmod(&mut self, uri: &str, mode: u32) -> Result<()>;

    /// The protocol carries no ownership; succeeds without doing anything.
    fn chown(&mut self, uri: &str, owner: u32, group: u32) -> Result<()>;

    /// Sets the server-side modification time of `uri`.
    async fn utimes(&mut self, uri: &str, atime: i64, mtime: i64) -> Result<()>;

    /// Accepts a runtime configuration value. Unknown keys fail.
    fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<()>;

    /// The human-readable text of the most recent failure.
    fn error_string(&self) -> Option<&str>;
}

#[cfg(test)]
mod tests {
    use super::{OpenFlags, Vio};

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::READ_ONLY.is_write());
        assert!(OpenFlags::WRITE_ONLY.is_write());
        assert!((OpenFlags::CREATE | OpenFlags::TRUNCATE).is_write());
        assert!((OpenFlags::CREATE | OpenFlags::WRITE_ONLY).contains(OpenFlags::CREATE));
        assert!(!OpenFlags::READ_ONLY.contains(OpenFlags::CREATE));
    }

    #[test]
    fn test_vio_is_object_safe() {
        #[allow(dead_code)]
        fn dummy(_: Box<dyn Vio>) {}
    }
}
