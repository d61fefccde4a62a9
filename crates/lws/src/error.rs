//! Error taxonomy of the log write system facade.

use logfile::LogFileError;
use std::io;
use thiserror::Error;

/// Errors surfaced by the public surface of the log.
#[derive(Debug, Error)]
pub enum LwsError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A framing- or buffer-layer error.
    #[error(transparent)]
    File(#[from] LogFileError),

    /// Another purge is already running on this log.
    #[error("purge work has been performed")]
    PurgeWorkExisted,

    /// No retention watermark is exceeded; there is nothing to purge.
    #[error("purge threshold not reached")]
    PurgeNotReached,

    /// The requested entry index is outside the segment's position table.
    #[error("index out of segment range")]
    SegmentIndex,

    /// The requested entry index resolves to no live segment.
    #[error("idx out of range")]
    EntryIndexOutOfRange,

    /// A coder with this type tag is already registered.
    #[error("this type coder has exist")]
    CoderExist,

    /// No coder is registered for this type tag.
    #[error("this type coder not exist")]
    CoderNotExist,

    /// Type tags at or below zero are reserved for the system.
    #[error("the coder type is system reservation type")]
    CoderSysType,

    /// A user coder failed to encode or decode a value.
    #[error("coder failure: {0}")]
    Coder(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The location string has more than one `scheme://` delimiter.
    #[error("invalid protocol format")]
    InvalidFormat,

    /// The location names a scheme this log cannot serve.
    #[error("unsupported protocol")]
    UnsupportedScheme,

    /// The location string is empty or unresolvable.
    #[error("invalid path")]
    InvalidPath,

    /// A side-file name may not collide with the log's segment naming rules.
    #[error("the file name matches the wal naming rules")]
    ReservedFileName,
}
