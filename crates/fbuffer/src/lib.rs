//! # fbuffer — file buffers for the log write system
//!
//! Two allocators and two buffers with a symmetric surface:
//!
//! - [`MmapAllocator`] — a page-aligned, file-backed memory window. Callers
//!   address it by **absolute file offset**; the allocator remaps on demand.
//! - [`BytesAllocator`] — a growable heap window with the same `alloc_at`
//!   contract, addressed relative to the buffer start.
//! - [`ZeroMmap`] — `next_at`/`read_at` semantics over [`MmapAllocator`].
//!   Writes land directly in the mapping (zero copy); a single dirty window
//!   tracks what `sync` must `msync` to the backing file.
//! - [`FixedBuffer`] — the same contract over [`BytesAllocator`], with
//!   explicit read-through from and write-back to an underlying file. Used
//!   where the segment runs in normal (non-mmap) file mode.
//!
//! Concurrent operations on any of these types are not safe; callers must
//! serialize access (the segment writer does this with its own lock).

mod alloc;
mod fixed;
mod zero_mmap;

pub use alloc::{os_page_size, BytesAllocator, MmapAllocator};
pub use fixed::FixedBuffer;
pub use zero_mmap::ZeroMmap;

use std::io;
use thiserror::Error;

/// Errors surfaced by the allocators and buffers.
#[derive(Debug, Error)]
pub enum FbError {
    /// An underlying I/O or mmap error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The requested offset lies entirely outside the live window.
    #[error("offset outside the allocator window")]
    End,

    /// A read started at or past the tracked end of file.
    #[error("read past end of file")]
    Eof,

    /// A zero-length request or otherwise malformed argument.
    #[error("invalid argument")]
    InvalidArg,

    /// A seek resolved to a negative offset.
    #[error("seek offset invalid")]
    Seek,
}

/// The single dirty window held by a buffer: the union of all writes since
/// the last `sync`/`write_back`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Area {
    pub off: u64,
    pub len: usize,
}

impl Area {
    pub fn end(self) -> u64 {
        self.off + self.len as u64
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Covering span of two windows (includes any gap between them).
    pub fn merge(self, other: Area) -> Area {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let off = self.off.min(other.off);
        let end = self.end().max(other.end());
        Area {
            off,
            len: (end - off) as usize,
        }
    }

    /// Intersection of two windows; empty when they do not overlap.
    pub fn intersect(self, other: Area) -> Area {
        let off = self.off.max(other.off);
        let end = self.end().min(other.end());
        if end <= off {
            Area::default()
        } else {
            Area {
                off,
                len: (end - off) as usize,
            }
        }
    }
}
