//! Heap-backed read-through / write-back cache over a file.

use crate::alloc::BytesAllocator;
use crate::{Area, FbError};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;

/// A fixed-size heap cache with the same `next_at`/`read_at` contract as
/// [`ZeroMmap`](crate::ZeroMmap).
///
/// The cache covers the file range `[mm_off, mm_off + capacity)`. A request
/// outside that range first writes back the dirty window, then rebases the
/// cache at the requested offset (growing it to `max(initial, n)` and, for
/// reads, refilling from the file). `sync` is `write_back`: durability of the
/// underlying file is the caller's concern.
pub struct FixedBuffer {
    file: File,
    mm_off: u64,
    f_size: u64,
    wait_sync: Area,
    init_size: usize,
    allocator: BytesAllocator,
}

impl FixedBuffer {
    pub fn new(file: &File, buf_size: usize) -> Result<Self, FbError> {
        let f_size = file.metadata()?.len();
        Ok(FixedBuffer {
            file: file.try_clone()?,
            mm_off: 0,
            f_size,
            wait_sync: Area::default(),
            init_size: buf_size,
            allocator: BytesAllocator::new(0),
        })
    }

    /// Relative position of `offset` inside the cache window, or `None` when
    /// `[offset, offset + n)` is not fully cached.
    fn window_pos(&self, offset: u64, n: usize) -> Option<u64> {
        if offset >= self.mm_off {
            let rel = offset - self.mm_off;
            if self.allocator.contains(rel, n) {
                return Some(rel);
            }
        }
        None
    }

    /// Rebase the cache at `offset`: write back the dirty window, grow the
    /// buffer if `n` does not fit, and optionally refill from the file.
    fn rebuffer(&mut self, offset: u64, n: usize, fill: bool) -> Result<(), FbError> {
        self.write_file()?;
        let mut size = self.allocator.size();
        if size == 0 {
            size = self.init_size;
        }
        size = size.max(n);
        self.allocator.resize(size);
        self.mm_off = offset;

        if fill {
            let buf = self.allocator.alloc_at(0, size)?;
            let mut filled = 0;
            while filled < buf.len() {
                match self.file.read_at(&mut buf[filled..], offset + filled as u64) {
                    Ok(0) => break,
                    Ok(read) => filled += read,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Poison the window so stale bytes are never served.
                        self.mm_off = u64::MAX;
                        return Err(e.into());
                    }
                }
            }
            // Anything past EOF stays zeroed rather than carrying bytes from
            // the previous window position.
            for b in &mut buf[filled..] {
                *b = 0;
            }
        }
        Ok(())
    }

    /// Returns a writable slice covering `[offset, offset + n)`, extending
    /// the tracked file size when the range reaches past it. The range is
    /// merged into the dirty window.
    pub fn next_at(&mut self, offset: u64, n: usize) -> Result<&mut [u8], FbError> {
        if n == 0 {
            return Err(FbError::InvalidArg);
        }
        let rel = match self.window_pos(offset, n) {
            Some(rel) => rel,
            None => {
                self.rebuffer(offset, n, true)?;
                0
            }
        };
        self.wait_sync = self.wait_sync.merge(Area { off: offset, len: n });
        if offset + n as u64 > self.f_size {
            self.f_size = offset + n as u64;
        }
        self.allocator.alloc_at(rel, n)
    }

    /// Returns a readable slice at `offset`, clipped to the remaining bytes;
    /// [`FbError::Eof`] at or past the tracked file size.
    pub fn read_at(&mut self, offset: u64, n: usize) -> Result<&[u8], FbError> {
        if n == 0 {
            return Err(FbError::InvalidArg);
        }
        if offset >= self.f_size {
            return Err(FbError::Eof);
        }
        let n = n.min((self.f_size - offset) as usize);
        let rel = match self.window_pos(offset, n) {
            Some(rel) => rel,
            None => {
                self.rebuffer(offset, n, true)?;
                0
            }
        };
        self.allocator.alloc_at(rel, n).map(|b| &*b)
    }

    fn write_file(&mut self) -> Result<(), FbError> {
        if self.wait_sync.is_empty() {
            return Ok(());
        }
        let rel = self.wait_sync.off - self.mm_off;
        let len = self.wait_sync.len;
        let off = self.wait_sync.off;
        let buf = self.allocator.alloc_at(rel, len)?;
        self.file.write_all_at(buf, off)?;
        self.wait_sync = Area::default();
        Ok(())
    }

    /// Writes the dirty window to the underlying file and clears it.
    pub fn write_back(&mut self) -> Result<(), FbError> {
        self.write_file()
    }

    /// Same as [`write_back`](Self::write_back); the underlying file provides
    /// its own durability.
    pub fn sync(&mut self) -> Result<(), FbError> {
        self.write_file()
    }

    /// Adjusts the tracked file size; never touches the file itself.
    pub fn truncate(&mut self, size: u64) -> Result<(), FbError> {
        self.f_size = size;
        Ok(())
    }

    /// Tracked file size, including extents pending write-back.
    pub fn size(&self) -> u64 {
        self.f_size
    }

    pub fn release(&mut self) -> Result<(), FbError> {
        self.write_file()?;
        self.allocator.release();
        Ok(())
    }
}

/// Best-effort write-back on drop: a dropped buffer must not swallow framed
/// records that were never explicitly flushed. Errors cannot propagate from
/// here; callers that need certainty flush first.
impl Drop for FixedBuffer {
    fn drop(&mut self) {
        let _ = self.write_file();
    }
}
