//! Zero-copy mmap buffer: `next_at`/`read_at` over [`MmapAllocator`].

use crate::alloc::MmapAllocator;
use crate::{Area, FbError};
use std::fs::File;

/// A zero-copy buffer over a memory-mapped file window.
///
/// `next_at` hands out writable slices of the mapping itself, extending the
/// underlying file when a write reaches past its end. `read_at` hands out
/// readable slices bounded by the tracked file size. Either operation may
/// remap the window; a remap resets the dirty window, because unmapping
/// flushes dirty pages to the backing file.
///
/// `truncate` only adjusts the tracked file size — the file itself is
/// truncated by the log-file layer.
pub struct ZeroMmap {
    file: File,
    f_size: u64,
    wait_sync: Area,
    mm_size: usize,
    allocator: MmapAllocator,
}

impl ZeroMmap {
    /// Wraps `file` with a mapping window of `mm_size` bytes starting at
    /// offset 0.
    pub fn new(file: &File, mm_size: usize, lock: bool) -> Result<Self, FbError> {
        let f_size = file.metadata()?.len();
        let allocator = MmapAllocator::new(file, 0, mm_size, lock)?;
        Ok(ZeroMmap {
            file: file.try_clone()?,
            f_size,
            wait_sync: Area::default(),
            mm_size,
            allocator,
        })
    }

    fn ensure_window(&mut self, offset: u64, n: usize) -> Result<(), FbError> {
        if !self.allocator.contains(offset, n) {
            let size = self.mm_size.max(n);
            self.allocator.resize(offset, size)?;
            // The munmap of the old window pushed its dirty pages to the
            // backing file; nothing is left to msync.
            self.wait_sync = Area::default();
        }
        Ok(())
    }

    /// Returns a writable slice covering `[offset, offset + n)`, extending
    /// the file if the range reaches past its current end. The range is
    /// merged into the dirty window.
    pub fn next_at(&mut self, offset: u64, n: usize) -> Result<&mut [u8], FbError> {
        if n == 0 {
            return Err(FbError::InvalidArg);
        }
        let next_end = offset + n as u64;
        if next_end > self.f_size {
            self.file.set_len(next_end)?;
            self.f_size = next_end;
        }
        self.ensure_window(offset, n)?;
        self.wait_sync = self.wait_sync.merge(Area { off: offset, len: n });
        self.allocator.alloc_at(offset, n)
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
        self.ensure_window(offset, n)?;
        self.allocator.alloc_at(offset, n).map(|b| &*b)
    }

    /// Adjusts the tracked file size; never touches the file itself.
    pub fn truncate(&mut self, size: u64) -> Result<(), FbError> {
        self.f_size = size;
        Ok(())
    }

    /// `msync(MS_SYNC)` of the dirty window intersected with the current
    /// mapping, then clears the window.
    pub fn sync(&mut self) -> Result<(), FbError> {
        let mapped = Area {
            off: self.allocator.offset(),
            len: self.allocator.size(),
        };
        let overlap = self.wait_sync.intersect(mapped);
        if overlap.is_empty() {
            return Ok(());
        }
        let from = (overlap.off - mapped.off) as usize;
        self.allocator.flush_range(from, overlap.len)?;
        self.wait_sync = Area::default();
        Ok(())
    }

    /// No-op: writes through the mapping are already in the page cache.
    pub fn write_back(&mut self) -> Result<(), FbError> {
        Ok(())
    }

    /// Tracked file size, including extents created by `next_at`.
    pub fn size(&self) -> u64 {
        self.f_size
    }

    pub fn release(&mut self) {
        self.allocator.release();
    }
}
