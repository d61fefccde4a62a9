//! Window allocators: a page-aligned mmap window over a file and a heap
//! window with the same `alloc_at` surface.

use crate::FbError;
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::sync::OnceLock;

/// The OS page size, queried once.
pub fn os_page_size() -> u64 {
    static PAGE: OnceLock<u64> = OnceLock::new();
    *PAGE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 })
}

fn align_down(n: u64, a: u64) -> u64 {
    n & !(a - 1)
}

fn align_up(n: u64, a: u64) -> u64 {
    (n + a - 1) & !(a - 1)
}

/// A file-backed memory window aligned to the OS page.
///
/// The requested `(offset, size)` is widened so the mapping starts at a page
/// boundary at or below `offset` and ends at a page boundary at or above
/// `offset + size`. Slices returned by [`alloc_at`](Self::alloc_at) are valid
/// until the next [`resize`](Self::resize); callers must not retain them
/// across remaps.
pub struct MmapAllocator {
    file: File,
    map: Option<MmapMut>,
    mm_off: u64,
    lock: bool,
}

impl MmapAllocator {
    /// Maps `[offset, offset + size)` of `file` (after page alignment).
    ///
    /// `lock` additionally `mlock`s the window into memory.
    pub fn new(file: &File, offset: u64, size: usize, lock: bool) -> Result<Self, FbError> {
        let mut allocator = MmapAllocator {
            file: file.try_clone()?,
            map: None,
            mm_off: 0,
            lock,
        };
        allocator.resize(offset, size)?;
        Ok(allocator)
    }

    fn remap(&self, offset: u64, size: usize) -> Result<(MmapMut, u64), FbError> {
        let page = os_page_size();
        let end = offset + size as u64;
        let mm_off = align_down(offset, page);
        let len = align_up(end - mm_off, page) as usize;
        // Safety: the map aliases file contents that only this allocator's
        // owner mutates; the file handle outlives nothing the map needs.
        let map = unsafe { MmapOptions::new().offset(mm_off).len(len).map_mut(&self.file)? };
        if self.lock {
            map.lock()?;
        }
        Ok((map, mm_off))
    }

    /// Remaps to a window covering `[offset, offset + size)`.
    ///
    /// The previous mapping is released only after the new one succeeds, so
    /// on failure the old window stays usable.
    pub fn resize(&mut self, offset: u64, size: usize) -> Result<(), FbError> {
        let (map, mm_off) = self.remap(offset, size)?;
        self.map = Some(map);
        self.mm_off = mm_off;
        Ok(())
    }

    /// Returns the window slice covering `[offset, offset + n)` (absolute
    /// file offsets).
    ///
    /// Fails with [`FbError::End`] when `offset` falls outside the window;
    /// the slice is clipped when the range extends past the window end.
    pub fn alloc_at(&mut self, offset: u64, n: usize) -> Result<&mut [u8], FbError> {
        let map = self.map.as_mut().ok_or(FbError::End)?;
        let mm_end = self.mm_off + map.len() as u64;
        if offset < self.mm_off || offset >= mm_end {
            return Err(FbError::End);
        }
        let n = n.min((mm_end - offset) as usize);
        let from = (offset - self.mm_off) as usize;
        Ok(&mut map[from..from + n])
    }

    /// Whether `[offset, offset + n)` lies entirely inside the live window.
    pub fn contains(&self, offset: u64, n: usize) -> bool {
        match &self.map {
            Some(map) => {
                offset >= self.mm_off && offset + n as u64 <= self.mm_off + map.len() as u64
            }
            None => false,
        }
    }

    /// Current window length, after alignment.
    pub fn size(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    /// Absolute file offset of the window start (page aligned).
    pub fn offset(&self) -> u64 {
        self.mm_off
    }

    /// `msync(MS_SYNC)` the given window-relative range to the file.
    pub fn flush_range(&self, from: usize, len: usize) -> Result<(), FbError> {
        if let Some(map) = &self.map {
            map.flush_range(from, len)?;
        }
        Ok(())
    }

    /// Unmaps the window. Subsequent `alloc_at` calls fail with `End` until
    /// the next successful `resize`.
    pub fn release(&mut self) {
        self.map = None;
    }
}

/// A growable heap window with the same `alloc_at` contract as
/// [`MmapAllocator`], minus the page semantics. Offsets are relative to the
/// buffer start.
pub struct BytesAllocator {
    buf: Vec<u8>,
}

impl BytesAllocator {
    pub fn new(cap: usize) -> Self {
        BytesAllocator { buf: vec![0; cap] }
    }

    /// Returns the buffer slice covering `[offset, offset + n)`, clipped to
    /// the buffer end; [`FbError::End`] when `offset` is out of bounds.
    pub fn alloc_at(&mut self, offset: u64, n: usize) -> Result<&mut [u8], FbError> {
        let end = self.buf.len() as u64;
        if offset >= end {
            return Err(FbError::End);
        }
        let n = n.min((end - offset) as usize);
        let from = offset as usize;
        Ok(&mut self.buf[from..from + n])
    }

    /// Whether `[offset, offset + n)` fits in the buffer.
    pub fn contains(&self, offset: u64, n: usize) -> bool {
        offset + n as u64 <= self.buf.len() as u64
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Grows the buffer to `size` bytes; shrinks are no-ops.
    pub fn resize(&mut self, size: usize) {
        if size > self.buf.len() {
            self.buf.resize(size, 0);
        }
    }

    pub fn release(&mut self) {
        self.buf = Vec::new();
    }
}
