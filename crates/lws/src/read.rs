//! Read path: iterator creation, index-to-reader resolution, the live-reader
//! gate purge waits on.

use crate::cache::RefReader;
use crate::error::LwsError;
use crate::iterator::{Container, LogIterator};
use crate::segment::{SegmentReader, INIT_INDEX};
use crate::{Lws, LwsInner};
use logfile::{FileType, LogEntry};
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Lws {
    /// Snapshots the current `[first_index, last_index]` range and returns a
    /// cursor over it.
    ///
    /// The iterator counts as a live reader: a purge that would remove any
    /// of its segments waits until the iterator is released or dropped.
    /// Entries written after the snapshot are not visible to it.
    pub fn new_log_iterator(&self) -> LogIterator<'_> {
        let inner = &*self.inner;
        inner.read_request();
        LogIterator::new(Container::Wal {
            lws: inner,
            first: inner.first_index.load(Ordering::Acquire),
            last: inner.last_index.load(Ordering::Acquire),
        })
    }

    /// Opens a standalone record file written by
    /// [`write_to_file`](Self::write_to_file) and returns a cursor over its
    /// records, indexed from 1.
    pub fn read_from_file(&self, name: &str) -> Result<LogIterator<'_>, LwsError> {
        let path = self.inner.path.join(name);
        let size = fs::metadata(&path)?.len();
        let reader = SegmentReader::open(
            crate::segment::Segment {
                id: 0,
                first_index: INIT_INDEX,
                path,
                size,
            },
            FileType::Normal,
            0,
            false,
        )?;
        Ok(LogIterator::new(Container::File {
            reader,
            lws: &*self.inner,
        }))
    }

    /// Logical index of the oldest readable entry.
    pub fn first_index(&self) -> u64 {
        self.inner.first_index.load(Ordering::Acquire)
    }

    /// Logical index of the newest written entry; `first_index - 1` when the
    /// log is empty.
    pub fn last_index(&self) -> u64 {
        self.inner.last_index.load(Ordering::Acquire)
    }
}

impl LwsInner {
    pub(crate) fn read_request(&self) {
        *self.read_count.lock().unwrap() += 1;
    }

    pub(crate) fn read_release(&self) {
        let mut count = self.read_count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.read_cond.notify_all();
        }
    }

    /// Resolves `idx` to its segment's cached reader, opening one on a cache
    /// miss.
    fn find_reader(&self, idx: u64) -> Result<Arc<RefReader>, LwsError> {
        let segment = self
            .segments
            .read()
            .unwrap()
            .find_at(idx)
            .cloned()
            .ok_or(LwsError::EntryIndexOutOfRange)?;
        let file_type = self.opts.file_type;
        let buffer_size = self.opts.resolved_buffer_size();
        let mmap_lock = self.opts.mmap_lock;
        self.read_cache.get_or_create(segment.id, || {
            Ok(RefReader::new(SegmentReader::open(
                segment,
                file_type,
                buffer_size,
                mmap_lock,
            )?))
        })
    }

    /// Fetches one entry, bracketing the read with `obtain`/`release` so the
    /// evictor cannot close the reader mid-flight.
    pub(crate) fn entry_at(&self, idx: u64) -> Result<LogEntry, LwsError> {
        let reader = self.find_reader(idx)?;
        reader.obtain();
        let result = reader.read_log_by_index(idx);
        reader.release();
        result
    }
}
