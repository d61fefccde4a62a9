//! Entry iterators: single-threaded cursors over a snapshot of the log, or
//! over one standalone record file.

use crate::coder::{Coder, RAW_CODER_TYPE};
use crate::error::LwsError;
use crate::segment::SegmentReader;
use crate::LwsInner;
use logfile::LogEntry;
use std::any::Any;
use std::sync::Arc;

/// What an iterator walks: the live log (through the reader cache) or a
/// single side file.
pub(crate) enum Container<'a> {
    Wal {
        lws: &'a LwsInner,
        first: u64,
        last: u64,
    },
    File {
        reader: SegmentReader,
        lws: &'a LwsInner,
    },
}

impl Container<'_> {
    fn first_index(&self) -> u64 {
        match self {
            Container::Wal { first, .. } => *first,
            Container::File { reader, .. } => reader.first_index(),
        }
    }

    fn last_index(&self) -> u64 {
        match self {
            Container::Wal { last, .. } => *last,
            Container::File { reader, .. } => reader.last_index(),
        }
    }

    fn entry(&self, idx: u64) -> Result<LogEntry, LwsError> {
        match self {
            Container::Wal { lws, .. } => lws.entry_at(idx),
            Container::File { reader, .. } => reader.read_log_by_index(idx),
        }
    }

    fn coder(&self, typ: i8) -> Result<Arc<dyn Coder>, LwsError> {
        match self {
            Container::Wal { lws, .. } | Container::File { lws, .. } => lws.coders.get(typ),
        }
    }

    fn release(&self) {
        if let Container::Wal { lws, .. } = self {
            lws.read_release();
        }
    }
}

/// A cursor over log entries.
///
/// The cursor starts before the first entry; `next` moves forward,
/// `previous` backward, and the `has_*` predicates bound both directions.
/// The iterator registers itself as a live reader of the log, which blocks
/// purge until [`release`](Self::release) runs (dropping the iterator
/// releases it too, exactly once).
pub struct LogIterator<'a> {
    container: Container<'a>,
    index: u64,
    released: bool,
}

impl<'a> LogIterator<'a> {
    pub(crate) fn new(container: Container<'a>) -> Self {
        let index = container.first_index() - 1;
        LogIterator {
            container,
            index,
            released: false,
        }
    }

    /// Rewinds the cursor to before the first entry.
    pub fn skip_to_first(&mut self) {
        self.index = self.container.first_index() - 1;
    }

    /// Moves the cursor past the last entry, for reverse iteration.
    pub fn skip_to_last(&mut self) {
        self.index = self.container.last_index() + 1;
    }

    pub fn has_next(&self) -> bool {
        self.has_next_n(1)
    }

    pub fn has_next_n(&self, n: usize) -> bool {
        self.container.last_index() as i64 - self.index as i64 >= n as i64
    }

    pub fn next(&mut self) -> Element<'_> {
        self.next_n(1)
    }

    pub fn next_n(&mut self, n: usize) -> Element<'_> {
        self.index += n as u64;
        self.element()
    }

    pub fn has_previous(&self) -> bool {
        self.has_previous_n(1)
    }

    pub fn has_previous_n(&self, n: usize) -> bool {
        self.index as i64 - self.container.first_index() as i64 >= n as i64
    }

    pub fn previous(&mut self) -> Element<'_> {
        self.previous_n(1)
    }

    pub fn previous_n(&mut self, n: usize) -> Element<'_> {
        self.index = self.index.saturating_sub(n as u64);
        self.element()
    }

    fn element(&self) -> Element<'_> {
        Element {
            index: self.index,
            container: &self.container,
            entry: None,
        }
    }

    /// Deregisters this iterator as a live reader. Safe to call more than
    /// once; later calls are no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.container.release();
    }
}

impl Drop for LogIterator<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// One position of the cursor. The entry is fetched lazily on the first
/// `get`/`get_obj` and memoized.
pub struct Element<'a> {
    index: u64,
    container: &'a Container<'a>,
    entry: Option<LogEntry>,
}

impl Element<'_> {
    /// Logical index of this element.
    pub fn index(&self) -> u64 {
        self.index
    }

    fn fetch(&mut self) -> Result<(), LwsError> {
        if self.entry.is_none() {
            self.entry = Some(self.container.entry(self.index)?);
        }
        Ok(())
    }

    /// The raw payload bytes.
    pub fn get(&mut self) -> Result<Vec<u8>, LwsError> {
        self.fetch()?;
        Ok(self.entry.as_ref().map(|e| e.data.clone()).unwrap_or_default())
    }

    /// The payload decoded through the coder registered for the entry's type
    /// tag; raw entries come back as `Vec<u8>`.
    pub fn get_obj(&mut self) -> Result<Box<dyn Any>, LwsError> {
        self.fetch()?;
        let (typ, data) = match &self.entry {
            Some(e) => (e.typ, e.data.clone()),
            None => return Err(LwsError::EntryIndexOutOfRange),
        };
        if typ == RAW_CODER_TYPE {
            return Ok(Box::new(data));
        }
        let coder = self.container.coder(typ)?;
        coder.decode(&data)
    }
}
