//! Reader cache: ref-counted segment readers with idle-time eviction.

use crate::error::LwsError;
use crate::segment::SegmentReader;
use log::warn;
use logfile::LogEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

/// Default idle time after which an unreferenced reader is evicted.
pub(crate) const EVICT_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// A segment reader plus the bookkeeping the cache needs: a reference count
/// that brackets in-flight reads, and the time of the last access.
pub(crate) struct RefReader {
    reader: SegmentReader,
    refs: AtomicI32,
    last_access: Mutex<Instant>,
}

impl RefReader {
    pub fn new(reader: SegmentReader) -> Self {
        RefReader {
            reader,
            refs: AtomicI32::new(0),
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Marks the reader in use; the evictor will not touch it.
    pub fn obtain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().unwrap().elapsed()
    }

    pub fn read_log_by_index(&self, index: u64) -> Result<LogEntry, LwsError> {
        self.touch();
        self.reader.read_log_by_index(index)
    }
}

struct CacheInner {
    readers: RwLock<HashMap<u64, Arc<RefReader>>>,
    /// True while the evictor thread is alive.
    evicting: AtomicBool,
    evict_interval: Duration,
}

/// Maps segment id to its open reader.
///
/// A single evictor thread watches for the entry with the oldest access time
/// whose reference count is zero and removes it once it has idled for the
/// eviction interval. The thread exits when the map drains and is restarted
/// by the next `put`.
pub(crate) struct ReaderCache {
    inner: Arc<CacheInner>,
}

impl ReaderCache {
    pub fn new(evict_interval: Duration) -> Self {
        ReaderCache {
            inner: Arc::new(CacheInner {
                readers: RwLock::new(HashMap::new()),
                evicting: AtomicBool::new(false),
                evict_interval,
            }),
        }
    }

    /// Returns the cached reader and refreshes its access time; no reference
    /// count change.
    pub fn get(&self, segment_id: u64) -> Option<Arc<RefReader>> {
        let reader = self.inner.readers.read().unwrap().get(&segment_id).cloned();
        if let Some(r) = &reader {
            r.touch();
        }
        reader
    }

    /// Returns the cached reader or builds one with `factory` and caches it.
    pub fn get_or_create<F>(&self, segment_id: u64, factory: F) -> Result<Arc<RefReader>, LwsError>
    where
        F: FnOnce() -> Result<RefReader, LwsError>,
    {
        if let Some(reader) = self.get(segment_id) {
            return Ok(reader);
        }
        let reader = Arc::new(factory()?);
        reader.touch();
        self.put_arc(segment_id, reader.clone());
        Ok(reader)
    }

    pub fn put(&self, segment_id: u64, reader: RefReader) {
        reader.touch();
        self.put_arc(segment_id, Arc::new(reader));
    }

    fn put_arc(&self, segment_id: u64, reader: Arc<RefReader>) {
        self.inner.readers.write().unwrap().insert(segment_id, reader);
        self.start_evictor();
    }

    /// Removes and returns the reader; the file closes once the last
    /// in-flight use drops it.
    pub fn delete(&self, segment_id: u64) -> Option<Arc<RefReader>> {
        self.inner.readers.write().unwrap().remove(&segment_id)
    }

    /// Drops every cached reader.
    pub fn clean(&self) {
        self.inner.readers.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.readers.read().unwrap().len()
    }

    fn start_evictor(&self) {
        if self.inner.evicting.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        if let Err(e) = thread::Builder::new()
            .name("lws-reader-evict".to_string())
            .spawn(move || evict_loop(inner))
        {
            self.inner.evicting.store(false, Ordering::Release);
            warn!("failed to start reader evictor: {e}");
        }
    }
}

/// Scans for the oldest idle unreferenced reader, sleeping until it either
/// expires or the map drains.
fn evict_loop(inner: Arc<CacheInner>) {
    loop {
        let (victim, empty) = next_victim(&inner);
        if empty {
            break;
        }
        match victim {
            Some((id, idle)) if idle >= inner.evict_interval => evict_one(&inner, id),
            Some((_, idle)) => thread::sleep(inner.evict_interval - idle),
            // Entries exist but all are referenced; check back later.
            None => thread::sleep(inner.evict_interval),
        }
    }
    inner.evicting.store(false, Ordering::Release);
}

/// `(oldest unreferenced entry, map is empty)`.
fn next_victim(inner: &CacheInner) -> (Option<(u64, Duration)>, bool) {
    let readers = inner.readers.read().unwrap();
    let victim = readers
        .iter()
        .filter(|(_, r)| r.refs.load(Ordering::Acquire) == 0)
        .map(|(id, r)| (*id, r.idle_for()))
        .max_by_key(|(_, idle)| *idle);
    (victim, readers.is_empty())
}

fn evict_one(inner: &CacheInner, id: u64) {
    let mut readers = inner.readers.write().unwrap();
    if let Some(reader) = readers.get(&id) {
        // Re-check under the write lock: a read may have revived it.
        if reader.refs.load(Ordering::Acquire) == 0 && reader.idle_for() >= inner.evict_interval {
            readers.remove(&id);
        }
    }
}
