//! # lws — an embedded log write system
//!
//! An append-only, segmented, CRC-checksummed record log with random reads
//! by logical entry index, background flush policies, automatic retention,
//! and pluggable value codecs. Meant to be embedded in systems that need
//! durable ordered writes with iterator-style replay (consensus, replication,
//! change capture).
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                      LWS                         │
//! │                                                  │
//! │ write.rs → rotate when tail is full → append     │
//! │              |                                   │
//! │              v                                   │
//! │       SegmentWriter ── flush policies            │
//! │         (segment.rs)   (sync/quota/timed)        │
//! │                                                  │
//! │ read.rs → segment group (binary search by index) │
//! │              |                                   │
//! │              v                                   │
//! │       ReaderCache → SegmentReader per segment    │
//! │        (cache.rs)    (position table + CRC)      │
//! │                                                  │
//! │ purge.rs → watermarks → delete oldest segments   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module            | Purpose                                             |
//! |-------------------|-----------------------------------------------------|
//! | `lib.rs`          | `Lws` struct, discovery, lifecycle, coder registry  |
//! | `segment`         | Segment writer/reader state machines, flush worker  |
//! | `segment_group`   | Sorted segment vector, index resolution             |
//! | `cache`           | Ref-counted reader cache with idle eviction         |
//! | `purge`           | Retention watermarks, purge worker, auto-purge      |
//! | `iterator`        | Entry cursors over the log or a standalone file     |
//! | `coder`           | Type-tagged value codecs                            |
//! | `dsl`             | `scheme://path` store locations                     |
//!
//! ## On-disk format
//!
//! Each segment file `<prefix>NNNNN_<first_index>.<ext>` is a run of frames:
//!
//! ```text
//! | len: u32 BE | crc32: u32 BE | type: i8 | payload: len - 5 bytes |
//! ```
//!
//! The CRC (IEEE polynomial) covers `type || payload`. Recovery truncates
//! the torn tail: on reopen, the writer parks its cursor at the first
//! missing, zero-length, or CRC-failing frame.
//!
//! ## Example
//!
//! ```no_run
//! use lws::{Lws, Options};
//!
//! # fn main() -> Result<(), lws::LwsError> {
//! let log = Lws::open("./wal", Options::default())?;
//! let index = log.write_bytes(b"hello world")?;
//!
//! let mut it = log.new_log_iterator();
//! while it.has_next() {
//!     let data = it.next().get()?;
//!     println!("{}", String::from_utf8_lossy(&data));
//! }
//! # let _ = index;
//! # Ok(())
//! # }
//! ```

mod cache;
mod coder;
mod dsl;
mod error;
mod iterator;
mod options;
mod purge;
mod read;
mod segment;
mod segment_group;
mod write;

pub use coder::{Coder, RAW_CODER_TYPE};
pub use error::LwsError;
pub use iterator::{Element, LogIterator};
pub use logfile::{LogEntry, META_SIZE};
pub use options::{
    FileType, Options, PurgeMode, PurgeOptions, DEFAULT_FLUSH_QUOTA, WF_QUOTA_FLUSH, WF_SYNC_FLUSH,
    WF_SYNC_WRITE, WF_TIMED_FLUSH,
};

use crate::cache::{ReaderCache, EVICT_INTERVAL};
use crate::coder::CoderMap;
use crate::segment::{
    parse_segment_name, segment_file_name, segment_name_regex, Segment, SegmentWriter,
    WriterOptions, INIT_ID, INIT_INDEX,
};
use crate::segment_group::SegmentGroup;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

pub(crate) struct WriteState {
    pub(crate) writer: SegmentWriter,
    pub(crate) current_segment_id: u64,
}

/// Shared state behind the facade; background workers hold their own handle
/// to it.
pub(crate) struct LwsInner {
    pub(crate) path: PathBuf,
    pub(crate) opts: Options,
    pub(crate) write_state: Mutex<WriteState>,
    pub(crate) segments: RwLock<SegmentGroup>,
    pub(crate) first_index: AtomicU64,
    pub(crate) last_index: AtomicU64,
    pub(crate) read_cache: ReaderCache,
    /// Live iterator count; purge waits on it reaching zero.
    pub(crate) read_count: Mutex<u64>,
    pub(crate) read_cond: Condvar,
    /// Single-slot guard: at most one purge per log instance.
    pub(crate) purge_lock: Mutex<()>,
    pub(crate) notice_tx: Mutex<Option<SyncSender<u8>>>,
    pub(crate) coders: CoderMap,
}

/// The log write system facade.
///
/// One `Lws` owns one directory of segment files plus the background workers
/// that flush, evict, and purge. All methods take `&self`; writes are
/// serialized internally.
pub struct Lws {
    pub(crate) inner: Arc<LwsInner>,
    auto_purge: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Lws {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lws")
            .field("path", &self.inner.path)
            .field("first_index", &self.inner.first_index.load(Ordering::Acquire))
            .field("last_index", &self.inner.last_index.load(Ordering::Acquire))
            .field("segments", &self.inner.segments.read().unwrap().len())
            .finish()
    }
}

impl Lws {
    /// Opens (or creates) the log at `location`, either a filesystem path or
    /// a `file://path` store location.
    ///
    /// # Startup
    ///
    /// 1. Create the directory if needed.
    /// 2. Enumerate files matching `<prefix>NNNNN_<first_index>.<ext>`.
    /// 3. Build the segment group; seed a first segment when none exist.
    /// 4. Open the tail segment as the writer, repairing any torn tail.
    /// 5. Start the automatic-purge driver when a retention limit is set.
    pub fn open(location: &str, opts: Options) -> Result<Lws, LwsError> {
        let located = dsl::parse(location)?;
        if !dsl::is_supported(&located.schema) {
            return Err(LwsError::UnsupportedScheme);
        }
        let path = located.path;
        fs::create_dir_all(&path)?;

        let mut group = Self::build_segments(&path, &opts)?;
        let tail = match group.last() {
            Some(tail) => tail.clone(),
            None => Segment {
                id: INIT_ID,
                first_index: INIT_INDEX,
                path: path.join(segment_file_name(
                    &opts.file_prefix,
                    &opts.file_extension,
                    INIT_ID,
                    INIT_INDEX,
                )),
                size: 0,
            },
        };
        if group.is_empty() {
            group.push(tail.clone());
        }
        let first_index = group.first().map(|s| s.first_index).unwrap_or(INIT_INDEX);

        let writer = SegmentWriter::new(
            tail.clone(),
            WriterOptions {
                segment_size: opts.segment_size,
                file_type: opts.file_type,
                write_flag: opts.write_flag,
                flush_quota: opts.flush_quota,
                buffer_size: opts.resolved_buffer_size(),
                mmap_lock: opts.mmap_lock,
            },
        )?;
        let last_index = tail.first_index + writer.entry_count() - 1;

        let auto_purge_wanted = opts.entry_limit_for_purge > 0 || opts.file_limit_for_purge > 0;
        let inner = Arc::new(LwsInner {
            path,
            opts,
            write_state: Mutex::new(WriteState {
                writer,
                current_segment_id: tail.id,
            }),
            segments: RwLock::new(group),
            first_index: AtomicU64::new(first_index),
            last_index: AtomicU64::new(last_index),
            read_cache: ReaderCache::new(EVICT_INTERVAL),
            read_count: Mutex::new(0),
            read_cond: Condvar::new(),
            purge_lock: Mutex::new(()),
            notice_tx: Mutex::new(None),
            coders: CoderMap::default(),
        });

        let mut log = Lws {
            inner,
            auto_purge: None,
        };
        if auto_purge_wanted {
            let (tx, rx) = mpsc::sync_channel::<u8>(1);
            *log.inner.notice_tx.lock().unwrap() = Some(tx);
            let worker_inner = Arc::clone(&log.inner);
            log.auto_purge = Some(
                std::thread::Builder::new()
                    .name("lws-auto-purge".to_string())
                    .spawn(move || purge::clean_worker(worker_inner, rx))?,
            );
        }
        Ok(log)
    }

    fn build_segments(path: &std::path::Path, opts: &Options) -> Result<SegmentGroup, LwsError> {
        let reg = segment_name_regex(&opts.file_prefix, &opts.file_extension)?;
        let mut group = SegmentGroup::default();
        for dirent in fs::read_dir(path)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if !reg.is_match(name) {
                continue;
            }
            let Some((id, first_index)) =
                parse_segment_name(name, &opts.file_prefix, &opts.file_extension)
            else {
                continue;
            };
            let size = dirent.metadata().map(|m| m.len()).unwrap_or(0);
            group.push(Segment {
                id,
                first_index,
                path: dirent.path(),
                size,
            });
        }
        group.sort();
        Ok(group)
    }

    /// Registers a codec under its type tag.
    pub fn register_coder(&self, coder: Arc<dyn Coder>) -> Result<(), LwsError> {
        self.inner.coders.register(coder)
    }

    /// Removes the codec registered under `typ`; unknown tags are a no-op.
    pub fn unregister_coder(&self, typ: i8) -> Result<(), LwsError> {
        self.inner.coders.unregister(typ)
    }

    /// Stops background workers and drops every cached reader. Called
    /// automatically on drop.
    pub fn close(&mut self) {
        // Closing the notice channel stops the auto-purge driver.
        self.inner.notice_tx.lock().unwrap().take();
        if let Some(handle) = self.auto_purge.take() {
            let _ = handle.join();
        }
        self.inner.write_state.lock().unwrap().writer.close();
        self.inner.read_cache.clean();
    }
}

impl Drop for Lws {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests;
