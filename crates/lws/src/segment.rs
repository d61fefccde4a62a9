//! Segment state machines: the writer (append with in-place framing, torn
//! tail repair, rotation, flush policies) and the reader (scan to a position
//! table, random read by logical index).

use crate::error::LwsError;
use crate::options::{DEFAULT_FLUSH_QUOTA, WF_QUOTA_FLUSH, WF_SYNC_FLUSH, WF_SYNC_WRITE, WF_TIMED_FLUSH};
use log::warn;
use logfile::{FileType, LogEntry, LogFile};
use regex::Regex;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Id of the first segment of a fresh log.
pub const INIT_ID: u64 = 1;
/// Logical index of the first entry of a fresh log.
pub const INIT_INDEX: u64 = 1;

/// One on-disk file of the log: a contiguous run of the logical index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Strictly increasing file number.
    pub id: u64,
    /// Logical index of the segment's first entry.
    pub first_index: u64,
    pub path: PathBuf,
    /// On-disk size observed at discovery; informational.
    pub size: u64,
}

/// Builds the segment file name `<prefix>NNNNN_<first_index>.<ext>`.
pub(crate) fn segment_file_name(prefix: &str, ext: &str, id: u64, first_index: u64) -> String {
    format!("{prefix}{id:05}_{first_index}.{ext}")
}

/// Compiles the name grammar the log's segment files must match.
pub(crate) fn segment_name_regex(prefix: &str, ext: &str) -> Result<Regex, LwsError> {
    Regex::new(&format!(
        r"^{}\d{{5}}_\d+\.{}$",
        regex::escape(prefix),
        regex::escape(ext)
    ))
    .map_err(|_| LwsError::InvalidFormat)
}

/// Parses `(id, first_index)` out of a segment file name; `None` when the
/// name does not follow the grammar.
pub(crate) fn parse_segment_name(name: &str, prefix: &str, ext: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix(prefix)?;
    let rest = rest.strip_suffix(&format!(".{ext}"))?;
    let (id, first_index) = rest.split_once('_')?;
    if id.len() != 5 {
        return None;
    }
    Some((id.parse().ok()?, first_index.parse().ok()?))
}

/// CRC-32 (IEEE) over `type || payload`.
pub(crate) fn checksum(typ: i8, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[typ as u8]);
    hasher.update(data);
    hasher.finalize()
}

fn entry_is_valid(entry: &LogEntry) -> bool {
    entry.len != 0 && checksum(entry.typ, &entry.data) == entry.crc32
}

/// How a [`SegmentWriter`] opens and flushes its files.
#[derive(Debug, Clone)]
pub(crate) struct WriterOptions {
    /// Pre-allocation and rotation threshold; `0` disables both.
    pub segment_size: u64,
    pub file_type: FileType,
    /// Bitset of `WF_*` flags.
    pub write_flag: u8,
    /// Timer period (ms) or record quota, per the flags.
    pub flush_quota: usize,
    pub buffer_size: usize,
    pub mmap_lock: bool,
}

struct WriterState {
    file: LogFile,
    segment: Segment,
    count: u64,
}

struct WriterShared {
    state: Mutex<WriterState>,
    /// Writes since the last successful flush.
    acc: AtomicUsize,
}

fn flush_shared(shared: &WriterShared) -> Result<(), LwsError> {
    let mut st = shared.state.lock().unwrap();
    st.file.sync()?;
    shared.acc.store(0, Ordering::Release);
    Ok(())
}

/// Append side of one segment.
///
/// Opening scans the file from offset zero and parks the write cursor at the
/// first missing, zero-length, or CRC-failing frame, discarding whatever
/// follows it. Appends are serialized by an internal lock so a timed flush
/// colliding with an in-progress append stays safe; on failure the cursor is
/// rewound so a retry cannot interleave frames.
pub(crate) struct SegmentWriter {
    shared: Arc<WriterShared>,
    opts: WriterOptions,
    close_tx: Option<Sender<()>>,
    flush_handle: Option<JoinHandle<()>>,
}

impl SegmentWriter {
    pub fn new(segment: Segment, opts: WriterOptions) -> Result<Self, LwsError> {
        let (file, count) = Self::open_segment(&segment, &opts)?;
        let shared = Arc::new(WriterShared {
            state: Mutex::new(WriterState {
                file,
                segment,
                count,
            }),
            acc: AtomicUsize::new(0),
        });

        let mut writer = SegmentWriter {
            shared,
            opts,
            close_tx: None,
            flush_handle: None,
        };
        writer.start_flush_worker()?;
        Ok(writer)
    }

    /// Opens (or creates) the segment file, pre-allocates it, and scans for
    /// the write cursor. Returns the file with the cursor positioned and the
    /// count of valid records before it.
    fn open_segment(segment: &Segment, opts: &WriterOptions) -> Result<(LogFile, u64), LwsError> {
        let mut file = LogFile::open(
            &segment.path,
            opts.file_type,
            opts.buffer_size,
            opts.mmap_lock,
        )?;
        if opts.segment_size > 0 {
            file.preallocate(opts.segment_size)?;
        }

        let mut pos = 0u64;
        let mut count = 0u64;
        while let Some(entry) = file.read_log(pos)? {
            if !entry_is_valid(&entry) {
                break;
            }
            count += 1;
            pos += entry.framed_size();
        }
        file.seek(SeekFrom::Start(pos))?;
        Ok((file, count))
    }

    /// The timer only runs for a plain timed-flush configuration; sync-flush
    /// and quota-flush make it redundant.
    fn start_flush_worker(&mut self) -> Result<(), LwsError> {
        if self.opts.write_flag & !WF_SYNC_WRITE != WF_TIMED_FLUSH {
            return Ok(());
        }
        let quota = if self.opts.flush_quota == 0 {
            DEFAULT_FLUSH_QUOTA
        } else {
            self.opts.flush_quota
        };
        let interval = Duration::from_millis(quota as u64);
        let shared = Arc::clone(&self.shared);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("lws-timed-flush".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if shared.acc.load(Ordering::Acquire) == 0 {
                            continue;
                        }
                        if let Err(e) = flush_shared(&shared) {
                            warn!("timed flush failed: {e}");
                        }
                    }
                    // Message or disconnect: the writer is closing.
                    _ => return,
                }
            })?;
        self.close_tx = Some(tx);
        self.flush_handle = Some(handle);
        Ok(())
    }

    /// Frames one record at the write cursor. On any failure the cursor and
    /// entry count are restored, so a client retry cannot duplicate or
    /// interleave framing.
    pub fn append(&self, typ: i8, data: &[u8]) -> Result<usize, LwsError> {
        let (before, written) = {
            let mut st = self.shared.state.lock().unwrap();
            let before = st.file.offset();
            let crc = checksum(typ, data);
            let written = st.file.write_log(typ, data, crc)?;
            st.count += 1;
            if self.opts.write_flag & WF_SYNC_WRITE != 0 {
                if let Err(e) = st.file.write_back() {
                    let _ = st.file.seek(SeekFrom::Start(before));
                    st.count -= 1;
                    return Err(e.into());
                }
            }
            (before, written)
        };
        if let Err(e) = self.try_flush() {
            // The frame is in place but the caller will see an error and
            // retry; take the frame back so the retry cannot duplicate it.
            let mut st = self.shared.state.lock().unwrap();
            if st.file.offset() == before + written as u64 {
                let _ = st.file.seek(SeekFrom::Start(before));
                st.count = st.count.saturating_sub(1);
            }
            return Err(e);
        }
        Ok(written)
    }

    fn try_flush(&self) -> Result<(), LwsError> {
        if self.opts.write_flag & WF_SYNC_FLUSH != 0 {
            return self.flush();
        }
        let acc = self.shared.acc.fetch_add(1, Ordering::AcqRel) + 1;
        if self.opts.write_flag & WF_QUOTA_FLUSH != 0 && acc >= self.opts.flush_quota {
            return self.flush();
        }
        Ok(())
    }

    /// Write back and make durable everything framed so far; clears the
    /// flush accumulator.
    pub fn flush(&self) -> Result<(), LwsError> {
        flush_shared(&self.shared)
    }

    /// Rotates to `segment`: flushes the current file, truncates its
    /// pre-allocated tail to the write cursor, then swaps in the new file.
    /// Replacing with the segment already current is a no-op.
    pub fn replace(&self, segment: Segment) -> Result<(), LwsError> {
        let mut st = self.shared.state.lock().unwrap();
        if st.segment.id == segment.id {
            return Ok(());
        }
        st.file.sync()?;
        let cursor = st.file.offset();
        st.file.truncate(cursor)?;

        let (file, count) = Self::open_segment(&segment, &self.opts)?;
        st.file = file;
        st.segment = segment;
        st.count = count;
        self.shared.acc.store(0, Ordering::Release);
        Ok(())
    }

    /// Logical size: the write cursor, not the pre-allocated file size.
    pub fn size(&self) -> u64 {
        self.shared.state.lock().unwrap().file.offset()
    }

    /// Count of valid records in the current segment.
    pub fn entry_count(&self) -> u64 {
        self.shared.state.lock().unwrap().count
    }

    pub fn segment_id(&self) -> u64 {
        self.shared.state.lock().unwrap().segment.id
    }

    /// Stops the flush worker. The file closes when the writer drops.
    pub fn close(&mut self) {
        self.close_tx.take();
        if let Some(handle) = self.flush_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read side of one segment.
///
/// Opening scans the file like the writer does, but records the byte
/// position of every CRC-valid record so entries can be fetched by logical
/// index. The scan stops at the first invalid frame; a torn tail is simply
/// absent from the table. A read past the table re-scans from where the
/// last scan stopped, so a cached reader of the tail segment observes
/// entries appended after it was opened.
pub(crate) struct SegmentReader {
    segment: Segment,
    inner: Mutex<ReaderInner>,
}

struct ReaderInner {
    file: LogFile,
    /// Byte position of each valid record, by slot.
    pos: Vec<u64>,
    /// Where the scan stopped: the write cursor of a live tail, or the torn
    /// point of a damaged one.
    scanned_to: u64,
}

impl ReaderInner {
    fn scan_more(&mut self) -> Result<(), LwsError> {
        self.file.refresh_size()?;
        let mut p = self.scanned_to;
        while let Some(entry) = self.file.read_log(p)? {
            if !entry_is_valid(&entry) {
                break;
            }
            self.pos.push(p);
            p += entry.framed_size();
        }
        self.scanned_to = p;
        Ok(())
    }
}

impl SegmentReader {
    pub fn open(
        segment: Segment,
        file_type: FileType,
        buffer_size: usize,
        mmap_lock: bool,
    ) -> Result<Self, LwsError> {
        // A sealed segment never outgrows its discovered size; don't map a
        // window larger than the file.
        let buffer_size = if buffer_size > 0 && segment.size > 0 {
            buffer_size.min(segment.size as usize)
        } else {
            buffer_size
        };
        let file = LogFile::open(&segment.path, file_type, buffer_size, mmap_lock)?;
        let mut inner = ReaderInner {
            file,
            pos: Vec::new(),
            scanned_to: 0,
        };
        inner.scan_more()?;
        Ok(SegmentReader {
            segment,
            inner: Mutex::new(inner),
        })
    }

    /// Fetches the record with logical index `index` through the position
    /// table.
    pub fn read_log_by_index(&self, index: u64) -> Result<LogEntry, LwsError> {
        let slot = index
            .checked_sub(self.segment.first_index)
            .ok_or(LwsError::SegmentIndex)? as usize;
        let mut inner = self.inner.lock().unwrap();
        if slot >= inner.pos.len() {
            inner.scan_more()?;
        }
        let pos = *inner.pos.get(slot).ok_or(LwsError::SegmentIndex)?;
        inner.file.read_log(pos)?.ok_or(LwsError::SegmentIndex)
    }

    pub fn first_index(&self) -> u64 {
        self.segment.first_index
    }

    /// Index of the last readable entry; `first_index - 1` when the segment
    /// is empty.
    pub fn last_index(&self) -> u64 {
        self.segment.first_index + self.inner.lock().unwrap().pos.len() as u64 - 1
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().pos.len()
    }
}
