//! Log configuration: write-flag bitset, file type, sizing, retention.

pub use logfile::FileType;

/// Every write also pushes buffered bytes to the file before returning.
/// Orthogonal to flushing (file → disk).
pub const WF_SYNC_WRITE: u8 = 1;
/// A background timer flushes whenever unsynced writes have accumulated.
pub const WF_TIMED_FLUSH: u8 = 2;
/// Flush once the count of writes since the last sync reaches the quota.
pub const WF_QUOTA_FLUSH: u8 = 4;
/// Every write flushes before returning.
pub const WF_SYNC_FLUSH: u8 = 8;

/// Default flush quota: milliseconds for [`WF_TIMED_FLUSH`], record count for
/// [`WF_QUOTA_FLUSH`].
pub const DEFAULT_FLUSH_QUOTA: usize = 1000;

const DEFAULT_SEGMENT_SIZE: u64 = 1 << 26; // 64 MiB
const AUTO_BUFFER_MAX: u64 = 512 << 20;
const AUTO_BUFFER_FALLBACK: u64 = 128 << 20;

/// Configuration for one log instance.
///
/// Built with struct-update or the `with_*` helpers:
///
/// ```
/// use lws::{Options, WF_SYNC_FLUSH};
///
/// let opts = Options::default()
///     .with_segment_size(1 << 20)
///     .with_file_prefix("app_")
///     .with_write_flag(WF_SYNC_FLUSH, 0);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Pre-allocated segment size and rotation threshold; `0` disables
    /// rotation.
    pub segment_size: u64,
    /// How segment files are accessed.
    pub file_type: FileType,
    /// Bitset of `WF_*` flags.
    pub write_flag: u8,
    /// Threshold for [`WF_TIMED_FLUSH`] (ms) and [`WF_QUOTA_FLUSH`]
    /// (record count).
    pub flush_quota: usize,
    /// `-1` auto-sizes from the segment size, `0` disables buffering (normal
    /// files only), `> 0` is exact.
    pub buffer_size: i64,
    /// `mlock` the mapped window of mmap segments.
    pub mmap_lock: bool,
    pub file_prefix: String,
    pub file_extension: String,
    /// Automatic purge once more than this many segment files exist;
    /// `0` disables.
    pub file_limit_for_purge: usize,
    /// Automatic purge once more than this many entries exist; `0` disables.
    pub entry_limit_for_purge: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            segment_size: DEFAULT_SEGMENT_SIZE,
            file_type: FileType::Mmap,
            write_flag: WF_TIMED_FLUSH,
            flush_quota: DEFAULT_FLUSH_QUOTA,
            buffer_size: -1,
            mmap_lock: false,
            file_prefix: String::new(),
            file_extension: "wal".to_string(),
            file_limit_for_purge: 0,
            entry_limit_for_purge: 0,
        }
    }
}

impl Options {
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_file_type(mut self, ft: FileType) -> Self {
        self.file_type = ft;
        self
    }

    pub fn with_write_flag(mut self, flag: u8, quota: usize) -> Self {
        self.write_flag = flag;
        self.flush_quota = quota;
        self
    }

    pub fn with_buffer_size(mut self, size: i64) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_mmap_lock(mut self) -> Self {
        self.mmap_lock = true;
        self
    }

    pub fn with_file_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn with_file_extension<S: Into<String>>(mut self, ext: S) -> Self {
        self.file_extension = ext.into();
        self
    }

    pub fn with_file_limit_for_purge(mut self, limit: usize) -> Self {
        self.file_limit_for_purge = limit;
        self
    }

    pub fn with_entry_limit_for_purge(mut self, limit: u64) -> Self {
        self.entry_limit_for_purge = limit;
        self
    }

    /// The buffer size segments actually run with.
    pub(crate) fn resolved_buffer_size(&self) -> usize {
        match self.buffer_size {
            n if n < 0 => {
                if self.segment_size > 0 {
                    self.segment_size.min(AUTO_BUFFER_MAX) as usize
                } else {
                    AUTO_BUFFER_FALLBACK as usize
                }
            }
            0 => 0,
            n => n as usize,
        }
    }
}

/// Whether a purge runs on the caller's thread or a detached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurgeMode {
    #[default]
    Sync,
    Async,
}

/// Retention limits for one purge run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeOptions {
    pub mode: PurgeMode,
    /// Keep at most this many segment files; `0` disables the file watermark.
    pub keep_files: usize,
    /// Keep at least this many newest entries; soft because whole segments
    /// are the cleanup unit. `0` disables the entry watermark.
    pub keep_soft_entries: u64,
}

impl PurgeOptions {
    pub fn with_keep_files(mut self, n: usize) -> Self {
        self.keep_files = n;
        self
    }

    pub fn with_keep_soft_entries(mut self, n: u64) -> Self {
        self.keep_soft_entries = n;
        self
    }

    pub fn with_async(mut self) -> Self {
        self.mode = PurgeMode::Async;
        self
    }
}
