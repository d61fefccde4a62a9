//! Retention: the purge worker and the automatic purge driver.
//!
//! Whole segments are the cleanup unit. A purge finds the boundary segment —
//! the first survivor — closes and deletes everything before it, then
//! advances the log's first index. Only one purge runs at a time, and none
//! while live iterators exist.

use crate::error::LwsError;
use crate::options::{PurgeMode, PurgeOptions};
use crate::segment::Segment;
use crate::segment_group::SegmentGroup;
use crate::{Lws, LwsInner};
use log::warn;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

/// Write-notice bit: a segment rotation happened.
pub(crate) const NOTICE_NEW_FILE: u8 = 1;
/// Write-notice bit: an entry was appended.
pub(crate) const NOTICE_NEW_LOG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PurgeKind {
    None,
    /// The entry watermark fired; it takes priority over the file watermark.
    Entries,
    Files,
}

impl Lws {
    /// Enforces the retention limits in `opts`, deleting whole segments from
    /// the front of the log.
    ///
    /// Synchronous mode runs on the caller's thread and reports the outcome.
    /// Asynchronous mode detaches a worker and returns immediately; the
    /// worker logs failures.
    ///
    /// # Errors
    ///
    /// [`LwsError::PurgeNotReached`] when no watermark is exceeded,
    /// [`LwsError::PurgeWorkExisted`] when another purge is running.
    pub fn purge(&self, opts: PurgeOptions) -> Result<(), LwsError> {
        match opts.mode {
            PurgeMode::Sync => self.inner.purge(opts.keep_files, opts.keep_soft_entries),
            PurgeMode::Async => {
                let inner = Arc::clone(&self.inner);
                thread::Builder::new()
                    .name("lws-purge".to_string())
                    .spawn(move || {
                        match inner.purge(opts.keep_files, opts.keep_soft_entries) {
                            Ok(()) | Err(LwsError::PurgeNotReached) => {}
                            Err(e) => warn!("async purge failed: {e}"),
                        }
                    })?;
                Ok(())
            }
        }
    }
}

impl LwsInner {
    /// Entries currently readable: `last_index - first_index + 1`.
    pub(crate) fn entry_count(&self) -> u64 {
        let first = self.first_index.load(Ordering::Acquire);
        let last = self.last_index.load(Ordering::Acquire);
        last + 1 - first
    }

    fn purge_kind(&self, keep_files: usize, keep_soft_entries: u64) -> PurgeKind {
        if keep_soft_entries > 0 && self.entry_count() > keep_soft_entries {
            return PurgeKind::Entries;
        }
        if keep_files > 0 && self.segments.read().unwrap().len() > keep_files {
            return PurgeKind::Files;
        }
        PurgeKind::None
    }

    pub(crate) fn purge(&self, keep_files: usize, keep_soft_entries: u64) -> Result<(), LwsError> {
        // Probe before contending for the guard.
        let kind = self.purge_kind(keep_files, keep_soft_entries);
        if kind == PurgeKind::None {
            return Err(LwsError::PurgeNotReached);
        }
        let _guard = self
            .purge_lock
            .try_lock()
            .map_err(|_| LwsError::PurgeWorkExisted)?;

        // Hold the reader gate for the whole removal so no iterator observes
        // a half-deleted prefix.
        let mut count = self.read_count.lock().unwrap();
        while *count > 0 {
            count = self.read_cond.wait(count).unwrap();
        }

        let (boundary, victims) = {
            let group = self.segments.read().unwrap();
            match kind {
                PurgeKind::Entries => boundary_over_entries(
                    &group,
                    self.last_index.load(Ordering::Acquire),
                    keep_soft_entries,
                ),
                PurgeKind::Files => boundary_over_files(&group, keep_files),
                PurgeKind::None => (None, Vec::new()),
            }
        };
        let Some(boundary) = boundary else {
            return Ok(());
        };

        for victim in &victims {
            self.read_cache.delete(victim.id);
            if let Err(e) = fs::remove_file(&victim.path) {
                warn!("purge: failed to remove {}: {e}", victim.path.display());
            }
        }
        self.first_index
            .store(boundary.first_index, Ordering::Release);
        self.segments.write().unwrap().split_off_prefix(victims.len());
        Ok(())
    }

    pub(crate) fn send_notice(&self, bits: u8) {
        if let Some(tx) = &*self.notice_tx.lock().unwrap() {
            // Best effort: a slow consumer never stalls the write path.
            let _ = tx.try_send(bits);
        }
    }
}

/// Entry watermark: survivors are the smallest suffix of segments containing
/// every entry with index `> last_index - keep_soft_entries`.
fn boundary_over_entries(
    group: &SegmentGroup,
    last_index: u64,
    keep_soft_entries: u64,
) -> (Option<Segment>, Vec<Segment>) {
    let from = last_index + 1 - keep_soft_entries.min(last_index + 1);
    let boundary_at = match group.iter().position(|s| s.first_index > from) {
        Some(at) if at > 0 => at - 1,
        // Either every segment already starts past the keep range, or the
        // range lives entirely in the tail; nothing can be dropped.
        _ => return (None, Vec::new()),
    };
    let victims = group.iter().take(boundary_at).cloned().collect();
    (Some(group.at(boundary_at).clone()), victims)
}

/// File watermark: drop the oldest `len - keep_files` segments.
fn boundary_over_files(group: &SegmentGroup, keep_files: usize) -> (Option<Segment>, Vec<Segment>) {
    let drop_count = group.len().saturating_sub(keep_files);
    if drop_count == 0 {
        return (None, Vec::new());
    }
    let victims = group.iter().take(drop_count).cloned().collect();
    (Some(group.at(drop_count).clone()), victims)
}

/// The automatic purge driver: counts write notices and purges when a
/// configured limit is exceeded. Exits when the notice channel closes.
pub(crate) fn clean_worker(inner: Arc<LwsInner>, rx: Receiver<u8>) {
    let mut file_count = inner.segments.read().unwrap().len();
    let mut entry_count = inner.entry_count();
    let file_limit = inner.opts.file_limit_for_purge;
    let entry_limit = inner.opts.entry_limit_for_purge;

    while let Ok(bits) = rx.recv() {
        if bits & NOTICE_NEW_LOG != 0 {
            entry_count += 1;
        }
        if bits & NOTICE_NEW_FILE != 0 {
            file_count += 1;
        }
        let over_entries = entry_limit > 0 && entry_count > entry_limit;
        let over_files = file_limit > 0 && file_count > file_limit;
        if over_entries || over_files {
            match inner.purge(file_limit, entry_limit) {
                Ok(()) | Err(LwsError::PurgeNotReached) | Err(LwsError::PurgeWorkExisted) => {}
                Err(e) => warn!("automatic purge failed: {e}"),
            }
            file_count = inner.segments.read().unwrap().len();
            entry_count = inner.entry_count();
        }
    }
}
