//! Write path: encode, rotate when the tail is full, append, notify.

use crate::coder::RAW_CODER_TYPE;
use crate::error::LwsError;
use crate::options::WF_SYNC_FLUSH;
use crate::purge::{NOTICE_NEW_FILE, NOTICE_NEW_LOG};
use crate::segment::{segment_file_name, segment_name_regex, Segment, SegmentWriter, WriterOptions};
use crate::{Lws, LwsInner, WriteState};
use logfile::FileType;
use std::any::Any;
use std::sync::atomic::Ordering;

impl Lws {
    /// Encodes `obj` through the coder registered for `typ` and appends it.
    ///
    /// A `Vec<u8>` value bypasses the registry and is stored raw, with the
    /// tag forced to [`RAW_CODER_TYPE`].
    pub fn write(&self, typ: i8, obj: &dyn Any) -> Result<(), LwsError> {
        self.write_ret_index(typ, obj).map(|_| ())
    }

    /// Like [`write`](Self::write), returning the logical index assigned to
    /// the entry.
    pub fn write_ret_index(&self, typ: i8, obj: &dyn Any) -> Result<u64, LwsError> {
        let (typ, data) = self.inner.encode_obj(typ, obj)?;
        self.inner.write_payload(typ, &data)
    }

    /// Appends raw bytes (tag [`RAW_CODER_TYPE`]); returns the entry's
    /// logical index.
    pub fn write_bytes(&self, data: &[u8]) -> Result<u64, LwsError> {
        self.inner.write_payload(RAW_CODER_TYPE, data)
    }

    /// Forces buffered entries down to stable storage.
    pub fn flush(&self) -> Result<(), LwsError> {
        self.inner.write_state.lock().unwrap().writer.flush()
    }

    /// Writes one record into a standalone file next to the log.
    ///
    /// The name must not collide with the segment naming rules. The record
    /// is framed through a one-shot unbuffered writer that flushes before
    /// returning; an existing file is appended to after its last valid
    /// record.
    pub fn write_to_file(&self, name: &str, typ: i8, obj: &dyn Any) -> Result<(), LwsError> {
        let inner = &self.inner;
        let reg = segment_name_regex(&inner.opts.file_prefix, &inner.opts.file_extension)?;
        if reg.is_match(name) {
            return Err(LwsError::ReservedFileName);
        }
        let (typ, data) = inner.encode_obj(typ, obj)?;
        let segment = Segment {
            id: 0,
            first_index: 1,
            path: inner.path.join(name),
            size: 0,
        };
        let writer = SegmentWriter::new(
            segment,
            WriterOptions {
                segment_size: 0,
                file_type: FileType::Normal,
                write_flag: WF_SYNC_FLUSH,
                flush_quota: 0,
                buffer_size: 0,
                mmap_lock: false,
            },
        )?;
        writer.append(typ, &data)?;
        Ok(())
    }
}

impl LwsInner {
    pub(crate) fn encode_obj(&self, typ: i8, obj: &dyn Any) -> Result<(i8, Vec<u8>), LwsError> {
        if let Some(bytes) = obj.downcast_ref::<Vec<u8>>() {
            return Ok((RAW_CODER_TYPE, bytes.clone()));
        }
        let coder = self.coders.get(typ)?;
        let data = coder.encode(obj)?;
        Ok((typ, data))
    }

    pub(crate) fn write_payload(&self, typ: i8, data: &[u8]) -> Result<u64, LwsError> {
        let mut notice = 0u8;
        let index = {
            let mut st = self.write_state.lock().unwrap();
            if self.opts.segment_size > 0 && st.writer.size() > self.opts.segment_size {
                self.rollover(&mut st)?;
                notice |= NOTICE_NEW_FILE;
            }
            st.writer.append(typ, data)?;
            notice |= NOTICE_NEW_LOG;
            self.last_index.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.send_notice(notice);
        Ok(index)
    }

    /// Opens the next segment and swaps the writer onto it. The new segment
    /// joins the group before the swap; it is unwound if the swap fails.
    fn rollover(&self, st: &mut WriteState) -> Result<(), LwsError> {
        let id = st.current_segment_id + 1;
        let first_index = self.last_index.load(Ordering::Acquire) + 1;
        let segment = Segment {
            id,
            first_index,
            path: self.path.join(segment_file_name(
                &self.opts.file_prefix,
                &self.opts.file_extension,
                id,
                first_index,
            )),
            size: 0,
        };
        self.segments.write().unwrap().push(segment.clone());
        if let Err(e) = st.writer.replace(segment) {
            self.segments.write().unwrap().pop_if_id(id);
            return Err(e);
        }
        st.current_segment_id = id;
        Ok(())
    }
}
