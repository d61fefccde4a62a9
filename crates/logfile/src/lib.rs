//! # logfile — record framing for the log write system
//!
//! A [`LogFile`] owns one file and frames records onto it:
//!
//! ```text
//! | len: u32 BE | crc32: u32 BE | type: i8 | payload: len - 5 bytes |
//! ```
//!
//! `len` counts `crc32 + type + payload`, so a framed record occupies
//! `4 + len` bytes on disk. All integers are big-endian. The CRC is carried,
//! not verified — validation is the caller's decision.
//!
//! Depending on configuration the frames flow through a zero-copy mmap
//! buffer ([`fbuffer::ZeroMmap`]), a heap write-back cache
//! ([`fbuffer::FixedBuffer`]), or straight `write_at`/`read_at` calls on the
//! raw file (normal files with buffering disabled).

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use fbuffer::{FbError, FixedBuffer, ZeroMmap};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;
use thiserror::Error;

/// Bytes of the length field.
pub const LEN_SIZE: usize = 4;
/// Bytes of the CRC field.
pub const CRC32_SIZE: usize = 4;
/// Bytes of the type tag.
pub const TYPE_SIZE: usize = 1;
/// Frame overhead per record: length + CRC + type.
pub const META_SIZE: usize = LEN_SIZE + CRC32_SIZE + TYPE_SIZE;

/// How the backing file is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// An ordinary file, buffered through a heap cache when a buffer size is
    /// configured, unbuffered otherwise.
    Normal,
    /// A memory-mapped file; requires a nonzero buffer (window) size.
    Mmap,
}

/// Errors from the framing layer.
#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Buffer(#[from] FbError),

    /// Mmap files need a mapping window; a zero buffer size is meaningless.
    #[error("buffer size must be greater than zero for mmap files")]
    MmapBufferSize,

    /// This file type has no framing support.
    #[error("this file type is not supported")]
    FileTypeNotSupport,

    /// Truncation past the current end of the file.
    #[error("truncation out of range")]
    Truncate,
}

/// One unframed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Value of the on-disk length field: `crc32 + type + payload` bytes.
    pub len: u32,
    pub crc32: u32,
    pub typ: i8,
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Bytes the framed record occupies on disk.
    pub fn framed_size(&self) -> u64 {
        (LEN_SIZE as u32 + self.len) as u64
    }
}

enum Buffer {
    Zero(ZeroMmap),
    Fixed(FixedBuffer),
}

impl Buffer {
    fn next_at(&mut self, offset: u64, n: usize) -> Result<&mut [u8], FbError> {
        match self {
            Buffer::Zero(b) => b.next_at(offset, n),
            Buffer::Fixed(b) => b.next_at(offset, n),
        }
    }

    fn read_at(&mut self, offset: u64, n: usize) -> Result<&[u8], FbError> {
        match self {
            Buffer::Zero(b) => b.read_at(offset, n),
            Buffer::Fixed(b) => b.read_at(offset, n),
        }
    }

    fn write_back(&mut self) -> Result<(), FbError> {
        match self {
            Buffer::Zero(b) => b.write_back(),
            Buffer::Fixed(b) => b.write_back(),
        }
    }

    fn truncate(&mut self, size: u64) -> Result<(), FbError> {
        match self {
            Buffer::Zero(b) => b.truncate(size),
            Buffer::Fixed(b) => b.truncate(size),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Buffer::Zero(b) => b.size(),
            Buffer::Fixed(b) => b.size(),
        }
    }
}

/// A file of framed records with a logical write cursor.
pub struct LogFile {
    file: File,
    buf: Option<Buffer>,
    kind: FileType,
    offset: u64,
}

impl LogFile {
    /// Opens (or creates) the file at `path`.
    ///
    /// For [`FileType::Mmap`] the buffer size is the mapping window and must
    /// be nonzero. For [`FileType::Normal`], `buffer_size == 0` disables
    /// buffering entirely.
    pub fn open<P: AsRef<Path>>(
        path: P,
        kind: FileType,
        buffer_size: usize,
        mmap_lock: bool,
    ) -> Result<Self, LogFileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let buf = match kind {
            FileType::Normal => {
                if buffer_size > 0 {
                    Some(Buffer::Fixed(FixedBuffer::new(&file, buffer_size)?))
                } else {
                    None
                }
            }
            FileType::Mmap => {
                if buffer_size == 0 {
                    return Err(LogFileError::MmapBufferSize);
                }
                Some(Buffer::Zero(ZeroMmap::new(&file, buffer_size, mmap_lock)?))
            }
        };
        Ok(LogFile {
            file,
            buf,
            kind,
            offset: 0,
        })
    }

    /// Frames one record at the write cursor and advances it by the framed
    /// size. Returns the number of bytes framed. The cursor does not move on
    /// failure.
    pub fn write_log(&mut self, typ: i8, data: &[u8], crc32: u32) -> Result<usize, LogFileError> {
        let dl = data.len() + CRC32_SIZE + TYPE_SIZE;
        let total = dl + LEN_SIZE;
        match &mut self.buf {
            Some(buf) => {
                let frame = buf.next_at(self.offset, total)?;
                BigEndian::write_u32(&mut frame[..LEN_SIZE], dl as u32);
                BigEndian::write_u32(&mut frame[LEN_SIZE..LEN_SIZE + CRC32_SIZE], crc32);
                frame[LEN_SIZE + CRC32_SIZE] = typ as u8;
                frame[META_SIZE..].copy_from_slice(data);
            }
            None => {
                let mut frame = Vec::with_capacity(total);
                frame.write_u32::<BigEndian>(dl as u32)?;
                frame.write_u32::<BigEndian>(crc32)?;
                frame.write_i8(typ)?;
                frame.extend_from_slice(data);
                self.file.write_all_at(&frame, self.offset)?;
            }
        }
        self.offset += total as u64;
        Ok(total)
    }

    /// Unframes the record at byte position `pos`.
    ///
    /// Returns `None` at a hole (zero length field), at a frame too short to
    /// carry its own metadata, or when the file ends before the frame does —
    /// the uninitialized or torn tail of a segment.
    pub fn read_log(&mut self, pos: u64) -> Result<Option<LogEntry>, LogFileError> {
        match &mut self.buf {
            Some(buf) => Self::read_buffered(buf, pos),
            None => self.read_unbuffered(pos),
        }
    }

    fn read_buffered(buf: &mut Buffer, pos: u64) -> Result<Option<LogEntry>, LogFileError> {
        let lbz = match buf.read_at(pos, LEN_SIZE) {
            Ok(b) => b,
            Err(FbError::Eof) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if lbz.len() < LEN_SIZE {
            return Ok(None);
        }
        let len = BigEndian::read_u32(lbz) as usize;
        if len < CRC32_SIZE + TYPE_SIZE {
            return Ok(None);
        }
        let data = match buf.read_at(pos + LEN_SIZE as u64, len) {
            Ok(b) => b,
            Err(FbError::Eof) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < len {
            return Ok(None);
        }
        Ok(Some(LogEntry {
            len: len as u32,
            crc32: BigEndian::read_u32(&data[..CRC32_SIZE]),
            typ: data[CRC32_SIZE] as i8,
            data: data[CRC32_SIZE + TYPE_SIZE..].to_vec(),
        }))
    }

    fn read_unbuffered(&mut self, pos: u64) -> Result<Option<LogEntry>, LogFileError> {
        let mut lbz = [0u8; LEN_SIZE];
        if !read_full_at(&self.file, &mut lbz, pos)? {
            return Ok(None);
        }
        let len = BigEndian::read_u32(&lbz) as usize;
        if len < CRC32_SIZE + TYPE_SIZE {
            return Ok(None);
        }
        let mut data = vec![0u8; len];
        if !read_full_at(&self.file, &mut data, pos + LEN_SIZE as u64)? {
            return Ok(None);
        }
        Ok(Some(LogEntry {
            len: len as u32,
            crc32: BigEndian::read_u32(&data[..CRC32_SIZE]),
            typ: data[CRC32_SIZE] as i8,
            data: data[CRC32_SIZE + TYPE_SIZE..].to_vec(),
        }))
    }

    /// Pushes buffered bytes to the file; no durability guarantee.
    pub fn write_back(&mut self) -> Result<(), LogFileError> {
        if let Some(buf) = &mut self.buf {
            buf.write_back()?;
        }
        Ok(())
    }

    /// Makes framed records durable: write back, then `msync` for mmap files
    /// or `fsync` for normal files.
    pub fn sync(&mut self) -> Result<(), LogFileError> {
        match &mut self.buf {
            Some(Buffer::Zero(b)) => b.sync()?,
            Some(Buffer::Fixed(b)) => {
                b.write_back()?;
                self.file.sync_all()?;
            }
            None => self.file.sync_all()?,
        }
        Ok(())
    }

    /// Extends the file to `size` bytes (pre-allocation); no-op when the file
    /// is already at least that large.
    pub fn preallocate(&mut self, size: u64) -> Result<(), LogFileError> {
        if size <= self.size() {
            return Ok(());
        }
        self.file.set_len(size)?;
        if let Some(buf) = &mut self.buf {
            buf.truncate(size)?;
        }
        Ok(())
    }

    /// Truncates the file down to `size` bytes and clamps the write cursor.
    pub fn truncate(&mut self, size: u64) -> Result<(), LogFileError> {
        if size > self.size() {
            return Err(LogFileError::Truncate);
        }
        if let Some(buf) = &mut self.buf {
            buf.truncate(size)?;
        }
        self.file.set_len(size)?;
        if self.offset > size {
            self.offset = size;
        }
        Ok(())
    }

    /// Re-reads the on-disk size and widens the tracked size if the file has
    /// grown behind this handle (another handle appended to it). Never
    /// shrinks the tracked size.
    pub fn refresh_size(&mut self) -> Result<u64, LogFileError> {
        let disk = self.file.metadata()?.len();
        if let Some(buf) = &mut self.buf {
            if disk > buf.size() {
                buf.truncate(disk)?;
            }
        }
        Ok(self.size())
    }

    /// Moves the logical write cursor.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, LogFileError> {
        let offset = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(d) => self.offset as i64 + d,
            SeekFrom::End(d) => self.size() as i64 + d,
        };
        if offset < 0 {
            return Err(LogFileError::Buffer(FbError::Seek));
        }
        self.offset = offset as u64;
        Ok(self.offset)
    }

    /// Current write cursor.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size as tracked by the buffer (including pending extents), or
    /// the on-disk size when unbuffered.
    pub fn size(&self) -> u64 {
        match &self.buf {
            Some(buf) => buf.size(),
            None => self.file.metadata().map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn file_type(&self) -> FileType {
        self.kind
    }
}

/// `read_at` until `buf` is full; `Ok(false)` when the file ends first.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> Result<bool, LogFileError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
