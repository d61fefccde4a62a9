use super::helpers::*;
use crate::error::LwsError;
use crate::{FileType, Options, WF_QUOTA_FLUSH, WF_SYNC_WRITE};
use std::os::unix::fs::FileExt;

// -------------------- Dense indexing --------------------

#[test]
fn fresh_log_starts_before_the_first_index() {
    let (_dir, log) = open_log(Options::default());
    assert_eq!(log.first_index(), 1);
    assert_eq!(log.last_index(), 0);
}

#[test]
fn writes_assign_dense_indexes() {
    let (_dir, log) = open_log(Options::default());
    for i in 0..10u64 {
        let idx = log.write_bytes(format!("entry-{i}").as_bytes()).unwrap();
        assert_eq!(idx, i + 1);
    }
    assert_eq!(log.last_index(), 10);

    let mut it = log.new_log_iterator();
    for i in 0..10u64 {
        assert!(it.has_next());
        let mut element = it.next();
        assert_eq!(element.index(), i + 1);
        assert_eq!(element.get().unwrap(), format!("entry-{i}").into_bytes());
    }
    assert!(!it.has_next());
}

#[test]
fn raw_bytes_round_trip() {
    let (_dir, log) = open_log(Options::default());
    let payload = vec![0x00u8, 0xFF, 0x80, 0x7F, 0x01];
    log.write_bytes(&payload).unwrap();

    let mut it = log.new_log_iterator();
    assert_eq!(it.next().get().unwrap(), payload);
}

#[test]
fn empty_payload_round_trip() {
    let (_dir, log) = open_log(Options::default());
    log.write_bytes(b"").unwrap();
    let mut it = log.new_log_iterator();
    assert!(it.has_next());
    assert_eq!(it.next().get().unwrap(), Vec::<u8>::new());
}

#[test]
fn many_records_round_trip() {
    let opts = Options::default().with_segment_size(1 << 14);
    let (_dir, log) = open_log(opts);
    let n = 5_000u64;
    for i in 0..n {
        log.write_bytes(format!("value-{i}").as_bytes()).unwrap();
    }
    assert_eq!(log.last_index(), n);

    let mut it = log.new_log_iterator();
    let mut i = 0u64;
    while it.has_next() {
        assert_eq!(it.next().get().unwrap(), format!("value-{i}").into_bytes());
        i += 1;
    }
    assert_eq!(i, n);
}

// -------------------- Rollover --------------------

#[test]
fn rollover_at_segment_size() {
    // 20-byte frames against a 30-byte segment: two fit before rotation.
    let (dir, log) = open_log(small_segment_opts());
    for _ in 0..3 {
        log.write_bytes(b"hello world").unwrap();
    }
    drop(log);

    let files = segment_files(dir.path(), "test_");
    assert_eq!(files, vec!["test_00001_1.wal", "test_00002_3.wal"]);

    let log = reopen_log(&dir, small_segment_opts());
    assert_eq!(log.first_index(), 1);
    assert_eq!(log.last_index(), 3);
    let mut it = log.new_log_iterator();
    let mut seen = Vec::new();
    while it.has_next() {
        seen.push(it.next().get().unwrap());
    }
    assert_eq!(seen, vec![b"hello world".to_vec(); 3]);
}

#[test]
fn rotation_truncates_the_sealed_segment() {
    let (dir, log) = open_log(small_segment_opts());
    for _ in 0..3 {
        log.write_bytes(b"hello world").unwrap();
    }
    drop(log);

    // Two 20-byte frames, pre-allocated tail cut off at rotation.
    let sealed = dir.path().join("test_00001_1.wal");
    assert_eq!(std::fs::metadata(&sealed).unwrap().len(), 40);
}

#[test]
fn zero_segment_size_disables_rotation() {
    let opts = Options::default().with_segment_size(0);
    let (dir, log) = open_log(opts.clone());
    for _ in 0..50 {
        log.write_bytes(b"hello world").unwrap();
    }
    drop(log);
    assert_eq!(segment_files(dir.path(), "").len(), 1);

    let log = reopen_log(&dir, opts);
    assert_eq!(log.last_index(), 50);
}

// -------------------- Reopen --------------------

#[test]
fn reopen_continues_the_index_space() {
    let opts = Options::default().with_segment_size(1 << 16);
    let (dir, log) = open_log(opts.clone());
    for i in 0..5u64 {
        log.write_bytes(format!("first-{i}").as_bytes()).unwrap();
    }
    drop(log);

    let log = reopen_log(&dir, opts);
    assert_eq!(log.last_index(), 5);
    for i in 0..5u64 {
        assert_eq!(log.write_bytes(format!("second-{i}").as_bytes()).unwrap(), 6 + i);
    }

    let mut it = log.new_log_iterator();
    it.skip_to_last();
    let mut element = it.previous();
    assert_eq!(element.get().unwrap(), b"second-4".to_vec());
}

// -------------------- Torn tail --------------------

#[test]
fn torn_tail_is_truncated_on_reopen() {
    let opts = Options::default()
        .with_segment_size(1 << 20)
        .with_file_prefix("t_");
    let (dir, log) = open_log(opts.clone());
    // 10-byte payloads: every frame is exactly 19 bytes.
    for i in 0..100u64 {
        log.write_bytes(format!("{i:010}").as_bytes()).unwrap();
    }
    assert_eq!(log.last_index(), 100);
    drop(log);

    // Zero the last 10 bytes of the written region: the tail of record #100.
    let path = dir.path().join("t_00001_1.wal");
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.write_all_at(&[0u8; 10], 100 * 19 - 10).unwrap();
    drop(file);

    let log = reopen_log(&dir, opts);
    assert_eq!(log.last_index(), 99);

    // The write cursor sits at the broken record's start: the next write
    // takes its index and its bytes.
    let idx = log.write_bytes(b"replacement").unwrap();
    assert_eq!(idx, 100);
    let mut it = log.new_log_iterator();
    it.skip_to_last();
    assert_eq!(it.previous().get().unwrap(), b"replacement".to_vec());
}

// -------------------- Write flags --------------------

#[test]
fn sync_write_pushes_bytes_to_the_file() {
    let opts = Options::default()
        .with_segment_size(0)
        .with_file_type(FileType::Normal)
        .with_buffer_size(1 << 16)
        .with_write_flag(WF_SYNC_WRITE, 0);
    let (dir, log) = open_log(opts);
    log.write_bytes(b"durable-ish").unwrap();

    // No flush has run, yet write-back made the frame visible in the file.
    let path = dir.path().join("00001_1.wal");
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &[0, 0, 0, 16]); // len = 5 + 11
}

#[test]
fn quota_flush_writes_back_at_the_threshold() {
    let opts = Options::default()
        .with_segment_size(0)
        .with_file_type(FileType::Normal)
        .with_buffer_size(1 << 16)
        .with_write_flag(WF_QUOTA_FLUSH, 5);
    let (dir, log) = open_log(opts);
    let path = dir.path().join("00001_1.wal");

    for _ in 0..4 {
        log.write_bytes(b"hello world").unwrap();
    }
    // Under quota: everything still sits in the heap buffer.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

    log.write_bytes(b"hello world").unwrap();
    // Fifth write crossed the quota: all five frames hit the file.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 5 * 20);
}

// -------------------- Returned indexes & encoding --------------------

#[test]
fn write_ret_index_uses_the_registry() {
    let (_dir, log) = open_log(Options::default());
    log.register_coder(std::sync::Arc::new(StudentCoder)).unwrap();
    let idx = log.write_ret_index(1, &student(10)).unwrap();
    assert_eq!(idx, 1);
    let idx = log.write_ret_index(1, &student(11)).unwrap();
    assert_eq!(idx, 2);
}

#[test]
fn write_without_registered_coder_fails() {
    let (_dir, log) = open_log(Options::default());
    let result = log.write(1, &student(10));
    assert!(matches!(result, Err(LwsError::CoderNotExist)));
    // The failed write consumed no index.
    assert_eq!(log.last_index(), 0);
}

#[test]
fn vec_payload_bypasses_the_registry() {
    let (_dir, log) = open_log(Options::default());
    // Type tag 9 has no coder, but a Vec<u8> is stored raw regardless.
    log.write(9, &b"raw bytes".to_vec()).unwrap();
    let mut it = log.new_log_iterator();
    let obj = it.next().get_obj().unwrap();
    assert_eq!(*obj.downcast::<Vec<u8>>().unwrap(), b"raw bytes".to_vec());
}

// -------------------- Side files --------------------

#[test]
fn write_to_file_and_read_back() {
    let (dir, log) = open_log(small_segment_opts());
    let payload = b"hello world@##########@@".to_vec();
    log.write_to_file("extra.dat", 0, &payload).unwrap();

    // The side file is not a segment.
    assert!(dir.path().join("extra.dat").exists());
    assert!(segment_files(dir.path(), "test_")
        .iter()
        .all(|n| n != "extra.dat"));

    let mut it = log.read_from_file("extra.dat").unwrap();
    assert!(it.has_next());
    assert_eq!(it.next().get().unwrap(), payload);
    assert!(!it.has_next());
}

#[test]
fn write_to_file_rejects_segment_names() {
    let (_dir, log) = open_log(small_segment_opts());
    let result = log.write_to_file("test_00009_1.wal", 0, &b"x".to_vec());
    assert!(matches!(result, Err(LwsError::ReservedFileName)));
}

#[test]
fn read_from_missing_file_fails() {
    let (_dir, log) = open_log(small_segment_opts());
    assert!(matches!(
        log.read_from_file("nope.dat"),
        Err(LwsError::Io(_))
    ));
}
