use super::helpers::*;
use crate::error::LwsError;
use crate::Options;
use std::sync::Arc;

// -------------------- Cursor movement --------------------

#[test]
fn empty_log_has_nothing_to_iterate() {
    let (_dir, log) = open_log(Options::default());
    let it = log.new_log_iterator();
    assert!(!it.has_next());
    assert!(!it.has_previous());
}

#[test]
fn forward_then_backward() {
    let (_dir, log) = open_log(Options::default());
    for i in 0..5u64 {
        log.write_bytes(format!("e{i}").as_bytes()).unwrap();
    }

    let mut it = log.new_log_iterator();
    assert!(it.has_next_n(5));
    assert!(!it.has_next_n(6));

    let mut element = it.next_n(3);
    assert_eq!(element.index(), 3);
    assert_eq!(element.get().unwrap(), b"e2".to_vec());

    assert!(it.has_previous_n(2));
    assert!(!it.has_previous_n(3));
    let mut element = it.previous();
    assert_eq!(element.index(), 2);
    assert_eq!(element.get().unwrap(), b"e1".to_vec());
}

#[test]
fn skip_to_first_rewinds() {
    let (_dir, log) = open_log(Options::default());
    for i in 0..3u64 {
        log.write_bytes(format!("e{i}").as_bytes()).unwrap();
    }
    let mut it = log.new_log_iterator();
    it.next();
    it.next();
    it.skip_to_first();
    assert_eq!(it.next().index(), 1);
}

#[test]
fn reverse_iteration_from_the_end() {
    let (_dir, log) = open_log(Options::default());
    for i in 0..4u64 {
        log.write_bytes(format!("e{i}").as_bytes()).unwrap();
    }
    let mut it = log.new_log_iterator();
    it.skip_to_last();
    assert!(!it.has_next());

    let mut seen = Vec::new();
    while it.has_previous() {
        seen.push(it.previous().get().unwrap());
    }
    assert_eq!(
        seen,
        vec![b"e3".to_vec(), b"e2".to_vec(), b"e1".to_vec(), b"e0".to_vec()]
    );
}

// -------------------- Codec round trip --------------------

#[test]
fn codec_round_trip_in_reverse() {
    let (_dir, log) = open_log(small_segment_opts());
    log.register_coder(Arc::new(StudentCoder)).unwrap();

    for age in 11..=15 {
        log.write(1, &student(age)).unwrap();
    }
    log.flush().unwrap();

    let mut it = log.new_log_iterator();
    it.skip_to_last();
    let mut ages = Vec::new();
    while it.has_previous() {
        let obj = it.previous().get_obj().unwrap();
        let student = obj.downcast::<Student>().unwrap();
        ages.push(student.age);
    }
    assert_eq!(ages, vec![15, 14, 13, 12, 11]);
}

#[test]
fn get_obj_without_coder_fails() {
    let (_dir, log) = open_log(Options::default());
    log.register_coder(Arc::new(StudentCoder)).unwrap();
    log.write(1, &student(20)).unwrap();
    log.unregister_coder(1).unwrap();

    let mut it = log.new_log_iterator();
    let result = it.next().get_obj();
    assert!(matches!(result, Err(LwsError::CoderNotExist)));
}

// -------------------- Bounds --------------------

#[test]
fn reading_past_the_end_is_an_index_error() {
    let (_dir, log) = open_log(Options::default());
    log.write_bytes(b"only").unwrap();

    let mut it = log.new_log_iterator();
    it.skip_to_last();
    // The cursor can move past the end; fetching there fails.
    let mut element = it.next();
    assert!(matches!(element.get(), Err(LwsError::SegmentIndex)));
}

#[test]
fn snapshot_hides_later_writes() {
    let (_dir, log) = open_log(Options::default());
    log.write_bytes(b"before").unwrap();

    let it = log.new_log_iterator();
    log.write_bytes(b"after").unwrap();
    assert!(it.has_next_n(1));
    // The iterator snapshot was taken at last_index == 1.
    assert!(!it.has_next_n(2));

    // A fresh iterator sees both.
    let it2 = log.new_log_iterator();
    assert!(it2.has_next_n(2));
}

#[test]
fn tail_reader_observes_appends_after_caching() {
    let (_dir, log) = open_log(Options::default());
    log.write_bytes(b"first").unwrap();

    // Populate the reader cache for the tail segment.
    let mut it = log.new_log_iterator();
    assert_eq!(it.next().get().unwrap(), b"first".to_vec());
    drop(it);

    log.write_bytes(b"second").unwrap();
    let mut it = log.new_log_iterator();
    it.next();
    assert_eq!(it.next().get().unwrap(), b"second".to_vec());
}

// -------------------- Release --------------------

#[test]
fn release_is_exactly_once() {
    let (_dir, log) = open_log(Options::default());
    log.write_bytes(b"x").unwrap();

    let mut it = log.new_log_iterator();
    assert_eq!(*log.inner.read_count.lock().unwrap(), 1);
    it.release();
    assert_eq!(*log.inner.read_count.lock().unwrap(), 0);
    // Double release and the drop are both no-ops.
    it.release();
    drop(it);
    assert_eq!(*log.inner.read_count.lock().unwrap(), 0);
}

#[test]
fn dropping_an_iterator_releases_it() {
    let (_dir, log) = open_log(Options::default());
    {
        let _it = log.new_log_iterator();
        let _it2 = log.new_log_iterator();
        assert_eq!(*log.inner.read_count.lock().unwrap(), 2);
    }
    assert_eq!(*log.inner.read_count.lock().unwrap(), 0);
}
