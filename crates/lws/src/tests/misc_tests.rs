use super::helpers::*;
use crate::error::LwsError;
use crate::{dsl, Lws, Options};
use std::sync::Arc;

// -------------------- Store locations --------------------

#[test]
fn bare_path_becomes_an_absolute_file_location() {
    let located = dsl::parse("some/relative/dir").unwrap();
    assert_eq!(located.schema, "file");
    assert!(located.path.is_absolute());
    assert!(located.path.ends_with("some/relative/dir"));
}

#[test]
fn absolute_path_is_kept_verbatim() {
    let located = dsl::parse("/var/data/wal").unwrap();
    assert_eq!(located.schema, "file");
    assert_eq!(located.path, std::path::PathBuf::from("/var/data/wal"));
}

#[test]
fn scheme_and_path_are_split() {
    let located = dsl::parse("file:///var/data/wal").unwrap();
    assert_eq!(located.schema, "file");
    assert_eq!(located.path, std::path::PathBuf::from("/var/data/wal"));

    let located = dsl::parse("S3://bucket/key").unwrap();
    assert_eq!(located.schema, "s3");
}

#[test]
fn empty_location_is_invalid() {
    assert!(matches!(dsl::parse(""), Err(LwsError::InvalidPath)));
}

#[test]
fn double_scheme_is_malformed() {
    assert!(matches!(
        dsl::parse("a://b://c"),
        Err(LwsError::InvalidFormat)
    ));
}

#[test]
fn open_rejects_unsupported_schemes() {
    let result = Lws::open("bogus:///var/data/wal", Options::default());
    assert!(matches!(result, Err(LwsError::UnsupportedScheme)));
}

// -------------------- Codec registry --------------------

#[test]
fn duplicate_registration_is_rejected() {
    let (_dir, log) = open_log(Options::default());
    log.register_coder(Arc::new(StudentCoder)).unwrap();
    let result = log.register_coder(Arc::new(StudentCoder));
    assert!(matches!(result, Err(LwsError::CoderExist)));
}

#[test]
fn reserved_tags_are_rejected() {
    struct RawImpostor;
    impl crate::Coder for RawImpostor {
        fn coder_type(&self) -> i8 {
            0
        }
        fn encode(&self, _: &dyn std::any::Any) -> Result<Vec<u8>, LwsError> {
            Ok(Vec::new())
        }
        fn decode(&self, _: &[u8]) -> Result<Box<dyn std::any::Any>, LwsError> {
            Ok(Box::new(()))
        }
    }

    let (_dir, log) = open_log(Options::default());
    assert!(matches!(
        log.register_coder(Arc::new(RawImpostor)),
        Err(LwsError::CoderSysType)
    ));
    assert!(matches!(
        log.unregister_coder(-1),
        Err(LwsError::CoderSysType)
    ));
}

#[test]
fn unregistering_an_unknown_tag_is_a_no_op() {
    let (_dir, log) = open_log(Options::default());
    log.unregister_coder(5).unwrap();
}

#[test]
fn registry_is_per_log_instance() {
    let (_dir_a, log_a) = open_log(Options::default());
    let (_dir_b, log_b) = open_log(Options::default());
    log_a.register_coder(Arc::new(StudentCoder)).unwrap();

    // The second log never saw the registration.
    let result = log_b.write(1, &student(10));
    assert!(matches!(result, Err(LwsError::CoderNotExist)));
}

// -------------------- Buffer sizing --------------------

#[test]
fn auto_buffer_follows_the_segment_size() {
    let opts = Options::default().with_segment_size(1 << 20);
    assert_eq!(opts.resolved_buffer_size(), 1 << 20);

    let opts = Options::default().with_segment_size(1 << 40);
    assert_eq!(opts.resolved_buffer_size(), 512 << 20);

    let opts = Options::default().with_segment_size(0);
    assert_eq!(opts.resolved_buffer_size(), 128 << 20);
}

#[test]
fn explicit_buffer_sizes_win() {
    let opts = Options::default().with_buffer_size(4096);
    assert_eq!(opts.resolved_buffer_size(), 4096);

    let opts = Options::default().with_buffer_size(0);
    assert_eq!(opts.resolved_buffer_size(), 0);
}

#[test]
fn mmap_with_no_buffer_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let result = Lws::open(
        dir.path().to_str().unwrap(),
        Options::default().with_buffer_size(0),
    );
    assert!(matches!(
        result,
        Err(LwsError::File(logfile::LogFileError::MmapBufferSize))
    ));
}
