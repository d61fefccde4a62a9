use crate::error::LwsError;
use crate::{Coder, Lws, Options};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::Path;
use tempfile::TempDir;

/// Opens a log in a fresh temp directory.
pub fn open_log(opts: Options) -> (TempDir, Lws) {
    let dir = tempfile::tempdir().unwrap();
    let log = Lws::open(dir.path().to_str().unwrap(), opts).unwrap();
    (dir, log)
}

/// Reopens the log in `dir` with the same options.
pub fn reopen_log(dir: &TempDir, opts: Options) -> Lws {
    Lws::open(dir.path().to_str().unwrap(), opts).unwrap()
}

/// Small segments so a handful of writes spans several files.
pub fn small_segment_opts() -> Options {
    Options::default()
        .with_segment_size(30)
        .with_file_prefix("test_")
}

/// Names of files in `dir` matching the log's segment grammar, sorted.
pub fn segment_files(dir: &Path, prefix: &str) -> Vec<String> {
    let reg = crate::segment::segment_name_regex(prefix, "wal").unwrap();
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|n| reg.is_match(n))
        .collect();
    names.sort();
    names
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub age: i32,
    pub name: String,
    pub grade: i32,
    pub class: i32,
}

pub fn student(age: i32) -> Student {
    Student {
        age,
        name: "lucy".to_string(),
        grade: 3,
        class: 1,
    }
}

/// JSON codec for [`Student`] under type tag 1.
pub struct StudentCoder;

impl Coder for StudentCoder {
    fn coder_type(&self) -> i8 {
        1
    }

    fn encode(&self, obj: &dyn Any) -> Result<Vec<u8>, LwsError> {
        let student = obj
            .downcast_ref::<Student>()
            .ok_or_else(|| LwsError::Coder("not a Student".into()))?;
        serde_json::to_vec(student).map_err(|e| LwsError::Coder(Box::new(e)))
    }

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Any>, LwsError> {
        let student: Student =
            serde_json::from_slice(data).map_err(|e| LwsError::Coder(Box::new(e)))?;
        Ok(Box::new(student))
    }
}
