//! Data-store-location parsing: `path` or `scheme://path`.

use crate::error::LwsError;
use std::path::{Path, PathBuf};

const SCHEME_DELIMITER: &str = "://";
const FILE_SCHEME: &str = "file";

/// A parsed store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Located {
    pub schema: String,
    pub path: PathBuf,
}

/// Parses `p` into a location. A bare path is treated as `file://path` and
/// resolved to an absolute path.
pub(crate) fn parse(p: &str) -> Result<Located, LwsError> {
    if p.is_empty() {
        return Err(LwsError::InvalidPath);
    }
    let parts: Vec<&str> = p.split(SCHEME_DELIMITER).collect();
    match parts.len() {
        1 => {
            let path = Path::new(parts[0]);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::path::absolute(path).map_err(|_| LwsError::InvalidPath)?
            };
            Ok(Located {
                schema: FILE_SCHEME.to_string(),
                path,
            })
        }
        2 => Ok(Located {
            schema: parts[0].to_lowercase(),
            path: PathBuf::from(parts[1]),
        }),
        _ => Err(LwsError::InvalidFormat),
    }
}

/// Whether this log can serve the given scheme.
pub(crate) fn is_supported(schema: &str) -> bool {
    schema == FILE_SCHEME
}
