//! Timestamped per-invocation log files.

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Timestamp layout used in log file names
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H:%M:%S";

/// Collision suffixes tried before giving up
const MAX_SUFFIX: usize = 1000;

/// Create a fresh log file `<dir>/<name>-<timestamp>.log`.
///
/// The file is created exclusively; when the timestamped name is taken a
/// numeric suffix is added, so every invocation writes its own file.
pub fn create_log_file(dir: &Path, name: &str, now: DateTime<Local>) -> crate::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;

    let stem = format!("{}-{}", name, now.format(LOG_TIMESTAMP_FORMAT));

    for suffix in 0..MAX_SUFFIX {
        let file_name = if suffix == 0 {
            format!("{stem}.log")
        } else {
            format!("{stem}-{suffix}.log")
        };
        let path = dir.join(file_name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                tracing::debug!("Created log file {:?}", path);
                return Ok((path, file));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(crate::GlmError::LaunchError(format!(
        "no free log file name for {stem} in {}",
        dir.display()
    )))
}
