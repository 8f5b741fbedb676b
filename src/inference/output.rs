//! Answer files.

use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::Query;

/// Timestamp format of generated answer names
pub const ANSWER_TIMESTAMP_FORMAT: &str = "%m-%d-%H-%M-%S";

/// Characters of query text kept in a generated answer name
const PREFIX_CHARS: usize = 20;

/// Where the answers to `query` go.
///
/// Queries with an id are written to `<dir>/<id>.txt`; the rest get a name
/// built from the first characters of their text and the time.
pub fn output_path_for(query: &Query, output_dir: &Path, now: DateTime<Local>) -> PathBuf {
    match &query.id {
        Some(id) => output_dir.join(format!("{id}.txt")),
        None => {
            let prefix: String = query.text.chars().filter(|&c| c != '/').take(PREFIX_CHARS).collect();
            output_dir.join(format!("{}-{}.txt", prefix, now.format(ANSWER_TIMESTAMP_FORMAT)))
        }
    }
}

/// Write one answer per line, readable and writable by everyone
pub fn write_answers(path: &Path, texts: &[String]) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    for text in texts {
        writeln!(file, "{text}")?;
    }
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o777))?;
    }

    tracing::debug!("Wrote {} answers to {}", texts.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_path_with_id() {
        let query = Query {
            id: Some("q7".to_string()),
            text: "anything".to_string(),
        };
        assert_eq!(output_path_for(&query, Path::new("out"), at()), PathBuf::from("out/q7.txt"));
    }

    #[test]
    fn test_timed_path() {
        let query = Query {
            id: None,
            text: "Who is/was the first person [gMASK]".to_string(),
        };
        let path = output_path_for(&query, Path::new("samples"), at());
        assert_eq!(path, PathBuf::from("samples/Who iswas the first -03-09-14-05-07.txt"));
    }

    #[test]
    fn test_write_answers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.txt");

        write_answers(&path, &["first".to_string(), "second".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }
    }
}
