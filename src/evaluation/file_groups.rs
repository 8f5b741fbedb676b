//! Data file discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::TaskConfig;
use crate::GlmError;

/// Data files of each pattern group, relative to the task path and sorted
pub fn file_groups(config: &TaskConfig) -> crate::Result<BTreeMap<String, Vec<PathBuf>>> {
    if !config.path.is_dir() {
        return Err(GlmError::DatasetError(format!(
            "task data directory {} does not exist",
            config.path.display()
        )));
    }

    let files: Vec<PathBuf> = WalkDir::new(&config.path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(&config.path).ok().map(Path::to_path_buf))
        .collect();

    let groups = config
        .file_pattern
        .groups()
        .into_iter()
        .map(|(name, pattern)| {
            let mut matched: Vec<PathBuf> = files.iter().filter(|f| glob_match(&pattern, f)).cloned().collect();
            matched.sort();
            tracing::debug!("Group {}: {} files match {:?}", name, matched.len(), pattern);
            (name, matched)
        })
        .collect();

    Ok(groups)
}

/// Match a relative path against a glob.
///
/// `**` spans any number of directories, `*` and `?` stay within one
/// component.
pub fn glob_match(pattern: &str, path: &Path) -> bool {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let components: Vec<&str> = components.iter().map(String::as_str).collect();
    match_components(&pattern, &components)
}

fn match_components(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_components(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((component, tail)) => {
                let segment: Vec<char> = segment.chars().collect();
                let component: Vec<char> = component.chars().collect();
                match_segment(&segment, &component) && match_components(rest, tail)
            }
            None => false,
        },
    }
}

fn match_segment(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| match_segment(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && match_segment(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && match_segment(rest, &text[1..]),
    }
}
