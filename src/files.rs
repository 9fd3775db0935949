//! SQL file discovery.

use crate::error::{SqlDepsError, SqlDepsResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions used when none are given.
pub const DEFAULT_EXTENSIONS: &[&str] = &["sql"];

/// Lowercase extensions without their leading dot.
///
/// `None` or an empty list yields the default set.
pub fn normalize_extensions<S: AsRef<str>>(extensions: Option<&[S]>) -> BTreeSet<String> {
    let normalized: BTreeSet<String> = extensions
        .unwrap_or_default()
        .iter()
        .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    if normalized.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
    } else {
        normalized
    }
}

/// Files under `folder` whose extension is in `extensions`, sorted.
///
/// Matching ignores case. Subdirectories are only entered when `recursive`
/// is set.
pub fn find_sql_files<S: AsRef<str>>(
    folder: &Path,
    recursive: bool,
    extensions: Option<&[S]>,
) -> SqlDepsResult<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(SqlDepsError::NotFound(folder.to_path_buf()));
    }

    let extensions = normalize_extensions(extensions);
    let mut files = Vec::new();
    collect(folder, recursive, &extensions, &mut files)?;
    files.sort();
    tracing::debug!("Found {} SQL file(s) in {}", files.len(), folder.display());
    Ok(files)
}

fn collect(
    dir: &Path,
    recursive: bool,
    extensions: &BTreeSet<String>,
    files: &mut Vec<PathBuf>,
) -> SqlDepsResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect(&path, recursive, extensions, files)?;
            }
        } else if path
            .extension()
            .is_some_and(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
        {
            files.push(path);
        }
    }
    Ok(())
}
