use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};

const WILDCARDS: [char; 3] = ['*', '?', '['];

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARDS)
}

/// Resolve a literal path or glob pattern to the files it names.
///
/// A literal path is returned as-is without checking that it exists; the
/// parser reports missing files. A glob is expanded against the filesystem
/// and must match at least one regular file.
pub fn resolve(pattern: &str) -> Result<Vec<PathBuf>> {
    info!("Finding files using path: \"{pattern}\"");

    let files = if has_wildcard(pattern) {
        expand_glob(pattern)?
    } else {
        vec![PathBuf::from(pattern)]
    };

    if files.is_empty() {
        return Err(SyncError::NoFilesFound(pattern.to_string()));
    }

    for file in &files {
        info!("Found file: \"{}\"", file.display());
    }
    info!("Found {} file(s)", files.len());

    Ok(files)
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|error| {
            SyncError::configuration(format!("invalid path pattern \"{pattern}\": {error}"))
        })?;
    Ok(glob.compile_matcher())
}

/// Split a pattern into the directory to walk and how deep the walk must go.
/// `None` depth means the pattern contains `**`.
fn walk_plan(pattern: &str) -> (PathBuf, Option<usize>) {
    let segments = pattern.split('/').collect::<Vec<_>>();
    let literal = segments
        .iter()
        .take_while(|segment| !has_wildcard(segment))
        .count();
    let prefix = segments[..literal].join("/");

    let root = if prefix.is_empty() {
        if pattern.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        PathBuf::from(prefix)
    };

    let depth = if pattern.contains("**") {
        None
    } else {
        Some(segments.len() - literal)
    };
    (root, depth)
}

/// True when a wildcard segment of `pattern` starts with a dot, e.g.
/// `docs/.*.md`. Otherwise names starting with `.` below the walk root are
/// never matched.
fn matches_hidden(pattern: &str) -> bool {
    pattern
        .split('/')
        .skip_while(|segment| !has_wildcard(segment))
        .any(|segment| segment.starts_with('.'))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Regular files, plus symlinks that resolve to one. Directory symlinks are
/// not descended into.
fn is_regular_file(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    file_type.is_file()
        || (file_type.is_symlink()
            && fs::metadata(entry.path()).is_ok_and(|metadata| metadata.is_file()))
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = compile(pattern)?;
    let (root, depth) = walk_plan(pattern);
    let implicit_root = root == Path::new(".") && !pattern.starts_with("./");
    let include_hidden = matches_hidden(pattern);

    let mut walker = WalkDir::new(&root).follow_links(false);
    if let Some(depth) = depth {
        walker = walker.max_depth(depth);
    }

    let mut files = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|entry| include_hidden || !is_hidden(entry))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                debug!("skipping unreadable entry under {}: {error}", root.display());
                continue;
            }
        };
        if !is_regular_file(&entry) {
            continue;
        }
        let path = if implicit_root {
            entry
                .path()
                .strip_prefix(".")
                .unwrap_or(entry.path())
                .to_path_buf()
        } else {
            entry.path().to_path_buf()
        };
        if matcher.is_match(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
