use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

const HEADING_PREFIX: &str = "# ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: String,
}

/// A Markdown file reduced to its first level-1 heading and the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub name: String,
    pub content: String,
    pub source: PathBuf,
}

#[derive(Debug, Default)]
pub struct ReadBatch {
    pub files: Vec<FileContent>,
    pub failures: Vec<SyncError>,
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub pages: Vec<Page>,
    pub files_read: usize,
    pub read_failures: Vec<SyncError>,
    pub without_heading: Vec<PathBuf>,
}

pub fn read_page_file(path: &Path) -> Result<FileContent> {
    let content = fs::read_to_string(path).map_err(|source| SyncError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FileContent {
        path: path.to_path_buf(),
        content,
    })
}

/// Read every file independently. A failed read is logged and recorded but
/// never affects the others; successful reads keep input order.
pub fn read_page_files(paths: &[PathBuf]) -> ReadBatch {
    info!("Reading {} files", paths.len());

    let results = paths
        .par_iter()
        .map(|path| read_page_file(path))
        .collect::<Vec<_>>();

    let mut batch = ReadBatch::default();
    for result in results {
        match result {
            Ok(file) => {
                info!("Read file: \"{}\"", file.path.display());
                batch.files.push(file);
            }
            Err(error) => {
                if let SyncError::FileRead { path, source } = &error {
                    if source.kind() == io::ErrorKind::NotFound {
                        warn!("File \"{}\" does not exist, skipping", path.display());
                    } else {
                        warn!("Could not read file \"{}\", skipping: {source}", path.display());
                    }
                }
                batch.failures.push(error);
            }
        }
    }
    batch
}

/// Find the first line starting with `# ` and return its trimmed text with
/// the content minus that line, trimmed.
pub fn split_heading(content: &str) -> Option<(&str, String)> {
    let mut start = 0;
    for line in content.split_inclusive('\n') {
        let text = line.strip_suffix('\n').unwrap_or(line);
        if let Some(title) = text.strip_prefix(HEADING_PREFIX) {
            let end = start + text.len();
            let mut body = String::with_capacity(content.len() - text.len());
            body.push_str(&content[..start]);
            body.push_str(&content[end..]);
            return Some((title.trim(), body.trim().to_string()));
        }
        start += line.len();
    }
    None
}

pub fn parse_page(file: &FileContent) -> Option<Page> {
    let Some((title, body)) = split_heading(&file.content) else {
        warn!(
            "Page content of file \"{}\" does not have a heading, skipping",
            file.path.display()
        );
        return None;
    };
    if title.is_empty() {
        warn!(
            "Page content of file \"{}\" has an empty heading, skipping",
            file.path.display()
        );
        return None;
    }

    info!("Parsed page: \"{title}\"");
    Some(Page {
        name: title.to_string(),
        content: body,
        source: file.path.clone(),
    })
}

pub fn parse_pages(files: &[FileContent]) -> Vec<Page> {
    info!("Parsing {} pages", files.len());
    let pages = files.iter().filter_map(parse_page).collect::<Vec<_>>();
    info!("Parsed {} page(s)", pages.len());
    pages
}

/// Read and parse `paths`. Missing, unreadable and heading-less files are
/// dropped; the rest come back in input order.
pub fn parse_all(paths: &[PathBuf]) -> ParseOutcome {
    let batch = read_page_files(paths);
    let pages = parse_pages(&batch.files);
    let without_heading = batch
        .files
        .iter()
        .filter(|file| !pages.iter().any(|page| page.source == file.path))
        .map(|file| file.path.clone())
        .collect();

    ParseOutcome {
        files_read: batch.files.len(),
        pages,
        read_failures: batch.failures,
        without_heading,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn file(content: &str) -> FileContent {
        FileContent {
            path: PathBuf::from("docs/page.md"),
            content: content.to_string(),
        }
    }

    #[test]
    fn heading_and_body_are_split() {
        let page = parse_page(&file("# Title\nBody text")).expect("page");
        assert_eq!(page.name, "Title");
        assert_eq!(page.content, "Body text");
    }

    #[test]
    fn only_first_heading_is_removed() {
        let page = parse_page(&file(
            "Intro line\n\n#  Getting Started  \n\nText\n\n# Second\nMore\n",
        ))
        .expect("page");
        assert_eq!(page.name, "Getting Started");
        assert_eq!(page.content, "Intro line\n\n\n\nText\n\n# Second\nMore");
    }

    #[test]
    fn deeper_headings_and_hash_without_space_do_not_count() {
        assert!(parse_page(&file("## Sub\n#NoSpace\ntext")).is_none());
    }

    #[test]
    fn crlf_line_endings_are_trimmed_from_title() {
        let page = parse_page(&file("# Windows\r\nLine one\r\n")).expect("page");
        assert_eq!(page.name, "Windows");
        assert_eq!(page.content, "Line one");
    }

    #[test]
    fn empty_heading_is_skipped() {
        assert!(parse_page(&file("#   \nbody")).is_none());
    }

    #[test]
    fn heading_only_file_has_empty_content() {
        let page = parse_page(&file("\n# Lonely\n")).expect("page");
        assert_eq!(page.name, "Lonely");
        assert_eq!(page.content, "");
    }

    #[test]
    fn parse_all_keeps_order_and_drops_bad_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let first = root.join("first.md");
        let missing = root.join("missing.md");
        let headless = root.join("headless.md");
        let binary = root.join("binary.md");
        let last = root.join("last.md");
        fs::write(&first, "# First\nOne").expect("write");
        fs::write(&headless, "no heading here").expect("write");
        fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).expect("write");
        fs::write(&last, "# Last\nTwo").expect("write");

        let outcome = parse_all(&[
            last.clone(),
            missing.clone(),
            headless.clone(),
            binary.clone(),
            first.clone(),
        ]);

        let names = outcome
            .pages
            .iter()
            .map(|page| page.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Last", "First"]);
        assert_eq!(outcome.pages[0].source, last);
        assert_eq!(outcome.files_read, 3);
        assert_eq!(outcome.without_heading, vec![headless]);
        assert_eq!(outcome.read_failures.len(), 2);
        assert!(
            outcome
                .read_failures
                .iter()
                .all(|error| matches!(error, SyncError::FileRead { .. }))
        );
    }

    #[test]
    fn read_failures_do_not_affect_other_files() {
        let temp = tempdir().expect("tempdir");
        let good = temp.path().join("good.md");
        fs::write(&good, "# Good").expect("write");

        let batch = read_page_files(&[temp.path().join("nope.md"), good.clone()]);
        assert_eq!(batch.files.len(), 1);
        assert_eq!(batch.files[0].path, good);
        assert_eq!(batch.failures.len(), 1);
    }
}
