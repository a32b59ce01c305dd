//! Deterministic enumeration of a corpus directory.

use crate::error::PipelineError;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// An entry the walk could not read. The walk continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Everything found under a corpus root. Paths are relative to `root`.
#[derive(Debug, Clone, Default)]
pub struct CorpusListing {
    pub root: PathBuf,
    /// Matching files in depth-first, lexicographic order.
    pub files: Vec<PathBuf>,
    /// Every directory below the root, parents before children.
    pub directories: Vec<PathBuf>,
    pub skipped: Vec<SkippedEntry>,
}

impl CorpusListing {
    /// Matching files joined onto the root.
    pub fn absolute_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.files.iter().map(|f| self.root.join(f))
    }
}

pub struct CorpusWalker {
    root: PathBuf,
    suffix: String,
}

impl CorpusWalker {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }

    /// Walks the tree. Symlinks are not followed, so cycles cannot occur.
    pub fn walk(&self) -> Result<CorpusListing, PipelineError> {
        if !self.root.is_dir() {
            return Err(PipelineError::config(format!(
                "input directory '{}' does not exist or is not a directory",
                self.root.display()
            )));
        }

        let mut listing = CorpusListing {
            root: self.root.clone(),
            ..CorpusListing::default()
        };

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(PipelineError::config(format!(
                        "cannot read input directory '{}': {}",
                        self.root.display(),
                        err
                    )));
                }
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    listing.skipped.push(SkippedEntry {
                        path: err.path().map(Path::to_path_buf),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                listing.directories.push(relative);
            } else if file_type.is_file() && self.matches(entry.file_name().to_string_lossy().as_ref()) {
                listing.files.push(relative);
            }
        }

        debug!(
            "Walked '{}': {} files, {} directories, {} skipped",
            self.root.display(),
            listing.files.len(),
            listing.directories.len(),
            listing.skipped.len()
        );
        Ok(listing)
    }

    fn matches(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.suffix)
    }
}

/// Absolute paths of every file under `root` whose name ends with `suffix`.
pub fn enumerate(root: &Path, suffix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let listing = CorpusWalker::new(root, suffix).walk()?;
    Ok(listing.absolute_files().collect())
}

/// A relative path written with `/` separators on every platform.
pub fn portable_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
