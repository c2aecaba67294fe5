use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{debug, error, warn};
use walkdir::WalkDir;

use super::markdown::markdown_to_text;

/// A Markdown file found on disk, already rendered to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub path: PathBuf,
    /// File stem, used as the document title.
    pub title: String,
    pub text: String,
}

/// Recursively loads every `.md` file under `dir_path`, sorted by path.
///
/// Unreadable files are logged and skipped; a path that is not a directory is an error.
pub fn load_markdown_documents(dir_path: &Path) -> Result<Vec<MarkdownDocument>> {
    debug!("Loading markdown documents from {:?}", dir_path);

    if !dir_path.is_dir() {
        return Err(anyhow!("Specified path is not a directory: {:?}", dir_path));
    }

    let mut documents = Vec::new();
    let mut read_errors = 0;

    for entry in WalkDir::new(dir_path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file() && e.path().extension().map_or(false, |ext| ext == "md"))
    {
        let path = entry.path();
        match fs::read_to_string(path) {
            Ok(content) => {
                let text = markdown_to_text(&content);
                if text.is_empty() {
                    debug!("Skipping empty markdown file {:?}", path);
                    continue;
                }
                documents.push(MarkdownDocument {
                    path: path.to_path_buf(),
                    title: path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    text,
                });
            }
            Err(e) => {
                error!("Failed to read file {:?}: {}", path, e);
                read_errors += 1;
            }
        }
    }

    if documents.is_empty() && read_errors == 0 {
        warn!("No markdown files found in {:?}", dir_path);
    } else if read_errors > 0 {
        warn!("Encountered {} errors while reading files from {:?}", read_errors, dir_path);
    }

    Ok(documents)
}
