use crate::error::{RagError, Result};
use log::{debug, info};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata carried from a document to every chunk derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the file the text was read from
    pub source: String,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// The actual text content of the document
    pub content: String,
    pub metadata: DocumentMetadata,
    /// The document's MIME type, guessed from the extension
    pub mime_type: String,
}

impl Document {
    /// Create a new document from a UTF-8 text file
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();

        let mime_type = from_path(path).first_or_text_plain().to_string();
        debug!("Detected MIME type for {}: {}", path.display(), mime_type);

        // read_to_string rejects invalid UTF-8 with InvalidData
        let content = fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;

        Ok(Document {
            path: path.to_path_buf(),
            content,
            metadata: DocumentMetadata {
                source: path.to_string_lossy().into_owned(),
            },
            mime_type,
        })
    }
}

/// Load every top-level file in `dir` whose extension matches `extension`.
///
/// Documents are returned sorted by path. Subdirectories and files with
/// other extensions are skipped.
pub fn load_documents<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<Document>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(RagError::SourceDirNotFound(dir.to_path_buf()));
    }

    let wanted = extension.trim_start_matches('.');
    let entries = fs::read_dir(dir).map_err(|e| RagError::io(dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RagError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, wanted) {
            paths.push(path);
        } else {
            debug!("Skipping non-matching file: {}", path.display());
        }
    }
    paths.sort();

    let documents = paths
        .iter()
        .map(Document::from_file)
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Loaded {} documents from {}",
        documents.len(),
        dir.display()
    );
    Ok(documents)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}
