//! Files sent to users on request.
//!
//! Wraps the keyword [`DocumentCatalog`] with the documents directory. Only
//! files that exist on disk are candidates, so the catalog may list files
//! that are not deployed yet.

use std::path::{Path, PathBuf};

use consult_core::documents::DocumentCatalog;

use crate::config::Config;

pub struct DocumentLibrary {
    dir: PathBuf,
    catalog: DocumentCatalog,
}

impl DocumentLibrary {
    pub fn new(dir: impl Into<PathBuf>, catalog: DocumentCatalog) -> Self {
        Self {
            dir: dir.into(),
            catalog,
        }
    }

    /// `None` when no `[documents]` section or no files are configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let documents = config.documents.as_ref()?;
        let catalog = documents.catalog();
        if catalog.is_empty() {
            return None;
        }
        let missing: Vec<&str> = catalog
            .entries()
            .iter()
            .filter(|e| !documents.dir.join(&e.file).is_file())
            .map(|e| e.file.as_str())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(dir = %documents.dir.display(), ?missing, "configured documents not found");
        }
        Some(Self::new(documents.dir.clone(), catalog))
    }

    /// Path of the file the text asks for, if any.
    pub fn find(&self, text: &str) -> Option<PathBuf> {
        self.catalog
            .find_with(text, |entry| self.dir.join(&entry.file).is_file())
            .map(|entry| self.dir.join(&entry.file))
    }
}

/// Caption sent with a document.
pub fn caption(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("Document: {}\n\nIf you have questions about it, just ask!", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_core::documents::{default_request_words, DocumentEntry};
    use tempfile::TempDir;

    fn library(dir: &Path) -> DocumentLibrary {
        let entries = vec![
            DocumentEntry {
                file: "missing.pdf".into(),
                keywords: vec!["relocat".into(), "residen".into()],
            },
            DocumentEntry {
                file: "relocation.pdf".into(),
                keywords: vec!["relocat".into()],
            },
        ];
        DocumentLibrary::new(dir, DocumentCatalog::new(entries, default_request_words()))
    }

    #[test]
    fn test_only_existing_files_match() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("relocation.pdf"), b"%PDF-1.4").unwrap();
        let lib = library(tmp.path());

        // missing.pdf scores higher but is not on disk.
        let found = lib.find("Please send the relocation and residence brochure");
        assert_eq!(found, Some(tmp.path().join("relocation.pdf")));
        assert_eq!(lib.find("How does relocation work?"), None);
    }

    #[test]
    fn test_caption_names_the_file() {
        let text = caption(Path::new("/srv/docs/nda.pdf"));
        assert!(text.starts_with("Document: nda.pdf"));
    }
}
