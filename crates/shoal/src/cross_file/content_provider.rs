//
// cross_file/content_provider.rs
//
// File content access for cross-file resolution
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::Url;

use super::path_resolve::path_to_uri;

/// Source of file text for the resolver. Returning `None` means the file is
/// treated as missing: it is still reported but never parsed or followed.
pub trait ContentProvider {
    fn get_content(&self, path: &Path) -> Option<String>;

    fn exists(&self, path: &Path) -> bool {
        self.get_content(path).is_some()
    }
}

/// Document content accessor (minimal interface for open documents)
pub trait DocumentContent {
    fn content(&self) -> String;
}

/// Reads straight from disk. Non-UTF-8 files count as missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskContentProvider;

impl ContentProvider for DiskContentProvider {
    fn get_content(&self, path: &Path) -> Option<String> {
        match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) => {
                log::trace!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Open documents take precedence over disk.
///
/// CRITICAL: if a path is open in the editor, its in-memory text is returned
/// even when the file on disk differs or does not exist yet.
pub struct OverlayContentProvider<'a, D: DocumentContent> {
    pub open_documents: &'a HashMap<Url, D>,
}

impl<'a, D: DocumentContent> OverlayContentProvider<'a, D> {
    pub fn new(open_documents: &'a HashMap<Url, D>) -> Self {
        Self { open_documents }
    }

    pub fn is_open(&self, path: &Path) -> bool {
        path_to_uri(path).is_some_and(|uri| self.open_documents.contains_key(&uri))
    }
}

impl<'a, D: DocumentContent> ContentProvider for OverlayContentProvider<'a, D> {
    fn get_content(&self, path: &Path) -> Option<String> {
        if let Some(doc) = path_to_uri(path).and_then(|uri| self.open_documents.get(&uri)) {
            return Some(doc.content());
        }
        DiskContentProvider.get_content(path)
    }
}

/// In-memory file system, used by tests and fixtures.
impl ContentProvider for HashMap<PathBuf, String> {
    fn get_content(&self, path: &Path) -> Option<String> {
        self.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct MockDocument {
        content: String,
    }

    impl DocumentContent for MockDocument {
        fn content(&self) -> String {
            self.content.clone()
        }
    }

    #[test]
    fn test_open_doc_is_authoritative() {
        let mut temp = NamedTempFile::new().unwrap();
        write!(temp, "x=disk").unwrap();
        let path = temp.path().to_path_buf();

        let mut open_docs = HashMap::new();
        open_docs.insert(
            path_to_uri(&path).unwrap(),
            MockDocument {
                content: "x=open".to_string(),
            },
        );

        let provider = OverlayContentProvider::new(&open_docs);
        assert!(provider.is_open(&path));
        assert_eq!(provider.get_content(&path), Some("x=open".to_string()));
    }

    #[test]
    fn test_overlay_falls_back_to_disk() {
        let mut temp = NamedTempFile::new().unwrap();
        write!(temp, "y=disk").unwrap();

        let open_docs: HashMap<Url, MockDocument> = HashMap::new();
        let provider = OverlayContentProvider::new(&open_docs);
        assert!(!provider.is_open(temp.path()));
        assert_eq!(provider.get_content(temp.path()), Some("y=disk".to_string()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.sh");
        assert!(!DiskContentProvider.exists(&missing));
    }

    #[test]
    fn test_in_memory_provider() {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("/w/a.sh"), "a=1".to_string());
        assert!(files.exists(Path::new("/w/a.sh")));
        assert_eq!(files.get_content(Path::new("/w/b.sh")), None);
    }
}
