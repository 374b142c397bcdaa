//
// cross_file/path_resolve.rs
//
// Path resolution for sourced files
//
// A `source` target is resolved against the directory of the file that
// contains the statement, never against the process working directory. Nested
// sources therefore resolve relative to their own file, which is how a script
// laid out as a tree of helpers is normally run.
//

use std::path::{Component, Path, PathBuf};
use tower_lsp::lsp_types::Url;

/// Resolve an expanded `source` target. Absolute targets are kept, relative
/// ones are joined onto `base_dir`; the result is lexically normalized.
pub fn resolve_source_path(raw: &str, base_dir: &Path) -> Option<PathBuf> {
    if raw.is_empty() {
        return None;
    }

    let path = Path::new(raw);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };

    let resolved = normalize_path(&joined);
    log::trace!("Resolved source target '{}' against {} -> {:?}", raw, base_dir.display(), resolved);
    resolved
}

/// Directory used as the base for a file's own `source` statements.
pub fn base_dir_of(path: &Path) -> PathBuf {
    path.parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Lexically normalize a path: drop `.` and fold `..` into the preceding
/// segment. Symlinks are not followed.
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Pop a Normal segment; keep leading `..` runs of a relative
                // path; never climb above RootDir or Prefix
                match components.last() {
                    Some(Component::Normal(_)) => {
                        components.pop();
                    }
                    Some(Component::ParentDir) | None => components.push(component),
                    Some(_) => {}
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return None;
    }

    let mut result = PathBuf::new();
    for c in components {
        result.push(c);
    }
    Some(result)
}

/// Convert a resolved path to a file URI.
pub fn path_to_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

/// Local path of a `file://` URI, normalized so it compares equal to paths
/// produced by [`resolve_source_path`].
pub fn uri_to_path(uri: &Url) -> Option<PathBuf> {
    let path = uri.to_file_path().ok()?;
    normalize_path(&path)
}
