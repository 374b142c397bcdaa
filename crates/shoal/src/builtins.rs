//
// builtins.rs
//
// Shell builtins and PATH executables
//

use std::collections::HashSet;
use std::path::Path;

/// Bash builtin commands.
pub const BASH_BUILTINS: &[&str] = &[
    ".", ":", "[", "alias", "bg", "bind", "break", "builtin", "caller", "cd", "command",
    "compgen", "complete", "compopt", "continue", "declare", "dirs", "disown", "echo", "enable",
    "eval", "exec", "exit", "export", "false", "fc", "fg", "getopts", "hash", "help", "history",
    "jobs", "kill", "let", "local", "logout", "mapfile", "popd", "printf", "pushd", "pwd", "read",
    "readarray", "readonly", "return", "set", "shift", "shopt", "source", "suspend", "test",
    "times", "trap", "true", "type", "typeset", "ulimit", "umask", "unalias", "unset", "wait",
];

pub fn is_builtin(name: &str) -> bool {
    BASH_BUILTINS.contains(&name)
}

/// Names of executable regular files found in the directories of a
/// `PATH`-style string. Unreadable directories are skipped.
pub fn scan_path_executables(path_var: &str) -> HashSet<String> {
    let mut found = HashSet::new();

    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::trace!("Skipping PATH entry {}: {}", dir, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if is_executable_file(&path) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    found.insert(name.to_string());
                }
            }
        }
    }

    log::info!("Found {} executables on PATH", found.len());
    found
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Whether `name` already means something as a command: a builtin or an
/// executable on PATH. Such names are not renamed.
pub fn collides_with_command(name: &str, executables: &HashSet<String>) -> bool {
    is_builtin(name) || executables.contains(name)
}
