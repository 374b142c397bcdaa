//! Deterministic fixture workspace generator for tests.
//!
//! Generates synthetic bash workspaces with controlled characteristics:
//! file count, functions per file, `source` chains and extra global
//! assignments. Output has no randomness, so two runs with the same
//! configuration produce identical files.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub functions_per_file: usize,
    /// Files `0..source_chain_depth` each source the next file.
    pub source_chain_depth: usize,
    pub globals_per_file: usize,
}

impl FixtureConfig {
    /// Small workspace: 10 files, 5 functions each, source chain depth 3.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            functions_per_file: 5,
            source_chain_depth: 3,
            globals_per_file: 5,
        }
    }

    /// Medium workspace: 50 files, 10 functions each, source chain depth 10.
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            functions_per_file: 10,
            source_chain_depth: 10,
            globals_per_file: 10,
        }
    }

    /// Large workspace: 200 files, 20 functions each, source chain depth 15.
    pub fn large() -> Self {
        Self {
            file_count: 200,
            functions_per_file: 20,
            source_chain_depth: 15,
            globals_per_file: 20,
        }
    }

    fn sources_next(&self, index: usize) -> bool {
        index < self.source_chain_depth && index + 1 < self.file_count
    }
}

/// File name of the `index`th generated script.
pub fn fixture_file_name(index: usize) -> String {
    format!("file_{}.sh", index)
}

/// Generate the content of a single script.
///
/// A file that sources its successor also calls the successor's first
/// function and reads its first global, so chains carry cross-file uses.
fn generate_script_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::from("#!/usr/bin/env bash\n\n");

    if config.sources_next(index) {
        writeln!(content, "source ./{}", fixture_file_name(index + 1)).unwrap();
        content.push('\n');
    }

    for func_i in 0..config.functions_per_file {
        writeln!(content, "func_{}_{}() {{", index, func_i).unwrap();
        writeln!(content, "    local result=$(( $1 + {} ))", func_i + 1).unwrap();
        writeln!(content, "    if [ -z \"$result\" ]; then").unwrap();
        writeln!(content, "        return 1").unwrap();
        writeln!(content, "    fi").unwrap();
        writeln!(content, "    echo \"$result\"").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    for line_i in 0..config.globals_per_file {
        writeln!(content, "var_{}_{}={}", index, line_i, line_i + 1).unwrap();
    }

    if config.sources_next(index) {
        content.push('\n');
        if config.functions_per_file > 0 {
            writeln!(content, "func_{}_0 1", index + 1).unwrap();
        }
        if config.globals_per_file > 0 {
            writeln!(content, "echo \"$var_{}_0\"", index + 1).unwrap();
        }
    }

    content
}

/// Create a temporary fixture workspace from the given configuration.
///
/// Returns a `TempDir` whose path contains the generated `.sh` files.
/// The directory is cleaned up when the `TempDir` is dropped.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory and return their paths
/// in index order.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) -> Vec<PathBuf> {
    (0..config.file_count)
        .map(|i| {
            let filepath = dir.join(fixture_file_name(i));
            std::fs::write(&filepath, generate_script_content(i, config))
                .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filepath.display(), e));
            filepath
        })
        .collect()
}
