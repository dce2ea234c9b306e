// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executable and library lookup along environment search paths.

use std::path::{Path, PathBuf};

/// Resolve `name` the way `execvp` would: absolute and relative paths are
/// used as given (if they exist), bare names walk `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    search_dirs(&std::env::var("PATH").unwrap_or_default(), name, true)
}

/// Resolve a plain file: as given when it has a directory component,
/// otherwise through `PATH` without requiring the execute bit.
pub fn find_file(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    search_dirs(&std::env::var("PATH").unwrap_or_default(), name, false)
}

/// Resolve a library name through `LD_LIBRARY_PATH` and the conventional
/// system library directories. Paths with a directory component are used
/// as given.
pub fn find_library(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    if let Some(found) =
        search_dirs(&std::env::var("LD_LIBRARY_PATH").unwrap_or_default(), name, false)
    {
        return Some(found);
    }
    for dir in ["/usr/lib64", "/usr/lib", "/lib64", "/lib"] {
        let path = Path::new(dir).join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

/// Resolve `name` in a colon-separated dir list.
fn search_dirs(dirs: &str, name: &str, want_executable: bool) -> Option<PathBuf> {
    for dir in dirs.split(':').filter(|d| !d.is_empty()) {
        let path = Path::new(dir).join(name);
        if !path.is_file() {
            continue;
        }
        if want_executable && !is_executable(&path) {
            continue;
        }
        return Some(path);
    }
    None
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).map(|m| m.mode() & 0o111 != 0).unwrap_or(false)
}

/// `basename` as used for staged-name derivation.
pub fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
