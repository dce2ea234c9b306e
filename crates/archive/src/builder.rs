// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tar package construction with source-file validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{path:?} is not a regular file or directory (fifo/socket/device)")]
    InvalidFileType { path: PathBuf },
    #[error("{path:?} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive already contains an entry named {0:?}")]
    DuplicateEntry(String),
    #[error("failed to create archive under {dir:?}: {source}")]
    Create {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A finished package on local disk. The backing file is unlinked when the
/// package is dropped, shipped or not.
#[derive(Debug)]
pub struct Package {
    path: tempfile::TempPath,
    file_name: String,
}

impl Package {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name the package should carry at the remote destination.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Accumulates manifest entries into a tar file under the frontend's
/// scratch directory.
pub struct ArchiveBuilder {
    tar: tar::Builder<NamedTempFile>,
    file_name: String,
    entries: HashSet<String>,
}

impl ArchiveBuilder {
    /// `file_name` is the final package name, e.g. `cti-slurm-3ab1f2.4.tar`.
    pub fn new(scratch_dir: &Path, file_name: &str) -> Result<Self, ArchiveError> {
        let temp = tempfile::Builder::new()
            .prefix(file_name)
            .suffix(".partial")
            .tempfile_in(scratch_dir)
            .map_err(|source| ArchiveError::Create { dir: scratch_dir.to_path_buf(), source })?;

        let mut tar = tar::Builder::new(temp);
        // Archive the pointed-to file, never the link itself.
        tar.follow_symlinks(true);

        Ok(Self { tar, file_name: file_name.to_string(), entries: HashSet::new() })
    }

    pub fn add_binary(&mut self, staged_name: &str, source: &Path) -> Result<(), ArchiveError> {
        self.add_regular(&format!("bin/{staged_name}"), source)
    }

    pub fn add_library(&mut self, staged_name: &str, source: &Path) -> Result<(), ArchiveError> {
        self.add_regular(&format!("lib/{staged_name}"), source)
    }

    pub fn add_file(&mut self, staged_name: &str, source: &Path) -> Result<(), ArchiveError> {
        self.add_regular(staged_name, source)
    }

    /// Add a directory as an opaque tree under `lib/<staged_name>/`.
    pub fn add_library_dir(&mut self, staged_name: &str, dir: &Path) -> Result<(), ArchiveError> {
        let meta = fs::metadata(dir)
            .map_err(|source| ArchiveError::Unreadable { path: dir.to_path_buf(), source })?;
        if !meta.is_dir() {
            return Err(ArchiveError::InvalidFileType { path: dir.to_path_buf() });
        }
        let dest = format!("lib/{staged_name}");
        self.claim_entry(&dest)?;
        self.append_tree(&dest, dir)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the tar stream and hand the package over. The backing file
    /// keeps its delete-on-drop behavior.
    pub fn finish(self) -> Result<Package, ArchiveError> {
        let temp = self.tar.into_inner()?;
        debug!(archive = %self.file_name, entries = self.entries.len(), "archive finished");
        Ok(Package { path: temp.into_temp_path(), file_name: self.file_name })
    }

    fn add_regular(&mut self, dest: &str, source: &Path) -> Result<(), ArchiveError> {
        // metadata() follows symlinks, so a link chain ending in a fifo or
        // a dangling link is caught here.
        let meta = fs::metadata(source)
            .map_err(|source_err| ArchiveError::Unreadable {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        if !meta.is_file() {
            return Err(ArchiveError::InvalidFileType { path: source.to_path_buf() });
        }
        // Readability is checked up front; tar reports it late and poisons
        // the stream.
        fs::File::open(source).map_err(|source_err| ArchiveError::Unreadable {
            path: source.to_path_buf(),
            source: source_err,
        })?;

        self.claim_entry(dest)?;
        self.tar.append_path_with_name(source, dest)?;
        Ok(())
    }

    fn append_tree(&mut self, dest: &str, dir: &Path) -> Result<(), ArchiveError> {
        let mut names: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| ArchiveError::Unreadable { path: dir.to_path_buf(), source })?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        names.sort();

        self.tar.append_dir(dest, dir)?;
        for path in names {
            let meta = fs::metadata(&path)
                .map_err(|source| ArchiveError::Unreadable { path: path.clone(), source })?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return Err(ArchiveError::InvalidFileType { path });
            };
            let child_dest = format!("{dest}/{name}");
            if meta.is_dir() {
                self.append_tree(&child_dest, &path)?;
            } else if meta.is_file() {
                self.tar.append_path_with_name(&path, &child_dest)?;
            } else {
                return Err(ArchiveError::InvalidFileType { path });
            }
        }
        Ok(())
    }

    fn claim_entry(&mut self, dest: &str) -> Result<(), ArchiveError> {
        if !self.entries.insert(dest.to_string()) {
            return Err(ArchiveError::DuplicateEntry(dest.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
