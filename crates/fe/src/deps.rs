// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ELF dynamic-dependency resolution for the staging walk.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::StagingError;

/// Read-only oracle answering "which shared objects does this ELF load".
pub trait DependencyOracle: Send + Sync {
    fn dependencies(&self, binary: &Path) -> Result<Vec<PathBuf>, StagingError>;
}

/// Production oracle: `ldd` against the target.
#[derive(Debug, Default)]
pub struct LddOracle;

impl DependencyOracle for LddOracle {
    fn dependencies(&self, binary: &Path) -> Result<Vec<PathBuf>, StagingError> {
        let output = match Command::new("ldd").arg(binary).output() {
            Ok(output) => output,
            // No ldd on this system: dependency staging degrades to
            // explicit adds only.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("ldd not found; shared-object dependencies will not be staged");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StagingError::Resolve { path: binary.to_path_buf(), source })
            }
        };
        if !output.status.success() {
            // Static binaries make ldd exit nonzero; they have no deps.
            // (glibc and musl word the diagnostic differently.)
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stderr.contains("not a dynamic executable")
                || stdout.contains("not a dynamic executable")
                || stderr.contains("Not a valid dynamic program")
            {
                return Ok(Vec::new());
            }
            return Err(StagingError::Dependencies {
                binary: binary.to_path_buf(),
                detail: stderr.trim().to_string(),
            });
        }
        parse_ldd_output(&String::from_utf8_lossy(&output.stdout), binary)
    }
}

/// One line per dependency:
/// ```text
///     linux-vdso.so.1 (0x00007ffd...)
///     libmessage.so => /opt/tool/lib/libmessage.so (0x00007f...)
///     libc.so.6 => /lib64/libc.so.6 (0x00007f...)
///     /lib64/ld-linux-x86-64.so.2 (0x00007f...)
///     libmissing.so => not found
/// ```
pub fn parse_ldd_output(output: &str, binary: &Path) -> Result<Vec<PathBuf>, StagingError> {
    let mut deps = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((name, target)) = line.split_once("=>") else {
            // vdso and the dynamic loader resolve without a => arrow.
            continue;
        };
        let name = name.trim();
        let target = target.trim();

        if target.starts_with("not found") {
            return Err(StagingError::Dependencies {
                binary: binary.to_path_buf(),
                detail: format!("dependency {name} not found"),
            });
        }

        let path = target.split_whitespace().next().unwrap_or_default();
        if path.is_empty() || !path.starts_with('/') {
            continue;
        }
        debug!(dep = %name, path = %path, "resolved dependency");
        deps.push(PathBuf::from(path));
    }
    Ok(deps)
}

#[cfg(test)]
#[path = "deps_tests.rs"]
mod tests;
