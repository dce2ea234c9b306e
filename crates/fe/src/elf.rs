// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ELF symbol probing for launcher/tool validation.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use crate::error::{CtiError, StagingError};

/// True iff `binary` defines every symbol in `symbols` in its dynamic
/// table. Used by tools to verify MPI linkage before launch.
pub fn contains_symbols(binary: &Path, symbols: &[&str]) -> Result<bool, CtiError> {
    let defined = dynamic_symbols(binary)?;
    Ok(symbols.iter().all(|sym| defined.contains(*sym)))
}

fn dynamic_symbols(binary: &Path) -> Result<HashSet<String>, CtiError> {
    // nm first, readelf as the fallback where binutils' nm is absent.
    let nm = Command::new("nm").arg("-D").arg("--defined-only").arg(binary).output();
    if let Ok(output) = nm {
        if output.status.success() {
            return Ok(parse_nm_output(&String::from_utf8_lossy(&output.stdout)));
        }
    }

    let readelf = Command::new("readelf")
        .arg("--dyn-syms")
        .arg("--wide")
        .arg(binary)
        .output()
        .map_err(|source| StagingError::Resolve { path: binary.to_path_buf(), source })?;
    if !readelf.status.success() {
        return Err(CtiError::Staging(StagingError::Dependencies {
            binary: binary.to_path_buf(),
            detail: String::from_utf8_lossy(&readelf.stderr).trim().to_string(),
        }));
    }
    Ok(parse_readelf_output(&String::from_utf8_lossy(&readelf.stdout)))
}

/// `0000000000401040 T MPIR_Breakpoint`
fn parse_nm_output(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _addr = fields.next()?;
            let _kind = fields.next()?;
            fields.next().map(str::to_string)
        })
        .collect()
}

/// `   42: 0000000000401040    12 FUNC  GLOBAL DEFAULT   14 MPIR_Breakpoint`
fn parse_readelf_output(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 || fields[6] == "UND" {
                return None;
            }
            // Versioned symbols come out as name@VERSION.
            Some(fields[7].split('@').next().unwrap_or(fields[7]).to_string())
        })
        .collect()
}

#[cfg(test)]
#[path = "elf_tests.rs"]
mod tests;
