// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::deps::DependencyOracle;

#[test]
fn nm_lines_yield_symbol_names() {
    let output = "\
0000000000401040 T MPIR_Breakpoint
0000000000601050 D MPIR_proctable
0000000000601058 D MPIR_proctable_size
";
    let symbols = parse_nm_output(output);
    assert!(symbols.contains("MPIR_Breakpoint"));
    assert!(symbols.contains("MPIR_proctable_size"));
    assert!(!symbols.contains("main"));
}

#[test]
fn readelf_skips_undefined_and_strips_versions() {
    let output = "\
Symbol table '.dynsym' contains 3 entries:
   Num:    Value          Size Type    Bind   Vis      Ndx Name
     1: 0000000000000000     0 FUNC    GLOBAL DEFAULT  UND free
     2: 0000000000401040    12 FUNC    GLOBAL DEFAULT   14 MPIR_Breakpoint
     3: 0000000000601050     8 OBJECT  GLOBAL DEFAULT   23 memcpy@GLIBC_2.14
";
    let symbols = parse_readelf_output(output);
    assert!(symbols.contains("MPIR_Breakpoint"));
    assert!(symbols.contains("memcpy"));
    assert!(!symbols.contains("free"), "undefined symbols are not definitions");
}

#[test]
fn libc_defines_printf() {
    if !tool_available("ldd") || (!tool_available("nm") && !tool_available("readelf")) {
        return;
    }
    // Find the real libc the dynamic loader would use.
    let deps = crate::deps::LddOracle
        .dependencies(std::path::Path::new("/bin/sh"))
        .unwrap();
    let Some(libc) = deps.iter().find(|d| {
        d.file_name().map(|n| n.to_string_lossy().starts_with("libc")).unwrap_or(false)
    }) else {
        return;
    };

    assert!(contains_symbols(libc, &["printf"]).unwrap());
    assert!(!contains_symbols(libc, &["definitely_not_a_symbol_zzz"]).unwrap());
}

fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
