// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const LDD_OUTPUT: &str = "\
\tlinux-vdso.so.1 (0x00007ffd2a3f1000)
\tlibmessage.so => /opt/tool/lib/libmessage.so (0x00007f40f1a00000)
\tlibc.so.6 => /lib64/libc.so.6 (0x00007f40f1600000)
\t/lib64/ld-linux-x86-64.so.2 (0x00007f40f1c51000)
";

#[test]
fn arrowed_entries_resolve_to_paths() {
    let deps = parse_ldd_output(LDD_OUTPUT, Path::new("/apps/tool")).unwrap();
    assert_eq!(
        deps,
        vec![
            PathBuf::from("/opt/tool/lib/libmessage.so"),
            PathBuf::from("/lib64/libc.so.6"),
        ]
    );
}

#[test]
fn vdso_and_loader_are_skipped() {
    let deps = parse_ldd_output(
        "\tlinux-vdso.so.1 (0x1)\n\t/lib64/ld-linux-x86-64.so.2 (0x2)\n",
        Path::new("/apps/tool"),
    )
    .unwrap();
    assert!(deps.is_empty());
}

#[test]
fn unresolved_dependency_is_an_error() {
    let err = parse_ldd_output(
        "\tlibmissing.so => not found\n",
        Path::new("/apps/tool"),
    )
    .unwrap_err();
    assert!(err.to_string().contains("libmissing.so"), "got {err}");
}

#[test]
fn ldd_on_a_real_dynamic_binary_reports_libc() {
    if !tool_available("ldd") {
        return;
    }
    // /bin/sh is dynamic on every platform this library targets.
    let deps = LddOracle.dependencies(Path::new("/bin/sh")).unwrap();
    assert!(
        deps.iter().any(|d| d.file_name()
            .map(|n| n.to_string_lossy().starts_with("libc"))
            .unwrap_or(false)),
        "expected libc in {deps:?}"
    );
}

fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
