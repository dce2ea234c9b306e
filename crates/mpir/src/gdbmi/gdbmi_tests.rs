// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;

#[parameterized(
    plain = { "srun", "srun" },
    flag = { "--ntasks-per-node=1", "--ntasks-per-node=1" },
    path = { "/usr/bin/a.out", "/usr/bin/a.out" },
    spaced = { "hello world", "'hello world'" },
    quoted = { "it's", r"'it'\''s'" },
    empty = { "", "''" },
    globby = { "a*b", "'a*b'" },
)]
fn shell_quoting(input: &str, expected: &str) {
    assert_eq!(shell_quote(input), expected);
}

#[test]
fn gdb_path_defaults_to_path_lookup() {
    std::env::remove_var(cti_core::env::GDB_PATH_ENV);
    let control = GdbMiControl::from_env();
    assert_eq!(control.gdb_path, std::path::PathBuf::from("gdb"));
}
