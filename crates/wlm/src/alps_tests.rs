// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn both_toolhelper_conventions_are_probed_old_first() {
    let candidates = toolhelper_candidates("4297191");
    assert_eq!(
        candidates[0],
        PathBuf::from("/var/spool/alps/4297191/toolhelper4297191")
    );
    assert_eq!(
        candidates[1],
        PathBuf::from("/var/opt/cray/alps/spool/4297191/toolhelper4297191")
    );
}

#[test]
fn attribs_dirs_follow_the_same_conventions() {
    let candidates = attribs_candidates("7");
    assert_eq!(candidates[0], PathBuf::from("/var/spool/alps/7"));
    assert_eq!(candidates[1], PathBuf::from("/var/opt/cray/alps/spool/7"));
}
