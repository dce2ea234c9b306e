// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compressed hostlist expansion (`nid[00001-00003,00007]`), the notation
//! Slurm and Flux use in nodelists.

use crate::error::WlmError;

/// Expand a comma-separated list of hostnames and bracket ranges.
pub fn expand_hostlist(list: &str) -> Result<Vec<String>, WlmError> {
    let mut hosts = Vec::new();
    for item in split_top_level(list) {
        expand_item(&item, &mut hosts)?;
    }
    Ok(hosts)
}

/// Split on commas not enclosed in brackets.
fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    items.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn expand_item(item: &str, hosts: &mut Vec<String>) -> Result<(), WlmError> {
    let Some(open) = item.find('[') else {
        hosts.push(item.to_string());
        return Ok(());
    };
    let close = item.rfind(']').ok_or_else(|| WlmError::Parse {
        tool: "hostlist",
        detail: format!("unterminated bracket in {item:?}"),
    })?;
    let prefix = &item[..open];
    let suffix = &item[close + 1..];
    let ranges = &item[open + 1..close];

    for range in ranges.split(',') {
        match range.split_once('-') {
            Some((start, end)) => {
                let width = start.len();
                let start_n: u64 = start.parse().map_err(|_| bad_range(range))?;
                let end_n: u64 = end.parse().map_err(|_| bad_range(range))?;
                if end_n < start_n {
                    return Err(bad_range(range));
                }
                for n in start_n..=end_n {
                    hosts.push(format!("{prefix}{n:0width$}{suffix}"));
                }
            }
            None => {
                // Single padded index.
                let _: u64 = range.parse().map_err(|_| bad_range(range))?;
                hosts.push(format!("{prefix}{range}{suffix}"));
            }
        }
    }
    Ok(())
}

fn bad_range(range: &str) -> WlmError {
    WlmError::Parse { tool: "hostlist", detail: format!("bad range {range:?}") }
}

#[cfg(test)]
#[path = "hostlist_tests.rs"]
mod tests;
