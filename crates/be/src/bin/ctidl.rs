// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ctidl`: the tool-daemon launcher run on each compute node.
//!
//! Invoked by the frontend through the WLM's remote-execution primitive.
//! Unpacks a shipped manifest archive into the session sandbox, writes the
//! arrival marker, and (optionally) execs the staged tool daemon with the
//! sandbox environment. Side modes service file probes, wrapper-pid
//! discovery, and session teardown.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use cti_be::sandbox;
use cti_core::env as cti_env;

#[derive(Debug, Default)]
struct Args {
    root: Option<PathBuf>,
    archive: Option<PathBuf>,
    manifest: Option<u64>,
    apid: Option<String>,
    wlm: Option<String>,
    attribs: Option<PathBuf>,
    wrapper: Option<String>,
    debug: bool,
    log_dir: Option<PathBuf>,
    env: Vec<String>,
    exec: Option<String>,
    exec_args: Vec<String>,
    check_files: Vec<PathBuf>,
    first_children: Vec<i32>,
    cleanup: bool,
}

fn main() -> Result<()> {
    let args = parse_args()?;

    // Probe modes need no sandbox at all.
    if !args.check_files.is_empty() {
        for path in &args.check_files {
            if path.exists() {
                println!("{}", path.display());
            }
        }
        return Ok(());
    }
    if !args.first_children.is_empty() {
        for pid in &args.first_children {
            if let Some(child) = first_child_of(*pid) {
                println!("{pid} {child}");
            }
        }
        return Ok(());
    }

    let root = args.root.clone().context("--root is required")?;
    if args.cleanup {
        sandbox::cleanup(&root, sandbox::DAEMON_TERM_GRACE)?;
        return Ok(());
    }

    let archive = args.archive.clone().context("--archive is required")?;
    let manifest = args.manifest.context("--manifest is required")?;
    sandbox::unpack(&root, &archive, manifest)?;
    // The shipped archive has served its purpose.
    let _ = std::fs::remove_file(&archive);

    if let Some(daemon) = &args.exec {
        exec_daemon(&args, &root, daemon)?;
    }
    Ok(())
}

/// Set up the sandbox environment and become the tool daemon.
fn exec_daemon(args: &Args, root: &std::path::Path, daemon: &str) -> Result<()> {
    let bin_dir = root.join("bin");
    let lib_dir = root.join("lib");
    let tmp_dir = root.join("tmp");
    let daemon_path = bin_dir.join(daemon);

    // The daemon keeps our pid across exec; record it for teardown first.
    sandbox::record_daemon_pid(root, std::process::id() as i32)?;

    let mut cmd = match &args.wrapper {
        Some(wrapper) => {
            let mut cmd = Command::new(wrapper);
            cmd.arg(&daemon_path);
            cmd
        }
        None => Command::new(&daemon_path),
    };
    cmd.args(&args.exec_args);
    cmd.current_dir(root);

    // Sandbox environment contract.
    if let Some(apid) = &args.apid {
        cmd.env(cti_env::BE_APID_ENV, apid);
    }
    if let Some(wlm) = &args.wlm {
        cmd.env(cti_env::BE_WLM_ENV, wlm);
    }
    cmd.env(cti_env::BE_ROOT_DIR_ENV, root);
    cmd.env(cti_env::BE_BIN_DIR_ENV, &bin_dir);
    cmd.env(cti_env::BE_LIB_DIR_ENV, &lib_dir);
    cmd.env(cti_env::BE_FILE_DIR_ENV, root);
    if let Some(attribs) = &args.attribs {
        cmd.env(cti_env::BE_PMI_ATTRIBS_DIR_ENV, attribs);
    }
    if let Ok(old_tmpdir) = std::env::var("TMPDIR") {
        cmd.env(cti_env::BE_OLD_TMPDIR_ENV, old_tmpdir);
    }
    cmd.env("TMPDIR", &tmp_dir);
    cmd.env("SHELL", "/bin/sh");
    cmd.env("PATH", prepend_path("PATH", &bin_dir));
    cmd.env("LD_LIBRARY_PATH", prepend_path("LD_LIBRARY_PATH", &lib_dir));
    for entry in &args.env {
        match entry.split_once('=') {
            Some((name, value)) if !value.is_empty() => {
                cmd.env(name, value);
            }
            Some((name, _)) => {
                cmd.env_remove(name);
            }
            None => bail!("malformed --env entry {entry:?}"),
        }
    }

    // Daemon output goes to the debug log when enabled, else nowhere.
    let output = daemon_output(args)?;
    let err_output = output.try_clone();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(output));
    if let Ok(err_output) = err_output {
        cmd.stderr(Stdio::from(err_output));
    }

    // Only returns on failure.
    let err = cmd.exec();
    Err(err).context(format!("failed to exec tool daemon {daemon:?}"))
}

fn daemon_output(args: &Args) -> Result<std::fs::File> {
    if args.debug {
        if let Some(log_dir) = &args.log_dir {
            let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
                .unwrap_or_default()
                .trim()
                .to_string();
            let apid = args.apid.clone().unwrap_or_default();
            let path = log_dir.join(format!("dlaunch.{hostname}.{apid}.log"));
            return std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open daemon log {path:?}"));
        }
    }
    std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .context("cannot open /dev/null")
}

fn prepend_path(var: &str, dir: &std::path::Path) -> String {
    match std::env::var(var) {
        Ok(existing) if !existing.is_empty() => format!("{}:{existing}", dir.display()),
        _ => dir.display().to_string(),
    }
}

/// First live child of `pid`, via /proc.
fn first_child_of(pid: i32) -> Option<i32> {
    let children =
        std::fs::read_to_string(format!("/proc/{pid}/task/{pid}/children")).ok()?;
    children.split_whitespace().next()?.parse().ok()
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--root" => args.root = Some(PathBuf::from(next(&mut argv, "--root")?)),
            "--archive" => args.archive = Some(PathBuf::from(next(&mut argv, "--archive")?)),
            "--manifest" => {
                args.manifest =
                    Some(next(&mut argv, "--manifest")?.parse().context("bad --manifest id")?)
            }
            "--apid" => args.apid = Some(next(&mut argv, "--apid")?),
            "--wlm" => args.wlm = Some(next(&mut argv, "--wlm")?),
            "--attribs" => args.attribs = Some(PathBuf::from(next(&mut argv, "--attribs")?)),
            "--wrapper" => args.wrapper = Some(next(&mut argv, "--wrapper")?),
            "--debug" => args.debug = true,
            "--log-dir" => args.log_dir = Some(PathBuf::from(next(&mut argv, "--log-dir")?)),
            "--env" => args.env.push(next(&mut argv, "--env")?),
            "--exec" => args.exec = Some(next(&mut argv, "--exec")?),
            "--check-file" => {
                args.check_files.push(PathBuf::from(next(&mut argv, "--check-file")?))
            }
            "--first-child" => args
                .first_children
                .push(next(&mut argv, "--first-child")?.parse().context("bad --first-child pid")?),
            "--cleanup" => args.cleanup = true,
            "--" => {
                args.exec_args.extend(argv.by_ref());
                break;
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(args)
}

fn next(argv: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    argv.next().with_context(|| format!("{flag} needs a value"))
}
