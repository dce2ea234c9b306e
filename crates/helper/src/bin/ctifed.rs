// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ctifed`: the supervisor helper process.
//!
//! Spawned by the frontend with `--read-fd N --write-fd N` pointing at the
//! two inherited control sockets. Not meant to be run by hand.

use anyhow::{bail, Context, Result};
use cti_mpir::gdbmi::GdbMiControl;
use cti_wire::socket_from_inherited_fd;

fn main() -> Result<()> {
    let (read_fd, write_fd) = parse_args()?;
    let _log_guard = init_logging();

    let req = socket_from_inherited_fd(read_fd);
    let resp = socket_from_inherited_fd(write_fd);

    let server = cti_helper::Server::new(req, resp, GdbMiControl::from_env());
    server.run().context("helper request loop failed")?;
    Ok(())
}

fn parse_args() -> Result<(i32, i32)> {
    let mut read_fd = None;
    let mut write_fd = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--read-fd" | "-r" => {
                let value = args.next().context("--read-fd needs a value")?;
                read_fd = Some(value.parse().context("--read-fd must be an fd number")?);
            }
            "--write-fd" | "-w" => {
                let value = args.next().context("--write-fd needs a value")?;
                write_fd = Some(value.parse().context("--write-fd must be an fd number")?);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: ctifed --read-fd N --write-fd N\n\
                     Supervises processes for a tool frontend; cleans them up on parent exit.\n\
                     This should not be invoked directly."
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?}"),
        }
    }

    match (read_fd, write_fd) {
        (Some(read), Some(write)) => Ok((read, write)),
        _ => bail!("both --read-fd and --write-fd are required"),
    }
}

/// Log to `$CTI_LOG_DIR/ctifed.<pid>.log` when `CTI_DEBUG` is on,
/// otherwise stay quiet.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use cti_core::env::{DEBUG_ENV, LOG_DIR_ENV};

    if std::env::var_os(DEBUG_ENV).is_none() {
        return None;
    }
    let log_dir = std::env::var_os(LOG_DIR_ENV).map(std::path::PathBuf::from)?;

    let appender = tracing_appender::rolling::never(
        log_dir,
        format!("ctifed.{}.log", std::process::id()),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}
