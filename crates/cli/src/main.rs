// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cti`: diagnostics for the Common Tools Interface installation.
//!
//! Answers the questions support asks first: which WLM was detected, is
//! the environment usable, and what does a given job look like.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cti_core::env as cti_env;
use cti_fe::Frontend;

#[derive(Parser)]
#[command(name = "cti", about = "Common Tools Interface diagnostics", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the library version.
    Version,
    /// Detect and print the current workload manager.
    Wlm,
    /// Check the environment: config dir, install dir, helper binaries.
    EnvCheck,
    /// Register a running job by WLM id and print its placement.
    Layout {
        /// WLM-specific job id (jobid.stepid, apid, f58 string, pid).
        job_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Version => {
            println!("{}", Frontend::version());
            Ok(())
        }
        Commands::Wlm => {
            let frontend = Frontend::instance().context("frontend init failed")?;
            println!("{}", frontend.current_wlm());
            Ok(())
        }
        Commands::EnvCheck => env_check(),
        Commands::Layout { job_id } => layout(&job_id),
    }
}

fn env_check() -> Result<()> {
    let mut failures = 0;

    match cti_core::Config::from_env() {
        Ok(config) => {
            println!("config dir: {} (ok)", config.cfg_dir.display());
            match config.install_dir.as_ref() {
                Some(dir) => println!("install dir: {} ", dir.display()),
                None => {
                    println!("install dir: {} is not set", cti_env::INSTALL_DIR_ENV);
                    failures += 1;
                }
            }
            for binary in [cti_env::HELPER_BINARY, cti_env::SHIM_BINARY, cti_env::DLAUNCH_BINARY]
            {
                match config.libexec_binary(binary) {
                    Ok(path) => println!("{binary}: {} (ok)", path.display()),
                    Err(err) => {
                        println!("{binary}: {err}");
                        failures += 1;
                    }
                }
            }
            if config.debug {
                match &config.log_dir {
                    Some(dir) => println!("debug logging to {}", dir.display()),
                    None => println!("debug logging to /tmp on the compute nodes"),
                }
            }
        }
        Err(err) => {
            println!("environment: {err}");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} problem(s) found");
    }
    println!("environment ok");
    Ok(())
}

fn layout(job_id: &str) -> Result<()> {
    let frontend = Frontend::instance().context("frontend init failed")?;
    let app = frontend
        .register_job(job_id)
        .with_context(|| format!("cannot attach to job {job_id}"))?;

    println!("job {} on {}", frontend.app_job_id(app)?, frontend.current_wlm());
    println!(
        "{} PEs over {} node(s)",
        frontend.num_app_pes(app)?,
        frontend.num_app_nodes(app)?
    );
    for placement in frontend.app_hosts_placement(app)? {
        let ranks: Vec<String> =
            placement.pids.iter().map(|(rank, pid)| format!("{rank}:{pid}")).collect();
        println!("  {} {} task(s): {}", placement.hostname, placement.num_pes, ranks.join(" "));
    }
    for binary in frontend.app_binary_list(app)? {
        println!("  binary {binary}");
    }

    frontend.deregister_app(app)?;
    Ok(())
}
