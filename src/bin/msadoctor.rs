//! Process entry point: parses arguments, wires the library's runner/probe
//! entry points to stdout/stderr, and sets the process exit code.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use msa_doctor::cli::{Cli, Command};
use msa_doctor::format::{render_encryption, render_extensions, render_report};
use msa_doctor::{run, DefaultFactory};

fn init_logging() {
    let filter = EnvFilter::try_from_env("MSADOCTOR_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let success = match cli.command {
        cmd @ Command::Validate { .. } => {
            let config = cmd.into_runner_config()?;
            let factory = DefaultFactory::new();
            let report = run(&factory, &config);
            print!("{}", render_report(&report));
            report.all_passed()
        }
        cmd @ Command::ProbeEncryption { .. } => {
            let (endpoint, format) = cmd.into_encryption_endpoint()?;
            let info = msa_doctor::probe::probe_encryption(endpoint)?;
            println!("{}", render_encryption(&info, format));
            true
        }
        cmd @ Command::ProbeExtensions { .. } => {
            let (endpoint, format) = cmd.into_extensions_endpoint()?;
            let rows = msa_doctor::probe::probe_extensions(endpoint)?;
            println!("{}", render_extensions(&rows, format));
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
