// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Command-line interface for the silscheme compiler.
//!
//! Provides a `compile` subcommand that turns a source file into IL
//! text, plus a minimal interactive REPL for experimentation. The VM
//! that executes the IL is a separate program.

#![forbid(unsafe_code)]

mod repl;

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use silscheme_compiler as compiler;

static INIT_LOGGING: std::sync::Once = std::sync::Once::new();

#[derive(Parser, Debug)]
#[command(
    name = "silscheme",
    about = "Compile silscheme source into stack-IL text",
    version
)]
struct Cli {
    /// Global log level (trace|debug|info|warn|error)
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
    )]
    log_level: String,
    /// Max input file size in bytes
    #[arg(long, global = true, default_value_t = 1_048_576)]
    max_bytes: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file and print the IL
    Compile(CompileArgs),
    /// Minimal interactive REPL
    Repl,
}

#[derive(clap::Args, Debug)]
struct CompileArgs {
    /// Path to a .scm source file
    path: PathBuf,
    /// Module name used in handles and labels; defaults to the file stem
    #[arg(long)]
    module: Option<String>,
    /// Write the IL to a file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Compile(#[from] compiler::Error),
}

pub(crate) fn init_logging(level: Option<&str>) {
    INIT_LOGGING.call_once(|| {
        let env = match level {
            Some(l) if !l.is_empty() => l.to_string(),
            _ => std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };

        let filter = tracing_subscriber::EnvFilter::try_new(env.clone()).unwrap_or_else(|e| {
            eprintln!("WARN: invalid RUST_LOG/log_level '{env}': {e}; falling back to 'info'");
            tracing_subscriber::EnvFilter::new("info")
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(Some(&cli.log_level));

    let result = match &cli.command {
        Command::Compile(args) => cmd_compile(&cli, args),
        Command::Repl => repl::cmd_repl(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(cli: &Cli, args: &CompileArgs) -> Result<(), CliError> {
    let meta = fs::metadata(&args.path)?;
    if meta.len() > cli.max_bytes as u64 {
        return Err(CliError::InvalidInput(format!(
            "input file exceeds {} bytes",
            cli.max_bytes
        )));
    }

    let src = fs::read_to_string(&args.path)?;
    let module = args.module.clone().unwrap_or_else(|| {
        args.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string())
    });

    let program = match compiler::compile_module(&module, &src) {
        Ok(p) => p,
        Err(e) => {
            report_compile_error(&src, &e);
            return Err(e.into());
        }
    };

    match &args.out {
        Some(path) => fs::write(path, program.text())?,
        None => print!("{}", program.text()),
    }

    Ok(())
}

// The framed excerpt goes to stderr before the summary line.
pub(crate) fn report_compile_error(src: &str, e: &compiler::Error) {
    if let Some(offset) = e.offset() {
        let wrapped = compiler::wrap_source(src);
        let framed = compiler::diag::render(&wrapped, offset, e.stage(), &e.to_string());
        eprintln!("{framed}");
    }
}
