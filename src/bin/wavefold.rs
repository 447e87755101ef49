// src/bin/wavefold.rs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand};
use miette::NamedSource;
use tracing_subscriber::EnvFilter;

use wavefold::fold;
use wavefold::mir::{MirFunction, parse_module};
use wavefold::target::WaveTarget;

#[derive(Parser)]
#[command(name = "wavefold", about = "Operand folding over wave-ISA machine IR", styles = STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fold pass over a .mir file and print the result.
    Run {
        file: PathBuf,
        /// Print the input alongside the optimized output.
        #[arg(long)]
        show_input: bool,
    },
    /// Parse and validate a .mir file without rewriting it.
    Check { file: PathBuf },
}

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

fn main() -> ExitCode {
    // Tracing is opt-in via WAVEFOLD_LOG (env-filter syntax); compact
    // stderr output, no timestamps.
    if let Ok(filter) = EnvFilter::try_from_env("WAVEFOLD_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
        tracing::debug!("tracing initialized");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file, show_input } => run_file(&file, show_input),
        Commands::Check { file } => check_file(&file),
    }
}

fn load(path: &PathBuf) -> Result<Vec<MirFunction>, ExitCode> {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", path.display());
            return Err(ExitCode::FAILURE);
        }
    };
    match parse_module(&source) {
        Ok(funcs) => Ok(funcs),
        Err(err) => {
            let named = NamedSource::new(path.display().to_string(), source);
            let report = miette::Report::new(err).with_source_code(named);
            eprintln!("{report:?}");
            Err(ExitCode::FAILURE)
        }
    }
}

fn run_file(path: &PathBuf, show_input: bool) -> ExitCode {
    let funcs = match load(path) {
        Ok(funcs) => funcs,
        Err(code) => return code,
    };
    let target = WaveTarget::new();
    for mut func in funcs {
        if show_input {
            println!("// input");
            print!("{func}");
        }
        let changed = fold::run_on_function(&mut func, &target);
        tracing::debug!(func = %func.name, changed, "fold pass finished");
        print!("{func}");
    }
    ExitCode::SUCCESS
}

fn check_file(path: &PathBuf) -> ExitCode {
    let funcs = match load(path) {
        Ok(funcs) => funcs,
        Err(code) => return code,
    };
    let mut ok = true;
    for func in &funcs {
        for problem in func.verify() {
            eprintln!("{}: {problem}", func.name);
            ok = false;
        }
    }
    if ok {
        println!("{} function(s) ok", funcs.len());
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
