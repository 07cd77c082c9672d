//! hdlcheck CLI entry point.

use clap::Parser;
use hdlcheck::cli::{self, Cli, Commands, EXIT_ERROR};

fn main() {
    let cli = Cli::parse();
    cli::init_logging();

    let outcome = match &cli.command {
        Commands::Lint(args) => cli::run_lint(args),
        Commands::Tables(args) => cli::run_tables(args),
        Commands::Delta(args) => cli::run_delta(args),
        Commands::Daemon(args) => cli::run_daemon(args),
        Commands::Impact(args) => cli::run_impact(args),
        Commands::Init(args) => cli::run_init(args),
    };

    let exit_code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
