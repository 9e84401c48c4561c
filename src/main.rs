//! mockgraft CLI entry point.
//!
//! Parses arguments, wires up logging, and dispatches to the command
//! implementations in `commands`.

use anyhow::Result;

use mockgraft::cli::{self, Commands};
use mockgraft::commands;
use mockgraft::observability::init_tracing;

fn main() -> Result<()> {
    let cli = cli::parse_args();
    init_tracing(cli.verbose);
    let verbose = cli.verbose;

    match cli.command {
        Commands::Rewrite { args, common } => commands::rewrite::run(&args, &common, verbose),
        Commands::Print {
            file,
            print_rewrite,
            print_mock,
            common,
        } => commands::print::run(&file, print_rewrite, print_mock, &common, verbose),
        Commands::Build {
            args,
            common,
            build,
        } => commands::build::run_build(&args, &common, &build, verbose),
        Commands::Run {
            args,
            common,
            build,
            exec_args,
        } => commands::build::run_run(&args, &common, &build, &exec_args, verbose),
        Commands::Test {
            args,
            common,
            build,
            coverprofile,
            coverpkg,
            exec_args,
        } => commands::build::run_test(
            &args,
            &common,
            &build,
            coverprofile.as_deref(),
            coverpkg.as_deref(),
            &exec_args,
            verbose,
        ),
    }
}
