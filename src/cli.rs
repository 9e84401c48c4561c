use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "mockgraft")]
#[command(about = "Graft mock interception shims onto Rust crates", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Verbose output; repeat for per-file detail
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rewrite the workspace into the staging root and leave it populated
    Rewrite {
        /// Entry files or package names
        args: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Rewrite a single file and print the result and its mock stub
    Print {
        /// Source file to rewrite
        file: PathBuf,

        /// Print the rewritten file content
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        print_rewrite: bool,

        /// Print the generated mock stub
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        print_mock: bool,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Rewrite, then compile the staged workspace
    Build {
        /// Entry files or package names
        args: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,

        #[command(flatten)]
        build: BuildOpts,
    },

    /// Build, then spawn the produced binary
    Run {
        /// Entry files or package names
        args: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,

        #[command(flatten)]
        build: BuildOpts,

        /// Arguments after `--` go to the produced binary
        #[arg(last = true)]
        exec_args: Vec<String>,
    },

    /// Build in test mode, then run the tests
    Test {
        /// Entry files or package names
        args: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,

        #[command(flatten)]
        build: BuildOpts,

        /// Coverage profile output passed to the test harness
        #[arg(long)]
        coverprofile: Option<PathBuf>,

        /// Packages to cover
        #[arg(long)]
        coverpkg: Option<String>,

        /// Arguments after `--` go to the test harness
        #[arg(last = true)]
        exec_args: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// Regex over `<pkg>::<owner>::<func>`; prefix `not:` inverts
    #[arg(long)]
    pub filter: Option<String>,

    /// Mock config path; the literal `none` skips reading
    #[arg(long, default_value = "test/mock_gen.json")]
    pub mock_config: PathBuf,

    /// Comma-separated extra packages to rewrite
    #[arg(long)]
    pub mock_pkg: Option<String>,

    /// Comma-separated extra modules to rewrite
    #[arg(long)]
    pub mock_module: Option<String>,

    /// Policy for requested packages missing from the graph
    #[arg(long, value_enum)]
    pub allow_missing: Option<AllowMissingArg>,

    /// Comma-separated package paths; restrict the primary set to these
    #[arg(long)]
    pub only_pkg: Option<String>,

    /// Skip generating mock stubs
    #[arg(long)]
    pub skip_mock_gen: bool,

    /// Directory (relative to the project) for browsable stub copies
    #[arg(long, default_value = "test/mock_gen")]
    pub stub_gen_dir: String,

    /// Invalidate caches and regenerate everything
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Project root; defaults to the working directory
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Extra flag forwarded to the loader's metadata query; repeatable
    #[arg(long = "mod-flag")]
    pub mod_flags: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildOpts {
    /// Unoptimised build with debug output name
    #[arg(long)]
    pub debug: bool,

    /// Output executable path
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Extra flags passed through to cargo
    #[arg(long = "cargo-flag")]
    pub cargo_flags: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AllowMissingArg {
    Skip,
    Warn,
    Error,
}

impl From<AllowMissingArg> for crate::config::AllowMissing {
    fn from(a: AllowMissingArg) -> Self {
        match a {
            AllowMissingArg::Skip => Self::Skip,
            AllowMissingArg::Warn => Self::Warn,
            AllowMissingArg::Error => Self::Error,
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["mockgraft"];
        full.extend(args);
        Cli::parse_from(full)
    }

    #[test]
    fn rewrite_takes_entries_and_filter() {
        let cli = parse(&["rewrite", "src/main.rs", "--filter", ".*::.*::run"]);
        match cli.command {
            Commands::Rewrite { args, common } => {
                assert_eq!(args, vec!["src/main.rs"]);
                assert_eq!(common.filter.as_deref(), Some(".*::.*::run"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn print_toggles_accept_values() {
        let cli = parse(&["print", "src/lib.rs", "--print-mock", "false"]);
        match cli.command {
            Commands::Print {
                print_rewrite,
                print_mock,
                ..
            } => {
                assert!(print_rewrite);
                assert!(!print_mock);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn run_splits_exec_args() {
        let cli = parse(&["run", "src/main.rs", "--", "--port", "8080"]);
        match cli.command {
            Commands::Run { exec_args, .. } => {
                assert_eq!(exec_args, vec!["--port", "8080"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn verbose_counts() {
        let cli = parse(&["-vv", "rewrite", "."]);
        assert_eq!(cli.verbose, 2);
    }
}
