//! leaktrace CLI
//!
//! Merges preprocessed execution traces and reports instructions whose
//! behavior depends on the test case.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use leaktrace::commands::{execute_analyze, validate_args, AnalyzeArgs};
use leaktrace::utils::config::{AnalysisOptions, SCHEMA_VERSION};

/// leaktrace - side-channel leakage localization for execution traces
#[derive(Parser, Debug)]
#[command(name = "leaktrace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge traces and report leaking instructions
    Analyze {
        /// Directory containing t<N>.trace.json files
        #[arg(short, long)]
        traces: PathBuf,

        /// Directory where report files are written
        #[arg(short, long)]
        output: PathBuf,

        /// MAP file for symbol resolution (repeatable)
        #[arg(long = "map-file")]
        map_files: Vec<PathBuf>,

        /// Directory scanned for *.map files
        #[arg(long = "map-dir")]
        map_directory: Option<PathBuf>,

        /// Also write call-tree-dump.txt with the full merged tree
        #[arg(long)]
        dump_call_tree: bool,

        /// Leave memory accesses and allocations out of the dump
        #[arg(long)]
        skip_memory_in_dump: bool,

        /// Print result summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Analyze {
            traces,
            output,
            map_files,
            map_directory,
            dump_call_tree,
            skip_memory_in_dump,
            summary,
        } => {
            let mut options = AnalysisOptions::new(output);
            options.map_files = map_files;
            options.map_directory = map_directory;
            options.dump_call_tree = dump_call_tree;
            options.include_memory_accesses_in_dump = !skip_memory_in_dump;

            let args = AnalyzeArgs {
                trace_directory: traces,
                options,
                print_summary: summary,
            };

            validate_args(&args)?;
            execute_analyze(args)?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}

/// Display version information
///
/// **Private** - internal command implementation
fn display_version() {
    println!("leaktrace v{}", env!("CARGO_PKG_VERSION"));
    println!("Summary schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Side-channel leakage localization for instrumented execution traces.");
}
