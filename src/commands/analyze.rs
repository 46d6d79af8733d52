//! Analyze command implementation.
//!
//! The analyze command:
//! 1. Discovers preprocessed trace files
//! 2. Builds the symbol resolver from MAP files
//! 3. Merges all traces into the shared call tree
//! 4. Runs the leakage attribution walk
//! 5. Writes report files

use crate::analysis::analyze;
use crate::calltree::TraceMerger;
use crate::output::{
    build_summary, write_call_stack_report_file, write_call_tree_dump_file, write_summary,
    AnalysisSummary,
};
use crate::symbols::{MapFileResolver, OffsetResolver, SymbolResolver};
use crate::trace::{load_trace, parse_testcase_id};
use crate::utils::config::{
    AnalysisOptions, CALL_STACKS_FILENAME, CALL_TREE_DUMP_FILENAME, SUMMARY_FILENAME,
};
use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Arguments for the analyze command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct AnalyzeArgs {
    /// Directory containing `t<N>.trace.json` files
    pub trace_directory: PathBuf,

    /// Analysis configuration
    pub options: AnalysisOptions,

    /// Print a colored result summary to stdout
    pub print_summary: bool,
}

/// Validate analyze arguments before running
///
/// **Public** - can be called before execute_analyze for early validation
///
/// # Returns
/// Ok if arguments are valid, Err with message if not
pub fn validate_args(args: &AnalyzeArgs) -> Result<()> {
    if !args.trace_directory.is_dir() {
        anyhow::bail!(
            "Trace directory does not exist: {}",
            args.trace_directory.display()
        );
    }

    args.options
        .validate()
        .context("Invalid analysis configuration")?;

    for map_file in &args.options.map_files {
        if !map_file.is_file() {
            anyhow::bail!("MAP file does not exist: {}", map_file.display());
        }
    }

    Ok(())
}

/// Execute the analyze command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Missing or malformed trace files
/// * MAP file parse errors
/// * Report write errors
pub fn execute_analyze(args: AnalyzeArgs) -> Result<AnalysisSummary> {
    let start_time = Instant::now();

    info!("Step 1/5: Discovering trace files...");
    let traces = discover_traces(&args.trace_directory)?;
    if traces.is_empty() {
        anyhow::bail!(
            "No trace files (t<N>.trace.json) found in {}",
            args.trace_directory.display()
        );
    }
    info!("Found {} trace files", traces.len());

    info!("Step 2/5: Loading symbol information...");
    let resolver = build_resolver(&args.options)?;

    info!("Step 3/5: Merging traces...");
    let mut merger = TraceMerger::new(resolver);
    for (testcase_id, path) in &traces {
        let trace = load_trace(path)
            .with_context(|| format!("Failed to load trace {}", path.display()))?;
        merger.register_images(&trace.images);
        merger.add_trace(*testcase_id, trace.records);
    }
    debug!(
        "Merged tree: {} nodes, {} warnings",
        merger.tree().len(),
        merger.warnings().len()
    );

    info!("Step 4/5: Attributing leakage...");
    let report = analyze(merger.tree());

    info!("Step 5/5: Writing reports...");
    let output = &args.options.output_directory;

    if args.options.dump_call_tree {
        write_call_tree_dump_file(
            output.join(CALL_TREE_DUMP_FILENAME),
            merger.tree(),
            merger.formatter(),
            args.options.include_memory_accesses_in_dump,
        )
        .context("Failed to write call tree dump")?;
    }

    write_call_stack_report_file(
        output.join(CALL_STACKS_FILENAME),
        &report,
        merger.formatter(),
    )
    .context("Failed to write call stack report")?;

    let summary = build_summary(&merger, &report);
    write_summary(&summary, output.join(SUMMARY_FILENAME))
        .context("Failed to write analysis summary")?;

    if args.print_summary {
        print_summary(&summary, output);
    }

    let elapsed = start_time.elapsed();
    info!("Analysis completed in {:.2}s", elapsed.as_secs_f64());

    Ok(summary)
}

/// Find trace files and sort them by testcase id
///
/// **Private** - internal helper for execute_analyze
///
/// The first ingested trace defines the linear tail of the merged tree, so
/// a stable order keeps runs reproducible.
fn discover_traces(directory: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut traces = Vec::new();

    for entry in std::fs::read_dir(directory)
        .with_context(|| format!("Cannot read trace directory {}", directory.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(testcase_id) = parse_testcase_id(&path) {
            traces.push((testcase_id, path));
        }
    }

    traces.sort_by_key(|(id, _)| *id);
    Ok(traces)
}

/// Build the symbol resolver from the configured MAP files
///
/// **Private** - internal helper for execute_analyze
fn build_resolver(options: &AnalysisOptions) -> Result<Box<dyn SymbolResolver>> {
    let mut map_paths = options.map_files.clone();

    if let Some(directory) = &options.map_directory {
        for entry in std::fs::read_dir(directory)
            .with_context(|| format!("Cannot read MAP directory {}", directory.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "map") {
                map_paths.push(path);
            }
        }
    }

    if map_paths.is_empty() {
        debug!("No MAP files configured, using raw offsets");
        return Ok(Box::new(OffsetResolver));
    }

    let resolver =
        MapFileResolver::from_paths(&map_paths).context("Failed to parse MAP files")?;
    Ok(Box::new(resolver))
}

/// Print a short colored run summary to stdout
///
/// **Private** - internal helper for execute_analyze
fn print_summary(summary: &AnalysisSummary, output: &Path) {
    println!();
    println!("{}", "ANALYSIS SUMMARY".bold());
    println!("  Testcases:            {}", summary.testcase_count);
    println!("  Trace records:        {}", summary.record_count);
    println!("  Call tree nodes:      {}", summary.tree_node_count);

    let findings = format!("{}", summary.leaking_instruction_count);
    let findings = if summary.leaking_instruction_count > 0 {
        findings.red().bold()
    } else {
        findings.green()
    };
    println!("  Leaking instructions: {}", findings);
    println!(
        "  Leaking call stacks:  {}",
        summary.leaking_call_stack_count
    );

    if summary.warning_count > 0 {
        println!(
            "  Warnings:             {}",
            format!("{}", summary.warning_count).yellow()
        );
    }

    println!("  Reports written to:   {}", output.display());
}
