//! Report rendering and end-to-end pipeline tests.

use leaktrace::analysis::analyze;
use leaktrace::calltree::TraceMerger;
use leaktrace::commands::{execute_analyze, validate_args, AnalyzeArgs};
use leaktrace::output::{read_summary, write_call_stack_report};
use leaktrace::symbols::OffsetResolver;
use leaktrace::trace::{BranchKind, ImageFileInfo, Trace, TraceRecord};
use leaktrace::utils::config::{AnalysisOptions, CALL_STACKS_FILENAME, CALL_TREE_DUMP_FILENAME, SUMMARY_FILENAME};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn image() -> ImageFileInfo {
    ImageFileInfo {
        id: 0,
        low: 0x40_0000,
        high: 0x50_0000,
        name: "a".to_string(),
    }
}

fn call(source: u32, target: u32) -> TraceRecord {
    TraceRecord::branch(BranchKind::Call, (0, source), (0, target))
}

fn jump(source: u32, target: u32) -> TraceRecord {
    TraceRecord::branch(BranchKind::Jump, (0, source), (0, target))
}

fn ret(source: u32, target: u32) -> TraceRecord {
    TraceRecord::branch(BranchKind::Return, (0, source), (0, target))
}

fn write_trace(directory: &Path, testcase: u32, records: Vec<TraceRecord>) {
    let trace = Trace {
        images: vec![image()],
        records,
    };
    let path = directory.join(format!("t{}.trace.json", testcase));
    let file = fs::File::create(path).unwrap();
    serde_json::to_writer(file, &trace).unwrap();
}

fn analyze_args(traces: &Path, output: &Path) -> AnalyzeArgs {
    let mut options = AnalysisOptions::new(output);
    options.dump_call_tree = true;
    AnalyzeArgs {
        trace_directory: traces.to_path_buf(),
        options,
        print_summary: false,
    }
}

#[test]
fn test_pipeline_with_identical_traces_reports_only_root() {
    let traces = tempdir().unwrap();
    let output = tempdir().unwrap();

    let records = vec![call(0x10, 0x20), jump(0x21, 0x25), ret(0x25, 0x11)];
    write_trace(traces.path(), 0, records.clone());
    write_trace(traces.path(), 1, records);

    let args = analyze_args(traces.path(), output.path());
    validate_args(&args).unwrap();
    let summary = execute_analyze(args).unwrap();

    assert_eq!(summary.testcase_count, 2);
    assert_eq!(summary.leaking_instruction_count, 0);

    let report = fs::read_to_string(output.path().join(CALL_STACKS_FILENAME)).unwrap();
    assert_eq!(report, "<root>\n");
}

#[test]
fn test_pipeline_with_divergent_branch() {
    let traces = tempdir().unwrap();
    let output = tempdir().unwrap();

    write_trace(
        traces.path(),
        0,
        vec![call(0x10, 0x20), jump(0x21, 0x25), ret(0x25, 0x11)],
    );
    write_trace(
        traces.path(),
        1,
        vec![call(0x10, 0x20), jump(0x21, 0x30), ret(0x30, 0x11)],
    );

    let summary = execute_analyze(analyze_args(traces.path(), output.path())).unwrap();
    assert_eq!(summary.leaking_instruction_count, 1);
    assert_eq!(summary.leaking_call_stack_count, 1);

    let report = fs::read_to_string(output.path().join(CALL_STACKS_FILENAME)).unwrap();
    assert!(report.starts_with("<root>\n"));
    assert!(report.contains("a+0x10 -> a+0x20 ($"));
    assert!(report.contains("[L] a+0x21 (jump)"));
    assert!(report.contains("- Number of calls: 1"));
    assert!(report.contains("0 1 (2 total)"));
    assert!(report.contains("├── 0 (1 total)"));
    assert!(report.contains("└── 1 (1 total)"));

    let dump = fs::read_to_string(output.path().join(CALL_TREE_DUMP_FILENAME)).unwrap();
    assert!(dump.starts_with("@root\n"));
    assert!(dump.contains("#call a+0x10 -> a+0x20 ($"));
    assert!(dump.contains("@split"));
    assert!(dump.contains("#branch a+0x21 -> a+0x25"));
    assert!(dump.contains("#branch a+0x21 -> a+0x30"));

    let loaded = read_summary(output.path().join(SUMMARY_FILENAME)).unwrap();
    assert_eq!(loaded.leaking_instruction_count, 1);
    assert_eq!(loaded.testcase_count, 2);
}

#[test]
fn test_memory_access_finding_is_labelled() {
    let traces = tempdir().unwrap();
    let output = tempdir().unwrap();

    let access = |offset: u32| TraceRecord::ImageMemoryAccess {
        is_write: false,
        instruction_image: 0,
        instruction_offset: 0x42,
        memory_image: 0,
        memory_offset: offset,
    };

    write_trace(
        traces.path(),
        0,
        vec![call(0x10, 0x20), access(0x100), ret(0x25, 0x11)],
    );
    write_trace(
        traces.path(),
        1,
        vec![call(0x10, 0x20), access(0x200), ret(0x25, 0x11)],
    );

    execute_analyze(analyze_args(traces.path(), output.path())).unwrap();

    let report = fs::read_to_string(output.path().join(CALL_STACKS_FILENAME)).unwrap();
    assert!(report.contains("[L] a+0x42 (memory access)"));
    assert!(report.contains("├── 0 (1 total)"));
    assert!(report.contains("└── 1 (1 total)"));
}

#[test]
fn test_dummy_partitions_render_with_marker() {
    let mut merger = TraceMerger::new(Box::new(OffsetResolver));
    merger.register_images(&[image()]);
    merger.add_trace(0, vec![jump(0x21, 0x100), jump(0x35, 0x200)]);
    merger.add_trace(1, vec![jump(0x21, 0x101), jump(0x35, 0x201)]);
    merger.add_trace(2, vec![jump(0x21, 0x101), jump(0x35, 0x202)]);

    let report = analyze(merger.tree());

    let mut buffer = Vec::new();
    write_call_stack_report(&mut buffer, &report, merger.formatter()).unwrap();
    let rendered = String::from_utf8(buffer).unwrap();

    // The inherited split below the {1,2} branch renders as dummy nodes
    assert!(rendered.contains("[M] 1 (1 total)"));
    assert!(rendered.contains("[M] 2 (1 total)"));

    // The real partitions stay untagged
    assert!(rendered.contains("0-2 (3 total)"));
    assert!(rendered.contains("├── 0 (1 total)"));
    assert!(rendered.contains("└── 1 2 (2 total)"));
}

#[test]
fn test_validate_args_rejects_missing_trace_directory() {
    let output = tempdir().unwrap();
    let args = analyze_args(Path::new("/nonexistent/traces"), output.path());
    assert!(validate_args(&args).is_err());
}

#[test]
fn test_analyze_fails_without_trace_files() {
    let traces = tempdir().unwrap();
    let output = tempdir().unwrap();
    let result = execute_analyze(analyze_args(traces.path(), output.path()));
    assert!(result.is_err());
}
