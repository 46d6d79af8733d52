//! Attribution walk tests: finding placement, partition trees and
//! order-independence of the reported leaks.

use leaktrace::analysis::{analyze, LeakKind, LeakageReport};
use leaktrace::calltree::{derive_call_stack_id, TraceMerger};
use leaktrace::symbols::OffsetResolver;
use leaktrace::trace::{BranchKind, ImageFileInfo, TraceRecord};

fn merger() -> TraceMerger {
    let mut merger = TraceMerger::new(Box::new(OffsetResolver));
    merger.register_images(&[ImageFileInfo {
        id: 0,
        low: 0x40_0000,
        high: 0x50_0000,
        name: "a".to_string(),
    }]);
    merger
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

fn testcases_of(report: &LeakageReport, id: leaktrace::analysis::PartitionNodeId) -> Vec<u32> {
    report.partition(id).testcases.iter().collect()
}

#[test]
fn test_identical_traces_produce_no_findings() {
    let records = vec![call(0x10, 0x20), jump(0x21, 0x25), ret(0x25, 0x11)];

    let mut merger = merger();
    merger.add_trace(0, records.clone());
    merger.add_trace(1, records);

    let report = analyze(merger.tree());

    assert_eq!(report.finding_count(), 0);
    assert!(!report.call_stack(report.root()).is_interesting());

    // The shared call still shows up in the call-stack tree
    let root = report.call_stack(report.root());
    assert_eq!(root.children().len(), 1);
    let child = report.call_stack(root.children()[0]);
    assert_eq!(child.call_stack_id, derive_call_stack_id(0, 0x10, 0x20));
}

#[test]
fn test_secret_dependent_branch() {
    let mut merger = merger();
    merger.add_trace(
        0,
        vec![call(0x10, 0x20), jump(0x21, 0x25), ret(0x25, 0x11)],
    );
    merger.add_trace(
        1,
        vec![call(0x10, 0x20), jump(0x21, 0x30), ret(0x30, 0x11)],
    );

    let report = analyze(merger.tree());
    assert_eq!(report.finding_count(), 1);

    // The finding sits inside the call's stack, not at the root
    let root = report.call_stack(report.root());
    assert!(root.findings().is_empty());
    let stack = report.call_stack(root.children()[0]);
    assert!(stack.is_interesting());

    let leak = &stack.findings()[&0x21];
    assert_eq!(leak.kind, LeakKind::Jump);
    assert_eq!(leak.partitions.len(), 1);

    let partition = report.partition(leak.partitions[0]);
    assert_eq!(partition.testcases.iter().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(partition.children.len(), 2);
    assert_eq!(testcases_of(&report, partition.children[0]), vec![0]);
    assert_eq!(testcases_of(&report, partition.children[1]), vec![1]);
    assert!(!report.partition(partition.children[0]).dummy);
}

#[test]
fn test_secret_dependent_memory_access() {
    let access = |offset: u32| TraceRecord::ImageMemoryAccess {
        is_write: false,
        instruction_image: 0,
        instruction_offset: 0x42,
        memory_image: 0,
        memory_offset: offset,
    };

    let mut merger = merger();
    merger.add_trace(
        0,
        vec![call(0x10, 0x20), jump(0x21, 0x25), access(0x100), ret(0x25, 0x11)],
    );
    merger.add_trace(
        1,
        vec![call(0x10, 0x20), jump(0x21, 0x25), access(0x200), ret(0x25, 0x11)],
    );

    let report = analyze(merger.tree());
    assert_eq!(report.finding_count(), 1);

    let root = report.call_stack(report.root());
    let stack = report.call_stack(root.children()[0]);
    let leak = &stack.findings()[&0x42];
    assert_eq!(leak.kind, LeakKind::MemoryAccess);
    assert_eq!(leak.partitions.len(), 1);

    let partition = report.partition(leak.partitions[0]);
    assert_eq!(partition.testcases.iter().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(partition.children.len(), 2);
    assert_eq!(testcases_of(&report, partition.children[0]), vec![0]);
    assert_eq!(testcases_of(&report, partition.children[1]), vec![1]);
}

#[test]
fn test_nested_call_attributes_to_inner_stack() {
    let trace = |target: u32| {
        vec![
            call(0x10, 0x20),
            call(0x30, 0x40),
            jump(0x45, target),
            ret(0x55, 0x31),
            ret(0x25, 0x11),
        ]
    };

    let mut merger = merger();
    merger.add_trace(0, trace(0x50));
    merger.add_trace(1, trace(0x60));

    let report = analyze(merger.tree());
    assert_eq!(report.finding_count(), 1);

    let outer_csid = derive_call_stack_id(0, 0x10, 0x20);
    let inner_csid = derive_call_stack_id(outer_csid, 0x30, 0x40);

    let root = report.call_stack(report.root());
    let outer = report.call_stack(root.children()[0]);
    assert_eq!(outer.call_stack_id, outer_csid);
    assert!(outer.findings().is_empty());
    assert!(outer.is_interesting());

    let inner = report.call_stack(outer.children()[0]);
    assert_eq!(inner.call_stack_id, inner_csid);
    assert!(inner.is_interesting());
    assert_eq!(inner.findings()[&0x45].kind, LeakKind::Jump);
}

#[test]
fn test_nested_divergence_inserts_dummy_partitions() {
    // Testcase 0 splits off at 0x21; the 0x35 divergence between 1 and 2
    // happens below that split, so the still-open 0x21 partition inherits
    // dummy children mirroring the lower split.
    let mut merger = merger();
    merger.add_trace(0, vec![jump(0x21, 0x100), jump(0x35, 0x200)]);
    merger.add_trace(1, vec![jump(0x21, 0x101), jump(0x35, 0x201)]);
    merger.add_trace(2, vec![jump(0x21, 0x101), jump(0x35, 0x202)]);

    let report = analyze(merger.tree());

    let root = report.call_stack(report.root());
    assert_eq!(root.findings().len(), 2);

    // 0x21 partitions {0,1,2} into {0} and {1,2}
    let outer = report.partition(root.findings()[&0x21].partitions[0]);
    assert_eq!(outer.testcases.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(outer.children.len(), 2);
    let kept = report.partition(outer.children[1]);
    assert_eq!(kept.testcases.iter().collect::<Vec<_>>(), vec![1, 2]);

    // The inherited split shows up as dummy children of the {1,2} node
    assert_eq!(kept.children.len(), 2);
    let dummy_a = report.partition(kept.children[0]);
    let dummy_b = report.partition(kept.children[1]);
    assert!(dummy_a.dummy);
    assert!(dummy_b.dummy);
    assert_eq!(dummy_a.testcases.iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(dummy_b.testcases.iter().collect::<Vec<_>>(), vec![2]);

    // 0x35 gets its own partition rooted at {1,2}
    let lower = report.partition(root.findings()[&0x35].partitions[0]);
    assert_eq!(lower.testcases.iter().collect::<Vec<_>>(), vec![1, 2]);
    assert!(!lower.dummy);
}

#[test]
fn test_finding_set_is_order_independent() {
    let trace_a = vec![call(0x10, 0x20), jump(0x21, 0x25), ret(0x25, 0x11)];
    let trace_b = vec![call(0x10, 0x20), jump(0x21, 0x30), ret(0x30, 0x11)];

    let mut forward = merger();
    forward.add_trace(0, trace_a.clone());
    forward.add_trace(1, trace_b.clone());

    let mut backward = merger();
    backward.add_trace(0, trace_b);
    backward.add_trace(1, trace_a);

    let findings_forward = analyze(forward.tree()).finding_summary();
    let findings_backward = analyze(backward.tree()).finding_summary();

    assert!(!findings_forward.is_empty());
    assert_eq!(findings_forward, findings_backward);
}
