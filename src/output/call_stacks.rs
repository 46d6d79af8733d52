//! The per-call-stack leakage report.
//!
//! Depth-first dump of the call-stack tree with two spaces of indent per
//! level. Subtrees without findings are pruned. Each leaking instruction
//! gets a `[L]` header and its testcase partition trees rendered with
//! box-drawing connectors; inherited (dummy) partition nodes carry a
//! `[M]` tag.

use crate::analysis::{CallStackNodeId, LeakageReport, PartitionNodeId};
use crate::calltree::AddressFormatter;
use crate::output::sequence::format_id_sequence;
use crate::utils::error::ReportError;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write the report to a file, creating parent directories as needed
///
/// **Public** - main entry point for the leakage report
pub fn write_call_stack_report_file(
    output_path: impl AsRef<Path>,
    report: &LeakageReport,
    formatter: &AddressFormatter,
) -> Result<(), ReportError> {
    let output_path = output_path.as_ref();
    info!("Writing call stack report to: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReportError::InvalidPath(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let file = File::create(output_path).map_err(ReportError::WriteFailed)?;
    let mut writer = BufWriter::new(file);
    write_call_stack_report(&mut writer, report, formatter)?;
    Ok(())
}

/// Render the report into any writer
///
/// **Public** - useful for tests and in-memory rendering
pub fn write_call_stack_report(
    writer: &mut impl Write,
    report: &LeakageReport,
    formatter: &AddressFormatter,
) -> io::Result<()> {
    render_stack(writer, report, formatter, report.root(), 0)
}

/// Render one call-stack node, its findings and interesting children
///
/// **Private** - internal rendering
fn render_stack(
    writer: &mut impl Write,
    report: &LeakageReport,
    formatter: &AddressFormatter,
    id: CallStackNodeId,
    depth: usize,
) -> io::Result<()> {
    let node = report.call_stack(id);
    let indent = "  ".repeat(depth);

    if depth == 0 {
        writeln!(writer, "<root>")?;
    } else {
        writeln!(
            writer,
            "{}{} -> {} (${:016x})",
            indent,
            formatter.format(node.source),
            formatter.format(node.target),
            node.call_stack_id
        )?;
    }

    let detail_indent = format!("{}  ", indent);
    for (&instruction, leak) in node.findings() {
        writeln!(
            writer,
            "{}[L] {} ({})",
            detail_indent,
            formatter.format(instruction),
            leak.kind.label()
        )?;
        writeln!(
            writer,
            "{}- Number of calls: {}",
            detail_indent,
            leak.partitions.len()
        )?;
        for &root in &leak.partitions {
            writeln!(writer, "{}{}", detail_indent, partition_label(report, root))?;
            render_partition_children(writer, report, root, &detail_indent)?;
        }
    }

    for &child in node.children() {
        if report.call_stack(child).is_interesting() {
            render_stack(writer, report, formatter, child, depth + 1)?;
        }
    }

    Ok(())
}

/// Render partition children with box-drawing connectors
///
/// **Private** - internal rendering
fn render_partition_children(
    writer: &mut impl Write,
    report: &LeakageReport,
    node: PartitionNodeId,
    prefix: &str,
) -> io::Result<()> {
    let children = &report.partition(node).children;
    for (position, &child) in children.iter().enumerate() {
        let last = position + 1 == children.len();
        let connector = if last { "└── " } else { "├── " };
        writeln!(
            writer,
            "{}{}{}",
            prefix,
            connector,
            partition_label(report, child)
        )?;

        let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
        render_partition_children(writer, report, child, &child_prefix)?;
    }
    Ok(())
}

/// Text of one partition node, with the dummy tag when inherited
///
/// **Private** - internal rendering
fn partition_label(report: &LeakageReport, id: PartitionNodeId) -> String {
    let node = report.partition(id);
    let tag = if node.dummy { "[M] " } else { "" };
    format!(
        "{}{} ({} total)",
        tag,
        format_id_sequence(node.testcases.iter()),
        node.testcases.count()
    )
}
