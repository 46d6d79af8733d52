//! Optional debug dump of the full merged call tree.
//!
//! Preorder pretty-print with four spaces of indent per tree level.
//! Memory-access and allocation lines can be suppressed for large runs.

use crate::calltree::{AddressFormatter, CallTree, NodeId, NodeKind};
use crate::output::sequence::format_id_sequence;
use crate::utils::error::ReportError;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write the dump to a file, creating parent directories as needed
///
/// **Public** - main entry point for the dump
pub fn write_call_tree_dump_file(
    output_path: impl AsRef<Path>,
    tree: &CallTree,
    formatter: &AddressFormatter,
    include_memory_accesses: bool,
) -> Result<(), ReportError> {
    let output_path = output_path.as_ref();
    info!("Writing call tree dump to: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReportError::InvalidPath(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let file = File::create(output_path).map_err(ReportError::WriteFailed)?;
    let mut writer = BufWriter::new(file);
    write_call_tree_dump(&mut writer, tree, formatter, include_memory_accesses)?;
    Ok(())
}

/// Render the dump into any writer
///
/// **Public** - useful for tests and in-memory rendering
pub fn write_call_tree_dump(
    writer: &mut impl Write,
    tree: &CallTree,
    formatter: &AddressFormatter,
    include_memory_accesses: bool,
) -> io::Result<()> {
    render_node(writer, tree, formatter, tree.root(), 0, include_memory_accesses)
}

/// Render one node and its subtree
///
/// **Private** - internal rendering
fn render_node(
    writer: &mut impl Write,
    tree: &CallTree,
    formatter: &AddressFormatter,
    node: NodeId,
    depth: usize,
    include_memory_accesses: bool,
) -> io::Result<()> {
    let indent = "    ".repeat(depth);

    match tree.node(node).kind() {
        NodeKind::Root(_) => writeln!(writer, "{}@root", indent)?,
        NodeKind::Split(_) => writeln!(writer, "{}@split", indent)?,
        NodeKind::Call {
            source,
            target,
            call_stack_id,
            ..
        } => writeln!(
            writer,
            "{}#call {} -> {} (${:016x})",
            indent,
            formatter.format(*source),
            formatter.format(*target),
            call_stack_id
        )?,
        NodeKind::Branch {
            source,
            target,
            taken,
        } => {
            if *taken {
                writeln!(
                    writer,
                    "{}#branch {} -> {}",
                    indent,
                    formatter.format(*source),
                    formatter.format(*target)
                )?;
            } else {
                writeln!(
                    writer,
                    "{}#branch {} -> <?> (not taken)",
                    indent,
                    formatter.format(*source)
                )?;
            }
        }
        NodeKind::Return { source, target } => writeln!(
            writer,
            "{}#return {} -> {}",
            indent,
            formatter.format(*source),
            formatter.format(*target)
        )?,
        NodeKind::Allocation { id, size, heap } => {
            if include_memory_accesses {
                if *heap {
                    writeln!(writer, "{}#heapalloc H#{}, {} bytes", indent, id, size)?;
                } else {
                    writeln!(writer, "{}#stackalloc S#{}, {} bytes", indent, id, size)?;
                }
            }
        }
        NodeKind::MemoryAccess {
            instruction,
            is_write,
            targets,
        } => {
            if include_memory_accesses {
                writeln!(
                    writer,
                    "{}#memory {} {}",
                    indent,
                    formatter.format(*instruction),
                    if *is_write { "writes" } else { "reads" }
                )?;
                for (target, testcases) in targets {
                    writeln!(
                        writer,
                        "{}    {} : {} ({} total)",
                        indent,
                        formatter.format(*target),
                        format_id_sequence(testcases.iter()),
                        testcases.count()
                    )?;
                }
            }
        }
    }

    if let Some(data) = tree.node(node).split_data() {
        for &successor in &data.successors {
            render_node(writer, tree, formatter, successor, depth + 1, include_memory_accesses)?;
        }
        for &branch in &data.split_successors {
            render_node(writer, tree, formatter, branch, depth + 1, include_memory_accesses)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltree::TraceMerger;
    use crate::symbols::OffsetResolver;
    use crate::trace::{BranchKind, ImageFileInfo, TraceRecord};

    fn merged() -> TraceMerger {
        let mut merger = TraceMerger::new(Box::new(OffsetResolver));
        merger.register_images(&[ImageFileInfo {
            id: 0,
            low: 0,
            high: 0x10000,
            name: "a".to_string(),
        }]);
        merger.add_trace(
            0,
            vec![
                TraceRecord::branch(BranchKind::Call, (0, 0x10), (0, 0x20)),
                TraceRecord::HeapAllocation { id: 1, size: 16 },
                TraceRecord::HeapMemoryAccess {
                    is_write: false,
                    instruction_image: 0,
                    instruction_offset: 0x42,
                    heap_allocation: 1,
                    memory_offset: 0x8,
                },
                TraceRecord::branch(BranchKind::Return, (0, 0x25), (0, 0x11)),
            ],
        );
        merger
    }

    #[test]
    fn test_dump_markers() {
        let merger = merged();
        let mut buffer = Vec::new();
        write_call_tree_dump(&mut buffer, merger.tree(), merger.formatter(), true).unwrap();
        let dump = String::from_utf8(buffer).unwrap();

        assert!(dump.starts_with("@root\n"));
        assert!(dump.contains("#call a+0x10 -> a+0x20 ($"));
        assert!(dump.contains("#heapalloc H#2, 16 bytes"));
        assert!(dump.contains("#memory a+0x42 reads"));
        assert!(dump.contains("H#2+8 : 0 (1 total)"));
        assert!(dump.contains("#return a+0x25 -> a+0x11"));
    }

    #[test]
    fn test_dump_can_suppress_memory_lines() {
        let merger = merged();
        let mut buffer = Vec::new();
        write_call_tree_dump(&mut buffer, merger.tree(), merger.formatter(), false).unwrap();
        let dump = String::from_utf8(buffer).unwrap();

        assert!(!dump.contains("#memory"));
        assert!(!dump.contains("#heapalloc"));
        assert!(dump.contains("#call"));
    }
}
