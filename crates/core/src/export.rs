//! GDL (graph description language) export for external visualization.
//!
//! Read-only: the exporter never mutates the graph. Exporting before and
//! after a transform gives two files suitable for visual diffing. The format
//! has no consumer inside the core.

use crate::cfg::{CodeGraph, NodeId};
use crate::decoder::NodeKind;
use codegraph_utils::errors::ExportError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Serializes the graph to a GDL file at `path`, overwriting any existing
/// file.
///
/// A conditional jump without a taken edge is a hard inconsistency and fails
/// the export; a call without a taken edge is only reported. The asymmetry
/// is inherited from the graph builder's soft handling of call links.
pub fn export_gdl(graph: &CodeGraph, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let path = path.as_ref();

    // Validate before touching the file so a failed export leaves nothing
    // half-written.
    for id in graph.ids() {
        let node = graph.node(id);
        if node.kind == NodeKind::CondJump && node.taken.is_none() {
            return Err(ExportError::MissingBranchTarget(id.index()));
        }
    }

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    debug!("exporting graph to {}", path.display());

    writeln!(out, "graph: {{")?;
    writeln!(out, "manhattan_edges: yes")?;
    writeln!(out, "layoutalgorithm: mindepth")?;
    writeln!(out, "finetuning: no")?;
    writeln!(out, "layout_downfactor: 100")?;
    writeln!(out, "layout_upfactor: 0")?;
    writeln!(out, "layout_nearfactor: 0")?;
    writeln!(out)?;

    for id in graph.ids() {
        let node = graph.node(id);
        writeln!(
            out,
            "node: {{title: \"{}\" label: \"Offset: {} (size: {:x}) {}\"}}",
            id.index(),
            offset_label(graph, id),
            node.len(),
            kind_label(node.kind),
        )?;
    }
    writeln!(out)?;

    for id in graph.ids() {
        let node = graph.node(id);
        match node.kind {
            NodeKind::Line | NodeKind::Jump | NodeKind::Return | NodeKind::Label => {
                if let Some(target) = node.fallthrough {
                    writeln!(out, "{}", plain_edge(id, target))?;
                }
            }
            NodeKind::CondJump => {
                if let Some(target) = node.fallthrough {
                    writeln!(
                        out,
                        "edge: {{sourcename: \"{}\" targetname: \"{}\" label: \"false\" color: red}}",
                        id.index(),
                        target.index(),
                    )?;
                }
                // Checked by the validation pass above.
                if let Some(target) = node.taken {
                    writeln!(
                        out,
                        "edge: {{sourcename: \"{}\" targetname: \"{}\" label: \"true\" color: darkgreen}}",
                        id.index(),
                        target.index(),
                    )?;
                }
            }
            NodeKind::Call => {
                if let Some(target) = node.fallthrough {
                    writeln!(out, "{}", plain_edge(id, target))?;
                }
                match node.taken {
                    Some(target) => writeln!(
                        out,
                        "edge: {{sourcename: \"{}\" targetname: \"{}\" label: \"call\" color: blue}}",
                        id.index(),
                        target.index(),
                    )?,
                    None => warn!("call node {} has no taken edge", id.index()),
                }
            }
        }
    }

    writeln!(out, "}}")?;
    out.flush()?;

    debug!("exported {} nodes to {}", graph.node_count(), path.display());
    Ok(())
}

fn plain_edge(source: NodeId, target: NodeId) -> String {
    format!(
        "edge: {{sourcename: \"{}\" targetname: \"{}\"}}",
        source.index(),
        target.index()
    )
}

fn offset_label(graph: &CodeGraph, id: NodeId) -> String {
    match graph.node(id).position {
        Some(position) => format!("{position:#06x}"),
        None => "----".to_owned(),
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Line => "LINEAR CODE",
        NodeKind::Jump => "JMP",
        NodeKind::CondJump => "JCC",
        NodeKind::Call => "CALL",
        NodeKind::Return => "RET",
        NodeKind::Label => "LABEL",
    }
}
