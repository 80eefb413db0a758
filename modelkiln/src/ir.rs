//! Intermediate representation and graph lowering.
//!
//! Lowering converts a declarative [`SourceGraph`] into the flat [`IrProgram`]
//! the compile worker consumes. The pass is synchronous and runs on the
//! controlling thread right after asset preload; everything heavier happens
//! in the worker. The [`GraphCompiler`] trait is the seam to the external
//! graph compiler — the default implementation covers the built-in node
//! kinds, tests substitute their own.
//!
//! Diagnostics are collected in the [`LowerContext`], never thrown. A cycle
//! or a missing root aborts lowering with an error diagnostic and `None`.

use crate::catalog::{NodeKind, ParamValue, SourceGraph};
use crate::diagnostics::{Diagnostic, DiagnosticLog};

/// One IR operation, in dependency order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrOp {
    EmitGeometry {
        source_node: u32,
        vertex_count: u32,
    },
    EmitTexture {
        source_node: u32,
        width: u32,
        height: u32,
        high_res: bool,
    },
    EmitAttachment {
        source_node: u32,
        size: u32,
    },
    /// Blend of previously emitted inputs.
    Mix {
        source_node: u32,
        inputs: Vec<u32>,
    },
    /// Static selection between previously emitted inputs.
    Select {
        source_node: u32,
        chosen: u32,
    },
}

impl IrOp {
    pub fn source_node(&self) -> u32 {
        match self {
            Self::EmitGeometry { source_node, .. }
            | Self::EmitTexture { source_node, .. }
            | Self::EmitAttachment { source_node, .. }
            | Self::Mix { source_node, .. }
            | Self::Select { source_node, .. } => *source_node,
        }
    }
}

/// The lowered program: operations in deterministic post-order from the
/// graph root, inputs before their consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IrProgram {
    pub ops: Vec<IrOp>,
}

impl IrProgram {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Mutable context threaded through lowering.
#[derive(Debug, Default)]
pub struct LowerContext {
    pub diagnostics: DiagnosticLog,
    /// External asset paths referenced by visited nodes; only collected when
    /// `gather_references` is set.
    pub referenced_assets: Vec<String>,
    pub gather_references: bool,
}

impl LowerContext {
    pub fn new(gather_references: bool) -> Self {
        Self {
            gather_references,
            ..Self::default()
        }
    }
}

/// The external graph compiler seam.
pub trait GraphCompiler: Send + Sync {
    /// Lowers `graph` into IR. Returns `None` on terminal lowering failure;
    /// the reason is recorded in `ctx.diagnostics`.
    fn lower(&self, graph: &SourceGraph, ctx: &mut LowerContext) -> Option<IrProgram>;
}

/// Default lowering over the built-in node kinds.
#[derive(Debug, Default, Clone)]
pub struct DefaultGraphCompiler;

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    InProgress,
    Done,
}

impl GraphCompiler for DefaultGraphCompiler {
    fn lower(&self, graph: &SourceGraph, ctx: &mut LowerContext) -> Option<IrProgram> {
        let Some(root) = graph.root() else {
            ctx.diagnostics
                .add(Diagnostic::error("no root output node found; graph not built"));
            return None;
        };

        let mut program = IrProgram::default();
        let mut visits = std::collections::HashMap::new();
        if !lower_node(graph, root.id, &mut visits, &mut program, ctx) {
            return None;
        }

        // Nodes never reached from the root do not contribute to the output;
        // flag them so authors notice dead branches.
        for node in &graph.nodes {
            if !visits.contains_key(&node.id) {
                ctx.diagnostics.add(Diagnostic::with_context(
                    crate::diagnostics::Severity::Warning,
                    "node is not reachable from the output node",
                    format!("node:{}", node.name),
                ));
            }
        }

        Some(program)
    }
}

fn lower_node(
    graph: &SourceGraph,
    node_id: u32,
    visits: &mut std::collections::HashMap<u32, Visit>,
    program: &mut IrProgram,
    ctx: &mut LowerContext,
) -> bool {
    match visits.get(&node_id) {
        Some(Visit::Done) => return true,
        Some(Visit::InProgress) => {
            ctx.diagnostics.add(Diagnostic::with_context(
                crate::diagnostics::Severity::Error,
                "cycle detected in the source graph; graph not built",
                format!("node:{node_id}"),
            ));
            return false;
        }
        None => {}
    }

    let Some(node) = graph.node(node_id) else {
        ctx.diagnostics.add(Diagnostic::error(format!(
            "input references missing node {node_id}; graph not built"
        )));
        return false;
    };

    visits.insert(node_id, Visit::InProgress);

    for input in &node.inputs {
        if !lower_node(graph, *input, visits, program, ctx) {
            return false;
        }
    }

    if node.name.is_empty() {
        ctx.diagnostics.add(Diagnostic::with_context(
            crate::diagnostics::Severity::Warning,
            "unnamed node",
            format!("node:{node_id}"),
        ));
    }

    if ctx.gather_references {
        for param in &node.params {
            if let ParamValue::AssetRef(path) = &param.value {
                if !ctx.referenced_assets.contains(path) {
                    ctx.referenced_assets.push(path.clone());
                }
            }
        }
    }

    match node.kind {
        NodeKind::Output => {
            // The root has no operation of its own; its inputs are the
            // program.
        }
        NodeKind::Mesh => {
            let vertex_count = node.int_param("vertex_count").unwrap_or(0).max(0) as u32;
            if vertex_count == 0 {
                ctx.diagnostics.add(Diagnostic::with_context(
                    crate::diagnostics::Severity::Warning,
                    "mesh node emits no vertices",
                    format!("node:{}", node.name),
                ));
            }
            program.ops.push(IrOp::EmitGeometry {
                source_node: node_id,
                vertex_count,
            });
        }
        NodeKind::Texture => {
            let width = node.int_param("width").unwrap_or(256).max(1) as u32;
            let height = node.int_param("height").unwrap_or(256).max(1) as u32;
            let high_res = node.bool_param("high_res").unwrap_or(false);
            program.ops.push(IrOp::EmitTexture {
                source_node: node_id,
                width,
                height,
                high_res,
            });
        }
        NodeKind::Attachment => {
            let size = node.int_param("size").unwrap_or(0).max(0) as u32;
            program.ops.push(IrOp::EmitAttachment {
                source_node: node_id,
                size,
            });
        }
        NodeKind::Blend => {
            program.ops.push(IrOp::Mix {
                source_node: node_id,
                inputs: node.inputs.clone(),
            });
        }
        NodeKind::Switch => {
            let chosen = node.int_param("selected").unwrap_or(0).max(0) as u32;
            program.ops.push(IrOp::Select {
                source_node: node_id,
                chosen,
            });
        }
    }

    visits.insert(node_id, Visit::Done);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GraphNode, NodeKind, ParamValue};
    use crate::diagnostics::CompileResult;

    fn mesh(id: u32, name: &str, vertices: i64) -> GraphNode {
        GraphNode::new(id, NodeKind::Mesh, name).with_param("vertex_count", ParamValue::Int(vertices))
    }

    fn linear_graph() -> SourceGraph {
        let mut graph = SourceGraph::new(1);
        graph.add_node(mesh(1, "base", 100));
        graph.add_node(
            GraphNode::new(2, NodeKind::Texture, "skin")
                .with_param("width", ParamValue::Int(64))
                .with_param("height", ParamValue::Int(64)),
        );
        graph.add_node(GraphNode::new(3, NodeKind::Blend, "blend").with_inputs(vec![1, 2]));
        graph.add_node(GraphNode::new(4, NodeKind::Output, "out").with_inputs(vec![3]));
        graph
    }

    #[test]
    fn test_lowering_emits_in_dependency_order() {
        let mut ctx = LowerContext::new(false);
        let program = DefaultGraphCompiler.lower(&linear_graph(), &mut ctx).unwrap();

        let sources: Vec<u32> = program.ops.iter().map(IrOp::source_node).collect();
        assert_eq!(sources, vec![1, 2, 3]);
        assert_eq!(ctx.diagnostics.result(), CompileResult::Success);
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let graph = linear_graph();
        let mut ctx_a = LowerContext::new(false);
        let mut ctx_b = LowerContext::new(false);
        assert_eq!(
            DefaultGraphCompiler.lower(&graph, &mut ctx_a),
            DefaultGraphCompiler.lower(&graph, &mut ctx_b)
        );
    }

    #[test]
    fn test_cycle_is_terminal() {
        let mut graph = SourceGraph::new(1);
        graph.add_node(GraphNode::new(1, NodeKind::Blend, "a").with_inputs(vec![2]));
        graph.add_node(GraphNode::new(2, NodeKind::Blend, "b").with_inputs(vec![1]));
        graph.add_node(GraphNode::new(3, NodeKind::Output, "out").with_inputs(vec![1]));

        let mut ctx = LowerContext::new(false);
        assert!(DefaultGraphCompiler.lower(&graph, &mut ctx).is_none());
        assert_eq!(ctx.diagnostics.result(), CompileResult::Errors);
    }

    #[test]
    fn test_missing_root_is_terminal() {
        let mut graph = SourceGraph::new(1);
        graph.add_node(mesh(1, "base", 10));

        let mut ctx = LowerContext::new(false);
        assert!(DefaultGraphCompiler.lower(&graph, &mut ctx).is_none());
        assert!(ctx.diagnostics.error_count() > 0);
    }

    #[test]
    fn test_orphan_nodes_warn() {
        let mut graph = linear_graph();
        graph.add_node(mesh(9, "dead-branch", 5));

        let mut ctx = LowerContext::new(false);
        let program = DefaultGraphCompiler.lower(&graph, &mut ctx).unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(ctx.diagnostics.result(), CompileResult::Warnings);
    }

    #[test]
    fn test_zero_vertex_mesh_warns() {
        let mut graph = SourceGraph::new(1);
        graph.add_node(mesh(1, "empty", 0));
        graph.add_node(GraphNode::new(2, NodeKind::Output, "out").with_inputs(vec![1]));

        let mut ctx = LowerContext::new(false);
        DefaultGraphCompiler.lower(&graph, &mut ctx).unwrap();
        assert_eq!(ctx.diagnostics.result(), CompileResult::Warnings);
    }

    #[test]
    fn test_reference_gathering_is_opt_in() {
        let mut graph = linear_graph();
        graph.nodes[0]
            .params
            .push(crate::catalog::Param::new("source", ParamValue::AssetRef("meshes/base".into())));

        let mut without = LowerContext::new(false);
        DefaultGraphCompiler.lower(&graph, &mut without).unwrap();
        assert!(without.referenced_assets.is_empty());

        let mut with = LowerContext::new(true);
        DefaultGraphCompiler.lower(&graph, &mut with).unwrap();
        assert_eq!(with.referenced_assets, vec!["meshes/base".to_string()]);
    }

    #[test]
    fn test_shared_input_emitted_once() {
        let mut graph = SourceGraph::new(1);
        graph.add_node(mesh(1, "base", 10));
        graph.add_node(GraphNode::new(2, NodeKind::Blend, "left").with_inputs(vec![1]));
        graph.add_node(GraphNode::new(3, NodeKind::Blend, "right").with_inputs(vec![1]));
        graph.add_node(GraphNode::new(4, NodeKind::Output, "out").with_inputs(vec![2, 3]));

        let mut ctx = LowerContext::new(false);
        let program = DefaultGraphCompiler.lower(&graph, &mut ctx).unwrap();
        let geometry_ops = program
            .ops
            .iter()
            .filter(|op| matches!(op, IrOp::EmitGeometry { .. }))
            .count();
        assert_eq!(geometry_ops, 1);
    }
}
