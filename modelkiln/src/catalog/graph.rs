//! Declarative source graphs.
//!
//! A source graph is the versioned, node-based description of a procedural
//! asset. The graph is what authors edit and what the lowering pass consumes;
//! the compiler never sees it directly. Graphs carry a canonical byte
//! encoding used for content addressing: two graphs with equal canonical
//! bytes are the same content regardless of node declaration order.

use serde::{Deserialize, Serialize};

/// Kind of a graph node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The root output node; exactly one per valid graph.
    Output,
    /// Emits a geometry payload.
    Mesh,
    /// Emits a texture payload.
    Texture,
    /// Emits an auxiliary per-surface payload.
    Attachment,
    /// Blends its inputs.
    Blend,
    /// Selects one of its inputs.
    Switch,
}

impl NodeKind {
    fn as_u8(self) -> u8 {
        match self {
            Self::Output => 0,
            Self::Mesh => 1,
            Self::Texture => 2,
            Self::Attachment => 3,
            Self::Blend => 4,
            Self::Switch => 5,
        }
    }
}

/// A node parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Path of an external asset this node references.
    AssetRef(String),
}

/// A named node parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One node of a source graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique within the graph.
    pub id: u32,
    pub kind: NodeKind,
    pub name: String,
    pub params: Vec<Param>,
    /// Ids of input nodes, in pin order. Pin order is semantic.
    pub inputs: Vec<u32>,
}

impl GraphNode {
    pub fn new(id: u32, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            params: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<u32>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Looks up an integer parameter.
    pub fn int_param(&self, name: &str) -> Option<i64> {
        self.params.iter().find(|p| p.name == name).and_then(|p| {
            if let ParamValue::Int(v) = p.value {
                Some(v)
            } else {
                None
            }
        })
    }

    /// Looks up a boolean parameter.
    pub fn bool_param(&self, name: &str) -> Option<bool> {
        self.params.iter().find(|p| p.name == name).and_then(|p| {
            if let ParamValue::Bool(v) = p.value {
                Some(v)
            } else {
                None
            }
        })
    }
}

/// A complete versioned source graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceGraph {
    /// Author-facing content revision, bumped on every edit.
    pub version: u32,
    pub nodes: Vec<GraphNode>,
}

impl SourceGraph {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            nodes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    pub fn node(&self, id: u32) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The root output node, if the graph has exactly one.
    pub fn root(&self) -> Option<&GraphNode> {
        let mut roots = self.nodes.iter().filter(|n| n.kind == NodeKind::Output);
        let root = roots.next()?;
        if roots.next().is_some() {
            return None;
        }
        Some(root)
    }

    /// Paths of every external asset referenced by any node parameter.
    ///
    /// Sorted and deduplicated so the preload request set is deterministic.
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .nodes
            .iter()
            .flat_map(|n| n.params.iter())
            .filter_map(|p| {
                if let ParamValue::AssetRef(path) = &p.value {
                    Some(path.clone())
                } else {
                    None
                }
            })
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Canonical byte encoding for content addressing.
    ///
    /// Nodes are emitted sorted by id and parameters sorted by name, so
    /// declaration order does not change the encoding. Input pin order and
    /// every value bit do.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());

        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| self.nodes[i].id);

        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for i in order {
            let node = &self.nodes[i];
            out.extend_from_slice(&node.id.to_le_bytes());
            out.push(node.kind.as_u8());
            out.extend_from_slice(&(node.name.len() as u32).to_le_bytes());
            out.extend_from_slice(node.name.as_bytes());

            out.extend_from_slice(&(node.inputs.len() as u32).to_le_bytes());
            for input in &node.inputs {
                out.extend_from_slice(&input.to_le_bytes());
            }

            let mut params: Vec<&Param> = node.params.iter().collect();
            params.sort_by(|a, b| a.name.cmp(&b.name));
            out.extend_from_slice(&(params.len() as u32).to_le_bytes());
            for param in params {
                out.extend_from_slice(&(param.name.len() as u32).to_le_bytes());
                out.extend_from_slice(param.name.as_bytes());
                match &param.value {
                    ParamValue::Bool(v) => {
                        out.push(0);
                        out.push(u8::from(*v));
                    }
                    ParamValue::Int(v) => {
                        out.push(1);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    ParamValue::Float(v) => {
                        out.push(2);
                        out.extend_from_slice(&v.to_bits().to_le_bytes());
                    }
                    ParamValue::Text(v) => {
                        out.push(3);
                        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                        out.extend_from_slice(v.as_bytes());
                    }
                    ParamValue::AssetRef(v) => {
                        out.push(4);
                        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                        out.extend_from_slice(v.as_bytes());
                    }
                }
            }
        }
        out
    }
}
