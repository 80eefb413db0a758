//! Content hashing and cache key derivation.
//!
//! A [`CacheKey`] addresses one compiled artifact in the cache: the XXH3-128
//! hash of the canonicalized source graph content, the compiled-code version,
//! and every output-affecting compile option. Options that only change
//! pipeline behavior (cache toggles, disk spill, reference gathering, bulk
//! representation) are excluded, so toggling them re-uses cached output.

use crate::artifact::CODE_VERSION;
use crate::catalog::SourceGraph;
use crate::compiler::CompileOptions;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit XXH3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hashes a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(data).to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Content-addressed key for one compiled artifact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Derives the key for compiling `graph` with `options`.
    ///
    /// Deterministic: the same graph content and the same output-affecting
    /// options always produce the same key, regardless of node declaration
    /// order or pipeline-behavior toggles.
    pub fn build(graph: &SourceGraph, options: &CompileOptions) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(&CODE_VERSION.to_le_bytes());
        hasher.update(&graph.canonical_bytes());
        hasher.update(&options.key_material());
        Self(ContentHash(hasher.digest128().to_le_bytes()))
    }

    pub fn hash(&self) -> &ContentHash {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GraphNode, NodeKind, ParamValue};
    use crate::compiler::{BulkRepresentation, CompileOptions, OptimizationLevel};

    fn graph() -> SourceGraph {
        let mut graph = SourceGraph::new(1);
        graph.add_node(
            GraphNode::new(1, NodeKind::Mesh, "base").with_param("vertex_count", ParamValue::Int(64)),
        );
        graph.add_node(GraphNode::new(2, NodeKind::Output, "out").with_inputs(vec![1]));
        graph
    }

    #[test]
    fn test_key_is_deterministic() {
        let options = CompileOptions::default();
        assert_eq!(
            CacheKey::build(&graph(), &options),
            CacheKey::build(&graph(), &options)
        );
    }

    #[test]
    fn test_key_invariant_under_excluded_options() {
        let base = CompileOptions::default();
        let key = CacheKey::build(&graph(), &base);

        let toggles = [
            CompileOptions {
                disk_spill_enabled: true,
                ..base.clone()
            },
            CompileOptions {
                cache_query_enabled: false,
                ..base.clone()
            },
            CompileOptions {
                cache_store_enabled: false,
                ..base.clone()
            },
            CompileOptions {
                gather_references_enabled: true,
                ..base.clone()
            },
            CompileOptions {
                bulk_representation: BulkRepresentation::SingleArchive,
                ..base.clone()
            },
        ];

        for toggled in toggles {
            assert_eq!(key, CacheKey::build(&graph(), &toggled));
        }
    }

    #[test]
    fn test_key_changes_with_output_options() {
        let base = CompileOptions::default();
        let key = CacheKey::build(&graph(), &base);

        let optimized = CompileOptions {
            optimization_level: OptimizationLevel::None,
            ..base
        };
        assert_ne!(key, CacheKey::build(&graph(), &optimized));
    }

    #[test]
    fn test_key_changes_with_graph_content() {
        let options = CompileOptions::default();
        let key = CacheKey::build(&graph(), &options);

        let mut edited = graph();
        edited.nodes[0].params[0].value = ParamValue::Int(65);
        assert_ne!(key, CacheKey::build(&edited, &options));
    }

    #[test]
    fn test_content_hash_display() {
        let hash = ContentHash::from_bytes(b"payload");
        let rendered = format!("{hash}");
        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
