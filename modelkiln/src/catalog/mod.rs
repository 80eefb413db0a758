//! Asset catalog: the registry of compilable procedural assets.
//!
//! The catalog tracks every known asset, its source graph, its load state and
//! the currently installed (committed) model. It also models the prerequisite
//! indexing service the orchestrator depends on: compilation cannot pop
//! requests while the catalog is still indexing, and a blocking tick forces
//! indexing to finish synchronously.
//!
//! Deployment-cook artifacts are stashed per (asset, platform) instead of
//! replacing the live model.

mod graph;

pub use graph::{GraphNode, NodeKind, Param, ParamValue, SourceGraph};

use crate::artifact::{CompiledArtifact, Model, ModelResources};
use crate::cache::ContentHash;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identity of a compilable asset.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Load state of a catalog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetState {
    /// The asset's packages are still loading; requests skip it in place.
    Loading,
    /// Loaded, no compiled model installed.
    NoModel,
    /// Loaded with a compiled model installed.
    ModelLoaded,
}

struct AssetEntry {
    graph: SourceGraph,
    state: AssetState,
    model: Option<Arc<Model>>,
    resources: Option<Arc<ModelResources>>,
    /// Content hash of the graph the installed model was compiled from.
    compiled_hash: Option<ContentHash>,
}

/// Registry of assets known to the compiler.
#[derive(Default)]
pub struct AssetCatalog {
    entries: DashMap<AssetId, AssetEntry>,
    indexing: AtomicBool,
    cooked: DashMap<(AssetId, &'static str), CompiledArtifact>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asset in the `NoModel` state.
    pub fn insert(&self, id: AssetId, graph: SourceGraph) {
        self.entries.insert(
            id,
            AssetEntry {
                graph,
                state: AssetState::NoModel,
                model: None,
                resources: None,
                compiled_hash: None,
            },
        );
    }

    /// Registers an asset whose packages are still loading.
    pub fn insert_loading(&self, id: AssetId, graph: SourceGraph) {
        self.insert(id.clone(), graph);
        self.set_state(&id, AssetState::Loading);
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn state(&self, id: &AssetId) -> Option<AssetState> {
        self.entries.get(id).map(|e| e.state)
    }

    pub fn set_state(&self, id: &AssetId, state: AssetState) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.state = state;
        }
    }

    /// Clones the asset's source graph.
    pub fn graph(&self, id: &AssetId) -> Option<SourceGraph> {
        self.entries.get(id).map(|e| e.graph.clone())
    }

    /// Replaces the asset's source graph, e.g. after an edit.
    pub fn update_graph(&self, id: &AssetId, graph: SourceGraph) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.graph = graph;
        }
    }

    /// True if a compiled model is installed for the asset.
    pub fn is_compiled(&self, id: &AssetId) -> bool {
        self.entries
            .get(id)
            .map(|e| e.model.is_some())
            .unwrap_or(false)
    }

    pub fn installed_model(&self, id: &AssetId) -> Option<Arc<Model>> {
        self.entries.get(id).and_then(|e| e.model.clone())
    }

    pub fn installed_resources(&self, id: &AssetId) -> Option<Arc<ModelResources>> {
        self.entries.get(id).and_then(|e| e.resources.clone())
    }

    /// Commits a freshly compiled model to the asset.
    pub fn install(
        &self,
        id: &AssetId,
        model: Arc<Model>,
        resources: Arc<ModelResources>,
        compiled_hash: ContentHash,
    ) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.model = Some(model);
            entry.resources = Some(resources);
            entry.compiled_hash = Some(compiled_hash);
            entry.state = AssetState::ModelLoaded;
            debug!(asset = %id, "installed compiled model");
        }
    }

    /// Drops any installed model, e.g. after a failed compile.
    pub fn clear_installed(&self, id: &AssetId) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.model = None;
            entry.resources = None;
            entry.compiled_hash = None;
            if entry.state == AssetState::ModelLoaded {
                entry.state = AssetState::NoModel;
            }
        }
    }

    /// True if the installed model no longer matches the current graph
    /// content (or no model is installed at all).
    pub fn is_out_of_date(&self, id: &AssetId) -> bool {
        match self.entries.get(id) {
            Some(entry) => match entry.compiled_hash {
                Some(hash) => hash != ContentHash::from_bytes(&entry.graph.canonical_bytes()),
                None => true,
            },
            None => true,
        }
    }

    // -- Prerequisite indexing ---------------------------------------------

    /// Marks the catalog as (re)indexing. While indexing, no compile request
    /// is popped.
    pub fn begin_indexing(&self) {
        self.indexing.store(true, Ordering::Release);
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::Acquire)
    }

    /// Forces indexing to finish synchronously.
    pub fn finish_indexing(&self) {
        if self.indexing.swap(false, Ordering::AcqRel) {
            debug!("catalog indexing forced to completion");
        }
    }

    // -- Deployment cook stash ---------------------------------------------

    /// Stashes a deployment-cook artifact for later packaging.
    pub fn stash_cooked(&self, id: &AssetId, platform: &'static str, artifact: CompiledArtifact) {
        self.cooked.insert((id.clone(), platform), artifact);
    }

    /// Removes and returns the stashed cook artifact for (asset, platform).
    pub fn take_cooked(&self, id: &AssetId, platform: &'static str) -> Option<CompiledArtifact> {
        self.cooked
            .remove(&(id.clone(), platform))
            .map(|(_, artifact)| artifact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
