//! Compiled artifact data model.
//!
//! A compile produces a [`CompiledArtifact`]: the opaque [`Model`] binary, a
//! [`ModelResources`] metadata side-table, an index of streamable payload
//! blocks, the generated file plan, and a staging store holding the block
//! bytes until they are packaged. The artifact is created when a request
//! enters the pipeline, populated progressively by the stages, committed to
//! the catalog on success and discarded otherwise.

mod serialize;

pub use serialize::{
    decode_file_table, decode_index, decode_model, decode_resources, encode_file_table,
    encode_index, encode_model, encode_resources, read_package_header, write_package,
    ArtifactCodecError, PackageHeader, ARTIFACT_FORMAT_VERSION, ARTIFACT_MAGIC,
};

use std::collections::BTreeMap;

/// Version stamp baked into compiled output. Bumping it invalidates every
/// cache entry, since it participates in key derivation.
pub const CODE_VERSION: u32 = 7;

/// Kind of bulk payload a streamable block carries.
///
/// Blocks of different kinds never share a packaged file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataKind {
    /// Generated geometry payloads.
    Geometry,
    /// Generated texture payloads.
    Texture,
    /// Auxiliary per-surface payloads (attachment data).
    Attachment,
}

impl Default for DataKind {
    fn default() -> Self {
        Self::Geometry
    }
}

impl DataKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Geometry => 0,
            Self::Texture => 1,
            Self::Attachment => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Geometry),
            1 => Some(Self::Texture),
            2 => Some(Self::Attachment),
            _ => None,
        }
    }
}

/// Block/file flag bits.
pub mod flags {
    /// Payload is only needed at the highest detail tier; packaged into the
    /// optional bucket so deployments can ship it separately.
    pub const HIGH_RES: u16 = 1 << 0;
}

/// The compiled, runtime-consumable binary.
///
/// Opaque to everything except the compile worker that produced it and the
/// runtime that consumes it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub code_version: u32,
    pub bytes: Vec<u8>,
}

impl Model {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            code_version: CODE_VERSION,
            bytes,
        }
    }
}

/// Per-surface properties recorded in the resources side-table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceProperties {
    pub name: String,
    pub lod_count: u8,
    pub high_res: bool,
}

/// Metadata side-table accompanying a [`Model`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResources {
    pub code_version: u32,
    /// Runtime-referenced external assets, in first-use order.
    pub referenced_assets: Vec<String>,
    pub surfaces: Vec<SurfaceProperties>,
    /// Streaming LOD counts per component name.
    pub streamed_lod_counts: BTreeMap<String, u8>,
    /// Compiled at the maximum optimization level.
    pub optimized: bool,
    /// Compiled with the high-quality texture tier.
    pub hd_textures: bool,
}

impl ModelResources {
    pub fn new() -> Self {
        Self {
            code_version: CODE_VERSION,
            ..Self::default()
        }
    }
}

/// An addressable chunk of bulk binary payload.
///
/// `file_id` is the position of the owning file in the artifact's file plan;
/// `offset` is the block's byte offset inside that file. Both are assigned by
/// the streaming file planner and are zero until planning runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamableBlock {
    /// Resource id; unique within a data kind.
    pub id: u32,
    pub data_kind: DataKind,
    /// Id of the graph node the payload originated from. Drives grouping in
    /// the count-limited planner.
    pub source_id: u32,
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
    pub flags: u16,
}

/// Ordered index of every streamable block, keyed by resource id per kind.
///
/// Iteration order is fixed (kind, then id), which the planner and the
/// artifact codec rely on for determinism.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamableIndex {
    blocks: BTreeMap<(DataKind, u32), StreamableBlock>,
}

impl StreamableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: StreamableBlock) {
        self.blocks.insert((block.data_kind, block.id), block);
    }

    pub fn get(&self, kind: DataKind, id: u32) -> Option<&StreamableBlock> {
        self.blocks.get(&(kind, id))
    }

    pub fn get_mut(&mut self, kind: DataKind, id: u32) -> Option<&mut StreamableBlock> {
        self.blocks.get_mut(&(kind, id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamableBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total payload bytes across all blocks.
    pub fn total_size(&self) -> u64 {
        self.blocks.values().map(|b| u64::from(b.size)).sum()
    }
}

/// A packaging bucket: an ordered run of blocks concatenated into one file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamFile {
    /// Stable generated id, unique across the plan. Used to name the packaged
    /// file on disk; block `file_id` fields refer to plan positions instead.
    pub file_id: u32,
    pub data_kind: DataKind,
    pub flags: u16,
    /// Blocks in packaging order; offsets are cumulative over this order.
    pub blocks: Vec<StreamableBlock>,
}

impl StreamFile {
    /// Sum of the member block sizes; the exact packaged file size since
    /// blocks are concatenated with no padding.
    pub fn total_size(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.size)).sum()
    }
}

/// Staging store for streamable block bytes, keyed by (kind, block id).
///
/// Filled by the compile worker (or a phase-2 cache fetch) and drained when
/// files are packaged.
#[derive(Clone, Debug, Default)]
pub struct PayloadStore {
    data: BTreeMap<(DataKind, u32), Vec<u8>>,
}

impl PayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: DataKind, id: u32, bytes: Vec<u8>) {
        self.data.insert((kind, id), bytes);
    }

    pub fn get(&self, kind: DataKind, id: u32) -> Option<&[u8]> {
        self.data.get(&(kind, id)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Everything a compile produces, staged until commit.
#[derive(Clone, Debug, Default)]
pub struct CompiledArtifact {
    pub model: Option<Model>,
    pub resources: Option<ModelResources>,
    pub index: StreamableIndex,
    pub files: Vec<StreamFile>,
    pub payloads: PayloadStore,
}

impl CompiledArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the artifact holds a complete, committable result.
    pub fn is_complete(&self) -> bool {
        self.model.is_some() && self.resources.is_some()
    }

    /// Assembles the raw bytes of one planned file: the member blocks'
    /// payloads concatenated in block order, no padding.
    ///
    /// Returns `None` if any member block's payload is missing from the
    /// staging store.
    pub fn file_bytes(&self, file: &StreamFile) -> Option<Vec<u8>> {
        let mut bytes = Vec::with_capacity(file.total_size() as usize);
        for block in &file.blocks {
            let payload = self.payloads.get(block.data_kind, block.id)?;
            debug_assert_eq!(payload.len() as u64, u64::from(block.size));
            bytes.extend_from_slice(payload);
        }
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: DataKind, id: u32, size: u32) -> StreamableBlock {
        StreamableBlock {
            id,
            data_kind: kind,
            source_id: id,
            file_id: 0,
            offset: 0,
            size,
            flags: 0,
        }
    }

    #[test]
    fn test_index_iterates_in_fixed_order() {
        let mut index = StreamableIndex::new();
        index.insert(block(DataKind::Texture, 2, 10));
        index.insert(block(DataKind::Geometry, 7, 10));
        index.insert(block(DataKind::Geometry, 1, 10));

        let ids: Vec<(DataKind, u32)> = index.iter().map(|b| (b.data_kind, b.id)).collect();
        assert_eq!(
            ids,
            vec![
                (DataKind::Geometry, 1),
                (DataKind::Geometry, 7),
                (DataKind::Texture, 2),
            ]
        );
    }

    #[test]
    fn test_index_total_size() {
        let mut index = StreamableIndex::new();
        index.insert(block(DataKind::Geometry, 1, 100));
        index.insert(block(DataKind::Texture, 1, 50));
        assert_eq!(index.total_size(), 150);
    }

    #[test]
    fn test_file_bytes_concatenates_in_block_order() {
        let mut artifact = CompiledArtifact::new();
        artifact.payloads.set(DataKind::Geometry, 1, vec![1, 1, 1]);
        artifact.payloads.set(DataKind::Geometry, 2, vec![2, 2]);

        let file = StreamFile {
            file_id: 9,
            data_kind: DataKind::Geometry,
            flags: 0,
            blocks: vec![block(DataKind::Geometry, 1, 3), block(DataKind::Geometry, 2, 2)],
        };

        assert_eq!(artifact.file_bytes(&file), Some(vec![1, 1, 1, 2, 2]));
    }

    #[test]
    fn test_file_bytes_missing_payload() {
        let artifact = CompiledArtifact::new();
        let file = StreamFile {
            file_id: 0,
            data_kind: DataKind::Geometry,
            flags: 0,
            blocks: vec![block(DataKind::Geometry, 1, 3)],
        };
        assert_eq!(artifact.file_bytes(&file), None);
    }

    #[test]
    fn test_data_kind_round_trip() {
        for kind in [DataKind::Geometry, DataKind::Texture, DataKind::Attachment] {
            assert_eq!(DataKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(DataKind::from_u8(9), None);
    }
}
