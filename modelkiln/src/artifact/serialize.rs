//! Bit-exact binary codec for compiled artifacts.
//!
//! The persisted layout is a contract with the runtime and with the cache:
//! model blob, resources blob, the ordered block index, the file table, then
//! each file's bytes in plan order — raw block concatenation, no padding.
//! Encoding the same artifact twice must produce identical bytes, so every
//! field is written explicitly in little-endian order and every collection is
//! iterated in its fixed order. No serde here.

use super::{
    CompiledArtifact, DataKind, Model, ModelResources, StreamFile, StreamableBlock,
    StreamableIndex, SurfaceProperties,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// Magic bytes opening a packaged artifact.
pub const ARTIFACT_MAGIC: [u8; 4] = *b"MKLN";

/// Bumped on any layout change.
pub const ARTIFACT_FORMAT_VERSION: u16 = 3;

/// Errors produced while decoding artifact bytes.
#[derive(Debug, Error)]
pub enum ArtifactCodecError {
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("bad artifact magic")]
    BadMagic,

    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid {0} value")]
    InvalidValue(&'static str),
}

// ---------------------------------------------------------------------------
// Little-endian reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ArtifactCodecError> {
        if self.pos + n > self.data.len() {
            return Err(ArtifactCodecError::Truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ArtifactCodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ArtifactCodecError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ArtifactCodecError> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, ArtifactCodecError> {
        let bytes = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, what: &'static str) -> Result<String, ArtifactCodecError> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ArtifactCodecError::InvalidValue(what))
    }
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub fn encode_model(model: &Model) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + model.bytes.len());
    out.extend_from_slice(&model.code_version.to_le_bytes());
    out.extend_from_slice(&(model.bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&model.bytes);
    out
}

pub fn decode_model(data: &[u8]) -> Result<Model, ArtifactCodecError> {
    let mut reader = Reader::new(data);
    let code_version = reader.u32("model code version")?;
    let len = reader.u64("model length")? as usize;
    let bytes = reader.take(len, "model bytes")?.to_vec();
    Ok(Model {
        code_version,
        bytes,
    })
}

// ---------------------------------------------------------------------------
// ModelResources
// ---------------------------------------------------------------------------

pub fn encode_resources(resources: &ModelResources) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&resources.code_version.to_le_bytes());

    let mut bits = 0u8;
    if resources.optimized {
        bits |= 1;
    }
    if resources.hd_textures {
        bits |= 2;
    }
    out.push(bits);

    out.extend_from_slice(&(resources.referenced_assets.len() as u32).to_le_bytes());
    for path in &resources.referenced_assets {
        put_string(&mut out, path);
    }

    out.extend_from_slice(&(resources.surfaces.len() as u32).to_le_bytes());
    for surface in &resources.surfaces {
        put_string(&mut out, &surface.name);
        out.push(surface.lod_count);
        out.push(u8::from(surface.high_res));
    }

    out.extend_from_slice(&(resources.streamed_lod_counts.len() as u32).to_le_bytes());
    for (component, count) in &resources.streamed_lod_counts {
        put_string(&mut out, component);
        out.push(*count);
    }

    out
}

pub fn decode_resources(data: &[u8]) -> Result<ModelResources, ArtifactCodecError> {
    let mut reader = Reader::new(data);
    let code_version = reader.u32("resources code version")?;
    let bits = reader.u8("resources flags")?;

    let ref_count = reader.u32("referenced asset count")? as usize;
    let mut referenced_assets = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        referenced_assets.push(reader.string("referenced asset")?);
    }

    let surface_count = reader.u32("surface count")? as usize;
    let mut surfaces = Vec::with_capacity(surface_count);
    for _ in 0..surface_count {
        let name = reader.string("surface name")?;
        let lod_count = reader.u8("surface lod count")?;
        let high_res = reader.u8("surface high res")? != 0;
        surfaces.push(SurfaceProperties {
            name,
            lod_count,
            high_res,
        });
    }

    let lod_entries = reader.u32("streamed lod count")? as usize;
    let mut streamed_lod_counts = BTreeMap::new();
    for _ in 0..lod_entries {
        let component = reader.string("component name")?;
        let count = reader.u8("component lod count")?;
        streamed_lod_counts.insert(component, count);
    }

    Ok(ModelResources {
        code_version,
        referenced_assets,
        surfaces,
        streamed_lod_counts,
        optimized: bits & 1 != 0,
        hd_textures: bits & 2 != 0,
    })
}

// ---------------------------------------------------------------------------
// Streamable block index
// ---------------------------------------------------------------------------

/// Encodes the block index in its fixed iteration order:
/// per entry `{kind u8, id u32, source_id u32, file_id u32, offset u64,
/// size u32, flags u16}`.
pub fn encode_index(index: &StreamableIndex) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + index.len() * 27);
    out.extend_from_slice(&(index.len() as u32).to_le_bytes());
    for block in index.iter() {
        out.push(block.data_kind.as_u8());
        out.extend_from_slice(&block.id.to_le_bytes());
        out.extend_from_slice(&block.source_id.to_le_bytes());
        out.extend_from_slice(&block.file_id.to_le_bytes());
        out.extend_from_slice(&block.offset.to_le_bytes());
        out.extend_from_slice(&block.size.to_le_bytes());
        out.extend_from_slice(&block.flags.to_le_bytes());
    }
    out
}

pub fn decode_index(data: &[u8]) -> Result<StreamableIndex, ArtifactCodecError> {
    let mut reader = Reader::new(data);
    let count = reader.u32("index entry count")? as usize;
    let mut index = StreamableIndex::new();
    for _ in 0..count {
        let kind = DataKind::from_u8(reader.u8("block data kind")?)
            .ok_or(ArtifactCodecError::InvalidValue("block data kind"))?;
        let id = reader.u32("block id")?;
        let source_id = reader.u32("block source id")?;
        let file_id = reader.u32("block file id")?;
        let offset = reader.u64("block offset")?;
        let size = reader.u32("block size")?;
        let block_flags = reader.u16("block flags")?;
        index.insert(StreamableBlock {
            id,
            data_kind: kind,
            source_id,
            file_id,
            offset,
            size,
            flags: block_flags,
        });
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// File table
// ---------------------------------------------------------------------------

pub fn encode_file_table(files: &[StreamFile]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    for file in files {
        out.extend_from_slice(&file.file_id.to_le_bytes());
        out.push(file.data_kind.as_u8());
        out.extend_from_slice(&file.flags.to_le_bytes());
        out.extend_from_slice(&(file.blocks.len() as u32).to_le_bytes());
        for block in &file.blocks {
            out.extend_from_slice(&block.id.to_le_bytes());
            out.extend_from_slice(&block.source_id.to_le_bytes());
            out.extend_from_slice(&block.offset.to_le_bytes());
            out.extend_from_slice(&block.size.to_le_bytes());
            out.extend_from_slice(&block.flags.to_le_bytes());
        }
    }
    out
}

pub fn decode_file_table(data: &[u8]) -> Result<Vec<StreamFile>, ArtifactCodecError> {
    let mut reader = Reader::new(data);
    let count = reader.u32("file count")? as usize;
    let mut files = Vec::with_capacity(count);
    for _ in 0..count {
        let file_id = reader.u32("file id")?;
        let data_kind = DataKind::from_u8(reader.u8("file data kind")?)
            .ok_or(ArtifactCodecError::InvalidValue("file data kind"))?;
        let file_flags = reader.u16("file flags")?;
        let block_count = reader.u32("file block count")? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let id = reader.u32("file block id")?;
            let source_id = reader.u32("file block source id")?;
            let offset = reader.u64("file block offset")?;
            let size = reader.u32("file block size")?;
            let block_flags = reader.u16("file block flags")?;
            blocks.push(StreamableBlock {
                id,
                data_kind,
                source_id,
                file_id: 0, // plan position; re-derived below by the caller
                offset,
                size,
                flags: block_flags,
            });
        }
        files.push(StreamFile {
            file_id,
            data_kind,
            flags: file_flags,
            blocks,
        });
    }

    // Restore plan positions into the member blocks.
    for (position, file) in files.iter_mut().enumerate() {
        for block in &mut file.blocks {
            block.file_id = position as u32;
        }
    }

    Ok(files)
}

// ---------------------------------------------------------------------------
// Full package
// ---------------------------------------------------------------------------

/// Parsed package header, enough to describe the layout without decoding the
/// payload sections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageHeader {
    pub format_version: u16,
    pub model_len: u64,
    pub resources_len: u64,
    pub index_len: u64,
    pub file_table_len: u64,
    pub file_count: u32,
}

/// Serializes a complete artifact: header, model blob, resources blob,
/// ordered index, file table, then each planned file's raw bytes in order.
///
/// Returns `None` if the artifact is incomplete or any file payload is
/// missing from the staging store.
pub fn write_package(artifact: &CompiledArtifact) -> Option<Vec<u8>> {
    let model = artifact.model.as_ref()?;
    let resources = artifact.resources.as_ref()?;

    let model_blob = encode_model(model);
    let resources_blob = encode_resources(resources);
    let index_blob = encode_index(&artifact.index);
    let file_table_blob = encode_file_table(&artifact.files);

    let mut out = Vec::new();
    out.extend_from_slice(&ARTIFACT_MAGIC);
    out.extend_from_slice(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(model_blob.len() as u64).to_le_bytes());
    out.extend_from_slice(&(resources_blob.len() as u64).to_le_bytes());
    out.extend_from_slice(&(index_blob.len() as u64).to_le_bytes());
    out.extend_from_slice(&(file_table_blob.len() as u64).to_le_bytes());
    out.extend_from_slice(&(artifact.files.len() as u32).to_le_bytes());

    out.extend_from_slice(&model_blob);
    out.extend_from_slice(&resources_blob);
    out.extend_from_slice(&index_blob);
    out.extend_from_slice(&file_table_blob);

    for file in &artifact.files {
        let bytes = artifact.file_bytes(file)?;
        out.extend_from_slice(&bytes);
    }

    Some(out)
}

/// Reads and validates a package header.
pub fn read_package_header(data: &[u8]) -> Result<PackageHeader, ArtifactCodecError> {
    let mut reader = Reader::new(data);
    let magic = reader.take(4, "magic")?;
    if magic != ARTIFACT_MAGIC {
        return Err(ArtifactCodecError::BadMagic);
    }
    let format_version = reader.u16("format version")?;
    if format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ArtifactCodecError::UnsupportedVersion(format_version));
    }
    Ok(PackageHeader {
        format_version,
        model_len: reader.u64("model length")?,
        resources_len: reader.u64("resources length")?,
        index_len: reader.u64("index length")?,
        file_table_len: reader.u64("file table length")?,
        file_count: reader.u32("file count")?,
    })
}
