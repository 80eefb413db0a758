//! Content-addressable cache client.
//!
//! The client owns the two-phase fetch protocol and the value partitioning;
//! the backend only moves bytes. Phase 1 pulls the four small descriptor
//! values under a payload-skipping policy, decompresses and decodes them and
//! validates that the block index resolves into the file table — for
//! interactive use that alone is a hit, payloads stream lazily later. Phase 2
//! runs only for deployment cooks: a full-policy fetch under the same key,
//! demultiplexed into the payload store using the file table as the map.
//!
//! Every failure on the fetch path — absent key, truncated value, failed
//! decompression, unresolvable index — is a cache miss, never an error.
//! Store failures are logged and dropped.

use super::backend::CacheBackend;
use super::key::CacheKey;
use super::types::{
    CacheError, CacheValueId, FetchHandle, FetchPolicy, FetchResponse, StoreHandle,
};
use crate::artifact::{
    decode_file_table, decode_index, decode_model, decode_resources, encode_file_table,
    encode_index, encode_model, encode_resources, CompiledArtifact, Model, ModelResources,
    PayloadStore, StreamFile, StreamableIndex, CODE_VERSION,
};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Descriptor values recovered by a phase-1 hit.
#[derive(Debug)]
pub struct CachedDescriptors {
    pub model: Model,
    pub resources: ModelResources,
    pub index: StreamableIndex,
    pub files: Vec<StreamFile>,
}

/// Outcome of finishing a phase-1 fetch.
#[derive(Debug)]
pub enum Phase1Outcome {
    Hit(CachedDescriptors),
    Miss,
}

/// Client over an injected [`CacheBackend`].
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Starts the phase-1 fetch: descriptor values only.
    pub fn begin_phase1(&self, key: &CacheKey) -> FetchHandle {
        self.backend.get(key, FetchPolicy::SkipPayloads)
    }

    /// Interprets a completed phase-1 fetch.
    pub fn finish_phase1(&self, handle: &mut FetchHandle, key: &CacheKey) -> Phase1Outcome {
        let Some(response) = handle.take_response() else {
            debug!(key = %key, "cache miss");
            return Phase1Outcome::Miss;
        };

        match decode_descriptors(response) {
            Ok(descriptors) => {
                debug!(key = %key, files = descriptors.files.len(), "cache hit (descriptors)");
                Phase1Outcome::Hit(descriptors)
            }
            Err(error) => {
                // Structurally unusable data falls through to a full compile.
                warn!(key = %key, %error, "discarding unusable cache entry");
                Phase1Outcome::Miss
            }
        }
    }

    /// Starts the phase-2 fetch: everything under the same key, payloads
    /// included.
    pub fn begin_phase2(&self, key: &CacheKey) -> FetchHandle {
        self.backend.get(key, FetchPolicy::Full)
    }

    /// Interprets a completed phase-2 fetch: demultiplexes the per-file
    /// payload blobs into `payloads` using `files` as the map.
    ///
    /// Returns false on any missing or undecodable value; the caller treats
    /// that as a miss and compiles from source.
    pub fn finish_phase2(
        &self,
        handle: &mut FetchHandle,
        key: &CacheKey,
        files: &[StreamFile],
        payloads: &mut PayloadStore,
    ) -> bool {
        let Some(mut response) = handle.take_response() else {
            debug!(key = %key, "cache miss on payload fetch");
            return false;
        };

        for (position, file) in files.iter().enumerate() {
            let Some(compressed) = response.take(CacheValueId::FilePayload(position as u32))
            else {
                warn!(key = %key, file = position, "cache entry is missing a file payload");
                return false;
            };

            let bytes = match decompress(&compressed) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(key = %key, file = position, %error, "discarding unusable cache entry");
                    return false;
                }
            };

            if bytes.len() as u64 != file.total_size() {
                warn!(key = %key, file = position, "cached file payload has the wrong size");
                return false;
            }

            for block in &file.blocks {
                let start = block.offset as usize;
                let end = start + block.size as usize;
                payloads.set(block.data_kind, block.id, bytes[start..end].to_vec());
            }
        }

        debug!(key = %key, files = files.len(), "cache hit (full payloads)");
        true
    }

    /// Serializes `artifact` into its named values and issues a background
    /// put. Returns `None` when the artifact is incomplete or a file payload
    /// is missing; the condition is logged, never fatal.
    pub fn store(&self, key: &CacheKey, artifact: &CompiledArtifact) -> Option<StoreHandle> {
        let model = artifact.model.as_ref()?;
        let resources = artifact.resources.as_ref()?;

        let mut values = vec![
            (CacheValueId::Model, compress(&encode_model(model))),
            (CacheValueId::Resources, compress(&encode_resources(resources))),
            (CacheValueId::BlockIndex, compress(&encode_index(&artifact.index))),
            (CacheValueId::FileTable, compress(&encode_file_table(&artifact.files))),
        ];

        for (position, file) in artifact.files.iter().enumerate() {
            let Some(bytes) = artifact.file_bytes(file) else {
                warn!(key = %key, file = position, "artifact payload missing; skipping cache store");
                return None;
            };
            values.push((CacheValueId::FilePayload(position as u32), compress(&bytes)));
        }

        debug!(key = %key, values = values.len(), "storing compiled data");
        Some(self.backend.put(key, values))
    }
}

fn decode_descriptors(mut response: FetchResponse) -> Result<CachedDescriptors, CacheError> {
    let model_bytes = response
        .take(CacheValueId::Model)
        .ok_or(CacheError::MissingValue("model"))?;
    let resources_bytes = response
        .take(CacheValueId::Resources)
        .ok_or(CacheError::MissingValue("resources"))?;
    let index_bytes = response
        .take(CacheValueId::BlockIndex)
        .ok_or(CacheError::MissingValue("block index"))?;
    let files_bytes = response
        .take(CacheValueId::FileTable)
        .ok_or(CacheError::MissingValue("file table"))?;

    let model = decode_model(&decompress(&model_bytes)?)?;
    let resources = decode_resources(&decompress(&resources_bytes)?)?;
    let index = decode_index(&decompress(&index_bytes)?)?;
    let files = decode_file_table(&decompress(&files_bytes)?)?;

    if model.code_version != CODE_VERSION {
        return Err(CacheError::Structural("compiled code version mismatch"));
    }

    // The index must resolve into the file table: every block points at an
    // existing file of the same kind and lies within its bounds.
    for block in index.iter() {
        let file = files
            .get(block.file_id as usize)
            .ok_or(CacheError::Structural("block references a missing file"))?;
        if file.data_kind != block.data_kind {
            return Err(CacheError::Structural("block and file kind disagree"));
        }
        if block.offset + u64::from(block.size) > file.total_size() {
            return Err(CacheError::Structural("block lies outside its file"));
        }
    }

    Ok(CachedDescriptors {
        model,
        resources,
        index,
        files,
    })
}

fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    // Writing into a Vec cannot fail.
    encoder.write_all(data).expect("in-memory compression");
    encoder.finish().expect("in-memory compression")
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{flags, DataKind, StreamableBlock};
    use crate::cache::MemoryCacheBackend;
    use crate::catalog::SourceGraph;
    use crate::compiler::CompileOptions;

    fn key(version: u32) -> CacheKey {
        CacheKey::build(&SourceGraph::new(version), &CompileOptions::default())
    }

    fn sample_artifact() -> CompiledArtifact {
        let mut artifact = CompiledArtifact::new();
        artifact.model = Some(Model::new(vec![42; 16]));
        artifact.resources = Some(ModelResources::new());

        let block_a = StreamableBlock {
            id: 0,
            data_kind: DataKind::Geometry,
            source_id: 1,
            file_id: 0,
            offset: 0,
            size: 8,
            flags: 0,
        };
        let block_b = StreamableBlock {
            id: 1,
            data_kind: DataKind::Texture,
            source_id: 2,
            file_id: 1,
            offset: 0,
            size: 4,
            flags: flags::HIGH_RES,
        };
        artifact.index.insert(block_a);
        artifact.index.insert(block_b);
        artifact.payloads.set(DataKind::Geometry, 0, vec![7; 8]);
        artifact.payloads.set(DataKind::Texture, 1, vec![3; 4]);
        artifact.files = vec![
            StreamFile {
                file_id: 10,
                data_kind: DataKind::Geometry,
                flags: 0,
                blocks: vec![block_a],
            },
            StreamFile {
                file_id: 11,
                data_kind: DataKind::Texture,
                flags: flags::HIGH_RES,
                blocks: vec![block_b],
            },
        ];
        artifact
    }

    fn client() -> (CacheClient, Arc<MemoryCacheBackend>) {
        let backend = Arc::new(MemoryCacheBackend::new());
        (CacheClient::new(backend.clone()), backend)
    }

    #[test]
    fn test_store_then_phase1_hit() {
        let (client, _backend) = client();
        let key = key(1);
        let artifact = sample_artifact();

        client.store(&key, &artifact).unwrap().wait().unwrap();

        let mut handle = client.begin_phase1(&key);
        handle.wait();
        match client.finish_phase1(&mut handle, &key) {
            Phase1Outcome::Hit(descriptors) => {
                assert_eq!(descriptors.model, *artifact.model.as_ref().unwrap());
                assert_eq!(descriptors.index.len(), 2);
                assert_eq!(descriptors.files.len(), 2);
            }
            Phase1Outcome::Miss => panic!("expected a hit"),
        }
    }

    #[test]
    fn test_phase1_miss_on_absent_key() {
        let (client, _backend) = client();
        let key = key(9);
        let mut handle = client.begin_phase1(&key);
        handle.wait();
        assert!(matches!(
            client.finish_phase1(&mut handle, &key),
            Phase1Outcome::Miss
        ));
    }

    #[test]
    fn test_phase1_skips_payload_values() {
        let (client, backend) = client();
        let key = key(1);
        client.store(&key, &sample_artifact()).unwrap().wait().unwrap();

        let mut handle = backend.get(&key, FetchPolicy::SkipPayloads);
        handle.wait();
        let response = handle.take_response().unwrap();
        assert!(!response.values.keys().any(CacheValueId::is_payload));
    }

    #[test]
    fn test_phase2_restores_payloads() {
        let (client, _backend) = client();
        let key = key(1);
        let artifact = sample_artifact();
        client.store(&key, &artifact).unwrap().wait().unwrap();

        let mut phase1 = client.begin_phase1(&key);
        phase1.wait();
        let Phase1Outcome::Hit(descriptors) = client.finish_phase1(&mut phase1, &key) else {
            panic!("expected a hit");
        };

        let mut phase2 = client.begin_phase2(&key);
        phase2.wait();
        let mut payloads = PayloadStore::new();
        assert!(client.finish_phase2(&mut phase2, &key, &descriptors.files, &mut payloads));

        assert_eq!(payloads.get(DataKind::Geometry, 0), Some(&[7u8; 8][..]));
        assert_eq!(payloads.get(DataKind::Texture, 1), Some(&[3u8; 4][..]));
    }

    #[test]
    fn test_corrupt_value_is_a_miss() {
        let (client, backend) = client();
        let key = key(1);
        client.store(&key, &sample_artifact()).unwrap().wait().unwrap();

        // Clobber the index value with bytes that fail to decompress.
        backend
            .put(&key, vec![(CacheValueId::BlockIndex, vec![0xFF; 8])])
            .wait()
            .unwrap();

        let mut handle = client.begin_phase1(&key);
        handle.wait();
        assert!(matches!(
            client.finish_phase1(&mut handle, &key),
            Phase1Outcome::Miss
        ));
    }

    #[test]
    fn test_incomplete_artifact_is_not_stored() {
        let (client, backend) = client();
        let artifact = CompiledArtifact::new();
        assert!(client.store(&key(1), &artifact).is_none());
        assert!(backend.is_empty());
    }
}
