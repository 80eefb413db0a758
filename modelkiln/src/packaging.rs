//! Streaming file planner.
//!
//! Deterministically partitions streamable blocks into packaged files. Blocks
//! are first classified by category (data kind + flags), then distributed
//! under one of two policies:
//!
//! - **Count-limited** (single growable archive representation): each bucket
//!   gets a fixed file budget, split across its categories proportionally to
//!   their accumulated payload size; a block lands in file
//!   `source_id % category_files`, so payloads from the same source node stay
//!   together.
//! - **Size-limited** (chunked file representation): blocks fill the current
//!   file until the next one would exceed the byte limit; a block larger than
//!   the limit gets a dedicated file. Data is never split.
//!
//! High-res texture payloads classify into the optional bucket; everything
//! else goes in the default bucket. Offsets are assigned by cumulative sum in
//! processing order and written back into the block index, so replanning
//! unchanged input reproduces byte-identical ids and offsets.

use crate::artifact::{flags, DataKind, StreamFile, StreamableBlock, StreamableIndex};
use std::collections::BTreeMap;

/// Grouping key for block classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileCategory {
    pub data_kind: DataKind,
    pub flags: u16,
}

impl FileCategory {
    /// High-res texture payloads are optional at runtime and package into
    /// their own bucket.
    fn is_optional(&self) -> bool {
        self.data_kind == DataKind::Texture && self.flags & flags::HIGH_RES != 0
    }
}

/// Boost-style hash mix; cumulative over block ids to derive stable file ids.
fn hash_combine(seed: u32, value: u32) -> u32 {
    seed ^ (value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

/// Groups the index's blocks by category, in the index's fixed order.
fn classify(index: &StreamableIndex) -> BTreeMap<FileCategory, Vec<StreamableBlock>> {
    let mut groups: BTreeMap<FileCategory, Vec<StreamableBlock>> = BTreeMap::new();
    for block in index.iter() {
        let category = FileCategory {
            data_kind: block.data_kind,
            flags: block.flags,
        };
        groups.entry(category).or_default().push(*block);
    }
    groups
}

/// Assigns cumulative offsets within each file and writes the final
/// (file position, offset) pairs back into the index.
fn assign_offsets(files: &mut [StreamFile], index: &mut StreamableIndex) {
    for (position, file) in files.iter_mut().enumerate() {
        let mut offset = 0u64;
        for block in &mut file.blocks {
            block.file_id = position as u32;
            block.offset = offset;
            offset += u64::from(block.size);

            if let Some(indexed) = index.get_mut(block.data_kind, block.id) {
                indexed.file_id = block.file_id;
                indexed.offset = block.offset;
            }
        }
    }
}

/// Size-limited policy: sequential fill, dedicated files for oversized
/// blocks.
///
/// A `byte_limit` of zero disables the limit; everything of one category
/// lands in a single file.
pub fn plan_size_limited(index: &mut StreamableIndex, byte_limit: u64) -> Vec<StreamFile> {
    let groups = classify(index);
    let mut files: Vec<StreamFile> = Vec::new();

    for (category, blocks) in groups {
        let mut next = 0usize;
        while next < blocks.len() {
            let mut file = StreamFile {
                file_id: 0,
                data_kind: category.data_kind,
                flags: category.flags,
                blocks: Vec::new(),
            };

            let mut file_size = 0u64;
            let mut file_id = u32::from(category.data_kind.as_u8());

            while next < blocks.len() {
                let block = blocks[next];

                if file_size > 0
                    && byte_limit > 0
                    && file_size + u64::from(block.size) > byte_limit
                {
                    break;
                }

                file_size += u64::from(block.size);
                file_id = hash_combine(file_id, block.id);
                file.blocks.push(block);
                next += 1;
            }

            // Probe until the generated id is unique across the plan.
            loop {
                let taken = files.iter().any(|f| f.file_id == file_id);
                if !taken {
                    break;
                }
                file_id = file_id.wrapping_add(1);
            }
            file.file_id = file_id;

            files.push(file);
        }
    }

    assign_offsets(&mut files, index);
    files
}

/// Count-limited policy: a fixed file budget per bucket, split across the
/// bucket's categories proportionally to their payload sizes. Every
/// non-empty category gets at least one file.
pub fn plan_count_limited(index: &mut StreamableIndex, files_per_bucket: u32) -> Vec<StreamFile> {
    let files_per_bucket = files_per_bucket.max(1);
    let groups = classify(index);

    // Accumulate per-bucket sizes.
    let mut default_bucket_size = 0u64;
    let mut optional_bucket_size = 0u64;
    for (category, blocks) in &groups {
        let size: u64 = blocks.iter().map(|b| u64::from(b.size)).sum();
        if category.is_optional() {
            optional_bucket_size += size;
        } else {
            default_bucket_size += size;
        }
    }

    // Distribute the file budget inside each bucket.
    let mut next_default_file = 0u32;
    let mut next_optional_file = 0u32;
    let mut plans: Vec<(FileCategory, &Vec<StreamableBlock>, u32, u32)> = Vec::new();
    for (category, blocks) in &groups {
        let size: u64 = blocks.iter().map(|b| u64::from(b.size)).sum();
        if size == 0 {
            continue;
        }
        let (bucket_size, next_file) = if category.is_optional() {
            (optional_bucket_size, &mut next_optional_file)
        } else {
            (default_bucket_size, &mut next_default_file)
        };

        let share = size as f64 / bucket_size as f64;
        let num_files = ((share * f64::from(files_per_bucket)) as u32).max(1);
        plans.push((*category, blocks, num_files, *next_file));
        *next_file += num_files;
    }

    let mut files: Vec<StreamFile> = Vec::new();
    for (category, blocks, num_files, first_file) in plans {
        // Slot index within the category -> position in `files`.
        let mut slot_to_file: Vec<Option<usize>> = vec![None; num_files as usize];

        for block in blocks {
            let slot = block.source_id % num_files;
            let position = match slot_to_file[slot as usize] {
                Some(position) => position,
                None => {
                    files.push(StreamFile {
                        file_id: first_file + slot,
                        data_kind: category.data_kind,
                        flags: category.flags,
                        blocks: Vec::new(),
                    });
                    let position = files.len() - 1;
                    slot_to_file[slot as usize] = Some(position);
                    position
                }
            };
            files[position].blocks.push(*block);
        }
    }

    assign_offsets(&mut files, index);
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: DataKind, id: u32, source_id: u32, size: u32, block_flags: u16) -> StreamableBlock {
        StreamableBlock {
            id,
            data_kind: kind,
            source_id,
            file_id: 0,
            offset: 0,
            size,
            flags: block_flags,
        }
    }

    fn index_of(blocks: &[StreamableBlock]) -> StreamableIndex {
        let mut index = StreamableIndex::new();
        for b in blocks {
            index.insert(*b);
        }
        index
    }

    #[test]
    fn test_size_limited_respects_byte_limit() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 60, 0),
            block(DataKind::Geometry, 1, 1, 60, 0),
            block(DataKind::Geometry, 2, 2, 60, 0),
        ]);

        let files = plan_size_limited(&mut index, 100);
        assert_eq!(files.len(), 3);
        for file in &files {
            assert!(file.total_size() <= 100 || file.blocks.len() == 1);
        }
    }

    #[test]
    fn test_size_limited_packs_up_to_limit() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 40, 0),
            block(DataKind::Geometry, 1, 1, 40, 0),
            block(DataKind::Geometry, 2, 2, 40, 0),
        ]);

        let files = plan_size_limited(&mut index, 100);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].blocks.len(), 2);
        assert_eq!(files[1].blocks.len(), 1);
    }

    #[test]
    fn test_oversized_block_gets_dedicated_file() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 10, 0),
            block(DataKind::Geometry, 1, 1, 500, 0),
            block(DataKind::Geometry, 2, 2, 10, 0),
        ]);

        let files = plan_size_limited(&mut index, 100);
        for file in &files {
            assert!(
                file.total_size() <= 100 || file.blocks.len() == 1,
                "oversized blocks must sit alone"
            );
        }
        // The 500-byte block is never split.
        let oversized = files
            .iter()
            .find(|f| f.blocks.iter().any(|b| b.size == 500))
            .unwrap();
        assert_eq!(oversized.blocks.len(), 1);
    }

    #[test]
    fn test_offsets_are_cumulative_per_file() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 40, 0),
            block(DataKind::Geometry, 1, 1, 40, 0),
        ]);

        let files = plan_size_limited(&mut index, 1000);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].blocks[0].offset, 0);
        assert_eq!(files[0].blocks[1].offset, 40);

        // Index entries mirror the planned placement.
        assert_eq!(index.get(DataKind::Geometry, 1).unwrap().offset, 40);
        assert_eq!(index.get(DataKind::Geometry, 1).unwrap().file_id, 0);
    }

    #[test]
    fn test_replanning_is_byte_identical() {
        let blocks = [
            block(DataKind::Geometry, 0, 7, 64, 0),
            block(DataKind::Geometry, 1, 3, 128, 0),
            block(DataKind::Texture, 2, 9, 32, 0),
            block(DataKind::Texture, 3, 9, 32, flags::HIGH_RES),
            block(DataKind::Attachment, 4, 1, 16, 0),
        ];

        let mut index_a = index_of(&blocks);
        let mut index_b = index_of(&blocks);
        assert_eq!(
            plan_size_limited(&mut index_a, 100),
            plan_size_limited(&mut index_b, 100)
        );
        assert_eq!(index_a, index_b);

        let mut index_c = index_of(&blocks);
        let mut index_d = index_of(&blocks);
        assert_eq!(
            plan_count_limited(&mut index_c, 4),
            plan_count_limited(&mut index_d, 4)
        );
        assert_eq!(index_c, index_d);
    }

    #[test]
    fn test_kinds_never_share_a_file() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 10, 0),
            block(DataKind::Texture, 1, 0, 10, 0),
            block(DataKind::Attachment, 2, 0, 10, 0),
        ]);

        for file in plan_size_limited(&mut index, 1000) {
            for b in &file.blocks {
                assert_eq!(b.data_kind, file.data_kind);
            }
        }
    }

    #[test]
    fn test_high_res_flag_propagates_to_file() {
        let mut index = index_of(&[block(DataKind::Texture, 0, 0, 10, flags::HIGH_RES)]);
        let files = plan_size_limited(&mut index, 1000);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].flags, flags::HIGH_RES);
    }

    #[test]
    fn test_count_limited_groups_by_source_id() {
        // Two sources, plenty of files allowed: blocks of the same source
        // must land in the same file.
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 2, 10, 0),
            block(DataKind::Geometry, 1, 5, 10, 0),
            block(DataKind::Geometry, 2, 2, 10, 0),
            block(DataKind::Geometry, 3, 5, 10, 0),
        ]);

        let files = plan_count_limited(&mut index, 8);
        for file in &files {
            let sources: std::collections::BTreeSet<u32> =
                file.blocks.iter().map(|b| b.source_id % 8).collect();
            assert_eq!(sources.len(), 1);
        }
    }

    #[test]
    fn test_count_limited_every_category_gets_a_file() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 1000, 0),
            block(DataKind::Texture, 1, 1, 1, 0),
        ]);

        let files = plan_count_limited(&mut index, 4);
        assert!(files.iter().any(|f| f.data_kind == DataKind::Texture));
        assert!(files.iter().any(|f| f.data_kind == DataKind::Geometry));
    }

    #[test]
    fn test_count_limited_optional_bucket_separates_high_res() {
        let mut index = index_of(&[
            block(DataKind::Texture, 0, 0, 100, 0),
            block(DataKind::Texture, 1, 0, 100, flags::HIGH_RES),
        ]);

        let files = plan_count_limited(&mut index, 2);
        assert_eq!(files.len(), 2);
        let high_res = files.iter().find(|f| f.flags == flags::HIGH_RES).unwrap();
        assert_eq!(high_res.blocks.len(), 1);
        assert_eq!(high_res.blocks[0].id, 1);
    }

    #[test]
    fn test_file_ids_are_unique() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 60, 0),
            block(DataKind::Geometry, 1, 1, 60, 0),
            block(DataKind::Geometry, 2, 2, 60, 0),
            block(DataKind::Texture, 3, 0, 60, 0),
        ]);

        let files = plan_size_limited(&mut index, 50);
        let mut ids: Vec<u32> = files.iter().map(|f| f.file_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), files.len());
    }

    #[test]
    fn test_zero_limit_means_unbounded() {
        let mut index = index_of(&[
            block(DataKind::Geometry, 0, 0, 1000, 0),
            block(DataKind::Geometry, 1, 1, 1000, 0),
        ]);

        let files = plan_size_limited(&mut index, 0);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].total_size(), 2000);
    }

    #[test]
    fn test_empty_index_plans_no_files() {
        let mut index = StreamableIndex::new();
        assert!(plan_size_limited(&mut index, 100).is_empty());
        assert!(plan_count_limited(&mut index, 4).is_empty());
    }
}
