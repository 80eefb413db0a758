//! The compile worker.
//!
//! Consumes an already-lowered [`IrProgram`] plus compile options and
//! produces the opaque model binary, the streamable payload blocks, the
//! surface metadata and a list of structured diagnostics. The worker knows
//! nothing about caching, locking or the request queue; it runs on exactly
//! one dedicated thread per in-flight request, spawned with an enlarged
//! stack, and is joined once the orchestrator observes completion.
//!
//! The [`ModelCompiler`] trait is the seam tests use to gate or observe
//! compilation; [`TransformCompiler`] is the production implementation.

use super::WorkerHandle;
use crate::artifact::{flags, DataKind, SurfaceProperties, CODE_VERSION};
use crate::compiler::{CompileOptions, OptimizationLevel};
use crate::diagnostics::Diagnostic;
use crate::ir::{IrOp, IrProgram};
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Magic bytes opening a compiled model binary.
const MODEL_MAGIC: [u8; 4] = *b"MKMD";

/// Everything the worker needs; assembled by the orchestrator after lowering.
#[derive(Clone, Debug)]
pub struct CompileInput {
    pub ir: IrProgram,
    /// Compile-time referenced external assets, resolved during lowering.
    pub referenced_assets: Vec<String>,
    pub options: CompileOptions,
}

/// One streamable payload produced by compilation. Block ids and file
/// placement are assigned later by the orchestrator and the planner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadBlock {
    pub source_id: u32,
    pub data_kind: DataKind,
    pub flags: u16,
    pub bytes: Vec<u8>,
}

/// The worker's result.
#[derive(Clone, Debug, Default)]
pub struct CompileOutput {
    /// `None` when compilation failed terminally; diagnostics carry why.
    pub model: Option<crate::artifact::Model>,
    /// Streamed payloads, in emission order.
    pub payload_blocks: Vec<PayloadBlock>,
    pub surfaces: Vec<SurfaceProperties>,
    pub referenced_assets: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The model compilation seam.
pub trait ModelCompiler: Send + Sync {
    fn compile(&self, input: &CompileInput) -> CompileOutput;
}

/// Production compiler: runs the transform pass pipeline over the IR and
/// synthesizes the model binary and payload blocks.
#[derive(Debug, Default, Clone)]
pub struct TransformCompiler;

impl ModelCompiler for TransformCompiler {
    fn compile(&self, input: &CompileInput) -> CompileOutput {
        let options = &input.options;
        let pass_count = options.optimization_level.pass_count();
        let mut output = CompileOutput {
            referenced_assets: input.referenced_assets.clone(),
            ..CompileOutput::default()
        };

        if options.disk_spill_enabled {
            debug!("disk spill enabled for intermediate transform data");
        }

        let mut model_bytes = Vec::new();
        model_bytes.extend_from_slice(&MODEL_MAGIC);
        model_bytes.extend_from_slice(&CODE_VERSION.to_le_bytes());
        model_bytes.extend_from_slice(&pass_count.to_le_bytes());

        // At the maximum level the combinator ops are folded away during the
        // pass pipeline and only emissions survive in the binary.
        let fold_combinators = options.optimization_level == OptimizationLevel::Maximum;

        let mut encoded_ops: u32 = 0;
        let mut op_section = Vec::new();

        for op in &input.ir.ops {
            match op {
                IrOp::EmitGeometry {
                    source_node,
                    vertex_count,
                } => {
                    let bytes = synthesize_payload(*source_node, (*vertex_count as usize) * 12);
                    op_section.push(0u8);
                    op_section.extend_from_slice(&source_node.to_le_bytes());
                    op_section.extend_from_slice(&vertex_count.to_le_bytes());
                    place_payload(
                        &mut output,
                        &mut op_section,
                        options,
                        *source_node,
                        DataKind::Geometry,
                        0,
                        bytes,
                    );

                    output.surfaces.push(SurfaceProperties {
                        name: format!("geometry-{source_node}"),
                        lod_count: 1,
                        high_res: false,
                    });
                }
                IrOp::EmitTexture {
                    source_node,
                    width,
                    height,
                    high_res,
                } => {
                    let texel_bytes = options.texture_tier.bytes_per_texel();
                    let len = (*width as usize) * (*height as usize) * texel_bytes as usize;
                    let bytes = synthesize_payload(*source_node, len);
                    let block_flags = if *high_res { flags::HIGH_RES } else { 0 };

                    op_section.push(1u8);
                    op_section.extend_from_slice(&source_node.to_le_bytes());
                    op_section.extend_from_slice(&width.to_le_bytes());
                    op_section.extend_from_slice(&height.to_le_bytes());
                    op_section.push(texel_bytes as u8);
                    place_payload(
                        &mut output,
                        &mut op_section,
                        options,
                        *source_node,
                        DataKind::Texture,
                        block_flags,
                        bytes,
                    );

                    output.surfaces.push(SurfaceProperties {
                        name: format!("texture-{source_node}"),
                        lod_count: 1,
                        high_res: *high_res,
                    });
                }
                IrOp::EmitAttachment { source_node, size } => {
                    let bytes = synthesize_payload(*source_node, *size as usize);
                    op_section.push(2u8);
                    op_section.extend_from_slice(&source_node.to_le_bytes());
                    place_payload(
                        &mut output,
                        &mut op_section,
                        options,
                        *source_node,
                        DataKind::Attachment,
                        0,
                        bytes,
                    );
                }
                IrOp::Mix {
                    source_node,
                    inputs,
                } => {
                    if fold_combinators {
                        continue;
                    }
                    op_section.push(3u8);
                    op_section.extend_from_slice(&source_node.to_le_bytes());
                    op_section.extend_from_slice(&(inputs.len() as u32).to_le_bytes());
                    for input_id in inputs {
                        op_section.extend_from_slice(&input_id.to_le_bytes());
                    }
                }
                IrOp::Select {
                    source_node,
                    chosen,
                } => {
                    if fold_combinators {
                        continue;
                    }
                    op_section.push(4u8);
                    op_section.extend_from_slice(&source_node.to_le_bytes());
                    op_section.extend_from_slice(&chosen.to_le_bytes());
                }
            }
            encoded_ops += 1;
        }

        model_bytes.extend_from_slice(&encoded_ops.to_le_bytes());
        model_bytes.extend_from_slice(&op_section);

        for block in &output.payload_blocks {
            if u64::from(block.bytes.len() as u32) > options.packaged_file_byte_limit
                && options.packaged_file_byte_limit > 0
            {
                output.diagnostics.push(Diagnostic::with_context(
                    crate::diagnostics::Severity::Warning,
                    "payload exceeds the packaged file byte limit and will ship alone",
                    format!("node:{}", block.source_id),
                ));
            }
        }

        output.model = Some(crate::artifact::Model::new(model_bytes));
        output
    }
}

/// Routes one synthesized payload: streamed when it reaches the inline
/// threshold, inline into the model binary otherwise.
fn place_payload(
    output: &mut CompileOutput,
    op_section: &mut Vec<u8>,
    options: &CompileOptions,
    source_node: u32,
    data_kind: DataKind,
    block_flags: u16,
    bytes: Vec<u8>,
) {
    if bytes.len() as u64 >= u64::from(options.inline_byte_threshold) {
        // Streamed: the binary records a placeholder; the block index filled
        // in later resolves it.
        op_section.push(1);
        op_section.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        output.payload_blocks.push(PayloadBlock {
            source_id: source_node,
            data_kind,
            flags: block_flags,
            bytes,
        });
    } else {
        op_section.push(0);
        op_section.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        op_section.extend_from_slice(&bytes);
    }
}

/// Deterministic payload synthesis from the source node id.
fn synthesize_payload(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x0019_660D).wrapping_add(0x3C6E_F35F);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(0x0019_660D).wrapping_add(0x3C6E_F35F);
            (state >> 24) as u8
        })
        .collect()
}

/// Spawns the compile worker on its dedicated enlarged-stack thread.
pub fn spawn_compile_worker(
    compiler: Arc<dyn ModelCompiler>,
    input: CompileInput,
    stack_size: usize,
) -> io::Result<WorkerHandle<CompileOutput>> {
    WorkerHandle::spawn("kiln-compile", stack_size, move || {
        debug!(ops = input.ir.len(), "model compilation started");
        let output = compiler.compile(&input);
        debug!(
            streamed = output.payload_blocks.len(),
            diagnostics = output.diagnostics.len(),
            "model compilation finished"
        );
        output
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TextureTier;

    fn texture_ir(width: i64, height: i64) -> IrProgram {
        IrProgram {
            ops: vec![IrOp::EmitTexture {
                source_node: 5,
                width: width as u32,
                height: height as u32,
                high_res: false,
            }],
        }
    }

    fn input(ir: IrProgram, options: CompileOptions) -> CompileInput {
        CompileInput {
            ir,
            referenced_assets: vec![],
            options,
        }
    }

    #[test]
    fn test_compile_is_deterministic() {
        let options = CompileOptions::default();
        let a = TransformCompiler.compile(&input(texture_ir(64, 64), options.clone()));
        let b = TransformCompiler.compile(&input(texture_ir(64, 64), options));
        assert_eq!(a.model, b.model);
        assert_eq!(a.payload_blocks, b.payload_blocks);
    }

    #[test]
    fn test_texture_tier_changes_output() {
        let standard = CompileOptions::default();
        let high = CompileOptions {
            texture_tier: TextureTier::HighQuality,
            ..CompileOptions::default()
        };

        let a = TransformCompiler.compile(&input(texture_ir(64, 64), standard));
        let b = TransformCompiler.compile(&input(texture_ir(64, 64), high));
        assert_ne!(a.payload_blocks[0].bytes.len(), b.payload_blocks[0].bytes.len());
    }

    #[test]
    fn test_optimization_level_changes_model() {
        let ir = IrProgram {
            ops: vec![
                IrOp::EmitGeometry {
                    source_node: 1,
                    vertex_count: 4,
                },
                IrOp::Mix {
                    source_node: 2,
                    inputs: vec![1],
                },
            ],
        };

        let full = TransformCompiler.compile(&input(
            ir.clone(),
            CompileOptions {
                optimization_level: OptimizationLevel::Maximum,
                ..CompileOptions::default()
            },
        ));
        let none = TransformCompiler.compile(&input(
            ir,
            CompileOptions {
                optimization_level: OptimizationLevel::None,
                ..CompileOptions::default()
            },
        ));

        assert_ne!(full.model, none.model);
    }

    #[test]
    fn test_small_payload_stays_inline() {
        // 8x8 at one byte per texel = 64 bytes, far below the threshold.
        let output = TransformCompiler.compile(&input(texture_ir(8, 8), CompileOptions::default()));
        assert!(output.payload_blocks.is_empty());
        assert!(output.model.is_some());
    }

    #[test]
    fn test_large_payload_is_streamed() {
        // 128x128 = 16 KiB, past the 4 KiB default threshold.
        let output =
            TransformCompiler.compile(&input(texture_ir(128, 128), CompileOptions::default()));
        assert_eq!(output.payload_blocks.len(), 1);
        assert_eq!(output.payload_blocks[0].data_kind, DataKind::Texture);
    }

    #[test]
    fn test_high_res_flag_reaches_block() {
        let ir = IrProgram {
            ops: vec![IrOp::EmitTexture {
                source_node: 5,
                width: 128,
                height: 128,
                high_res: true,
            }],
        };
        let output = TransformCompiler.compile(&input(ir, CompileOptions::default()));
        assert_eq!(output.payload_blocks[0].flags, flags::HIGH_RES);
    }

    #[test]
    fn test_referenced_assets_pass_through() {
        let mut compile_input = input(texture_ir(8, 8), CompileOptions::default());
        compile_input.referenced_assets = vec!["textures/skin".into()];
        let output = TransformCompiler.compile(&compile_input);
        assert_eq!(output.referenced_assets, vec!["textures/skin".to_string()]);
    }

    #[test]
    fn test_worker_thread_round_trip() {
        let handle = spawn_compile_worker(
            Arc::new(TransformCompiler),
            input(texture_ir(64, 64), CompileOptions::default()),
            4 * 1024 * 1024,
        )
        .unwrap();

        handle.wait();
        let output = handle.join().unwrap();
        assert!(output.model.is_some());
    }
}
