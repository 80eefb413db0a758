//! The `compile` command: load a source graph, drive the orchestrator and
//! optionally write the packaged artifact to disk.

use crate::error::CliError;
use clap::{Args, ValueEnum};
use modelkiln::artifact::write_package;
use modelkiln::catalog::{AssetId, SourceGraph};
use modelkiln::compiler::{
    BulkRepresentation, CompileCallbackParams, CompileOptions, CompileRequest, OptimizationLevel,
    TargetPlatform, TextureTier,
};
use modelkiln::config::KilnConfig;
use modelkiln::progress::TracingProgressSink;
use modelkiln::service::KilnService;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, ValueEnum)]
pub enum OptimizationArg {
    /// No optimization passes
    None,
    /// Reduced pass set for iteration builds
    Minimal,
    /// Full pass set for shipping data
    Maximum,
}

impl From<&OptimizationArg> for OptimizationLevel {
    fn from(arg: &OptimizationArg) -> Self {
        match arg {
            OptimizationArg::None => Self::None,
            OptimizationArg::Minimal => Self::Minimal,
            OptimizationArg::Maximum => Self::Maximum,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum PlatformArg {
    Host,
    Windows,
    Linux,
    Android,
}

impl From<&PlatformArg> for TargetPlatform {
    fn from(arg: &PlatformArg) -> Self {
        match arg {
            PlatformArg::Host => Self::Host,
            PlatformArg::Windows => Self::Windows,
            PlatformArg::Linux => Self::Linux,
            PlatformArg::Android => Self::Android,
        }
    }
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Source graph file (JSON)
    pub graph: PathBuf,

    /// Output directory for the packaged artifact; when given, the compile
    /// runs as a deployment cook so every payload is resident
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Target platform
    #[arg(long, value_enum, default_value = "host")]
    pub platform: PlatformArg,

    /// Optimization level
    #[arg(long, value_enum, default_value = "maximum")]
    pub optimization: OptimizationArg,

    /// High-quality texture compression tier
    #[arg(long)]
    pub hd_textures: bool,

    /// Package streamed data as one growable archive instead of chunked files
    #[arg(long)]
    pub archive: bool,

    /// Byte limit per packaged file (chunked representation)
    #[arg(long)]
    pub byte_limit: Option<u64>,

    /// Skip the compiled-data cache lookup
    #[arg(long)]
    pub no_cache_query: bool,

    /// Do not store the compiled data in the cache
    #[arg(long)]
    pub no_cache_store: bool,

    /// Record compile-time referenced assets in the artifact
    #[arg(long)]
    pub gather_references: bool,
}

pub fn run(args: &CompileArgs) -> Result<(), CliError> {
    let graph_text = fs::read_to_string(&args.graph).map_err(|error| CliError::FileRead {
        path: args.graph.display().to_string(),
        error,
    })?;
    let graph: SourceGraph =
        serde_json::from_str(&graph_text).map_err(|error| CliError::GraphParse {
            path: args.graph.display().to_string(),
            error,
        })?;

    let asset_name = args
        .graph
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let asset = AssetId::new(asset_name.clone());

    let config = KilnConfig::default();
    let mut options = CompileOptions {
        optimization_level: (&args.optimization).into(),
        texture_tier: if args.hd_textures {
            TextureTier::HighQuality
        } else {
            TextureTier::Standard
        },
        target_platform: (&args.platform).into(),
        deployment_cook: args.output.is_some(),
        cache_query_enabled: !args.no_cache_query,
        cache_store_enabled: !args.no_cache_store,
        gather_references_enabled: args.gather_references,
        bulk_representation: if args.archive {
            BulkRepresentation::SingleArchive
        } else {
            BulkRepresentation::ChunkedFiles
        },
        ..CompileOptions::default()
    };
    if let Some(byte_limit) = args.byte_limit {
        options.packaged_file_byte_limit = byte_limit;
    }
    let platform = options.target_platform;

    let service = KilnService::new(config);
    service.catalog().insert(asset.clone(), graph);

    let outcome: Arc<Mutex<Option<CompileCallbackParams>>> = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&outcome);

    let mut orchestrator = service
        .create_orchestrator()
        .with_progress(Arc::new(TracingProgressSink));
    orchestrator.enqueue_compile_request(
        CompileRequest::new(asset.clone(), options)
            .synchronous()
            .with_callback(move |params| {
                *observed.lock().unwrap() = Some(params);
            }),
        false,
    );
    orchestrator.tick(true);

    let params = outcome
        .lock()
        .unwrap()
        .take()
        .ok_or(CliError::RequestRejected)?;
    if params.request_failed {
        return Err(CliError::RequestRejected);
    }
    if params.had_errors {
        return Err(CliError::CompileFailed);
    }

    if params.had_warnings {
        println!("Compiled {} with warnings", asset_name);
    } else {
        println!("Compiled {}", asset_name);
    }

    if let Some(output_dir) = &args.output {
        let artifact = service
            .catalog()
            .take_cooked(&asset, platform.name())
            .ok_or(CliError::CompileFailed)?;
        write_artifact_files(output_dir, &asset_name, &artifact)?;
    }

    Ok(())
}

/// Writes the package plus one file per streamed-data bucket.
fn write_artifact_files(
    output_dir: &Path,
    asset_name: &str,
    artifact: &modelkiln::artifact::CompiledArtifact,
) -> Result<(), CliError> {
    fs::create_dir_all(output_dir).map_err(|error| CliError::FileWrite {
        path: output_dir.display().to_string(),
        error,
    })?;

    let package = write_package(artifact).ok_or(CliError::CompileFailed)?;
    let package_path = output_dir.join(format!("{asset_name}.mkpkg"));
    fs::write(&package_path, &package).map_err(|error| CliError::FileWrite {
        path: package_path.display().to_string(),
        error,
    })?;
    println!("Wrote {} ({} bytes)", package_path.display(), package.len());

    for file in &artifact.files {
        let bytes = artifact.file_bytes(file).ok_or(CliError::CompileFailed)?;
        let bulk_path = output_dir.join(format!("{asset_name}_{:08x}.mkbulk", file.file_id));
        fs::write(&bulk_path, &bytes).map_err(|error| CliError::FileWrite {
            path: bulk_path.display().to_string(),
            error,
        })?;
        println!("Wrote {} ({} bytes)", bulk_path.display(), bytes.len());
    }

    Ok(())
}
