//! Compile options.
//!
//! Options split into two groups: output-affecting options participate in
//! cache key derivation, while pipeline-behavior options (cache toggles, disk
//! spill, reference gathering, bulk representation) must never change the
//! produced bytes and are excluded from the key.

/// Depth of the transform pass pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OptimizationLevel {
    /// No optimization passes; fastest compiles, largest output.
    None,
    /// A reduced pass set for iteration builds.
    Minimal,
    /// The full pass set used for shipping data.
    #[default]
    Maximum,
}

impl OptimizationLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Minimal => 1,
            Self::Maximum => 2,
        }
    }

    /// Number of transform passes the compile worker runs at this level.
    pub fn pass_count(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Minimal => 2,
            Self::Maximum => 6,
        }
    }
}

/// Texture payload compression tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureTier {
    #[default]
    Standard,
    HighQuality,
}

impl TextureTier {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::HighQuality => 1,
        }
    }

    /// Bytes per texel produced at this tier.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Standard => 1,
            Self::HighQuality => 2,
        }
    }
}

/// Platform the artifact is compiled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TargetPlatform {
    /// The editor host platform.
    #[default]
    Host,
    Windows,
    Linux,
    Android,
}

impl TargetPlatform {
    pub fn name(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Android => "android",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Host => 0,
            Self::Windows => 1,
            Self::Linux => 2,
            Self::Android => 3,
        }
    }
}

/// How streamed payloads are represented on disk.
///
/// Selects the planner policy: chunked files are size-limited, a single
/// growable archive is count-limited. This changes packaging only, never the
/// payload bytes, so it is excluded from key derivation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BulkRepresentation {
    #[default]
    ChunkedFiles,
    SingleArchive,
}

/// Full configuration for one compile request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    pub optimization_level: OptimizationLevel,
    pub texture_tier: TextureTier,
    pub target_platform: TargetPlatform,
    /// Deployment cook: all streaming data must be resident immediately.
    pub deployment_cook: bool,
    /// Byte limit per packaged file under the size-limited planner policy.
    pub packaged_file_byte_limit: u64,
    /// Payloads below this size stay inline in the model binary.
    pub inline_byte_threshold: u32,

    // Pipeline behavior; excluded from cache key derivation.
    pub cache_query_enabled: bool,
    pub cache_store_enabled: bool,
    pub disk_spill_enabled: bool,
    pub gather_references_enabled: bool,
    pub bulk_representation: BulkRepresentation,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::default(),
            texture_tier: TextureTier::default(),
            target_platform: TargetPlatform::default(),
            deployment_cook: false,
            packaged_file_byte_limit: crate::config::DEFAULT_PACKAGED_FILE_BYTE_LIMIT,
            inline_byte_threshold: crate::config::DEFAULT_INLINE_BYTE_THRESHOLD,
            cache_query_enabled: true,
            cache_store_enabled: true,
            disk_spill_enabled: false,
            gather_references_enabled: false,
            bulk_representation: BulkRepresentation::default(),
        }
    }
}

impl CompileOptions {
    /// Serializes every output-affecting option for key derivation.
    ///
    /// The five pipeline-behavior options are deliberately absent: toggling
    /// them must not change the key.
    pub fn key_material(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.push(self.optimization_level.as_u8());
        out.push(self.texture_tier.as_u8());
        out.push(self.target_platform.as_u8());
        out.push(u8::from(self.deployment_cook));
        out.extend_from_slice(&self.packaged_file_byte_limit.to_le_bytes());
        out.extend_from_slice(&self.inline_byte_threshold.to_le_bytes());
        out
    }
}
