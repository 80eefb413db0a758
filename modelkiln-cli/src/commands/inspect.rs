//! The `inspect` command: print the layout of a packaged artifact.

use crate::error::CliError;
use clap::Args;
use modelkiln::artifact::read_package_header;
use std::fs;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Packaged artifact file (.mkpkg)
    pub artifact: PathBuf,
}

pub fn run(args: &InspectArgs) -> Result<(), CliError> {
    let bytes = fs::read(&args.artifact).map_err(|error| CliError::FileRead {
        path: args.artifact.display().to_string(),
        error,
    })?;

    let header = read_package_header(&bytes).map_err(CliError::ArtifactParse)?;

    println!("{}", args.artifact.display());
    println!("  format version: {}", header.format_version);
    println!("  model:          {} bytes", header.model_len);
    println!("  resources:      {} bytes", header.resources_len);
    println!("  block index:    {} bytes", header.index_len);
    println!("  file table:     {} bytes", header.file_table_len);
    println!("  streamed files: {}", header.file_count);

    Ok(())
}
