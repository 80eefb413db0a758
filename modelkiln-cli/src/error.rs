//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::io;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to read the graph or artifact file.
    FileRead { path: String, error: io::Error },
    /// Failed to write an output file.
    FileWrite { path: String, error: io::Error },
    /// The graph file is not valid JSON for a source graph.
    GraphParse { path: String, error: serde_json::Error },
    /// The artifact file failed to parse.
    ArtifactParse(modelkiln::artifact::ArtifactCodecError),
    /// Compilation reported errors.
    CompileFailed,
    /// The compile request was rejected before compiling.
    RequestRejected,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::CompileFailed = self {
            eprintln!();
            eprintln!("The diagnostics above describe what failed; fix the graph and re-run.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read {}: {}", path, error)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write {}: {}", path, error)
            }
            CliError::GraphParse { path, error } => {
                write!(f, "Failed to parse source graph {}: {}", path, error)
            }
            CliError::ArtifactParse(error) => {
                write!(f, "Failed to parse artifact: {}", error)
            }
            CliError::CompileFailed => write!(f, "Compilation finished with errors"),
            CliError::RequestRejected => {
                write!(f, "The compile request was rejected before compiling")
            }
        }
    }
}
