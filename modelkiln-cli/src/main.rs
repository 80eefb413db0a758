//! modelkiln CLI - command-line interface
//!
//! This binary provides a command-line interface to the modelkiln library:
//! compile declarative source graphs into packaged runtime models and
//! inspect the resulting artifacts.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use modelkiln::config::KilnConfig;
use modelkiln::logging::init_logging;

#[derive(Parser)]
#[command(name = "modelkiln")]
#[command(version = modelkiln::VERSION)]
#[command(about = "Compile declarative content graphs into packaged runtime models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Write a session log file in addition to stdout
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source graph into a runtime model
    Compile(commands::compile::CompileArgs),
    /// Print the layout of a packaged artifact
    Inspect(commands::inspect::InspectArgs),
}

fn main() {
    let cli = Cli::parse();

    let _logging_guard = if cli.log {
        let logging = KilnConfig::default().logging;
        match init_logging(&logging.directory, &logging.file_name) {
            Ok(guard) => Some(guard),
            Err(error) => {
                eprintln!("Warning: failed to initialize logging: {error}");
                None
            }
        }
    } else {
        None
    };

    let result = match &cli.command {
        Command::Compile(args) => commands::compile::run(args),
        Command::Inspect(args) => commands::inspect::run(args),
    };

    if let Err(error) = result {
        error.exit();
    }
}
