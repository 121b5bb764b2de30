//! wamem CLI - exercise guarded linear memory arenas from the command line.

mod commands;
mod observability;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use observability::{TracingConfig, init_tracing};
use std::path::{Path, PathBuf};
use wamem_core::{ArenaConfig, Layout};

/// Default mapping budget for guarded arenas: 512 MiB.
const DEFAULT_BUDGET: usize = 512 * 1024 * 1024;

/// wamem - Guarded linear memory arenas.
#[derive(Parser)]
#[command(name = "wamem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// YAML file with the reservation layout
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective reservation layout
    Layout,

    /// Create a simple arena, fill it and verify it
    Simple {
        /// Arena size in bytes
        #[arg(short, long, default_value = "65536")]
        size: usize,
    },

    /// Create a guarded arena and check its heap and guards
    Guarded {
        /// Bytes at the bottom of the window reserved for file mappings
        #[arg(short, long, default_value_t = DEFAULT_BUDGET)]
        budget: usize,
    },

    /// Map a file into a guarded arena, dump it and unmap it again
    Map {
        /// Backing file
        #[arg(short, long)]
        file: PathBuf,

        /// Offset from the start of the data window
        #[arg(short, long, default_value = "4096")]
        offset: usize,

        /// Bytes to map (defaults to the file length)
        #[arg(short, long)]
        length: Option<usize>,

        /// Map read-write and write a marker byte
        #[arg(short, long)]
        writable: bool,

        /// Marker byte written at offset + 2 of a writable mapping
        #[arg(long, default_value = "42")]
        marker: u8,

        /// Create or overwrite the file with `length` copies of this byte first
        #[arg(long, requires = "length")]
        fill: Option<u8>,

        /// Bytes at the bottom of the window reserved for file mappings
        #[arg(short, long, default_value_t = DEFAULT_BUDGET)]
        budget: usize,
    },

    /// Install the fault dispatcher and touch pages of COW arenas
    Cow {
        /// Number of COW arenas
        #[arg(short, long, default_value = "2")]
        arenas: usize,

        /// Pages to touch in each arena
        #[arg(short, long, default_value = "16")]
        touch: usize,

        /// Threads touching each arena concurrently
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Show version information
    Version,
}

fn load_config(path: Option<&Path>) -> Result<ArenaConfig> {
    let Some(path) = path else {
        return Ok(ArenaConfig::default());
    };
    let layout = Layout::from_yaml_file(path)
        .with_context(|| format!("Failed to load layout from {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded layout");
    Ok(ArenaConfig::default().with_layout(layout))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = init_tracing(&TracingConfig::from_verbosity(cli.verbose))?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Layout => commands::layout::run(&config),
        Commands::Simple { size } => commands::simple::run(size),
        Commands::Guarded { budget } => commands::guarded::run(&config, budget),
        Commands::Map {
            file,
            offset,
            length,
            writable,
            marker,
            fill,
            budget,
        } => {
            let options = commands::map::MapOptions {
                file,
                offset,
                length,
                writable,
                marker,
                fill,
                budget,
            };
            commands::map::run(&config, &options)
        }
        Commands::Cow {
            arenas,
            touch,
            threads,
        } => commands::cow::run(&config, arenas, touch, threads),
        Commands::Version => commands::version::run(),
    }
}
