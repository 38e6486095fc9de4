mod common;
mod montage;
mod ui;

use clap::{Parser, Subcommand};

use crate::montage::{BuildArgs, MappingCommands, MontageConfig};
use crate::ui::prelude::*;

/// Assemble videos from source clips cut to musical or scene boundaries
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Settle every mapping on a source excerpt and render the output
    Build(BuildArgs),

    /// Inspect and derive mappings files
    Mappings {
        #[command(subcommand)]
        command: MappingCommands,
    },

    /// Show the configuration file and its current values
    Config,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => montage::handle_build(args, MontageConfig::load()?),
        Commands::Mappings { command } => montage::handle_mapping_command(command),
        Commands::Config => montage::handle_config(),
    }
}

fn main() {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, !cli.json);
    ui::set_debug_mode(cli.debug);

    if let Err(err) = run(cli) {
        emit(Level::Error, "beatcut.error", &format!("{err:#}"), None);
        std::process::exit(1);
    }
}
