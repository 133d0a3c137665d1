use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spinlog_core::Config;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "spinlog", version, about = "Exercise bike workout logger")]
struct Cli {
    /// Configuration file (default: ~/.config/spinlog/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture workouts until interrupted
    Run {
        /// Read edges from stdin instead of GPIO: `p` pedal, `s` start/stop,
        /// optionally followed by a delay in milliseconds
        #[arg(long)]
        simulate: bool,
    },
    /// Live cadence of the current workout
    Watch {
        /// Print one reading and exit
        #[arg(long)]
        once: bool,
        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Stored workouts
    Sessions {
        #[command(subcommand)]
        action: commands::sessions::SessionsAction,
    },
    /// Close workouts left open by a crashed run
    Recover {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::path()?,
    };

    // Config commands manage the file themselves, so `config path` works
    // even when it does not parse.
    let load = || -> Result<Config, Box<dyn std::error::Error>> {
        let config = Config::load_from(&path)?;
        logging::init(&config.log)?;
        Ok(config)
    };

    match cli.command {
        Commands::Config { action } => commands::config::run(action, &path),
        Commands::Run { simulate } => commands::run::run(&load()?, simulate),
        Commands::Watch { once, json } => commands::watch::run(&load()?, once, json),
        Commands::Sessions { action } => commands::sessions::run(action, &load()?),
        Commands::Recover { json } => commands::recover::run(&load()?, json),
    }
}
