//! hostfacts
//!
//! Gathers facts about the local host and prints them as text, JSON or YAML

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use hostfacts_core::{Collection, ExternalReader, Format};
use hostfacts_guest::{EngineResolver, GuestApi, LibrarySearch};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod external;

use config::{Config, GuestConfig};
use external::JsonReader;

/// Gather facts about the local host
#[derive(Parser, Debug)]
#[command(name = "hostfacts", version, about)]
struct Cli {
    /// Facts to print; every fact when empty
    names: Vec<String>,

    /// Output format (hash, json, yaml)
    #[arg(long, conflicts_with_all = ["json", "yaml"])]
    format: Option<Format>,

    /// Shorthand for --format json
    #[arg(long, conflicts_with = "yaml")]
    json: bool,

    /// Shorthand for --format yaml
    #[arg(long)]
    yaml: bool,

    /// Do not resolve custom facts through the guest engine
    #[arg(long)]
    no_custom_facts: bool,

    /// External fact directory (repeatable)
    #[arg(long = "external-dir", value_name = "DIR")]
    external_dirs: Vec<PathBuf>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn output_format(&self, config: &Config) -> Result<Format> {
        if self.json {
            return Ok(Format::Json);
        }
        if self.yaml {
            return Ok(Format::Yaml);
        }
        match self.format {
            Some(format) => Ok(format),
            None => Ok(config.output.format.parse()?),
        }
    }
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    let config_path = Config::locate(cli.config.as_deref());
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Initialize logging; stdout is reserved for facts
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &config_path {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    let format = cli.output_format(&config)?;

    let mut facts = Collection::new();
    facts.add_default_facts()?;

    let external_dirs = if cli.external_dirs.is_empty() {
        &config.facts.external_dirs
    } else {
        &cli.external_dirs
    };
    let readers: [&dyn ExternalReader; 1] = [&JsonReader];
    facts.add_external_facts(external_dirs, &readers)?;

    let guest = if config.guest.enabled && !cli.no_custom_facts {
        load_guest(&config.guest)
    } else {
        debug!("custom facts are disabled");
        None
    };
    if let Some(api) = guest {
        facts.add_resolver(Box::new(EngineResolver::new(api)));
    }

    if config.facts.environment {
        facts.add_environment_facts()?;
    }

    if !cli.names.is_empty() {
        facts.filter(cli.names.clone(), true)?;
    }

    let mut stdout = std::io::stdout().lock();
    facts.write(&mut stdout, format)?;
    writeln!(stdout)?;

    // Guest-owned facts must be released before the engine goes away
    drop(facts);
    if let Some(api) = guest {
        api.cleanup();
    }

    Ok(())
}

fn load_guest(config: &GuestConfig) -> Option<&'static GuestApi> {
    let mut search = LibrarySearch::from_env();
    if search.library.is_none() {
        search.library.clone_from(&config.library);
    }

    let api = GuestApi::instance_with(&search)?;
    api.initialize();
    Some(api)
}
