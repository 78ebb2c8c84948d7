//! Complink CLI - serve and inspect the compliance link database

use clap::{Parser, Subcommand};
use complink::config::{self, ComplinkConfig, Settings};
use complink::ui::{self, Icons};
use complink::{Database, LinkManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "complink")]
#[command(version)]
#[command(about = "Compliance link backend - features, provisions, and the links between them")]
#[command(long_about = r#"
Complink stores software features and legal provisions and tracks which
features are governed by which provisions.

Example usage:
  complink init
  complink serve --port 8080
  complink links --feature 1
  complink stats
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Deadline for each storage operation, in milliseconds
        #[arg(long)]
        request_timeout_ms: Option<u64>,

        /// How long SQLite waits on a locked database, in milliseconds
        #[arg(long)]
        busy_timeout_ms: Option<u64>,

        /// Refuse links to features or provisions that are not stored
        #[arg(long)]
        strict_links: bool,
    },

    /// Write a config file with every default spelled out
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show record counts
    Stats {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// List the links of a feature or of a provision
    Links {
        /// Feature identifier
        #[arg(short, long, conflicts_with = "provision", required_unless_present = "provision")]
        feature: Option<i64>,

        /// Provision identifier
        #[arg(short = 'P', long)]
        provision: Option<i64>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let file_config = config::load_config(cli.config.as_deref())?.unwrap_or_default();

    match cli.command {
        Commands::Serve { database, port, request_timeout_ms, busy_timeout_ms, strict_links } => {
            let overrides = ComplinkConfig {
                database: database.map(|p| p.display().to_string()),
                port,
                request_timeout_ms,
                busy_timeout_ms,
                require_existing_entities: strict_links.then_some(true),
            };
            let settings = file_config.merge(overrides).resolve();

            ui::header("Complink server");
            ui::info("Database", &settings.database.display().to_string());
            ui::info("Request timeout", &format!("{}ms", settings.request_timeout.as_millis()));
            if settings.require_existing_entities {
                ui::info("Links", "strict (entities must exist)");
            }

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(complink::server::start_server(settings))?;
        }

        Commands::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            config::write_config(&path, &ComplinkConfig::defaults(), force)?;
            ui::success(&format!("Wrote {}", path.display()));
        }

        Commands::Stats { database } => {
            let settings = settings_for(file_config, database);
            let manager = open_manager(&settings)?;
            let stats = manager.stats()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui::section(&format!("{} {}", Icons::DATABASE, settings.database.display()));
                println!("{}", ui::stats_table(&stats));
            }
        }

        Commands::Links { feature, provision, database } => {
            let settings = settings_for(file_config, database);
            let manager = open_manager(&settings)?;

            let (label, links) = match (feature, provision) {
                (Some(feature_id), _) => (format!("feature {}", feature_id), manager.provisions_for_feature(feature_id)?),
                (None, Some(provision_id)) => (format!("provision {}", provision_id), manager.features_for_provision(provision_id)?),
                (None, None) => anyhow::bail!("pass --feature or --provision"),
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else if links.is_empty() {
                ui::warn(&format!("No links for {}", label));
            } else {
                ui::section(&format!("{} Links for {}", Icons::LINK, label));
                println!("{}", ui::links_table(&links));
                ui::summary_row("Total:", &links.len().to_string());
            }
        }
    }

    Ok(())
}

fn settings_for(file_config: ComplinkConfig, database: Option<PathBuf>) -> Settings {
    let overrides = ComplinkConfig {
        database: database.map(|p| p.display().to_string()),
        ..Default::default()
    };
    file_config.merge(overrides).resolve()
}

fn open_manager(settings: &Settings) -> anyhow::Result<LinkManager> {
    if !settings.database.exists() {
        ui::error(&format!("No database at {}", settings.database.display()));
        anyhow::bail!("database not found (run `complink serve` to create it)");
    }
    let db = Database::open_with(&settings.database, &settings.storage_options())?;
    Ok(LinkManager::with_options(Arc::new(db), settings.manager_options()))
}
