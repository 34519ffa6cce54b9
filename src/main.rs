//! # Site Catalog CLI (`sitecat`)
//!
//! Builds the unified site catalog from the configured plugin directories,
//! either once (printing or writing the document) or on every request.
//!
//! ## Usage
//!
//! ```bash
//! sitecat --config ./config/sitecat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sitecat init` | Create the header cache database |
//! | `sitecat sources` | Show each source format and how many plugins it has |
//! | `sitecat build` | Build one catalog and print or write it |
//! | `sitecat serve` | Start the HTTP catalog server |
//!
//! ## Examples
//!
//! ```bash
//! # Build the primary catalog for a subscription
//! sitecat build --sub vip --host http://192.168.1.10:5757
//!
//! # Write the compact catalog to disk
//! sitecat build --compact --output data/index.json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use site_catalog::aggregate::{BuildRequest, CatalogBuilder};
use site_catalog::config::{self, Config};
use site_catalog::header_cache::SqliteHeaderStore;
use site_catalog::interpreter::LuaInterpreter;
use site_catalog::projection::{compact_document, primary_document, write_json};
use site_catalog::{migrate, server, sources};

/// Site Catalog: merges rule plugins of several formats into one catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sitecat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sitecat",
    about = "Builds a unified, filterable, sortable site catalog from rule plugin directories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sitecat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the header cache schema.
    ///
    /// Idempotent; running it again keeps existing headers.
    Init,

    /// List source formats, whether each is enabled, and its plugin count.
    Sources,

    /// Build one catalog.
    ///
    /// Prints the document to stdout unless `--output` is given.
    Build {
        /// Emit the compact document instead of the primary one.
        #[arg(long)]
        compact: bool,

        /// Subscription code to filter and order the catalog with.
        #[arg(long)]
        sub: Option<String>,

        /// Password appended to generated API URLs.
        #[arg(long)]
        pwd: Option<String>,

        /// Host used in generated URLs. Defaults to `[server]` settings.
        #[arg(long)]
        host: Option<String>,

        /// Write the document to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP catalog server on `[server].bind`.
    Serve,
}

fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries catalog documents
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_build(
    cfg: Config,
    compact: bool,
    sub: Option<String>,
    pwd: Option<String>,
    host: Option<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| cfg.default_host());
    let request = BuildRequest::new(host)
        .with_pwd(pwd)
        .with_subscription(&cfg, sub.as_deref())
        .await?;

    let cfg = Arc::new(cfg);
    let store = SqliteHeaderStore::open(&cfg).await?;
    let builder = CatalogBuilder::new(cfg, Arc::new(LuaInterpreter::new()), Arc::new(store.clone()));
    let build = builder.build(&request).await?;

    for failure in &build.merged.failures {
        eprintln!("skipped {}: {}", failure.id, failure.message);
    }

    let document = if compact {
        serde_json::to_value(compact_document(&build))?
    } else {
        primary_document(&build)?
    };

    match output {
        Some(path) => {
            write_json(&path, &document).await?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&document)?),
    }

    store.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialize_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Header cache initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Build {
            compact,
            sub,
            pwd,
            host,
            output,
        } => {
            run_build(cfg, compact, sub, pwd, host, output).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
