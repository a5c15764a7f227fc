//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::Subcommand;
use sluice_core::config::{EngineBackend, SluiceConfig};
use sluice_core::engine::{DirectoryEngine, EngineHints};
use sluice_core::tracing_setup::{CliLogLevel, init_tracing};
use sluice_core::{ContentDescriptor, SluiceError};
use tracing::{error, info};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Host to bind to (overrides SLUICE_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides SLUICE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Content engine backend (overrides SLUICE_BACKEND)
        #[arg(long)]
        backend: Option<EngineBackend>,
        /// Library directory for the directory backend
        #[arg(long)]
        library_dir: Option<PathBuf>,
        /// Base URL used in generated stream URLs
        #[arg(long)]
        public_url: Option<String>,
        /// Console log level
        #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
        log_level: CliLogLevel,
        /// Directory for the full-trace log file
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Parse a descriptor and print what the gateway would hand the engine
    Parse {
        /// Magnet URI or bare 40-character identifier
        descriptor: String,
    },
    /// List the packs a directory backend would serve, with their identifiers
    Library {
        /// Library directory
        dir: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of whichever command fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            backend,
            library_dir,
            public_url,
            log_level,
            logs_dir,
        } => {
            init_tracing(log_level.as_tracing_level(), logs_dir.as_deref())
                .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;
            install_panic_hook();

            let mut config = SluiceConfig::from_env();
            apply_overrides(
                &mut config,
                ServeOverrides {
                    host,
                    port,
                    backend,
                    library_dir,
                    public_url,
                },
            )?;
            serve(config).await
        }
        Commands::Parse { descriptor } => parse_descriptor(&descriptor),
        Commands::Library { dir } => list_library(&dir).await,
    }
}

struct ServeOverrides {
    host: Option<String>,
    port: Option<u16>,
    backend: Option<EngineBackend>,
    library_dir: Option<PathBuf>,
    public_url: Option<String>,
}

/// Command-line flags win over the environment.
fn apply_overrides(config: &mut SluiceConfig, overrides: ServeOverrides) -> anyhow::Result<()> {
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(url) = overrides.public_url {
        config.server.public_base_url = Some(url);
    }
    if let Some(dir) = overrides.library_dir {
        config.engine.library_dir = Some(dir);
        // A library without an explicit backend means the directory backend.
        if overrides.backend.is_none() {
            config.engine.backend = EngineBackend::Directory;
        }
    }
    if let Some(backend) = overrides.backend {
        config.engine.backend = backend;
    }

    if config.engine.backend == EngineBackend::Directory && config.engine.library_dir.is_none() {
        return Err(SluiceError::Configuration {
            reason: "the directory backend needs --library-dir or SLUICE_LIBRARY_DIR".to_string(),
        }
        .into());
    }
    Ok(())
}

async fn serve(config: SluiceConfig) -> anyhow::Result<()> {
    info!(
        "Starting gateway: backend={}, bind={}:{}, public_url={}",
        config.engine.backend,
        config.server.host,
        config.server.port,
        config.server.base_url()
    );
    info!(
        "Timeouts: metadata={:?}, readiness={:?} at {:.1}%",
        config.acquisition.metadata_timeout,
        config.acquisition.readiness_timeout,
        config.acquisition.readiness_min_progress * 100.0
    );

    sluice_web::run_server(config)
        .await
        .map_err(|e| anyhow!("gateway failed: {e}"))
}

fn parse_descriptor(raw: &str) -> anyhow::Result<()> {
    let descriptor = ContentDescriptor::parse(raw).context("invalid descriptor")?;
    let config = SluiceConfig::from_env();
    let hints = EngineHints::merged(&descriptor, &config.acquisition.default_trackers);

    println!("Identifier: {}", descriptor.id);
    println!(
        "Name:       {}",
        descriptor.display_name.as_deref().unwrap_or("(none)")
    );
    println!("Trackers ({}):", hints.announce.len());
    for tracker in &hints.announce {
        println!("  {tracker}");
    }
    if let Err(e) = hints.validate() {
        println!("Warning: {e}");
    }
    Ok(())
}

async fn list_library(dir: &Path) -> anyhow::Result<()> {
    let engine = DirectoryEngine::open(dir)
        .await
        .with_context(|| format!("cannot open library {}", dir.display()))?;

    let catalog = engine.catalog();
    println!("Library: {}", engine.root().display());
    println!("{:-<60}", "");
    if catalog.is_empty() {
        println!("No packs found.");
        return Ok(());
    }

    for entry in catalog {
        println!("{}  {}", entry.id, entry.metadata.name);
        for (index, file) in entry.metadata.files.iter().enumerate() {
            println!(
                "    [{index}] {} ({:.1} MB)",
                file.path,
                file.length as f64 / 1_048_576.0
            );
        }
    }
    Ok(())
}

/// Routes panic messages through tracing so they reach the trace file.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        error!("Panic at {}: {}", location, message);
    }));
}
