//! Centralized configuration for Sluice.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public UDP trackers appended to every acquisition's announce hints.
pub const DEFAULT_TRACKERS: [&str; 5] = [
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
];

/// Central configuration for all Sluice components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SluiceConfig {
    pub acquisition: AcquisitionConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

/// Acquisition timing and announce defaults.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Hard limit on waiting for pack metadata
    pub metadata_timeout: Duration,
    /// Advisory limit on the readiness wait of `/add`
    pub readiness_timeout: Duration,
    /// Progress fraction at which a pack counts as streamable
    pub readiness_min_progress: f64,
    /// How often the readiness gate re-reads progress
    pub readiness_poll_interval: Duration,
    /// Announce endpoints merged into every add
    pub default_trackers: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(30),
            readiness_timeout: Duration::from_secs(15),
            readiness_min_progress: 0.01,
            readiness_poll_interval: Duration::from_secs(1),
            default_trackers: DEFAULT_TRACKERS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base of generated stream URLs (None = `http://localhost:{port}`)
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL used when building stream URLs, without trailing slash.
    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }
}

/// Which content engine backs the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineBackend {
    /// In-memory swarm with synthetic or seeded content
    #[default]
    Simulated,
    /// Packs served from a local library directory
    Directory,
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

impl FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(Self::Simulated),
            "directory" | "dir" => Ok(Self::Directory),
            _ => Err(format!(
                "Invalid engine backend: '{s}'. Valid options are: simulated, directory"
            )),
        }
    }
}

/// Engine selection and backend parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    /// Library root for the directory backend
    pub library_dir: Option<PathBuf>,
    pub simulation: SimulationConfig,
}

/// Simulated swarm parameters.
///
/// With a fixed seed the swarm is fully deterministic apart from wall-clock
/// scheduling.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Time from add to metadata
    pub metadata_delay: Duration,
    /// Download rate in bytes per second
    pub download_rate_bps: u64,
    /// Granularity of simulated downloading
    pub tick_interval: Duration,
    pub piece_size: u64,
    /// Upper bound of the reported peer count
    pub peer_count: usize,
    pub seed: u64,
    /// Size of the main file in synthetic packs
    pub synthetic_file_size: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            metadata_delay: Duration::from_secs(2),
            download_rate_bps: 4 * 1024 * 1024, // 4 MiB/s
            tick_interval: Duration::from_millis(250),
            piece_size: 256 * 1024,
            peer_count: 12,
            seed: 42,
            synthetic_file_size: 64 * 1024 * 1024,
        }
    }
}

impl SimulationConfig {
    /// Small, fast swarm for tests.
    pub fn deterministic_testing() -> Self {
        Self {
            metadata_delay: Duration::from_millis(20),
            download_rate_bps: 16 * 1024 * 1024,
            tick_interval: Duration::from_millis(10),
            piece_size: 16 * 1024,
            peer_count: 4,
            seed: 42,
            synthetic_file_size: 1024 * 1024,
        }
    }
}

impl SluiceConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("SLUICE_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("SLUICE_PORT") {
            config.server.port = port;
        }
        if let Ok(url) = std::env::var("SLUICE_PUBLIC_URL") {
            config.server.public_base_url = Some(url);
        }

        if let Some(backend) = env_parse::<EngineBackend>("SLUICE_BACKEND") {
            config.engine.backend = backend;
        }
        if let Ok(dir) = std::env::var("SLUICE_LIBRARY_DIR") {
            config.engine.library_dir = Some(PathBuf::from(dir));
        }

        if let Some(seconds) = env_parse::<u64>("SLUICE_METADATA_TIMEOUT") {
            config.acquisition.metadata_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse::<u64>("SLUICE_READINESS_TIMEOUT") {
            config.acquisition.readiness_timeout = Duration::from_secs(seconds);
        }
        if let Some(progress) = env_parse::<f64>("SLUICE_MIN_PROGRESS")
            && (0.0..=1.0).contains(&progress)
        {
            config.acquisition.readiness_min_progress = progress;
        }

        if let Some(rate) = env_parse::<u64>("SLUICE_SIM_RATE") {
            config.engine.simulation.download_rate_bps = rate;
        }
        if let Some(seed) = env_parse::<u64>("SLUICE_SIM_SEED") {
            config.engine.simulation.seed = seed;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            acquisition: AcquisitionConfig {
                metadata_timeout: Duration::from_secs(2),
                readiness_timeout: Duration::from_millis(500),
                readiness_poll_interval: Duration::from_millis(10),
                default_trackers: Vec::new(),
                ..Default::default()
            },
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            engine: EngineConfig {
                simulation: SimulationConfig::deterministic_testing(),
                ..Default::default()
            },
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
