/*
* Configuration layering, lowest to highest priority:
*
* 1. Hardcoded defaults (set_default below)
* 2. $CONFIG_PATH/default.{toml,json,yaml} (optional)
* 3. $CONFIG_PATH/local.{toml,json,yaml} (optional)
* 4. FLEET_* environment variables, `__` between section and key,
*    e.g. FLEET_DISPATCH__WAIT_TIMEOUT_SECS=30
*
* CONFIG_PATH defaults to ./config.
*/

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub discovery: DiscoverySettings,
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// JSON cluster description read by `nodes` / `run` and written by `discover`
    pub description_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Daemon addresses (`tcp://host:2375`, `unix:///var/run/docker.sock`)
    pub hosts: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// How long `run` may wait for a reservation; 0 waits forever
    pub wait_timeout_secs: u64,
}

impl DispatchSettings {
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// tracing filter used when RUST_LOG is not set
    pub filter: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| "config".to_string());

        info!("Loading configuration from path: {}", config_path);

        Self::defaults()?
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with one explicit file (which must exist).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        Self::defaults()?
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = generate_default_config();
        Config::builder()
            .set_default(
                "cluster.description_path",
                defaults.cluster.description_path.to_string_lossy().into_owned(),
            )?
            .set_default("discovery.hosts", Vec::<String>::new())?
            .set_default("discovery.timeout_secs", defaults.discovery.timeout_secs)?
            .set_default("dispatch.wait_timeout_secs", defaults.dispatch.wait_timeout_secs)?
            .set_default("logging.filter", defaults.logging.filter)
    }

    fn environment() -> Environment {
        Environment::with_prefix("FLEET")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("discovery.hosts")
            .try_parsing(true)
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        cluster: ClusterSettings {
            description_path: PathBuf::from("cluster.json"),
        },
        discovery: DiscoverySettings {
            hosts: Vec::new(),
            timeout_secs: 30,
        },
        dispatch: DispatchSettings {
            wait_timeout_secs: 0,
        },
        logging: LoggingSettings {
            filter: "info".to_string(),
        },
    }
}
