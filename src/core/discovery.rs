use async_trait::async_trait;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::future::try_join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::core::node::Node;
use crate::core::version::ApiVersion;
use crate::errors::DiscoveryError;
use crate::utils::platform::{Os, Platform};

pub const DOCKER_HOST: &str = "DOCKER_HOST";

/// Produces the fact sheet of a live node reachable through `env`.
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    async fn discover_node(&self, env: &BTreeMap<String, String>) -> Result<Node, DiscoveryError>;
}

/// The parts of a daemon's `/info` payload discovery cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DaemonInfo {
    pub name: Option<String>,
    #[serde(rename = "OSType")]
    pub os_type: Option<String>,
    pub architecture: Option<String>,
    pub operating_system: Option<String>,
    pub driver: Option<String>,
    pub experimental_build: Option<bool>,
    pub swarm: Option<SwarmInfo>,
    /// Key/value rows only a standalone (classic) swarm controller reports
    pub system_status: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SwarmInfo {
    pub control_available: Option<bool>,
}

/// The parts of a daemon's `/version` payload discovery cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonVersion {
    #[serde(rename = "ApiVersion")]
    pub api_version: Option<String>,
    #[serde(rename = "MinAPIVersion")]
    pub min_api_version: Option<String>,
}

const LEGACY_CONTROLLER_KEYS: [&str; 3] = ["Strategy", "Filters", "Nodes"];
const LEGACY_LABELS_KEY: &str = "  └ Labels";
const OSTYPE_LABEL: &str = "ostype=";

impl DaemonInfo {
    fn status_rows(&self) -> impl Iterator<Item = (&str, &str)> {
        self.system_status
            .iter()
            .flatten()
            .filter_map(|row| match row.as_slice() {
                [key, value, ..] => Some((key.as_str(), value.as_str())),
                [key] => Some((key.as_str(), "")),
                [] => None,
            })
    }

    fn has_status_key(&self, key: &str) -> bool {
        self.status_rows().any(|(k, _)| k == key)
    }

    pub fn is_legacy_controller(&self) -> bool {
        LEGACY_CONTROLLER_KEYS.iter().all(|k| self.has_status_key(k))
    }

    /// One platform per member node label row carrying `ostype=<os>`.
    fn legacy_member_platforms(&self) -> Vec<Platform> {
        self.status_rows()
            .filter(|(k, _)| *k == LEGACY_LABELS_KEY)
            .filter_map(|(_, labels)| {
                let start = labels.find(OSTYPE_LABEL)? + OSTYPE_LABEL.len();
                let os = labels[start..].split(',').next().unwrap_or_default();
                Some(Platform::new(os, ""))
            })
            .collect()
    }
}

/// Turn raw daemon facts into a [`Node`].
pub fn node_from_daemon(
    env: BTreeMap<String, String>,
    info: &DaemonInfo,
    version: &DaemonVersion,
) -> Result<Node, DiscoveryError> {
    let arch = info.architecture.as_deref().unwrap_or_default();
    let mut host_platform = Platform::new(info.os_type.as_deref().unwrap_or_default(), arch);
    let is_legacy_controller = info.is_legacy_controller();

    // classic swarm leaves OSType empty and reports the OS name instead
    if is_legacy_controller && host_platform.os.is_empty() {
        host_platform.os = Os::normalize(info.operating_system.as_deref().unwrap_or_default());
    }

    let mut supported_platforms = vec![host_platform.clone()];
    if host_platform.os == Os::WINDOWS
        && info.driver.as_deref().is_some_and(|d| d.contains("lcow"))
    {
        supported_platforms.push(Platform::new(Os::LCOW, arch));
    }
    if is_legacy_controller {
        supported_platforms.extend(info.legacy_member_platforms());
    }

    let min = version
        .min_api_version
        .as_deref()
        .ok_or(DiscoveryError::MissingField("MinAPIVersion"))?;
    let max = version
        .api_version
        .as_deref()
        .ok_or(DiscoveryError::MissingField("ApiVersion"))?;

    Ok(Node {
        name: info.name.clone().unwrap_or_default(),
        env,
        host_platform,
        supported_platforms,
        is_manager: info
            .swarm
            .as_ref()
            .and_then(|s| s.control_available)
            .unwrap_or(false),
        is_legacy_controller,
        min_api_version: ApiVersion::parse(min)?,
        max_api_version: ApiVersion::parse(max)?,
        experimental: info.experimental_build.unwrap_or(false),
    })
}

/// Discovers nodes by querying their Docker API.
#[derive(Debug, Clone)]
pub struct DockerDiscovery {
    timeout_secs: u64,
}

impl Default for DockerDiscovery {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl DockerDiscovery {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn connect(&self, env: &BTreeMap<String, String>) -> Result<Docker, DiscoveryError> {
        let docker = match env.get(DOCKER_HOST) {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, self.timeout_secs, API_DEFAULT_VERSION)?
            }
            Some(host) => Docker::connect_with_http(host, self.timeout_secs, API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(docker)
    }
}

#[async_trait]
impl NodeDiscovery for DockerDiscovery {
    async fn discover_node(&self, env: &BTreeMap<String, String>) -> Result<Node, DiscoveryError> {
        let host = env.get(DOCKER_HOST).map(String::as_str).unwrap_or("local");
        debug!(host, "Querying daemon");

        let docker = self.connect(env)?.negotiate_version().await?;

        // go through JSON so only the fields above need to line up with the API models
        let info: DaemonInfo = serde_json::from_value(serde_json::to_value(docker.info().await?)?)?;
        let version: DaemonVersion =
            serde_json::from_value(serde_json::to_value(docker.version().await?)?)?;

        let node = node_from_daemon(env.clone(), &info, &version)?;
        info!(
            host,
            node = %node.name,
            platform = %node.host_platform,
            min_api = %node.min_api_version,
            max_api = %node.max_api_version,
            "Discovered node"
        );
        Ok(node)
    }
}

/// Discover every environment concurrently; nodes keep the input order.
pub async fn discover_cluster<D>(
    discovery: &D,
    envs: Vec<BTreeMap<String, String>>,
) -> Result<Cluster, DiscoveryError>
where
    D: NodeDiscovery + ?Sized,
{
    let nodes = try_join_all(envs.iter().map(|env| discovery.discover_node(env))).await?;
    Ok(Cluster::from_nodes(nodes))
}

/// Environment map pointing a client at `host`.
pub fn host_env(host: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(DOCKER_HOST.to_string(), host.to_string())])
}
