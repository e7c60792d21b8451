use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::version::ApiVersion;
use crate::utils::platform::{Os, Platform};

/// Describes a machine running a container daemon.
///
/// Nodes are plain fact sheets; once a node is handed to a
/// [`Cluster`](crate::cluster::Cluster) it is shared behind an `Arc` and
/// never changes again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    /// Environment a client needs to reach this daemon (`DOCKER_HOST`, ...)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub host_platform: Platform,
    /// Extra platforms the node can run, e.g. lcow on a Windows host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_platforms: Vec<Platform>,
    #[serde(default, rename = "manager")]
    pub is_manager: bool,
    #[serde(default, rename = "legacyController")]
    pub is_legacy_controller: bool,
    pub min_api_version: ApiVersion,
    pub max_api_version: ApiVersion,
    #[serde(default)]
    pub experimental: bool,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.host_platform = platform;
        self
    }

    pub fn with_supported_platform(mut self, platform: Platform) -> Self {
        self.supported_platforms.push(platform);
        self
    }

    pub fn with_manager(mut self, is_manager: bool) -> Self {
        self.is_manager = is_manager;
        self
    }

    pub fn with_legacy_controller(mut self, is_legacy_controller: bool) -> Self {
        self.is_legacy_controller = is_legacy_controller;
        self
    }

    pub fn with_api_range(mut self, min: ApiVersion, max: ApiVersion) -> Self {
        self.min_api_version = min;
        self.max_api_version = max;
        self
    }

    pub fn with_experimental(mut self, experimental: bool) -> Self {
        self.experimental = experimental;
        self
    }

    /// Host platform first, then the additional ones in declaration order.
    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        std::iter::once(&self.host_platform).chain(self.supported_platforms.iter())
    }

    pub fn supports_os(&self, os: &Os) -> bool {
        self.platforms().any(|p| &p.os == os)
    }

    pub fn supports_platform(&self, platform: &Platform) -> bool {
        self.platforms().any(|p| p == platform)
    }

    pub fn supports_api_version(&self, version: ApiVersion) -> bool {
        self.min_api_version.lower_or_equals(version)
            && self.max_api_version.greater_or_equals(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::platform::Arch;

    fn lcow_host() -> Node {
        Node::new("win-lcow")
            .with_platform(Platform::new(Os::WINDOWS, Arch::AMD64))
            .with_supported_platform(Platform::new(Os::LCOW, Arch::AMD64))
            .with_api_range(ApiVersion::new(1, 24), ApiVersion::new(1, 41))
    }

    #[test]
    fn additional_platforms_count_as_supported() {
        let node = lcow_host();
        assert!(node.supports_os(&Os::WINDOWS));
        assert!(node.supports_os(&Os::LCOW));
        assert!(!node.supports_os(&Os::LINUX));
        assert!(node.supports_platform(&Platform::new("lcow", "x86_64")));
        assert!(!node.supports_platform(&Platform::new("lcow", "arm64")));
    }

    #[test]
    fn api_range_is_inclusive() {
        let node = lcow_host();
        assert!(node.supports_api_version(ApiVersion::new(1, 24)));
        assert!(node.supports_api_version(ApiVersion::new(1, 41)));
        assert!(node.supports_api_version(ApiVersion::new(1, 30)));
        assert!(!node.supports_api_version(ApiVersion::new(1, 23)));
        assert!(!node.supports_api_version(ApiVersion::new(1, 42)));
        assert!(!node.supports_api_version(ApiVersion::new(2, 0)));
    }

    #[test]
    fn json_field_names() {
        let node = lcow_host().with_env("DOCKER_HOST", "tcp://10.0.0.5:2375");
        let value = serde_json::to_value(&node).unwrap();

        assert_eq!(value["name"], "win-lcow");
        assert_eq!(value["env"]["DOCKER_HOST"], "tcp://10.0.0.5:2375");
        assert_eq!(value["hostPlatform"]["os"], "windows");
        assert_eq!(value["supportedPlatforms"][0]["os"], "lcow");
        assert_eq!(value["manager"], false);
        assert_eq!(value["legacyController"], false);
        assert_eq!(value["minApiVersion"], "1.24");
        assert_eq!(value["maxApiVersion"], "1.41");

        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn empty_supported_platforms_are_omitted() {
        let node = Node::new("plain");
        let value = serde_json::to_value(&node).unwrap();
        assert!(value.get("supportedPlatforms").is_none());
    }
}
