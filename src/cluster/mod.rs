pub mod predicate;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::core::node::Node;
use crate::errors::FleetResult;

pub use predicate::{NodePredicate, Predicate};

/// Immutable description of a fleet of nodes.
///
/// The aggregate role flags are computed once at construction (and again on
/// decode, so a hand-edited description can't disagree with its nodes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ClusterDescription")]
pub struct Cluster {
    nodes: Vec<Arc<Node>>,
    has_manager: bool,
    has_legacy_controller: bool,
}

#[derive(Deserialize)]
struct ClusterDescription {
    #[serde(default)]
    nodes: Vec<Node>,
}

impl From<ClusterDescription> for Cluster {
    fn from(description: ClusterDescription) -> Self {
        Cluster::from_nodes(description.nodes)
    }
}

impl Cluster {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let nodes: Vec<Arc<Node>> = nodes.into_iter().map(Arc::new).collect();
        let has_manager = nodes.iter().any(|n| n.is_manager);
        let has_legacy_controller = nodes.iter().any(|n| n.is_legacy_controller);

        Self {
            nodes,
            has_manager,
            has_legacy_controller,
        }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Arc<Node>> {
        self.nodes.get(index)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_manager(&self) -> bool {
        self.has_manager
    }

    pub fn has_legacy_controller(&self) -> bool {
        self.has_legacy_controller
    }

    /// Every node matching `predicate`, in cluster order.
    pub fn find_nodes<P>(&self, predicate: &P) -> Vec<Arc<Node>>
    where
        P: NodePredicate + ?Sized,
    {
        self.nodes
            .iter()
            .filter(|n| predicate.matches(n))
            .cloned()
            .collect()
    }

    /// Cluster indices of the nodes matching `predicate`, ascending.
    pub(crate) fn matching_indices<P>(&self, predicate: &P) -> Vec<usize>
    where
        P: NodePredicate + ?Sized,
    {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| predicate.matches(n))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Read a JSON cluster description.
    pub fn load(path: impl AsRef<Path>) -> FleetResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let cluster: Cluster = serde_json::from_str(&raw)?;
        info!(path = %path.display(), nodes = cluster.len(), "Loaded cluster description");
        Ok(cluster)
    }

    /// Write this cluster as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> FleetResult<()> {
        let path = path.as_ref();
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), nodes = self.len(), "Saved cluster description");
        Ok(())
    }
}

impl FromIterator<Node> for Cluster {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Cluster::from_nodes(iter.into_iter().collect())
    }
}
