pub mod discovery;
pub mod node;
pub mod version;

// exports for lazy devs like us
pub use discovery::{discover_cluster, DockerDiscovery, NodeDiscovery};
pub use node::Node;
pub use version::ApiVersion;
