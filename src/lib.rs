pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod scheduler;
pub mod utils;

// Re-exports
pub use cluster::{Cluster, NodePredicate, Predicate};
pub use crate::core::{ApiVersion, Node};
pub use errors::{DispatchError, FleetError, FleetResult};
pub use scheduler::{Context, Dispatcher};
pub use utils::platform::{Arch, Os, Platform};
