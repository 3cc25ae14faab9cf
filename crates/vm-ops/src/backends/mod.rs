pub mod kubevirt;
pub mod memory;

pub use kubevirt::KubeClient;
pub use memory::{ApiCall, InMemoryCluster};
