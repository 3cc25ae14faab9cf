pub mod backends;
pub mod config;
pub mod error;
pub mod guest;
pub mod hotplug;
pub mod lifecycle;
pub mod memory_dump;
pub mod operation;
pub mod overhead;
pub mod quantity;
pub mod traits;
pub mod types;

pub use backends::{InMemoryCluster, KubeClient};
pub use config::ClientSettings;
pub use error::{Result, VmOpsError};
pub use guest::GuestQuery;
pub use hotplug::{AddVolume, RemoveVolume};
pub use lifecycle::Shutdown;
pub use memory_dump::{ClaimPlan, MemoryDumpAction};
pub use operation::{MemoryDump, Operation};
pub use quantity::CapacityQuantity;
pub use traits::{HotplugTarget, VirtClient};
pub use types::{AccessMode, CacheMode, VolumeReference};
