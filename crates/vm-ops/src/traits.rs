use std::fmt;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;

use crate::error::Result;
use crate::types::{
    AddVolumeOptions, CdiConfig, DataVolume, GuestFilesystemList, GuestOsInfo, GuestUserList,
    MemoryDumpRequest, MigrateOptions, Migration, RemoveVolumeOptions, RestartOptions,
    StartOptions, StopOptions, VirtualMachine, VirtualMachineInstance,
};

/// Which object a hotplug request is sent to.
///
/// The VMI only changes the running instance; the VM also records the
/// volume in its spec so it survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugTarget {
    Instance,
    Machine,
}

impl HotplugTarget {
    pub fn for_persist(persist: bool) -> Self {
        if persist {
            HotplugTarget::Machine
        } else {
            HotplugTarget::Instance
        }
    }
}

impl fmt::Display for HotplugTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotplugTarget::Instance => write!(f, "VirtualMachineInstance"),
            HotplugTarget::Machine => write!(f, "VirtualMachine"),
        }
    }
}

/// Calls the VM operations need from the cluster.
///
/// Every method is a single request; implementations never retry.
/// Missing objects must surface as an error for which
/// [`VmOpsError::is_not_found`](crate::VmOpsError::is_not_found) is true.
#[allow(async_fn_in_trait)]
pub trait VirtClient {
    async fn start_vm(&self, namespace: &str, name: &str, opts: &StartOptions) -> Result<()>;

    async fn stop_vm(&self, namespace: &str, name: &str, opts: &StopOptions) -> Result<()>;

    async fn restart_vm(&self, namespace: &str, name: &str, opts: &RestartOptions) -> Result<()>;

    async fn migrate_vm(&self, namespace: &str, name: &str, opts: &MigrateOptions) -> Result<()>;

    /// List migrations carrying the given label selector.
    async fn list_migrations(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<Migration>>;

    async fn delete_migration(&self, namespace: &str, name: &str) -> Result<()>;

    async fn guest_os_info(&self, namespace: &str, name: &str) -> Result<GuestOsInfo>;

    async fn user_list(&self, namespace: &str, name: &str) -> Result<GuestUserList>;

    async fn filesystem_list(&self, namespace: &str, name: &str) -> Result<GuestFilesystemList>;

    async fn add_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &AddVolumeOptions,
    ) -> Result<()>;

    async fn remove_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &RemoveVolumeOptions,
    ) -> Result<()>;

    async fn memory_dump(&self, namespace: &str, name: &str, req: &MemoryDumpRequest)
    -> Result<()>;

    async fn remove_memory_dump(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_vm(&self, namespace: &str, name: &str) -> Result<VirtualMachine>;

    async fn get_vmi(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance>;

    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<DataVolume>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    /// Fetch the cluster-scoped CDI config (`config`).
    async fn get_cdi_config(&self) -> Result<CdiConfig>;
}
