use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use crate::error::{Result, VmOpsError};
use crate::overhead::FilesystemOverhead;
use crate::quantity::CapacityQuantity;
use crate::traits::{HotplugTarget, VirtClient};
use crate::types::{
    AddVolumeOptions, CdiConfig, CdiConfigStatus, DataVolume, DomainSpec, GuestFilesystemList,
    GuestOsInfo, GuestUserList, MIGRATION_SELECTOR_LABEL, MemoryDumpRequest, MemoryDumpStatus,
    MigrateOptions, Migration, MigrationPhase, MigrationStatus, RemoveVolumeOptions,
    ResourceRequirements, RestartOptions, StartOptions, StopOptions, VirtualMachine,
    VirtualMachineInstance, VirtualMachineStatus, VmiSpec,
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn not_found(kind: &str, name: &str) -> VmOpsError {
    VmOpsError::not_found(format!("{kind} \"{name}\" not found"))
}

fn bad_request(message: impl Into<String>) -> VmOpsError {
    VmOpsError::Api {
        code: 400,
        reason: "BadRequest".into(),
        message: message.into(),
    }
}

/// One request as seen by the in-memory cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    StartVm { namespace: String, name: String, opts: StartOptions },
    StopVm { namespace: String, name: String, opts: StopOptions },
    RestartVm { namespace: String, name: String, opts: RestartOptions },
    MigrateVm { namespace: String, name: String, opts: MigrateOptions },
    ListMigrations { namespace: String, label_selector: String },
    DeleteMigration { namespace: String, name: String },
    GuestOsInfo { namespace: String, name: String },
    UserList { namespace: String, name: String },
    FilesystemList { namespace: String, name: String },
    AddVolume { target: HotplugTarget, namespace: String, name: String, opts: AddVolumeOptions },
    RemoveVolume { target: HotplugTarget, namespace: String, name: String, opts: RemoveVolumeOptions },
    MemoryDump { namespace: String, name: String, req: MemoryDumpRequest },
    RemoveMemoryDump { namespace: String, name: String },
    GetVm { namespace: String, name: String },
    GetVmi { namespace: String, name: String },
    GetDataVolume { namespace: String, name: String },
    GetPvc { namespace: String, name: String },
    CreatePvc { namespace: String, pvc: Box<PersistentVolumeClaim> },
    GetCdiConfig,
}

impl ApiCall {
    /// Stable method name, used to key injected failures.
    pub fn method(&self) -> &'static str {
        match self {
            ApiCall::StartVm { .. } => "start_vm",
            ApiCall::StopVm { .. } => "stop_vm",
            ApiCall::RestartVm { .. } => "restart_vm",
            ApiCall::MigrateVm { .. } => "migrate_vm",
            ApiCall::ListMigrations { .. } => "list_migrations",
            ApiCall::DeleteMigration { .. } => "delete_migration",
            ApiCall::GuestOsInfo { .. } => "guest_os_info",
            ApiCall::UserList { .. } => "user_list",
            ApiCall::FilesystemList { .. } => "filesystem_list",
            ApiCall::AddVolume { .. } => "add_volume",
            ApiCall::RemoveVolume { .. } => "remove_volume",
            ApiCall::MemoryDump { .. } => "memory_dump",
            ApiCall::RemoveMemoryDump { .. } => "remove_memory_dump",
            ApiCall::GetVm { .. } => "get_vm",
            ApiCall::GetVmi { .. } => "get_vmi",
            ApiCall::GetDataVolume { .. } => "get_data_volume",
            ApiCall::GetPvc { .. } => "get_pvc",
            ApiCall::CreatePvc { .. } => "create_pvc",
            ApiCall::GetCdiConfig => "get_cdi_config",
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    vms: BTreeMap<Key, VirtualMachine>,
    vmis: BTreeMap<Key, VirtualMachineInstance>,
    data_volumes: BTreeSet<Key>,
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    migrations: BTreeMap<Key, Migration>,
    guests: BTreeMap<Key, GuestOsInfo>,
    cdi_config: Option<CdiConfig>,
    failures: BTreeMap<&'static str, (u16, String)>,
    calls: Vec<ApiCall>,
}

impl ClusterState {
    /// Record the call and return the injected failure for it, if any.
    fn record(&mut self, call: ApiCall) -> Result<()> {
        let method = call.method();
        self.calls.push(call);
        match self.failures.get(method) {
            Some((code, reason)) => Err(VmOpsError::Api {
                code: *code,
                reason: reason.clone(),
                message: format!("injected failure for {method}"),
            }),
            None => Ok(()),
        }
    }

    fn require_vm(&self, namespace: &str, name: &str) -> Result<&VirtualMachine> {
        self.vms
            .get(&key(namespace, name))
            .ok_or_else(|| not_found("virtualmachines.kubevirt.io", name))
    }

    fn require_vmi(&self, namespace: &str, name: &str) -> Result<&VirtualMachineInstance> {
        self.vmis
            .get(&key(namespace, name))
            .ok_or_else(|| not_found("virtualmachineinstances.kubevirt.io", name))
    }

    fn require_hotplug_target(&self, target: HotplugTarget, namespace: &str, name: &str) -> Result<()> {
        match target {
            HotplugTarget::Instance => self.require_vmi(namespace, name).map(|_| ()),
            HotplugTarget::Machine => self.require_vm(namespace, name).map(|_| ()),
        }
    }
}

/// In-process cluster for development and tests.
///
/// Holds just enough state to answer the lookups the VM operations make,
/// records every request in order, and can be told to fail a method with a
/// given HTTP status.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_vm(self, namespace: &str, name: &str) -> Self {
        let vm = VirtualMachine {
            metadata: meta(namespace, name),
            status: VirtualMachineStatus::default(),
        };
        self.state().vms.insert(key(namespace, name), vm);
        self
    }

    /// Add a running instance whose memory request is `memory`.
    pub fn with_vmi(self, namespace: &str, name: &str, memory: CapacityQuantity) -> Self {
        let vmi = VirtualMachineInstance {
            metadata: meta(namespace, name),
            spec: VmiSpec {
                domain: DomainSpec {
                    resources: ResourceRequirements {
                        requests: BTreeMap::from([("memory".to_string(), memory)]),
                    },
                    memory: None,
                },
            },
        };
        self.state().vmis.insert(key(namespace, name), vmi);
        self
    }

    pub fn with_data_volume(self, namespace: &str, name: &str) -> Self {
        self.state().data_volumes.insert(key(namespace, name));
        self
    }

    pub fn with_pvc(self, namespace: &str, name: &str) -> Self {
        let pvc = PersistentVolumeClaim {
            metadata: meta(namespace, name),
            ..Default::default()
        };
        self.state().pvcs.insert(key(namespace, name), pvc);
        self
    }

    pub fn with_migration(
        self,
        namespace: &str,
        name: &str,
        vmi: &str,
        phase: MigrationPhase,
    ) -> Self {
        let mut metadata = meta(namespace, name);
        metadata.labels = Some(BTreeMap::from([(
            MIGRATION_SELECTOR_LABEL.to_string(),
            vmi.to_string(),
        )]));
        let migration = Migration {
            metadata,
            status: MigrationStatus { phase: Some(phase) },
        };
        self.state().migrations.insert(key(namespace, name), migration);
        self
    }

    pub fn with_guest_info(self, namespace: &str, name: &str, info: GuestOsInfo) -> Self {
        self.state().guests.insert(key(namespace, name), info);
        self
    }

    pub fn with_cdi_overhead(self, overhead: Option<FilesystemOverhead>) -> Self {
        self.state().cdi_config = Some(CdiConfig {
            metadata: ObjectMeta {
                name: Some(crate::overhead::CDI_CONFIG_NAME.to_string()),
                ..Default::default()
            },
            status: CdiConfigStatus {
                filesystem_overhead: overhead,
            },
        });
        self
    }

    /// Mark `vm` as already holding a memory dump association with `claim`.
    pub fn with_memory_dump_association(self, namespace: &str, vm: &str, claim: &str) -> Self {
        if let Some(vm) = self.state().vms.get_mut(&key(namespace, vm)) {
            vm.status.memory_dump_request = Some(MemoryDumpStatus {
                claim_name: claim.to_string(),
                phase: Some("Completed".to_string()),
                file_name: None,
            });
        }
        self
    }

    /// Make every call to `method` fail with the given status.
    pub fn fail_on(self, method: &'static str, code: u16, reason: &str) -> Self {
        self.state()
            .failures
            .insert(method, (code, reason.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state().pvcs.get(&key(namespace, name)).cloned()
    }

    pub fn vm(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        self.state().vms.get(&key(namespace, name)).cloned()
    }

    pub fn migration_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .migrations
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// Match `key=value` or `key==value` against a label set.
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let Some((k, v)) = selector
        .split_once("==")
        .or_else(|| selector.split_once('='))
    else {
        return false;
    };
    labels.and_then(|l| l.get(k)).is_some_and(|value| value == v)
}

impl VirtClient for InMemoryCluster {
    async fn start_vm(&self, namespace: &str, name: &str, opts: &StartOptions) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::StartVm {
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_vm(namespace, name)?;
        info!(namespace = %namespace, vm = %name, "in-memory: start");
        Ok(())
    }

    async fn stop_vm(&self, namespace: &str, name: &str, opts: &StopOptions) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::StopVm {
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_vm(namespace, name)?;
        info!(namespace = %namespace, vm = %name, "in-memory: stop");
        Ok(())
    }

    async fn restart_vm(&self, namespace: &str, name: &str, opts: &RestartOptions) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::RestartVm {
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_vm(namespace, name)?;
        info!(namespace = %namespace, vm = %name, "in-memory: restart");
        Ok(())
    }

    async fn migrate_vm(&self, namespace: &str, name: &str, opts: &MigrateOptions) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::MigrateVm {
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_vm(namespace, name)?;
        info!(namespace = %namespace, vm = %name, "in-memory: migrate");
        Ok(())
    }

    async fn list_migrations(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Migration>> {
        let mut state = self.state();
        state.record(ApiCall::ListMigrations {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
        })?;
        Ok(state
            .migrations
            .iter()
            .filter(|((ns, _), mig)| {
                ns == namespace && selector_matches(label_selector, mig.metadata.labels.as_ref())
            })
            .map(|(_, mig)| mig.clone())
            .collect())
    }

    async fn delete_migration(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::DeleteMigration {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state
            .migrations
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("virtualmachineinstancemigrations.kubevirt.io", name))
    }

    async fn guest_os_info(&self, namespace: &str, name: &str) -> Result<GuestOsInfo> {
        let mut state = self.state();
        state.record(ApiCall::GuestOsInfo {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vmi(namespace, name)?;
        Ok(state
            .guests
            .get(&key(namespace, name))
            .cloned()
            .unwrap_or_default())
    }

    async fn user_list(&self, namespace: &str, name: &str) -> Result<GuestUserList> {
        let mut state = self.state();
        state.record(ApiCall::UserList {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vmi(namespace, name)?;
        let items = state
            .guests
            .get(&key(namespace, name))
            .map(|g| g.user_list.clone())
            .unwrap_or_default();
        Ok(GuestUserList {
            items,
            ..Default::default()
        })
    }

    async fn filesystem_list(&self, namespace: &str, name: &str) -> Result<GuestFilesystemList> {
        let mut state = self.state();
        state.record(ApiCall::FilesystemList {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vmi(namespace, name)?;
        let items = state
            .guests
            .get(&key(namespace, name))
            .map(|g| g.fs_info.disks.clone())
            .unwrap_or_default();
        Ok(GuestFilesystemList {
            items,
            ..Default::default()
        })
    }

    async fn add_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &AddVolumeOptions,
    ) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::AddVolume {
            target,
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_hotplug_target(target, namespace, name)
    }

    async fn remove_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &RemoveVolumeOptions,
    ) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::RemoveVolume {
            target,
            namespace: namespace.into(),
            name: name.into(),
            opts: opts.clone(),
        })?;
        state.require_hotplug_target(target, namespace, name)
    }

    async fn memory_dump(
        &self,
        namespace: &str,
        name: &str,
        req: &MemoryDumpRequest,
    ) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::MemoryDump {
            namespace: namespace.into(),
            name: name.into(),
            req: req.clone(),
        })?;
        let current = state.require_vm(namespace, name)?.status.memory_dump_request.clone();
        let claim_name = match (req.claim_name.as_str(), current) {
            ("", Some(existing)) => existing.claim_name,
            ("", None) => return Err(bad_request("missing claim name for memory dump")),
            (claim, _) => claim.to_string(),
        };
        if !state.pvcs.contains_key(&key(namespace, &claim_name)) {
            return Err(bad_request(format!("pvc {claim_name} does not exist")));
        }
        if let Some(vm) = state.vms.get_mut(&key(namespace, name)) {
            vm.status.memory_dump_request = Some(MemoryDumpStatus {
                claim_name,
                phase: Some("InProgress".to_string()),
                file_name: None,
            });
        }
        Ok(())
    }

    async fn remove_memory_dump(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record(ApiCall::RemoveMemoryDump {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vm(namespace, name)?;
        let vm = state.vms.get_mut(&key(namespace, name));
        match vm.and_then(|vm| vm.status.memory_dump_request.take()) {
            Some(_) => Ok(()),
            None => Err(bad_request(format!("VM {name} has no memory dump association"))),
        }
    }

    async fn get_vm(&self, namespace: &str, name: &str) -> Result<VirtualMachine> {
        let mut state = self.state();
        state.record(ApiCall::GetVm {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vm(namespace, name).cloned()
    }

    async fn get_vmi(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance> {
        let mut state = self.state();
        state.record(ApiCall::GetVmi {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state.require_vmi(namespace, name).cloned()
    }

    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<DataVolume> {
        let mut state = self.state();
        state.record(ApiCall::GetDataVolume {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        if state.data_volumes.contains(&key(namespace, name)) {
            Ok(DataVolume {
                metadata: meta(namespace, name),
            })
        } else {
            Err(not_found("datavolumes.cdi.kubevirt.io", name))
        }
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let mut state = self.state();
        state.record(ApiCall::GetPvc {
            namespace: namespace.into(),
            name: name.into(),
        })?;
        state
            .pvcs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("persistentvolumeclaims", name))
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let mut state = self.state();
        state.record(ApiCall::CreatePvc {
            namespace: namespace.into(),
            pvc: Box::new(pvc.clone()),
        })?;
        let name = pvc.metadata.name.clone().unwrap_or_default();
        if state.pvcs.contains_key(&key(namespace, &name)) {
            return Err(VmOpsError::Api {
                code: 409,
                reason: "AlreadyExists".into(),
                message: format!("persistentvolumeclaims \"{name}\" already exists"),
            });
        }
        let mut created = pvc.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        state.pvcs.insert(key(namespace, &name), created.clone());
        info!(namespace = %namespace, claim = %name, "in-memory: PVC created");
        Ok(created)
    }

    async fn get_cdi_config(&self) -> Result<CdiConfig> {
        let mut state = self.state();
        state.record(ApiCall::GetCdiConfig)?;
        state
            .cdi_config
            .clone()
            .ok_or_else(|| not_found("cdiconfigs.cdi.kubevirt.io", crate::overhead::CDI_CONFIG_NAME))
    }
}
