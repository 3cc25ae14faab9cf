use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VmOpsError};
use crate::overhead::FilesystemOverhead;
use crate::quantity::CapacityQuantity;

/// Value the API server expects in `dryRun` to skip persisting changes.
pub const DRY_RUN_ALL: &str = "All";

/// Label KubeVirt puts on every migration of a VMI.
pub const MIGRATION_SELECTOR_LABEL: &str = "kubevirt.io/vmi-name";

/// Build the `dryRun` list sent with mutating subresource calls.
pub fn dry_run_option(dry_run: bool) -> Vec<String> {
    if dry_run {
        vec![DRY_RUN_ALL.to_string()]
    } else {
        Vec::new()
    }
}

// --- Subresource payloads ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    pub name: String,
    #[serde(default)]
    pub hotpluggable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSource {
    pub claim_name: String,
    #[serde(default)]
    pub hotpluggable: bool,
}

/// Where a hotplugged volume's data lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeReference {
    DataVolume(DataVolumeSource),
    PersistentVolumeClaim(ClaimSource),
}

impl VolumeReference {
    pub fn data_volume(name: impl Into<String>) -> Self {
        VolumeReference::DataVolume(DataVolumeSource {
            name: name.into(),
            hotpluggable: true,
        })
    }

    pub fn claim(name: impl Into<String>) -> Self {
        VolumeReference::PersistentVolumeClaim(ClaimSource {
            claim_name: name.into(),
            hotpluggable: true,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            VolumeReference::DataVolume(dv) => &dv.name,
            VolumeReference::PersistentVolumeClaim(pvc) => &pvc.claim_name,
        }
    }
}

/// Disk cache mode accepted for hotplugged disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    None,
    WriteThrough,
    WriteBack,
}

impl FromStr for CacheMode {
    type Err = VmOpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CacheMode::None),
            "writethrough" => Ok(CacheMode::WriteThrough),
            "writeback" => Ok(CacheMode::WriteBack),
            other => Err(VmOpsError::InvalidCacheMode {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheMode::None => "none",
            CacheMode::WriteThrough => "writethrough",
            CacheMode::WriteBack => "writeback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub disk: DiskTarget,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVolumeOptions {
    pub name: String,
    pub disk: Disk,
    pub volume_source: VolumeReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVolumeOptions {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDumpRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claim_name: String,
}

/// Kubernetes persistent volume access modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl FromStr for AccessMode {
    type Err = VmOpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ReadWriteOnce" => Ok(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Ok(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Ok(AccessMode::ReadWriteMany),
            "ReadWriteOncePod" => Ok(AccessMode::ReadWriteOncePod),
            other => Err(VmOpsError::InvalidAccessMode {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        })
    }
}

// --- Resource views ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: VirtualMachineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_dump_request: Option<MemoryDumpStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDumpStatus {
    pub claim_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VmiSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmiSpec {
    #[serde(default)]
    pub domain: DomainSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<GuestMemory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, CapacityQuantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<CapacityQuantity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationPhase {
    #[serde(rename = "")]
    Unset,
    Pending,
    Scheduling,
    Scheduled,
    PreparingTarget,
    TargetReady,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: MigrationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MigrationPhase>,
}

impl Migration {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// A migration that has succeeded or failed can no longer be cancelled.
    pub fn is_final(&self) -> bool {
        matches!(
            self.status.phase,
            Some(MigrationPhase::Succeeded | MigrationPhase::Failed)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVolume {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: CdiConfigStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,
}

// --- Guest agent payloads ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestOsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_commands: Vec<GuestAgentCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os: GuestOs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_list: Vec<GuestUser>,
    #[serde(default)]
    pub fs_info: GuestFsInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_freeze_status: Option<String>,
    /// Fields reported by the agent that are not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestAgentCommand {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestOs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestUser {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_time: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestFsInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<GuestFilesystem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestFilesystem {
    pub disk_name: String,
    pub mount_point: String,
    pub file_system_type: String,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestUserList {
    #[serde(default)]
    pub items: Vec<GuestUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestFilesystemList {
    #[serde(default)]
    pub items: Vec<GuestFilesystem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn volume_reference_wire_shape() {
        let dv = serde_json::to_value(VolumeReference::data_volume("disk-dv")).unwrap();
        assert_eq!(dv, json!({"dataVolume": {"name": "disk-dv", "hotpluggable": true}}));

        let pvc = serde_json::to_value(VolumeReference::claim("disk-pvc")).unwrap();
        assert_eq!(
            pvc,
            json!({"persistentVolumeClaim": {"claimName": "disk-pvc", "hotpluggable": true}})
        );
    }

    #[test]
    fn dry_run_is_omitted_unless_requested() {
        let opts = StopOptions {
            grace_period: Some(0),
            dry_run: dry_run_option(false),
        };
        assert_eq!(serde_json::to_value(&opts).unwrap(), json!({"gracePeriod": 0}));

        let opts = StartOptions {
            paused: true,
            dry_run: dry_run_option(true),
        };
        assert_eq!(
            serde_json::to_value(&opts).unwrap(),
            json!({"paused": true, "dryRun": ["All"]})
        );
    }

    #[test]
    fn cache_and_access_modes_parse_strictly() {
        assert_eq!("writeback".parse::<CacheMode>().unwrap(), CacheMode::WriteBack);
        assert!(matches!(
            "badvalue".parse::<CacheMode>(),
            Err(VmOpsError::InvalidCacheMode { .. })
        ));
        assert_eq!(
            "ReadWriteMany".parse::<AccessMode>().unwrap(),
            AccessMode::ReadWriteMany
        );
        assert!("rwx".parse::<AccessMode>().is_err());
    }

    #[test]
    fn migration_finality() {
        let parse = |phase: &str| -> Migration {
            serde_json::from_value(json!({
                "metadata": {"name": "mig"},
                "status": {"phase": phase}
            }))
            .unwrap()
        };
        assert!(parse("Succeeded").is_final());
        assert!(parse("Failed").is_final());
        assert!(!parse("Running").is_final());
        assert!(!parse("SomethingNew").is_final());
        assert!(!Migration::default().is_final());
    }

    #[test]
    fn vm_status_exposes_memory_dump_association() {
        let vm: VirtualMachine = serde_json::from_value(json!({
            "metadata": {"name": "myvm"},
            "status": {"memoryDumpRequest": {"claimName": "dump", "phase": "Completed"}}
        }))
        .unwrap();
        assert_eq!(vm.status.memory_dump_request.unwrap().claim_name, "dump");
    }
}
