use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, warn};

use crate::error::{Result, VmOpsError};
use crate::overhead::{
    DEFAULT_FS_OVERHEAD, FS_OVERHEAD_NOTICE, OverheadFraction, VolumeMode, size_with_overhead,
};
use crate::quantity::{CapacityQuantity, MIB, QuantityFormat};
use crate::traits::VirtClient;
use crate::types::{AccessMode, MemoryDumpRequest, VirtualMachineInstance};

/// Extra room reserved on top of guest memory for the dump file itself.
pub const MEMORY_DUMP_HEADROOM: CapacityQuantity =
    CapacityQuantity::from_bytes(100 * MIB, QuantityFormat::BinarySi);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDumpAction {
    Get,
    Remove,
}

impl FromStr for MemoryDumpAction {
    type Err = VmOpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "get" => Ok(MemoryDumpAction::Get),
            "remove" => Ok(MemoryDumpAction::Remove),
            other => Err(VmOpsError::InvalidMemoryDumpAction {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MemoryDumpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryDumpAction::Get => write!(f, "get"),
            MemoryDumpAction::Remove => write!(f, "remove"),
        }
    }
}

/// Where the overhead fraction applied to a claim came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverheadSource {
    Cluster,
    /// No CDI config exists; the built-in default was used.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityEstimate {
    pub capacity: CapacityQuantity,
    pub overhead: OverheadFraction,
    pub source: OverheadSource,
}

/// Size of a full memory dump of `vmi`: its memory plus fixed headroom.
///
/// Uses the memory request, falling back to the guest memory size.
pub fn expected_dump_size(vmi: &VirtualMachineInstance) -> Result<CapacityQuantity> {
    let domain = &vmi.spec.domain;
    let memory = domain
        .resources
        .requests
        .get("memory")
        .copied()
        .or_else(|| domain.memory.as_ref().and_then(|m| m.guest))
        .unwrap_or(CapacityQuantity::zero(QuantityFormat::BinarySi));
    memory
        .checked_add(&MEMORY_DUMP_HEADROOM)
        .ok_or_else(|| VmOpsError::InvalidQuantity {
            value: memory.to_string(),
            detail: "memory dump size is out of range".into(),
        })
}

/// Capacity a claim needs to hold a dump of `expected` bytes.
///
/// A missing CDI config falls back to the default overhead; any other error
/// reading it aborts the calculation.
pub async fn required_capacity<C: VirtClient>(
    client: &C,
    expected: &CapacityQuantity,
    storage_class: Option<&str>,
) -> Result<CapacityEstimate> {
    let storage_class = storage_class.filter(|s| !s.is_empty());
    let (overhead, source) = match client.get_cdi_config().await {
        Ok(config) => {
            let fs = config
                .status
                .filesystem_overhead
                .ok_or(VmOpsError::CdiConfigNotInitialized)?;
            (
                fs.select(storage_class, VolumeMode::Filesystem)?,
                OverheadSource::Cluster,
            )
        }
        Err(e) if e.is_not_found() => {
            warn!(overhead = %DEFAULT_FS_OVERHEAD, "{FS_OVERHEAD_NOTICE}");
            (DEFAULT_FS_OVERHEAD, OverheadSource::Default)
        }
        Err(e) => return Err(e),
    };
    let capacity = size_with_overhead(expected, overhead)?;
    debug!(expected = %expected, overhead = %overhead, capacity = %capacity, "memory dump capacity");
    Ok(CapacityEstimate {
        capacity,
        overhead,
        source,
    })
}

/// A validated request to create the claim a dump is written to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPlan {
    claim_name: String,
    storage_class: Option<String>,
    access_mode: Option<AccessMode>,
}

impl ClaimPlan {
    pub fn new(
        claim_name: Option<String>,
        storage_class: Option<String>,
        access_mode: Option<AccessMode>,
    ) -> Result<Self> {
        let claim_name = claim_name
            .filter(|n| !n.is_empty())
            .ok_or(VmOpsError::MissingClaimName)?;
        if access_mode == Some(AccessMode::ReadOnlyMany) {
            return Err(VmOpsError::ReadOnlyMemoryDumpClaim);
        }
        Ok(Self {
            claim_name,
            storage_class: storage_class.filter(|s| !s.is_empty()),
            access_mode,
        })
    }

    pub fn claim_name(&self) -> &str {
        &self.claim_name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedClaim {
    pub namespace: String,
    pub name: String,
    pub estimate: CapacityEstimate,
}

/// Render the claim object for a memory dump. Access mode defaults to ReadWriteOnce.
pub fn render_claim(
    capacity: CapacityQuantity,
    name: &str,
    namespace: &str,
    storage_class: Option<&str>,
    access_mode: Option<AccessMode>,
    volume_mode: VolumeMode,
) -> PersistentVolumeClaim {
    let access_mode = access_mode.unwrap_or(AccessMode::ReadWriteOnce);
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![access_mode.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), capacity.into())])),
                ..Default::default()
            }),
            storage_class_name: storage_class.map(str::to_string),
            volume_mode: match volume_mode {
                VolumeMode::Block => Some("Block".to_string()),
                VolumeMode::Filesystem => None,
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fail if `vm` already has a memory dump claim associated.
pub async fn ensure_no_association<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
) -> Result<()> {
    let current = client.get_vm(namespace, vm).await?;
    if let Some(existing) = current.status.memory_dump_request {
        debug!(vm = %vm, claim = %existing.claim_name, "memory dump already associated");
        return Err(VmOpsError::MemoryDumpAlreadyAssociated { vm: vm.to_string() });
    }
    Ok(())
}

/// Create a claim sized for a memory dump of `vm`.
///
/// The order is fixed: the VM must have no dump association, the claim name
/// must be free, and only then is the size computed and the claim created.
/// Nothing is created when any step fails. The checks and the create are
/// separate requests, so a concurrent caller can still race in between.
pub async fn provision_claim<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    plan: &ClaimPlan,
) -> Result<ProvisionedClaim> {
    ensure_no_association(client, namespace, vm).await?;

    match client.get_pvc(namespace, &plan.claim_name).await {
        Ok(_) => {
            return Err(VmOpsError::ClaimAlreadyExists {
                namespace: namespace.to_string(),
                name: plan.claim_name.clone(),
            });
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let vmi = client.get_vmi(namespace, vm).await?;
    let expected = expected_dump_size(&vmi)?;
    let estimate = required_capacity(client, &expected, plan.storage_class.as_deref()).await?;

    let pvc = render_claim(
        estimate.capacity,
        &plan.claim_name,
        namespace,
        plan.storage_class.as_deref(),
        plan.access_mode,
        VolumeMode::Filesystem,
    );
    client.create_pvc(namespace, &pvc).await?;
    info!(
        namespace = %namespace,
        vm = %vm,
        claim = %plan.claim_name,
        capacity = %estimate.capacity,
        "memory dump claim created"
    );

    Ok(ProvisionedClaim {
        namespace: namespace.to_string(),
        name: plan.claim_name.clone(),
        estimate,
    })
}

/// Ask KubeVirt to dump the memory of `vm`. Without a claim name the claim
/// already associated with the VM is reused.
pub async fn request_dump<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    claim_name: Option<&str>,
) -> Result<()> {
    let req = MemoryDumpRequest {
        claim_name: claim_name.unwrap_or_default().to_string(),
    };
    client
        .memory_dump(namespace, vm, &req)
        .await
        .map_err(|e| e.context("error dumping vm memory"))?;
    info!(namespace = %namespace, vm = %vm, claim = ?claim_name, "memory dump submitted");
    Ok(())
}

pub async fn remove_dump<C: VirtClient>(client: &C, namespace: &str, vm: &str) -> Result<()> {
    client
        .remove_memory_dump(namespace, vm)
        .await
        .map_err(|e| e.context("error removing memory dump association"))?;
    info!(namespace = %namespace, vm = %vm, "memory dump association removal submitted");
    Ok(())
}
