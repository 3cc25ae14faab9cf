use tracing::{debug, info};

use crate::error::{Result, VmOpsError};
use crate::traits::{HotplugTarget, VirtClient};
use crate::types::{
    AddVolumeOptions, CacheMode, Disk, DiskTarget, RemoveVolumeOptions, VolumeReference,
    dry_run_option,
};

/// Bus hotplugged disks are attached to.
pub const HOTPLUG_BUS: &str = "scsi";

/// A validated `addvolume` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AddVolume {
    pub vm: String,
    pub volume: String,
    pub serial: Option<String>,
    pub cache: Option<CacheMode>,
    pub persist: bool,
    pub dry_run: bool,
}

/// A validated `removevolume` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveVolume {
    pub vm: String,
    pub volume: String,
    pub persist: bool,
    pub dry_run: bool,
}

/// Decide whether `volume` is a DataVolume or a bare PVC.
///
/// DataVolumes take priority. Only an explicit NotFound moves on to the next
/// lookup; any other failure (forbidden, unreachable API) is returned as is
/// so a transient error is never reported as a missing volume.
pub async fn resolve_volume_source<C: VirtClient>(
    client: &C,
    namespace: &str,
    volume: &str,
) -> Result<VolumeReference> {
    match client.get_data_volume(namespace, volume).await {
        Ok(_) => {
            debug!(namespace = %namespace, volume = %volume, "volume is a DataVolume");
            return Ok(VolumeReference::data_volume(volume));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    match client.get_pvc(namespace, volume).await {
        Ok(_) => {
            debug!(namespace = %namespace, volume = %volume, "volume is a PersistentVolumeClaim");
            Ok(VolumeReference::claim(volume))
        }
        Err(e) if e.is_not_found() => Err(VmOpsError::VolumeNotFound {
            name: volume.to_string(),
        }),
        Err(e) => Err(e),
    }
}

/// Build the hotplug request body for an already resolved volume.
pub fn add_volume_options(req: &AddVolume, source: VolumeReference) -> AddVolumeOptions {
    AddVolumeOptions {
        name: req.volume.clone(),
        disk: Disk {
            disk: DiskTarget {
                bus: HOTPLUG_BUS.to_string(),
            },
            serial: req.serial.clone().unwrap_or_else(|| req.volume.clone()),
            cache: req.cache,
        },
        volume_source: source,
        dry_run: dry_run_option(req.dry_run),
    }
}

pub async fn add_volume<C: VirtClient>(client: &C, namespace: &str, req: &AddVolume) -> Result<()> {
    let source = resolve_volume_source(client, namespace, &req.volume)
        .await
        .map_err(|e| e.context("error adding volume"))?;
    let opts = add_volume_options(req, source);
    let target = HotplugTarget::for_persist(req.persist);
    client
        .add_volume(target, namespace, &req.vm, &opts)
        .await
        .map_err(|e| e.context("error adding volume"))?;
    info!(namespace = %namespace, vm = %req.vm, volume = %req.volume, target = %target, "add volume submitted");
    Ok(())
}

pub async fn remove_volume<C: VirtClient>(
    client: &C,
    namespace: &str,
    req: &RemoveVolume,
) -> Result<()> {
    let opts = RemoveVolumeOptions {
        name: req.volume.clone(),
        dry_run: dry_run_option(req.dry_run),
    };
    let target = HotplugTarget::for_persist(req.persist);
    client
        .remove_volume(target, namespace, &req.vm, &opts)
        .await
        .map_err(|e| e.context("error removing volume"))?;
    info!(namespace = %namespace, vm = %req.vm, volume = %req.volume, target = %target, "remove volume submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ApiCall, InMemoryCluster};
    use crate::quantity::CapacityQuantity;

    fn add(volume: &str) -> AddVolume {
        AddVolume {
            vm: "myvm".into(),
            volume: volume.into(),
            serial: None,
            cache: None,
            persist: false,
            dry_run: false,
        }
    }

    fn running_vm() -> InMemoryCluster {
        let memory: CapacityQuantity = "2Gi".parse().unwrap();
        InMemoryCluster::new()
            .with_vm("default", "myvm")
            .with_vmi("default", "myvm", memory)
    }

    #[tokio::test]
    async fn data_volume_only_resolves_to_data_volume() {
        let cluster = InMemoryCluster::new().with_data_volume("default", "dv");
        let source = resolve_volume_source(&cluster, "default", "dv").await.unwrap();
        assert_eq!(source, VolumeReference::data_volume("dv"));
        assert_eq!(cluster.calls().len(), 1);
    }

    #[tokio::test]
    async fn claim_only_resolves_to_claim() {
        let cluster = InMemoryCluster::new().with_pvc("default", "pvc");
        let source = resolve_volume_source(&cluster, "default", "pvc").await.unwrap();
        assert_eq!(source, VolumeReference::claim("pvc"));
    }

    #[tokio::test]
    async fn both_registries_prefer_data_volume() {
        let cluster = InMemoryCluster::new()
            .with_data_volume("default", "disk")
            .with_pvc("default", "disk");
        let source = resolve_volume_source(&cluster, "default", "disk").await.unwrap();
        assert!(matches!(source, VolumeReference::DataVolume(_)));
    }

    #[tokio::test]
    async fn neither_registry_is_not_found() {
        let cluster = InMemoryCluster::new();
        let err = resolve_volume_source(&cluster, "default", "nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, VmOpsError::VolumeNotFound { ref name } if name == "nothing"));
        assert_eq!(
            err.to_string(),
            "volume nothing is not a DataVolume or PersistentVolumeClaim"
        );
    }

    #[tokio::test]
    async fn non_not_found_lookup_errors_propagate() {
        let cluster = InMemoryCluster::new()
            .with_pvc("default", "pvc")
            .fail_on("get_data_volume", 403, "Forbidden");
        let err = resolve_volume_source(&cluster, "default", "pvc")
            .await
            .unwrap_err();
        assert!(matches!(err, VmOpsError::Api { code: 403, .. }));
        // The claim registry is never consulted.
        assert_eq!(cluster.calls().len(), 1);
    }

    #[tokio::test]
    async fn add_volume_defaults_serial_and_targets_instance() {
        let cluster = running_vm().with_pvc("default", "data");
        add_volume(&cluster, "default", &add("data")).await.unwrap();

        let Some(ApiCall::AddVolume { target, opts, .. }) = cluster.calls().pop() else {
            panic!("expected an add volume call");
        };
        assert_eq!(target, HotplugTarget::Instance);
        assert_eq!(opts.disk.serial, "data");
        assert_eq!(opts.disk.disk.bus, "scsi");
        assert_eq!(opts.volume_source, VolumeReference::claim("data"));
        assert!(opts.dry_run.is_empty());
    }

    #[tokio::test]
    async fn persisted_add_goes_to_the_vm() {
        let cluster = running_vm().with_data_volume("default", "dv");
        let req = AddVolume {
            serial: Some("1234567890".into()),
            cache: Some(CacheMode::None),
            persist: true,
            dry_run: true,
            ..add("dv")
        };
        add_volume(&cluster, "default", &req).await.unwrap();

        let Some(ApiCall::AddVolume { target, opts, .. }) = cluster.calls().pop() else {
            panic!("expected an add volume call");
        };
        assert_eq!(target, HotplugTarget::Machine);
        assert_eq!(opts.disk.serial, "1234567890");
        assert_eq!(opts.disk.cache, Some(CacheMode::None));
        assert_eq!(opts.dry_run, vec!["All".to_string()]);
    }

    #[tokio::test]
    async fn unresolvable_volume_issues_no_hotplug() {
        let cluster = running_vm();
        let err = add_volume(&cluster, "default", &add("missing")).await.unwrap_err();
        assert_eq!(err.to_string(), "error adding volume");
        assert!(
            !cluster
                .calls()
                .iter()
                .any(|c| matches!(c, ApiCall::AddVolume { .. }))
        );
    }

    #[tokio::test]
    async fn remove_volume_respects_persist() {
        let cluster = running_vm();
        let req = RemoveVolume {
            vm: "myvm".into(),
            volume: "data".into(),
            persist: true,
            dry_run: false,
        };
        remove_volume(&cluster, "default", &req).await.unwrap();
        assert_eq!(
            cluster.calls(),
            vec![ApiCall::RemoveVolume {
                target: HotplugTarget::Machine,
                namespace: "default".into(),
                name: "myvm".into(),
                opts: RemoveVolumeOptions {
                    name: "data".into(),
                    dry_run: Vec::new(),
                },
            }]
        );
    }
}
