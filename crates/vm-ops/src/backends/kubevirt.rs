use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::Client;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Result, VmOpsError};
use crate::overhead::CDI_CONFIG_NAME;
use crate::traits::{HotplugTarget, VirtClient};
use crate::types::{
    AddVolumeOptions, CdiConfig, DataVolume, GuestFilesystemList, GuestOsInfo, GuestUserList,
    MemoryDumpRequest, MigrateOptions, Migration, RemoveVolumeOptions, RestartOptions,
    StartOptions, StopOptions, VirtualMachine, VirtualMachineInstance,
};

const SUBRESOURCE_API: &str = "/apis/subresources.kubevirt.io/v1";

const VMS: &str = "virtualmachines";
const VMIS: &str = "virtualmachineinstances";

fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

fn vm_resource() -> ApiResource {
    resource("kubevirt.io", "v1", "VirtualMachine", VMS)
}

fn vmi_resource() -> ApiResource {
    resource("kubevirt.io", "v1", "VirtualMachineInstance", VMIS)
}

fn migration_resource() -> ApiResource {
    resource(
        "kubevirt.io",
        "v1",
        "VirtualMachineInstanceMigration",
        "virtualmachineinstancemigrations",
    )
}

fn data_volume_resource() -> ApiResource {
    resource("cdi.kubevirt.io", "v1beta1", "DataVolume", "datavolumes")
}

fn cdi_config_resource() -> ApiResource {
    resource("cdi.kubevirt.io", "v1beta1", "CDIConfig", "cdiconfigs")
}

/// Re-read a dynamic object as one of our typed views.
fn convert<T: DeserializeOwned>(obj: DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn subresource_path(namespace: &str, plural: &str, name: &str, sub: &str) -> String {
    format!("{SUBRESOURCE_API}/namespaces/{namespace}/{plural}/{name}/{sub}")
}

fn hotplug_plural(target: HotplugTarget) -> &'static str {
    match target {
        HotplugTarget::Instance => VMIS,
        HotplugTarget::Machine => VMS,
    }
}

/// Cluster backend talking to a live API server through `kube`.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, namespace: &str, ar: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }

    async fn put_subresource<B: Serialize>(&self, path: String, body: Option<&B>) -> Result<()> {
        let body = match body {
            Some(b) => serde_json::to_vec(b)?,
            None => Vec::new(),
        };
        debug!(path = %path, "PUT subresource");
        let request = http::Request::put(&path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| VmOpsError::Request {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        self.client.request_text(request).await?;
        Ok(())
    }

    async fn get_subresource<T: DeserializeOwned>(&self, path: String) -> Result<T> {
        debug!(path = %path, "GET subresource");
        let request = http::Request::get(&path)
            .body(Vec::new())
            .map_err(|e| VmOpsError::Request {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        Ok(self.client.request::<T>(request).await?)
    }
}

impl VirtClient for KubeClient {
    async fn start_vm(&self, namespace: &str, name: &str, opts: &StartOptions) -> Result<()> {
        self.put_subresource(subresource_path(namespace, VMS, name, "start"), Some(opts))
            .await
    }

    async fn stop_vm(&self, namespace: &str, name: &str, opts: &StopOptions) -> Result<()> {
        self.put_subresource(subresource_path(namespace, VMS, name, "stop"), Some(opts))
            .await
    }

    async fn restart_vm(&self, namespace: &str, name: &str, opts: &RestartOptions) -> Result<()> {
        self.put_subresource(subresource_path(namespace, VMS, name, "restart"), Some(opts))
            .await
    }

    async fn migrate_vm(&self, namespace: &str, name: &str, opts: &MigrateOptions) -> Result<()> {
        self.put_subresource(subresource_path(namespace, VMS, name, "migrate"), Some(opts))
            .await
    }

    async fn list_migrations(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Migration>> {
        let api = self.dynamic(namespace, &migration_resource());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        list.items.into_iter().map(convert).collect()
    }

    async fn delete_migration(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.dynamic(namespace, &migration_resource());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn guest_os_info(&self, namespace: &str, name: &str) -> Result<GuestOsInfo> {
        self.get_subresource(subresource_path(namespace, VMIS, name, "guestosinfo"))
            .await
    }

    async fn user_list(&self, namespace: &str, name: &str) -> Result<GuestUserList> {
        self.get_subresource(subresource_path(namespace, VMIS, name, "userlist"))
            .await
    }

    async fn filesystem_list(&self, namespace: &str, name: &str) -> Result<GuestFilesystemList> {
        self.get_subresource(subresource_path(namespace, VMIS, name, "filesystemlist"))
            .await
    }

    async fn add_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &AddVolumeOptions,
    ) -> Result<()> {
        let path = subresource_path(namespace, hotplug_plural(target), name, "addvolume");
        self.put_subresource(path, Some(opts)).await
    }

    async fn remove_volume(
        &self,
        target: HotplugTarget,
        namespace: &str,
        name: &str,
        opts: &RemoveVolumeOptions,
    ) -> Result<()> {
        let path = subresource_path(namespace, hotplug_plural(target), name, "removevolume");
        self.put_subresource(path, Some(opts)).await
    }

    async fn memory_dump(
        &self,
        namespace: &str,
        name: &str,
        req: &MemoryDumpRequest,
    ) -> Result<()> {
        self.put_subresource(subresource_path(namespace, VMS, name, "memorydump"), Some(req))
            .await
    }

    async fn remove_memory_dump(&self, namespace: &str, name: &str) -> Result<()> {
        self.put_subresource::<()>(
            subresource_path(namespace, VMS, name, "removememorydump"),
            None,
        )
        .await
    }

    async fn get_vm(&self, namespace: &str, name: &str) -> Result<VirtualMachine> {
        convert(self.dynamic(namespace, &vm_resource()).get(name).await?)
    }

    async fn get_vmi(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance> {
        convert(self.dynamic(namespace, &vmi_resource()).get(name).await?)
    }

    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<DataVolume> {
        convert(self.dynamic(namespace, &data_volume_resource()).get(name).await?)
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pvc).await?)
    }

    async fn get_cdi_config(&self) -> Result<CdiConfig> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &cdi_config_resource());
        convert(api.get(CDI_CONFIG_NAME).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_paths() {
        assert_eq!(
            subresource_path("default", VMS, "myvm", "start"),
            "/apis/subresources.kubevirt.io/v1/namespaces/default/virtualmachines/myvm/start"
        );
        assert_eq!(
            subresource_path("ns1", hotplug_plural(HotplugTarget::Instance), "vmi", "addvolume"),
            "/apis/subresources.kubevirt.io/v1/namespaces/ns1/virtualmachineinstances/vmi/addvolume"
        );
    }

    #[test]
    fn custom_resources_point_at_the_right_groups() {
        let dv = data_volume_resource();
        assert_eq!(dv.api_version, "cdi.kubevirt.io/v1beta1");
        assert_eq!(dv.plural, "datavolumes");
        assert_eq!(migration_resource().kind, "VirtualMachineInstanceMigration");
    }
}
