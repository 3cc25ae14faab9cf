use serde::Serialize;

use crate::error::Result;
use crate::traits::VirtClient;

/// Which guest-agent report to fetch from a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestQuery {
    OsInfo,
    Users,
    Filesystems,
}

impl GuestQuery {
    pub fn command(&self) -> &'static str {
        match self {
            GuestQuery::OsInfo => "guestosinfo",
            GuestQuery::Users => "userlist",
            GuestQuery::Filesystems => "fslist",
        }
    }
}

/// Pretty JSON with two-space indentation, the format all guest reports print in.
pub fn render<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Fetch a guest-agent report for `vmi` and render it as JSON.
pub async fn query<C: VirtClient>(
    client: &C,
    namespace: &str,
    vmi: &str,
    query: GuestQuery,
) -> Result<String> {
    match query {
        GuestQuery::OsInfo => {
            let info = client.guest_os_info(namespace, vmi).await.map_err(|e| {
                e.context(format!("error getting guestosinfo of VirtualMachineInstance {vmi}"))
            })?;
            render(&info)
        }
        GuestQuery::Users => {
            let users = client.user_list(namespace, vmi).await.map_err(|e| {
                e.context(format!("error listing users of VirtualMachineInstance {vmi}"))
            })?;
            render(&users)
        }
        GuestQuery::Filesystems => {
            let filesystems = client.filesystem_list(namespace, vmi).await.map_err(|e| {
                e.context(format!("error listing filesystems of VirtualMachineInstance {vmi}"))
            })?;
            render(&filesystems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryCluster;
    use crate::quantity::CapacityQuantity;
    use crate::types::{
        GuestFilesystem, GuestFilesystemList, GuestFsInfo, GuestOs, GuestOsInfo, GuestUser,
    };

    fn cluster() -> InMemoryCluster {
        let info = GuestOsInfo {
            hostname: Some("fedora".into()),
            os: GuestOs {
                name: Some("Fedora Linux".into()),
                ..Default::default()
            },
            user_list: vec![GuestUser {
                user_name: "fedora".into(),
                domain: None,
                login_time: Some(1700000000.5),
                ..Default::default()
            }],
            fs_info: GuestFsInfo {
                disks: vec![GuestFilesystem {
                    disk_name: "vda1".into(),
                    mount_point: "/".into(),
                    file_system_type: "xfs".into(),
                    used_bytes: 1024,
                    total_bytes: 4096,
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let memory: CapacityQuantity = "1Gi".parse().unwrap();
        InMemoryCluster::new()
            .with_vmi("default", "myvm", memory)
            .with_guest_info("default", "myvm", info)
    }

    #[tokio::test]
    async fn user_list_is_pretty_json() {
        let out = query(&cluster(), "default", "myvm", GuestQuery::Users)
            .await
            .unwrap();
        assert_eq!(
            out,
            "{\n  \"items\": [\n    {\n      \"userName\": \"fedora\",\n      \"loginTime\": 1700000000.5\n    }\n  ]\n}"
        );
    }

    #[tokio::test]
    async fn filesystem_list_carries_disks() {
        let out = query(&cluster(), "default", "myvm", GuestQuery::Filesystems)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["items"][0]["mountPoint"], "/");
        assert_eq!(value["items"][0]["totalBytes"], 4096);
    }

    #[test]
    fn unmodelled_agent_fields_survive_rendering() {
        let fs_json = serde_json::json!({
            "items": [{
                "diskName": "sda1",
                "mountPoint": "/data",
                "fileSystemType": "ext4",
                "usedBytes": 10,
                "totalBytes": 20,
                "disk": [{"serial": "abc", "busType": "scsi"}]
            }]
        });
        let fslist: GuestFilesystemList = serde_json::from_value(fs_json.clone()).unwrap();
        let rendered: serde_json::Value = serde_json::from_str(&render(&fslist).unwrap()).unwrap();
        assert_eq!(rendered, fs_json);

        let info_json = serde_json::json!({
            "hostname": "fedora",
            "os": {"name": "Fedora Linux", "variant": "Cloud Edition"},
            "supportedCommands": [{"name": "guest-ping", "enabled": false, "success-response": true}],
            "someNewField": 42
        });
        let info: GuestOsInfo = serde_json::from_value(info_json.clone()).unwrap();
        let rendered: serde_json::Value = serde_json::from_str(&render(&info).unwrap()).unwrap();
        assert_eq!(rendered["someNewField"], 42);
        assert_eq!(rendered["os"]["variant"], "Cloud Edition");
        assert_eq!(rendered["supportedCommands"], info_json["supportedCommands"]);
    }

    #[tokio::test]
    async fn missing_instance_names_the_query() {
        let err = query(&InMemoryCluster::new(), "default", "ghost", GuestQuery::OsInfo)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "error getting guestosinfo of VirtualMachineInstance ghost"
        );
    }
}
