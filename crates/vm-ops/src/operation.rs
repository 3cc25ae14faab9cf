use std::io::Write;

use crate::error::Result;
use crate::guest::{self, GuestQuery};
use crate::hotplug::{self, AddVolume, RemoveVolume};
use crate::lifecycle::{self, Shutdown};
use crate::memory_dump::{self, ClaimPlan, OverheadSource};
use crate::overhead::FS_OVERHEAD_NOTICE;
use crate::traits::VirtClient;

/// What `memory-dump` was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryDump {
    /// Dump to `claim_name`, or to the claim already associated with the VM.
    Get {
        vm: String,
        claim_name: Option<String>,
        create_claim: Option<ClaimPlan>,
    },
    Remove { vm: String },
}

/// One fully validated command invocation.
///
/// Building an `Operation` performs every argument check, so a value of this
/// type can be executed without any further validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Start {
        vm: String,
        paused: bool,
        dry_run: bool,
    },
    Stop {
        vm: String,
        shutdown: Shutdown,
        dry_run: bool,
    },
    Restart {
        vm: String,
        shutdown: Shutdown,
        dry_run: bool,
    },
    Migrate {
        vm: String,
        dry_run: bool,
    },
    MigrateCancel {
        vm: String,
    },
    Guest {
        vmi: String,
        query: GuestQuery,
    },
    AddVolume(AddVolume),
    RemoveVolume(RemoveVolume),
    MemoryDump(MemoryDump),
}

impl Operation {
    /// Subcommand name, as used in the "scheduled to" message.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Start { .. } => "start",
            Operation::Stop { .. } => "stop",
            Operation::Restart { .. } => "restart",
            Operation::Migrate { .. } => "migrate",
            Operation::MigrateCancel { .. } => "migrate-cancel",
            Operation::Guest { query, .. } => query.command(),
            Operation::AddVolume(_) => "addvolume",
            Operation::RemoveVolume(_) => "removevolume",
            Operation::MemoryDump(_) => "memory-dump",
        }
    }

    pub fn is_dry_run(&self) -> bool {
        match self {
            Operation::Start { dry_run, .. }
            | Operation::Stop { dry_run, .. }
            | Operation::Restart { dry_run, .. }
            | Operation::Migrate { dry_run, .. } => *dry_run,
            Operation::AddVolume(req) => req.dry_run,
            Operation::RemoveVolume(req) => req.dry_run,
            Operation::MigrateCancel { .. } | Operation::Guest { .. } | Operation::MemoryDump(_) => {
                false
            }
        }
    }

    /// Run the operation against `namespace`, writing user-facing output to `out`.
    pub async fn execute<C: VirtClient, W: Write>(
        &self,
        client: &C,
        namespace: &str,
        out: &mut W,
    ) -> Result<()> {
        if self.is_dry_run() {
            writeln!(out, "Dry Run execution")?;
        }

        match self {
            Operation::Start { vm, paused, dry_run } => {
                lifecycle::start(client, namespace, vm, *paused, *dry_run).await?;
                self.scheduled(out, vm)
            }
            Operation::Stop {
                vm,
                shutdown,
                dry_run,
            } => {
                lifecycle::stop(client, namespace, vm, *shutdown, *dry_run).await?;
                self.scheduled(out, vm)
            }
            Operation::Restart {
                vm,
                shutdown,
                dry_run,
            } => {
                lifecycle::restart(client, namespace, vm, *shutdown, *dry_run).await?;
                self.scheduled(out, vm)
            }
            Operation::Migrate { vm, dry_run } => {
                lifecycle::migrate(client, namespace, vm, *dry_run).await?;
                self.scheduled(out, vm)
            }
            Operation::MigrateCancel { vm } => {
                lifecycle::cancel_migration(client, namespace, vm).await?;
                self.scheduled(out, vm)
            }
            Operation::Guest { vmi, query } => {
                let report = guest::query(client, namespace, vmi, *query).await?;
                writeln!(out, "{report}")?;
                Ok(())
            }
            Operation::AddVolume(req) => {
                hotplug::add_volume(client, namespace, req).await?;
                writeln!(
                    out,
                    "Successfully submitted add volume request to VM {} for volume {}",
                    req.vm, req.volume
                )?;
                Ok(())
            }
            Operation::RemoveVolume(req) => {
                hotplug::remove_volume(client, namespace, req).await?;
                writeln!(
                    out,
                    "Successfully submitted remove volume request to VM {} for volume {}",
                    req.vm, req.volume
                )?;
                Ok(())
            }
            Operation::MemoryDump(dump) => execute_memory_dump(client, namespace, dump, out).await,
        }
    }

    fn scheduled<W: Write>(&self, out: &mut W, vm: &str) -> Result<()> {
        writeln!(out, "VM {vm} was scheduled to {}", self.name())?;
        Ok(())
    }
}

async fn execute_memory_dump<C: VirtClient, W: Write>(
    client: &C,
    namespace: &str,
    dump: &MemoryDump,
    out: &mut W,
) -> Result<()> {
    match dump {
        MemoryDump::Get {
            vm,
            claim_name,
            create_claim,
        } => {
            if let Some(plan) = create_claim {
                let claim = memory_dump::provision_claim(client, namespace, vm, plan).await?;
                if claim.estimate.source == OverheadSource::Default {
                    writeln!(out, "{FS_OVERHEAD_NOTICE}")?;
                }
                writeln!(out, "PVC {}/{} created", claim.namespace, claim.name)?;
            }
            memory_dump::request_dump(client, namespace, vm, claim_name.as_deref()).await?;
            writeln!(out, "Successfully submitted memory dump request of VM {vm}")?;
        }
        MemoryDump::Remove { vm } => {
            memory_dump::remove_dump(client, namespace, vm).await?;
            writeln!(
                out,
                "Successfully submitted remove memory dump association of VM {vm}"
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ApiCall, InMemoryCluster};
    use crate::error::VmOpsError;
    use crate::quantity::CapacityQuantity;
    use crate::types::MigrationPhase;

    async fn run(op: &Operation, cluster: &InMemoryCluster) -> (Result<()>, String) {
        let mut out = Vec::new();
        let result = op.execute(cluster, "default", &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    fn cluster() -> InMemoryCluster {
        let memory: CapacityQuantity = "1Gi".parse().unwrap();
        InMemoryCluster::new()
            .with_vm("default", "myvm")
            .with_vmi("default", "myvm", memory)
    }

    #[tokio::test]
    async fn dry_run_start_prints_banner_first() {
        let op = Operation::Start {
            vm: "myvm".into(),
            paused: false,
            dry_run: true,
        };
        let (result, out) = run(&op, &cluster()).await;
        result.unwrap();
        assert_eq!(out, "Dry Run execution\nVM myvm was scheduled to start\n");
    }

    #[tokio::test]
    async fn migrate_cancel_reports_schedule() {
        let cluster = cluster().with_migration("default", "mig", "myvm", MigrationPhase::Running);
        let op = Operation::MigrateCancel { vm: "myvm".into() };
        let (result, out) = run(&op, &cluster).await;
        result.unwrap();
        assert_eq!(out, "VM myvm was scheduled to migrate-cancel\n");
    }

    #[tokio::test]
    async fn failed_stop_prints_nothing_after_banner() {
        let op = Operation::Stop {
            vm: "ghost".into(),
            shutdown: Shutdown::Graceful,
            dry_run: false,
        };
        let (result, out) = run(&op, &cluster()).await;
        assert_eq!(result.unwrap_err().to_string(), "error stopping VirtualMachine");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn add_volume_message() {
        let op = Operation::AddVolume(AddVolume {
            vm: "myvm".into(),
            volume: "data".into(),
            serial: None,
            cache: None,
            persist: false,
            dry_run: false,
        });
        let (result, out) = run(&op, &cluster().with_data_volume("default", "data")).await;
        result.unwrap();
        assert_eq!(
            out,
            "Successfully submitted add volume request to VM myvm for volume data\n"
        );
    }

    #[tokio::test]
    async fn memory_dump_with_new_claim() {
        let cluster = cluster();
        let plan = ClaimPlan::new(Some("dump".into()), None, None).unwrap();
        let op = Operation::MemoryDump(MemoryDump::Get {
            vm: "myvm".into(),
            claim_name: Some("dump".into()),
            create_claim: Some(plan),
        });
        let (result, out) = run(&op, &cluster).await;
        result.unwrap();
        assert_eq!(
            out,
            "Unable to determine FS overhead, using default\n\
             PVC default/dump created\n\
             Successfully submitted memory dump request of VM myvm\n"
        );
        assert!(matches!(cluster.calls().last(), Some(ApiCall::MemoryDump { .. })));
    }

    #[tokio::test]
    async fn memory_dump_conflict_sends_no_dump_request() {
        let cluster = cluster().with_pvc("default", "dump");
        let plan = ClaimPlan::new(Some("dump".into()), None, None).unwrap();
        let op = Operation::MemoryDump(MemoryDump::Get {
            vm: "myvm".into(),
            claim_name: Some("dump".into()),
            create_claim: Some(plan),
        });
        let (result, out) = run(&op, &cluster).await;
        assert!(matches!(result, Err(VmOpsError::ClaimAlreadyExists { .. })));
        assert!(out.is_empty());
        assert!(
            !cluster
                .calls()
                .iter()
                .any(|c| matches!(c, ApiCall::MemoryDump { .. } | ApiCall::CreatePvc { .. }))
        );
    }

    #[tokio::test]
    async fn memory_dump_remove_message() {
        let cluster = cluster()
            .with_pvc("default", "dump")
            .with_memory_dump_association("default", "myvm", "dump");
        let op = Operation::MemoryDump(MemoryDump::Remove { vm: "myvm".into() });
        let (result, out) = run(&op, &cluster).await;
        result.unwrap();
        assert_eq!(
            out,
            "Successfully submitted remove memory dump association of VM myvm\n"
        );
    }

    #[test]
    fn names_and_dry_run() {
        let op = Operation::Guest {
            vmi: "myvm".into(),
            query: GuestQuery::Filesystems,
        };
        assert_eq!(op.name(), "fslist");
        assert!(!op.is_dry_run());
    }
}
