use tracing::info;

use crate::error::{Result, VmOpsError};
use crate::traits::VirtClient;
use crate::types::{
    MIGRATION_SELECTOR_LABEL, MigrateOptions, RestartOptions, StartOptions, StopOptions,
    dry_run_option,
};

/// Grace period value meaning "not given on the command line".
pub const UNSET_GRACE_PERIOD: i64 = -1;

/// How a stop or restart treats the running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Graceful,
    /// Bypass graceful deletion, giving the instance `grace_period` seconds.
    Forced { grace_period: i64 },
}

impl Shutdown {
    /// Validate `--force` / `--grace-period`. `action` names the command in errors.
    pub fn from_flags(action: &'static str, force: bool, grace_period: Option<i64>) -> Result<Self> {
        let grace_period = grace_period.filter(|p| *p != UNSET_GRACE_PERIOD);
        match (force, grace_period) {
            (false, Some(_)) => Err(VmOpsError::GracePeriodWithoutForce),
            (true, Some(value)) if value < 0 => Err(VmOpsError::InvalidGracePeriod { value }),
            (true, None) => Err(VmOpsError::ForceWithoutGracePeriod { action }),
            (true, Some(grace_period)) => Ok(Shutdown::Forced { grace_period }),
            (false, None) => Ok(Shutdown::Graceful),
        }
    }

    fn grace_period(&self) -> Option<i64> {
        match self {
            Shutdown::Graceful => None,
            Shutdown::Forced { grace_period } => Some(*grace_period),
        }
    }
}

pub async fn start<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    paused: bool,
    dry_run: bool,
) -> Result<()> {
    let opts = StartOptions {
        paused,
        dry_run: dry_run_option(dry_run),
    };
    client
        .start_vm(namespace, vm, &opts)
        .await
        .map_err(|e| e.context("error starting VirtualMachine"))?;
    info!(namespace = %namespace, vm = %vm, paused, "start submitted");
    Ok(())
}

pub async fn stop<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    shutdown: Shutdown,
    dry_run: bool,
) -> Result<()> {
    let opts = StopOptions {
        grace_period: shutdown.grace_period(),
        dry_run: dry_run_option(dry_run),
    };
    let context = match shutdown {
        Shutdown::Graceful => "error stopping VirtualMachine",
        Shutdown::Forced { .. } => "error force stopping VirtualMachine",
    };
    client
        .stop_vm(namespace, vm, &opts)
        .await
        .map_err(|e| e.context(context))?;
    info!(namespace = %namespace, vm = %vm, shutdown = ?shutdown, "stop submitted");
    Ok(())
}

pub async fn restart<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    shutdown: Shutdown,
    dry_run: bool,
) -> Result<()> {
    let opts = RestartOptions {
        grace_period_seconds: shutdown.grace_period(),
        dry_run: dry_run_option(dry_run),
    };
    client
        .restart_vm(namespace, vm, &opts)
        .await
        .map_err(|e| e.context("error restarting VirtualMachine"))?;
    info!(namespace = %namespace, vm = %vm, shutdown = ?shutdown, "restart submitted");
    Ok(())
}

pub async fn migrate<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
    dry_run: bool,
) -> Result<()> {
    let opts = MigrateOptions {
        dry_run: dry_run_option(dry_run),
    };
    client
        .migrate_vm(namespace, vm, &opts)
        .await
        .map_err(|e| e.context("error migrating VirtualMachine"))?;
    info!(namespace = %namespace, vm = %vm, "migration submitted");
    Ok(())
}

/// Cancel the in-flight migration of `vm`, returning the deleted migration's name.
///
/// A VMI has at most one active migration but may keep any number of
/// finished ones around; only a non-final migration is deleted.
pub async fn cancel_migration<C: VirtClient>(
    client: &C,
    namespace: &str,
    vm: &str,
) -> Result<String> {
    let selector = format!("{MIGRATION_SELECTOR_LABEL}=={vm}");
    let migrations = client
        .list_migrations(namespace, &selector)
        .await
        .map_err(|e| e.context("error fetching virtual machine instance migration list"))?;

    let active = migrations
        .iter()
        .find(|m| !m.is_final())
        .ok_or_else(|| VmOpsError::NoActiveMigration { vm: vm.to_string() })?;

    let name = active.name().to_string();
    client
        .delete_migration(namespace, &name)
        .await
        .map_err(|e| e.context(format!("error canceling migration {name} of VirtualMachine {vm}")))?;
    info!(namespace = %namespace, vm = %vm, migration = %name, "migration cancelled");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ApiCall, InMemoryCluster};
    use crate::types::MigrationPhase;

    #[test]
    fn shutdown_flag_validation() {
        assert_eq!(Shutdown::from_flags("stop", false, None).unwrap(), Shutdown::Graceful);
        assert_eq!(
            Shutdown::from_flags("stop", false, Some(UNSET_GRACE_PERIOD)).unwrap(),
            Shutdown::Graceful
        );
        assert_eq!(
            Shutdown::from_flags("stop", true, Some(0)).unwrap(),
            Shutdown::Forced { grace_period: 0 }
        );
        assert!(matches!(
            Shutdown::from_flags("stop", false, Some(0)),
            Err(VmOpsError::GracePeriodWithoutForce)
        ));
        assert!(matches!(
            Shutdown::from_flags("restart", true, None),
            Err(VmOpsError::ForceWithoutGracePeriod { action: "restart" })
        ));
        assert!(matches!(
            Shutdown::from_flags("stop", true, Some(-7)),
            Err(VmOpsError::InvalidGracePeriod { value: -7 })
        ));
        assert!(matches!(
            Shutdown::from_flags("stop", false, Some(-5)),
            Err(VmOpsError::GracePeriodWithoutForce)
        ));
    }

    #[tokio::test]
    async fn forced_stop_sends_grace_period() {
        let cluster = InMemoryCluster::new().with_vm("default", "myvm");
        stop(&cluster, "default", "myvm", Shutdown::Forced { grace_period: 0 }, true)
            .await
            .unwrap();
        assert_eq!(
            cluster.calls(),
            vec![ApiCall::StopVm {
                namespace: "default".into(),
                name: "myvm".into(),
                opts: StopOptions {
                    grace_period: Some(0),
                    dry_run: vec!["All".into()],
                },
            }]
        );
    }

    #[tokio::test]
    async fn start_of_missing_vm_is_wrapped() {
        let cluster = InMemoryCluster::new();
        let err = start(&cluster, "default", "ghost", false, false).await.unwrap_err();
        assert_eq!(err.to_string(), "error starting VirtualMachine");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cancel_deletes_only_the_active_migration() {
        let cluster = InMemoryCluster::new()
            .with_migration("default", "old", "myvm", MigrationPhase::Succeeded)
            .with_migration("default", "live", "myvm", MigrationPhase::Running)
            .with_migration("default", "other", "othervm", MigrationPhase::Running);

        let cancelled = cancel_migration(&cluster, "default", "myvm").await.unwrap();
        assert_eq!(cancelled, "live");
        assert_eq!(cluster.migration_names("default"), vec!["old", "other"]);
    }

    #[tokio::test]
    async fn cancel_without_active_migration_fails() {
        let cluster = InMemoryCluster::new()
            .with_migration("default", "done", "myvm", MigrationPhase::Failed);
        let err = cancel_migration(&cluster, "default", "myvm").await.unwrap_err();
        assert!(matches!(err, VmOpsError::NoActiveMigration { .. }));
        assert!(
            cluster
                .calls()
                .iter()
                .all(|c| !matches!(c, ApiCall::DeleteMigration { .. }))
        );
    }
}
