use clap::Args;
use vm_ops::{Operation, Shutdown};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// VirtualMachine name
    vm: String,

    /// Start the VM with its vCPUs paused
    #[arg(long)]
    paused: bool,

    /// Validate the request without persisting it
    #[arg(long)]
    dry_run: bool,
}

impl StartArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        Ok(Operation::Start {
            vm: self.vm,
            paused: self.paused,
            dry_run: self.dry_run,
        })
    }
}

/// Flags shared by `stop` and `restart`.
#[derive(Args, Debug)]
pub struct ShutdownArgs {
    /// VirtualMachine name
    vm: String,

    /// Skip graceful shutdown; requires --grace-period
    #[arg(long)]
    force: bool,

    /// Seconds the instance gets before it is killed
    #[arg(long, default_value_t = vm_ops::lifecycle::UNSET_GRACE_PERIOD, allow_negative_numbers = true)]
    grace_period: i64,

    /// Validate the request without persisting it
    #[arg(long)]
    dry_run: bool,
}

impl ShutdownArgs {
    fn shutdown(&self, action: &'static str) -> vm_ops::Result<Shutdown> {
        Shutdown::from_flags(action, self.force, Some(self.grace_period))
    }

    pub fn into_stop(self) -> vm_ops::Result<Operation> {
        let shutdown = self.shutdown("stop")?;
        Ok(Operation::Stop {
            vm: self.vm,
            shutdown,
            dry_run: self.dry_run,
        })
    }

    pub fn into_restart(self) -> vm_ops::Result<Operation> {
        let shutdown = self.shutdown("restart")?;
        Ok(Operation::Restart {
            vm: self.vm,
            shutdown,
            dry_run: self.dry_run,
        })
    }
}
