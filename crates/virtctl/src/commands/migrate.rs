use clap::Args;
use vm_ops::Operation;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// VirtualMachine name
    vm: String,

    /// Validate the request without persisting it
    #[arg(long)]
    dry_run: bool,
}

impl MigrateArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        Ok(Operation::Migrate {
            vm: self.vm,
            dry_run: self.dry_run,
        })
    }
}

#[derive(Args, Debug)]
pub struct MigrateCancelArgs {
    /// VirtualMachine name
    vm: String,
}

impl MigrateCancelArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        Ok(Operation::MigrateCancel { vm: self.vm })
    }
}
