use clap::Args;
use vm_ops::{GuestQuery, Operation};

#[derive(Args, Debug)]
pub struct GuestArgs {
    /// VirtualMachineInstance name
    vmi: String,
}

impl GuestArgs {
    pub fn into_operation(self, query: GuestQuery) -> vm_ops::Result<Operation> {
        Ok(Operation::Guest {
            vmi: self.vmi,
            query,
        })
    }
}
