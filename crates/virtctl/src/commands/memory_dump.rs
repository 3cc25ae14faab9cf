use clap::Args;
use vm_ops::{AccessMode, ClaimPlan, MemoryDump, MemoryDumpAction, Operation};

#[derive(Args, Debug)]
pub struct MemoryDumpArgs {
    /// get or remove
    action: String,

    /// VirtualMachine name
    vm: String,

    /// Claim to write the dump to
    #[arg(long)]
    claim_name: Option<String>,

    /// Create a claim sized for the dump before requesting it
    #[arg(long)]
    create_claim: bool,

    /// Storage class for the created claim
    #[arg(long)]
    storage_class: Option<String>,

    /// Access mode for the created claim
    #[arg(long)]
    access_mode: Option<String>,
}

impl MemoryDumpArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        let dump = match self.action.parse::<MemoryDumpAction>()? {
            MemoryDumpAction::Get => {
                let access_mode = self
                    .access_mode
                    .as_deref()
                    .map(str::parse::<AccessMode>)
                    .transpose()?;
                let claim_name = self.claim_name.filter(|n| !n.is_empty());
                let create_claim = if self.create_claim {
                    Some(ClaimPlan::new(
                        claim_name.clone(),
                        self.storage_class,
                        access_mode,
                    )?)
                } else {
                    None
                };
                MemoryDump::Get {
                    vm: self.vm,
                    claim_name,
                    create_claim,
                }
            }
            MemoryDumpAction::Remove => MemoryDump::Remove { vm: self.vm },
        };
        Ok(Operation::MemoryDump(dump))
    }
}
