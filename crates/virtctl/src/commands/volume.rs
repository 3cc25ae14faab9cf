use clap::Args;
use vm_ops::{AddVolume, CacheMode, Operation, RemoveVolume};

#[derive(Args, Debug)]
pub struct AddVolumeArgs {
    /// VirtualMachineInstance name
    vm: String,

    /// DataVolume or PersistentVolumeClaim to attach
    #[arg(long, required = true)]
    volume_name: String,

    /// Disk serial; defaults to the volume name
    #[arg(long)]
    serial: Option<String>,

    /// Disk cache mode: none, writethrough or writeback
    #[arg(long)]
    cache: Option<String>,

    /// Also add the volume to the VirtualMachine spec
    #[arg(long)]
    persist: bool,

    /// Validate the request without persisting it
    #[arg(long)]
    dry_run: bool,
}

impl AddVolumeArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        let cache = self
            .cache
            .as_deref()
            .map(str::parse::<CacheMode>)
            .transpose()?;
        Ok(Operation::AddVolume(AddVolume {
            vm: self.vm,
            volume: self.volume_name,
            serial: self.serial.filter(|s| !s.is_empty()),
            cache,
            persist: self.persist,
            dry_run: self.dry_run,
        }))
    }
}

#[derive(Args, Debug)]
pub struct RemoveVolumeArgs {
    /// VirtualMachineInstance name
    vm: String,

    /// Volume to detach
    #[arg(long, required = true)]
    volume_name: String,

    /// Also remove the volume from the VirtualMachine spec
    #[arg(long)]
    persist: bool,

    /// Validate the request without persisting it
    #[arg(long)]
    dry_run: bool,
}

impl RemoveVolumeArgs {
    pub fn into_operation(self) -> vm_ops::Result<Operation> {
        Ok(Operation::RemoveVolume(RemoveVolume {
            vm: self.vm,
            volume: self.volume_name,
            persist: self.persist,
            dry_run: self.dry_run,
        }))
    }
}
