pub mod guest;
pub mod memory_dump;
pub mod migrate;
pub mod power;
pub mod volume;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use vm_ops::{ClientSettings, GuestQuery, Operation};

const EXAMPLES: &str = "\
Examples:
  virtctl start myvm
  virtctl stop myvm --force --grace-period=0
  virtctl addvolume myvm --volume-name=data --persist
  virtctl memory-dump get myvm --claim-name=dump --create-claim
  virtctl guestosinfo myvm -n prod";

#[derive(Parser, Debug)]
#[command(
    name = "virtctl",
    about = "Operate KubeVirt virtual machines",
    version,
    after_help = EXAMPLES
)]
pub struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Path to a kubeconfig file
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Namespace of the VM; defaults to the context's namespace
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

impl ConnectionArgs {
    fn settings(&self) -> ClientSettings {
        ClientSettings {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a virtual machine
    Start(power::StartArgs),
    /// Stop a virtual machine
    Stop(power::ShutdownArgs),
    /// Restart a virtual machine
    Restart(power::ShutdownArgs),
    /// Live migrate a virtual machine to another node
    Migrate(migrate::MigrateArgs),
    /// Cancel the running migration of a virtual machine
    MigrateCancel(migrate::MigrateCancelArgs),
    /// Print guest OS information reported by the guest agent
    #[command(name = "guestosinfo")]
    GuestOsInfo(guest::GuestArgs),
    /// Print users logged in to the guest
    #[command(name = "userlist")]
    UserList(guest::GuestArgs),
    /// Print filesystems mounted in the guest
    #[command(name = "fslist")]
    FsList(guest::GuestArgs),
    /// Dump the memory of a running VM to a claim, or remove the association
    MemoryDump(memory_dump::MemoryDumpArgs),
    /// Hotplug a volume into a running VM
    #[command(name = "addvolume")]
    AddVolume(volume::AddVolumeArgs),
    /// Hot-unplug a volume from a running VM
    #[command(name = "removevolume")]
    RemoveVolume(volume::RemoveVolumeArgs),
}

impl Command {
    fn into_operation(self) -> vm_ops::Result<Operation> {
        match self {
            Command::Start(args) => args.into_operation(),
            Command::Stop(args) => args.into_stop(),
            Command::Restart(args) => args.into_restart(),
            Command::Migrate(args) => args.into_operation(),
            Command::MigrateCancel(args) => args.into_operation(),
            Command::GuestOsInfo(args) => args.into_operation(GuestQuery::OsInfo),
            Command::UserList(args) => args.into_operation(GuestQuery::Users),
            Command::FsList(args) => args.into_operation(GuestQuery::Filesystems),
            Command::MemoryDump(args) => args.into_operation(),
            Command::AddVolume(args) => args.into_operation(),
            Command::RemoveVolume(args) => args.into_operation(),
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // All argument checks happen before any cluster access.
        let operation = self.command.into_operation()?;
        let (client, namespace) = self.connection.settings().connect().await?;
        tracing::debug!(operation = operation.name(), namespace = %namespace, "executing");
        let mut stdout = std::io::stdout();
        operation.execute(&client, &namespace, &mut stdout).await?;
        Ok(())
    }
}
