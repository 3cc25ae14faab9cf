use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmOpsError>;

#[derive(Debug, Error, Diagnostic)]
pub enum VmOpsError {
    // Flag validation
    #[error("cannot set grace period without --force=true")]
    #[diagnostic(
        code(vm_ops::grace_period_without_force),
        help("pass --force together with --grace-period")
    )]
    GracePeriodWithoutForce,

    #[error("cannot force {action} without a grace period")]
    #[diagnostic(
        code(vm_ops::force_without_grace_period),
        help("pass --grace-period=0 together with --force")
    )]
    ForceWithoutGracePeriod { action: &'static str },

    #[error("invalid grace period {value}: must be zero or positive")]
    #[diagnostic(code(vm_ops::invalid_grace_period))]
    InvalidGracePeriod { value: i64 },

    #[error("missing claim name")]
    #[diagnostic(
        code(vm_ops::missing_claim_name),
        help("--create-claim requires --claim-name")
    )]
    MissingClaimName,

    #[error("cannot dump memory to a readonly pvc")]
    #[diagnostic(
        code(vm_ops::readonly_memory_dump_claim),
        help("use either ReadWriteOnce or ReadWriteMany if supported")
    )]
    ReadOnlyMemoryDumpClaim,

    // Domain values
    #[error("invalid cache value {value}")]
    #[diagnostic(
        code(vm_ops::invalid_cache_mode),
        help("supported cache modes: none, writethrough, writeback")
    )]
    InvalidCacheMode { value: String },

    #[error("invalid access mode {value}")]
    #[diagnostic(
        code(vm_ops::invalid_access_mode),
        help("supported access modes: ReadWriteOnce, ReadOnlyMany, ReadWriteMany, ReadWriteOncePod")
    )]
    InvalidAccessMode { value: String },

    #[error("invalid action type {value}")]
    #[diagnostic(
        code(vm_ops::invalid_memory_dump_action),
        help("memory-dump accepts either 'get' or 'remove'")
    )]
    InvalidMemoryDumpAction { value: String },

    #[error("invalid quantity '{value}': {detail}")]
    #[diagnostic(code(vm_ops::invalid_quantity))]
    InvalidQuantity { value: String, detail: String },

    #[error("invalid filesystem overhead '{value}': {detail}")]
    #[diagnostic(code(vm_ops::invalid_overhead))]
    InvalidOverhead { value: String, detail: String },

    #[error("CDI config not initialized")]
    #[diagnostic(
        code(vm_ops::cdi_config_not_initialized),
        help("the CDI config status carries no filesystemOverhead yet")
    )]
    CdiConfigNotInitialized,

    #[error("CDI config has no global filesystem overhead")]
    #[diagnostic(
        code(vm_ops::missing_global_overhead),
        help("set filesystemOverhead.global in the CDI config, or pass a storage class with its own entry")
    )]
    MissingGlobalOverhead,

    // Lookups
    #[error("volume {name} is not a DataVolume or PersistentVolumeClaim")]
    #[diagnostic(code(vm_ops::volume_not_found))]
    VolumeNotFound { name: String },

    #[error("found no migration to cancel for {vm}")]
    #[diagnostic(code(vm_ops::no_active_migration))]
    NoActiveMigration { vm: String },

    // Conflicts
    #[error("PVC {namespace}/{name} already exists")]
    #[diagnostic(
        code(vm_ops::claim_already_exists),
        help("check if it should be created, if not remove the --create-claim flag")
    )]
    ClaimAlreadyExists { namespace: String, name: String },

    #[error("VM {vm} already has a memory dump association")]
    #[diagnostic(
        code(vm_ops::memory_dump_already_associated),
        help("remove the current memory dump association before creating a new claim for a new memory dump")
    )]
    MemoryDumpAlreadyAssociated { vm: String },

    // API and transport
    #[error("{message} ({reason}, HTTP {code})")]
    #[diagnostic(code(vm_ops::api))]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("cluster request failed")]
    #[diagnostic(code(vm_ops::transport))]
    Transport {
        #[source]
        source: kube::Error,
    },

    #[error("cannot obtain cluster client: {detail}")]
    #[diagnostic(
        code(vm_ops::client_config),
        help("check --kubeconfig, --context or the KUBECONFIG environment variable")
    )]
    ClientConfig { detail: String },

    #[error("failed to build request for {path}: {detail}")]
    #[diagnostic(code(vm_ops::request))]
    Request { path: String, detail: String },

    #[error("{context}")]
    #[diagnostic(code(vm_ops::context))]
    Context {
        context: String,
        #[source]
        source: Box<VmOpsError>,
    },

    #[error(transparent)]
    #[diagnostic(code(vm_ops::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(vm_ops::io))]
    Io(#[from] std::io::Error),
}

impl VmOpsError {
    /// True when the cluster answered with an explicit NotFound status.
    pub fn is_not_found(&self) -> bool {
        match self {
            VmOpsError::Api { code, reason, .. } => *code == 404 || reason == "NotFound",
            VmOpsError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Wrap this error with a human-readable description of the failed step.
    pub fn context(self, context: impl Into<String>) -> Self {
        VmOpsError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn not_found(reason_message: impl Into<String>) -> Self {
        VmOpsError::Api {
            code: 404,
            reason: "NotFound".into(),
            message: reason_message.into(),
        }
    }
}

impl From<kube::Error> for VmOpsError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => VmOpsError::Api {
                code: resp.code,
                reason: resp.reason,
                message: resp.message,
            },
            other => VmOpsError::Transport { source: other },
        }
    }
}
