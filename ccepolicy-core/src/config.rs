//! Built-in tables: mount sources, injected rule sets, default containers and fragments.
//!
//! Everything here is fixed at build time. Anything that can vary per run lives in
//! [`CompileOptions`].

use crate::sidecar::BaselineSidecars;

/// Rego API version written into every generated policy.
pub const POLICY_API_VERSION: &str = "0.10.0";
/// Framework version written into every generated policy and fragment.
pub const POLICY_FRAMEWORK_VERSION: &str = "0.2.3";
/// Package name used by full policies; fragments may not reuse it.
pub const RESERVED_NAMESPACE: &str = "policy";

/// Env rule definition: `(name, value, strategy, required)`.
pub type EnvRuleDef = (&'static str, &'static str, &'static str, bool);

pub const OPENGCS_ENV_RULES: &[EnvRuleDef] = &[("TERM", "xterm", "string", false)];

pub const FABRIC_ENV_RULES: &[EnvRuleDef] = &[
    ("((?i)FABRIC)_.+", ".+", "re2", false),
    ("HOSTNAME", ".+", "re2", false),
    ("T(E)?MP", ".+", "re2", false),
    ("FabricPackageFileName", ".+", "re2", false),
    ("HostedServiceName", ".+", "re2", false),
];

pub const MANAGED_IDENTITY_ENV_RULES: &[EnvRuleDef] = &[
    ("IDENTITY_API_VERSION", ".+", "re2", false),
    ("IDENTITY_HEADER", ".+", "re2", false),
    ("IDENTITY_SERVER_THUMBPRINT", ".+", "re2", false),
];

pub const ENABLE_RESTART_ENV_RULE: &[EnvRuleDef] =
    &[("azurecontainerinstance_restarted_by", ".+", "re2", false)];

pub const VIRTUAL_NODE_ENV_RULES: &[EnvRuleDef] = &[
    ("KUBERNETES_SERVICE_HOST", ".+", "re2", false),
    ("KUBERNETES_SERVICE_PORT", ".+", "re2", false),
    ("KUBERNETES_SERVICE_PORT_HTTPS", ".+", "re2", false),
    ("KUBERNETES_PORT", ".+", "re2", false),
    ("KUBERNETES_PORT_443_TCP", ".+", "re2", false),
    ("KUBERNETES_PORT_443_TCP_PROTO", ".+", "re2", false),
    ("KUBERNETES_PORT_443_TCP_ADDR", ".+", "re2", false),
    ("KUBERNETES_PORT_443_TCP_PORT", ".+", "re2", false),
];

pub const VIRTUAL_NODE_ENV_RULES_WORKLOAD_IDENTITY: &[EnvRuleDef] = &[
    ("AZURE_CLIENT_ID", ".+", "re2", false),
    ("AZURE_TENANT_ID", ".+", "re2", false),
    (
        "AZURE_FEDERATED_TOKEN_FILE",
        "/var/run/secrets/azure/tokens/azure-identity-token",
        "string",
        false,
    ),
    ("AZURE_AUTHORITY_HOST", ".+", "re2", false),
];

/// Rules injected into every customer container, in injection order.
pub fn injected_customer_env_rules() -> impl Iterator<Item = &'static EnvRuleDef> {
    OPENGCS_ENV_RULES
        .iter()
        .chain(FABRIC_ENV_RULES)
        .chain(MANAGED_IDENTITY_ENV_RULES)
        .chain(ENABLE_RESTART_ENV_RULE)
}

/// Mount type -> sandbox source template.
pub const MOUNT_SOURCE_TABLE: &[(&str, &str)] = &[
    ("azureFile", "sandbox:///tmp/atlas/azureFileVolume/.+"),
    ("secret", "sandbox:///tmp/atlas/secretsVolume/.+"),
    ("configMap", "sandbox:///tmp/atlas/configMapVolume/.+"),
    ("emptyDir", "sandbox:///tmp/atlas/emptydir/.+"),
    ("gitRepo", "sandbox:///tmp/atlas/gitRepoVolume/.+"),
    ("hostPath", "sandbox:///tmp/atlas/hostPath/.+"),
    ("resolvconf", "sandbox:///tmp/atlas/resolvconf/.+"),
];

/// Options applied when a mount does not carry its own. Slot 2 is the rw flag.
pub const DEFAULT_MOUNT_OPTIONS: [&str; 3] = ["rbind", "rshared", "rw"];
pub const MOUNT_RW_OPTION_INDEX: usize = 2;

/// Mount definition: `(mount type, destination path, readonly)`.
pub type MountDef = (&'static str, &'static str, bool);

pub const DEFAULT_MOUNTS_USER: &[MountDef] = &[("resolvconf", "/etc/resolv.conf", false)];

pub const DEFAULT_MOUNTS_VIRTUAL_NODE: &[MountDef] = &[(
    "secret",
    "/var/run/secrets/kubernetes.io/serviceaccount",
    true,
)];

pub const DEFAULT_MOUNTS_USER_VIRTUAL_NODE: &[MountDef] = &[
    ("emptyDir", "/etc/hosts", false),
    ("emptyDir", "/dev/termination-log", false),
    ("emptyDir", "/etc/hostname", false),
    ("resolvconf", "/etc/resolv.conf", false),
];

pub const DEFAULT_MOUNTS_PRIVILEGED_VIRTUAL_NODE: &[MountDef] = &[
    ("hostPath", "/dev", false),
    ("hostPath", "/sys/fs/cgroup", false),
];

pub const DEFAULT_MOUNTS_WORKLOAD_IDENTITY_VIRTUAL_NODE: &[MountDef] =
    &[("secret", "/var/run/secrets/azure/tokens", true)];

/// Exec process every user container receives in debug mode.
pub const DEBUG_MODE_EXEC_COMMAND: &[&str] = &["/bin/sh"];

/// The pause container appended to every container-group policy.
pub mod pause {
    pub const IMAGE: &str = "mcr.microsoft.com/oss/kubernetes/pause:3.6";
    pub const COMMAND: &[&str] = &["/pause"];
    pub const LAYERS: &[&str] =
        &["16b514057a06ad665f92c02863aca074fd5976c755d26bff16365299169e8415"];
    pub const ENV_RULES: &[super::EnvRuleDef] = &[
        (
            "PATH",
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
            "string",
            true,
        ),
        ("TERM", "xterm", "string", false),
    ];
    pub const WORKING_DIR: &str = "/";
}

/// The infrastructure fragment every container-group policy imports by default.
pub mod infra_fragment {
    pub const FEED: &str = "mcr.microsoft.com/aci/aci-cc-infra-fragment";
    pub const ISSUER: &str =
        "did:x509:0:sha256:I__iuL25oXEVFdTP_aBLx_eT1RPHbCQ_ECBQfYZpt9s::eku:1.3.6.1.4.1.311.76.59.1.3";
    pub const MINIMUM_SVN: u64 = 1;
    pub const INCLUDES: &[&str] = &["containers", "fragments"];
}

/// Global policy switches rendered after the containers block.
pub const POLICY_FLAGS: &[(&str, bool)] = &[
    ("allow_properties_access", false),
    ("allow_dump_stacks", false),
    ("allow_runtime_logging", false),
    ("allow_environment_variable_dropping", true),
    ("allow_unencrypted_scratch", false),
    ("allow_capability_dropping", true),
];

/// Enforcement points delegated to the framework package.
pub const FRAMEWORK_RULES: &[&str] = &[
    "mount_device",
    "unmount_device",
    "mount_overlay",
    "unmount_overlay",
    "create_container",
    "exec_in_container",
    "exec_external",
    "shutdown_container",
    "signal_container_process",
    "plan9_mount",
    "plan9_unmount",
    "get_properties",
    "dump_stacks",
    "runtime_logging",
    "load_fragment",
    "scratch_mount",
    "scratch_unmount",
];

/// Per-run compile settings.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Exec processes without an explicit stdio flag inherit this value on
    /// non-sidecar images, and user containers gain a debug shell. Generated
    /// policies therefore differ between debug and release runs of the same input.
    pub debug_mode: bool,
    /// Overrides the infrastructure fragment's minimum SVN.
    pub infrastructure_svn: Option<u64>,
    pub sidecars: BaselineSidecars,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug_mode: false,
            infrastructure_svn: None,
            sidecars: BaselineSidecars::builtin(),
        }
    }
}

impl CompileOptions {
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_infrastructure_svn(mut self, svn: Option<u64>) -> Self {
        self.infrastructure_svn = svn;
        self
    }

    pub fn with_sidecars(mut self, sidecars: BaselineSidecars) -> Self {
        self.sidecars = sidecars;
        self
    }
}
