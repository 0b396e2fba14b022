//! Container isolation policy
//!
//! Each piece renders to container runtime flags:
//! - `namespace` - network, IPC and hostname isolation
//! - `mounts` - read-only root, bind mounts and size-bounded tmpfs
//! - `cgroups` - memory, CPU and pid limits
//! - `privileges` - execution identity, capabilities, privilege escalation

pub mod cgroups;
pub mod mounts;
pub mod namespace;
pub mod privileges;

pub use self::cgroups::CgroupsConfig;
pub use self::mounts::MountConfig;
pub use self::namespace::NamespaceConfig;
pub use self::privileges::PrivilegeConfig;
