//! Execution identity and privilege restrictions

use nix::unistd::{Gid, Uid};
use serde::{Deserialize, Serialize};

/// uid/gid of `nobody`
pub const NOBODY: u32 = 65534;

/// Configuration for the identity the compiler runs under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeConfig {
    /// Numeric uid inside the container
    pub uid: u32,
    /// Numeric gid inside the container
    pub gid: u32,
    /// Drop every Linux capability
    pub drop_capabilities: bool,
    /// Forbid setuid/setgid escalation
    pub no_new_privileges: bool,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        let (uid, gid) = default_identity();
        Self {
            uid,
            gid,
            drop_capabilities: true,
            no_new_privileges: true,
        }
    }
}

impl PrivilegeConfig {
    /// Convert to runtime flags
    #[must_use]
    pub fn to_runtime_args(&self) -> Vec<String> {
        let mut args = vec!["--user".to_string(), format!("{}:{}", self.uid, self.gid)];

        if self.drop_capabilities {
            args.push("--cap-drop".into());
            args.push("ALL".into());
        }
        if self.no_new_privileges {
            args.push("--security-opt".into());
            args.push("no-new-privileges".into());
        }

        args
    }

    /// Whether the workspace must be handed over to the container identity
    #[must_use]
    pub fn needs_chown(&self) -> bool {
        Uid::effective().is_root() && (self.uid != 0 || self.gid != 0)
    }
}

/// The daemon's own identity, or `nobody` when running as root
fn default_identity() -> (u32, u32) {
    let uid = Uid::effective();
    if uid.is_root() {
        (NOBODY, NOBODY)
    } else {
        (uid.as_raw(), Gid::effective().as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_is_never_root() {
        let config = PrivilegeConfig::default();
        assert_ne!(config.uid, 0);
    }

    #[test]
    fn renders_restrictions() {
        let config = PrivilegeConfig {
            uid: 1000,
            gid: 1000,
            drop_capabilities: true,
            no_new_privileges: true,
        };
        assert_eq!(
            config.to_runtime_args(),
            vec![
                "--user",
                "1000:1000",
                "--cap-drop",
                "ALL",
                "--security-opt",
                "no-new-privileges",
            ]
        );
    }
}
