//! Namespace isolation flags

use serde::{Deserialize, Serialize};

/// Configuration for namespace isolation
///
/// The network namespace is always empty (`--network none`): document
/// markup can carry include and macro directives, so it never gets a route
/// out. PID and mount namespaces are private in every container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Private IPC namespace with no shared memory (`--ipc none`)
    pub ipc: bool,
    /// Fixed hostname instead of the container id
    pub hostname: Option<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            ipc: true,
            hostname: Some("texbox".into()),
        }
    }
}

impl NamespaceConfig {
    /// Convert to runtime flags
    #[must_use]
    pub fn to_runtime_args(&self) -> Vec<String> {
        let mut args = vec!["--network".to_string(), "none".to_string()];

        if self.ipc {
            args.push("--ipc".into());
            args.push("none".into());
        }
        if let Some(hostname) = &self.hostname {
            args.push("--hostname".into());
            args.push(hostname.clone());
        }

        args
    }
}
