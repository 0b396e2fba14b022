//! Cgroup resource limits

use serde::{Deserialize, Serialize};

/// Configuration for cgroup resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupsConfig {
    /// Memory limit in bytes (memory.max)
    pub memory_max: u64,
    /// CPU quota as percentage of one core (cpu.max)
    pub cpu_percent: u32,
    /// Maximum number of processes (pids.max)
    pub pids_max: u32,
    /// Enable memory swap (memory.swap.max)
    pub allow_swap: bool,
}

impl Default for CgroupsConfig {
    fn default() -> Self {
        Self {
            memory_max: 1024 * 1024 * 1024, // 1GB
            cpu_percent: 100,
            pids_max: 128,
            allow_swap: false,
        }
    }
}

impl CgroupsConfig {
    /// Convert to runtime flags
    #[must_use]
    pub fn to_runtime_args(&self) -> Vec<String> {
        let mut args = vec!["--memory".to_string(), self.memory_max.to_string()];

        if !self.allow_swap {
            // swap limit equal to the memory limit leaves no room for swap
            args.push("--memory-swap".into());
            args.push(self.memory_max.to_string());
        }

        args.push("--cpus".into());
        args.push(format!("{:.2}", f64::from(self.cpu_percent) / 100.0));

        args.push("--pids-limit".into());
        args.push(self.pids_max.to_string());

        args
    }
}
