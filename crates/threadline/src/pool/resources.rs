//! Resource pressure oracle
//!
//! The pool polls a [`ResourceMonitor`] before starting each unit and skips
//! the tick while the system is saturated.

use parking_lot::Mutex;
use sysinfo::System;

/// Read-only view of system resource headroom
pub trait ResourceMonitor: Send + Sync {
    /// True if any tracked resource has less than `threshold_percent` free
    fn is_any_resource_below(&self, threshold_percent: f64) -> bool;
}

/// Never reports pressure
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl ResourceMonitor for Unbounded {
    fn is_any_resource_below(&self, _threshold_percent: f64) -> bool {
        false
    }
}

/// Snapshot of free resources, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub free_memory: f64,
    pub idle_cpu: f64,
}

impl ResourceUsage {
    pub fn is_any_below(&self, threshold_percent: f64) -> bool {
        self.free_memory < threshold_percent || self.idle_cpu < threshold_percent
    }
}

/// Free memory and idle CPU of the host, through `sysinfo`
pub struct SystemResources {
    system: Mutex<System>,
}

impl SystemResources {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Refresh and read the current headroom.
    ///
    /// CPU usage is measured between consecutive calls, so the first reading
    /// reports the CPU as idle.
    pub fn usage(&self) -> ResourceUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        let free_memory = if total == 0 {
            100.0
        } else {
            system.available_memory() as f64 / total as f64 * 100.0
        };
        let idle_cpu = (100.0 - f64::from(system.global_cpu_usage())).clamp(0.0, 100.0);

        ResourceUsage {
            free_memory,
            idle_cpu,
        }
    }
}

impl Default for SystemResources {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResources").finish_non_exhaustive()
    }
}

impl ResourceMonitor for SystemResources {
    fn is_any_resource_below(&self, threshold_percent: f64) -> bool {
        self.usage().is_any_below(threshold_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_saturated() {
        assert!(!Unbounded.is_any_resource_below(100.0));
    }

    #[test]
    fn test_usage_threshold() {
        let usage = ResourceUsage {
            free_memory: 40.0,
            idle_cpu: 3.0,
        };
        assert!(usage.is_any_below(5.0));
        assert!(!usage.is_any_below(2.0));
    }

    #[test]
    fn test_system_readings_are_percentages() {
        let resources = SystemResources::new();
        let usage = resources.usage();

        assert!((0.0..=100.0).contains(&usage.free_memory));
        assert!((0.0..=100.0).contains(&usage.idle_cpu));
        assert!(!resources.is_any_resource_below(0.0));
    }
}
