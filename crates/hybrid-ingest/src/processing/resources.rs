//! Memory sampling for the resource-check stage

use parking_lot::Mutex;
use sysinfo::System;

/// Source of the available-memory figure
pub trait ResourceMonitor: Send + Sync {
    /// Available system memory in MiB, or `None` if it cannot be sampled
    fn available_memory_mb(&self) -> Option<u64>;
}

/// Reads available memory through `sysinfo`
pub struct SystemResourceMonitor {
    system: Mutex<System>,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn available_memory_mb(&self) -> Option<u64> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let mut system = self.system.lock();
        system.refresh_memory();
        Some(system.available_memory() / (1024 * 1024))
    }
}

/// Reports a fixed amount of memory
#[derive(Debug, Clone, Copy)]
pub struct FixedResourceMonitor(pub Option<u64>);

impl ResourceMonitor for FixedResourceMonitor {
    fn available_memory_mb(&self) -> Option<u64> {
        self.0
    }
}

/// Outcome of comparing available memory with the configured floor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    Sufficient(u64),
    Low { available_mb: u64, required_mb: u64 },
    Unknown,
}

pub fn check_memory(monitor: &dyn ResourceMonitor, required_mb: u64) -> MemoryVerdict {
    match monitor.available_memory_mb() {
        Some(available_mb) if available_mb < required_mb => MemoryVerdict::Low {
            available_mb,
            required_mb,
        },
        Some(available_mb) => MemoryVerdict::Sufficient(available_mb),
        None => MemoryVerdict::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_memory() {
        assert_eq!(
            check_memory(&FixedResourceMonitor(Some(512)), 1024),
            MemoryVerdict::Low { available_mb: 512, required_mb: 1024 }
        );
        assert_eq!(
            check_memory(&FixedResourceMonitor(Some(4096)), 1024),
            MemoryVerdict::Sufficient(4096)
        );
        assert_eq!(check_memory(&FixedResourceMonitor(None), 1024), MemoryVerdict::Unknown);
    }

    #[test]
    fn test_system_monitor_samples() {
        let monitor = SystemResourceMonitor::new();
        if sysinfo::IS_SUPPORTED_SYSTEM {
            assert!(monitor.available_memory_mb().is_some());
        }
    }
}
