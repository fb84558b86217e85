use std::sync::Mutex;

use sysinfo::{System, SystemExt};

// sysinfo reports memory in bytes.
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time view of host memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / BYTES_PER_GB
    }

    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_GB
    }
}

/// Memory the loaded models live in.
pub trait DeviceMemory: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;

    /// Called after cached models have been dropped. Returns the memory
    /// state once the release has been observed.
    fn release_cache(&self) -> MemorySnapshot;
}

#[derive(Debug)]
pub struct SystemResources {
    sys: Mutex<System>,
    pub cpu_core_count: usize,
}

impl SystemResources {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();
        let cpu_core_count = sys.cpus().len();
        Self {
            sys: Mutex::new(sys),
            cpu_core_count,
        }
    }

    pub fn refresh(&self) -> MemorySnapshot {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        MemorySnapshot {
            total_bytes: sys.total_memory(),
            available_bytes: sys.available_memory(),
        }
    }
}

impl Default for SystemResources {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for SystemResources {
    fn snapshot(&self) -> MemorySnapshot {
        self.refresh()
    }

    fn release_cache(&self) -> MemorySnapshot {
        // Host memory is returned when the model buffers drop; all that is
        // left to do here is observe it.
        let snapshot = self.refresh();
        log::info!(
            "Host memory after release: {:.2} GB available of {:.2} GB",
            snapshot.available_gb(),
            snapshot.total_gb()
        );
        snapshot
    }
}
