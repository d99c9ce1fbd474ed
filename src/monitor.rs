
use std::fmt::Display;
use sysinfo::System;
use tracing::{info, warn};
use crate::backend::{ComputeBackend, HostBackend, ParallelBackend};
use crate::config::BackendChoice;
use crate::error::{Error, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Free and total memory of the compute device, in bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryInfo {
    pub free: u64,
    pub total: u64,
}

impl MemoryInfo {

    pub fn free_gb(&self) -> f64 {
        self.free as f64 / BYTES_PER_GB
    }

    pub fn total_gb(&self) -> f64 {
        self.total as f64 / BYTES_PER_GB
    }
}

impl Display for MemoryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}GB free / {:.2}GB total", self.free_gb(), self.total_gb())
    }
}

/// Source of memory figures for the device the pipeline runs on.
pub trait MemoryProbe {
    fn query(&self) -> Result<MemoryInfo>;
}

/// Host memory as reported by the operating system.
#[derive(Debug, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn query(&self) -> Result<MemoryInfo> {
        let mut system = System::new();
        system.refresh_memory();

        // some platforms report no available figure, free memory is the next best
        let free = match system.available_memory() {
            0 => system.free_memory(),
            available => available,
        };
        Ok(MemoryInfo { free, total: system.total_memory() })
    }
}

/// Gatekeeper run once before any matrix work.
pub struct ResourceMonitor<P: MemoryProbe> {
    probe: P,
}

impl<P: MemoryProbe> ResourceMonitor<P> {

    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    pub fn check(&self) -> Result<MemoryInfo> {
        let memory = self.probe.query()?;
        if memory.total == 0 {
            return Err(Error::DeviceUnavailable("device reports no memory".to_string()));
        }
        info!("device memory: {}", memory);
        Ok(memory)
    }

    /// Checks the device and picks the backend the run will use.
    pub fn select_backend(&self, choice: BackendChoice, num_threads: usize, min_free_memory_gb: f64) -> Result<Box<dyn ComputeBackend>> {

        let memory = self.check()?;
        let backend: Box<dyn ComputeBackend> = match choice {
            BackendChoice::Host => Box::new(HostBackend),
            BackendChoice::Parallel => Box::new(ParallelBackend::new(num_threads)?),
            BackendChoice::Auto => auto_backend(ParallelBackend::new(num_threads), &memory, min_free_memory_gb),
        };

        info!("using {} compute backend", backend.name());
        Ok(backend)
    }
}

// the parallel backend when it has threads and memory to spare, host otherwise
fn auto_backend(parallel: Result<ParallelBackend>, memory: &MemoryInfo, min_free_memory_gb: f64) -> Box<dyn ComputeBackend> {
    match parallel {
        Ok(parallel) if parallel.num_threads() > 1 && memory.free_gb() >= min_free_memory_gb => Box::new(parallel),
        Ok(parallel) => {
            info!("falling back to host backend ({} threads, {:.2}GB free)", parallel.num_threads(), memory.free_gb());
            Box::new(HostBackend)
        }
        Err(e) => {
            warn!("falling back to host backend: {}", e);
            Box::new(HostBackend)
        }
    }
}
