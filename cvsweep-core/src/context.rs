//! Per-worker execution context.

use crate::config::LoopLevel;

/// What a worker rank knows about itself. Handed to the worker at startup and
/// threaded through every fold it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    /// Device the rank's models are placed on; `None` runs on the CPU.
    pub device: Option<String>,
    pub level: LoopLevel,
}

impl WorkerContext {
    pub fn new(rank: usize, device_count: usize, level: LoopLevel) -> Self {
        Self {
            rank,
            device: assign_device(rank, device_count),
            level,
        }
    }

    pub fn is_outer(&self) -> bool {
        self.level.is_outer()
    }
}

/// Round-robin device assignment over worker ranks. Rank 1 lands on device 0
/// when there are two devices, rank 2 on device 1, and so on.
pub fn assign_device(rank: usize, device_count: usize) -> Option<String> {
    if device_count == 0 {
        return None;
    }
    Some(format!("gpu:{}", (rank + 1) % device_count))
}
