//! The two worker pools jobs dispatch into (spec §4.I Pools).

use std::sync::Arc;

use plugin_core::traits::JobExecution;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// An I/O pool (large, cooperative concurrency for network/database jobs) and a CPU pool
/// (small, sized to the machine, for compute-bound jobs). A job's `execution` field
/// selects which one bounds it.
pub struct Pools {
    io: Arc<Semaphore>,
    cpu: Arc<Semaphore>,
}

impl Pools {
    pub fn new(io_capacity: usize, cpu_capacity: usize) -> Self {
        Self {
            io: Arc::new(Semaphore::new(io_capacity)),
            cpu: Arc::new(Semaphore::new(cpu_capacity)),
        }
    }

    /// Sizes the CPU pool to the number of logical CPUs; the I/O pool stays caller-specified.
    pub fn sized_to_machine(io_capacity: usize) -> Self {
        let cpu_capacity = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(io_capacity, cpu_capacity)
    }

    fn semaphore(&self, execution: JobExecution) -> &Arc<Semaphore> {
        match execution {
            JobExecution::Io => &self.io,
            JobExecution::Cpu => &self.cpu,
        }
    }

    /// Acquire a permit on the pool that matches `execution`, or `None` if the pool is
    /// saturated right now — the scheduler skips this job until a later tick. The permit
    /// is owned so it can be moved into the spawned task that runs the job.
    pub fn try_acquire(&self, execution: JobExecution) -> Option<OwnedSemaphorePermit> {
        self.semaphore(execution).clone().try_acquire_owned().ok()
    }

    pub fn io_available(&self) -> usize {
        self.io.available_permits()
    }

    pub fn cpu_available(&self) -> usize {
        self.cpu.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_are_independent() {
        let pools = Pools::new(1, 1);
        let _io_permit = pools.try_acquire(JobExecution::Io).unwrap();
        assert!(pools.try_acquire(JobExecution::Io).is_none());
        assert!(pools.try_acquire(JobExecution::Cpu).is_some());
    }
}
