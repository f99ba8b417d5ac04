//! Connection partitioning for the ramp-up workers.
//!
//! Distributes connection positions across a fixed pool of workers,
//! round-robin, so that worker `w` of `W` opens positions `w, w + W, w + 2W, ...`.

/// Positions assigned to one ramp-up worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub worker: usize,
    pub num_workers: usize,
    pub connections: usize,
}

impl WorkerAssignment {
    /// Global connection positions handled by this worker, in schedule order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.connections).map(move |i| self.worker + i * self.num_workers)
    }
}

/// Number of workers for `max_connections` under a concurrency cap.
///
/// Returns min(max_connections, max_workers) to avoid idle workers; a cap of
/// zero is treated as one.
pub fn worker_count(max_connections: usize, max_workers: usize) -> usize {
    std::cmp::min(max_connections, max_workers.max(1))
}

/// Partition `max_connections` positions across the worker pool.
///
/// The first `max_connections % workers` workers take one extra connection.
pub fn partition_connections(max_connections: usize, max_workers: usize) -> Vec<WorkerAssignment> {
    let num_workers = worker_count(max_connections, max_workers);
    if num_workers == 0 {
        return Vec::new();
    }

    let per_worker = max_connections / num_workers;
    let extra = max_connections % num_workers;
    (0..num_workers)
        .map(|worker| WorkerAssignment {
            worker,
            num_workers,
            connections: per_worker + usize::from(worker < extra),
        })
        .collect()
}

/// Describe the partitioning plan for logging.
pub fn describe_partitioning(assignments: &[WorkerAssignment]) -> String {
    let Some(first) = assignments.first() else {
        return "Connection distribution: no connections".to_string();
    };
    let total: usize = assignments.iter().map(|a| a.connections).sum();
    let busiest = assignments.iter().map(|a| a.connections).max().unwrap_or(0);
    format!(
        "Connection distribution: {total} connections across {} workers (up to {busiest} each)",
        first.num_workers
    )
}
