//! Coordinator/worker scheduling over a point-to-point mesh.

pub mod coordinator;
pub mod transport;
pub mod worker;

pub use coordinator::{ServeSummary, TaskScheduler, enumerate_tasks};
pub use transport::{
    Assignment, CoordinatorEndpoint, LocalCoordinator, LocalWorker, WorkerEndpoint, local_mesh,
};
pub use worker::{TaskOutcome, WorkerReport, process_task, run_worker};
