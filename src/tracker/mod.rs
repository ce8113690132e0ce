pub mod reconcile;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use reconcile::{CycleOutcome, ReconcileEngine, ReconcilePolicy};
pub use scheduler::{CycleReport, PollScheduler, SchedulerConfig};
