//! The submission scheduler.
//!
//! The scheduler owns a queue of pending submissions and a table of active
//! jobs, and drives both from a single background control loop
//! ([`process::scheduler_process`]). Callers interact with it only through
//! the cloneable [`SchedulerHandle`].

pub mod mirror;
pub mod process;
pub mod service;
pub mod state;
pub mod task;
pub mod tolerance;

pub use service::{SchedulerHandle, SchedulerStats, create_scheduler, load_scheduler};
pub use state::{SchedulerConfig, SubmissionRequest, SubmitOpts};
pub use task::Task;
