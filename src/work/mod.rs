//! Business jobs run as explicit state machines.
//!
//! Every job starts a job-wide timer, checks for aborts and recorded errors
//! around each visible step, forwards data progress to its requestor and
//! ends with exactly one final report.

pub mod checkout;
pub mod context;
pub mod create;
pub mod job;
pub mod state;
pub mod timeout;
pub mod update;

pub use checkout::CheckoutResourceJob;
pub use context::{JobContext, JobId, JobKind, JobReport, UpdateUi, WorkRequestor};
pub use create::CreateResourceJob;
pub use job::{next_job_id, spawn_job, Job, JobHandle, JobOutcome, WorkServices};
pub use state::{JobPhase, JobState};
pub use timeout::JobTimeout;
pub use update::UpdateResourceJob;
