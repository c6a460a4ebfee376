//! Job plumbing shared by every resource job.

use crate::error::{Error, Result};
use crate::error_sink::{ErrorCode, ErrorSink};
use crate::storage::{AssetProgress, ProgressSubscription, RemoteStore, Resource};
use crate::version::VersionAuthority;
use crate::work::context::{JobContext, JobId, JobKind, JobReport, UpdateUi, WorkRequestor};
use crate::work::state::JobState;
use crate::work::timeout::JobTimeout;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique job id.
pub fn next_job_id() -> JobId {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

/// Everything a job talks to besides its own resource.
#[derive(Clone)]
pub struct WorkServices {
    pub store: RemoteStore,
    pub versions: Arc<dyn VersionAuthority>,
    pub errors: ErrorSink,
    pub job_timeout: Duration,
}

impl fmt::Debug for WorkServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkServices")
            .field("store", &self.store)
            .field("job_timeout", &self.job_timeout)
            .finish()
    }
}

/// What a finished job hands back: its final report and the resource in
/// whatever state the job left it.
#[derive(Debug)]
pub struct JobOutcome {
    pub report: JobReport,
    pub resource: Resource,
}

impl JobOutcome {
    pub fn is_finished(&self) -> bool {
        self.report.state == JobState::FINISHED
    }
}

#[async_trait]
pub trait Job: Send + 'static {
    fn kind(&self) -> JobKind;

    fn services(&self) -> &WorkServices;

    /// Run the job to its single final report. Consumes the job, so it runs
    /// at most once.
    async fn run(self, ctx: Arc<JobContext>) -> JobOutcome;
}

/// Messages for a failed step, written where the step is defined.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepFailure {
    pub code: ErrorCode,
    pub title: &'static str,
    pub user_message: &'static str,
}

/// Start the job-wide timer and enter `Active|Executing`. On failure the
/// job is already in `Error` and `None` is returned.
pub(crate) fn begin(ctx: &JobContext, services: &WorkServices) -> Option<JobTimeout> {
    let timer = match JobTimeout::start(services.job_timeout) {
        Ok(timer) => timer,
        Err(e) => {
            ctx.fail(
                ErrorCode::TimeoutFailedToStart,
                "Job Failed To Start",
                "The job could not be started. Please try again.",
                format!("Job {} could not start its timeout: {}", ctx.id(), e),
                Some(&e),
            );
            return None;
        }
    };

    if let Err(e) = ctx.transition(JobState::EXECUTING) {
        ctx.fail(
            ErrorCode::InvalidJobState,
            "Job Failed To Start",
            "The job could not be started. Please try again.",
            e.to_string(),
            Some(&e),
        );
        return None;
    }
    info!(job_id = ctx.id(), kind = %ctx.kind(), timeout = ?timer.duration(), "Job started");
    Some(timer)
}

/// Record a failed step. Stalls and deadline expiry get their own codes so
/// a host can tell them from hard failures. The technical detail names the
/// version the job was working on, if it had one.
pub(crate) fn fail_step(
    ctx: &JobContext,
    step: &str,
    resource: &Resource,
    err: &Error,
    failure: StepFailure,
) {
    let (code, title, user_message) = match err {
        Error::TransportTimeout(_) => (
            ErrorCode::TransportTimeout,
            "Server Not Responding",
            "The server stopped responding. Please try again later.",
        ),
        Error::JobTimeout(_) => (
            ErrorCode::JobTimedOut,
            "Job Timed Out",
            "The job took too long and was stopped.",
        ),
        _ => (failure.code, failure.title, failure.user_message),
    };
    let technical = match resource.info().version {
        Some(version) => format!(
            "Job {} failed at {} of version {}: {}",
            ctx.id(),
            step,
            version,
            err
        ),
        None => format!("Job {} failed at {}: {}", ctx.id(), step, err),
    };
    ctx.fail(code, title, user_message, technical, Some(err));
}

/// Forward data-asset progress to the job and its requestor. The final
/// report belongs to the job itself, so a completed transfer is not
/// reported here.
pub(crate) fn watch_data(ctx: &Arc<JobContext>, resource: &Resource) -> ProgressSubscription {
    let ctx = Arc::clone(ctx);
    let info = resource.info();
    resource.data.on_progress(move |progress: AssetProgress| {
        ctx.update_progress(progress.bytes_complete, progress.bytes_total);
        if progress.bytes_complete != progress.bytes_total {
            ctx.report_progress(&info);
        }
    })
}

/// Mark success unless an abort or error intervened, then send the final
/// report.
pub(crate) fn complete(ctx: &JobContext, resource: Resource) -> JobOutcome {
    if !ctx.should_stop() {
        if let Err(e) = ctx.transition(JobState::FINISHED) {
            ctx.fail(
                ErrorCode::InvalidJobState,
                "Job Failed",
                "The job ended in an unexpected state.",
                e.to_string(),
                Some(&e),
            );
        }
    }
    finish(ctx, resource)
}

pub(crate) fn finish(ctx: &JobContext, resource: Resource) -> JobOutcome {
    let report = ctx.report_final(&resource.info());
    JobOutcome { report, resource }
}

/// Handle to a job running on its own task.
#[derive(Debug)]
pub struct JobHandle {
    ctx: Arc<JobContext>,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.ctx.id()
    }

    /// Request a cooperative abort; the job stops at its next check.
    pub fn abort(&self) {
        self.ctx.request_abort();
    }

    pub fn state(&self) -> JobState {
        self.ctx.state()
    }

    /// Shared context, for callers that abort from elsewhere.
    pub fn context(&self) -> Arc<JobContext> {
        Arc::clone(&self.ctx)
    }

    pub fn report(&self) -> JobReport {
        self.ctx.snapshot()
    }

    pub async fn join(self) -> Result<JobOutcome> {
        self.task
            .await
            .map_err(|e| Error::JobFatal(format!("Job {} task failed: {}", self.ctx.id(), e)))
    }
}

/// Run `job` on its own task of the current runtime.
pub fn spawn_job<J: Job>(
    job: J,
    requestor: Arc<dyn WorkRequestor>,
    update_ui: UpdateUi,
) -> Result<JobHandle> {
    let runtime = Handle::try_current()
        .map_err(|e| Error::JobFatal(format!("No runtime to run the job: {}", e)))?;
    let ctx = Arc::new(JobContext::new(
        next_job_id(),
        job.kind(),
        requestor,
        update_ui,
        job.services().errors.clone(),
    ));
    debug!(job_id = ctx.id(), kind = %ctx.kind(), "Spawning job");
    let task = runtime.spawn(job.run(Arc::clone(&ctx)));
    Ok(JobHandle { ctx, task })
}
