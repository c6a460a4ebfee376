//! Shared state of one running job.
//!
//! The job task, its data-asset progress handler and the host's abort call
//! all touch this state, so everything here is behind atomics or a mutex.

use crate::error::{Error, Result};
use crate::error_sink::{ErrorCode, ErrorRecord, ErrorSink};
use crate::storage::ResourceInfo;
use crate::work::state::JobState;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type JobId = u64;

/// Host callback that refreshes whatever displays the job.
pub type UpdateUi = Arc<dyn Fn(&JobReport) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobKind {
    CreateResource,
    UpdateResource,
    CheckoutResource,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a requestor learns about a job at each report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub bytes_complete: u64,
    pub bytes_total: u64,
    pub error: Option<ErrorCode>,
}

impl JobReport {
    pub fn is_final(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Receives job reports. Called from the job's own task, never from the
/// thread that created the job.
pub trait WorkRequestor: Send + Sync {
    fn work_report(&self, update_ui: &UpdateUi, job: &JobReport, resource: &ResourceInfo);
}

pub struct JobContext {
    id: JobId,
    kind: JobKind,
    state: Mutex<JobState>,
    error: Mutex<Option<ErrorCode>>,
    bytes_complete: AtomicU64,
    bytes_total: AtomicU64,
    final_reported: AtomicBool,
    abort: CancellationToken,
    requestor: Arc<dyn WorkRequestor>,
    update_ui: UpdateUi,
    errors: ErrorSink,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl JobContext {
    pub fn new(
        id: JobId,
        kind: JobKind,
        requestor: Arc<dyn WorkRequestor>,
        update_ui: UpdateUi,
        errors: ErrorSink,
    ) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(JobState::CREATED),
            error: Mutex::new(None),
            bytes_complete: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            final_reported: AtomicBool::new(false),
            abort: CancellationToken::new(),
            requestor,
            update_ui,
            errors,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        *self.error.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_error(&self) -> bool {
        self.state().is_error()
    }

    /// Move to `next`. Backward moves and moves out of a terminal state are
    /// refused with `Error::JobFatal`.
    pub fn transition(&self, next: JobState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.can_transition_to(next) {
            return Err(Error::JobFatal(format!(
                "Job {} cannot move from {} to {}",
                self.id, *state, next
            )));
        }
        debug!(job_id = self.id, from = %*state, to = %next, "Job state changed");
        *state = next;
        Ok(())
    }

    /// Ask the job to stop at its next check. In-flight transfers finish.
    pub fn request_abort(&self) {
        info!(job_id = self.id, "Abort requested");
        self.abort.cancel();
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Moves to `Aborted` when an abort has been requested. Returns true if
    /// the job is (now) aborted.
    pub fn check_for_abort_and_update(&self) -> bool {
        if !self.abort_requested() {
            return false;
        }
        if self.transition(JobState::ABORTED).is_ok() {
            warn!(job_id = self.id, "Job aborted");
        }
        self.state() == JobState::ABORTED
    }

    /// True when the job must not run another step.
    pub fn should_stop(&self) -> bool {
        self.is_error() || self.check_for_abort_and_update()
    }

    pub fn update_progress(&self, complete: u64, total: u64) {
        self.bytes_complete.store(complete, Ordering::SeqCst);
        self.bytes_total.store(total, Ordering::SeqCst);
    }

    /// Record a structured error and move to `Error`. Both messages are
    /// supplied here, where the failure is understood.
    pub fn fail(
        &self,
        code: ErrorCode,
        title: &str,
        user_message: &str,
        technical: String,
        cause: Option<&Error>,
    ) {
        let mut record = ErrorRecord::new(code, title, user_message, technical).for_job(self.id);
        if let Some(cause) = cause {
            record = record.caused_by(cause);
        }
        self.errors.record(record);

        *self.error.lock().unwrap_or_else(|p| p.into_inner()) = Some(code);
        if let Err(e) = self.transition(JobState::ERROR) {
            debug!(job_id = self.id, error = %e, "Error recorded after terminal state");
        }
    }

    pub fn snapshot(&self) -> JobReport {
        JobReport {
            job_id: self.id,
            kind: self.kind,
            state: self.state(),
            bytes_complete: self.bytes_complete.load(Ordering::SeqCst),
            bytes_total: self.bytes_total.load(Ordering::SeqCst),
            error: self.error_code(),
        }
    }

    /// Intermediate report. Dropped once the job is terminal so nothing
    /// trails the final report.
    pub fn report_progress(&self, resource: &ResourceInfo) {
        let report = self.snapshot();
        if report.is_final() || self.final_reported.load(Ordering::SeqCst) {
            return;
        }
        self.requestor
            .work_report(&self.update_ui, &report, resource);
    }

    /// The single final report. Later calls are ignored.
    pub fn report_final(&self, resource: &ResourceInfo) -> JobReport {
        let report = self.snapshot();
        if !self.final_reported.swap(true, Ordering::SeqCst) {
            info!(
                job_id = self.id,
                kind = %self.kind,
                state = %report.state,
                error = ?report.error,
                "Job finished"
            );
            self.requestor
                .work_report(&self.update_ui, &report, resource);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<JobReport>>,
    }

    impl WorkRequestor for Recorder {
        fn work_report(&self, update_ui: &UpdateUi, job: &JobReport, _: &ResourceInfo) {
            update_ui(job);
            self.reports.lock().unwrap().push(job.clone());
        }
    }

    fn info() -> ResourceInfo {
        ResourceInfo {
            resource: None,
            version: None,
            revision: None,
            data_path: PathBuf::from("a"),
            data_length: 0,
        }
    }

    fn context(recorder: Arc<Recorder>) -> JobContext {
        JobContext::new(
            9,
            JobKind::CreateResource,
            recorder,
            Arc::new(|_: &JobReport| {}),
            ErrorSink::new(),
        )
    }

    #[test]
    fn test_abort_is_observed_once() {
        let ctx = context(Arc::default());
        ctx.transition(JobState::EXECUTING).unwrap();
        assert!(!ctx.should_stop());

        ctx.request_abort();
        assert!(ctx.should_stop());
        assert!(ctx.should_stop());
        assert_eq!(ctx.state(), JobState::ABORTED);
    }

    #[test]
    fn test_fail_records_error_and_state() {
        let errors = ErrorSink::new();
        let ctx = JobContext::new(
            3,
            JobKind::UpdateResource,
            Arc::new(Recorder::default()),
            Arc::new(|_: &JobReport| {}),
            errors.clone(),
        );
        ctx.transition(JobState::EXECUTING).unwrap();
        ctx.fail(
            ErrorCode::UpdateResourceOnServerFailed,
            "Update Failed",
            "I failed to update the resource.",
            "PutDocument returned 409".to_string(),
            None,
        );

        assert_eq!(ctx.state(), JobState::ERROR);
        assert_eq!(ctx.error_code(), Some(ErrorCode::UpdateResourceOnServerFailed));
        assert_eq!(errors.for_job(3).len(), 1);
        assert!(ctx.transition(JobState::FINISHED).is_err());
    }

    #[test]
    fn test_single_final_report_and_no_trailing_progress() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(Arc::clone(&recorder));
        ctx.transition(JobState::EXECUTING).unwrap();
        ctx.update_progress(5, 10);
        ctx.report_progress(&info());
        ctx.transition(JobState::FINISHED).unwrap();
        ctx.report_final(&info());
        ctx.report_final(&info());
        ctx.report_progress(&info());

        let reports = recorder.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].bytes_complete, 5);
        assert_eq!(reports[1].state, JobState::FINISHED);
    }
}
