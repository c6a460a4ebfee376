//! Process-wide collector for job-level errors.
//!
//! Each record carries a technical message for logs and a separate message
//! for the user; both are written where the error is raised. The sink is a
//! cheap cloneable handle, created by the host and passed to every job.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    TimeoutFailedToStart,
    VersionAuthorityFailed,
    CreateResourceOnServerFailed,
    UpdateResourceOnServerFailed,
    CheckoutFailed,
    /// No bytes moved within the connection window
    TransportTimeout,
    /// The job-wide deadline passed
    JobTimedOut,
    InvalidJobState,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub title: String,
    pub user_message: String,
    pub technical: String,
    pub logged: bool,
    pub user_visible: bool,
    pub cause: Option<String>,
    pub job_id: Option<u64>,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        code: ErrorCode,
        title: impl Into<String>,
        user_message: impl Into<String>,
        technical: impl Into<String>,
    ) -> Self {
        Self {
            code,
            title: title.into(),
            user_message: user_message.into(),
            technical: technical.into(),
            logged: true,
            user_visible: true,
            cause: None,
            job_id: None,
            at: Utc::now(),
        }
    }

    pub fn logged(mut self, logged: bool) -> Self {
        self.logged = logged;
        self
    }

    pub fn user_visible(mut self, visible: bool) -> Self {
        self.user_visible = visible;
        self
    }

    pub fn caused_by(mut self, cause: &Error) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn for_job(mut self, job_id: u64) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Append-only, thread-safe error collector.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_error(
        &self,
        code: ErrorCode,
        title: &str,
        user_message: &str,
        technical: &str,
        logged: bool,
        user_visible: bool,
        cause: Option<&Error>,
    ) {
        let mut record = ErrorRecord::new(code, title, user_message, technical)
            .logged(logged)
            .user_visible(user_visible);
        if let Some(cause) = cause {
            record = record.caused_by(cause);
        }
        self.record(record);
    }

    pub fn record(&self, record: ErrorRecord) {
        if record.logged {
            error!(
                code = %record.code,
                job_id = record.job_id,
                cause = record.cause.as_deref(),
                "{}",
                record.technical
            );
        }
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.lock().clone()
    }

    /// Remove and return every record, for the host to display or persist.
    pub fn drain(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Records raised by one job.
    pub fn for_job(&self, job_id: u64) -> Vec<ErrorRecord> {
        self.lock()
            .iter()
            .filter(|r| r.job_id == Some(job_id))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ErrorRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_error_keeps_both_messages() {
        let sink = ErrorSink::new();
        let cause = Error::disconnected("reset by peer");
        sink.add_error(
            ErrorCode::CreateResourceOnServerFailed,
            "Resource Creation Failed",
            "I failed to create the resource on the server.",
            "PutDocument failed for job 4",
            true,
            true,
            Some(&cause),
        );

        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_message, "I failed to create the resource on the server.");
        assert_eq!(records[0].technical, "PutDocument failed for job 4");
        assert!(records[0].cause.as_deref().unwrap().contains("reset by peer"));
    }

    #[test]
    fn test_concurrent_writers() {
        let sink = ErrorSink::new();
        let handles: Vec<_> = (0..8u64)
            .map(|job| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        sink.record(
                            ErrorRecord::new(ErrorCode::CheckoutFailed, "t", "u", "x")
                                .logged(false)
                                .for_job(job),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.len(), 200);
        assert_eq!(sink.for_job(3).len(), 25);
        assert_eq!(sink.drain().len(), 200);
        assert!(sink.is_empty());
    }
}
