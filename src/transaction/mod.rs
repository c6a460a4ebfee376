//! Multi-step remote transactions.
//!
//! A task runs one or more commands strictly in sequence, each over its own
//! connection, plus an optional pure data transition. It re-exposes the same
//! notification channels as a single command; progress is tagged with the
//! index of the step that produced it.

pub mod tasks;
pub mod transition;

pub use tasks::{
    DownloadResource, DownloadUsers, DownloadedResource, SearchResources, UploadReceipt,
    UploadResource,
};
pub use transition::User;

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::net::Progress;
use crate::remoting::{channel, EventSink, Remoting};
use async_trait::async_trait;

#[async_trait]
pub trait Task: Send + Sized {
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    /// Run every step, ending with exactly one terminal event. Consumes the
    /// task, so it cannot be restarted.
    async fn process(self, events: EventSink<Self::Output>);
}

/// Run `task` to completion, forwarding its progress.
pub async fn drive<T, F>(task: T, on_progress: F) -> Result<T::Output>
where
    T: Task,
    F: FnMut(Progress) + Send,
{
    let (sink, stream) = channel();
    let (_, result) = tokio::join!(task.process(sink), stream.into_result(on_progress));
    result
}

/// Run one command as step `step` of a task. Returns only after the
/// command's terminal event, so the next step cannot overlap it.
pub(crate) async fn step<C, O>(
    connection: &ConnectionConfig,
    command: &C,
    step: usize,
    events: &EventSink<O>,
) -> Result<C::Reply>
where
    C: Command,
    O: Send,
{
    Remoting::new(connection.clone())
        .call(command, |progress| events.progress(progress.in_step(step)))
        .await
}
