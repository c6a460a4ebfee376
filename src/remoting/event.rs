//! Notification channel between a remote operation and its owner.
//!
//! A run produces `Progress* (Complete | Error | Timeout)`. The terminal
//! methods on [`EventSink`] consume the sink, which drops the only sender and
//! closes the channel, so nothing can follow a terminal event.

use crate::error::{Error, Result};
use crate::net::Progress;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Event<R> {
    Progress(Progress),
    Error { message: String, cause: Error },
    /// No bytes moved within the window
    Timeout(Duration),
    Complete(R),
}

impl<R> Event<R> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Progress(_))
    }

    /// Short label, handy for asserting on event sequences.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Progress(_) => "progress",
            Event::Error { .. } => "error",
            Event::Timeout(_) => "timeout",
            Event::Complete(_) => "complete",
        }
    }
}

/// Create a connected sink/stream pair.
pub fn channel<R>() -> (EventSink<R>, EventStream<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}

/// Producer half. Progress may be sent any number of times; exactly one
/// terminal method can be called.
#[derive(Debug)]
pub struct EventSink<R> {
    tx: mpsc::UnboundedSender<Event<R>>,
}

impl<R> EventSink<R> {
    pub fn progress(&self, progress: Progress) {
        // A dropped receiver means nobody is listening; the run still finishes
        let _ = self.tx.send(Event::Progress(progress));
    }

    pub fn complete(self, reply: R) {
        let _ = self.tx.send(Event::Complete(reply));
    }

    pub fn error(self, message: impl Into<String>, cause: Error) {
        let _ = self.tx.send(Event::Error {
            message: message.into(),
            cause,
        });
    }

    pub fn timeout(self, window: Duration) {
        let _ = self.tx.send(Event::Timeout(window));
    }

    /// Route a failure to the matching terminal channel.
    pub fn fail(self, cause: Error) {
        match cause {
            Error::TransportTimeout(window) | Error::JobTimeout(window) => self.timeout(window),
            cause => {
                let message = cause.to_string();
                self.error(message, cause)
            }
        }
    }

    pub fn finish(self, result: Result<R>) {
        match result {
            Ok(reply) => self.complete(reply),
            Err(cause) => self.fail(cause),
        }
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventStream<R> {
    rx: mpsc::UnboundedReceiver<Event<R>>,
}

impl<R> EventStream<R> {
    /// Next event, or `None` once the terminal event has been taken.
    pub async fn next(&mut self) -> Option<Event<R>> {
        self.rx.recv().await
    }

    /// Forward progress to `on_progress` and turn the terminal event into a
    /// result. A timeout comes back as `Error::TransportTimeout`.
    pub async fn into_result<F>(mut self, mut on_progress: F) -> Result<R>
    where
        F: FnMut(Progress),
    {
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Progress(progress) => on_progress(progress),
                Event::Complete(reply) => return Ok(reply),
                Event::Error { cause, .. } => return Err(cause),
                Event::Timeout(window) => return Err(Error::TransportTimeout(window)),
            }
        }
        Err(Error::JobFatal(
            "Event channel closed without a terminal event".to_string(),
        ))
    }

    /// Drain every event until the channel closes.
    pub async fn collect(mut self) -> Vec<Event<R>> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}
