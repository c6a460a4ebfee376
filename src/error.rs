use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unparsable wire message. Never retried.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A response arrived but does not have the shape the command expects.
    #[error("Reply construction error: {0}")]
    ReplyConstruction(String),

    /// No bytes moved within the configured send/receive window.
    #[error("Transport timed out: no activity for {0:?}")]
    TransportTimeout(Duration),

    /// Connection-level failure (refused, reset, closed early, DNS).
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The job-wide timer expired before the job reached a terminal state.
    #[error("Job timed out after {0:?}")]
    JobTimeout(Duration),

    /// Unrecoverable condition in a job's own control logic.
    #[error("Job fatal error: {0}")]
    JobFatal(String),

    #[error("Version authority error: {0}")]
    VersionAuthority(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn reply(message: impl Into<String>) -> Self {
        Error::ReplyConstruction(message.into())
    }

    pub fn transport(message: impl Into<String>, source: io::Error) -> Self {
        Error::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Connection closed or failed without an underlying OS error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// True for stalls on the wire and for job-wide timer expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TransportTimeout(_) | Error::JobTimeout(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}
