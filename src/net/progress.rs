//! Transfer progress reporting.

/// Which way a packet travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

/// One progress notification: a packet moved over the connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub direction: Direction,

    /// Body bytes in this packet
    pub bytes: usize,

    /// Body length in this direction, when declared
    pub total: Option<u64>,

    /// Percent of the request body sent, `None` when indeterminate
    pub percent_sent: Option<f64>,

    /// Percent of the response body received, `None` when indeterminate
    pub percent_received: Option<f64>,

    /// Index of the command within its task (0 for a lone command)
    pub step: usize,
}

impl Progress {
    pub fn sent(bytes: usize, done: u64, total: Option<u64>) -> Self {
        Self {
            direction: Direction::Send,
            bytes,
            total,
            percent_sent: percent(done, total),
            percent_received: Some(0.0),
            step: 0,
        }
    }

    pub fn received(bytes: usize, done: u64, total: Option<u64>) -> Self {
        Self {
            direction: Direction::Receive,
            bytes,
            total,
            percent_sent: Some(100.0),
            percent_received: percent(done, total),
            step: 0,
        }
    }

    /// Re-tag a command's progress with its position inside a task.
    pub fn in_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn is_send(&self) -> bool {
        self.direction == Direction::Send
    }
}

/// `done / total` as a percentage; `None` when the total is unknown.
pub fn percent(done: u64, total: Option<u64>) -> Option<f64> {
    total.map(|total| {
        if total == 0 {
            100.0
        } else {
            (done as f64 * 100.0 / total as f64).min(100.0)
        }
    })
}
