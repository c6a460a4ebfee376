//! Connection and transfer progress primitives.

pub mod connection;
pub mod progress;

pub use connection::Connection;
pub use progress::{percent, Direction, Progress};
