//! Remote execution of commands with progress, error, timeout and completion
//! notifications.

pub mod engine;
pub mod event;

pub use engine::{read_response, write_request, Remoting};
pub use event::{channel, Event, EventSink, EventStream};
