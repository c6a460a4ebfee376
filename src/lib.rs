//! Client engine for a versioned document store.
//!
//! ```text
//! work        jobs: create / update / checkout a resource
//!  └ storage  resources = metadata document + data file, one version
//!     └ transaction   multi-step tasks over commands
//!        └ remoting   one command over one connection, with events
//!           └ command typed requests and replies
//!              └ wire / net   HTTP/1.1 messages over TCP
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod error_sink;
pub mod net;
pub mod remoting;
pub mod storage;
pub mod transaction;
pub mod version;
pub mod wire;
pub mod work;

pub use error::{Error, Result};
