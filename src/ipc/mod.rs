//! Command surface between the daemon and its clients.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use protocol::{DaemonRequest, DaemonResponse};
pub use server::{IpcServer, RequestHandler};
