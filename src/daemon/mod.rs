//! The privileged enforcement daemon.

pub mod dispatch;
pub mod engine;
pub mod runner;
pub mod status;

pub use dispatch::Dispatcher;
pub use engine::Engine;
pub use runner::run_daemon;
pub use status::{AuthStatus, BlockingStatus, DaemonStatus, SetupResult};
