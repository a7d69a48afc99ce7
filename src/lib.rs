//! family-guard: parental control enforcement.
//!
//! A privileged daemon terminates blocked processes and redirects blocked
//! domains according to a persisted policy and weekly schedules; the CLI
//! talks to it over local IPC and manages its OS service registration.

pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod network;
pub mod platform;
pub mod policy;
pub mod process;
pub mod schedule;
pub mod supervisor;

pub use error::{GuardError, GuardResult};
