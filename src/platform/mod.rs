/// Common cross-platform utilities (atomic writes, permissions)
pub mod common;

/// External command execution with timeouts
pub mod command;

/// Root/Administrator detection
pub mod privileges;

/// Windows-specific operations (registry)
#[cfg(target_os = "windows")]
pub mod windows;

/// macOS-specific operations (plist)
#[cfg(target_os = "macos")]
pub mod macos;

/// Linux-specific operations (JSON policies)
#[cfg(target_os = "linux")]
pub mod linux;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use common::*;
pub use privileges::{ensure_admin, is_admin};
