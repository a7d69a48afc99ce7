use std::path::Path;

use anyhow::Result;

use crate::daemon::{AuthStatus, SetupResult};
use crate::ipc::DaemonRequest;

use super::utils::{call, call_as_parent, init_logging, password_or_prompt};

pub fn status(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let status: AuthStatus = call(config_path, DaemonRequest::GetAuthStatus)?;
    if status.is_configured {
        println!("✓ Parent password is set");
    } else {
        println!("No parent password set. Run 'family-guard auth setup'.");
    }
    Ok(())
}

/// Set the first password and print the recovery secret
pub fn setup(config_path: &Path, password: Option<String>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let password = password_or_prompt(password, "New parent password")?;
    let result: SetupResult = call(config_path, DaemonRequest::SetupPassword { password })?;

    println!("✓ Parent password set");
    println!();
    println!("Recovery password (write it down and keep it somewhere safe):");
    println!();
    println!("    {}", result.recovery_secret);
    println!();
    println!("It resets the parent password with 'family-guard auth reset'.");
    Ok(())
}

pub fn verify(config_path: &Path, password: Option<String>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let password = password_or_prompt(password, "Parent password")?;
    let valid: bool = call(config_path, DaemonRequest::VerifyPassword { password })?;
    if valid {
        println!("✓ Password is correct");
        Ok(())
    } else {
        anyhow::bail!("Incorrect password");
    }
}

pub fn change(
    config_path: &Path,
    old_password: Option<String>,
    new_password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let old_password = password_or_prompt(old_password, "Current parent password")?;
    let new_password = password_or_prompt(new_password, "New parent password")?;
    call::<()>(
        config_path,
        DaemonRequest::ChangePassword {
            old_password,
            new_password,
        },
    )?;
    println!("✓ Parent password changed");
    Ok(())
}

pub fn reset(
    config_path: &Path,
    recovery_secret: Option<String>,
    new_password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let recovery_secret = password_or_prompt(recovery_secret, "Recovery password")?;
    let new_password = password_or_prompt(new_password, "New parent password")?;
    call::<()>(
        config_path,
        DaemonRequest::ResetWithRecovery {
            recovery_secret,
            new_password,
        },
    )?;
    println!("✓ Parent password reset");
    Ok(())
}

/// Show the recovery secret again; needs the current password
pub fn show_recovery(config_path: &Path, password: Option<String>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let password = password_or_prompt(password, "Parent password")?;
    let secret: String = call(config_path, DaemonRequest::GetMasterPassword { password })?;
    println!("Recovery password: {}", secret);
    Ok(())
}

/// Ask the daemon to exit; the service manager may restart it
pub fn quit(config_path: &Path, password: Option<String>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    call_as_parent::<()>(config_path, password, DaemonRequest::Shutdown { password: None })?;
    println!("✓ Daemon is shutting down");
    Ok(())
}
