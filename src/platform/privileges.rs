use crate::error::{GuardError, GuardResult};

/// Check if the current process is running with admin/root privileges
pub fn is_admin() -> bool {
    #[cfg(target_os = "windows")]
    {
        windows_is_admin()
    }

    #[cfg(unix)]
    {
        unix_is_admin()
    }

    #[cfg(not(any(unix, target_os = "windows")))]
    {
        false
    }
}

/// Fail with `ElevationRequired` unless running as root/Administrator
pub fn ensure_admin(operation: &str) -> GuardResult<()> {
    if is_admin() {
        Ok(())
    } else {
        Err(GuardError::ElevationRequired(operation.to_string()))
    }
}

#[cfg(unix)]
fn unix_is_admin() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(target_os = "windows")]
fn windows_is_admin() -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::Security::{
        GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    // SAFETY: token is only used after OpenProcessToken succeeds and is closed before return
    unsafe {
        let mut token: HANDLE = std::mem::zeroed();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut return_length = 0u32;
        let result = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );

        CloseHandle(token);

        result != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_admin_matches_is_admin() {
        let result = ensure_admin("install the daemon");
        if is_admin() {
            assert!(result.is_ok());
        } else {
            let err = result.unwrap_err();
            assert_eq!(err.kind(), "ElevationRequiredError");
            assert!(err.to_string().contains("install the daemon"));
        }
    }
}
