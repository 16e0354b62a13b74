//! Administrator and root detection for repairs that change system state.

use super::commands::CommandOutcome;

/// True when this process holds an elevated token.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use std::{mem, ptr};
    use winapi::ctypes::c_void;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
    use winapi::um::securitybaseapi::GetTokenInformation;
    use winapi::um::winnt::{TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};

    let mut token: *mut c_void = ptr::null_mut();
    // SAFETY: `token` is only used after a successful open and is closed
    // before returning.
    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }
        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut returned = 0u32;
        let queried = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut TOKEN_ELEVATION as *mut c_void,
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        CloseHandle(token);
        queried != 0 && elevation.TokenIsElevated != 0
    }
}

/// True when running as root.
#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

fn privilege_hint() -> &'static str {
    if cfg!(windows) {
        "requires administrator privileges"
    } else {
        "requires root"
    }
}

/// Ok when elevated, otherwise the `Unsupported` outcome a repair should
/// report for `program` instead of running it.
pub fn require_elevated(program: &str) -> Result<(), CommandOutcome> {
    if is_elevated() {
        Ok(())
    } else {
        log::debug!("Skipping {}: {}", program, privilege_hint());
        Err(CommandOutcome::unsupported(program, privilege_hint()))
    }
}
