use std::path::Path;

use crate::error::Result;

/// Disable core dumps for the current process, best-effort. Called once at
/// startup by any binary that handles passwords or private key material, so
/// a crash never leaves derived keys sitting in a core file.
pub fn disable_core_dumps() -> Result<()> {
    #[cfg(unix)]
    {
        use libc::{rlimit, setrlimit, RLIMIT_CORE};
        let rlim = rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let result = unsafe { setrlimit(RLIMIT_CORE, &rlim) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
    #[cfg(not(unix))]
    {
        Ok(())
    }
}

/// Restrict a freshly-written secret file to owner-only access (0600).
pub fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Directory/file modes used when C3/C7 recreate entries on POSIX; ignored
/// by [`set_dir_mode`] on non-Unix targets.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[cfg(unix)]
pub fn set_dir_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_dir_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
