//! C7: copies an extracted package's payload onto the target
//! installation, skipping the installer's own artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use wansetup_core::error::Result;

use crate::descriptor::DESCRIPTOR_FILE_NAME;

/// POSIX permission bits applied to files and directories this helper
/// creates; ignored on non-Unix targets.
#[derive(Debug, Clone, Copy)]
pub struct PosixMode {
    pub dir_mode: u32,
    pub file_mode: u32,
}

impl Default for PosixMode {
    fn default() -> Self {
        Self {
            dir_mode: 0o755,
            file_mode: 0o644,
        }
    }
}

/// Recursively copies `source_dir` into `dest_dir`, skipping the running
/// executable's own filename, `setup.json`, and anything in `exclude`.
/// Existing destination files are overwritten; missing directories are
/// created with `mode`. `on_entry` is called with each destination path
/// written, so a caller can drive a progress meter.
pub fn copy_payload(
    source_dir: &Path,
    dest_dir: &Path,
    exclude: &[PathBuf],
    mode: PosixMode,
    mut on_entry: impl FnMut(&Path),
) -> Result<()> {
    let current_exe_name = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()));

    fs::create_dir_all(dest_dir)?;
    set_mode(dest_dir, mode.dir_mode)?;

    let mut stack = vec![source_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path.strip_prefix(source_dir).unwrap_or(&path);

            if let Some(name) = path.file_name() {
                if Some(name.to_os_string()) == current_exe_name {
                    continue;
                }
                if name == DESCRIPTOR_FILE_NAME {
                    continue;
                }
            }
            if exclude.iter().any(|excluded| rel == excluded) {
                continue;
            }

            let dest = dest_dir.join(rel);
            if path.is_dir() {
                fs::create_dir_all(&dest)?;
                set_mode(&dest, mode.dir_mode)?;
                stack.push(path);
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&path, &dest)?;
                set_mode(&dest, mode.file_mode)?;
                on_entry(&dest);
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
