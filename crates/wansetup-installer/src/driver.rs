//! C6: the installer handoff state machine. A package is extracted to a
//! temp directory, its `setup.json` is loaded, and a child process is
//! spawned from the extracted payload. If the descriptor demands it, the
//! parent exits so the child can replace files the parent itself is
//! running from; either way, the child eventually re-enters this same
//! driver (as `run_setup_async`) to run the registered [`Setup`] plugin
//! and clean up.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;

use wansetup_core::error::{Error, Result};
use wansetup_core::CancellationToken;

use crate::descriptor::SetupDescriptor;

/// A post-setup hook a binary registers exactly once, replacing the
/// teacher's dynamic plugin-interface scan with static registration.
pub trait Setup: Send + Sync {
    fn run(&self, handle: &RunSetupHandle) -> Result<i32>;
}

type SetupFactory = fn() -> Box<dyn Setup>;

static SETUP_FACTORY: OnceLock<SetupFactory> = OnceLock::new();

/// Registers the binary's single [`Setup`] implementation. Calling this
/// more than once is a programmer error and the second registration is
/// silently ignored, matching `OnceLock`'s own semantics.
pub fn register_setup(factory: SetupFactory) {
    let _ = SETUP_FACTORY.set(factory);
}

/// A command declared separately from `setup.json`'s own `Command`,
/// chained after the `Setup` plugin succeeds. Distinct from the
/// descriptor's command: the descriptor says what to launch to run
/// setup, this says what (if anything) to run once setup is done.
#[derive(Debug, Clone)]
pub struct PostSetupCommand {
    pub command: String,
    pub args: Option<String>,
}

/// Process-wide re-entry guard: only one `run_setup_async` may be active
/// in this process at a time.
static RUN_SETUP_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Owns the arguments a `Setup` plugin needs and releases the re-entry
/// guard when dropped, so a panicking or early-returning plugin never
/// wedges the guard open.
pub struct RunSetupHandle {
    pub arguments: Option<String>,
    pub app_path: PathBuf,
    pub source_dir: PathBuf,
}

impl RunSetupHandle {
    fn acquire(app_path: PathBuf, source_dir: PathBuf, descriptor: &SetupDescriptor) -> Result<Self> {
        RUN_SETUP_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self {
            arguments: descriptor.arguments.clone(),
            app_path,
            source_dir,
        })
    }
}

impl Drop for RunSetupHandle {
    fn drop(&mut self) {
        RUN_SETUP_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Extracts `package_path` (envelope + archive) into a freshly created
/// temp directory and returns it. The directory is left in place on
/// success; callers remove it once the handoff finishes or fails.
pub async fn extract(package_path: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
    let package_path = package_path.to_path_buf();
    let cancel = cancel.clone();
    let dir = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let temp = tempfile::Builder::new().prefix("wansetup-").tempdir()?;
        let (_, decompressor) = {
            let file = std::fs::File::open(&package_path)?;
            wansetup_core::envelope::open_envelope(file)?
        };
        wansetup_core::package::extract(decompressor, temp.path(), &cancel)?;
        Ok(temp.into_path())
    })
    .await
    .map_err(|e| Error::InvalidFormat(format!("extraction task panicked: {e}")))??;

    tracing::info!(path = %dir.display(), "package extracted");
    Ok(dir)
}

pub fn load_descriptor(extracted_dir: &Path) -> Result<SetupDescriptor> {
    SetupDescriptor::load(extracted_dir)
}

/// What `spawn_child` did: either the descriptor demanded the parent
/// exit (the caller is expected to `std::process::exit` right after
/// logging), or the child was waited on inline and its outcome captured.
pub enum SpawnOutcome {
    RequireExit { child_pid: u32 },
    Completed {
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

/// Spawns `descriptor.command` from inside `extracted_dir`. If
/// `descriptor.exit_required` is set and `skip_exit` is false, returns
/// immediately with the child's pid so the caller can exit without
/// waiting (the child will re-enter via `run_setup_async` once the
/// parent's pid is gone). Otherwise waits inline and captures output.
///
/// Besides the descriptor's own `Arguments`, the child's argv is always
/// given `--pid <caller-pid-or--1>` (the current process's pid when it's
/// about to exit and the child must wait for it, `-1` otherwise) and
/// `--path <app_install_path>`, plus `--cmd`/`--args` when a post-setup
/// command was declared — the standard injected args any setup command
/// can rely on.
pub async fn spawn_child(
    extracted_dir: &Path,
    descriptor: &SetupDescriptor,
    skip_exit: bool,
    app_install_path: &Path,
    post_setup: Option<&PostSetupCommand>,
) -> Result<SpawnOutcome> {
    let will_exit = descriptor.exit_required && !skip_exit;

    let mut command = Command::new(&descriptor.command);
    command.current_dir(extracted_dir);
    if let Some(args) = &descriptor.arguments {
        command.args(shell_split(args));
    }

    let pid_arg = if will_exit {
        std::process::id().to_string()
    } else {
        "-1".to_string()
    };
    command.arg("--pid").arg(&pid_arg);
    command.arg("--path").arg(app_install_path);
    if let Some(post) = post_setup {
        command.arg("--cmd").arg(&post.command);
        if let Some(args) = &post.args {
            command.arg("--args").arg(args);
        }
    }

    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if will_exit {
        let pid = child.id().ok_or_else(|| {
            Error::InvalidFormat("spawned child exited before its pid could be read".into())
        })?;
        tracing::info!(pid, "exit required; returning child pid to caller");
        return Ok(SpawnOutcome::RequireExit { child_pid: pid });
    }

    let output = child.wait_with_output().await?;
    Ok(SpawnOutcome::Completed {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Splits a descriptor's `Arguments` string the way a shell would for a
/// single flat command line — quoting is intentionally unsupported since
/// `setup.json` is machine-generated by `create`, never hand-edited.
fn shell_split(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Polls for `pid` to stop existing, matching the Linux-only process
/// model of §14. Returns once `/proc/<pid>` disappears or `timeout`
/// elapses (the latter is not an error — a hung parent is the caller's
/// problem, not this driver's).
#[cfg(unix)]
async fn wait_for_pid_exit(pid: u32, timeout: Duration) -> Result<()> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(not(unix))]
async fn wait_for_pid_exit(_pid: u32, _timeout: Duration) -> Result<()> {
    Ok(())
}

/// Re-entry point: waits for the original parent process to exit, loads
/// `setup.json` from the current directory, invokes the registered
/// [`Setup`] plugin against `app_install_path`, then — if the descriptor
/// demanded exit and a post-setup command was declared — spawns that
/// command detached (not awaited) before returning the plugin's exit
/// code. Non-zero exit from the plugin preserves the extracted directory
/// for inspection; success removes it.
pub async fn run_setup_async(
    old_pid: u32,
    extracted_dir: &Path,
    app_install_path: &Path,
    post_setup: Option<PostSetupCommand>,
) -> Result<i32> {
    wait_for_pid_exit(old_pid, Duration::from_secs(30)).await?;

    let descriptor = SetupDescriptor::load(extracted_dir)?;
    let handle = RunSetupHandle::acquire(
        app_install_path.to_path_buf(),
        extracted_dir.to_path_buf(),
        &descriptor,
    )?;
    let exit_required = descriptor.exit_required;

    let factory = SETUP_FACTORY
        .get()
        .ok_or_else(|| Error::InvalidFormat("no Setup plugin registered".into()))?;
    let plugin = factory();

    // `handle` owns the re-entry guard (released by its `Drop`, wherever
    // that runs) and contains only `Send` data, so it moves into the
    // blocking task rather than being shared across the boundary by copy.
    let result = tokio::task::spawn_blocking(move || plugin.run(&handle))
        .await
        .map_err(|e| Error::InvalidFormat(format!("setup plugin task panicked: {e}")))?;

    let mut post_setup_cwd = extracted_dir.to_path_buf();
    match &result {
        Ok(code) if *code == 0 => {
            tracing::info!(dir = %extracted_dir.display(), "setup succeeded, removing extracted directory");
            let _ = std::fs::remove_dir_all(extracted_dir);
            post_setup_cwd = app_install_path.to_path_buf();
        }
        Ok(code) => {
            tracing::warn!(code, dir = %extracted_dir.display(), "setup failed, preserving extracted directory");
        }
        Err(e) => {
            tracing::warn!(error = %e, dir = %extracted_dir.display(), "setup errored, preserving extracted directory");
        }
    }

    if exit_required {
        if let Some(post) = post_setup {
            if let Err(e) = spawn_post_setup_detached(&post, &post_setup_cwd) {
                tracing::warn!(error = %e, command = %post.command, "failed to spawn post-setup command");
            }
        }
    }

    result
}

/// Spawns a post-setup command without waiting for it: its stdio is
/// detached from ours since the parent may be mid-exit by the time it
/// finishes.
fn spawn_post_setup_detached(post: &PostSetupCommand, cwd: &Path) -> Result<()> {
    let mut command = Command::new(&post.command);
    command.current_dir(cwd);
    if let Some(args) = &post.args {
        command.args(shell_split(args));
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command.spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_guard_rejects_concurrent_acquire() {
        let descriptor = SetupDescriptor {
            command: "true".to_string(),
            arguments: None,
            exit_required: false,
            require_admin: false,
            hide_window: false,
        };
        let first =
            RunSetupHandle::acquire(PathBuf::from("/tmp/a"), PathBuf::from("/tmp/a-src"), &descriptor)
                .unwrap();
        let second =
            RunSetupHandle::acquire(PathBuf::from("/tmp/b"), PathBuf::from("/tmp/b-src"), &descriptor);
        assert!(matches!(second.unwrap_err(), Error::AlreadyRunning));
        drop(first);
        let third =
            RunSetupHandle::acquire(PathBuf::from("/tmp/c"), PathBuf::from("/tmp/c-src"), &descriptor);
        assert!(third.is_ok());
    }

    #[test]
    fn shell_split_handles_multiple_flags() {
        assert_eq!(shell_split("--silent --no-reboot"), vec!["--silent", "--no-reboot"]);
        assert_eq!(shell_split(""), Vec::<String>::new());
    }

    #[tokio::test]
    async fn spawn_child_injects_pid_path_and_post_setup_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echo_args.sh"), b"#!/bin/sh\necho \"$@\"\n").unwrap();
        let descriptor = SetupDescriptor {
            command: "/bin/sh".to_string(),
            arguments: Some(dir.path().join("echo_args.sh").to_string_lossy().into_owned()),
            exit_required: false,
            require_admin: false,
            hide_window: false,
        };

        let app_install_path = tempfile::tempdir().unwrap();
        let post = PostSetupCommand {
            command: "/usr/bin/true".to_string(),
            args: Some("--quiet".to_string()),
        };

        match spawn_child(dir.path(), &descriptor, false, app_install_path.path(), Some(&post))
            .await
            .unwrap()
        {
            SpawnOutcome::Completed { stdout, .. } => {
                let out = String::from_utf8_lossy(&stdout);
                assert!(out.contains("--pid -1"));
                assert!(out.contains(&format!("--path {}", app_install_path.path().display())));
                assert!(out.contains("--cmd /usr/bin/true"));
                assert!(out.contains("--args --quiet"));
            }
            SpawnOutcome::RequireExit { .. } => panic!("descriptor did not request exit_required"),
        }
    }
}
