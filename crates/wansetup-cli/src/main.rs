use std::path::PathBuf;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

use wansetup_core::envelope::{open_envelope, write_envelope};
use wansetup_core::ksr::Ksr;
use wansetup_core::package;
use wansetup_core::pki::{sign_public_key, SignedPublicKey, TrustStore};
use wansetup_core::signing::{sign_package, verify_package, PackageSignature};
use wansetup_core::suite::KeySuite;
use wansetup_core::{password, CancellationToken};
use wansetup_installer::copy::{copy_payload, PosixMode};
use wansetup_installer::driver;
use wansetup_installer::driver::{PostSetupCommand, RunSetupHandle, Setup};

#[derive(Parser, Debug)]
#[command(author, version, about = "wansetup: signed installer-package toolchain")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a new private key suite (ECDSA P-256 + ML-DSA-87) and
    /// encrypt it at rest under a password.
    CreateKey {
        /// Where to write the encrypted suite (default: $HOME/.wansetup/suite.bin)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Environment variable to read the password from instead of stdin
        #[arg(long)]
        password_env: Option<String>,
    },
    /// Print a key signing request for an existing suite.
    PrintKsr {
        #[arg(long)]
        suite: Option<PathBuf>,
        #[arg(long)]
        password_env: Option<String>,
        #[arg(long)]
        pki_domain: String,
        #[arg(long)]
        owner_email: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Vendor operation: sign a requester's KSR with the vendor's suite.
    SignKey {
        #[arg(long)]
        ksr: PathBuf,
        #[arg(long)]
        vendor_suite: PathBuf,
        #[arg(long)]
        password_env: Option<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Build a signed, compressed installer package from a directory.
    Create {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        suite: PathBuf,
        #[arg(long)]
        password_env: Option<String>,
    },
    /// Extract a package's contents without running the installer handoff.
    Extract {
        #[arg(long)]
        package: PathBuf,
        #[arg(long)]
        target: PathBuf,
    },
    /// Run the installer state machine against a package.
    Install {
        #[arg(long)]
        package: PathBuf,
        /// Directory the setup plugin copies the payload into.
        #[arg(long)]
        target: PathBuf,
        #[arg(long)]
        trust_store: Option<PathBuf>,
        #[arg(long)]
        allow_unsigned: bool,
        /// Command chained (detached) after a successful setup run that
        /// demanded the parent exit.
        #[arg(long)]
        post_setup_cmd: Option<String>,
        #[arg(long)]
        post_setup_args: Option<String>,
        #[arg(long, hide = true)]
        resume_pid: Option<u32>,
        #[arg(long, hide = true)]
        resume_dir: Option<PathBuf>,
        #[arg(long, hide = true)]
        resume_target: Option<PathBuf>,
        #[arg(long, hide = true)]
        resume_post_cmd: Option<String>,
        #[arg(long, hide = true)]
        resume_post_args: Option<String>,
    },
}

/// The binary's single [`Setup`] implementation: copies the extracted
/// payload onto the app install path, skipping nothing beyond what
/// `copy_payload` already excludes by default.
struct DefaultSetup;

impl Setup for DefaultSetup {
    fn run(&self, handle: &RunSetupHandle) -> wansetup_core::error::Result<i32> {
        let mut copied = 0usize;
        copy_payload(&handle.source_dir, &handle.app_path, &[], PosixMode::default(), |_| {
            copied += 1;
        })?;
        tracing::info!(files = copied, dest = %handle.app_path.display(), "payload copied");
        Ok(0)
    }
}

const EXIT_USAGE: i32 = 1;
const EXIT_KSR_INVALID: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let _ = wansetup_core::security::disable_core_dumps();
    wansetup_installer::register_setup(|| Box::new(DefaultSetup));

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            EXIT_USAGE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Cmd::CreateKey { output, password_env } => create_key(output, password_env).await,
        Cmd::PrintKsr {
            suite,
            password_env,
            pki_domain,
            owner_email,
            output,
        } => print_ksr(suite, password_env, pki_domain, owner_email, output).await,
        Cmd::SignKey {
            ksr,
            vendor_suite,
            password_env,
            output,
        } => sign_key(ksr, vendor_suite, password_env, output).await,
        Cmd::Create {
            source,
            output,
            suite,
            password_env,
        } => create_package(source, output, suite, password_env).await,
        Cmd::Extract { package, target } => extract_package(package, target).await,
        Cmd::Install {
            package,
            target,
            trust_store,
            allow_unsigned,
            post_setup_cmd,
            post_setup_args,
            resume_pid,
            resume_dir,
            resume_target,
            resume_post_cmd,
            resume_post_args,
        } => {
            install(InstallArgs {
                package,
                target,
                trust_store,
                allow_unsigned,
                post_setup_cmd,
                post_setup_args,
                resume_pid,
                resume_dir,
                resume_target,
                resume_post_cmd,
                resume_post_args,
            })
            .await
        }
    }
}

struct InstallArgs {
    package: PathBuf,
    target: PathBuf,
    trust_store: Option<PathBuf>,
    allow_unsigned: bool,
    post_setup_cmd: Option<String>,
    post_setup_args: Option<String>,
    resume_pid: Option<u32>,
    resume_dir: Option<PathBuf>,
    resume_target: Option<PathBuf>,
    resume_post_cmd: Option<String>,
    resume_post_args: Option<String>,
}

fn load_suite(path: &std::path::Path, password_env: Option<&str>) -> anyhow::Result<KeySuite> {
    let password = password::acquire(password_env)?;
    let key = password::finalize(&password, None)?;
    let bytes = std::fs::read(path)?;
    Ok(KeySuite::decrypt(&bytes, &key)?)
}

fn atomic_write(path: &std::path::Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or(std::path::Path::new(".")))?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    tmp.persist(path)?;
    wansetup_core::security::set_secure_permissions(path)?;
    Ok(())
}

async fn create_key(output: Option<PathBuf>, password_env: Option<String>) -> anyhow::Result<i32> {
    let output = match output {
        Some(p) => p,
        None => wansetup_core::default_suite_path()?,
    };
    let password = password::acquire(password_env.as_deref())?;
    let key = password::finalize(&password, None)?;
    let suite = KeySuite::generate()?;
    let blob = suite.encrypt(&key)?;
    atomic_write(&output, &blob)?;
    println!("✅ Generated key suite: {}", output.display());
    Ok(0)
}

async fn print_ksr(
    suite_path: Option<PathBuf>,
    password_env: Option<String>,
    pki_domain: String,
    owner_email: String,
    output: Option<PathBuf>,
) -> anyhow::Result<i32> {
    let suite_path = match suite_path {
        Some(p) => p,
        None => wansetup_core::default_suite_path()?,
    };
    let suite = load_suite(&suite_path, password_env.as_deref())?;
    let ksr = Ksr::create(&suite, &pki_domain, &owner_email)?;
    if let Err(e) = ksr.validate() {
        eprintln!("❌ generated KSR failed its own validation: {e}");
        return Ok(EXIT_KSR_INVALID);
    }

    let bytes = postcard::to_allocvec(&ksr)?;
    match output {
        Some(path) => {
            std::fs::write(&path, &bytes)?;
            println!("✅ Wrote KSR: {}", path.display());
        }
        None => {
            println!("KSR purpose: {}", ksr.purpose);
            for (k, v) in &ksr.attributes {
                println!("  {k} = {v}");
            }
            println!("primary public key: {}", BASE64.encode(&ksr.primary_public));
            println!("counter public key: {}", BASE64.encode(&ksr.counter_public));
            println!("self signature: {}", BASE64.encode(&ksr.self_signature));
        }
    }
    Ok(0)
}

async fn sign_key(
    ksr_path: PathBuf,
    vendor_suite_path: PathBuf,
    password_env: Option<String>,
    output: PathBuf,
) -> anyhow::Result<i32> {
    let ksr_bytes = std::fs::read(&ksr_path)?;
    let ksr: Ksr = postcard::from_bytes(&ksr_bytes)?;
    if let Err(e) = ksr.validate() {
        eprintln!("❌ KSR is invalid: {e}");
        return Ok(EXIT_KSR_INVALID);
    }

    let vendor_suite = load_suite(&vendor_suite_path, password_env.as_deref())?;
    let spk: SignedPublicKey = sign_public_key(&vendor_suite, &ksr)?;
    let bytes = postcard::to_allocvec(&spk)?;
    std::fs::write(&output, &bytes)?;
    println!("✅ Signed public key written: {}", output.display());
    Ok(0)
}

async fn create_package(
    source: PathBuf,
    output: PathBuf,
    suite_path: PathBuf,
    password_env: Option<String>,
) -> anyhow::Result<i32> {
    let suite = load_suite(&suite_path, password_env.as_deref())?;
    let cancel = CancellationToken::new();

    let entries = walk(&source);
    let mut archive = Vec::new();
    let uncompressed_len = package::create(&source, entries.into_iter(), &mut archive, &cancel)?;

    let mut envelope_bytes = Vec::new();
    write_envelope(&mut envelope_bytes, uncompressed_len, archive.as_slice())?;
    std::fs::write(&output, &envelope_bytes)?;

    let sig = sign_package(&suite, &output)?;
    let sig_bytes = postcard::to_allocvec(&sig)?;
    let sig_path = sig_path_for(&output);
    std::fs::write(&sig_path, &sig_bytes)?;

    println!("✅ Created package: {}", output.display());
    println!("✅ Wrote detached signature: {}", sig_path.display());
    Ok(0)
}

async fn extract_package(package_path: PathBuf, target: PathBuf) -> anyhow::Result<i32> {
    let cancel = CancellationToken::new();
    let file = std::fs::File::open(&package_path)?;
    let (_, decompressor) = open_envelope(file)?;
    package::extract(decompressor, &target, &cancel)?;
    println!("✅ Extracted to: {}", target.display());
    Ok(0)
}

async fn install(args: InstallArgs) -> anyhow::Result<i32> {
    let post_setup = match (args.post_setup_cmd, args.post_setup_args) {
        (Some(command), post_args) => Some(PostSetupCommand { command, args: post_args }),
        (None, _) => None,
    };

    if let (Some(pid), Some(dir), Some(target)) = (args.resume_pid, args.resume_dir, args.resume_target) {
        let resume_post_setup = match (args.resume_post_cmd, args.resume_post_args) {
            (Some(command), post_args) => Some(PostSetupCommand { command, args: post_args }),
            (None, _) => None,
        };
        let code = driver::run_setup_async(pid, &dir, &target, resume_post_setup).await?;
        return Ok(code);
    }

    verify_before_install(&args.package, args.trust_store, args.allow_unsigned)?;

    let cancel = CancellationToken::new();
    let extracted = driver::extract(&args.package, &cancel).await?;
    let descriptor = driver::load_descriptor(&extracted)?;

    match driver::spawn_child(&extracted, &descriptor, false, &args.target, post_setup.as_ref()).await? {
        wansetup_installer::SpawnOutcome::RequireExit { child_pid } => {
            let mut resume_cmd = format!(
                "--resume-pid {child_pid} --resume-dir {} --resume-target {}",
                extracted.display(),
                args.target.display()
            );
            if let Some(post) = &post_setup {
                resume_cmd.push_str(&format!(" --resume-post-cmd {}", post.command));
                if let Some(post_args) = &post.args {
                    resume_cmd.push_str(&format!(" --resume-post-args {post_args}"));
                }
            }
            println!("↪️  handing off to child pid {child_pid}; re-invoke with {resume_cmd}");
            Ok(0)
        }
        wansetup_installer::SpawnOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => {
            if !stdout.is_empty() {
                print!("{}", String::from_utf8_lossy(&stdout));
            }
            if !stderr.is_empty() {
                eprint!("{}", String::from_utf8_lossy(&stderr));
            }
            if exit_code == 0 {
                let _ = std::fs::remove_dir_all(&extracted);
                println!("✅ install finished");
            } else {
                eprintln!("❌ setup child exited with code {exit_code}; preserving {}", extracted.display());
            }
            Ok(exit_code)
        }
    }
}

fn verify_before_install(
    package_path: &std::path::Path,
    trust_store_path: Option<PathBuf>,
    allow_unsigned: bool,
) -> anyhow::Result<()> {
    let sig_path = sig_path_for(package_path);
    if !sig_path.exists() {
        if allow_unsigned {
            return Ok(());
        }
        bail!("missing detached signature: {}", sig_path.display());
    }

    let sig_bytes = std::fs::read(&sig_path)?;
    let sig: PackageSignature = postcard::from_bytes(&sig_bytes)?;

    let trust_store_path = match trust_store_path {
        Some(p) => p,
        None => wansetup_core::default_trust_store_path()?,
    };
    let trust_store = TrustStore::load_from_path(&trust_store_path)
        .with_context(|| format!("loading trust store {}", trust_store_path.display()))?;

    verify_package(package_path, &sig, &trust_store, allow_unsigned)?;
    Ok(())
}

fn sig_path_for(package_path: &std::path::Path) -> PathBuf {
    let mut name = package_path.as_os_str().to_os_string();
    name.push(".sig");
    PathBuf::from(name)
}

fn walk(base: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.push(path.clone());
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
