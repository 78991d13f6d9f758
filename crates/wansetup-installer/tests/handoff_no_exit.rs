use std::fs;

use wansetup_core::{envelope, package, CancellationToken};
use wansetup_installer::descriptor::SetupDescriptor;
use wansetup_installer::driver::{extract, load_descriptor, spawn_child, SpawnOutcome};

/// Builds a minimal package (one shell script plus a `setup.json`
/// descriptor) the same way `wansetup create` would, without going
/// through the signing layer.
fn build_package(dest: &std::path::Path) {
    let source = tempfile::tempdir().unwrap();
    fs::write(
        source.path().join("run.sh"),
        b"#!/bin/sh\necho installed\nexit 0\n",
    )
    .unwrap();

    let descriptor = SetupDescriptor {
        command: "/bin/sh".to_string(),
        arguments: Some("run.sh".to_string()),
        exit_required: false,
        require_admin: false,
        hide_window: false,
    };
    descriptor.save(source.path()).unwrap();

    let entries = vec![
        source.path().join("run.sh"),
        source.path().join(wansetup_installer::descriptor::DESCRIPTOR_FILE_NAME),
    ];
    let cancel = CancellationToken::new();
    let mut archive = Vec::new();
    let len = package::create(source.path(), entries.into_iter(), &mut archive, &cancel).unwrap();
    let mut env = Vec::new();
    envelope::write_envelope(&mut env, len, archive.as_slice()).unwrap();
    fs::write(dest, env).unwrap();
}

#[tokio::test]
async fn extract_load_and_run_a_package_that_does_not_require_a_parent_exit() {
    let package_path = tempfile::NamedTempFile::new().unwrap();
    build_package(package_path.path());

    let cancel = CancellationToken::new();
    let extracted = extract(package_path.path(), &cancel).await.unwrap();
    let descriptor = load_descriptor(&extracted).unwrap();
    assert!(!descriptor.exit_required);

    let app_install_path = tempfile::tempdir().unwrap();
    match spawn_child(&extracted, &descriptor, false, app_install_path.path(), None)
        .await
        .unwrap()
    {
        SpawnOutcome::Completed {
            exit_code,
            stdout,
            stderr: _,
        } => {
            assert_eq!(exit_code, 0);
            assert_eq!(String::from_utf8_lossy(&stdout).trim(), "installed");
        }
        SpawnOutcome::RequireExit { .. } => panic!("descriptor did not request exit_required"),
    }
}
