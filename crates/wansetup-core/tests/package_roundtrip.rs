use std::fs;

use wansetup_core::{envelope, package, CancellationToken};

#[test]
fn envelope_wrapped_archive_roundtrips_through_a_directory_tree() {
    let source = tempfile::tempdir().unwrap();
    fs::create_dir_all(source.path().join("bin")).unwrap();
    fs::write(source.path().join("bin/tool"), b"#!/bin/sh\necho hi\n").unwrap();
    fs::write(source.path().join("readme.txt"), b"installer payload\n").unwrap();

    let entries = vec![
        source.path().join("bin"),
        source.path().join("bin/tool"),
        source.path().join("readme.txt"),
    ];

    let cancel = CancellationToken::new();
    let mut archive = Vec::new();
    let uncompressed_len =
        package::create(source.path(), entries.into_iter(), &mut archive, &cancel).unwrap();

    let mut envelope_bytes = Vec::new();
    envelope::write_envelope(&mut envelope_bytes, uncompressed_len, archive.as_slice()).unwrap();

    let (header, decompressor) = envelope::open_envelope(envelope_bytes.as_slice()).unwrap();
    assert_eq!(header.uncompressed_len, Some(uncompressed_len));

    let target = tempfile::tempdir().unwrap();
    package::extract(decompressor, target.path(), &cancel).unwrap();

    assert_eq!(
        fs::read(target.path().join("bin/tool")).unwrap(),
        b"#!/bin/sh\necho hi\n"
    );
    assert_eq!(
        fs::read(target.path().join("readme.txt")).unwrap(),
        b"installer payload\n"
    );
}

#[test]
fn envelope_rejects_a_header_from_the_future() {
    let mut bytes = Vec::new();
    envelope::write_envelope(&mut bytes, 0, &b""[..]).unwrap();
    // Serializer version tag is the very first byte.
    bytes[0] = 0xff;
    let err = envelope::open_envelope(bytes.as_slice()).unwrap_err();
    assert!(matches!(err, wansetup_core::Error::UnsupportedFormat(_)));
}
