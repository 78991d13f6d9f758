use wansetup_core::ksr::Ksr;
use wansetup_core::pki::{sign_public_key, vendor_signer_id, TrustAnchor, TrustStore};
use wansetup_core::signing::{sign_package, verify_package};
use wansetup_core::suite::{KeyAlgorithm, KeySuite};

fn trust_store_for(vendor: &KeySuite) -> TrustStore {
    let mut store = TrustStore::new();
    store.add_anchor(
        vendor_signer_id(&vendor.primary.public_key_bytes()),
        TrustAnchor {
            public_key: vendor.primary.public_key_bytes(),
            algorithm: KeyAlgorithm::EcdsaP256,
            domain: "wan24Setup".to_string(),
        },
    );
    store.add_anchor(
        vendor_signer_id(&vendor.counter.public_key_bytes()),
        TrustAnchor {
            public_key: vendor.counter.public_key_bytes(),
            algorithm: KeyAlgorithm::MlDsa87,
            domain: "wan24Setup".to_string(),
        },
    );
    store
}

/// End-to-end: a requester generates a suite and a KSR, a vendor signs it,
/// the requester signs a package, and a verifier with only the vendor's
/// anchors in its trust store accepts it.
#[test]
fn full_chain_from_ksr_to_package_verification() {
    let vendor_suite = KeySuite::generate().unwrap();
    let mut requester_suite = KeySuite::generate().unwrap();

    let ksr = Ksr::create(&requester_suite, "wan24Setup", "owner@example.com").unwrap();
    ksr.validate().unwrap();

    let spk = sign_public_key(&vendor_suite, &ksr).unwrap();
    requester_suite.finalize_with(spk);

    let trust_store = trust_store_for(&vendor_suite);

    let package = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(package.path(), b"a fully assembled installer package\n").unwrap();

    let signature = sign_package(&requester_suite, package.path()).unwrap();
    verify_package(package.path(), &signature, &trust_store, false).unwrap();
}

#[test]
fn verification_fails_once_the_package_bytes_change() {
    let vendor_suite = KeySuite::generate().unwrap();
    let mut requester_suite = KeySuite::generate().unwrap();
    let ksr = Ksr::create(&requester_suite, "wan24Setup", "owner@example.com").unwrap();
    let spk = sign_public_key(&vendor_suite, &ksr).unwrap();
    requester_suite.finalize_with(spk);

    let trust_store = trust_store_for(&vendor_suite);

    let package = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(package.path(), b"original bytes\n").unwrap();
    let signature = sign_package(&requester_suite, package.path()).unwrap();

    std::fs::write(package.path(), b"tampered bytes\n").unwrap();
    let err = verify_package(package.path(), &signature, &trust_store, false).unwrap_err();
    assert!(matches!(err, wansetup_core::Error::IntegrityFailure(_)));
}
