// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! End-to-end verification scenarios against an in-memory backend.

use {
    assert_matches::assert_matches,
    std::io::{Cursor, Read},
    update_bundle::{
        test_support::{
            encode_root_metadata, encode_signed_metadata, encode_targets_metadata, BundleBuilder,
            MemBackend, RootSpec, TargetSpec, TestKey,
        },
        Backend, Error, ErrorKind, Manifest, Options, UpdateBundleAccessor,
    },
};

fn accessor<B: Backend>(
    bundle: Vec<u8>,
    backend: B,
    options: Options,
) -> UpdateBundleAccessor<Cursor<Vec<u8>>, B> {
    UpdateBundleAccessor::new(Cursor::new(bundle), backend, options)
}

fn signed_root(key: &TestKey, version: u32) -> Vec<u8> {
    let content = encode_root_metadata(&RootSpec::single(key, version));
    encode_signed_metadata(&content, &[(key.key_id(), key.sign(&content))])
}

fn signed_targets(key: &TestKey, version: u32, targets: &[TargetSpec]) -> Vec<u8> {
    let content = encode_targets_metadata(version, targets);
    encode_signed_metadata(&content, &[(key.key_id(), key.sign(&content))])
}

#[test]
fn happy_path_signed_bundle() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let bundle = BundleBuilder::new()
        .root_metadata(root.clone())
        .targets_metadata(signed_targets(&key, 1, &[TargetSpec::for_payload("app", b"data")]))
        .payload("app", b"data")
        .build();

    let mut backend = MemBackend::with_root(root);
    let mut accessor = accessor(bundle, &mut backend, Options::default());
    assert_matches!(accessor.open_and_verify(), Ok(()));

    assert_eq!(accessor.total_payload_size().unwrap(), 4);
    let mut payload = Vec::new();
    accessor.target_payload("app").unwrap().read_to_end(&mut payload).unwrap();
    assert_eq!(payload, b"data");
}

#[test]
fn rollback_root_version_is_rejected() {
    let key = TestKey::from_seed(1);
    let bundle = BundleBuilder::new()
        .root_metadata(signed_root(&key, 4))
        .targets_metadata(signed_targets(&key, 1, &[]))
        .build();

    let mut backend = MemBackend::with_root(signed_root(&key, 5));
    let mut accessor = accessor(bundle, &mut backend, Options::default());
    let err = accessor.open_and_verify().unwrap_err();
    assert_matches!(err, Error::RootRollback { trusted: 5, incoming: 4 });
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_matches!(accessor.manifest(), Err(Error::NotVerified));
    drop(accessor);
    assert_eq!(backend.root_persist_count, 0);
}

#[test]
fn newer_root_version_is_accepted_and_persisted() {
    let key = TestKey::from_seed(1);
    let newer = signed_root(&key, 6);
    let bundle = BundleBuilder::new()
        .root_metadata(newer.clone())
        .targets_metadata(signed_targets(&key, 1, &[]))
        .build();

    let mut backend = MemBackend::with_root(signed_root(&key, 5));
    let mut accessor = accessor(bundle, &mut backend, Options::default());
    assert_matches!(accessor.open_and_verify(), Ok(()));
    drop(accessor);
    assert_eq!(backend.root_persist_count, 1);
    assert_eq!(backend.root, newer);
}

#[test]
fn accepted_root_survives_a_later_targets_failure() {
    let key = TestKey::from_seed(1);
    let newer = signed_root(&key, 6);
    // The root is valid; the targets metadata is unsigned and rejected.
    let bundle = BundleBuilder::new()
        .root_metadata(newer.clone())
        .targets_metadata(encode_signed_metadata(&encode_targets_metadata(1, &[]), &[]))
        .build();

    let mut backend = MemBackend::with_root(signed_root(&key, 5));
    let mut accessor = accessor(bundle, &mut backend, Options::default());
    assert_matches!(accessor.open_and_verify(), Err(Error::NoSignatures));
    drop(accessor);
    // Revocation still propagated.
    assert_eq!(backend.root_persist_count, 1);
    assert_eq!(backend.root, newer);
}

#[test]
fn threshold_not_met_is_rejected() {
    let key_a = TestKey::from_seed(1);
    let key_b = TestKey::from_seed(2);
    let root_content = encode_root_metadata(&RootSpec::with_keys(&[&key_a, &key_b], 1, 2));
    let root = encode_signed_metadata(
        &root_content,
        &[
            (key_a.key_id(), key_a.sign(&root_content)),
            (key_b.key_id(), key_b.sign(&root_content)),
        ],
    );

    // Targets carry only one of the two required signatures.
    let targets_content = encode_targets_metadata(1, &[]);
    let bundle = BundleBuilder::new()
        .targets_metadata(encode_signed_metadata(
            &targets_content,
            &[(key_a.key_id(), key_a.sign(&targets_content))],
        ))
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    let err = accessor.open_and_verify().unwrap_err();
    assert_matches!(err, Error::ThresholdNotMet { threshold: 2, verified: 1 });
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn flipped_signature_byte_is_rejected() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);

    let targets_content = encode_targets_metadata(1, &[TargetSpec::for_payload("app", b"data")]);
    let mut signature = key.sign(&targets_content);
    signature[17] ^= 0x04;
    let bundle = BundleBuilder::new()
        .targets_metadata(encode_signed_metadata(&targets_content, &[(key.key_id(), signature)]))
        .payload("app", b"data")
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    let err = accessor.open_and_verify().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn unknown_key_id_signatures_are_tolerated() {
    let key = TestKey::from_seed(1);
    let stranger = TestKey::from_seed(9);
    let root = signed_root(&key, 1);

    let targets_content = encode_targets_metadata(1, &[]);
    let bundle = BundleBuilder::new()
        .targets_metadata(encode_signed_metadata(
            &targets_content,
            &[
                (stranger.key_id(), stranger.sign(&targets_content)),
                (key.key_id(), key.sign(&targets_content)),
            ],
        ))
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    assert_matches!(accessor.open_and_verify(), Ok(()));
}

#[test]
fn root_rotation_requires_both_signature_sets() {
    let old_key = TestKey::from_seed(1);
    let new_key = TestKey::from_seed(2);
    let device_root = signed_root(&old_key, 1);
    let rotated_content = encode_root_metadata(&RootSpec::single(&new_key, 2));

    // Signed by both the outgoing and incoming key sets: accepted, and the
    // rotated root becomes the persisted anchor.
    let both = encode_signed_metadata(
        &rotated_content,
        &[
            (old_key.key_id(), old_key.sign(&rotated_content)),
            (new_key.key_id(), new_key.sign(&rotated_content)),
        ],
    );
    let bundle = BundleBuilder::new()
        .root_metadata(both.clone())
        .targets_metadata(signed_targets(&new_key, 1, &[]))
        .build();
    let mut backend = MemBackend::with_root(device_root.clone());
    let mut ok = accessor(bundle, &mut backend, Options::default());
    assert_matches!(ok.open_and_verify(), Ok(()));
    drop(ok);
    assert_eq!(backend.root, both);

    // Missing the incoming key's signature: the self check fails.
    let only_old = encode_signed_metadata(
        &rotated_content,
        &[(old_key.key_id(), old_key.sign(&rotated_content))],
    );
    let bundle = BundleBuilder::new()
        .root_metadata(only_old)
        .targets_metadata(signed_targets(&new_key, 1, &[]))
        .build();
    let mut fraud =
        accessor(bundle, MemBackend::with_root(device_root.clone()), Options::default());
    assert_eq!(fraud.open_and_verify().unwrap_err().kind(), ErrorKind::Unauthenticated);

    // Missing the outgoing key's signature: the outer check fails.
    let only_new = encode_signed_metadata(
        &rotated_content,
        &[(new_key.key_id(), new_key.sign(&rotated_content))],
    );
    let bundle = BundleBuilder::new()
        .root_metadata(only_new)
        .targets_metadata(signed_targets(&new_key, 1, &[]))
        .build();
    let mut unsanctioned =
        accessor(bundle, MemBackend::with_root(device_root), Options::default());
    assert_eq!(unsanctioned.open_and_verify().unwrap_err().kind(), ErrorKind::Unauthenticated);
}

#[test]
fn unsigned_bundle_passes_self_verification_only() {
    let unsigned_targets = encode_signed_metadata(
        &encode_targets_metadata(1, &[TargetSpec::for_payload("app", b"data")]),
        &[],
    );
    let bundle =
        BundleBuilder::new().targets_metadata(unsigned_targets).payload("app", b"data").build();

    let options = Options { disable_verification: true, ..Default::default() };
    let mut accessor = accessor(bundle.clone(), MemBackend::with_root(Vec::new()), options);
    assert_matches!(accessor.open_and_verify(), Ok(()));
    assert_eq!(accessor.total_payload_size().unwrap(), 4);

    // The same bundle fails closed without the development flag.
    let key = TestKey::from_seed(1);
    let mut strict = UpdateBundleAccessor::new(
        Cursor::new(bundle),
        MemBackend::with_root(signed_root(&key, 1)),
        Options::default(),
    );
    assert_matches!(strict.open_and_verify(), Err(Error::NoSignatures));
}

#[test]
fn self_verification_still_measures_payloads() {
    let unsigned_targets = encode_signed_metadata(
        &encode_targets_metadata(1, &[TargetSpec::for_payload("app", b"data")]),
        &[],
    );
    let bundle =
        BundleBuilder::new().targets_metadata(unsigned_targets).payload("app", b"daXa").build();

    let options = Options { disable_verification: true, ..Default::default() };
    let mut accessor = accessor(bundle, MemBackend::with_root(Vec::new()), options);
    assert_matches!(accessor.open_and_verify(), Err(Error::PayloadHashMismatch { .. }));
}

#[test]
fn personalized_out_target_defers_to_the_device_manifest() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let cfg = TargetSpec::for_payload("cfg", &[0xc5; 16]);
    let bundle =
        BundleBuilder::new().targets_metadata(signed_targets(&key, 2, &[cfg.clone()])).build();

    // The device manifest is whatever persisting an earlier bundle carrying
    // "cfg" left behind.
    let mut backend = MemBackend::with_root(root.clone());
    {
        let earlier = BundleBuilder::new()
            .targets_metadata(signed_targets(&key, 1, &[cfg]))
            .payload("cfg", &[0xc5; 16])
            .build();
        let mut first =
            UpdateBundleAccessor::new(Cursor::new(earlier), &mut backend, Options::default());
        first.open_and_verify().unwrap();
        first.persist_manifest().unwrap();
    }
    assert_matches!(backend.manifest, Some(_));

    let with_personalization = Options { personalization: true, ..Default::default() };
    let mut ok = accessor(bundle.clone(), &mut backend, with_personalization);
    assert_matches!(ok.open_and_verify(), Ok(()));
    // A personalized-out payload contributes nothing to the bundle size.
    assert_eq!(ok.total_payload_size().unwrap(), 0);
    drop(ok);

    let mut strict = accessor(bundle, &mut backend, Options::default());
    let err = strict.open_and_verify().unwrap_err();
    assert_matches!(err, Error::PayloadMissing { .. });
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn corrupt_payload_hash_closes_the_accessor() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let bundle = BundleBuilder::new()
        .targets_metadata(signed_targets(&key, 1, &[TargetSpec::for_payload("app", b"data")]))
        .payload("app", b"dole")
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    let err = accessor.open_and_verify().unwrap_err();
    assert_matches!(err, Error::PayloadHashMismatch { .. });
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_matches!(accessor.manifest(), Err(Error::NotVerified));
    assert_matches!(accessor.total_payload_size(), Err(Error::NotVerified));
}

#[test]
fn accessors_gate_on_the_verified_state() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let bundle = BundleBuilder::new()
        .targets_metadata(signed_targets(&key, 1, &[TargetSpec::for_payload("app", b"data")]))
        .payload("app", b"data")
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    assert_matches!(accessor.manifest(), Err(Error::NotVerified));
    assert_matches!(accessor.target_payload("app"), Err(Error::NotVerified));
    assert_matches!(accessor.persist_manifest(), Err(Error::NotVerified));

    accessor.open_and_verify().unwrap();
    assert_matches!(accessor.manifest(), Ok(_));

    accessor.close().unwrap();
    assert_matches!(accessor.manifest(), Err(Error::NotVerified));
    assert_matches!(accessor.target_payload("app"), Err(Error::NotVerified));
}

#[test]
fn persisted_manifest_round_trips() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let bundle = BundleBuilder::new()
        .targets_metadata(signed_targets(&key, 3, &[TargetSpec::for_payload("app", b"data")]))
        .payload("app", b"data")
        .build();

    let mut backend = MemBackend::with_root(root);
    let mut accessor = accessor(bundle, &mut backend, Options::default());
    accessor.open_and_verify().unwrap();
    accessor.persist_manifest().unwrap();
    drop(accessor);

    let persisted = backend.manifest.clone().unwrap();
    let mut reloaded_source = Cursor::new(persisted.as_slice());
    let reloaded = Manifest::from_persisted(&mut reloaded_source).unwrap();
    assert_eq!(reloaded.version(&mut reloaded_source).unwrap(), 3);
    assert!(reloaded.target_file(&mut reloaded_source, "app").unwrap().is_some());

    // Exporting the reloaded manifest reproduces the persisted bytes.
    let mut re_exported = Vec::new();
    reloaded.export(&mut reloaded_source, &mut re_exported).unwrap();
    assert_eq!(re_exported, persisted);
}

#[test]
fn missing_target_payload_read_fails_cleanly() {
    let key = TestKey::from_seed(1);
    let root = signed_root(&key, 1);
    let bundle = BundleBuilder::new()
        .targets_metadata(signed_targets(&key, 1, &[TargetSpec::for_payload("app", b"data")]))
        .payload("app", b"data")
        .build();

    let mut accessor = accessor(bundle, MemBackend::with_root(root), Options::default());
    accessor.open_and_verify().unwrap();
    assert_matches!(accessor.target_payload("ghost"), Err(Error::Missing(_)));
}
