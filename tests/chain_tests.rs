// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Chain assembly, validation and extension processing against real
//! rcgen-issued hierarchies.

mod common;

use std::time::{Duration, SystemTime};

use common::{issued, self_signed, Hierarchy, Profile};
use token_pki::extensions::policies::highest_policy_class;
use token_pki::extensions::{
    append_extension, extensions_of, extract_policies, find_extension, Extension,
    BASIC_CONSTRAINTS_OID,
};
use token_pki::{
    Certificate, CertificateStack, ChainAssembler, ChainBuildError, PkiConfig, PkiError,
    PolicyClass, StackError, ValidationError,
};

fn subjects(chain: &CertificateStack) -> Vec<String> {
    chain.iter().map(|c| c.subject_string()).collect()
}

#[test]
fn test_leaf_intermediate_root_order() {
    let h = Hierarchy::new();
    let assembler = ChainAssembler::new();

    let chain = assembler
        .build_chain_at(
            &h.leaf.cert,
            &[h.intermediate.cert.clone(), h.root.cert.clone()],
            &h.anchors(),
            h.now(),
        )
        .unwrap();

    let got: Vec<&Certificate> = chain.iter().collect();
    assert_eq!(
        got,
        vec![&h.leaf.cert, &h.intermediate.cert, &h.root.cert]
    );
    assembler.validate_chain(&chain, h.now()).unwrap();
}

#[test]
fn test_tampered_signature_fails_validation() {
    let h = Hierarchy::new();

    let mut der = h.leaf.cert.der().to_vec();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let tampered = Certificate::from_der(&der).unwrap();

    let chain = CertificateStack::from_certificates(vec![
        tampered,
        h.intermediate.cert.clone(),
        h.root.cert.clone(),
    ])
    .unwrap();

    let err = ChainAssembler::new()
        .validate_chain(&chain, h.now())
        .unwrap_err();
    assert_eq!(err, ValidationError::SignatureInvalid { position: 0 });
}

#[test]
fn test_build_is_deterministic() {
    let h = Hierarchy::new();
    let decoy = self_signed(Profile::ca("Unrelated Root"));
    let assembler = ChainAssembler::new();

    let pool_a = vec![
        h.root.cert.clone(),
        decoy.cert.clone(),
        h.intermediate.cert.clone(),
    ];
    let pool_b: Vec<Certificate> = pool_a.iter().rev().cloned().collect();

    let first = assembler
        .build_chain_at(&h.leaf.cert, &pool_a, &h.anchors(), h.now())
        .unwrap();
    for pool in [&pool_a, &pool_b] {
        let again = assembler
            .build_chain_at(&h.leaf.cert, pool, &h.anchors(), h.now())
            .unwrap();
        assert_eq!(subjects(&again), subjects(&first));
        assert_eq!(again.into_items(), first.iter().cloned().collect::<Vec<_>>());
    }
}

#[test]
fn test_latest_not_before_wins() {
    let root = self_signed(Profile::ca("Root"));
    let old = issued(
        Profile::ca("Issuing CA").valid((2020, 1, 1), (2040, 1, 1)),
        &root,
    );
    let new = issued(
        Profile::ca("Issuing CA").valid((2023, 1, 1), (2040, 1, 1)),
        &root,
    );
    let leaf = issued(Profile::leaf("Leaf"), &new);

    let now = SystemTime::now();
    for pool in [
        vec![old.cert.clone(), new.cert.clone()],
        vec![new.cert.clone(), old.cert.clone()],
    ] {
        let chain = ChainAssembler::new()
            .build_chain_at(&leaf.cert, &pool, &[root.cert.clone()], now)
            .unwrap();
        assert_eq!(chain.at(1).unwrap(), &new.cert);
    }
}

#[test]
fn test_valid_candidate_beats_newer_expired_one() {
    let root = self_signed(Profile::ca("Root"));
    let current = issued(
        Profile::ca("Issuing CA").valid((2020, 1, 1), (2040, 1, 1)),
        &root,
    );
    let expired = issued(
        Profile::ca("Issuing CA").valid((2021, 1, 1), (2022, 1, 1)),
        &root,
    );
    let leaf = issued(Profile::leaf("Leaf"), &current);

    let pool = [expired.cert.clone(), current.cert.clone()];
    let chain = ChainAssembler::new()
        .build_chain(&leaf.cert, &pool, &[root.cert.clone()])
        .unwrap();
    assert_eq!(chain.at(1).unwrap(), &current.cert);

    let err = ChainAssembler::new()
        .build_chain(&leaf.cert, &[expired.cert.clone()], &[root.cert.clone()])
        .unwrap_err();
    assert!(matches!(err, ChainBuildError::ValidityExpired { .. }));
}

#[test]
fn test_missing_anchor_is_incomplete() {
    let h = Hierarchy::new();
    let assembler = ChainAssembler::new();

    let err = assembler
        .build_chain_at(&h.leaf.cert, &[h.intermediate.cert.clone()], &[], h.now())
        .unwrap_err();
    assert!(matches!(err, ChainBuildError::Incomplete { .. }));

    // Root present but not trusted.
    let other = self_signed(Profile::ca("Other Root"));
    let err = assembler
        .build_chain_at(
            &h.leaf.cert,
            &[h.intermediate.cert.clone(), h.root.cert.clone()],
            &[other.cert],
            h.now(),
        )
        .unwrap_err();
    assert!(matches!(err, ChainBuildError::Incomplete { .. }));
}

#[test]
fn test_cross_signed_loop_is_cycle() {
    let a = self_signed(Profile::ca("CA A"));
    let b = self_signed(Profile::ca("CA B"));
    let a_by_b = issued(Profile::ca("CA A"), &b);
    let b_by_a = issued(Profile::ca("CA B"), &a);
    let leaf = issued(Profile::leaf("Leaf"), &a);
    let anchor = self_signed(Profile::ca("Somewhere Else"));

    let err = ChainAssembler::new()
        .build_chain(
            &leaf.cert,
            &[a_by_b.cert.clone(), b_by_a.cert.clone()],
            &[anchor.cert],
        )
        .unwrap_err();
    assert!(matches!(err, ChainBuildError::Cycle { .. }));
}

#[test]
fn test_subject_loop_stops_before_length_limit() {
    let a = self_signed(Profile::ca("CA A"));
    let b = self_signed(Profile::ca("CA B"));
    // Two distinct cross-certificates in each direction
    let pool: Vec<_> = [
        issued(Profile::ca("CA A"), &b),
        issued(Profile::ca("CA A"), &b),
        issued(Profile::ca("CA B"), &a),
        issued(Profile::ca("CA B"), &a),
    ]
    .into_iter()
    .map(|id| id.cert)
    .collect();
    let leaf = issued(Profile::leaf("Leaf"), &a);
    let anchor = self_signed(Profile::ca("Somewhere Else"));

    let config = PkiConfig::builder().max_chain_length(4).build().unwrap();
    let err = ChainAssembler::with_config(config.chain)
        .build_chain(&leaf.cert, &pool, &[anchor.cert])
        .unwrap_err();
    assert_eq!(
        err,
        ChainBuildError::Cycle {
            subject: a.cert.subject_string()
        }
    );
}

#[test]
fn test_max_chain_length() {
    let h = Hierarchy::new();
    let config = PkiConfig::builder().max_chain_length(2).build().unwrap();
    let err = ChainAssembler::with_config(config.chain)
        .build_chain_at(
            &h.leaf.cert,
            &[h.intermediate.cert.clone()],
            &h.anchors(),
            h.now(),
        )
        .unwrap_err();
    assert_eq!(err, ChainBuildError::PathTooLong { max: 2 });
}

#[test]
fn test_validation_time_window() {
    let h = Hierarchy::new();
    let assembler = ChainAssembler::new();
    let chain = h.chain();

    let before = h.leaf.cert.not_before() - Duration::from_secs(1);
    let after = h.leaf.cert.not_after() + Duration::from_secs(1);
    assert_eq!(
        assembler.validate_chain(&chain, before).unwrap_err(),
        ValidationError::NotYetValid { position: 0 }
    );
    assert_eq!(
        assembler.validate_chain(&chain, after).unwrap_err(),
        ValidationError::Expired { position: 0 }
    );
    assembler
        .validate_chain(&chain, h.leaf.cert.not_after())
        .unwrap();
}

#[test]
fn test_path_length_constraint() {
    let root = self_signed(Profile::ca("Root"));
    let policy_ca = issued(Profile::ca("Policy CA").path_len(0), &root);
    let issuing = issued(Profile::ca("Issuing CA"), &policy_ca);
    let leaf = issued(Profile::leaf("Leaf"), &issuing);

    let assembler = ChainAssembler::new();
    let chain = assembler
        .build_chain(
            &leaf.cert,
            &[issuing.cert.clone(), policy_ca.cert.clone()],
            &[root.cert.clone()],
        )
        .unwrap();
    assert_eq!(chain.len(), 4);

    let err = assembler
        .validate_chain(&chain, SystemTime::now())
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::PathLengthExceeded {
            position: 2,
            limit: 0
        }
    );
}

#[test]
fn test_end_entity_cannot_issue() {
    let root = self_signed(Profile::ca("Root"));
    let not_ca = issued(Profile::leaf("Not A CA"), &root);
    let leaf = issued(Profile::leaf("Leaf"), &not_ca);

    let chain = CertificateStack::from_certificates(vec![
        leaf.cert.clone(),
        not_ca.cert.clone(),
        root.cert.clone(),
    ])
    .unwrap();
    let err = ChainAssembler::new()
        .validate_chain(&chain, SystemTime::now())
        .unwrap_err();
    assert_eq!(err, ValidationError::NotCa { position: 1 });
}

#[test]
fn test_malformed_key_usage_rejected() {
    let root = self_signed(Profile::ca("Root"));
    // OCTET STRING where keyUsage requires a BIT STRING
    let mut profile =
        Profile::ca("Broken CA").raw_extension(&[2, 5, 29, 15], vec![0x04, 0x01, 0xff], true);
    profile.key_usages.clear();
    let broken = issued(profile, &root);
    let leaf = issued(Profile::leaf("Leaf"), &broken);

    let chain = CertificateStack::from_certificates(vec![
        leaf.cert.clone(),
        broken.cert.clone(),
        root.cert.clone(),
    ])
    .unwrap();
    let err = ChainAssembler::new()
        .validate_chain(&chain, SystemTime::now())
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::MalformedExtension {
            position: 1,
            extension: "keyUsage"
        }
    );
}

#[test]
fn test_duplicate_certificate_rejected() {
    let h = Hierarchy::new();
    let mut stack = h.chain();
    let err = stack.push(h.intermediate.cert.clone()).unwrap_err();
    assert!(matches!(err, StackError::DuplicateCertificate { .. }));
    assert_eq!(stack.len(), 3);
}

#[test]
fn test_pem_bundle_chain() {
    let h = Hierarchy::new();
    let bundle = format!(
        "{}{}",
        h.intermediate.cert.to_pem().unwrap(),
        h.root.cert.to_pem().unwrap()
    );
    let pool = Certificate::from_pem_chain(&bundle).unwrap();
    assert_eq!(pool.len(), 2);

    let chain = ChainAssembler::new()
        .build_chain_at(&h.leaf.cert, &pool, &h.anchors(), h.now())
        .unwrap();
    assert_eq!(chain.len(), 3);
}

#[test]
fn test_duplicate_basic_constraints_extension() {
    let h = Hierarchy::new();
    let mut stack = extensions_of(&h.intermediate.cert);
    let existing = find_extension(&stack, &BASIC_CONSTRAINTS_OID).unwrap().clone();

    let mut single = token_pki::ExtensionStack::new();
    single.push(existing.clone()).unwrap();
    let err = append_extension(&mut single, existing.clone(), false).unwrap_err();
    assert!(matches!(err, PkiError::DuplicateExtension { ref oid } if oid == "2.5.29.19"));
    assert_eq!(single.len(), 1);

    let before = stack.len();
    append_extension(
        &mut stack,
        Extension::new(BASIC_CONSTRAINTS_OID, true, existing.value().to_vec()),
        true,
    )
    .unwrap();
    assert_eq!(stack.len(), before + 1);
}

#[test]
fn test_policies_from_issued_certificate() {
    let h = Hierarchy::new();

    let policies = extract_policies(&h.leaf.cert).unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies.at(0).unwrap().class(), Some(PolicyClass::Kc1));
    assert_eq!(
        highest_policy_class(&h.leaf.cert).unwrap(),
        Some(PolicyClass::Kc1)
    );

    assert!(extract_policies(&h.root.cert).unwrap().is_empty());
    assert_eq!(highest_policy_class(&h.root.cert).unwrap(), None);
}
