// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! CMS sign/verify and envelope/open round trips through the software token.

mod common;

use std::time::Duration;

use common::{recipient, self_signed, Hierarchy, Profile, RECIPIENT_KEY_ID};
use token_pki::message::{CmsMessage, ID_DATA};
use token_pki::{
    AlgorithmId, BuilderState, CertificateStack, CmsEngine, CmsError, PkiConfig, PkiError,
    PolicyClass, TokenError,
};

fn engine() -> CmsEngine {
    CmsEngine::new(PkiConfig::default()).unwrap()
}

fn sign(h: &Hierarchy, engine: &CmsEngine, content: &[u8]) -> CmsMessage {
    engine
        .create_signed_message(content, h.chain(), Some(AlgorithmId::SHA256), &h.token, &h.key)
        .unwrap()
}

#[test]
fn test_sign_and_verify() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"hello token");

    let verified = engine
        .verify_signed_message(&message, &h.anchors(), h.now())
        .unwrap();
    assert_eq!(verified.content, b"hello token");
    assert_eq!(verified.chain.len(), 3);
    assert_eq!(verified.signer(), Some(&h.leaf.cert));
    assert_eq!(verified.digest.id(), AlgorithmId::SHA256);
    assert!(verified.signing_time.is_some());
    assert_eq!(verified.policy_class(), Some(PolicyClass::Kc1));
}

#[test]
fn test_signed_message_structure() {
    let h = Hierarchy::new();
    let message = sign(&h, &engine(), b"structure");
    let signed = message.as_signed().unwrap();

    assert!(!signed.is_detached());
    assert_eq!(signed.content_type(), ID_DATA);
    assert_eq!(signed.content().unwrap().unwrap(), b"structure");
    assert_eq!(signed.certificates().unwrap().len(), 3);
    assert_eq!(signed.signer_infos().count(), 1);
    assert_eq!(signed.digest_algorithm().unwrap().id(), AlgorithmId::SHA256);
}

#[test]
fn test_encode_decode_round_trip() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"round trip");

    let der = engine.encode(&message).unwrap();
    let decoded = engine.decode(&der).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(engine.encode(&decoded).unwrap(), der);

    let original = message.as_signed().unwrap();
    let copy = decoded.as_signed().unwrap();
    assert_eq!(copy.certificates().unwrap(), original.certificates().unwrap());
    assert_eq!(copy.content().unwrap(), original.content().unwrap());
    assert_eq!(copy.signature(), original.signature());

    engine
        .verify_signed_message(&decoded, &h.anchors(), h.now())
        .unwrap();
}

#[test]
fn test_pem_round_trip() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"pem");

    let pem = engine.to_pem(&message).unwrap();
    assert!(pem.starts_with("-----BEGIN CMS-----\n"));
    assert!(pem.trim_end().ends_with("-----END CMS-----"));
    assert!(pem.lines().all(|line| line.len() <= 64));

    assert_eq!(engine.from_pem(&pem).unwrap(), message);

    let legacy = pem.replace("CMS-----", "PKCS7-----");
    assert_eq!(engine.from_pem(&legacy).unwrap(), message);
}

#[test]
fn test_validity_window_edges() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"window");

    let not_before = h.leaf.cert.not_before();
    let not_after = h.leaf.cert.not_after();
    let middle = not_before + (not_after.duration_since(not_before).unwrap() / 2);
    for time in [not_before, middle, not_after] {
        engine
            .verify_signed_message(&message, &h.anchors(), time)
            .unwrap();
    }

    let err = engine
        .verify_signed_message(&message, &h.anchors(), not_after + Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(
        err,
        PkiError::Cms(CmsError::ExpiredAtVerificationTime)
    ));

    let err = engine
        .verify_signed_message(&message, &h.anchors(), not_before - Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(
        err,
        PkiError::Cms(CmsError::ExpiredAtVerificationTime)
    ));
}

#[test]
fn test_untrusted_chain() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"untrusted");

    let stranger = self_signed(Profile::ca("Stranger Root"));
    let err = engine
        .verify_signed_message(&message, &[stranger.cert], h.now())
        .unwrap_err();
    assert!(matches!(err, PkiError::Cms(CmsError::UntrustedChain(_))));
}

#[test]
fn test_tampered_content_is_signature_mismatch() {
    let h = Hierarchy::new();
    let engine = engine();
    let message = sign(&h, &engine, b"original content");

    let mut der = engine.encode(&message).unwrap();
    let pos = der
        .windows(b"original".len())
        .position(|w| w == b"original")
        .unwrap();
    der[pos] = b'O';
    let tampered = engine.decode(&der).unwrap();

    // Untrusted anchors too: the signature failure is reported first.
    let stranger = self_signed(Profile::ca("Stranger Root"));
    let err = engine
        .verify_signed_message(&tampered, &[stranger.cert], h.now())
        .unwrap_err();
    assert!(matches!(err, PkiError::Cms(CmsError::SignatureMismatch(_))));
}

#[test]
fn test_detached_signature() {
    let h = Hierarchy::new();
    let config = PkiConfig::builder().detached(true).build().unwrap();
    let engine = CmsEngine::new(config).unwrap();
    let message = sign(&h, &engine, b"detached payload");

    assert!(message.as_signed().unwrap().is_detached());
    assert!(engine
        .verify_signed_message(&message, &h.anchors(), h.now())
        .is_err());

    let verified = engine
        .verify_detached(&message, b"detached payload", &h.anchors(), h.now())
        .unwrap();
    assert_eq!(verified.content, b"detached payload");

    let err = engine
        .verify_detached(&message, b"other payload", &h.anchors(), h.now())
        .unwrap_err();
    assert!(matches!(err, PkiError::Cms(CmsError::SignatureMismatch(_))));
}

#[test]
fn test_sha512_without_signing_time() {
    let h = Hierarchy::new();
    let config = PkiConfig::builder().signing_time(false).build().unwrap();
    let engine = CmsEngine::new(config).unwrap();
    let message = engine
        .create_signed_message(b"sha512", h.chain(), Some(AlgorithmId::SHA512), &h.token, &h.key)
        .unwrap();

    let verified = engine
        .verify_signed_message(&message, &h.anchors(), h.now())
        .unwrap();
    assert_eq!(verified.digest.id(), AlgorithmId::SHA512);
    assert!(verified.signing_time.is_none());
}

#[test]
fn test_configured_default_digest() {
    let h = Hierarchy::new();
    let config = PkiConfig::builder()
        .default_digest(AlgorithmId::SHA384)
        .build()
        .unwrap();
    let engine = CmsEngine::new(config).unwrap();
    let message = engine
        .create_signed_message(b"defaults", h.chain(), None, &h.token, &h.key)
        .unwrap();

    let verified = engine
        .verify_signed_message(&message, &h.anchors(), h.now())
        .unwrap();
    assert_eq!(verified.digest.id(), AlgorithmId::SHA384);
}

#[test]
fn test_configured_default_cipher() {
    let h = Hierarchy::new();
    let config = PkiConfig::builder()
        .default_cipher(AlgorithmId::AES128_CBC)
        .build()
        .unwrap();
    let engine = CmsEngine::new(config).unwrap();
    let (alice, alice_key) = recipient("Alice", &h.token, RECIPIENT_KEY_ID);

    let recipients = CertificateStack::from_certificates(vec![alice.cert.clone()]).unwrap();
    let message = engine
        .create_enveloped_message(b"default cipher", recipients, None)
        .unwrap();
    let enveloped = message.as_enveloped().unwrap();
    assert_eq!(
        enveloped.content_encryption_algorithm().unwrap().id(),
        AlgorithmId::AES128_CBC
    );

    let plaintext = engine
        .open_enveloped_message(&message, &alice.cert, &h.token, &alice_key)
        .unwrap();
    assert_eq!(plaintext, b"default cipher");
}

#[test]
fn test_rejected_digest() {
    let h = Hierarchy::new();
    let err = engine()
        .create_signed_message(b"x", h.chain(), Some(AlgorithmId::SHA1), &h.token, &h.key)
        .unwrap_err();
    assert!(matches!(err, PkiError::UnsupportedAlgorithm(_)));
    assert_eq!(h.token.operation_count(), 0);
}

#[test]
fn test_device_removed_during_sign() {
    let h = Hierarchy::new();
    let engine = engine();

    let mut builder = engine.builder();
    builder.set_content(b"payload".to_vec()).unwrap();
    builder
        .attach_signer(h.chain(), h.key.clone(), AlgorithmId::SHA256)
        .unwrap();

    h.token.simulate_removal();
    let err = builder.sign(&h.token).unwrap_err();
    assert_eq!(err.token_error(), Some(&TokenError::DeviceRemoved));
    assert_eq!(builder.state(), BuilderState::SignersAttached);
    assert!(builder.message().is_none());

    h.token.reinsert();
    builder.sign(&h.token).unwrap();
    assert_eq!(builder.state(), BuilderState::Signed);

    let message = builder.into_message().unwrap();
    engine
        .verify_signed_message(&message, &h.anchors(), h.now())
        .unwrap();
}

#[test]
fn test_sign_on_empty_builder() {
    let h = Hierarchy::new();
    let mut builder = engine().builder();
    let err = builder.sign(&h.token).unwrap_err();
    assert!(matches!(
        err,
        PkiError::Cms(CmsError::InvalidState { actual: "Empty", .. })
    ));
    assert_eq!(builder.state(), BuilderState::Empty);
}

#[test]
fn test_envelope_and_open() {
    let h = Hierarchy::new();
    let engine = engine();
    let (alice, alice_key) = recipient("Alice", &h.token, RECIPIENT_KEY_ID);

    for cipher in [
        AlgorithmId::AES128_CBC,
        AlgorithmId::AES192_CBC,
        AlgorithmId::AES256_CBC,
    ] {
        let recipients = CertificateStack::from_certificates(vec![alice.cert.clone()]).unwrap();
        let message = engine
            .create_enveloped_message(b"secret payload", recipients, Some(cipher))
            .unwrap();

        let enveloped = message.as_enveloped().unwrap();
        assert_eq!(enveloped.recipient_count(), 1);
        assert_eq!(enveloped.content_encryption_algorithm().unwrap().id(), cipher);

        let decoded = engine.decode(&engine.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);

        let plaintext = engine
            .open_enveloped_message(&decoded, &alice.cert, &h.token, &alice_key)
            .unwrap();
        assert_eq!(plaintext, b"secret payload");
    }
}

#[test]
fn test_envelope_for_several_recipients() {
    let h = Hierarchy::new();
    let engine = engine();
    let (alice, alice_key) = recipient("Alice", &h.token, b"alice");
    let (bob, bob_key) = recipient("Bob", &h.token, b"bob");

    let recipients =
        CertificateStack::from_certificates(vec![alice.cert.clone(), bob.cert.clone()]).unwrap();
    let message = engine
        .create_enveloped_message(b"for both", recipients, Some(AlgorithmId::AES256_CBC))
        .unwrap();
    assert_eq!(message.as_enveloped().unwrap().recipient_count(), 2);

    for (cert, key) in [(&alice.cert, &alice_key), (&bob.cert, &bob_key)] {
        let plaintext = engine
            .open_enveloped_message(&message, cert, &h.token, key)
            .unwrap();
        assert_eq!(plaintext, b"for both");
    }
}

#[test]
fn test_open_without_matching_recipient() {
    let h = Hierarchy::new();
    let engine = engine();
    let (alice, _) = recipient("Alice", &h.token, b"alice");
    let (mallory, mallory_key) = recipient("Mallory", &h.token, b"mallory");

    let recipients = CertificateStack::from_certificates(vec![alice.cert.clone()]).unwrap();
    let message = engine
        .create_enveloped_message(b"not for mallory", recipients, Some(AlgorithmId::AES256_CBC))
        .unwrap();

    let err = engine
        .open_enveloped_message(&message, &mallory.cert, &h.token, &mallory_key)
        .unwrap_err();
    assert!(matches!(err, PkiError::Cms(CmsError::NoMatchingRecipient)));
}

#[test]
fn test_envelope_rejects_ec_recipient() {
    let h = Hierarchy::new();
    let recipients = CertificateStack::from_certificates(vec![h.leaf.cert.clone()]).unwrap();
    let err = engine()
        .create_enveloped_message(b"x", recipients, Some(AlgorithmId::AES256_CBC))
        .unwrap_err();
    assert!(matches!(
        err,
        PkiError::Cms(CmsError::UnsupportedRecipientKey(_))
    ));
}

#[test]
fn test_open_with_logged_out_token() {
    let h = Hierarchy::new();
    let engine = engine();
    let (alice, alice_key) = recipient("Alice", &h.token, RECIPIENT_KEY_ID);
    let recipients = CertificateStack::from_certificates(vec![alice.cert.clone()]).unwrap();
    let message = engine
        .create_enveloped_message(b"locked", recipients, Some(AlgorithmId::AES128_CBC))
        .unwrap();

    h.token.logout();
    let err = engine
        .open_enveloped_message(&message, &alice.cert, &h.token, &alice_key)
        .unwrap_err();
    assert_eq!(err.token_error(), Some(&TokenError::NotLoggedIn));
}

#[test]
fn test_rsa_signer() {
    let token = token_pki::SoftwareToken::new();
    let (signer, key) = recipient("RSA Signer", &token, b"rsa");
    let engine = engine();

    let chain = CertificateStack::from_certificates(vec![signer.cert.clone()]).unwrap();
    let message = engine
        .create_signed_message(b"rsa signed", chain, Some(AlgorithmId::SHA384), &token, &key)
        .unwrap();

    let verified = engine
        .verify_signed_message(
            &message,
            &[signer.cert.clone()],
            signer.cert.not_before() + Duration::from_secs(60),
        )
        .unwrap();
    assert_eq!(verified.content, b"rsa signed");
    assert_eq!(verified.policy_class(), Some(PolicyClass::Kc2));
}

#[test]
fn test_decode_rejects_garbage() {
    let err = engine().decode(b"definitely not DER").unwrap_err();
    assert!(matches!(err, PkiError::Parse(_)));
}
