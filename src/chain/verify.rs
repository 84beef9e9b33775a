// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Signature verification for certificates and CMS signer infos.
//!
//! Supports ECDSA over P-256 and P-384 and RSA PKCS#1 v1.5. The signature
//! is always checked against a precomputed digest, so the same code serves
//! certificate signatures and CMS signed attributes.

use crate::certificate::Certificate;
use crate::registry::{self, AlgorithmDescriptor, AlgorithmId};
use der::asn1::{Any, ObjectIdentifier};
use der::Encode;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

// Public key algorithms
pub(crate) const OID_EC_PUBLIC_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
pub(crate) const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

// Signature algorithms
const OID_ECDSA_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.1");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const OID_SHA256_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_SHA384_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const OID_SHA512_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const OID_SHA224_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.14");

/// Public key types this crate can verify with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// ECDSA on NIST P-256.
    EcP256,
    /// ECDSA on NIST P-384.
    EcP384,
    /// RSA.
    Rsa,
}

/// Why a signature check did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// Key or signature algorithm is not supported.
    Unsupported(String),
    /// Signature does not match.
    BadSignature,
}

/// Determine the key type of a subject public key.
pub fn key_kind(spki: &SubjectPublicKeyInfoOwned) -> Result<KeyKind, VerifyFailure> {
    let alg = &spki.algorithm;
    if alg.oid == OID_RSA_ENCRYPTION {
        return Ok(KeyKind::Rsa);
    }
    if alg.oid != OID_EC_PUBLIC_KEY {
        return Err(VerifyFailure::Unsupported(format!(
            "public key algorithm {}",
            alg.oid
        )));
    }

    let curve = alg
        .parameters
        .as_ref()
        .and_then(|p| p.decode_as::<ObjectIdentifier>().ok())
        .ok_or_else(|| VerifyFailure::Unsupported("EC key without named curve".into()))?;

    match curve {
        c if c == OID_SECP256R1 => Ok(KeyKind::EcP256),
        c if c == OID_SECP384R1 => Ok(KeyKind::EcP384),
        c => Err(VerifyFailure::Unsupported(format!("curve {}", c))),
    }
}

/// Digest used by a certificate signature algorithm.
pub fn signature_digest(sig_alg: &ObjectIdentifier) -> Option<AlgorithmId> {
    match *sig_alg {
        o if o == OID_ECDSA_SHA224 || o == OID_SHA224_RSA => Some(AlgorithmId::SHA224),
        o if o == OID_ECDSA_SHA256 || o == OID_SHA256_RSA => Some(AlgorithmId::SHA256),
        o if o == OID_ECDSA_SHA384 || o == OID_SHA384_RSA => Some(AlgorithmId::SHA384),
        o if o == OID_ECDSA_SHA512 || o == OID_SHA512_RSA => Some(AlgorithmId::SHA512),
        _ => None,
    }
}

/// Signature algorithm identifier for a key type and digest, as written into
/// a CMS signer info.
pub fn signature_algorithm(
    kind: KeyKind,
    digest: &AlgorithmDescriptor,
) -> Result<AlgorithmIdentifierOwned, VerifyFailure> {
    let (oid, parameters) = match (kind, digest.id()) {
        (KeyKind::EcP256 | KeyKind::EcP384, AlgorithmId::SHA224) => (OID_ECDSA_SHA224, None),
        (KeyKind::EcP256 | KeyKind::EcP384, AlgorithmId::SHA256) => (OID_ECDSA_SHA256, None),
        (KeyKind::EcP256 | KeyKind::EcP384, AlgorithmId::SHA384) => (OID_ECDSA_SHA384, None),
        (KeyKind::EcP256 | KeyKind::EcP384, AlgorithmId::SHA512) => (OID_ECDSA_SHA512, None),
        (KeyKind::Rsa, AlgorithmId::SHA224) => (OID_SHA224_RSA, Some(Any::null())),
        (KeyKind::Rsa, AlgorithmId::SHA256) => (OID_SHA256_RSA, Some(Any::null())),
        (KeyKind::Rsa, AlgorithmId::SHA384) => (OID_SHA384_RSA, Some(Any::null())),
        (KeyKind::Rsa, AlgorithmId::SHA512) => (OID_SHA512_RSA, Some(Any::null())),
        (_, id) => {
            return Err(VerifyFailure::Unsupported(format!(
                "no signature algorithm for digest {}",
                id
            )))
        }
    };
    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

/// Verify `signature` over an already computed `hashed` digest.
///
/// ECDSA signatures are expected in DER form; RSA signatures are raw
/// PKCS#1 v1.5 blocks.
pub fn verify_prehash(
    spki: &SubjectPublicKeyInfoOwned,
    digest: &AlgorithmDescriptor,
    hashed: &[u8],
    signature: &[u8],
) -> Result<(), VerifyFailure> {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;

    let point = spki.subject_public_key.raw_bytes();
    match key_kind(spki)? {
        KeyKind::EcP256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map_err(|_| VerifyFailure::Unsupported("invalid P-256 point".into()))?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| VerifyFailure::BadSignature)?;
            key.verify_prehash(hashed, &sig)
                .map_err(|_| VerifyFailure::BadSignature)
        }
        KeyKind::EcP384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map_err(|_| VerifyFailure::Unsupported("invalid P-384 point".into()))?;
            let sig = p384::ecdsa::Signature::from_der(signature)
                .map_err(|_| VerifyFailure::BadSignature)?;
            key.verify_prehash(hashed, &sig)
                .map_err(|_| VerifyFailure::BadSignature)
        }
        KeyKind::Rsa => {
            use rsa::pkcs8::DecodePublicKey;

            let der = spki
                .to_der()
                .map_err(|e| VerifyFailure::Unsupported(e.to_string()))?;
            let key = rsa::RsaPublicKey::from_public_key_der(&der)
                .map_err(|_| VerifyFailure::Unsupported("invalid RSA public key".into()))?;
            let scheme = digest
                .pkcs1v15_scheme()
                .map_err(|e| VerifyFailure::Unsupported(e.to_string()))?;
            key.verify(scheme, hashed, signature)
                .map_err(|_| VerifyFailure::BadSignature)
        }
    }
}

/// Verify that `cert` was signed by the holder of `issuer_key`.
pub fn verify_certificate(
    cert: &Certificate,
    issuer_key: &SubjectPublicKeyInfoOwned,
) -> Result<(), VerifyFailure> {
    let x509 = cert.as_x509();
    let sig_oid = x509.signature_algorithm.oid;
    let digest_id = signature_digest(&sig_oid)
        .ok_or_else(|| VerifyFailure::Unsupported(format!("signature algorithm {}", sig_oid)))?;
    let digest =
        registry::resolve_digest(digest_id).map_err(|e| VerifyFailure::Unsupported(e.to_string()))?;

    let tbs = x509
        .tbs_certificate
        .to_der()
        .map_err(|e| VerifyFailure::Unsupported(e.to_string()))?;
    let hashed = digest
        .digest(&tbs)
        .map_err(|e| VerifyFailure::Unsupported(e.to_string()))?;

    let signature = x509.signature.as_bytes().ok_or(VerifyFailure::BadSignature)?;
    verify_prehash(issuer_key, digest, &hashed, signature)
}
