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

//! PKCS#11 token session bridge.
//!
//! [`TokenSession`] wraps a Cryptoki session that an external collaborator
//! has already opened and authenticated. Every sign or decrypt call takes
//! the session lock for exactly one operation, waiting at most the
//! configured lock timeout.
//!
//! # Mechanism Selection
//!
//! When the token advertises a combined hash-and-sign mechanism (for example
//! `CKM_ECDSA_SHA256` or `CKM_SHA256_RSA_PKCS`) and
//! `prefer_token_digest` is set, the token hashes the data itself.
//! Otherwise the digest is computed locally and signed with the raw
//! `CKM_ECDSA` or `CKM_RSA_PKCS` mechanism.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "pkcs11")]
//! # fn example(
//! #     pkcs11: &cryptoki::context::Pkcs11,
//! #     slot: cryptoki::slot::Slot,
//! #     session: cryptoki::session::Session,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! use token_pki::config::TokenConfig;
//! use token_pki::token::{TokenObjects, TokenSession};
//!
//! let token = TokenSession::new(pkcs11, slot, session, TokenConfig::default())?;
//! for key in token.list_keys()? {
//!     println!("{}", key);
//! }
//! # Ok(())
//! # }
//! ```

use super::{Decryptor, KeyAlgorithm, KeyHandle, Signer, TokenObjects};
use crate::certificate::Certificate;
use crate::config::TokenConfig;
use crate::error::TokenError;
use crate::registry::{AlgorithmDescriptor, AlgorithmId, AlgorithmKind, MechanismTag};
use cryptoki::context::Pkcs11;
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::{Mechanism, MechanismType};
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::Session;
use cryptoki::slot::Slot;
use der::asn1::ObjectIdentifier;
use der::Encode;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Authenticated PKCS#11 session serialized behind a lock.
pub struct TokenSession {
    session: Mutex<Session>,
    mechanisms: Vec<MechanismType>,
    slot: Slot,
    config: TokenConfig,
}

impl TokenSession {
    /// Wrap an open, logged-in session on `slot`.
    ///
    /// The slot's mechanism list is read once here and used to pick signing
    /// mechanisms later.
    pub fn new(
        pkcs11: &Pkcs11,
        slot: Slot,
        session: Session,
        config: TokenConfig,
    ) -> Result<Self, TokenError> {
        let mechanisms = pkcs11.get_mechanism_list(slot).map_err(map_error)?;
        debug!(
            "Token slot {} advertises {} mechanisms",
            slot.id(),
            mechanisms.len()
        );
        Ok(Self {
            session: Mutex::new(session),
            mechanisms,
            slot,
            config,
        })
    }

    /// Slot this session belongs to.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Release the bridge and hand the session back to its owner.
    pub fn into_session(self) -> Session {
        self.session.into_inner()
    }

    /// Returns true if the token advertises `mechanism`.
    pub fn supports(&self, mechanism: &Mechanism) -> bool {
        self.mechanisms.contains(&mechanism.mechanism_type())
    }

    /// Returns true if the token advertises the mechanism with `tag`.
    pub fn supports_tag(&self, tag: MechanismTag) -> bool {
        self.mechanisms.iter().any(|m| u64::from(**m) == tag.0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>, TokenError> {
        self.session
            .try_lock_for(self.config.lock_timeout())
            .ok_or_else(|| {
                warn!(
                    "Timed out after {} ms waiting for token session",
                    self.config.lock_timeout_ms
                );
                TokenError::Timeout
            })
    }

    fn combined_mechanism(
        &self,
        algorithm: KeyAlgorithm,
        digest: &AlgorithmDescriptor,
    ) -> Option<Mechanism<'static>> {
        if !self.config.prefer_token_digest {
            return None;
        }
        let mechanism = match (algorithm, digest.id()) {
            (KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384, AlgorithmId::SHA224) => {
                Mechanism::EcdsaSha224
            }
            (KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384, AlgorithmId::SHA256) => {
                Mechanism::EcdsaSha256
            }
            (KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384, AlgorithmId::SHA384) => {
                Mechanism::EcdsaSha384
            }
            (KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384, AlgorithmId::SHA512) => {
                Mechanism::EcdsaSha512
            }
            (KeyAlgorithm::Rsa { .. }, AlgorithmId::SHA224) => Mechanism::Sha224RsaPkcs,
            (KeyAlgorithm::Rsa { .. }, AlgorithmId::SHA256) => Mechanism::Sha256RsaPkcs,
            (KeyAlgorithm::Rsa { .. }, AlgorithmId::SHA384) => Mechanism::Sha384RsaPkcs,
            (KeyAlgorithm::Rsa { .. }, AlgorithmId::SHA512) => Mechanism::Sha512RsaPkcs,
            _ => return None,
        };
        self.supports(&mechanism).then_some(mechanism)
    }
}

impl Signer for TokenSession {
    fn sign(
        &self,
        key: &KeyHandle,
        digest: &AlgorithmDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        if !digest.is_digest() {
            return Err(TokenError::MechanismUnsupported(format!(
                "{} is not a digest",
                digest.name()
            )));
        }

        let algorithm = key.algorithm();
        let (mechanism, payload) = match self.combined_mechanism(algorithm, digest) {
            Some(mechanism) => {
                debug!("Token computes {} for {}", digest.name(), key);
                (mechanism, data.to_vec())
            }
            None => {
                debug!("Computing {} locally for {}", digest.name(), key);
                let hashed = digest
                    .digest(data)
                    .map_err(|e| TokenError::MechanismUnsupported(e.to_string()))?;
                match algorithm {
                    KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => (Mechanism::Ecdsa, hashed),
                    KeyAlgorithm::Rsa { .. } => {
                        let scheme = digest
                            .pkcs1v15_scheme()
                            .map_err(|e| TokenError::MechanismUnsupported(e.to_string()))?;
                        let mut digest_info = scheme.prefix.to_vec();
                        digest_info.extend_from_slice(&hashed);
                        (Mechanism::RsaPkcs, digest_info)
                    }
                }
            }
        };

        if !self.supports(&mechanism) {
            return Err(TokenError::MechanismUnsupported(format!(
                "{:?} for {}",
                mechanism.mechanism_type(),
                algorithm.as_str()
            )));
        }

        let session = self.lock()?;
        let object = find_private_key(&session, key)?;
        let signature = session
            .sign(&mechanism, object, &payload)
            .map_err(map_error)?;
        drop(session);

        match algorithm {
            KeyAlgorithm::EcdsaP256 => {
                let sig = p256::ecdsa::Signature::from_slice(&signature)
                    .map_err(|e| TokenError::Device(format!("Malformed ECDSA signature: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            KeyAlgorithm::EcdsaP384 => {
                let sig = p384::ecdsa::Signature::from_slice(&signature)
                    .map_err(|e| TokenError::Device(format!("Malformed ECDSA signature: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            KeyAlgorithm::Rsa { .. } => Ok(signature),
        }
    }
}

impl Decryptor for TokenSession {
    fn decrypt(
        &self,
        key: &KeyHandle,
        algorithm: &AlgorithmDescriptor,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        if algorithm.kind() != AlgorithmKind::KeyTransport || !key.algorithm().supports_key_transport()
        {
            return Err(TokenError::MechanismUnsupported(format!(
                "{} with {}",
                algorithm.name(),
                key.algorithm().as_str()
            )));
        }
        if !self.supports_tag(algorithm.mechanism()) {
            return Err(TokenError::MechanismUnsupported(format!(
                "token does not offer {}",
                algorithm.name()
            )));
        }

        debug!("Token decrypt with {}", key);
        let session = self.lock()?;
        let object = find_private_key(&session, key)?;
        session
            .decrypt(&Mechanism::RsaPkcs, object, ciphertext)
            .map_err(map_error)
    }
}

impl TokenObjects for TokenSession {
    fn list_keys(&self) -> Result<Vec<KeyHandle>, TokenError> {
        let session = self.lock()?;
        let objects = session
            .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
            .map_err(map_error)?;

        let mut handles = Vec::with_capacity(objects.len());
        for object in objects {
            let attrs = session
                .get_attributes(
                    object,
                    &[AttributeType::Id, AttributeType::Label, AttributeType::KeyType],
                )
                .map_err(map_error)?;

            let mut id = Vec::new();
            let mut label = None;
            let mut key_type = None;
            for attr in attrs {
                match attr {
                    Attribute::Id(v) => id = v,
                    Attribute::Label(v) if !v.is_empty() => {
                        label = Some(String::from_utf8_lossy(&v).trim().to_string())
                    }
                    Attribute::KeyType(t) => key_type = Some(t),
                    _ => {}
                }
            }

            let algorithm = match key_type {
                Some(KeyType::EC) => ec_algorithm(&session, object)?,
                Some(KeyType::RSA) => rsa_algorithm(&session, object)?,
                _ => None,
            };
            match algorithm {
                Some(algorithm) => handles.push(KeyHandle::new(id, algorithm, label)),
                None => debug!("Skipping key {} with unsupported type", hex::encode(&id)),
            }
        }
        Ok(handles)
    }

    fn find_certificate(&self, key: &KeyHandle) -> Result<Option<Certificate>, TokenError> {
        let session = self.lock()?;
        let objects = session
            .find_objects(&[
                Attribute::Class(ObjectClass::CERTIFICATE),
                Attribute::Id(key.id().to_vec()),
            ])
            .map_err(map_error)?;
        let Some(object) = objects.into_iter().next() else {
            return Ok(None);
        };

        let attrs = session
            .get_attributes(object, &[AttributeType::Value])
            .map_err(map_error)?;
        match attrs.into_iter().next() {
            Some(Attribute::Value(der)) => Certificate::from_der(&der)
                .map(Some)
                .map_err(|e| TokenError::Device(e.to_string())),
            _ => Err(TokenError::Device("certificate has no CKA_VALUE".to_string())),
        }
    }
}

fn find_private_key(session: &Session, key: &KeyHandle) -> Result<ObjectHandle, TokenError> {
    session
        .find_objects(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(key.id().to_vec()),
        ])
        .map_err(map_error)?
        .into_iter()
        .next()
        .ok_or_else(|| TokenError::KeyNotFound(key.id_hex()))
}

fn ec_algorithm(session: &Session, object: ObjectHandle) -> Result<Option<KeyAlgorithm>, TokenError> {
    let attrs = session
        .get_attributes(object, &[AttributeType::EcParams])
        .map_err(map_error)?;
    let Some(Attribute::EcParams(params)) = attrs.into_iter().next() else {
        return Ok(None);
    };
    let p256 = OID_SECP256R1
        .to_der()
        .map_err(|e| TokenError::Device(e.to_string()))?;
    let p384 = OID_SECP384R1
        .to_der()
        .map_err(|e| TokenError::Device(e.to_string()))?;
    Ok(if params == p256 {
        Some(KeyAlgorithm::EcdsaP256)
    } else if params == p384 {
        Some(KeyAlgorithm::EcdsaP384)
    } else {
        None
    })
}

fn rsa_algorithm(session: &Session, object: ObjectHandle) -> Result<Option<KeyAlgorithm>, TokenError> {
    let attrs = session
        .get_attributes(object, &[AttributeType::Modulus])
        .map_err(map_error)?;
    Ok(match attrs.into_iter().next() {
        Some(Attribute::Modulus(modulus)) => {
            let significant = modulus.iter().skip_while(|b| **b == 0).count();
            Some(KeyAlgorithm::Rsa {
                bits: (significant * 8) as u32,
            })
        }
        _ => None,
    })
}

/// Translate a Cryptoki error into the bridge's error taxonomy.
pub(crate) fn map_error(error: CryptokiError) -> TokenError {
    match error {
        CryptokiError::Pkcs11(rv, ..) => match rv {
            RvError::DeviceRemoved
            | RvError::TokenNotPresent
            | RvError::SessionHandleInvalid
            | RvError::SessionClosed => TokenError::DeviceRemoved,
            RvError::UserNotLoggedIn => TokenError::NotLoggedIn,
            RvError::MechanismInvalid
            | RvError::MechanismParamInvalid
            | RvError::KeyTypeInconsistent
            | RvError::KeyFunctionNotPermitted => TokenError::MechanismUnsupported(rv.to_string()),
            RvError::KeyHandleInvalid | RvError::ObjectHandleInvalid => {
                TokenError::KeyNotFound(rv.to_string())
            }
            other => TokenError::Device(other.to_string()),
        },
        other => TokenError::Device(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptoki::context::Function;

    #[test]
    fn test_map_device_removed() {
        let err = CryptokiError::Pkcs11(RvError::DeviceRemoved, Function::Sign);
        assert_eq!(map_error(err), TokenError::DeviceRemoved);
        let err = CryptokiError::Pkcs11(RvError::SessionHandleInvalid, Function::Sign);
        assert_eq!(map_error(err), TokenError::DeviceRemoved);
    }

    #[test]
    fn test_map_login_and_mechanism() {
        let err = CryptokiError::Pkcs11(RvError::UserNotLoggedIn, Function::Sign);
        assert_eq!(map_error(err), TokenError::NotLoggedIn);
        let err = CryptokiError::Pkcs11(RvError::MechanismInvalid, Function::SignInit);
        assert!(matches!(map_error(err), TokenError::MechanismUnsupported(_)));
        let err = CryptokiError::Pkcs11(RvError::KeyHandleInvalid, Function::SignInit);
        assert!(matches!(map_error(err), TokenError::KeyNotFound(_)));
    }
}
