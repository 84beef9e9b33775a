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

//! Software (in-memory) token implementation.
//!
//! [`SoftwareToken`] implements [`Signer`], [`Decryptor`] and
//! [`TokenObjects`] over keys held in process memory. It is intended for:
//!
//! - **Development and testing**: exercising the CMS engine without hardware
//! - **Fault injection**: simulating device removal, logout and timeouts
//!
//! # Security Considerations
//!
//! **WARNING**: private keys live in process memory. Do not use this token
//! where the key must stay inside a hardware boundary.

use super::{Decryptor, KeyAlgorithm, KeyHandle, Signer, TokenObjects};
use crate::certificate::Certificate;
use crate::error::TokenError;
use crate::registry::{AlgorithmDescriptor, AlgorithmKind};
use parking_lot::{Mutex, RwLock};
use rsa::traits::PublicKeyParts;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

enum SoftwareKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Rsa(rsa::RsaPrivateKey),
}

struct StoredKey {
    handle: KeyHandle,
    key: SoftwareKey,
}

/// In-memory token with fault injection.
pub struct SoftwareToken {
    keys: RwLock<BTreeMap<Vec<u8>, StoredKey>>,
    certificates: RwLock<BTreeMap<Vec<u8>, Certificate>>,
    present: AtomicBool,
    logged_in: AtomicBool,
    pending_fault: Mutex<Option<TokenError>>,
    operations: AtomicUsize,
}

impl SoftwareToken {
    /// Create an empty, present and logged-in token.
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(BTreeMap::new()),
            certificates: RwLock::new(BTreeMap::new()),
            present: AtomicBool::new(true),
            logged_in: AtomicBool::new(true),
            pending_fault: Mutex::new(None),
            operations: AtomicUsize::new(0),
        }
    }

    /// Import a PKCS#8 DER private key (P-256, P-384 or RSA) under `id`.
    ///
    /// An existing key with the same id is replaced.
    pub fn import_pkcs8(
        &self,
        id: &[u8],
        label: Option<&str>,
        pkcs8_der: &[u8],
    ) -> Result<KeyHandle, TokenError> {
        use p256::pkcs8::DecodePrivateKey;

        let (key, algorithm) = if let Ok(k) = p256::ecdsa::SigningKey::from_pkcs8_der(pkcs8_der) {
            (SoftwareKey::P256(k), KeyAlgorithm::EcdsaP256)
        } else if let Ok(k) = p384::ecdsa::SigningKey::from_pkcs8_der(pkcs8_der) {
            (SoftwareKey::P384(k), KeyAlgorithm::EcdsaP384)
        } else if let Ok(k) = rsa::RsaPrivateKey::from_pkcs8_der(pkcs8_der) {
            let bits = (k.size() * 8) as u32;
            (SoftwareKey::Rsa(k), KeyAlgorithm::Rsa { bits })
        } else {
            return Err(TokenError::MechanismUnsupported(
                "unsupported PKCS#8 key type".to_string(),
            ));
        };

        let handle = KeyHandle::new(id.to_vec(), algorithm, label.map(str::to_string));
        debug!("Imported software key {}", handle);
        self.keys.write().insert(
            id.to_vec(),
            StoredKey {
                handle: handle.clone(),
                key,
            },
        );
        Ok(handle)
    }

    /// Store a certificate under `id`, next to the key with the same id.
    pub fn import_certificate(&self, id: &[u8], cert: Certificate) {
        self.certificates.write().insert(id.to_vec(), cert);
    }

    /// Look up the handle of an imported key.
    pub fn key(&self, id: &[u8]) -> Result<KeyHandle, TokenError> {
        self.keys
            .read()
            .get(id)
            .map(|stored| stored.handle.clone())
            .ok_or_else(|| TokenError::KeyNotFound(hex::encode(id)))
    }

    /// Simulate physical removal of the token.
    pub fn simulate_removal(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    /// Simulate re-insertion of the token.
    pub fn reinsert(&self) {
        self.present.store(true, Ordering::SeqCst);
    }

    /// Simulate the session being logged out.
    pub fn logout(&self) {
        self.logged_in.store(false, Ordering::SeqCst);
    }

    /// Simulate logging back in.
    pub fn login(&self) {
        self.logged_in.store(true, Ordering::SeqCst);
    }

    /// Make the next private-key operation fail with `error`.
    pub fn inject_fault(&self, error: TokenError) {
        *self.pending_fault.lock() = Some(error);
    }

    /// Number of private-key operations that reached a key.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn check_session(&self) -> Result<(), TokenError> {
        if let Some(fault) = self.pending_fault.lock().take() {
            debug!("Injected token fault: {}", fault);
            return Err(fault);
        }
        if !self.present.load(Ordering::SeqCst) {
            return Err(TokenError::DeviceRemoved);
        }
        if !self.logged_in.load(Ordering::SeqCst) {
            return Err(TokenError::NotLoggedIn);
        }
        Ok(())
    }
}

impl Default for SoftwareToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for SoftwareToken {
    fn sign(
        &self,
        key: &KeyHandle,
        digest: &AlgorithmDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        use p256::ecdsa::signature::hazmat::PrehashSigner;

        self.check_session()?;
        if !digest.is_digest() {
            return Err(TokenError::MechanismUnsupported(format!(
                "{} is not a digest",
                digest.name()
            )));
        }

        let keys = self.keys.read();
        let stored = keys
            .get(key.id())
            .ok_or_else(|| TokenError::KeyNotFound(key.id_hex()))?;

        let hashed = digest
            .digest(data)
            .map_err(|e| TokenError::MechanismUnsupported(e.to_string()))?;
        debug!("Software sign with {} ({})", stored.handle, digest.name());
        self.operations.fetch_add(1, Ordering::SeqCst);

        match &stored.key {
            SoftwareKey::P256(k) => {
                let sig: p256::ecdsa::Signature = k
                    .sign_prehash(&hashed)
                    .map_err(|e| TokenError::Device(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            SoftwareKey::P384(k) => {
                let sig: p384::ecdsa::Signature = k
                    .sign_prehash(&hashed)
                    .map_err(|e| TokenError::Device(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            SoftwareKey::Rsa(k) => {
                let scheme = digest
                    .pkcs1v15_scheme()
                    .map_err(|e| TokenError::MechanismUnsupported(e.to_string()))?;
                k.sign(scheme, &hashed)
                    .map_err(|e| TokenError::Device(e.to_string()))
            }
        }
    }
}

impl Decryptor for SoftwareToken {
    fn decrypt(
        &self,
        key: &KeyHandle,
        algorithm: &AlgorithmDescriptor,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        self.check_session()?;
        if algorithm.kind() != AlgorithmKind::KeyTransport {
            return Err(TokenError::MechanismUnsupported(format!(
                "{} is not a key transport algorithm",
                algorithm.name()
            )));
        }

        let keys = self.keys.read();
        let stored = keys
            .get(key.id())
            .ok_or_else(|| TokenError::KeyNotFound(key.id_hex()))?;

        match &stored.key {
            SoftwareKey::Rsa(k) => {
                debug!("Software decrypt with {}", stored.handle);
                self.operations.fetch_add(1, Ordering::SeqCst);
                k.decrypt(rsa::Pkcs1v15Encrypt, ciphertext)
                    .map_err(|e| TokenError::Device(e.to_string()))
            }
            _ => Err(TokenError::MechanismUnsupported(format!(
                "{} cannot decrypt",
                stored.handle.algorithm().as_str()
            ))),
        }
    }
}

impl TokenObjects for SoftwareToken {
    fn list_keys(&self) -> Result<Vec<KeyHandle>, TokenError> {
        self.check_session()?;
        Ok(self
            .keys
            .read()
            .values()
            .map(|stored| stored.handle.clone())
            .collect())
    }

    fn find_certificate(&self, key: &KeyHandle) -> Result<Option<Certificate>, TokenError> {
        self.check_session()?;
        Ok(self.certificates.read().get(key.id()).cloned())
    }
}
