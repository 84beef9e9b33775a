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

//! Token session bridge.
//!
//! Private-key operations are exposed through two capability traits,
//! [`Signer`] and [`Decryptor`]. The CMS engine only ever sees these traits,
//! so the same code runs against a PKCS#11 token or the in-memory
//! [`SoftwareToken`] used for development and tests.
//!
//! # Key Features
//!
//! - **No key material in the core**: callers pass a [`KeyHandle`], never a key
//! - **Synchronous**: every call blocks for the duration of the device round-trip
//! - **No retries**: failures are reported as [`TokenError`] and never masked by
//!   falling back to another key or mechanism
//!
//! # Example
//!
//! ```no_run
//! use token_pki::registry::{self, AlgorithmId};
//! use token_pki::token::{Signer, SoftwareToken};
//!
//! # fn example(pkcs8: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let token = SoftwareToken::new();
//! let key = token.import_pkcs8(b"\x01", Some("signing key"), pkcs8)?;
//!
//! let sha256 = registry::resolve_digest(AlgorithmId::SHA256)?;
//! let signature = token.sign(&key, sha256, b"data to sign")?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "software-token")]
mod software;

#[cfg(feature = "software-token")]
pub use software::SoftwareToken;

#[cfg(feature = "pkcs11")]
pub mod pkcs11;

#[cfg(feature = "pkcs11")]
pub use pkcs11::TokenSession;

use crate::certificate::Certificate;
use crate::chain::verify::KeyKind;
use crate::error::TokenError;
use crate::registry::AlgorithmDescriptor;
use std::fmt;

/// Reference to a token-resident private key.
///
/// The handle carries the key's `CKA_ID` and algorithm; it never carries key
/// material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    id: Vec<u8>,
    algorithm: KeyAlgorithm,
    label: Option<String>,
}

impl KeyHandle {
    /// Create a key handle.
    pub fn new(id: Vec<u8>, algorithm: KeyAlgorithm, label: Option<String>) -> Self {
        Self {
            id,
            algorithm,
            label,
        }
    }

    /// Key identifier (`CKA_ID`).
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Key identifier as lowercase hex.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    /// Key algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Key label (`CKA_LABEL`), if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} [{}] ({})", label, self.id_hex(), self.algorithm.as_str()),
            None => write!(f, "[{}] ({})", self.id_hex(), self.algorithm.as_str()),
        }
    }
}

/// Private key algorithms supported on tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// ECDSA with P-256 curve (secp256r1 / prime256v1).
    EcdsaP256,

    /// ECDSA with P-384 curve (secp384r1).
    EcdsaP384,

    /// RSA with specified key size.
    Rsa {
        /// RSA modulus size in bits.
        bits: u32,
    },
}

impl KeyAlgorithm {
    /// Get a string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ECDSA-P256",
            Self::EcdsaP384 => "ECDSA-P384",
            Self::Rsa { .. } => "RSA",
        }
    }

    /// Public key type matching this algorithm.
    pub fn key_kind(&self) -> KeyKind {
        match self {
            Self::EcdsaP256 => KeyKind::EcP256,
            Self::EcdsaP384 => KeyKind::EcP384,
            Self::Rsa { .. } => KeyKind::Rsa,
        }
    }

    /// Returns true if the key can unwrap content-encryption keys.
    pub fn supports_key_transport(&self) -> bool {
        matches!(self, Self::Rsa { .. })
    }
}

/// Private-key signing capability.
pub trait Signer: Send + Sync {
    /// Sign `data` with the key behind `key`.
    ///
    /// `data` is hashed with `digest`, either by the token or locally; the
    /// signing mechanism itself always runs where the key lives.
    ///
    /// The signature format depends on the key algorithm:
    /// - ECDSA: DER-encoded ECDSA-Sig-Value (SEQUENCE of two INTEGERs)
    /// - RSA: PKCS#1 v1.5 signature
    fn sign(
        &self,
        key: &KeyHandle,
        digest: &AlgorithmDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError>;
}

/// Private-key decryption capability.
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` with the key behind `key` using the key transport
    /// algorithm `algorithm`.
    fn decrypt(
        &self,
        key: &KeyHandle,
        algorithm: &AlgorithmDescriptor,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TokenError>;
}

/// Object discovery on a token.
pub trait TokenObjects {
    /// List the private keys on the token.
    fn list_keys(&self) -> Result<Vec<KeyHandle>, TokenError>;

    /// Find the certificate stored under the same `CKA_ID` as `key`.
    fn find_certificate(&self, key: &KeyHandle) -> Result<Option<Certificate>, TokenError>;
}

impl<T: Signer + ?Sized> Signer for &T {
    fn sign(
        &self,
        key: &KeyHandle,
        digest: &AlgorithmDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        (**self).sign(key, digest, data)
    }
}

impl<T: Decryptor + ?Sized> Decryptor for &T {
    fn decrypt(
        &self,
        key: &KeyHandle,
        algorithm: &AlgorithmDescriptor,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        (**self).decrypt(key, algorithm, ciphertext)
    }
}
