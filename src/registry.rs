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

//! Algorithm registry.
//!
//! Resolves numeric algorithm identifiers (OpenSSL-style NIDs) to read-only
//! descriptors for digests, block ciphers and key transport algorithms. The
//! table is a process-wide `static`; lookups never allocate or lock.
//!
//! # Supported Algorithms
//!
//! | NID | Name | Kind |
//! |-----|------|------|
//! | 675 | SHA-224 | digest |
//! | 672 | SHA-256 | digest |
//! | 673 | SHA-384 | digest |
//! | 674 | SHA-512 | digest |
//! | 419 | AES-128-CBC | block cipher |
//! | 423 | AES-192-CBC | block cipher |
//! | 427 | AES-256-CBC | block cipher |
//! | 6 | rsaEncryption | key transport |
//!
//! SHA-1 (64), MD5 (4) and DES-EDE3-CBC (44) are recognized but rejected.

use crate::error::{CmsError, PkiError, Result};
use const_oid::ObjectIdentifier;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;

/// Numeric algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlgorithmId(pub u32);

impl AlgorithmId {
    /// SHA-224.
    pub const SHA224: Self = Self(675);
    /// SHA-256.
    pub const SHA256: Self = Self(672);
    /// SHA-384.
    pub const SHA384: Self = Self(673);
    /// SHA-512.
    pub const SHA512: Self = Self(674);
    /// AES-128 in CBC mode.
    pub const AES128_CBC: Self = Self(419);
    /// AES-192 in CBC mode.
    pub const AES192_CBC: Self = Self(423);
    /// AES-256 in CBC mode.
    pub const AES256_CBC: Self = Self(427);
    /// RSA PKCS#1 v1.5 key transport.
    pub const RSA_ENCRYPTION: Self = Self(6);
    /// SHA-1 (recognized, not supported).
    pub const SHA1: Self = Self(64);
    /// MD5 (recognized, not supported).
    pub const MD5: Self = Self(4);
    /// Triple DES CBC (recognized, not supported).
    pub const DES_EDE3_CBC: Self = Self(44);
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AlgorithmId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// PKCS#11 mechanism type (`CKM_*` value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MechanismTag(pub u64);

impl MechanismTag {
    /// CKM_RSA_PKCS
    pub const RSA_PKCS: Self = Self(0x0001);
    /// CKM_SHA256
    pub const SHA256: Self = Self(0x0250);
    /// CKM_SHA224
    pub const SHA224: Self = Self(0x0255);
    /// CKM_SHA384
    pub const SHA384: Self = Self(0x0260);
    /// CKM_SHA512
    pub const SHA512: Self = Self(0x0270);
    /// CKM_AES_CBC_PAD
    pub const AES_CBC_PAD: Self = Self(0x1085);
}

/// What a descriptor can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    /// Message digest.
    Digest,
    /// Symmetric block cipher used for content encryption.
    BlockCipher,
    /// Asymmetric algorithm used to wrap content-encryption keys.
    KeyTransport,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest => write!(f, "digest"),
            Self::BlockCipher => write!(f, "block cipher"),
            Self::KeyTransport => write!(f, "key transport"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    RsaPkcs1,
}

/// Resolved algorithm handle.
///
/// Descriptors live in the static registry table and are only ever handed
/// out as `&'static` references.
#[derive(Debug, PartialEq, Eq)]
pub struct AlgorithmDescriptor {
    id: AlgorithmId,
    name: &'static str,
    kind: AlgorithmKind,
    oid: ObjectIdentifier,
    output_size: usize,
    block_size: usize,
    key_size: usize,
    mechanism: MechanismTag,
    primitive: Primitive,
}

impl AlgorithmDescriptor {
    /// Numeric identifier.
    pub fn id(&self) -> AlgorithmId {
        self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Algorithm kind.
    pub fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    /// ASN.1 object identifier used in encoded structures.
    pub fn oid(&self) -> ObjectIdentifier {
        self.oid
    }

    /// Digest output length in bytes (0 for non-digests).
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Internal block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Key length in bytes (0 for digests and key transport).
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// PKCS#11 mechanism that performs this algorithm on a token.
    pub fn mechanism(&self) -> MechanismTag {
        self.mechanism
    }

    /// Returns true for digest descriptors.
    pub fn is_digest(&self) -> bool {
        self.kind == AlgorithmKind::Digest
    }

    /// Compute the digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let out = match self.primitive {
            Primitive::Sha224 => Sha224::digest(data).to_vec(),
            Primitive::Sha256 => Sha256::digest(data).to_vec(),
            Primitive::Sha384 => Sha384::digest(data).to_vec(),
            Primitive::Sha512 => Sha512::digest(data).to_vec(),
            _ => return Err(self.wrong_kind(AlgorithmKind::Digest)),
        };
        Ok(out)
    }

    /// RSA PKCS#1 v1.5 signature scheme (DigestInfo prefix) for this digest.
    pub fn pkcs1v15_scheme(&self) -> Result<Pkcs1v15Sign> {
        match self.primitive {
            Primitive::Sha224 => Ok(Pkcs1v15Sign::new::<Sha224>()),
            Primitive::Sha256 => Ok(Pkcs1v15Sign::new::<Sha256>()),
            Primitive::Sha384 => Ok(Pkcs1v15Sign::new::<Sha384>()),
            Primitive::Sha512 => Ok(Pkcs1v15Sign::new::<Sha512>()),
            _ => Err(self.wrong_kind(AlgorithmKind::Digest)),
        }
    }

    /// Encrypt `plaintext` with PKCS#7 padding in CBC mode.
    pub fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

        self.check_cipher_params(key, iv)?;

        macro_rules! encrypt_with {
            ($cipher:ty) => {
                cbc::Encryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|e| CmsError::encoding(format!("Failed to create cipher: {}", e)))?
                    .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
            };
        }

        let out = match self.primitive {
            Primitive::Aes128Cbc => encrypt_with!(aes::Aes128),
            Primitive::Aes192Cbc => encrypt_with!(aes::Aes192),
            Primitive::Aes256Cbc => encrypt_with!(aes::Aes256),
            _ => return Err(self.wrong_kind(AlgorithmKind::BlockCipher)),
        };
        Ok(out)
    }

    /// Decrypt `ciphertext` and strip PKCS#7 padding.
    pub fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

        self.check_cipher_params(key, iv)?;

        macro_rules! decrypt_with {
            ($cipher:ty) => {
                cbc::Decryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|e| CmsError::encoding(format!("Failed to create cipher: {}", e)))?
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|e| CmsError::encoding(format!("Decryption failed: {}", e)))?
            };
        }

        let out = match self.primitive {
            Primitive::Aes128Cbc => decrypt_with!(aes::Aes128),
            Primitive::Aes192Cbc => decrypt_with!(aes::Aes192),
            Primitive::Aes256Cbc => decrypt_with!(aes::Aes256),
            _ => return Err(self.wrong_kind(AlgorithmKind::BlockCipher)),
        };
        Ok(out)
    }

    fn check_cipher_params(&self, key: &[u8], iv: &[u8]) -> Result<()> {
        if self.kind != AlgorithmKind::BlockCipher {
            return Err(self.wrong_kind(AlgorithmKind::BlockCipher));
        }
        if key.len() != self.key_size {
            return Err(CmsError::encoding(format!(
                "Invalid key size for {}: expected {}, got {}",
                self.name,
                self.key_size,
                key.len()
            ))
            .into());
        }
        if iv.len() != self.block_size {
            return Err(CmsError::encoding(format!(
                "Invalid IV size: expected {}, got {}",
                self.block_size,
                iv.len()
            ))
            .into());
        }
        Ok(())
    }

    fn wrong_kind(&self, wanted: AlgorithmKind) -> PkiError {
        PkiError::unsupported_algorithm(format!("{} is not a {}", self.name, wanted))
    }
}

impl fmt::Display for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

static REGISTRY: [AlgorithmDescriptor; 8] = [
    AlgorithmDescriptor {
        id: AlgorithmId::SHA224,
        name: "SHA-224",
        kind: AlgorithmKind::Digest,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4"),
        output_size: 28,
        block_size: 64,
        key_size: 0,
        mechanism: MechanismTag::SHA224,
        primitive: Primitive::Sha224,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::SHA256,
        name: "SHA-256",
        kind: AlgorithmKind::Digest,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
        output_size: 32,
        block_size: 64,
        key_size: 0,
        mechanism: MechanismTag::SHA256,
        primitive: Primitive::Sha256,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::SHA384,
        name: "SHA-384",
        kind: AlgorithmKind::Digest,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
        output_size: 48,
        block_size: 128,
        key_size: 0,
        mechanism: MechanismTag::SHA384,
        primitive: Primitive::Sha384,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::SHA512,
        name: "SHA-512",
        kind: AlgorithmKind::Digest,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        output_size: 64,
        block_size: 128,
        key_size: 0,
        mechanism: MechanismTag::SHA512,
        primitive: Primitive::Sha512,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::AES128_CBC,
        name: "AES-128-CBC",
        kind: AlgorithmKind::BlockCipher,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2"),
        output_size: 0,
        block_size: 16,
        key_size: 16,
        mechanism: MechanismTag::AES_CBC_PAD,
        primitive: Primitive::Aes128Cbc,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::AES192_CBC,
        name: "AES-192-CBC",
        kind: AlgorithmKind::BlockCipher,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.22"),
        output_size: 0,
        block_size: 16,
        key_size: 24,
        mechanism: MechanismTag::AES_CBC_PAD,
        primitive: Primitive::Aes192Cbc,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::AES256_CBC,
        name: "AES-256-CBC",
        kind: AlgorithmKind::BlockCipher,
        oid: ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42"),
        output_size: 0,
        block_size: 16,
        key_size: 32,
        mechanism: MechanismTag::AES_CBC_PAD,
        primitive: Primitive::Aes256Cbc,
    },
    AlgorithmDescriptor {
        id: AlgorithmId::RSA_ENCRYPTION,
        name: "rsaEncryption",
        kind: AlgorithmKind::KeyTransport,
        oid: ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1"),
        output_size: 0,
        block_size: 0,
        key_size: 0,
        mechanism: MechanismTag::RSA_PKCS,
        primitive: Primitive::RsaPkcs1,
    },
];

/// Identifiers that are known but deliberately not supported.
const REJECTED: &[(AlgorithmId, &str)] = &[
    (AlgorithmId::SHA1, "SHA-1"),
    (AlgorithmId::MD5, "MD5"),
    (AlgorithmId::DES_EDE3_CBC, "DES-EDE3-CBC"),
];

fn lookup(id: AlgorithmId, kind: AlgorithmKind) -> Result<&'static AlgorithmDescriptor> {
    if let Some(desc) = REGISTRY.iter().find(|d| d.id == id) {
        if desc.kind == kind {
            return Ok(desc);
        }
        return Err(desc.wrong_kind(kind));
    }

    if let Some((_, name)) = REJECTED.iter().find(|(rejected, _)| *rejected == id) {
        return Err(PkiError::unsupported_algorithm(format!(
            "{} ({}) is not permitted",
            name, id
        )));
    }

    Err(PkiError::unsupported_algorithm(format!(
        "Unknown {} identifier {}",
        kind, id
    )))
}

/// Resolve a digest identifier.
pub fn resolve_digest(id: AlgorithmId) -> Result<&'static AlgorithmDescriptor> {
    lookup(id, AlgorithmKind::Digest)
}

/// Resolve a content-encryption cipher identifier.
pub fn resolve_cipher(id: AlgorithmId) -> Result<&'static AlgorithmDescriptor> {
    lookup(id, AlgorithmKind::BlockCipher)
}

/// Resolve a key transport algorithm identifier.
pub fn resolve_key_transport(id: AlgorithmId) -> Result<&'static AlgorithmDescriptor> {
    lookup(id, AlgorithmKind::KeyTransport)
}

/// Reverse lookup by ASN.1 object identifier, used when decoding messages.
pub fn resolve_by_oid(oid: &ObjectIdentifier) -> Result<&'static AlgorithmDescriptor> {
    REGISTRY
        .iter()
        .find(|d| d.oid == *oid)
        .ok_or_else(|| PkiError::unsupported_algorithm(format!("Unknown algorithm OID {}", oid)))
}

/// All supported descriptors, in table order.
pub fn supported() -> impl Iterator<Item = &'static AlgorithmDescriptor> {
    REGISTRY.iter()
}
