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

//! X.509 extension inspection and construction.
//!
//! Extensions are held as (OID, criticality, DER value) triples in an
//! [`ExtensionStack`] whose order is the order they will be encoded in.
//! Certificate policies have their own submodule.

pub mod policies;

pub use policies::{
    build_policy_extension, extract_policies, PolicyClass, PolicyInfo, PolicyInfoStack,
};

use crate::certificate::Certificate;
use crate::error::{PkiError, Result};
use crate::registry::{self, AlgorithmId};
use crate::stack::ObjectStack;
use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use der::Encode;
use spki::SubjectPublicKeyInfoOwned;
use tracing::debug;
use x509_cert::ext::Extension as X509Extension;

/// Basic constraints (2.5.29.19).
pub const BASIC_CONSTRAINTS_OID: ObjectIdentifier = const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS;

/// Subject key identifier (2.5.29.14).
pub const SUBJECT_KEY_IDENTIFIER_OID: ObjectIdentifier =
    const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER;

/// A single X.509 extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    oid: ObjectIdentifier,
    critical: bool,
    value: Vec<u8>,
}

impl Extension {
    /// Create an extension from its OID, criticality and DER-encoded value.
    pub fn new(oid: ObjectIdentifier, critical: bool, value: Vec<u8>) -> Self {
        Self {
            oid,
            critical,
            value,
        }
    }

    /// Extension OID.
    pub fn oid(&self) -> ObjectIdentifier {
        self.oid
    }

    /// Criticality flag.
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// DER encoding of the extension value (the `extnValue` contents).
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Convert from the `x509-cert` representation.
    pub fn from_x509(ext: &X509Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }

    /// Convert to the `x509-cert` representation.
    pub fn to_x509(&self) -> Result<X509Extension> {
        Ok(X509Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }

    /// Full DER encoding of the `Extension` SEQUENCE.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_x509()?.to_der()?)
    }
}

/// Ordered extension list.
pub type ExtensionStack = ObjectStack<Extension>;

/// Collect a certificate's extensions in encoding order.
pub fn extensions_of(cert: &Certificate) -> ExtensionStack {
    cert.extensions().iter().map(Extension::from_x509).collect()
}

/// Find the first extension with `oid`.
pub fn find_extension<'a>(stack: &'a ExtensionStack, oid: &ObjectIdentifier) -> Result<&'a Extension> {
    stack
        .iter()
        .find(|ext| ext.oid == *oid)
        .ok_or_else(|| PkiError::ExtensionNotFound(oid.to_string()))
}

/// Append `extension` to `stack`.
///
/// With `allow_duplicate_oid` false, an extension whose OID is already
/// present is rejected with [`PkiError::DuplicateExtension`] and the stack is
/// left unchanged.
pub fn append_extension(
    stack: &mut ExtensionStack,
    extension: Extension,
    allow_duplicate_oid: bool,
) -> Result<()> {
    if !allow_duplicate_oid && stack.iter().any(|ext| ext.oid == extension.oid) {
        debug!("Rejecting duplicate extension {}", extension.oid);
        return Err(PkiError::duplicate_extension(extension.oid));
    }
    stack.push(extension)?;
    Ok(())
}

/// Build a subject key identifier extension (RFC 7093 method 1).
///
/// The identifier is the leftmost 160 bits of the digest of the subject
/// public key bits.
pub fn build_subject_key_identifier(
    public_key: &SubjectPublicKeyInfoOwned,
    digest: AlgorithmId,
) -> Result<Extension> {
    let desc = registry::resolve_digest(digest)?;
    let hashed = desc.digest(public_key.subject_public_key.raw_bytes())?;
    let truncated = &hashed[..hashed.len().min(20)];
    let value = OctetString::new(truncated)?.to_der()?;
    Ok(Extension::new(SUBJECT_KEY_IDENTIFIER_OID, false, value))
}
