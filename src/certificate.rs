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

//! Parsed X.509 certificates and certificate stacks.

use crate::error::{PkiError, Result, StackError};
use crate::stack::ObjectStack;
use der::{Decode, DecodePem, Encode, EncodePem};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use std::time::SystemTime;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage};
use x509_cert::ext::Extension as X509Extension;
use x509_cert::name::Name;

/// An X.509 certificate: the exact DER encoding plus its parsed form.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    inner: x509_cert::Certificate,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = x509_cert::Certificate::from_der(der)
            .map_err(|e| PkiError::parse(format!("Invalid certificate DER: {}", e)))?;
        Ok(Self {
            der: der.to_vec(),
            inner,
        })
    }

    /// Parse a single PEM-encoded certificate.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let inner = x509_cert::Certificate::from_pem(pem)
            .map_err(|e| PkiError::parse(format!("Invalid certificate PEM: {}", e)))?;
        Self::from_x509(inner)
    }

    /// Parse every certificate in a PEM bundle, in file order.
    pub fn from_pem_chain(pem: &str) -> Result<Vec<Self>> {
        x509_cert::Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| PkiError::parse(format!("Invalid PEM bundle: {}", e)))?
            .into_iter()
            .map(Self::from_x509)
            .collect()
    }

    /// Wrap an already parsed certificate.
    pub fn from_x509(inner: x509_cert::Certificate) -> Result<Self> {
        let der = inner.to_der()?;
        Ok(Self { der, inner })
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding.
    pub fn to_pem(&self) -> Result<String> {
        Ok(self.inner.to_pem(der::pem::LineEnding::LF)?)
    }

    /// Parsed certificate.
    pub fn as_x509(&self) -> &x509_cert::Certificate {
        &self.inner
    }

    /// Subject name.
    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    /// Issuer name.
    pub fn issuer(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    /// Subject name as an RFC 4514 string.
    pub fn subject_string(&self) -> String {
        self.subject().to_string()
    }

    /// Issuer name as an RFC 4514 string.
    pub fn issuer_string(&self) -> String {
        self.issuer().to_string()
    }

    /// Serial number as big-endian bytes.
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    /// Serial number as lowercase hex.
    pub fn serial_hex(&self) -> String {
        hex::encode(self.serial_number())
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> SystemTime {
        self.inner.tbs_certificate.validity.not_before.to_system_time()
    }

    /// End of the validity window.
    pub fn not_after(&self) -> SystemTime {
        self.inner.tbs_certificate.validity.not_after.to_system_time()
    }

    /// Returns true if `time` lies within `[not_before, not_after]`.
    pub fn is_valid_at(&self, time: SystemTime) -> bool {
        time >= self.not_before() && time <= self.not_after()
    }

    /// Subject public key info.
    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.tbs_certificate.subject_public_key_info
    }

    /// Raw X.509 extensions, in encoding order.
    pub fn extensions(&self) -> &[X509Extension] {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or(&[])
    }

    /// Returns true if subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject() == self.issuer()
    }

    /// Returns true if this certificate and `other` share issuer and serial.
    pub fn same_identity(&self, other: &Certificate) -> bool {
        self.issuer() == other.issuer() && self.serial_number() == other.serial_number()
    }

    /// Decoded basic constraints, if present.
    pub fn basic_constraints(&self) -> Result<Option<BasicConstraints>> {
        self.decode_extension::<BasicConstraints>(&const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS)
    }

    /// Decoded key usage, if present.
    pub fn key_usage(&self) -> Result<Option<KeyUsage>> {
        self.decode_extension::<KeyUsage>(&const_oid::db::rfc5280::ID_CE_KEY_USAGE)
    }

    fn decode_extension<T>(&self, oid: &der::oid::ObjectIdentifier) -> Result<Option<T>>
    where
        T: for<'a> Decode<'a>,
    {
        self.extensions()
            .iter()
            .find(|ext| ext.extn_id == *oid)
            .map(|ext| {
                T::from_der(ext.extn_value.as_bytes())
                    .map_err(|e| PkiError::parse(format!("Invalid extension {}: {}", oid, e)))
            })
            .transpose()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject_string())
            .field("issuer", &self.issuer_string())
            .field("serial", &self.serial_hex())
            .finish()
    }
}

/// Ordered certificate collection, leaf first.
///
/// No two certificates in a stack share the same issuer and serial number;
/// [`CertificateStack::push`] rejects duplicates and leaves the stack as it
/// was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateStack {
    inner: ObjectStack<Certificate>,
}

impl CertificateStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty stack with a hard size limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: ObjectStack::with_limit(limit),
        }
    }

    /// Build a stack from `certs`, rejecting duplicates.
    pub fn from_certificates(certs: Vec<Certificate>) -> Result<Self> {
        let mut stack = Self::new();
        for cert in certs {
            stack.push(cert)?;
        }
        Ok(stack)
    }

    /// Append a certificate.
    pub fn push(&mut self, cert: Certificate) -> std::result::Result<(), StackError> {
        if self.contains(&cert) {
            return Err(StackError::DuplicateCertificate {
                issuer: cert.issuer_string(),
                serial: cert.serial_hex(),
            });
        }
        self.inner.push(cert)
    }

    /// Returns true if a certificate with the same issuer and serial is present.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.inner.iter().any(|c| c.same_identity(cert))
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Borrow the certificate at `index`.
    pub fn at(&self, index: usize) -> std::result::Result<&Certificate, StackError> {
        self.inner.at(index)
    }

    /// First certificate (the leaf for a chain).
    pub fn leaf(&self) -> Option<&Certificate> {
        self.inner.first()
    }

    /// Iterate in stack order.
    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.inner.iter()
    }

    /// Move the certificate at `index` out of the stack.
    pub fn take(&mut self, index: usize) -> std::result::Result<Certificate, StackError> {
        self.inner.take(index)
    }

    /// Release the stack and return its certificates.
    pub fn into_items(self) -> Vec<Certificate> {
        self.inner.into_items()
    }

    /// Borrow the underlying object stack.
    pub fn as_stack(&self) -> &ObjectStack<Certificate> {
        &self.inner
    }
}

impl<'a> IntoIterator for &'a CertificateStack {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
