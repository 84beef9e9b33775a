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

//! CMS message model and serialization.
//!
//! A [`CmsMessage`] is a DER `ContentInfo` carrying either `SignedData` or
//! `EnvelopedData` (RFC 5652). Messages can be written as raw DER or as PEM
//! with a `CMS` label; `PKCS7` armor is accepted on input.

use base64::prelude::*;
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::enveloped_data::{EnvelopedData, RecipientInfo};
use cms::signed_data::{SignedData, SignerInfo};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, OctetString};
use der::{Decode, Encode};

use crate::certificate::{Certificate, CertificateStack};
use crate::error::{PkiError, Result};
use crate::registry::{self, AlgorithmDescriptor};

/// id-data (1.2.840.113549.1.7.1)
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");

/// id-signedData (1.2.840.113549.1.7.2)
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// id-envelopedData (1.2.840.113549.1.7.3)
pub const ID_ENVELOPED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");

const PEM_LABELS: [&str; 2] = ["CMS", "PKCS7"];

/// A signed or enveloped CMS message.
#[derive(Debug, Clone)]
pub enum CmsMessage {
    /// SignedData.
    Signed(SignedMessage),
    /// EnvelopedData.
    Enveloped(EnvelopedMessage),
}

impl CmsMessage {
    /// Encode as a DER `ContentInfo`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let content_info = match self {
            Self::Signed(m) => ContentInfo {
                content_type: ID_SIGNED_DATA,
                content: Any::encode_from(&m.signed_data)?,
            },
            Self::Enveloped(m) => ContentInfo {
                content_type: ID_ENVELOPED_DATA,
                content: Any::encode_from(&m.enveloped_data)?,
            },
        };
        Ok(content_info.to_der()?)
    }

    /// Decode a DER `ContentInfo`.
    pub fn decode(der: &[u8]) -> Result<Self> {
        let content_info = ContentInfo::from_der(der)
            .map_err(|e| PkiError::parse(format!("Failed to parse ContentInfo: {}", e)))?;
        let content = content_info
            .content
            .to_der()
            .map_err(|e| PkiError::parse(format!("Failed to encode content: {}", e)))?;

        match content_info.content_type {
            oid if oid == ID_SIGNED_DATA => {
                let signed_data = SignedData::from_der(&content)
                    .map_err(|e| PkiError::parse(format!("Failed to parse SignedData: {}", e)))?;
                Ok(Self::Signed(SignedMessage::new(signed_data)))
            }
            oid if oid == ID_ENVELOPED_DATA => {
                let enveloped_data = EnvelopedData::from_der(&content).map_err(|e| {
                    PkiError::parse(format!("Failed to parse EnvelopedData: {}", e))
                })?;
                Ok(Self::Enveloped(EnvelopedMessage::new(enveloped_data)))
            }
            oid => Err(PkiError::parse(format!(
                "Unsupported CMS content type {}",
                oid
            ))),
        }
    }

    /// Encode as PEM with `line_width` base64 columns.
    pub fn to_pem(&self, line_width: usize) -> Result<String> {
        let der = self.encode()?;
        let body = encode_base64_wrapped(&der, line_width.max(4));
        Ok(format!(
            "-----BEGIN CMS-----\n{}\n-----END CMS-----\n",
            body
        ))
    }

    /// Decode PEM armored CMS (`CMS` or `PKCS7` label).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = decode_pem(pem)?;
        Self::decode(&der)
    }

    /// The signed message, if this is SignedData.
    pub fn as_signed(&self) -> Option<&SignedMessage> {
        match self {
            Self::Signed(m) => Some(m),
            Self::Enveloped(_) => None,
        }
    }

    /// The enveloped message, if this is EnvelopedData.
    pub fn as_enveloped(&self) -> Option<&EnvelopedMessage> {
        match self {
            Self::Enveloped(m) => Some(m),
            Self::Signed(_) => None,
        }
    }
}

impl PartialEq for CmsMessage {
    fn eq(&self, other: &Self) -> bool {
        match (self.encode(), other.encode()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// CMS SignedData.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    signed_data: SignedData,
}

impl SignedMessage {
    pub(crate) fn new(signed_data: SignedData) -> Self {
        Self { signed_data }
    }

    /// Underlying `SignedData`.
    pub fn signed_data(&self) -> &SignedData {
        &self.signed_data
    }

    /// Encapsulated content type.
    pub fn content_type(&self) -> ObjectIdentifier {
        self.signed_data.encap_content_info.econtent_type
    }

    /// Returns true if the content is not embedded.
    pub fn is_detached(&self) -> bool {
        self.signed_data.encap_content_info.econtent.is_none()
    }

    /// Embedded content, if any.
    pub fn content(&self) -> Result<Option<Vec<u8>>> {
        self.signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .map(|any| {
                any.decode_as::<OctetString>()
                    .map(|octets| octets.into_bytes())
                    .map_err(|e| PkiError::parse(format!("Invalid eContent: {}", e)))
            })
            .transpose()
    }

    /// Embedded X.509 certificates, in encoded order.
    ///
    /// Non-X.509 certificate choices are skipped.
    pub fn certificates(&self) -> Result<Vec<Certificate>> {
        let Some(set) = &self.signed_data.certificates else {
            return Ok(Vec::new());
        };

        let mut certificates = Vec::with_capacity(set.0.len());
        for choice in set.0.iter() {
            match choice {
                CertificateChoices::Certificate(cert) => {
                    certificates.push(Certificate::from_x509(cert.clone())?)
                }
                _ => tracing::warn!("Skipping non-X.509 certificate choice"),
            }
        }
        Ok(certificates)
    }

    /// Embedded certificates collected into a stack with an optional limit.
    pub fn certificate_stack(&self, limit: Option<usize>) -> Result<CertificateStack> {
        let mut stack = match limit {
            Some(limit) => CertificateStack::with_limit(limit),
            None => CertificateStack::new(),
        };
        for cert in self.certificates()? {
            stack.push(cert)?;
        }
        Ok(stack)
    }

    /// Signer infos in encoded order.
    pub fn signer_infos(&self) -> impl Iterator<Item = &SignerInfo> {
        self.signed_data.signer_infos.0.iter()
    }

    /// Digest algorithm used by the first signer.
    pub fn digest_algorithm(&self) -> Result<&'static AlgorithmDescriptor> {
        let signer = self
            .signer_infos()
            .next()
            .ok_or_else(|| PkiError::parse("SignedData has no signer infos"))?;
        let desc = registry::resolve_by_oid(&signer.digest_alg.oid)?;
        if !desc.is_digest() {
            return Err(PkiError::unsupported_algorithm(format!(
                "{} is not a digest",
                desc.name()
            )));
        }
        Ok(desc)
    }

    /// Signature bytes of the first signer.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signer_infos().next().map(|s| s.signature.as_bytes())
    }
}

/// CMS EnvelopedData.
#[derive(Debug, Clone)]
pub struct EnvelopedMessage {
    enveloped_data: EnvelopedData,
}

impl EnvelopedMessage {
    pub(crate) fn new(enveloped_data: EnvelopedData) -> Self {
        Self { enveloped_data }
    }

    /// Underlying `EnvelopedData`.
    pub fn enveloped_data(&self) -> &EnvelopedData {
        &self.enveloped_data
    }

    /// Recipient infos in encoded order.
    pub fn recipient_infos(&self) -> impl Iterator<Item = &RecipientInfo> {
        self.enveloped_data.recip_infos.0.iter()
    }

    /// Number of recipients.
    pub fn recipient_count(&self) -> usize {
        self.enveloped_data.recip_infos.0.len()
    }

    /// Content-encryption algorithm.
    pub fn content_encryption_algorithm(&self) -> Result<&'static AlgorithmDescriptor> {
        let oid = self.enveloped_data.encrypted_content.content_enc_alg.oid;
        let desc = registry::resolve_by_oid(&oid)?;
        if desc.kind() != registry::AlgorithmKind::BlockCipher {
            return Err(PkiError::unsupported_algorithm(format!(
                "{} is not a content cipher",
                desc.name()
            )));
        }
        Ok(desc)
    }
}

/// Base64-encode `data` and wrap it at `line_length` columns.
fn encode_base64_wrapped(data: &[u8], line_length: usize) -> String {
    let encoded = BASE64_STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / line_length + 1);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % line_length == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out
}

/// Strip PEM armor and decode the base64 body.
fn decode_pem(pem: &str) -> Result<Vec<u8>> {
    let text = pem.trim();
    let label = PEM_LABELS
        .iter()
        .find(|label| text.starts_with(&format!("-----BEGIN {}-----", label)))
        .ok_or_else(|| PkiError::parse("Missing CMS PEM header"))?;

    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);
    let body = text
        .strip_prefix(&begin)
        .and_then(|rest| rest.trim_end().strip_suffix(&end))
        .ok_or_else(|| PkiError::parse(format!("Missing {} PEM footer", label)))?;

    let cleaned: Vec<u8> = body
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64_STANDARD
        .decode(&cleaned)
        .map_err(|e| PkiError::parse(format!("Invalid base64 in PEM body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_wrapping() {
        let data = vec![0u8; 100];
        let wrapped = encode_base64_wrapped(&data, 64);
        let lines: Vec<_> = wrapped.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[..2].iter().all(|l| l.len() == 64));
    }

    #[test]
    fn test_decode_pem_labels() {
        let body = BASE64_STANDARD.encode(b"hello");
        for label in PEM_LABELS {
            let pem = format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n");
            assert_eq!(decode_pem(&pem).unwrap(), b"hello");
        }
    }

    #[test]
    fn test_decode_pem_errors() {
        assert!(decode_pem("garbage").is_err());
        assert!(decode_pem("-----BEGIN CMS-----\naGVsbG8=\n").is_err());
        assert!(decode_pem("-----BEGIN CMS-----\n!!!\n-----END CMS-----").is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            CmsMessage::decode(&[0x30, 0x03, 0x02, 0x01, 0x00]),
            Err(PkiError::Parse(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_content_type() {
        let content_info = ContentInfo {
            content_type: ID_DATA,
            content: Any::encode_from(&OctetString::new(b"x".to_vec()).unwrap()).unwrap(),
        };
        let der = content_info.to_der().unwrap();
        assert!(matches!(CmsMessage::decode(&der), Err(PkiError::Parse(_))));
    }
}
