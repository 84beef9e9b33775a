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

//! SignedData construction and verification.

use std::time::SystemTime;

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::CmsVersion;
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, GeneralizedTime, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode};
use spki::AlgorithmIdentifierOwned;
use tracing::debug;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;

use crate::certificate::{Certificate, CertificateStack};
use crate::chain::verify::{self, VerifyFailure};
use crate::error::{CmsError, PkiError, Result};
use crate::message::{SignedMessage, ID_DATA};
use crate::registry::{self, AlgorithmDescriptor};
use crate::token::{KeyHandle, Signer};

/// contentType attribute (1.2.840.113549.1.9.3)
pub(crate) const ATTR_CONTENT_TYPE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");

/// messageDigest attribute (1.2.840.113549.1.9.4)
pub(crate) const ATTR_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// signingTime attribute (1.2.840.113549.1.9.5)
pub(crate) const ATTR_SIGNING_TIME: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

/// Inputs for one signature.
pub(crate) struct SignRequest<'a> {
    pub content: &'a [u8],
    pub chain: &'a CertificateStack,
    pub key: &'a KeyHandle,
    pub digest: &'static AlgorithmDescriptor,
    pub detached: bool,
    pub signing_time: Option<SystemTime>,
}

/// Signer details recovered from a verified message.
pub(crate) struct VerifiedSigner {
    pub certificate: Certificate,
    pub digest: &'static AlgorithmDescriptor,
    pub signing_time: Option<SystemTime>,
}

/// Build SignedData with one signer info.
///
/// Nothing is returned unless the token produced a signature.
pub(crate) fn build_signed_data<S: Signer + ?Sized>(
    request: &SignRequest<'_>,
    signer: &S,
) -> Result<SignedData> {
    let leaf = request
        .chain
        .leaf()
        .ok_or_else(|| CmsError::encoding("signer chain is empty"))?;

    let signature_algorithm =
        verify::signature_algorithm(request.key.algorithm().key_kind(), request.digest)
            .map_err(|e| PkiError::unsupported_algorithm(failure_message(e)))?;
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: request.digest.oid(),
        parameters: None,
    };

    let message_digest = request.digest.digest(request.content)?;
    let signed_attrs = signed_attributes(&message_digest, request.signing_time)?;
    let to_be_signed = signed_attrs.to_der()?;

    debug!(
        "Signing {} bytes with {} ({})",
        request.content.len(),
        request.key,
        request.digest.name()
    );
    let signature = signer
        .sign(request.key, request.digest, &to_be_signed)
        .map_err(CmsError::from)?;

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: leaf.issuer().clone(),
            serial_number: leaf.as_x509().tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_algorithm.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm,
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };

    let choices: Vec<CertificateChoices> = request
        .chain
        .iter()
        .map(|cert| CertificateChoices::Certificate(cert.as_x509().clone()))
        .collect();

    let econtent = if request.detached {
        None
    } else {
        Some(Any::encode_from(&OctetString::new(request.content)?)?)
    };

    Ok(SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_algorithm])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(choices)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    })
}

fn signed_attributes(
    message_digest: &[u8],
    signing_time: Option<SystemTime>,
) -> Result<SetOfVec<Attribute>> {
    let mut attrs = vec![
        attribute(ATTR_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
        attribute(
            ATTR_MESSAGE_DIGEST,
            Any::encode_from(&OctetString::new(message_digest)?)?,
        )?,
    ];
    if let Some(time) = signing_time {
        attrs.push(attribute(ATTR_SIGNING_TIME, Any::encode_from(&to_time(time)?)?)?);
    }
    Ok(SetOfVec::try_from(attrs)?)
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

/// UTCTime through 2049, GeneralizedTime after.
fn to_time(time: SystemTime) -> Result<Time> {
    match UtcTime::from_system_time(time) {
        Ok(utc) => Ok(Time::UtcTime(utc)),
        Err(_) => Ok(Time::GeneralTime(GeneralizedTime::from_system_time(time)?)),
    }
}

/// Locate the signer certificate among `certificates` by issuer and serial.
pub(crate) fn find_signer<'a>(
    signer_info: &SignerInfo,
    certificates: &'a CertificateStack,
) -> Result<&'a Certificate> {
    let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer_info.sid else {
        return Err(CmsError::UntrustedChain(
            "signer identified by subject key identifier is not supported".into(),
        )
        .into());
    };

    certificates
        .iter()
        .find(|cert| {
            cert.issuer() == &sid.issuer
                && cert.as_x509().tbs_certificate.serial_number == sid.serial_number
        })
        .ok_or_else(|| {
            CmsError::UntrustedChain("signer certificate is not embedded in the message".into())
                .into()
        })
}

/// Check the signer info over `content`.
///
/// Confirms the signed `messageDigest` and `contentType` attributes and the
/// signature itself. Every mismatch is a `SignatureMismatch`.
pub(crate) fn verify_signer_info(
    message: &SignedMessage,
    signer_info: &SignerInfo,
    signer: &Certificate,
    content: &[u8],
) -> Result<VerifiedSigner> {
    let digest = registry::resolve_by_oid(&signer_info.digest_alg.oid)?;
    if !digest.is_digest() {
        return Err(PkiError::unsupported_algorithm(format!(
            "{} is not a digest",
            digest.name()
        )));
    }

    let content_digest = digest.digest(content)?;
    let mut signing_time = None;

    let hashed = match &signer_info.signed_attrs {
        Some(attrs) => {
            let mut digest_seen = false;
            for attr in attrs.iter() {
                let value = single_value(attr)?;
                match attr.oid {
                    oid if oid == ATTR_MESSAGE_DIGEST => {
                        let signed = value
                            .decode_as::<OctetString>()
                            .map_err(|e| CmsError::encoding(e.to_string()))?;
                        if signed.as_bytes() != content_digest.as_slice() {
                            return Err(CmsError::SignatureMismatch(
                                "message digest does not match content".into(),
                            )
                            .into());
                        }
                        digest_seen = true;
                    }
                    oid if oid == ATTR_CONTENT_TYPE => {
                        let content_type = value
                            .decode_as::<ObjectIdentifier>()
                            .map_err(|e| CmsError::encoding(e.to_string()))?;
                        if content_type != message.content_type() {
                            return Err(CmsError::SignatureMismatch(format!(
                                "signed content type {} does not match {}",
                                content_type,
                                message.content_type()
                            ))
                            .into());
                        }
                    }
                    oid if oid == ATTR_SIGNING_TIME => {
                        let time = Time::from_der(&value.to_der()?)
                            .map_err(|e| CmsError::encoding(e.to_string()))?;
                        signing_time = Some(time.to_system_time());
                    }
                    _ => {}
                }
            }
            if !digest_seen {
                return Err(CmsError::SignatureMismatch(
                    "signed attributes lack a message digest".into(),
                )
                .into());
            }
            digest.digest(&attrs.to_der()?)?
        }
        None => content_digest,
    };

    verify::verify_prehash(
        signer.public_key(),
        digest,
        &hashed,
        signer_info.signature.as_bytes(),
    )
    .map_err(|e| match e {
        VerifyFailure::BadSignature => {
            PkiError::from(CmsError::SignatureMismatch("signature does not verify".into()))
        }
        VerifyFailure::Unsupported(msg) => PkiError::unsupported_algorithm(msg),
    })?;

    Ok(VerifiedSigner {
        certificate: signer.clone(),
        digest,
        signing_time,
    })
}

fn single_value(attr: &Attribute) -> Result<&Any> {
    let mut values = attr.values.iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(CmsError::encoding(format!("attribute {} must have one value", attr.oid)).into()),
    }
}

fn failure_message(failure: VerifyFailure) -> String {
    match failure {
        VerifyFailure::Unsupported(msg) => msg,
        VerifyFailure::BadSignature => "bad signature".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signing_time_encoding() {
        let early = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert!(matches!(to_time(early).unwrap(), Time::UtcTime(_)));

        // 2060-01-01
        let late = SystemTime::UNIX_EPOCH + Duration::from_secs(2_840_140_800);
        assert!(matches!(to_time(late).unwrap(), Time::GeneralTime(_)));
    }

    #[test]
    fn test_signed_attributes_are_sorted() {
        let attrs = signed_attributes(&[0u8; 32], Some(SystemTime::now())).unwrap();
        assert_eq!(attrs.len(), 3);

        let der = attrs.to_der().unwrap();
        let reparsed = SetOfVec::<Attribute>::from_der(&der).unwrap();
        assert_eq!(reparsed, attrs);
    }

    #[test]
    fn test_single_value_rejects_multi() {
        let attr = Attribute {
            oid: ATTR_CONTENT_TYPE,
            values: SetOfVec::try_from(vec![
                Any::encode_from(&ID_DATA).unwrap(),
                Any::encode_from(&ATTR_SIGNING_TIME).unwrap(),
            ])
            .unwrap(),
        };
        assert!(single_value(&attr).is_err());
    }
}
