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

//! EnvelopedData construction and opening.
//!
//! Content is encrypted locally with a fresh content-encryption key (CEK)
//! which is wrapped for every recipient with RSA PKCS#1 v1.5. Opening asks a
//! [`Decryptor`] to unwrap the CEK so the recipient's private key stays on
//! its token.

use cms::cert::IssuerAndSerialNumber;
use cms::content_info::CmsVersion;
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use der::asn1::{Any, OctetString, SetOfVec};
use der::Encode;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use spki::AlgorithmIdentifierOwned;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::certificate::{Certificate, CertificateStack};
use crate::chain::verify::{self, KeyKind};
use crate::error::{CmsError, PkiError, Result};
use crate::message::{EnvelopedMessage, ID_DATA};
use crate::registry::{self, AlgorithmDescriptor, AlgorithmId, AlgorithmKind};
use crate::token::{Decryptor, KeyHandle};

/// Fail early if any recipient cannot receive a wrapped key.
pub(crate) fn check_recipients(recipients: &CertificateStack) -> Result<()> {
    if recipients.is_empty() {
        return Err(CmsError::encoding("at least one recipient is required").into());
    }
    for cert in recipients {
        match verify::key_kind(cert.public_key()) {
            Ok(KeyKind::Rsa) => {}
            _ => {
                return Err(CmsError::UnsupportedRecipientKey(format!(
                    "{} does not hold an RSA key",
                    cert.subject_string()
                ))
                .into())
            }
        }
    }
    Ok(())
}

/// Encrypt `content` for every certificate in `recipients`.
pub(crate) fn build_enveloped_data(
    content: &[u8],
    recipients: &CertificateStack,
    cipher: &'static AlgorithmDescriptor,
) -> Result<EnvelopedData> {
    check_recipients(recipients)?;
    let key_transport = registry::resolve_key_transport(AlgorithmId::RSA_ENCRYPTION)?;

    let mut rng = rand::thread_rng();
    let mut cek = Zeroizing::new(vec![0u8; cipher.key_size()]);
    rng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; cipher.block_size()];
    rng.fill_bytes(&mut iv);

    let mut recipient_infos = Vec::with_capacity(recipients.len());
    for cert in recipients {
        let spki_der = cert.public_key().to_der()?;
        let public_key = RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| {
            CmsError::UnsupportedRecipientKey(format!("{}: {}", cert.subject_string(), e))
        })?;
        let wrapped = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, &cek)
            .map_err(|e| CmsError::encoding(format!("key wrap failed: {}", e)))?;

        recipient_infos.push(RecipientInfo::Ktri(KeyTransRecipientInfo {
            version: CmsVersion::V0,
            rid: recipient_id(cert),
            key_enc_alg: AlgorithmIdentifierOwned {
                oid: key_transport.oid(),
                parameters: Some(Any::null()),
            },
            enc_key: OctetString::new(wrapped)?,
        }));
    }

    let ciphertext = cipher.encrypt(&cek, &iv, content)?;
    debug!(
        "Enveloped {} bytes with {} for {} recipient(s)",
        content.len(),
        cipher.name(),
        recipient_infos.len()
    );

    Ok(EnvelopedData {
        version: CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos(SetOfVec::try_from(recipient_infos)?),
        encrypted_content: EncryptedContentInfo {
            content_type: ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: cipher.oid(),
                parameters: Some(Any::encode_from(&OctetString::new(iv)?)?),
            },
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    })
}

/// Decrypt an enveloped message addressed to `recipient`.
pub(crate) fn open_enveloped_data<D: Decryptor + ?Sized>(
    message: &EnvelopedMessage,
    recipient: &Certificate,
    decryptor: &D,
    key: &KeyHandle,
) -> Result<Vec<u8>> {
    let wanted = recipient_id(recipient);
    let ktri = message
        .recipient_infos()
        .find_map(|info| match info {
            RecipientInfo::Ktri(ktri) if ktri.rid == wanted => Some(ktri),
            _ => None,
        })
        .ok_or(CmsError::NoMatchingRecipient)?;

    let key_transport = registry::resolve_by_oid(&ktri.key_enc_alg.oid)?;
    if key_transport.kind() != AlgorithmKind::KeyTransport {
        return Err(PkiError::unsupported_algorithm(format!(
            "{} is not a key transport algorithm",
            key_transport.name()
        )));
    }

    let cipher = message.content_encryption_algorithm()?;
    let encrypted = &message.enveloped_data().encrypted_content;
    let iv = encrypted
        .content_enc_alg
        .parameters
        .as_ref()
        .ok_or_else(|| CmsError::encoding("content encryption algorithm has no IV"))?
        .decode_as::<OctetString>()
        .map_err(|e| CmsError::encoding(format!("invalid IV: {}", e)))?;
    let ciphertext = encrypted
        .encrypted_content
        .as_ref()
        .ok_or_else(|| CmsError::encoding("encrypted content is not embedded"))?;

    let cek = Zeroizing::new(
        decryptor
            .decrypt(key, key_transport, ktri.enc_key.as_bytes())
            .map_err(CmsError::from)?,
    );

    cipher
        .decrypt(&cek, iv.as_bytes(), ciphertext.as_bytes())
        .map_err(|e| {
            warn!("Content decryption failed for {}", recipient.subject_string());
            e
        })
}

fn recipient_id(cert: &Certificate) -> RecipientIdentifier {
    RecipientIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: cert.issuer().clone(),
        serial_number: cert.as_x509().tbs_certificate.serial_number.clone(),
    })
}
