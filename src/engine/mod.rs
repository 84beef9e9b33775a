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

//! CMS engine.
//!
//! Signs, verifies, envelopes and opens CMS messages. Message construction
//! is a state machine driven through [`MessageBuilder`]:
//!
//! ```text
//! Empty -> ContentSet -> SignersAttached    -> Signed
//!                     -> RecipientsAttached -> Enveloped
//! ```
//!
//! A call made out of sequence fails with [`CmsError::InvalidState`]. A call
//! that fails for any other reason leaves the builder in the state it was
//! in, so the caller can retry after fixing the cause (for example after
//! reinserting a removed token).
//!
//! [`CmsEngine`] wraps the builder for the one-shot operations and adds
//! verification and decryption.
//!
//! # Example
//!
//! ```no_run
//! use token_pki::{AlgorithmId, CertificateStack, CmsEngine, PkiConfig, SoftwareToken};
//!
//! # fn example(chain: CertificateStack, token: SoftwareToken) -> token_pki::Result<()> {
//! let engine = CmsEngine::new(PkiConfig::default())?;
//! let key = token.key(b"signing-key")?;
//! let message =
//!     engine.create_signed_message(b"hello", chain, Some(AlgorithmId::SHA256), &token, &key)?;
//! let der = engine.encode(&message)?;
//! # Ok(())
//! # }
//! ```

mod enveloped;
mod signed;

use std::fmt;
use std::time::SystemTime;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::certificate::{Certificate, CertificateStack};
use crate::chain::ChainAssembler;
use crate::config::{CmsConfig, PkiConfig};
use crate::error::{CmsError, Result, ValidationError};
use crate::extensions::{self, PolicyClass, PolicyInfoStack};
use crate::message::{CmsMessage, EnvelopedMessage, SignedMessage};
use crate::registry::{self, AlgorithmDescriptor, AlgorithmId};
use crate::token::{Decryptor, KeyHandle, Signer};

/// Construction state of a [`MessageBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderState {
    /// Nothing set.
    Empty,
    /// Content set, no signer or recipients yet.
    ContentSet,
    /// Signer chain and key attached.
    SignersAttached,
    /// Recipient certificates attached.
    RecipientsAttached,
    /// SignedData produced (terminal).
    Signed,
    /// EnvelopedData produced (terminal).
    Enveloped,
}

impl BuilderState {
    /// Get a string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::ContentSet => "ContentSet",
            Self::SignersAttached => "SignersAttached",
            Self::RecipientsAttached => "RecipientsAttached",
            Self::Signed => "Signed",
            Self::Enveloped => "Enveloped",
        }
    }

    /// Returns true once a message has been produced.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Signed | Self::Enveloped)
    }
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SignerSetup {
    chain: CertificateStack,
    key: KeyHandle,
    digest: &'static AlgorithmDescriptor,
}

struct RecipientSetup {
    recipients: CertificateStack,
    cipher: &'static AlgorithmDescriptor,
}

/// Step-by-step CMS message construction.
pub struct MessageBuilder {
    state: BuilderState,
    options: CmsConfig,
    content: Zeroizing<Vec<u8>>,
    signer: Option<SignerSetup>,
    recipients: Option<RecipientSetup>,
    message: Option<CmsMessage>,
}

impl MessageBuilder {
    /// Create an empty builder.
    pub fn new(options: CmsConfig) -> Self {
        Self {
            state: BuilderState::Empty,
            options,
            content: Zeroizing::new(Vec::new()),
            signer: None,
            recipients: None,
            message: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Set the content to sign or encrypt.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) -> Result<()> {
        self.require_state(BuilderState::Empty)?;
        self.content = Zeroizing::new(content.into());
        self.transition(BuilderState::ContentSet);
        Ok(())
    }

    /// Attach the signer's certificate chain (leaf first) and token key.
    ///
    /// The chain moves into the builder and is embedded in the message.
    pub fn attach_signer(
        &mut self,
        chain: CertificateStack,
        key: KeyHandle,
        digest: AlgorithmId,
    ) -> Result<()> {
        self.require_state(BuilderState::ContentSet)?;
        let digest = registry::resolve_digest(digest)?;
        if chain.is_empty() {
            return Err(ValidationError::EmptyChain.into());
        }

        self.signer = Some(SignerSetup { chain, key, digest });
        self.transition(BuilderState::SignersAttached);
        Ok(())
    }

    /// Attach recipient certificates and the content-encryption cipher.
    pub fn attach_recipients(
        &mut self,
        recipients: CertificateStack,
        cipher: AlgorithmId,
    ) -> Result<()> {
        self.require_state(BuilderState::ContentSet)?;
        let cipher = registry::resolve_cipher(cipher)?;
        enveloped::check_recipients(&recipients)?;

        self.recipients = Some(RecipientSetup { recipients, cipher });
        self.transition(BuilderState::RecipientsAttached);
        Ok(())
    }

    /// Sign with `signer`, stamping the current time.
    pub fn sign<S: Signer + ?Sized>(&mut self, signer: &S) -> Result<()> {
        self.sign_at(signer, SystemTime::now())
    }

    /// Sign with `signer`, stamping `signing_time` if enabled.
    pub fn sign_at<S: Signer + ?Sized>(&mut self, signer: &S, signing_time: SystemTime) -> Result<()> {
        self.require_state(BuilderState::SignersAttached)?;
        let setup = self.signer.as_ref().ok_or(CmsError::InvalidState {
            expected: BuilderState::SignersAttached.as_str(),
            actual: self.state.as_str(),
        })?;

        let request = signed::SignRequest {
            content: &self.content,
            chain: &setup.chain,
            key: &setup.key,
            digest: setup.digest,
            detached: self.options.detached,
            signing_time: self.options.include_signing_time.then_some(signing_time),
        };
        let signed_data = signed::build_signed_data(&request, signer).map_err(|e| {
            warn!("Signing failed, state stays {}: {}", self.state, e);
            e
        })?;

        self.message = Some(CmsMessage::Signed(SignedMessage::new(signed_data)));
        self.signer = None;
        self.transition(BuilderState::Signed);
        Ok(())
    }

    /// Encrypt the content for the attached recipients.
    pub fn envelope(&mut self) -> Result<()> {
        self.require_state(BuilderState::RecipientsAttached)?;
        let setup = self.recipients.as_ref().ok_or(CmsError::InvalidState {
            expected: BuilderState::RecipientsAttached.as_str(),
            actual: self.state.as_str(),
        })?;

        let enveloped_data =
            enveloped::build_enveloped_data(&self.content, &setup.recipients, setup.cipher)?;

        self.message = Some(CmsMessage::Enveloped(EnvelopedMessage::new(enveloped_data)));
        self.recipients = None;
        self.transition(BuilderState::Enveloped);
        Ok(())
    }

    /// The produced message, once terminal.
    pub fn message(&self) -> Option<&CmsMessage> {
        self.message.as_ref()
    }

    /// Consume the builder and return the produced message.
    pub fn into_message(self) -> Result<CmsMessage> {
        let actual = self.state.as_str();
        self.message.ok_or_else(|| {
            CmsError::InvalidState {
                expected: "Signed or Enveloped",
                actual,
            }
            .into()
        })
    }

    fn require_state(&self, expected: BuilderState) -> std::result::Result<(), CmsError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CmsError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn transition(&mut self, next: BuilderState) {
        debug!("CMS builder {} -> {}", self.state, next);
        self.state = next;
    }
}

impl fmt::Debug for MessageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuilder")
            .field("state", &self.state)
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Result of a successful signature verification.
#[derive(Debug, Clone)]
pub struct VerifiedContent {
    /// Signed content.
    pub content: Vec<u8>,
    /// Validated chain, signer first, ending at a trust anchor.
    pub chain: CertificateStack,
    /// Digest algorithm the signer used.
    pub digest: &'static AlgorithmDescriptor,
    /// Signed `signingTime`, if present.
    pub signing_time: Option<SystemTime>,
    /// Certificate policies asserted by the signer certificate.
    pub policies: PolicyInfoStack,
}

impl VerifiedContent {
    /// Signer certificate.
    pub fn signer(&self) -> Option<&Certificate> {
        self.chain.leaf()
    }

    /// Highest signature tool class asserted by the signer's policies.
    pub fn policy_class(&self) -> Option<PolicyClass> {
        self.policies
            .iter()
            .filter_map(|p| p.class())
            .max_by_key(|c| c.assurance_level())
    }
}

/// CMS engine.
#[derive(Debug, Clone)]
pub struct CmsEngine {
    config: PkiConfig,
    assembler: ChainAssembler,
}

impl CmsEngine {
    /// Create an engine from a validated configuration.
    pub fn new(config: PkiConfig) -> Result<Self> {
        config.validate()?;
        let assembler = ChainAssembler::with_config(config.chain.clone());
        Ok(Self { config, assembler })
    }

    /// Engine configuration.
    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Chain assembler used for verification.
    pub fn assembler(&self) -> &ChainAssembler {
        &self.assembler
    }

    /// Start a message with this engine's CMS options.
    pub fn builder(&self) -> MessageBuilder {
        MessageBuilder::new(self.config.cms.clone())
    }

    /// Sign `content` with the token key behind `key`.
    ///
    /// The whole `signer_chain` (leaf first) is embedded so recipients can
    /// build the path to their own trust anchors. Without a `digest` the
    /// configured `cms.default_digest` is used.
    pub fn create_signed_message<S: Signer + ?Sized>(
        &self,
        content: &[u8],
        signer_chain: CertificateStack,
        digest: Option<AlgorithmId>,
        signer: &S,
        key: &KeyHandle,
    ) -> Result<CmsMessage> {
        let digest = digest.unwrap_or_else(|| self.config.cms.default_digest());
        let mut builder = self.builder();
        builder.set_content(content)?;
        builder.attach_signer(signer_chain, key.clone(), digest)?;
        builder.sign(signer)?;
        info!("Created signed message ({} bytes)", content.len());
        builder.into_message()
    }

    /// Verify a message with embedded content.
    ///
    /// The signature is checked before the chain, so a tampered message
    /// reports `SignatureMismatch` even when its chain is also untrusted.
    pub fn verify_signed_message(
        &self,
        message: &CmsMessage,
        trust_anchors: &[Certificate],
        time: SystemTime,
    ) -> Result<VerifiedContent> {
        let signed = signed_message(message)?;
        let content = signed.content()?.ok_or_else(|| {
            CmsError::encoding("message is detached; supply the content to verify_detached")
        })?;
        self.verify(signed, content, trust_anchors, time)
    }

    /// Verify a detached signature over `content`.
    pub fn verify_detached(
        &self,
        message: &CmsMessage,
        content: &[u8],
        trust_anchors: &[Certificate],
        time: SystemTime,
    ) -> Result<VerifiedContent> {
        let signed = signed_message(message)?;
        if !signed.is_detached() {
            debug!("Verifying embedded-content message against caller content");
        }
        self.verify(signed, content.to_vec(), trust_anchors, time)
    }

    fn verify(
        &self,
        message: &SignedMessage,
        content: Vec<u8>,
        trust_anchors: &[Certificate],
        time: SystemTime,
    ) -> Result<VerifiedContent> {
        let certificates = message.certificate_stack(self.config.stack.max_items)?;
        let signer_info = message
            .signer_infos()
            .next()
            .ok_or_else(|| CmsError::encoding("SignedData has no signer infos"))?;
        let signer_cert = signed::find_signer(signer_info, &certificates)?;
        debug!("Verifying signature by {}", signer_cert.subject_string());

        let verified = signed::verify_signer_info(message, signer_info, signer_cert, &content)?;

        if !verified.certificate.is_valid_at(time) {
            warn!(
                "Signer {} is outside its validity window",
                verified.certificate.subject_string()
            );
            return Err(CmsError::ExpiredAtVerificationTime.into());
        }

        let pool: Vec<Certificate> = certificates.into_items();
        let chain = self
            .assembler
            .build_chain_at(&verified.certificate, &pool, trust_anchors, time)
            .map_err(|e| CmsError::UntrustedChain(e.to_string()))?;
        self.assembler
            .validate_chain(&chain, time)
            .map_err(|e| CmsError::UntrustedChain(e.to_string()))?;

        let policies = extensions::extract_policies(&verified.certificate)?;
        info!(
            "Verified signature by {} over {} bytes",
            verified.certificate.subject_string(),
            content.len()
        );

        Ok(VerifiedContent {
            content,
            chain,
            digest: verified.digest,
            signing_time: verified.signing_time,
            policies,
        })
    }

    /// Encrypt `content` for `recipients`.
    ///
    /// Without a `cipher` the configured `cms.default_cipher` is used.
    pub fn create_enveloped_message(
        &self,
        content: &[u8],
        recipients: CertificateStack,
        cipher: Option<AlgorithmId>,
    ) -> Result<CmsMessage> {
        let cipher = cipher.unwrap_or_else(|| self.config.cms.default_cipher());
        let mut builder = self.builder();
        builder.set_content(content)?;
        builder.attach_recipients(recipients, cipher)?;
        builder.envelope()?;
        builder.into_message()
    }

    /// Decrypt a message addressed to `recipient` using its token key.
    pub fn open_enveloped_message<D: Decryptor + ?Sized>(
        &self,
        message: &CmsMessage,
        recipient: &Certificate,
        decryptor: &D,
        key: &KeyHandle,
    ) -> Result<Vec<u8>> {
        let enveloped = message.as_enveloped().ok_or(CmsError::InvalidState {
            expected: BuilderState::Enveloped.as_str(),
            actual: BuilderState::Signed.as_str(),
        })?;
        let content = enveloped::open_enveloped_data(enveloped, recipient, decryptor, key)?;
        info!(
            "Opened enveloped message for {}",
            recipient.subject_string()
        );
        Ok(content)
    }

    /// Encode as DER.
    pub fn encode(&self, message: &CmsMessage) -> Result<Vec<u8>> {
        message.encode()
    }

    /// Decode from DER.
    pub fn decode(&self, der: &[u8]) -> Result<CmsMessage> {
        CmsMessage::decode(der)
    }

    /// Encode as PEM using the configured line width.
    pub fn to_pem(&self, message: &CmsMessage) -> Result<String> {
        message.to_pem(self.config.cms.pem_line_width)
    }

    /// Decode from PEM.
    pub fn from_pem(&self, pem: &str) -> Result<CmsMessage> {
        CmsMessage::from_pem(pem)
    }
}

impl Default for CmsEngine {
    fn default() -> Self {
        let config = PkiConfig::default();
        Self {
            assembler: ChainAssembler::with_config(config.chain.clone()),
            config,
        }
    }
}

fn signed_message(message: &CmsMessage) -> Result<&SignedMessage> {
    message.as_signed().ok_or_else(|| {
        CmsError::InvalidState {
            expected: BuilderState::Signed.as_str(),
            actual: BuilderState::Enveloped.as_str(),
        }
        .into()
    })
}
