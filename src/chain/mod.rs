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

//! Certificate chain assembly and validation.
//!
//! [`ChainAssembler::build_chain`] orders certificates from a leaf up to a
//! trust anchor by matching each certificate's issuer name against the
//! subjects of a candidate pool. [`ChainAssembler::validate_chain`] then
//! checks signatures, validity windows and basic constraints along the
//! assembled path.
//!
//! # Example
//!
//! ```no_run
//! use std::time::SystemTime;
//! use token_pki::certificate::Certificate;
//! use token_pki::chain::ChainAssembler;
//!
//! # fn example(leaf: Certificate, pool: Vec<Certificate>, roots: Vec<Certificate>)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let assembler = ChainAssembler::new();
//! let chain = assembler.build_chain(&leaf, &pool, &roots)?;
//! assembler.validate_chain(&chain, SystemTime::now())?;
//! # Ok(())
//! # }
//! ```

pub mod verify;

use crate::certificate::{Certificate, CertificateStack};
use crate::config::ChainConfig;
use crate::error::{ChainBuildError, StackError, ValidationError};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Builds and validates certificate chains.
#[derive(Debug, Clone, Default)]
pub struct ChainAssembler {
    config: ChainConfig,
}

impl ChainAssembler {
    /// Create an assembler with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler with custom settings.
    pub fn with_config(config: ChainConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Build a chain from `leaf` to one of `anchors`, evaluated now.
    pub fn build_chain(
        &self,
        leaf: &Certificate,
        pool: &[Certificate],
        anchors: &[Certificate],
    ) -> Result<CertificateStack, ChainBuildError> {
        self.build_chain_at(leaf, pool, anchors, SystemTime::now())
    }

    /// Build a chain from `leaf` to one of `anchors`.
    ///
    /// Candidates are drawn from `pool` and `anchors` together. When several
    /// candidates share the wanted subject, certificates valid at `time` are
    /// preferred, then the latest `notBefore`, then the lowest DER encoding.
    /// The returned stack is ordered leaf first and ends with an anchor.
    pub fn build_chain_at(
        &self,
        leaf: &Certificate,
        pool: &[Certificate],
        anchors: &[Certificate],
        time: SystemTime,
    ) -> Result<CertificateStack, ChainBuildError> {
        debug!(
            "Building chain for {} ({} candidates, {} anchors)",
            leaf.subject_string(),
            pool.len(),
            anchors.len()
        );

        let mut candidates: Vec<&Certificate> = Vec::with_capacity(pool.len() + anchors.len());
        for cert in pool.iter().chain(anchors) {
            if !candidates.iter().any(|c| *c == cert) {
                candidates.push(cert);
            }
        }

        let mut chain = CertificateStack::new();
        let mut current = leaf.clone();

        loop {
            if chain.len() >= self.config.max_chain_length {
                warn!(
                    "Chain for {} exceeds {} certificates",
                    leaf.subject_string(),
                    self.config.max_chain_length
                );
                return Err(ChainBuildError::PathTooLong {
                    max: self.config.max_chain_length,
                });
            }

            let reached_anchor = anchors.contains(&current);
            let self_issued = current.is_self_issued();
            let subject = current.subject_string();
            chain.push(current).map_err(|e| match e {
                StackError::DuplicateCertificate { .. } => ChainBuildError::Cycle {
                    subject: subject.clone(),
                },
                _ => ChainBuildError::Incomplete {
                    subject: subject.clone(),
                },
            })?;

            if reached_anchor {
                debug!("Reached trust anchor {} at depth {}", subject, chain.len() - 1);
                return Ok(chain);
            }
            if self_issued {
                debug!("Self-issued certificate {} is not a trust anchor", subject);
                return Err(ChainBuildError::Incomplete { subject });
            }

            current = self.select_issuer(&chain, &candidates, time)?.clone();
            debug!("Selected issuer {}", current.subject_string());
        }
    }

    fn select_issuer<'a>(
        &self,
        chain: &CertificateStack,
        candidates: &[&'a Certificate],
        time: SystemTime,
    ) -> Result<&'a Certificate, ChainBuildError> {
        let Some(last) = chain.iter().last() else {
            return Err(ChainBuildError::Incomplete {
                subject: String::new(),
            });
        };

        // Any repeated subject is a loop, even across distinct cross-certificates
        if chain.iter().any(|c| c.subject() == last.issuer()) {
            return Err(ChainBuildError::Cycle {
                subject: last.issuer_string(),
            });
        }

        let mut matching: Vec<&Certificate> = candidates
            .iter()
            .copied()
            .filter(|c| c.subject() == last.issuer())
            .collect();

        if matching.is_empty() {
            return Err(ChainBuildError::Incomplete {
                subject: last.subject_string(),
            });
        }

        let prefer_valid = self.config.prefer_valid_candidates;
        matching.sort_by(|a, b| {
            let valid = if prefer_valid {
                b.is_valid_at(time).cmp(&a.is_valid_at(time))
            } else {
                std::cmp::Ordering::Equal
            };
            valid
                .then_with(|| b.not_before().cmp(&a.not_before()))
                .then_with(|| a.der().cmp(b.der()))
        });

        let chosen = matching[0];
        if !chosen.is_valid_at(time) {
            return Err(ChainBuildError::ValidityExpired {
                subject: chosen.subject_string(),
            });
        }
        Ok(chosen)
    }

    /// Validate an assembled chain at `time`.
    ///
    /// Each certificate's signature must verify against the next
    /// certificate's key; a self-issued final certificate is checked against
    /// its own key. Every certificate must be within its validity window and
    /// every issuer must be a CA permitted to sign certificates whose path
    /// length constraint covers the CAs below it.
    pub fn validate_chain(
        &self,
        chain: &CertificateStack,
        time: SystemTime,
    ) -> Result<(), ValidationError> {
        if chain.is_empty() {
            return Err(ValidationError::EmptyChain);
        }

        let certs: Vec<&Certificate> = chain.iter().collect();
        for (i, cert) in certs.iter().enumerate() {
            debug!("Validating certificate {}/{}", i + 1, certs.len());

            let issuer = match certs.get(i + 1) {
                Some(next) => Some(*next),
                None if cert.is_self_issued() => Some(*cert),
                None => None,
            };
            if let Some(issuer) = issuer {
                verify::verify_certificate(cert, issuer.public_key()).map_err(|e| match e {
                    verify::VerifyFailure::BadSignature => {
                        ValidationError::SignatureInvalid { position: i }
                    }
                    verify::VerifyFailure::Unsupported(reason) => {
                        ValidationError::UnsupportedSignatureAlgorithm {
                            position: i,
                            oid: format!(
                                "{} ({})",
                                cert.as_x509().signature_algorithm.oid,
                                reason
                            ),
                        }
                    }
                })?;
            }

            if time < cert.not_before() {
                return Err(ValidationError::NotYetValid { position: i });
            }
            if time > cert.not_after() {
                return Err(ValidationError::Expired { position: i });
            }

            if i > 0 {
                check_issuer_constraints(cert, i)?;
            }
        }

        debug!("Chain of {} certificates is valid", certs.len());
        Ok(())
    }
}

fn check_issuer_constraints(cert: &Certificate, position: usize) -> Result<(), ValidationError> {
    let constraints = cert
        .basic_constraints()
        .map_err(|_| ValidationError::MalformedExtension {
            position,
            extension: "basicConstraints",
        })?
        .filter(|bc| bc.ca)
        .ok_or(ValidationError::NotCa { position })?;

    // CAs strictly between this issuer and the leaf
    let cas_below = position - 1;
    if let Some(limit) = constraints.path_len_constraint {
        if cas_below > usize::from(limit) {
            return Err(ValidationError::PathLengthExceeded { position, limit });
        }
    }

    let usage = cert
        .key_usage()
        .map_err(|_| ValidationError::MalformedExtension {
            position,
            extension: "keyUsage",
        })?;
    if let Some(usage) = usage {
        if !usage.key_cert_sign() {
            return Err(ValidationError::KeyUsageViolation { position });
        }
    }

    Ok(())
}
