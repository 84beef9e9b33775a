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

//! Certificate policies extension (RFC 5280 section 4.2.1.4).
//!
//! # Signature Tool Classes
//!
//! Certificates issued for qualified electronic signatures carry one of the
//! following policy OIDs naming the protection class of the signing tool:
//!
//! | Class | OID | Level |
//! |-------|-----|-------|
//! | KC1 | 1.2.643.100.113.1 | 1 |
//! | KC2 | 1.2.643.100.113.2 | 2 |
//! | KC3 | 1.2.643.100.113.3 | 3 |
//! | KB1 | 1.2.643.100.113.4 | 4 |
//! | KB2 | 1.2.643.100.113.5 | 5 |
//! | KA1 | 1.2.643.100.113.6 | 6 |

use super::Extension;
use crate::certificate::Certificate;
use crate::error::{PkiError, Result};
use crate::stack::ObjectStack;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5String};
use der::{Decode, Encode};
use std::fmt;
use tracing::debug;
use x509_cert::ext::pkix::certpolicy::{PolicyInformation, PolicyQualifierInfo};
use x509_cert::ext::pkix::CertificatePolicies;

/// Certificate policies extension OID (2.5.29.32)
pub const CERTIFICATE_POLICIES_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.32");

/// anyPolicy (2.5.29.32.0)
pub const ANY_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.32.0");

/// CPS pointer qualifier (1.3.6.1.5.5.7.2.1)
pub const CPS_QUALIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.2.1");

/// Signature tool class KC1
pub const CLASS_KC1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.1");

/// Signature tool class KC2
pub const CLASS_KC2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.2");

/// Signature tool class KC3
pub const CLASS_KC3: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.3");

/// Signature tool class KB1
pub const CLASS_KB1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.4");

/// Signature tool class KB2
pub const CLASS_KB2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.5");

/// Signature tool class KA1
pub const CLASS_KA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.100.113.6");

/// One policy qualifier: its OID and the DER-encoded qualifier, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyQualifier {
    /// Qualifier type OID.
    pub oid: ObjectIdentifier,
    /// Encoded qualifier value.
    pub value: Option<Any>,
}

/// A policy identifier with optional qualifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInfo {
    oid: ObjectIdentifier,
    qualifiers: Vec<PolicyQualifier>,
}

impl PolicyInfo {
    /// Create a policy without qualifiers.
    pub fn new(oid: ObjectIdentifier) -> Self {
        Self {
            oid,
            qualifiers: Vec::new(),
        }
    }

    /// Add a CPS URI qualifier.
    pub fn with_cps_uri(mut self, uri: &str) -> Result<Self> {
        let value = Any::encode_from(&Ia5String::new(uri)?)?;
        self.qualifiers.push(PolicyQualifier {
            oid: CPS_QUALIFIER,
            value: Some(value),
        });
        Ok(self)
    }

    /// Add an arbitrary qualifier.
    pub fn with_qualifier(mut self, qualifier: PolicyQualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    /// Policy OID.
    pub fn oid(&self) -> ObjectIdentifier {
        self.oid
    }

    /// Qualifiers in encoding order.
    pub fn qualifiers(&self) -> &[PolicyQualifier] {
        &self.qualifiers
    }

    /// CPS URIs among the qualifiers.
    pub fn cps_uris(&self) -> Vec<String> {
        self.qualifiers
            .iter()
            .filter(|q| q.oid == CPS_QUALIFIER)
            .filter_map(|q| q.value.as_ref())
            .filter_map(|v| v.decode_as::<Ia5String>().ok())
            .map(|s| s.to_string())
            .collect()
    }

    /// Known signature tool class for this policy, if any.
    pub fn class(&self) -> Option<PolicyClass> {
        PolicyClass::from_oid(&self.oid)
    }

    fn from_x509(info: &PolicyInformation) -> Self {
        let qualifiers = info
            .policy_qualifiers
            .iter()
            .flatten()
            .map(|q| PolicyQualifier {
                oid: q.policy_qualifier_id,
                value: q.qualifier.clone(),
            })
            .collect();
        Self {
            oid: info.policy_identifier,
            qualifiers,
        }
    }

    fn to_x509(&self) -> PolicyInformation {
        let qualifiers: Vec<PolicyQualifierInfo> = self
            .qualifiers
            .iter()
            .map(|q| PolicyQualifierInfo {
                policy_qualifier_id: q.oid,
                qualifier: q.value.clone(),
            })
            .collect();
        PolicyInformation {
            policy_identifier: self.oid,
            policy_qualifiers: if qualifiers.is_empty() {
                None
            } else {
                Some(qualifiers)
            },
        }
    }
}

/// Policies in extension order. Built in one step with
/// [`ObjectStack::from_vec`], which takes ownership of every entry.
pub type PolicyInfoStack = ObjectStack<PolicyInfo>;

/// Parse the certificate policies extension of `cert`.
///
/// Returns an empty stack when the extension is absent.
pub fn extract_policies(cert: &Certificate) -> Result<PolicyInfoStack> {
    let Some(ext) = cert
        .extensions()
        .iter()
        .find(|ext| ext.extn_id == CERTIFICATE_POLICIES_OID)
    else {
        return Ok(PolicyInfoStack::new());
    };

    let policies = CertificatePolicies::from_der(ext.extn_value.as_bytes())
        .map_err(|e| PkiError::parse(format!("Invalid certificate policies: {}", e)))?;
    debug!(
        "Found {} certificate policies in {}",
        policies.0.len(),
        cert.subject_string()
    );

    Ok(policies.0.iter().map(PolicyInfo::from_x509).collect())
}

/// Encode a non-critical certificate policies extension.
///
/// Policies are encoded in stack order.
pub fn build_policy_extension(policies: &PolicyInfoStack) -> Result<Extension> {
    if policies.is_empty() {
        return Err(PkiError::parse(
            "certificate policies must contain at least one policy",
        ));
    }
    let encoded = CertificatePolicies(policies.iter().map(PolicyInfo::to_x509).collect());
    Ok(Extension::new(
        CERTIFICATE_POLICIES_OID,
        false,
        encoded.to_der()?,
    ))
}

/// Signature tool protection classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyClass {
    /// anyPolicy
    AnyPolicy,
    /// KC1
    Kc1,
    /// KC2
    Kc2,
    /// KC3
    Kc3,
    /// KB1
    Kb1,
    /// KB2
    Kb2,
    /// KA1
    Ka1,
}

impl PolicyClass {
    /// Policy OID for this class.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::AnyPolicy => ANY_POLICY,
            Self::Kc1 => CLASS_KC1,
            Self::Kc2 => CLASS_KC2,
            Self::Kc3 => CLASS_KC3,
            Self::Kb1 => CLASS_KB1,
            Self::Kb2 => CLASS_KB2,
            Self::Ka1 => CLASS_KA1,
        }
    }

    /// Look up a class by policy OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            Self::AnyPolicy,
            Self::Kc1,
            Self::Kc2,
            Self::Kc3,
            Self::Kb1,
            Self::Kb2,
            Self::Ka1,
        ]
        .into_iter()
        .find(|class| class.oid() == *oid)
    }

    /// Assurance level (0 for anyPolicy, higher is stronger).
    pub fn assurance_level(&self) -> u8 {
        match self {
            Self::AnyPolicy => 0,
            Self::Kc1 => 1,
            Self::Kc2 => 2,
            Self::Kc3 => 3,
            Self::Kb1 => 4,
            Self::Kb2 => 5,
            Self::Ka1 => 6,
        }
    }

    /// Returns true if the class requires a hardware signing tool.
    pub fn requires_hardware(&self) -> bool {
        self.assurance_level() >= 2
    }

    /// Policy instance for this class.
    pub fn policy_info(&self) -> PolicyInfo {
        PolicyInfo::new(self.oid())
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AnyPolicy => "anyPolicy",
            Self::Kc1 => "KC1",
            Self::Kc2 => "KC2",
            Self::Kc3 => "KC3",
            Self::Kb1 => "KB1",
            Self::Kb2 => "KB2",
            Self::Ka1 => "KA1",
        };
        write!(f, "{}", name)
    }
}

/// Highest signature tool class asserted by `cert`.
pub fn highest_policy_class(cert: &Certificate) -> Result<Option<PolicyClass>> {
    Ok(extract_policies(cert)?
        .iter()
        .filter_map(PolicyInfo::class)
        .max())
}
