// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Test fixture generator
//!
//! Mints real certificate hierarchies with rcgen and loads the matching
//! private keys into a `SoftwareToken`.

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls_pki_types::PrivatePkcs8KeyDer;
use token_pki::extensions::{build_policy_extension, PolicyClass, PolicyInfoStack};
use token_pki::{Certificate, CertificateStack, KeyHandle, SoftwareToken};

/// Key id of the leaf signing key on the fixture token.
pub const SIGNER_KEY_ID: &[u8] = b"signer";

/// Key id of the RSA recipient key on the fixture token.
pub const RECIPIENT_KEY_ID: &[u8] = b"recipient";

/// Certificate plus the rcgen state needed to issue from it.
pub struct Identity {
    pub cert: Certificate,
    pub rc: rcgen::Certificate,
    pub key: KeyPair,
}

impl Identity {
    pub fn pkcs8(&self) -> Vec<u8> {
        self.key.serialize_der()
    }
}

/// Options for one generated certificate.
pub struct Profile<'a> {
    pub cn: &'a str,
    pub ca: Option<BasicConstraints>,
    pub key_usages: Vec<KeyUsagePurpose>,
    pub validity: Option<((i32, u8, u8), (i32, u8, u8))>,
    pub policy: Option<PolicyClass>,
    pub extra: Vec<CustomExtension>,
    pub key: Option<KeyPair>,
}

impl<'a> Profile<'a> {
    pub fn leaf(cn: &'a str) -> Self {
        Self {
            cn,
            ca: None,
            key_usages: vec![KeyUsagePurpose::DigitalSignature],
            validity: None,
            policy: None,
            extra: Vec::new(),
            key: None,
        }
    }

    pub fn ca(cn: &'a str) -> Self {
        Self {
            cn,
            ca: Some(BasicConstraints::Unconstrained),
            key_usages: vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign],
            validity: None,
            policy: None,
            extra: Vec::new(),
            key: None,
        }
    }

    pub fn valid(mut self, from: (i32, u8, u8), to: (i32, u8, u8)) -> Self {
        self.validity = Some((from, to));
        self
    }

    pub fn path_len(mut self, len: u8) -> Self {
        self.ca = Some(BasicConstraints::Constrained(len));
        self
    }

    pub fn policy(mut self, class: PolicyClass) -> Self {
        self.policy = Some(class);
        self
    }

    /// Add a raw extension, encoded exactly as given.
    pub fn raw_extension(mut self, oid: &[u64], value: Vec<u8>, critical: bool) -> Self {
        let mut ext = CustomExtension::from_oid_content(oid, value);
        ext.set_criticality(critical);
        self.extra.push(ext);
        self
    }

    pub fn with_key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(DnType::CommonName, self.cn);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Token PKI Test");
        if let Some(bc) = &self.ca {
            params.is_ca = IsCa::Ca(bc.clone());
        }
        params.key_usages = self.key_usages.clone();
        if let Some(((y1, m1, d1), (y2, m2, d2))) = self.validity {
            params.not_before = rcgen::date_time_ymd(y1, m1, d1);
            params.not_after = rcgen::date_time_ymd(y2, m2, d2);
        }
        if let Some(class) = self.policy {
            let policies: PolicyInfoStack = vec![class.policy_info()].into();
            let ext = build_policy_extension(&policies).unwrap();
            params
                .custom_extensions
                .push(CustomExtension::from_oid_content(
                    &[2, 5, 29, 32],
                    ext.value().to_vec(),
                ));
        }
        params.custom_extensions.extend(self.extra.iter().cloned());
        params
    }
}

/// Self-signed certificate.
pub fn self_signed(profile: Profile<'_>) -> Identity {
    let params = profile.params();
    let key = profile.key.unwrap_or_else(|| KeyPair::generate().unwrap());
    let rc = params.self_signed(&key).unwrap();
    Identity {
        cert: Certificate::from_der(rc.der()).unwrap(),
        rc,
        key,
    }
}

/// Certificate issued by `issuer`.
pub fn issued(profile: Profile<'_>, issuer: &Identity) -> Identity {
    let params = profile.params();
    let key = profile.key.unwrap_or_else(|| KeyPair::generate().unwrap());
    let rc = params.signed_by(&key, &issuer.rc, &issuer.key).unwrap();
    Identity {
        cert: Certificate::from_der(rc.der()).unwrap(),
        rc,
        key,
    }
}

/// RSA-2048 key pair usable by both rcgen and the software token.
///
/// Generated once per test binary.
pub fn rsa_key() -> KeyPair {
    static PKCS8: OnceLock<Vec<u8>> = OnceLock::new();
    let der = PKCS8.get_or_init(|| {
        use rsa::pkcs8::EncodePrivateKey;
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        key.to_pkcs8_der().unwrap().as_bytes().to_vec()
    });
    KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(der.clone()),
        &rcgen::PKCS_RSA_SHA256,
    )
    .unwrap()
}

/// Root, intermediate and leaf, with the leaf key on a software token.
pub struct Hierarchy {
    pub root: Identity,
    pub intermediate: Identity,
    pub leaf: Identity,
    pub token: SoftwareToken,
    pub key: KeyHandle,
}

impl Hierarchy {
    /// Leaf valid 2024-01-01 to 2034-01-01, asserting class KC1.
    pub fn new() -> Self {
        let root = self_signed(Profile::ca("Test Root CA"));
        let intermediate = issued(Profile::ca("Test Issuing CA").path_len(0), &root);
        let leaf = issued(
            Profile::leaf("Test Signer")
                .valid((2024, 1, 1), (2034, 1, 1))
                .policy(PolicyClass::Kc1),
            &intermediate,
        );

        let token = SoftwareToken::new();
        let key = token
            .import_pkcs8(SIGNER_KEY_ID, Some("Test Signer"), &leaf.pkcs8())
            .unwrap();
        token.import_certificate(SIGNER_KEY_ID, leaf.cert.clone());

        Self {
            root,
            intermediate,
            leaf,
            token,
            key,
        }
    }

    /// `[leaf, intermediate, root]`
    pub fn chain(&self) -> CertificateStack {
        CertificateStack::from_certificates(vec![
            self.leaf.cert.clone(),
            self.intermediate.cert.clone(),
            self.root.cert.clone(),
        ])
        .unwrap()
    }

    pub fn anchors(&self) -> Vec<Certificate> {
        vec![self.root.cert.clone()]
    }

    /// A moment inside every certificate's validity window.
    pub fn now(&self) -> SystemTime {
        self.leaf.cert.not_before() + Duration::from_secs(86_400)
    }
}

/// RSA recipient certificate with its key on `token`.
pub fn recipient(cn: &str, token: &SoftwareToken, key_id: &[u8]) -> (Identity, KeyHandle) {
    let key = rsa_key();
    let pkcs8 = key.serialize_der();
    let identity = self_signed(
        Profile::leaf(cn)
            .with_key(key)
            .policy(PolicyClass::Kc2),
    );
    let handle = token.import_pkcs8(key_id, Some(cn), &pkcs8).unwrap();
    token.import_certificate(key_id, identity.cert.clone());
    (identity, handle)
}
