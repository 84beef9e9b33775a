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

//! Configuration for the PKI core.
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration. Configuration can also be assembled in code with
//! [`PkiConfig::builder`].
//!
//! ```toml
//! [chain]
//! max_chain_length = 6
//!
//! [token]
//! lock_timeout_ms = 5000
//!
//! [cms]
//! default_digest = 673 # SHA-384
//! detached = true
//! ```

use crate::error::{PkiError, Result};
use crate::registry::{self, AlgorithmId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PkiConfig {
    /// Certificate chain assembly.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Token session bridge.
    #[serde(default)]
    pub token: TokenConfig,

    /// CMS engine defaults.
    #[serde(default)]
    pub cms: CmsConfig,

    /// Object stack limits.
    #[serde(default)]
    pub stack: StackConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PkiConfig {
    /// Create a configuration builder.
    pub fn builder() -> PkiConfigBuilder {
        PkiConfigBuilder::new()
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, has unknown fields, or names
    /// an unsupported algorithm.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| PkiError::config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PkiError::config(format!("TOML serialize: {e}")))
    }

    /// Check value ranges and algorithm identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.chain.max_chain_length == 0 {
            return Err(PkiError::config("chain.max_chain_length must be at least 1"));
        }
        if self.token.lock_timeout_ms == 0 {
            return Err(PkiError::config("token.lock_timeout_ms must be positive"));
        }
        registry::resolve_digest(self.cms.default_digest())
            .map_err(|e| PkiError::config(format!("cms.default_digest: {e}")))?;
        registry::resolve_cipher(self.cms.default_cipher())
            .map_err(|e| PkiError::config(format!("cms.default_cipher: {e}")))?;
        if self.cms.pem_line_width == 0 || self.cms.pem_line_width % 4 != 0 {
            return Err(PkiError::config(
                "cms.pem_line_width must be a positive multiple of 4",
            ));
        }
        if self.stack.max_items == Some(0) {
            return Err(PkiError::config("stack.max_items must be at least 1"));
        }
        Ok(())
    }
}

/// Chain assembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Maximum number of certificates in a chain, leaf and anchor included.
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,

    /// Prefer issuers that are valid at the verification time over expired
    /// ones with a later `notBefore`.
    #[serde(default = "default_true")]
    pub prefer_valid_candidates: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_chain_length: default_max_chain_length(),
            prefer_valid_candidates: true,
        }
    }
}

/// Token bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// How long to wait for the per-session lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Let the token compute digests when it supports a combined
    /// hash-and-sign mechanism.
    #[serde(default = "default_true")]
    pub prefer_token_digest: bool,
}

impl TokenConfig {
    /// Lock timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            prefer_token_digest: true,
        }
    }
}

/// CMS engine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CmsConfig {
    /// Digest NID used when the caller does not pick one.
    #[serde(default = "default_digest")]
    pub default_digest: u32,

    /// Content-encryption cipher NID used when the caller does not pick one.
    #[serde(default = "default_cipher")]
    pub default_cipher: u32,

    /// Produce detached signatures (content not embedded).
    #[serde(default)]
    pub detached: bool,

    /// Add a `signingTime` signed attribute.
    #[serde(default = "default_true")]
    pub include_signing_time: bool,

    /// Base64 line width for PEM output.
    #[serde(default = "default_pem_line_width")]
    pub pem_line_width: usize,
}

impl CmsConfig {
    /// Default digest as an [`AlgorithmId`].
    pub fn default_digest(&self) -> AlgorithmId {
        AlgorithmId(self.default_digest)
    }

    /// Default cipher as an [`AlgorithmId`].
    pub fn default_cipher(&self) -> AlgorithmId {
        AlgorithmId(self.default_cipher)
    }
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            default_digest: default_digest(),
            default_cipher: default_cipher(),
            detached: false,
            include_signing_time: true,
            pem_line_width: default_pem_line_width(),
        }
    }
}

/// Object stack limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Hard limit applied to certificate stacks read from messages.
    #[serde(default)]
    pub max_items: Option<usize>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable structured JSON logging.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_chain_length() -> usize {
    10
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_digest() -> u32 {
    AlgorithmId::SHA256.0
}

fn default_cipher() -> u32 {
    AlgorithmId::AES256_CBC.0
}

fn default_pem_line_width() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Builder for [`PkiConfig`].
#[derive(Debug, Default)]
pub struct PkiConfigBuilder {
    config: PkiConfig,
}

impl PkiConfigBuilder {
    /// Create a builder seeded with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum chain length.
    pub fn max_chain_length(mut self, len: usize) -> Self {
        self.config.chain.max_chain_length = len;
        self
    }

    /// Choose issuers strictly by `notBefore`, ignoring validity.
    pub fn ignore_candidate_validity(mut self) -> Self {
        self.config.chain.prefer_valid_candidates = false;
        self
    }

    /// Set the token lock timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.token.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Always hash locally, even when the token offers hash-and-sign.
    pub fn local_digest(mut self) -> Self {
        self.config.token.prefer_token_digest = false;
        self
    }

    /// Set the default digest.
    pub fn default_digest(mut self, id: AlgorithmId) -> Self {
        self.config.cms.default_digest = id.0;
        self
    }

    /// Set the default content-encryption cipher.
    pub fn default_cipher(mut self, id: AlgorithmId) -> Self {
        self.config.cms.default_cipher = id.0;
        self
    }

    /// Produce detached signatures.
    pub fn detached(mut self, detached: bool) -> Self {
        self.config.cms.detached = detached;
        self
    }

    /// Include or omit the `signingTime` attribute.
    pub fn signing_time(mut self, include: bool) -> Self {
        self.config.cms.include_signing_time = include;
        self
    }

    /// Limit certificate stacks read from messages.
    pub fn max_stack_items(mut self, max: usize) -> Self {
        self.config.stack.max_items = Some(max);
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Enable JSON log output.
    pub fn json_logs(mut self) -> Self {
        self.config.logging.json = true;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn build(self) -> Result<PkiConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
