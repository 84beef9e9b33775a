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

//! # token-pki
//!
//! PKI core for keys held on PKCS#11 hardware tokens.
//!
//! The crate assembles and validates X.509 certificate chains, reads and
//! builds certificate extensions (certificate policies in particular), and
//! produces and consumes CMS `SignedData` and `EnvelopedData` messages whose
//! private-key step runs on a token. Private keys never enter process memory
//! when a hardware back end is used.
//!
//! ## Components
//!
//! - [`registry`]: numeric algorithm identifiers to digest/cipher descriptors
//! - [`stack`]: owning ordered collections for certificates, extensions and policies
//! - [`chain`]: chain building and path validation
//! - [`extensions`]: extension lookup and certificate policy processing
//! - [`token`]: `Signer`/`Decryptor` capabilities with software and PKCS#11 back ends
//! - [`engine`]: the CMS message state machine, signing and verification
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::SystemTime;
//! use token_pki::{Certificate, CertificateStack, CmsEngine, PkiConfig, SoftwareToken};
//!
//! # fn example(chain: CertificateStack, root: Certificate, token: SoftwareToken)
//! #     -> token_pki::Result<()> {
//! let engine = CmsEngine::new(PkiConfig::default())?;
//! let key = token.key(b"signer")?;
//!
//! let message =
//!     engine.create_signed_message(b"payload", chain, None, &token, &key)?;
//! let pem = engine.to_pem(&message)?;
//!
//! let received = engine.from_pem(&pem)?;
//! let verified = engine.verify_signed_message(&received, &[root], SystemTime::now())?;
//! assert_eq!(verified.content, b"payload");
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo Features
//!
//! - `software-token` (default): in-memory keys for development and tests
//! - `pkcs11`: Cryptoki token sessions via `cryptoki`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod certificate;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod logging;
pub mod message;
pub mod registry;
pub mod stack;
pub mod token;

// Re-export main types at crate root for convenience
pub use certificate::{Certificate, CertificateStack};
pub use chain::ChainAssembler;
pub use config::{PkiConfig, PkiConfigBuilder};
pub use engine::{BuilderState, CmsEngine, MessageBuilder, VerifiedContent};
pub use error::{
    ChainBuildError, CmsError, PkiError, Result, StackError, TokenError, ValidationError,
};
pub use extensions::{Extension, ExtensionStack, PolicyClass, PolicyInfo, PolicyInfoStack};
pub use message::CmsMessage;
pub use registry::{AlgorithmDescriptor, AlgorithmId};
pub use stack::{FreePolicy, ObjectStack};
pub use token::{Decryptor, KeyAlgorithm, KeyHandle, Signer};

#[cfg(feature = "software-token")]
pub use token::SoftwareToken;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
