//! Error types for the token PKI core.
//!
//! Every operation returns a typed error. Each component has its own error
//! family (`ChainBuildError`, `ValidationError`, `TokenError`, `CmsError`,
//! `StackError`); all of them convert into the top-level [`PkiError`] so
//! callers can use `?` across component boundaries.

use thiserror::Error;

/// Result type alias using [`PkiError`].
pub type Result<T> = std::result::Result<T, PkiError>;

/// Errors that can occur anywhere in the PKI core.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Algorithm identifier is not in the supported set.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Object stack contract violation.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Certificate chain could not be assembled.
    #[error(transparent)]
    ChainBuild(#[from] ChainBuildError),

    /// Assembled chain failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An extension with the same OID is already present.
    #[error("Duplicate extension: {oid}")]
    DuplicateExtension {
        /// OID of the rejected extension.
        oid: String,
    },

    /// Extension lookup found nothing.
    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),

    /// Token operation failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// CMS operation failed.
    #[error(transparent)]
    Cms(#[from] CmsError),

    /// Malformed DER, PEM or CMS input.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),
}

impl PkiError {
    /// Create an unsupported algorithm error.
    pub fn unsupported_algorithm(msg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(msg.into())
    }

    /// Create a parse error with the given message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a duplicate extension error.
    pub fn duplicate_extension(oid: impl ToString) -> Self {
        Self::DuplicateExtension {
            oid: oid.to_string(),
        }
    }

    /// Returns the token error, if this error came from the token bridge.
    pub fn token_error(&self) -> Option<&TokenError> {
        match self {
            Self::Token(e) => Some(e),
            Self::Cms(CmsError::Token(e)) => Some(e),
            _ => None,
        }
    }
}

/// Object stack contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Push would exceed the stack's configured hard limit.
    #[error("Stack capacity exceeded (limit {limit})")]
    CapacityExceeded {
        /// Configured maximum number of items.
        limit: usize,
    },

    /// Index is past the end of the stack.
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Stack length at the time of the request.
        len: usize,
    },

    /// A certificate with the same issuer and serial is already present.
    #[error("Duplicate certificate: serial {serial} from {issuer}")]
    DuplicateCertificate {
        /// Issuer distinguished name.
        issuer: String,
        /// Hex-encoded serial number.
        serial: String,
    },
}

/// Failures while assembling a certificate chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainBuildError {
    /// No trust anchor was reached.
    #[error("Chain incomplete: no issuer found for {subject}")]
    Incomplete {
        /// Subject of the last certificate that could be placed.
        subject: String,
    },

    /// A subject/issuer loop was detected.
    #[error("Chain cycle detected at {subject}")]
    Cycle {
        /// Subject that was seen twice.
        subject: String,
    },

    /// An issuing certificate is outside its validity window.
    #[error("Issuer certificate {subject} is not valid at the verification time")]
    ValidityExpired {
        /// Subject of the expired certificate.
        subject: String,
    },

    /// Chain grew past the configured maximum length.
    #[error("Chain exceeds maximum length {max}")]
    PathTooLong {
        /// Configured maximum chain length.
        max: usize,
    },
}

/// Failures while validating an assembled chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing to validate.
    #[error("Certificate chain is empty")]
    EmptyChain,

    /// Signature of the certificate at `position` does not verify.
    #[error("Signature of certificate {position} does not verify against its issuer")]
    SignatureInvalid {
        /// Index in the chain (0 = leaf).
        position: usize,
    },

    /// Certificate at `position` expired before the verification time.
    #[error("Certificate {position} expired")]
    Expired {
        /// Index in the chain (0 = leaf).
        position: usize,
    },

    /// Certificate at `position` is not yet valid at the verification time.
    #[error("Certificate {position} is not yet valid")]
    NotYetValid {
        /// Index in the chain (0 = leaf).
        position: usize,
    },

    /// Issuing certificate lacks `cA = TRUE`.
    #[error("Certificate {position} is not a CA")]
    NotCa {
        /// Index in the chain.
        position: usize,
    },

    /// Issuing certificate's key usage forbids certificate signing.
    #[error("Certificate {position} key usage does not permit keyCertSign")]
    KeyUsageViolation {
        /// Index in the chain.
        position: usize,
    },

    /// `pathLenConstraint` is smaller than the number of CAs below.
    #[error("Certificate {position} path length constraint {limit} exceeded")]
    PathLengthExceeded {
        /// Index in the chain.
        position: usize,
        /// Constraint value.
        limit: u8,
    },

    /// An extension on the certificate at `position` could not be decoded.
    #[error("Certificate {position} has a malformed {extension} extension")]
    MalformedExtension {
        /// Index in the chain.
        position: usize,
        /// Name of the extension.
        extension: &'static str,
    },

    /// Signature algorithm cannot be verified by this crate.
    #[error("Unsupported signature algorithm {oid} at certificate {position}")]
    UnsupportedSignatureAlgorithm {
        /// Index in the chain.
        position: usize,
        /// Signature algorithm OID.
        oid: String,
    },
}

impl ValidationError {
    /// Chain position the error refers to, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::EmptyChain => None,
            Self::SignatureInvalid { position }
            | Self::Expired { position }
            | Self::NotYetValid { position }
            | Self::NotCa { position }
            | Self::KeyUsageViolation { position }
            | Self::PathLengthExceeded { position, .. }
            | Self::MalformedExtension { position, .. }
            | Self::UnsupportedSignatureAlgorithm { position, .. } => Some(*position),
        }
    }

    /// Returns true for validity-window failures.
    pub fn is_time_error(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::NotYetValid { .. })
    }
}

/// Failures reported by the token session bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Session is not authenticated.
    #[error("Token session is not logged in")]
    NotLoggedIn,

    /// No private key with the requested handle exists on the token.
    #[error("Key not found on token: {0}")]
    KeyNotFound(String),

    /// The token cannot perform the requested mechanism with this key.
    #[error("Mechanism not supported: {0}")]
    MechanismUnsupported(String),

    /// Token was disconnected during the operation.
    #[error("Token device removed")]
    DeviceRemoved,

    /// Operation did not complete in time.
    #[error("Token operation timed out")]
    Timeout,

    /// Any other device-reported failure.
    #[error("Token device error: {0}")]
    Device(String),
}

impl TokenError {
    /// Returns true if the failure is caused by the device going away.
    ///
    /// Callers may re-open a session and retry; the core never does.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::DeviceRemoved | Self::Timeout)
    }
}

/// Failures reported by the CMS engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmsError {
    /// Operation attempted out of sequence.
    #[error("Invalid message state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the builder was in.
        actual: &'static str,
    },

    /// Signature or message digest does not match the content.
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Signer chain does not lead to a trust anchor or fails validation.
    #[error("Untrusted signer chain: {0}")]
    UntrustedChain(String),

    /// Signer certificate is outside its validity window.
    #[error("Signer certificate not valid at verification time")]
    ExpiredAtVerificationTime,

    /// No recipient info matches the supplied certificate.
    #[error("No recipient info matches the supplied certificate")]
    NoMatchingRecipient,

    /// Recipient key type cannot be used for key transport.
    #[error("Unsupported recipient key: {0}")]
    UnsupportedRecipientKey(String),

    /// Private-key step failed on the token.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Structure could not be encoded or decrypted.
    #[error("CMS encoding error: {0}")]
    Encoding(String),
}

impl CmsError {
    /// Create an encoding error with the given message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PkiError::duplicate_extension("2.5.29.19");
        assert_eq!(err.to_string(), "Duplicate extension: 2.5.29.19");

        let err = PkiError::from(TokenError::DeviceRemoved);
        assert_eq!(err.to_string(), "Token device removed");
    }

    #[test]
    fn test_token_error_lookup() {
        let err = PkiError::from(CmsError::from(TokenError::NotLoggedIn));
        assert_eq!(err.token_error(), Some(&TokenError::NotLoggedIn));
        assert_eq!(PkiError::parse("bad").token_error(), None);
    }

    #[test]
    fn test_device_failure() {
        assert!(TokenError::DeviceRemoved.is_device_failure());
        assert!(TokenError::Timeout.is_device_failure());
        assert!(!TokenError::KeyNotFound("01".into()).is_device_failure());
    }

    #[test]
    fn test_validation_error_position() {
        assert_eq!(ValidationError::EmptyChain.position(), None);
        assert_eq!(ValidationError::NotCa { position: 2 }.position(), Some(2));
        assert!(ValidationError::Expired { position: 0 }.is_time_error());
        assert!(!ValidationError::SignatureInvalid { position: 0 }.is_time_error());
    }
}
