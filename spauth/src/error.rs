//! Common errors

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use aliri_clock::UnixTime;
use thiserror::Error;

/// The token could not be parsed as a compact JWS or its claims are incomplete
#[derive(Debug, Error)]
#[error("malformed context token: {reason}")]
pub struct MalformedToken {
    reason: &'static str,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl MalformedToken {
    /// A short description of what was wrong with the token
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

pub(crate) fn malformed_token(reason: &'static str) -> MalformedToken {
    MalformedToken {
        reason,
        source: None,
    }
}

pub(crate) fn malformed_token_with(
    reason: &'static str,
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedToken {
    MalformedToken {
        reason,
        source: Some(source.into()),
    }
}

/// The signature did not match any of the configured keys
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch {
    _p: (),
}

pub(crate) const fn signature_mismatch() -> SignatureMismatch {
    SignatureMismatch { _p: () }
}

/// The token was issued by a principal other than the trusted issuance service
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("context token issuer '{issuer}' is not trusted")]
pub struct UntrustedIssuer {
    issuer: String,
}

impl UntrustedIssuer {
    /// The issuer claimed by the token
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

pub(crate) fn untrusted_issuer(issuer: impl Into<String>) -> UntrustedIssuer {
    UntrustedIssuer {
        issuer: issuer.into(),
    }
}

/// The token has already expired
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("context token expired at {}", .valid_to.0)]
pub struct TokenExpired {
    valid_to: UnixTime,
}

impl TokenExpired {
    /// The instant at which the token stopped being valid
    pub fn valid_to(&self) -> UnixTime {
        self.valid_to
    }
}

pub(crate) const fn token_expired(valid_to: UnixTime) -> TokenExpired {
    TokenExpired { valid_to }
}

/// The token is not valid until some point in the future
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("context token not valid before {}", .valid_from.0)]
pub struct TokenNotYetValid {
    valid_from: UnixTime,
}

pub(crate) const fn token_not_yet_valid(valid_from: UnixTime) -> TokenNotYetValid {
    TokenNotYetValid { valid_from }
}

/// The token audience did not match any acceptable audience
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(
    "context token audience '{actual}' did not match any of the expected audiences: [{}]",
    .attempted.join(", ")
)]
pub struct AudienceMismatch {
    actual: String,
    attempted: Vec<String>,
}

impl AudienceMismatch {
    /// The audience claimed by the token
    pub fn actual(&self) -> &str {
        &self.actual
    }

    /// Every audience principal that was compared against the token
    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }
}

pub(crate) fn audience_mismatch(actual: impl Into<String>, attempted: Vec<String>) -> AudienceMismatch {
    AudienceMismatch {
        actual: actual.into(),
        attempted,
    }
}

/// An error encountered while validating a context token
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The token could not be parsed
    #[error(transparent)]
    Malformed(#[from] MalformedToken),
    /// The token signature could not be verified
    #[error(transparent)]
    InvalidSignature(#[from] SignatureMismatch),
    /// The token was signed by an untrusted issuer
    #[error(transparent)]
    UntrustedIssuer(#[from] UntrustedIssuer),
    /// The token has expired
    #[error(transparent)]
    Expired(#[from] TokenExpired),
    /// The token is not yet valid
    #[error(transparent)]
    NotYetValid(#[from] TokenNotYetValid),
    /// The token was not addressed to this add-in
    #[error(transparent)]
    AudienceMismatch(#[from] AudienceMismatch),
}

impl ValidationError {
    /// Whether the token failed only because it has expired
    ///
    /// Expiry is the one failure for which sending the caller back to the host
    /// for a fresh token is expected to help.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }
}

/// Configuration values were missing or unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not supplied
    #[error("required setting '{0}' is not configured")]
    Missing(&'static str),
    /// A client secret was not valid base64
    #[error("setting '{setting}' is not valid base64")]
    InvalidSecret {
        /// The name of the offending setting
        setting: &'static str,
        /// The decoding failure
        source: aliri_base64::InvalidBase64Data,
    },
    /// The signing credential could not be loaded
    #[error("unable to load the signing credential")]
    Credential(#[from] CredentialError),
    /// The global endpoint could not be formed into a URL
    #[error("invalid global endpoint")]
    InvalidEndpoint(#[from] url::ParseError),
    /// The shared HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// The signing credential could not be loaded
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A credential file could not be read
    #[error("unable to read '{path}'")]
    Io {
        /// The path that was read
        path: std::path::PathBuf,
        /// The underlying I/O failure
        source: std::io::Error,
    },
    /// The private key was not a PEM-encoded RSA key usable for signing
    #[error("private key rejected")]
    KeyRejected(#[source] aliri::error::KeyRejected),
    /// The certificate was not a PEM-encoded X.509 certificate
    #[error("certificate rejected")]
    Certificate(#[source] openssl::error::ErrorStack),
}

/// A token could not be signed
#[derive(Debug, Error)]
pub enum SigningError {
    /// The claims could not be serialized
    #[error("unable to serialize token")]
    Serialization(#[from] serde_json::Error),
    /// The key could not produce a signature
    #[error("unable to sign token")]
    Signature(#[from] aliri::error::JwtSigningError),
}

/// An error encountered while resolving trust metadata
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata request could not be sent or completed
    #[error("error sending metadata request")]
    Network(#[source] reqwest::Error),
    /// The metadata endpoint returned an error status
    #[error("metadata endpoint returned an error: {body}")]
    Status {
        /// The underlying status error
        source: reqwest::Error,
        /// The body of the error response
        body: String,
    },
    /// The metadata endpoint returned nothing
    #[error("metadata endpoint returned an empty document")]
    EmptyDocument,
    /// The metadata document could not be parsed
    #[error("malformed metadata document")]
    InvalidDocument(#[from] serde_json::Error),
    /// The metadata document carries no signing key
    #[error("metadata document has no signing key")]
    NoSigningKey,
    /// The signing key is not valid base64
    #[error("metadata signing key is not valid base64")]
    InvalidCertificate(#[source] aliri_base64::InvalidBase64Data),
    /// The metadata document has no endpoint for the requested protocol
    #[error("metadata document has no '{protocol}' endpoint")]
    NoEndpoint {
        /// The protocol tag that was requested
        protocol: &'static str,
    },
    /// An endpoint location is not a valid URL
    #[error("metadata endpoint location is not a valid URL")]
    InvalidEndpoint(#[source] url::ParseError),
    /// The metadata URL could not be formed
    #[error("unable to form metadata URL")]
    InvalidUrl(#[source] url::ParseError),
}

impl MetadataError {
    /// Whether the failure happened on the wire rather than in configuration
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Status { .. })
    }
}

/// A high-trust token could not be issued
#[derive(Debug, Error)]
pub enum IssueError {
    /// No signing credential is configured
    #[error("no signing credential is configured; high-trust tokens cannot be issued")]
    NotConfigured,
    /// The token could not be signed
    #[error(transparent)]
    Signing(#[from] SigningError),
}
