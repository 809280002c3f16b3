//! Errors raised while building or using an authenticated context

use spauth::error::{ConfigError, IssueError, ValidationError};
use spauth_tokens::ExchangeError;
use thiserror::Error;

/// An error raised while building or using an authenticated context
#[derive(Debug, Error)]
pub enum ContextError {
    /// A parameter every host launch carries was absent from the request
    #[error("required request parameter '{0}' is missing")]
    MissingParameter(&'static str),
    /// The inbound context token was rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The token-issuance service refused or failed an exchange
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    /// A high-trust token could not be minted
    #[error(transparent)]
    Issue(#[from] IssueError),
    /// The trust configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The issuance service returned no token for the grant
    #[error("no access token was issued")]
    NoAccessToken,
    /// An access token could not be carried in a header
    #[error("access token is not a valid header value")]
    InvalidAccessToken(#[from] reqwest::header::InvalidHeaderValue),
    /// A URL could not be formed
    #[error("unable to form URL")]
    InvalidUrl(#[from] url::ParseError),
}

impl ContextError {
    /// Whether the failure was an expired context token
    ///
    /// An expired token warrants sending the user back to the host for a fresh one,
    /// even when the request has already been redirected once.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Validation(err) if err.is_expired())
    }
}
