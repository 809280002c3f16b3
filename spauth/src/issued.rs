use aliri_clock::UnixTime;

use crate::{AccessToken, AccessTokenRef};

/// An access token along with the window during which it is valid
///
/// Produced both by the OAuth2 exchange with the token-issuance service and by
/// the high-trust issuer that mints tokens locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    access_token: AccessToken,
    not_before: UnixTime,
    expires_on: UnixTime,
}

impl IssuedToken {
    /// Constructs a new issued token
    pub fn new(access_token: AccessToken, not_before: UnixTime, expires_on: UnixTime) -> Self {
        Self {
            access_token,
            not_before,
            expires_on,
        }
    }

    /// The access token
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Consumes the issued token, returning the access token
    pub fn into_access_token(self) -> AccessToken {
        self.access_token
    }

    /// The earliest instant at which the token may be used
    pub fn not_before(&self) -> UnixTime {
        self.not_before
    }

    /// The instant at which the token expires
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// The length of the validity window in seconds
    pub fn lifetime(&self) -> u64 {
        self.expires_on.0.saturating_sub(self.not_before.0)
    }
}
