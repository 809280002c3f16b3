use std::fmt;

use aliri_clock::{Clock, System, UnixTime};
use spauth::{AccessToken, AccessTokenRef, IssuedToken};

/// How long before its stated expiry a cached token is treated as expired, in seconds
pub const TOKEN_TOLERANCE: u64 = 5 * 60;

/// The four access tokens an authenticated context may hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// On behalf of the user, for the host web
    UserHost,
    /// On behalf of the user, for the add-in web
    UserAppWeb,
    /// As the add-in alone, for the host web
    AppOnlyHost,
    /// As the add-in alone, for the add-in web
    AppOnlyAppWeb,
}

impl TokenKind {
    /// Every kind, in slot order
    pub const ALL: [TokenKind; 4] = [
        Self::UserHost,
        Self::UserAppWeb,
        Self::AppOnlyHost,
        Self::AppOnlyAppWeb,
    ];

    /// Whether tokens of this kind carry no user identity
    pub const fn is_app_only(self) -> bool {
        matches!(self, Self::AppOnlyHost | Self::AppOnlyAppWeb)
    }

    /// Whether tokens of this kind target the add-in web
    pub const fn targets_app_web(self) -> bool {
        matches!(self, Self::UserAppWeb | Self::AppOnlyAppWeb)
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::UserHost => 0,
            Self::UserAppWeb => 1,
            Self::AppOnlyHost => 2,
            Self::AppOnlyAppWeb => 3,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::UserHost => "user/host",
            Self::UserAppWeb => "user/app-web",
            Self::AppOnlyHost => "app-only/host",
            Self::AppOnlyAppWeb => "app-only/app-web",
        })
    }
}

/// A cached access token with its effective expiry
///
/// The effective expiry is pulled in by [`TOKEN_TOLERANCE`] so that a token is never
/// handed out just as the host is about to reject it. Tokens whose whole lifetime is
/// shorter than the tolerance keep their stated expiry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessTokenRecord {
    token: Option<AccessToken>,
    expires_on: UnixTime,
}

impl AccessTokenRecord {
    /// A record holding no token
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records a freshly issued token
    pub fn from_issued(issued: IssuedToken) -> Self {
        let lifetime = issued.lifetime();
        let expires_on = if lifetime > TOKEN_TOLERANCE {
            UnixTime(issued.expires_on().0 - TOKEN_TOLERANCE)
        } else {
            issued.expires_on()
        };

        Self {
            token: Some(issued.into_access_token()),
            expires_on,
        }
    }

    /// The recorded token, if any
    pub fn token(&self) -> Option<&AccessTokenRef> {
        self.token.as_deref()
    }

    /// The effective expiry of the recorded token
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// Whether the record holds a usable token
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid_with_clock(&System)
    }

    /// Whether the record holds a usable token according to the provided clock
    #[inline]
    pub fn is_valid_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_valid_at(clock.now())
    }

    /// Whether the record holds a usable token at the given time
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        let has_token = self.token.as_deref().map_or(false, |t| !t.as_str().is_empty());
        has_token && self.expires_on > time
    }
}

/// The outcome of asking for a fresh token
#[derive(Debug)]
pub enum Renewal {
    /// A new token was issued
    Fresh(IssuedToken),
    /// No token can be had right now, and no error needs to be reported
    Unavailable,
}
