//! Access token exchange and caching for add-ins
//!
//! An authenticated add-in context needs up to four access tokens: on behalf of the
//! user or as the add-in alone, each for either the host web or the add-in web. This
//! crate obtains those tokens and keeps them fresh.
//!
//! * [`OAuth2Exchanger`] trades a refresh token, an authorization code, or the add-in's
//!   own client credentials for an access token at the token-issuance service.
//! * [`AccessTokenCache`] holds one [`AccessTokenRecord`] per [`TokenKind`] and asks a
//!   [`TokenRenewer`] for a new token once the cached one comes within
//!   [`TOKEN_TOLERANCE`] of expiring.
//!
//! The cache does not care where tokens come from. A delegated context renews through
//! the exchanger, while a high-trust context mints its own tokens with
//! [`spauth::S2STokenIssuer`].
//!
//! ```
//! use spauth::{AccessToken, IssuedToken};
//! use spauth::clock::UnixTime;
//! use spauth_tokens::AccessTokenRecord;
//!
//! let issued = IssuedToken::new(
//!     AccessToken::from_static("token"),
//!     UnixTime(1_000),
//!     UnixTime(4_600),
//! );
//!
//! let record = AccessTokenRecord::from_issued(issued);
//! assert_eq!(record.expires_on(), UnixTime(4_300));
//! assert!(record.is_valid_at(UnixTime(4_000)));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod cache;
pub mod exchange;
mod tokens;

pub use cache::{AccessTokenCache, TokenRenewer};
pub use exchange::{ExchangeError, Grant, OAuth2Exchanger};
pub use tokens::{AccessTokenRecord, Renewal, TokenKind, TOKEN_TOLERANCE};
