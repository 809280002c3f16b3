//! Trust primitives for add-ins hosted remotely from a SharePoint-style host
//!
//! A remotely hosted add-in establishes its identity with the host in one of two ways:
//!
//! * **Delegated trust**, in which the host posts a signed _context token_ to the add-in.
//!   The add-in validates that token against its shared client secret and then exchanges
//!   the refresh token it carries with the token-issuance service for access tokens.
//! * **High trust**, in which the add-in holds an X.509 signing credential and mints its
//!   own server-to-server tokens without calling out to any issuance service.
//!
//! This crate contains the pieces of that protocol that do not depend on a particular
//! caching or per-request strategy:
//!
//! * [`ContextTokenValidator`] parses and verifies inbound context tokens.
//! * [`MetadataResolver`] fetches the per-realm trust metadata document which names the
//!   token-issuance endpoints.
//! * [`RealmDiscovery`] probes a host for the realm that scopes its trust relationships.
//! * [`S2STokenIssuer`] mints actor and outer tokens for high-trust mode.
//!
//! All of these are driven from a single [`TrustConfig`], constructed once and shared.
//! Whether the system runs in high-trust mode is decided solely by whether that
//! configuration carries a [`SigningCredential`].

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

mod braids;
pub mod config;
pub mod context_token;
pub mod error;
mod issued;
pub mod jws;
pub mod metadata;
pub mod principals;
pub mod realm;
pub mod s2s;
pub mod signing;

pub use braids::*;
pub use config::TrustConfig;
pub use context_token::{ContextToken, ContextTokenValidator};
pub use issued::IssuedToken;
pub use metadata::{MetadataResolver, Protocol, TrustMetadataDocument};
pub use realm::RealmDiscovery;
pub use s2s::{CallerIdentity, S2STokenIssuer};
pub use signing::SigningCredential;

/// The clock abstraction used for all expiry decisions
pub use aliri_clock as clock;
