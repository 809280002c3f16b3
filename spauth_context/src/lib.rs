//! Per-request authenticated contexts for add-ins hosted remotely from a SharePoint-style host
//!
//! This crate ties the trust primitives of [`spauth`] and the token caching of
//! [`spauth_tokens`] to the lifecycle of a web request:
//!
//! * A [`TrustEngine`] is built once from a [`TrustConfig`][spauth::TrustConfig] and
//!   shared.
//! * A [`ContextProvider`] finds the [`AuthenticatedContext`] for each request, reusing
//!   one stored in the caller's session when it still matches, or building a new one
//!   from the launch parameters.
//! * An [`AuthenticatedContext`] keeps four access tokens fresh and hands out
//!   [`HostClient`]s that call back into the host with them.
//! * When no context can be had, [`ContextProvider::check_redirection_status`] decides
//!   whether the browser should be sent to the host for a fresh context token.
//! * Remote event receivers get a [`HostClient`] for the web an event concerns from
//!   [`TrustEngine::remote_event_client`] or [`TrustEngine::app_event_client`].
//!
//! The web framework is reached only through the [`HostRequest`][request::HostRequest]
//! and [`SessionStore`][request::SessionStore] traits.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spauth::TrustConfig;
//! use spauth_context::{ContextProvider, TrustEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrustConfig::builder("c1a7a1d2-4b8e-4c2b-9b1e-6f9d2e7a0c11")
//!     .client_secret("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=")
//!     .build();
//!
//! let provider = ContextProvider::new(Arc::new(TrustEngine::new(config)?));
//! assert!(!provider.engine().is_high_trust());
//! # Ok(())
//! # }
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

mod client;
mod context;
mod engine;
mod error;
pub mod event;
pub mod provider;
pub mod redirect;
pub mod request;

#[cfg(test)]
mod testing;

pub use client::HostClient;
pub use context::{AuthenticatedContext, HostInfo, TrustMode};
pub use engine::TrustEngine;
pub use error::ContextError;
pub use event::{AppEventTarget, RemoteEventProperties};
pub use provider::ContextProvider;
pub use redirect::RedirectionOutcome;
pub use spauth_tokens::TokenKind;
