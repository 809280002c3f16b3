//! Finding, creating, and remembering the authenticated context for a request
//!
//! A context is stored in the caller's session once created. On later requests it is
//! reused only if it still matches the request: the same host web, and either the same
//! correlated context token (delegated) or the same caller (high trust). Otherwise a
//! new context is built from the launch parameters.

use std::sync::Arc;

use aliri_clock::{Clock, System};
use spauth::error::ValidationError;

use crate::{
    context::{AuthenticatedContext, HostInfo, TrustMode},
    redirect::{self, RedirectInputs, RedirectionOutcome},
    request::{self, HostRequest, ResponseCookie, SessionStore, CACHE_KEY_COOKIE, SESSION_KEY},
    ContextError, TrustEngine,
};

/// Provides authenticated contexts for inbound requests
#[derive(Debug)]
pub struct ContextProvider<C = System> {
    engine: Arc<TrustEngine<C>>,
}

impl<C> Clone for ContextProvider<C> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<C> ContextProvider<C> {
    /// Constructs a provider backed by a shared engine
    pub fn new(engine: Arc<TrustEngine<C>>) -> Self {
        Self { engine }
    }

    /// The engine contexts are created with
    pub fn engine(&self) -> &Arc<TrustEngine<C>> {
        &self.engine
    }
}

impl<C: Clock + Clone> ContextProvider<C> {
    /// The authenticated context for a request
    ///
    /// A context stored in the session is reused if it still matches the request.
    /// Otherwise a new one is created from the request and stored in its place.
    /// Returns `Ok(None)` if the request names no host web or carries no usable
    /// credentials.
    pub fn get_context<R, S>(
        &self,
        req: &R,
        session: &mut S,
    ) -> Result<Option<Arc<AuthenticatedContext<C>>>, ContextError>
    where
        R: HostRequest + ?Sized,
        S: SessionStore<Arc<AuthenticatedContext<C>>> + ?Sized,
    {
        if request::host_url_from_request(req).is_none() {
            return Ok(None);
        }

        if let Some(existing) = session.get(SESSION_KEY) {
            if self.validate_context(&existing, req) {
                tracing::trace!("reusing context from session");
                return Ok(Some(existing));
            }
        }

        match self.create_context(req)? {
            Some(context) => {
                let context = Arc::new(context);
                self.save_context(&context, session);
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    /// Creates a new context from the request's launch parameters
    ///
    /// In delegated mode the request must carry a context token addressed to this
    /// add-in; a token addressed elsewhere yields `Ok(None)`, while any other rejection
    /// is an error. In high-trust mode the request must carry an authenticated,
    /// non-guest identity with a security identifier.
    pub fn create_context<R: HostRequest + ?Sized>(
        &self,
        req: &R,
    ) -> Result<Option<AuthenticatedContext<C>>, ContextError> {
        let host = match HostInfo::from_request(req)? {
            Some(host) => host,
            None => return Ok(None),
        };

        if self.engine.is_high_trust() {
            return match req.identity() {
                Some(identity) if identity.is_delegable() => Ok(Some(
                    AuthenticatedContext::high_trust(Arc::clone(&self.engine), host, identity.clone()),
                )),
                _ => {
                    tracing::debug!("no delegable identity on request");
                    Ok(None)
                }
            };
        }

        let encoded = match request::context_token_from_request(req) {
            Some(encoded) => encoded,
            None => {
                tracing::debug!("no context token on request");
                return Ok(None);
            }
        };

        match self
            .engine
            .validate_context_token(&encoded, Some(req.authority().as_str()))
        {
            Ok(token) => Ok(Some(AuthenticatedContext::delegated(
                Arc::clone(&self.engine),
                host,
                token,
                encoded,
            ))),
            Err(ValidationError::AudienceMismatch(error)) => {
                tracing::debug!(%error, "context token addressed to another add-in");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Whether a stored context may serve this request
    pub fn validate_context<R: HostRequest + ?Sized>(
        &self,
        context: &AuthenticatedContext<C>,
        req: &R,
    ) -> bool {
        match request::host_url_from_request(req) {
            Some(host_url) if &host_url == context.host_url() => {}
            _ => return false,
        }

        match context.mode() {
            TrustMode::Delegated { encoded, .. } => {
                let cache_key = match context.cache_key() {
                    Some(cache_key) if !cache_key.as_str().is_empty() => cache_key,
                    _ => return false,
                };

                if req.cookie(CACHE_KEY_COOKIE).as_deref() != Some(cache_key.as_str()) {
                    return false;
                }

                match request::context_token_from_request(req) {
                    Some(posted) => posted.as_str() == encoded.as_str(),
                    None => true,
                }
            }
            TrustMode::HighTrust { identity } => match req.identity() {
                Some(caller) => {
                    caller.is_authenticated()
                        && !caller.is_guest()
                        && caller.security_identifier() == identity.security_identifier()
                }
                None => false,
            },
        }
    }

    /// Stores a context in the session
    ///
    /// A delegated context also sets the cache key cookie it will be correlated with.
    pub fn save_context<S>(&self, context: &Arc<AuthenticatedContext<C>>, session: &mut S)
    where
        S: SessionStore<Arc<AuthenticatedContext<C>>> + ?Sized,
    {
        if let Some(cache_key) = context.cache_key() {
            session.set_cookie(ResponseCookie {
                name: CACHE_KEY_COOKIE.to_owned(),
                value: cache_key.as_str().to_owned(),
                secure: true,
                http_only: true,
            });
        }

        session.insert(SESSION_KEY, Arc::clone(context));
    }

    /// Decides whether the request may proceed or must first visit the host
    ///
    /// An expired context token is not an error here, nor is a host URL arriving
    /// without the rest of the launch parameters: both are cases in which a trip
    /// through the host supplies what is missing.
    pub fn check_redirection_status<R, S>(
        &self,
        req: &R,
        session: &mut S,
    ) -> Result<RedirectionOutcome, ContextError>
    where
        R: HostRequest + ?Sized,
        S: SessionStore<Arc<AuthenticatedContext<C>>> + ?Sized,
    {
        let (has_context, token_expired) = match self.get_context(req, session) {
            Ok(context) => (context.is_some(), false),
            Err(error) if error.is_expired() => {
                tracing::debug!(%error, "context token expired");
                (false, true)
            }
            Err(ContextError::MissingParameter(parameter)) => {
                tracing::debug!(parameter, "launch parameter missing");
                (false, false)
            }
            Err(error) => return Err(error),
        };

        let host_url = request::host_url_from_request(req);
        let inputs = RedirectInputs {
            has_context,
            token_expired,
            already_redirected: request::has_redirected(req),
            host_url: host_url.as_ref(),
            method: req.method(),
            request_url: req.url(),
        };

        Ok(redirect::decide(&inputs, self.engine.config().client_id()))
    }
}
