//! Authenticated contexts and the four access tokens each one keeps fresh
//!
//! An [`AuthenticatedContext`] is created for one caller and one host web, and holds
//! what is needed to obtain access tokens for that pairing: a validated context token
//! in delegated mode, or the caller's verified identity in high-trust mode. Tokens are
//! requested lazily and cached per [`TokenKind`], each one renewed a little before its
//! reported expiry.

use std::sync::Arc;

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use reqwest::Url;
use spauth::{
    principals, AccessToken, CacheKeyRef, CallerIdentity, ContextToken, EncodedContextToken,
    EncodedContextTokenRef, IssuedToken, RefreshTokenRef,
};
use spauth_tokens::{
    AccessTokenCache, AccessTokenRecord, ExchangeError, Grant, Renewal, TokenKind, TokenRenewer,
};

use crate::{
    request::{self, HostRequest, SP_CLIENT_TAG, SP_LANGUAGE, SP_PRODUCT_NUMBER},
    ContextError, HostClient, TrustEngine,
};

/// The host launch parameters captured when a context is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostInfo {
    host_url: Url,
    app_web_url: Option<Url>,
    language: String,
    client_tag: String,
    product_number: String,
}

impl HostInfo {
    /// Constructs host information from its parts
    pub fn new(
        host_url: Url,
        app_web_url: Option<Url>,
        language: impl Into<String>,
        client_tag: impl Into<String>,
        product_number: impl Into<String>,
    ) -> Self {
        Self {
            host_url,
            app_web_url,
            language: language.into(),
            client_tag: client_tag.into(),
            product_number: product_number.into(),
        }
    }

    /// Reads the launch parameters from a request
    ///
    /// Returns `Ok(None)` if the request names no host web. Once a host web is named,
    /// the language, client tag, and product number must all be present.
    pub fn from_request<R: HostRequest + ?Sized>(req: &R) -> Result<Option<Self>, ContextError> {
        let host_url = match request::host_url_from_request(req) {
            Some(host_url) => host_url,
            None => return Ok(None),
        };

        let required = |name: &'static str| {
            request::parameter(req, name).ok_or(ContextError::MissingParameter(name))
        };

        Ok(Some(Self {
            app_web_url: request::app_web_url_from_request(req),
            language: required(SP_LANGUAGE)?,
            client_tag: required(SP_CLIENT_TAG)?,
            product_number: required(SP_PRODUCT_NUMBER)?,
            host_url,
        }))
    }

    /// The host web
    pub fn host_url(&self) -> &Url {
        &self.host_url
    }

    /// The add-in web, if the add-in has one
    pub fn app_web_url(&self) -> Option<&Url> {
        self.app_web_url.as_ref()
    }

    /// The user's language
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The host's client tag
    pub fn client_tag(&self) -> &str {
        &self.client_tag
    }

    /// The host's product number
    pub fn product_number(&self) -> &str {
        &self.product_number
    }
}

/// How a context obtains its access tokens
#[derive(Clone, Debug)]
pub enum TrustMode {
    /// Tokens are exchanged with the issuance service using a context token
    Delegated {
        /// The validated context token
        token: ContextToken,
        /// The context token as it was posted
        encoded: EncodedContextToken,
    },
    /// Tokens are minted locally on behalf of an identity
    HighTrust {
        /// The caller's verified identity
        identity: CallerIdentity,
    },
}

/// An authenticated session with a host web
#[derive(Debug)]
pub struct AuthenticatedContext<C = System> {
    engine: Arc<TrustEngine<C>>,
    host: HostInfo,
    mode: TrustMode,
    tokens: AccessTokenCache<C>,
}

impl<C: Clone> AuthenticatedContext<C> {
    /// Constructs a context backed by a validated context token
    pub fn delegated(
        engine: Arc<TrustEngine<C>>,
        host: HostInfo,
        token: ContextToken,
        encoded: EncodedContextToken,
    ) -> Self {
        Self::with_mode(engine, host, TrustMode::Delegated { token, encoded })
    }

    /// Constructs a context that mints tokens on behalf of `identity`
    pub fn high_trust(engine: Arc<TrustEngine<C>>, host: HostInfo, identity: CallerIdentity) -> Self {
        Self::with_mode(engine, host, TrustMode::HighTrust { identity })
    }

    fn with_mode(engine: Arc<TrustEngine<C>>, host: HostInfo, mode: TrustMode) -> Self {
        let tokens = AccessTokenCache::new().with_clock(engine.clock().clone());
        Self {
            engine,
            host,
            mode,
            tokens,
        }
    }
}

impl<C> AuthenticatedContext<C> {
    /// The engine this context was created with
    pub fn engine(&self) -> &Arc<TrustEngine<C>> {
        &self.engine
    }

    /// The launch parameters
    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// The host web
    pub fn host_url(&self) -> &Url {
        self.host.host_url()
    }

    /// The add-in web, if the add-in has one
    pub fn app_web_url(&self) -> Option<&Url> {
        self.host.app_web_url()
    }

    /// How this context obtains its tokens
    pub fn mode(&self) -> &TrustMode {
        &self.mode
    }

    /// The identity tokens are minted for, in high-trust mode
    pub fn identity(&self) -> Option<&CallerIdentity> {
        match &self.mode {
            TrustMode::HighTrust { identity } => Some(identity),
            TrustMode::Delegated { .. } => None,
        }
    }

    fn target_for(&self, kind: TokenKind) -> Option<&Url> {
        if kind.targets_app_web() {
            self.host.app_web_url()
        } else {
            Some(self.host.host_url())
        }
    }
}

impl<C: Clock> AuthenticatedContext<C> {
    /// The context token, while it remains unexpired
    pub fn context_token(&self) -> Option<&ContextToken> {
        match &self.mode {
            TrustMode::Delegated { token, .. }
                if !token.is_expired_with_clock(self.engine.clock()) =>
            {
                Some(token)
            }
            _ => None,
        }
    }

    /// The context token as it was posted, while it remains unexpired
    pub fn encoded_context_token(&self) -> Option<&EncodedContextTokenRef> {
        match &self.mode {
            TrustMode::Delegated { token, encoded }
                if !token.is_expired_with_clock(self.engine.clock()) =>
            {
                Some(&**encoded)
            }
            _ => None,
        }
    }

    /// The cache key of the context token, while it remains unexpired
    pub fn cache_key(&self) -> Option<&CacheKeyRef> {
        self.context_token().map(ContextToken::cache_key)
    }

    /// The refresh token of the context token, while it remains unexpired
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.context_token().map(ContextToken::refresh_token)
    }
}

impl<C: Clock + Send + Sync> AuthenticatedContext<C> {
    /// An access token of the given kind, renewed first if necessary
    ///
    /// Returns `Ok(None)` when no token can be had right now, such as when the kind
    /// targets an add-in web this context lacks, or when the issuance service is
    /// unreachable.
    pub async fn access_token(&self, kind: TokenKind) -> Result<Option<AccessToken>, ContextError> {
        if self.target_for(kind).is_none() {
            return Ok(None);
        }

        self.tokens.get_or_renew(kind, self).await
    }

    /// A user token for the host web
    pub async fn user_access_token_for_host(&self) -> Result<Option<AccessToken>, ContextError> {
        self.access_token(TokenKind::UserHost).await
    }

    /// A user token for the add-in web
    pub async fn user_access_token_for_app_web(&self) -> Result<Option<AccessToken>, ContextError> {
        self.access_token(TokenKind::UserAppWeb).await
    }

    /// An app-only token for the host web
    pub async fn app_only_access_token_for_host(&self) -> Result<Option<AccessToken>, ContextError> {
        self.access_token(TokenKind::AppOnlyHost).await
    }

    /// An app-only token for the add-in web
    pub async fn app_only_access_token_for_app_web(
        &self,
    ) -> Result<Option<AccessToken>, ContextError> {
        self.access_token(TokenKind::AppOnlyAppWeb).await
    }

    /// A snapshot of the cached record for a kind
    pub async fn token_record(&self, kind: TokenKind) -> AccessTokenRecord {
        self.tokens.record(kind).await
    }

    /// A client for the web targeted by `kind`, authenticated with a token of that kind
    pub async fn create_client(&self, kind: TokenKind) -> Result<Option<HostClient>, ContextError> {
        let target = match self.target_for(kind) {
            Some(target) => target.clone(),
            None => return Ok(None),
        };

        match self.access_token(kind).await? {
            Some(token) => Ok(Some(HostClient::new(
                self.engine.client().clone(),
                target,
                &token,
            )?)),
            None => Ok(None),
        }
    }

    /// A client for the host web acting as the user
    pub async fn create_user_client_for_host(&self) -> Result<Option<HostClient>, ContextError> {
        self.create_client(TokenKind::UserHost).await
    }

    /// A client for the add-in web acting as the user
    pub async fn create_user_client_for_app_web(&self) -> Result<Option<HostClient>, ContextError> {
        self.create_client(TokenKind::UserAppWeb).await
    }

    /// A client for the host web acting as the add-in alone
    pub async fn create_app_only_client_for_host(&self) -> Result<Option<HostClient>, ContextError> {
        self.create_client(TokenKind::AppOnlyHost).await
    }

    /// A client for the add-in web acting as the add-in alone
    pub async fn create_app_only_client_for_app_web(
        &self,
    ) -> Result<Option<HostClient>, ContextError> {
        self.create_client(TokenKind::AppOnlyAppWeb).await
    }

    async fn renew_delegated(
        &self,
        kind: TokenKind,
        token: &ContextToken,
        target: &Url,
    ) -> Result<Renewal, ContextError> {
        let config = self.engine.config();
        let authority = principals::authority(target);

        let result = if kind.is_app_only() {
            let discovered = self.engine.realms().discover_realm(target).await;
            let realm = discovered
                .as_deref()
                .or_else(|| config.realm())
                .unwrap_or_else(|| token.realm());

            self.engine
                .exchanger()
                .exchange(
                    Grant::ClientCredentials,
                    principals::SHAREPOINT_PRINCIPAL,
                    &authority,
                    realm,
                )
                .await
        } else {
            if token.is_expired_with_clock(self.engine.clock()) {
                tracing::debug!("context token expired; user token cannot be renewed");
                return Ok(Renewal::Unavailable);
            }

            let realm = config.realm().unwrap_or_else(|| token.realm());
            self.engine
                .exchanger()
                .exchange(
                    Grant::RefreshToken(token.refresh_token()),
                    token.target_principal_name(),
                    &authority,
                    realm,
                )
                .await
        };

        swallow_transport(result)
    }
}

fn swallow_transport(
    result: Result<Option<IssuedToken>, ExchangeError>,
) -> Result<Renewal, ContextError> {
    match result {
        Ok(Some(issued)) => Ok(Renewal::Fresh(issued)),
        Ok(None) => Ok(Renewal::Unavailable),
        Err(error) if error.is_transport() => {
            tracing::warn!(%error, "unable to renew access token; continuing without one");
            Ok(Renewal::Unavailable)
        }
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenRenewer for AuthenticatedContext<C> {
    type Error = ContextError;

    #[tracing::instrument(err, skip(self))]
    async fn renew(&self, kind: TokenKind) -> Result<Renewal, Self::Error> {
        let target = match self.target_for(kind) {
            Some(target) => target,
            None => return Ok(Renewal::Unavailable),
        };

        match &self.mode {
            TrustMode::Delegated { token, .. } => self.renew_delegated(kind, token, target).await,
            TrustMode::HighTrust { identity } => {
                let identity = if kind.is_app_only() { None } else { Some(identity) };
                let issued = self.engine.issuer().issue_for_url(target, identity).await?;
                Ok(Renewal::Fresh(issued))
            }
        }
    }
}
