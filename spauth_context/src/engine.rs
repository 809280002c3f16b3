//! The shared trust engine
//!
//! A [`TrustEngine`] is built once from a [`TrustConfig`] at startup and shared by
//! every request. It owns the HTTP client and the components that act on the
//! configuration, and can hand out one-shot [`HostClient`]s for targets outside any
//! session.

use std::sync::Arc;

use aliri_clock::{Clock, System};
use reqwest::{Client, Url};
use spauth::{
    error::{ConfigError, ValidationError},
    principals, CallerIdentity, ContextToken, ContextTokenValidator, EncodedContextTokenRef,
    MetadataResolver, Realm, RealmDiscovery, S2STokenIssuer, TrustConfig,
};
use spauth_tokens::{Grant, OAuth2Exchanger};

use crate::{
    event::{AppEventTarget, RemoteEventProperties},
    redirect, ContextError, HostClient,
};

/// The components that establish trust with the host, wired to one configuration
#[derive(Debug)]
pub struct TrustEngine<C = System> {
    config: Arc<TrustConfig>,
    client: Client,
    validator: ContextTokenValidator<C>,
    realms: RealmDiscovery,
    exchanger: OAuth2Exchanger<C>,
    issuer: S2STokenIssuer<C>,
    clock: C,
}

impl TrustEngine<System> {
    /// Builds an engine from a configuration
    pub fn new(config: TrustConfig) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let client = config.http_client()?;
        let realms = RealmDiscovery::new(client.clone());
        let metadata = MetadataResolver::new(&config, client.clone());

        tracing::debug!(
            client_id = %config.client_id(),
            high_trust = config.is_high_trust(),
            "constructed trust engine"
        );

        Ok(Self {
            validator: ContextTokenValidator::new(Arc::clone(&config))?,
            exchanger: OAuth2Exchanger::new(Arc::clone(&config), metadata, client.clone()),
            issuer: S2STokenIssuer::new(Arc::clone(&config), realms.clone()),
            realms,
            client,
            config,
            clock: System,
        })
    }
}

impl<C> TrustEngine<C> {
    /// Sets a custom clock to be used by every component
    ///
    /// Useful for testing purposes
    pub fn with_clock<D: Clone>(self, clock: D) -> TrustEngine<D> {
        TrustEngine {
            config: self.config,
            client: self.client,
            validator: self.validator.with_clock(clock.clone()),
            realms: self.realms,
            exchanger: self.exchanger.with_clock(clock.clone()),
            issuer: self.issuer.with_clock(clock.clone()),
            clock,
        }
    }

    /// The configuration
    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    /// The shared HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Whether tokens are minted locally rather than obtained from the issuance service
    pub fn is_high_trust(&self) -> bool {
        self.config.is_high_trust()
    }

    /// The context token validator
    pub fn validator(&self) -> &ContextTokenValidator<C> {
        &self.validator
    }

    /// The realm prober
    pub fn realms(&self) -> &RealmDiscovery {
        &self.realms
    }

    /// The grant exchanger
    pub fn exchanger(&self) -> &OAuth2Exchanger<C> {
        &self.exchanger
    }

    /// The high-trust token issuer
    pub fn issuer(&self) -> &S2STokenIssuer<C> {
        &self.issuer
    }

    /// The host page that issues a fresh context token and redirects to `redirect_uri`
    pub fn context_token_request_url(
        &self,
        host_url: &Url,
        redirect_uri: &Url,
    ) -> Result<Url, url::ParseError> {
        redirect::context_token_request_url(host_url, self.config.client_id(), redirect_uri.as_str())
    }

    /// The host page that asks the user to consent to `scope` and returns an authorization code
    pub fn authorization_url(
        &self,
        context_url: &Url,
        scope: &str,
        redirect_uri: Option<&Url>,
    ) -> Result<Url, url::ParseError> {
        redirect::authorization_url(context_url, self.config.client_id(), scope, redirect_uri)
    }
}

impl<C: Clock> TrustEngine<C> {
    /// Validates a context token addressed to `request_host`
    pub fn validate_context_token(
        &self,
        token: &EncodedContextTokenRef,
        request_host: Option<&str>,
    ) -> Result<ContextToken, ValidationError> {
        self.validator.validate(token, request_host)
    }

    /// A client for `target` authenticated with an authorization code
    ///
    /// The code is exchanged within the realm discovered for the target, falling back
    /// to the configured realm, and then to no realm at all.
    #[tracing::instrument(err, skip(self, code), fields(target = %target))]
    pub async fn client_with_authorization_code(
        &self,
        target: &Url,
        code: &str,
        redirect_uri: &Url,
    ) -> Result<HostClient, ContextError> {
        let realm = match self.realms.discover_realm(target).await {
            Some(realm) => realm,
            None => self
                .config
                .realm()
                .map_or_else(|| Realm::new(String::new()), ToOwned::to_owned),
        };

        let issued = self
            .exchanger
            .exchange(
                Grant::AuthorizationCode { code, redirect_uri },
                principals::SHAREPOINT_PRINCIPAL,
                &principals::authority(target),
                &realm,
            )
            .await?
            .ok_or(ContextError::NoAccessToken)?;

        Ok(HostClient::new(
            self.client.clone(),
            target.clone(),
            issued.access_token(),
        )?)
    }

    /// A client for `target` authenticated with a freshly posted context token
    ///
    /// `app_host` is the authority the token must be addressed to when no host name is
    /// configured.
    #[tracing::instrument(err, skip(self, token), fields(target = %target))]
    pub async fn client_with_context_token(
        &self,
        target: &Url,
        token: &EncodedContextTokenRef,
        app_host: Option<&str>,
    ) -> Result<HostClient, ContextError> {
        let token = self.validator.validate(token, app_host)?;
        let realm = self.config.realm().unwrap_or_else(|| token.realm());

        let issued = self
            .exchanger
            .exchange(
                Grant::RefreshToken(token.refresh_token()),
                token.target_principal_name(),
                &principals::authority(target),
                realm,
            )
            .await?
            .ok_or(ContextError::NoAccessToken)?;

        Ok(HostClient::new(
            self.client.clone(),
            target.clone(),
            issued.access_token(),
        )?)
    }

    /// A client for `target` authenticated with a locally minted token
    ///
    /// Without an identity, the token acts as the add-in alone.
    #[tracing::instrument(err, skip(self, identity), fields(target = %target))]
    pub async fn high_trust_client(
        &self,
        target: &Url,
        identity: Option<&CallerIdentity>,
    ) -> Result<HostClient, ContextError> {
        let issued = self.issuer.issue_for_url(target, identity).await?;

        Ok(HostClient::new(
            self.client.clone(),
            target.clone(),
            issued.access_token(),
        )?)
    }

    /// A client for the web a remote event concerns
    ///
    /// In high-trust mode an app-only token is minted for `web_url`. Otherwise the
    /// event's context token is validated against `app_host` and exchanged, and an
    /// event without a context token yields no client.
    #[tracing::instrument(err, skip(self, context_token), fields(web_url = %web_url))]
    pub async fn client_for_remote_event(
        &self,
        web_url: &Url,
        context_token: Option<&EncodedContextTokenRef>,
        app_host: Option<&str>,
    ) -> Result<Option<HostClient>, ContextError> {
        if self.is_high_trust() {
            return self.high_trust_client(web_url, None).await.map(Some);
        }

        match context_token {
            Some(token) if !token.as_str().is_empty() => self
                .client_with_context_token(web_url, token, app_host)
                .await
                .map(Some),
            _ => {
                tracing::debug!("remote event carries no context token");
                Ok(None)
            }
        }
    }

    /// A client for the web a list, item, or web event originated from
    ///
    /// Returns `Ok(None)` if the event names no web.
    pub async fn remote_event_client(
        &self,
        event: &RemoteEventProperties,
        app_host: Option<&str>,
    ) -> Result<Option<HostClient>, ContextError> {
        match event.web_url() {
            Some(web_url) => {
                self.client_for_remote_event(web_url, event.context_token(), app_host)
                    .await
            }
            None => Ok(None),
        }
    }

    /// A client for the host web or add-in web of an add-in lifecycle event
    ///
    /// Returns `Ok(None)` if the event is not a lifecycle event or lacks the
    /// requested web.
    pub async fn app_event_client(
        &self,
        event: &RemoteEventProperties,
        target: AppEventTarget,
        app_host: Option<&str>,
    ) -> Result<Option<HostClient>, ContextError> {
        match event.app_event_url(target) {
            Some(web_url) => {
                self.client_for_remote_event(web_url, event.context_token(), app_host)
                    .await
            }
            None => Ok(None),
        }
    }
}
