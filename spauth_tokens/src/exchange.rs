//! Token exchange with the token-issuance service
//!
//! The issuance service is located through the trust metadata for the realm, then
//! sent a form-encoded OAuth2 token request for one of three grants. The response
//! carries the token's validity window as seconds since the epoch.

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};
use reqwest::{Client, Url};
use spauth::{
    error::MetadataError, principals, AccessToken, IssuedToken, MetadataResolver, Protocol,
    RealmRef, RefreshTokenRef, TrustConfig,
};
use thiserror::Error;

mod dto;

/// A grant to exchange for an access token
#[derive(Clone, Copy, Debug)]
pub enum Grant<'a> {
    /// Continues a delegated session with the refresh token from a context token
    RefreshToken(&'a RefreshTokenRef),
    /// Completes a first login with a one-time code
    AuthorizationCode {
        /// The code returned to the redirect URI
        code: &'a str,
        /// The redirect URI the code was issued for
        redirect_uri: &'a Url,
    },
    /// Acts as the add-in alone, with no user context
    ClientCredentials,
}

impl<'a> Grant<'a> {
    /// The OAuth2 `grant_type` for this grant
    pub fn grant_type(&self) -> &'static str {
        self.body().grant_type()
    }

    fn body(&self) -> dto::GrantBody<'a> {
        match *self {
            Self::RefreshToken(refresh_token) => dto::GrantBody::RefreshToken(refresh_token),
            Self::AuthorizationCode { code, redirect_uri } => dto::GrantBody::AuthorizationCode {
                code,
                redirect_uri: redirect_uri.as_str(),
            },
            Self::ClientCredentials => dto::GrantBody::ClientCredentials,
        }
    }
}

/// An error while exchanging a grant for an access token
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The issuance endpoint could not be resolved
    #[error("unable to resolve token-issuance endpoint")]
    Metadata(#[from] MetadataError),
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// The authority stated neither an expiry nor a lifetime
    #[error("token response carries no expiry")]
    MissingExpiry,
}

impl ExchangeError {
    /// Whether the failure happened on the wire, including timeouts and error statuses
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Metadata(err) => err.is_transport(),
            Self::ErrorWithBody { .. } | Self::BodyReadError(_) | Self::RequestSend(_) => true,
            Self::TokenBodyError(_) | Self::MissingExpiry => false,
        }
    }
}

/// Exchanges grants for access tokens with the token-issuance service
#[derive(Debug)]
pub struct OAuth2Exchanger<C = System> {
    client: Client,
    config: Arc<TrustConfig>,
    metadata: MetadataResolver,
    clock: C,
}

impl OAuth2Exchanger<System> {
    /// Constructs a new exchanger
    pub fn new(config: Arc<TrustConfig>, metadata: MetadataResolver, client: Client) -> Self {
        Self {
            client,
            config,
            metadata,
            clock: System,
        }
    }
}

impl<C> OAuth2Exchanger<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> OAuth2Exchanger<D> {
        OAuth2Exchanger {
            client: self.client,
            config: self.config,
            metadata: self.metadata,
            clock,
        }
    }
}

impl<C: Clock> OAuth2Exchanger<C> {
    /// Exchanges `grant` for an access token to `target_principal` at `target_host`
    ///
    /// Returns `Ok(None)` without contacting the service when the grant is a refresh
    /// token and that token is empty.
    #[tracing::instrument(
        err,
        skip(self, grant, target_principal, realm),
        fields(realm = %realm, grant_type = grant.grant_type()),
    )]
    pub async fn exchange(
        &self,
        grant: Grant<'_>,
        target_principal: &str,
        target_host: &str,
        realm: &RealmRef,
    ) -> Result<Option<IssuedToken>, ExchangeError> {
        if let Grant::RefreshToken(refresh_token) = grant {
            if refresh_token.as_str().is_empty() {
                tracing::debug!("no refresh token to exchange");
                return Ok(None);
            }
        }

        let client_host = match grant {
            Grant::ClientCredentials => self.config.host_name(),
            _ => None,
        };
        let client_id =
            principals::format_principal(self.config.client_id().as_str(), client_host, realm.as_str());
        let resource =
            principals::format_principal(target_principal, Some(target_host), realm.as_str());

        let token_url = self
            .metadata
            .endpoint_for_realm(realm, Protocol::OAuth2)
            .await?;

        let request = dto::TokenRequest {
            client_id: &client_id,
            client_secret: self.config.client_secret(),
            resource: &resource,
            grant: grant.body(),
        };

        tracing::trace!(%token_url, %client_id, "requesting token from authority");
        let resp = self
            .client
            .post(token_url)
            .form(&request)
            .send()
            .await
            .map_err(ExchangeError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from issuing authority"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(ExchangeError::BodyReadError)?;
            return Err(ExchangeError::ErrorWithBody {
                source: error,
                body,
            });
        }

        let body = resp.bytes().await.map_err(ExchangeError::BodyReadError)?;
        let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

        let now = self.clock.now();
        let not_before = resp.not_before.map_or(now, UnixTime);
        let expires_on = match (resp.expires_on, resp.expires_in) {
            (Some(expires_on), _) => UnixTime(expires_on),
            (None, Some(expires_in)) => UnixTime(now.0 + expires_in),
            (None, None) => return Err(ExchangeError::MissingExpiry),
        };

        tracing::info!(
            token.not_before = not_before.0,
            token.expiry = expires_on.0,
            "received new access token"
        );

        Ok(Some(IssuedToken::new(
            AccessToken::new(resp.access_token),
            not_before,
            expires_on,
        )))
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;
    use serde_json::json;
    use spauth::{config::GlobalEndpoint, RefreshToken};
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const REALM: &str = "3a1b2c3d-4e5f-6789-abcd-ef0123456789";
    const HOST: &str = "contoso.sharepoint.com";

    async fn mount_metadata(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/metadata/json/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "endpoints": [
                    { "location": format!("{}/tokens/OAuth/2", server.uri()), "protocol": "OAuth2" },
                ],
                "keys": [],
            })))
            .mount(server)
            .await;
    }

    fn exchanger(server: &MockServer, host_name: Option<&str>) -> Result<OAuth2Exchanger> {
        let mut builder = TrustConfig::builder("client-1")
            .client_secret("c2VjcmV0")
            .global_endpoint(GlobalEndpoint::Base(Url::parse(&server.uri())?));
        if let Some(host_name) = host_name {
            builder = builder.host_name(host_name);
        }
        let config = Arc::new(builder.build());
        let client = config.http_client()?;
        let metadata = MetadataResolver::new(&config, client.clone());
        Ok(OAuth2Exchanger::new(config, metadata, client))
    }

    fn realm() -> &'static RealmRef {
        RealmRef::from_str(REALM)
    }

    #[tokio::test]
    async fn refresh_token_grant_posts_form() -> Result<()> {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("POST"))
            .and(path("/tokens/OAuth/2"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=client-1%40"))
            .and(body_string_contains("client_secret=c2VjcmV0"))
            .and(body_string_contains("refresh_token=rt-1"))
            .and(body_string_contains(
                "resource=00000003-0000-0ff1-ce00-000000000000%2Fcontoso.sharepoint.com%40",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "at-1",
                "not_before": "1700000000",
                "expires_on": "1700003600",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refresh_token = RefreshToken::from_static("rt-1");
        let issued = exchanger(&server, None)?
            .exchange(
                Grant::RefreshToken(&refresh_token),
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("expected a token"))?;

        assert_eq!(issued.access_token().as_str(), "at-1");
        assert_eq!(issued.not_before(), UnixTime(1_700_000_000));
        assert_eq!(issued.expires_on(), UnixTime(1_700_003_600));
        Ok(())
    }

    #[tokio::test]
    async fn empty_refresh_token_skips_the_network() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let refresh_token = RefreshToken::from_static("");
        let issued = exchanger(&server, None)?
            .exchange(
                Grant::RefreshToken(&refresh_token),
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await?;

        assert!(issued.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn client_credentials_include_client_host() -> Result<()> {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1%2Fapp.contoso.com%40"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "app-only",
                "expires_in": "3600",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let issued = exchanger(&server, Some("app.contoso.com"))?
            .with_clock(TestClock::new(UnixTime(1000)))
            .exchange(
                Grant::ClientCredentials,
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("expected a token"))?;

        assert_eq!(issued.not_before(), UnixTime(1000));
        assert_eq!(issued.expires_on(), UnixTime(4600));
        Ok(())
    }

    #[tokio::test]
    async fn authorization_code_carries_redirect_uri() -> Result<()> {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=one-time"))
            .and(body_string_contains(
                "redirect_uri=https%3A%2F%2Fapp.contoso.com%2Fcallback",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "not_before": 1000,
                "expires_on": 4600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let redirect_uri = Url::parse("https://app.contoso.com/callback")?;
        let issued = exchanger(&server, None)?
            .exchange(
                Grant::AuthorizationCode {
                    code: "one-time",
                    redirect_uri: &redirect_uri,
                },
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await?;

        assert!(issued.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn error_status_carries_body() -> Result<()> {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("AADSTS70000: invalid_grant"),
            )
            .mount(&server)
            .await;

        let err = exchanger(&server, None)?
            .exchange(
                Grant::ClientCredentials,
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert!(err.to_string().contains("invalid_grant"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_expiry_is_an_error() -> Result<()> {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-3",
            })))
            .mount(&server)
            .await;

        let err = exchanger(&server, None)?
            .exchange(
                Grant::ClientCredentials,
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::MissingExpiry));
        assert!(!err.is_transport());
        Ok(())
    }

    #[tokio::test]
    async fn missing_endpoint_is_not_transport() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/json/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "endpoints": [] })))
            .mount(&server)
            .await;

        let err = exchanger(&server, None)?
            .exchange(
                Grant::ClientCredentials,
                principals::SHAREPOINT_PRINCIPAL,
                HOST,
                realm(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExchangeError::Metadata(MetadataError::NoEndpoint { .. })
        ));
        assert!(!err.is_transport());
        Ok(())
    }
}
