//! Authenticated calls back into the host

use reqwest::{
    header::{self, HeaderValue},
    Client, Method, RequestBuilder, Url,
};
use spauth::AccessTokenRef;

/// A handle for calling a host web with a bearer token
///
/// Every request built from the handle carries `Authorization: Bearer {token}`. The
/// header value is marked sensitive so that it is left out of debug output. The bearer
/// token alone authenticates the call, so no form digest is ever requested.
#[derive(Clone, Debug)]
pub struct HostClient {
    client: Client,
    base_url: Url,
    authorization: HeaderValue,
}

impl HostClient {
    /// Constructs a handle for `base_url` authenticated with `access_token`
    pub fn new(
        client: Client,
        base_url: Url,
        access_token: &AccessTokenRef,
    ) -> Result<Self, header::InvalidHeaderValue> {
        let mut authorization = HeaderValue::try_from(format!("Bearer {}", access_token.as_str()))?;
        authorization.set_sensitive(true);

        Ok(Self {
            client,
            base_url,
            authorization,
        })
    }

    /// The web this handle calls into
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Starts an authenticated request to `path`, relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, url::ParseError> {
        let url = self.base_url.join(path)?;
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, self.authorization.clone()))
    }

    /// Starts an authenticated `GET` request to `path`
    pub fn get(&self, path: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::GET, path)
    }

    /// Starts an authenticated `POST` request to `path`
    pub fn post(&self, path: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::POST, path)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use spauth::AccessToken;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[tokio::test]
    async fn requests_carry_bearer_token() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sites/dev/_api/web"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let base_url = Url::parse(&format!("{}/sites/dev/", server.uri()))?;
        let client = HostClient::new(Client::new(), base_url, &AccessToken::from_static("at-1"))?;

        let resp = client.get("_api/web")?.send().await?;
        assert!(resp.status().is_success());
        Ok(())
    }

    #[test]
    fn authorization_is_hidden_from_debug_output() -> Result<()> {
        let client = HostClient::new(
            Client::new(),
            Url::parse("https://contoso.sharepoint.com/")?,
            &AccessToken::from_static("secret-token"),
        )?;

        assert!(!format!("{:?}", client).contains("secret-token"));
        Ok(())
    }

    #[test]
    fn rejects_tokens_unfit_for_headers() -> Result<()> {
        let result = HostClient::new(
            Client::new(),
            Url::parse("https://contoso.sharepoint.com/")?,
            &AccessToken::from_static("bad\ntoken"),
        );
        assert!(result.is_err());
        Ok(())
    }
}
