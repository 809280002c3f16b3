//! The inbound request and session surfaces a web framework must provide
//!
//! A host launches an add-in by sending the user's browser to it with a handful of
//! well-known parameters, in the form body or the query string. The context token is
//! looked for under several names; the first non-empty value wins, and the form is
//! consulted before the query string.

use reqwest::{Method, Url};
use spauth::{principals, CallerIdentity, EncodedContextToken};

/// The URL of the host web
pub const SP_HOST_URL: &str = "SPHostUrl";
/// The URL of the add-in web, if the add-in has one
pub const SP_APP_WEB_URL: &str = "SPAppWebUrl";
/// The user's language
pub const SP_LANGUAGE: &str = "SPLanguage";
/// The host's client tag
pub const SP_CLIENT_TAG: &str = "SPClientTag";
/// The host's product number
pub const SP_PRODUCT_NUMBER: &str = "SPProductNumber";
/// Marks a request that has already been bounced to the host once
pub const REDIRECTED_MARKER: &str = "SPHasRedirectedToSharePoint";

/// The parameters a context token may be posted under, in order of preference
pub const CONTEXT_TOKEN_PARAMETERS: [&str; 4] =
    ["AppContext", "AppContextToken", "AccessToken", "SPAppToken"];

/// The session slot holding the authenticated context
pub const SESSION_KEY: &str = "SPContext";
/// The cookie correlating a browser with the cache key of its context token
pub const CACHE_KEY_COOKIE: &str = "SPCacheKey";

/// An inbound HTTP request
pub trait HostRequest {
    /// The request method
    fn method(&self) -> &Method;

    /// The full request URL
    fn url(&self) -> &Url;

    /// A value from the posted form body
    fn form_value(&self, name: &str) -> Option<String>;

    /// A cookie sent with the request
    fn cookie(&self, name: &str) -> Option<String>;

    /// The identity the web server authenticated the caller as
    fn identity(&self) -> Option<&CallerIdentity>;

    /// A value from the query string, matched without regard to case
    fn query_value(&self, name: &str) -> Option<String> {
        self.url()
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.into_owned())
    }

    /// The `host[:port]` the request was addressed to
    fn authority(&self) -> String {
        principals::authority(self.url())
    }
}

/// A cookie to set on the response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseCookie {
    /// The cookie name
    pub name: String,
    /// The cookie value
    pub value: String,
    /// Send only over HTTPS
    pub secure: bool,
    /// Hide from scripts
    pub http_only: bool,
}

/// Per-user session storage
pub trait SessionStore<T> {
    /// Loads the value stored under `key`
    fn get(&self, key: &str) -> Option<T>;

    /// Stores `value` under `key`
    fn insert(&mut self, key: &str, value: T);

    /// Sets a cookie on the outgoing response
    fn set_cookie(&mut self, cookie: ResponseCookie);
}

/// The first non-empty value of `name`, from the form and then the query string
pub fn parameter<R: HostRequest + ?Sized>(req: &R, name: &str) -> Option<String> {
    req.form_value(name)
        .filter(|v| !v.is_empty())
        .or_else(|| req.query_value(name).filter(|v| !v.is_empty()))
}

/// The context token posted with the request, if any
pub fn context_token_from_request<R: HostRequest + ?Sized>(req: &R) -> Option<EncodedContextToken> {
    CONTEXT_TOKEN_PARAMETERS
        .iter()
        .find_map(|name| parameter(req, name))
        .map(EncodedContextToken::new)
}

/// The host web URL named by the request, if it is an absolute http(s) URL
pub fn host_url_from_request<R: HostRequest + ?Sized>(req: &R) -> Option<Url> {
    parameter(req, SP_HOST_URL).and_then(|raw| web_url(&raw))
}

/// The add-in web URL named by the request, if it is an absolute http(s) URL
pub fn app_web_url_from_request<R: HostRequest + ?Sized>(req: &R) -> Option<Url> {
    parameter(req, SP_APP_WEB_URL).and_then(|raw| web_url(&raw))
}

/// Whether the request carries the redirected-once marker
pub fn has_redirected<R: HostRequest + ?Sized>(req: &R) -> bool {
    req.query_value(REDIRECTED_MARKER)
        .map_or(false, |v| !v.is_empty())
}

/// Parses an absolute http(s) URL, ensuring a trailing `/`
pub fn web_url(raw: &str) -> Option<Url> {
    let url = Url::parse(&ensure_trailing_slash(raw)).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

pub(crate) fn ensure_trailing_slash(url: &str) -> String {
    if url.is_empty() || url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{}/", url)
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::TestRequest, *};

    #[test]
    fn form_wins_over_query() {
        let req = TestRequest::post("https://app.contoso.com/?AppContextToken=from-query")
            .with_form("AppContextToken", "from-form");
        assert_eq!(
            context_token_from_request(&req).as_deref().map(|t| t.as_str()),
            Some("from-form")
        );
    }

    #[test]
    fn token_parameters_are_tried_in_order() {
        let req = TestRequest::get("https://app.contoso.com/?SPAppToken=last&AccessToken=middle");
        assert_eq!(
            context_token_from_request(&req).as_deref().map(|t| t.as_str()),
            Some("middle")
        );

        let empty = TestRequest::get("https://app.contoso.com/?AppContext=&SPAppToken=last");
        assert_eq!(
            context_token_from_request(&empty).as_deref().map(|t| t.as_str()),
            Some("last")
        );
    }

    #[test]
    fn host_url_gets_trailing_slash() {
        let req = TestRequest::get(
            "https://app.contoso.com/?SPHostUrl=https%3A%2F%2Fcontoso.sharepoint.com%2Fsites%2Fdev",
        );
        assert_eq!(
            host_url_from_request(&req).as_ref().map(Url::as_str),
            Some("https://contoso.sharepoint.com/sites/dev/")
        );
    }

    #[test]
    fn non_web_urls_are_ignored() {
        let req = TestRequest::get("https://app.contoso.com/?SPHostUrl=ftp%3A%2F%2Fcontoso&SPAppWebUrl=relative");
        assert!(host_url_from_request(&req).is_none());
        assert!(app_web_url_from_request(&req).is_none());
    }

    #[test]
    fn detects_redirect_marker() {
        assert!(has_redirected(&TestRequest::get(
            "https://app.contoso.com/?SPHasRedirectedToSharePoint=1"
        )));
        assert!(!has_redirected(&TestRequest::get("https://app.contoso.com/")));
    }
}
