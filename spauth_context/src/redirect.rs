//! Deciding whether to send the browser back to the host for a context token
//!
//! When no authenticated context can be had for a request, the add-in may bounce the
//! browser to the host's `AppRedirect.aspx` page, which posts a fresh context token
//! back to the return URL. Rules are applied in order, and the first that fires wins:
//!
//! 1. A context is available: [`RedirectionOutcome::Ok`].
//! 2. The request was already redirected once and the token was not merely expired:
//!    [`RedirectionOutcome::CanNotRedirect`], to break redirect loops.
//! 3. The request names no host web: [`RedirectionOutcome::CanNotRedirect`].
//! 4. The request is a `POST`, which cannot be replayed: [`RedirectionOutcome::CanNotRedirect`].
//! 5. Otherwise, [`RedirectionOutcome::ShouldRedirect`].

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, Url};
use spauth::ClientIdRef;

use crate::request::{
    ensure_trailing_slash, REDIRECTED_MARKER, SP_APP_WEB_URL, SP_CLIENT_TAG, SP_HOST_URL,
    SP_LANGUAGE, SP_PRODUCT_NUMBER,
};

const APP_REDIRECT_PAGE: &str = "_layouts/15/AppRedirect.aspx";
const AUTHORIZATION_PAGE: &str = "_layouts/15/OAuthAuthorize.aspx";

/// The placeholder the host expands into the standard launch parameters
pub const STANDARD_TOKENS: &str = "{StandardTokens}";

const STRIPPED_PARAMETERS: [&str; 6] = [
    SP_HOST_URL,
    SP_APP_WEB_URL,
    SP_LANGUAGE,
    SP_CLIENT_TAG,
    SP_PRODUCT_NUMBER,
    REDIRECTED_MARKER,
];

/// Everything but unreserved characters is escaped
const DATA_STRING: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The decision for a request lacking an authenticated context
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectionOutcome {
    /// An authenticated context is available
    Ok,
    /// Send the browser to this URL on the host
    ShouldRedirect(Url),
    /// No redirect can help
    CanNotRedirect,
}

/// The facts a redirection decision is made from
#[derive(Clone, Copy, Debug)]
pub struct RedirectInputs<'a> {
    /// Whether an authenticated context could be obtained
    pub has_context: bool,
    /// Whether the context token was rejected specifically for having expired
    pub token_expired: bool,
    /// Whether the request carries the redirected-once marker
    pub already_redirected: bool,
    /// The host web named by the request
    pub host_url: Option<&'a Url>,
    /// The request method
    pub method: &'a Method,
    /// The full request URL
    pub request_url: &'a Url,
}

/// Decides whether to redirect
pub fn decide(inputs: &RedirectInputs<'_>, client_id: &ClientIdRef) -> RedirectionOutcome {
    if inputs.has_context {
        return RedirectionOutcome::Ok;
    }

    if inputs.already_redirected && !inputs.token_expired {
        tracing::debug!("already redirected once; not redirecting again");
        return RedirectionOutcome::CanNotRedirect;
    }

    let host_url = match inputs.host_url {
        Some(host_url) => host_url,
        None => return RedirectionOutcome::CanNotRedirect,
    };

    if *inputs.method == Method::POST {
        return RedirectionOutcome::CanNotRedirect;
    }

    let return_url = return_url(inputs.request_url);
    match context_token_request_url(host_url, client_id, &return_url) {
        Ok(target) => RedirectionOutcome::ShouldRedirect(target),
        Err(error) => {
            tracing::warn!(%error, "unable to form context token request URL");
            RedirectionOutcome::CanNotRedirect
        }
    }
}

/// The URL the host should send the browser back to
///
/// Launch parameters are removed from the query, since the host supplies them again
/// in place of the [`STANDARD_TOKENS`] placeholder, which leads the query. The
/// redirected-once marker is appended.
pub fn return_url(request_url: &Url) -> String {
    let kept: Vec<(String, String)> = request_url
        .query_pairs()
        .filter(|(k, _)| !STRIPPED_PARAMETERS.iter().any(|p| k.eq_ignore_ascii_case(p)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = request_url.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(REDIRECTED_MARKER, "1");

    let mut return_url = url.to_string();
    if let Some(idx) = return_url.find('?') {
        return_url.insert_str(idx + 1, &format!("{}&", STANDARD_TOKENS));
    }
    return_url
}

/// Escapes a value for use as a query parameter, leaving only unreserved characters
pub fn escape_data_string(value: &str) -> String {
    utf8_percent_encode(value, DATA_STRING).to_string()
}

/// The host page that issues a fresh context token and redirects to `redirect_uri`
pub fn context_token_request_url(
    host_url: &Url,
    client_id: &ClientIdRef,
    redirect_uri: &str,
) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}{}?client_id={}&redirect_uri={}",
        ensure_trailing_slash(host_url.as_str()),
        APP_REDIRECT_PAGE,
        client_id.as_str(),
        escape_data_string(redirect_uri),
    ))
}

/// The host page that asks the user to consent to `scope` and returns an authorization code
///
/// `scope` is a space-delimited list of permissions in shorthand, such as
/// `Web.Read List.Write`.
pub fn authorization_url(
    context_url: &Url,
    client_id: &ClientIdRef,
    scope: &str,
    redirect_uri: Option<&Url>,
) -> Result<Url, url::ParseError> {
    let mut url = format!(
        "{}{}?IsDlg=1&client_id={}&scope={}&response_type=code",
        ensure_trailing_slash(context_url.as_str()),
        AUTHORIZATION_PAGE,
        client_id.as_str(),
        escape_data_string(scope),
    );
    if let Some(redirect_uri) = redirect_uri {
        url.push_str("&redirect_uri=");
        url.push_str(&escape_data_string(redirect_uri.as_str()));
    }
    Url::parse(&url)
}
