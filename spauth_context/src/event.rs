//! Remote events posted by the host
//!
//! When a list, item, web, or add-in lifecycle event fires, the host posts the
//! event's properties to the add-in's receiver. Those properties name the web the
//! event concerns and, for delegated add-ins, carry a context token that can be
//! exchanged for an access token to that web.

use reqwest::Url;
use spauth::{EncodedContextToken, EncodedContextTokenRef};

/// Which web an add-in lifecycle event client should target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppEventTarget {
    /// The web the add-in is installed to
    HostWeb,
    /// The add-in's own web
    AppWeb,
}

/// The URLs carried by an add-in lifecycle event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppEventUrls {
    /// The web the add-in is installed to
    pub host_web_url: Url,
    /// The add-in's own web, if it has one
    pub app_web_url: Option<Url>,
}

/// The properties of a remote event
#[derive(Clone, Debug, Default)]
pub struct RemoteEventProperties {
    context_token: Option<EncodedContextToken>,
    list_web_url: Option<Url>,
    item_web_url: Option<Url>,
    web_full_url: Option<Url>,
    app_event: Option<AppEventUrls>,
}

impl RemoteEventProperties {
    /// Properties carrying nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the context token posted with the event
    pub fn with_context_token(mut self, token: EncodedContextToken) -> Self {
        self.context_token = Some(token);
        self
    }

    /// Attaches the web URL of a list event
    pub fn with_list_event(mut self, web_url: Url) -> Self {
        self.list_web_url = Some(web_url);
        self
    }

    /// Attaches the web URL of an item event
    pub fn with_item_event(mut self, web_url: Url) -> Self {
        self.item_web_url = Some(web_url);
        self
    }

    /// Attaches the full URL of a web event
    pub fn with_web_event(mut self, full_url: Url) -> Self {
        self.web_full_url = Some(full_url);
        self
    }

    /// Attaches the URLs of an add-in lifecycle event
    pub fn with_app_event(mut self, urls: AppEventUrls) -> Self {
        self.app_event = Some(urls);
        self
    }

    /// The context token posted with the event, if any
    pub fn context_token(&self) -> Option<&EncodedContextTokenRef> {
        self.context_token.as_deref()
    }

    /// The web a list, item, or web event originated from
    ///
    /// List event properties take precedence over item event properties, which take
    /// precedence over web event properties.
    pub fn web_url(&self) -> Option<&Url> {
        self.list_web_url
            .as_ref()
            .or(self.item_web_url.as_ref())
            .or(self.web_full_url.as_ref())
    }

    /// The web an add-in lifecycle event concerns
    pub fn app_event_url(&self, target: AppEventTarget) -> Option<&Url> {
        let urls = self.app_event.as_ref()?;
        match target {
            AppEventTarget::HostWeb => Some(&urls.host_web_url),
            AppEventTarget::AppWeb => urls.app_web_url.as_ref(),
        }
    }
}
