//! Trust configuration shared by every component
//!
//! A [`TrustConfig`] is built once at start-up, wrapped in an `Arc`, and handed to each
//! component that needs it. There is no ambient configuration state.
//!
//! ```
//! use spauth::TrustConfig;
//!
//! let config = TrustConfig::builder("b2a8f3c4-8e1d-4a6e-9a43-1f2f3c4d5e6f")
//!     .host_name("app.contoso.com")
//!     .client_secret("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=")
//!     .build();
//!
//! assert!(!config.is_high_trust());
//! assert_eq!(config.issuer_id().as_str(), config.client_id().as_str());
//! ```

use std::{path::PathBuf, time::Duration};

use aliri_base64::Base64;
use serde::Deserialize;
use url::Url;

use crate::{
    error::ConfigError, jws::SymmetricKey, ClientId, ClientIdRef, ClientSecret, ClientSecretRef,
    IssuerId, IssuerIdRef, Realm, RealmRef, SigningCredential,
};

/// The timeout applied to every outbound HTTP call unless configured otherwise
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The global service hosting trust metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobalEndpoint {
    /// `https://{prefix}.{trust_host}/`
    Hosted {
        /// The host prefix, such as `accounts`
        prefix: String,
        /// The trust host, such as `accesscontrol.windows.net`
        trust_host: String,
    },
    /// An explicit base URL
    Base(Url),
}

impl Default for GlobalEndpoint {
    fn default() -> Self {
        Self::Hosted {
            prefix: "accounts".to_owned(),
            trust_host: "accesscontrol.windows.net".to_owned(),
        }
    }
}

impl GlobalEndpoint {
    /// The URL of the metadata document for a realm
    pub fn metadata_url(&self, realm: &RealmRef) -> Result<Url, url::ParseError> {
        let mut url = match self {
            Self::Hosted { prefix, trust_host } => Url::parse(&format!(
                "https://{}.{}/metadata/json/1",
                prefix, trust_host
            ))?,
            Self::Base(base) => base.join("metadata/json/1")?,
        };

        url.query_pairs_mut().append_pair("realm", realm.as_str());
        Ok(url)
    }
}

/// Configuration for establishing trust with the host
#[derive(Clone, Debug)]
pub struct TrustConfig {
    client_id: ClientId,
    issuer_id: IssuerId,
    host_name_override: Option<String>,
    host_name: Option<String>,
    client_secret: Option<ClientSecret>,
    secondary_client_secret: Option<ClientSecret>,
    realm: Option<Realm>,
    signing_credential: Option<SigningCredential>,
    global_endpoint: GlobalEndpoint,
    http_timeout: Duration,
}

impl TrustConfig {
    /// Starts building a configuration for the given client
    pub fn builder(client_id: impl Into<String>) -> TrustConfigBuilder {
        TrustConfigBuilder {
            client_id: ClientId::new(client_id.into()),
            issuer_id: None,
            host_name_override: None,
            host_name: None,
            client_secret: None,
            secondary_client_secret: None,
            realm: None,
            signing_credential: None,
            global_endpoint: GlobalEndpoint::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Builds a configuration from named settings
    ///
    /// `ClientId` falls back to `HostedAppName`, `IssuerId` falls back to the client ID,
    /// and `ClientSecret` falls back to `HostedAppSigningKey`. Empty values are treated
    /// as absent. A signing credential is loaded only when both its key and certificate
    /// paths are set.
    pub fn from_settings(settings: TrustSettings) -> Result<Self, ConfigError> {
        let client_id = non_empty(settings.client_id)
            .or_else(|| non_empty(settings.hosted_app_name))
            .ok_or(ConfigError::Missing("ClientId"))?;

        let mut builder = Self::builder(client_id);

        if let Some(issuer_id) = non_empty(settings.issuer_id) {
            builder = builder.issuer_id(issuer_id);
        }
        if let Some(host_name_override) = non_empty(settings.hosted_app_host_name_override) {
            builder = builder.host_name_override(host_name_override);
        }
        if let Some(host_name) = non_empty(settings.hosted_app_host_name) {
            builder = builder.host_name(host_name);
        }
        if let Some(secret) = non_empty_secret(settings.client_secret)
            .or_else(|| non_empty_secret(settings.hosted_app_signing_key))
        {
            builder = builder.client_secret(secret.as_str().to_owned());
        }
        if let Some(secret) = non_empty_secret(settings.secondary_client_secret) {
            builder = builder.secondary_client_secret(secret.as_str().to_owned());
        }
        if let Some(realm) = non_empty(settings.realm) {
            builder = builder.realm(realm);
        }

        match (
            settings.client_signing_key_path,
            settings.client_signing_certificate_path,
        ) {
            (Some(key), Some(certificate)) => {
                let credential = SigningCredential::from_pem_files(key, certificate)?;
                builder = builder.signing_credential(credential);
            }
            (Some(_), None) => return Err(ConfigError::Missing("ClientSigningCertificatePath")),
            (None, Some(_)) => return Err(ConfigError::Missing("ClientSigningKeyPath")),
            (None, None) => {}
        }

        Ok(builder.build())
    }

    /// The client ID registered with the host
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The issuer ID used for self-issued tokens
    pub fn issuer_id(&self) -> &IssuerIdRef {
        &self.issuer_id
    }

    /// A `;`-separated list of host names accepted as context token audiences
    pub fn host_name_override(&self) -> Option<&str> {
        self.host_name_override.as_deref()
    }

    /// The host name of the add-in
    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    /// The primary client secret
    pub fn client_secret(&self) -> Option<&ClientSecretRef> {
        self.client_secret.as_deref()
    }

    /// The secondary client secret, accepted during secret rollover
    pub fn secondary_client_secret(&self) -> Option<&ClientSecretRef> {
        self.secondary_client_secret.as_deref()
    }

    /// A realm that overrides any realm discovered or carried in a token
    pub fn realm(&self) -> Option<&RealmRef> {
        self.realm.as_deref()
    }

    /// The high-trust signing credential
    pub fn signing_credential(&self) -> Option<&SigningCredential> {
        self.signing_credential.as_ref()
    }

    /// Whether the add-in runs in high-trust mode
    ///
    /// This is true exactly when a signing credential is configured.
    pub fn is_high_trust(&self) -> bool {
        self.signing_credential.is_some()
    }

    /// The global service hosting trust metadata
    pub fn global_endpoint(&self) -> &GlobalEndpoint {
        &self.global_endpoint
    }

    /// The timeout applied to every outbound HTTP call
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// The keys that may have signed an inbound context token
    ///
    /// Client secrets are base64-encoded; the decoded bytes form the HMAC key.
    pub fn symmetric_keys(&self) -> Result<Vec<SymmetricKey>, ConfigError> {
        let secrets = [
            ("ClientSecret", self.client_secret()),
            ("SecondaryClientSecret", self.secondary_client_secret()),
        ];

        let mut keys = Vec::with_capacity(secrets.len());
        for (setting, secret) in secrets {
            if let Some(secret) = secret {
                let raw = Base64::from_encoded(secret.as_str())
                    .map_err(|source| ConfigError::InvalidSecret { setting, source })?;
                keys.push(SymmetricKey::new(raw.into_inner()));
            }
        }

        Ok(keys)
    }

    /// Builds the HTTP client shared by all outbound calls
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .user_agent(concat!("spauth/", env!("CARGO_PKG_VERSION")))
            .timeout(self.http_timeout)
            .build()
            .map_err(ConfigError::HttpClient)
    }
}

/// A builder for [`TrustConfig`]
#[derive(Debug)]
#[must_use]
pub struct TrustConfigBuilder {
    client_id: ClientId,
    issuer_id: Option<IssuerId>,
    host_name_override: Option<String>,
    host_name: Option<String>,
    client_secret: Option<ClientSecret>,
    secondary_client_secret: Option<ClientSecret>,
    realm: Option<Realm>,
    signing_credential: Option<SigningCredential>,
    global_endpoint: GlobalEndpoint,
    http_timeout: Duration,
}

impl TrustConfigBuilder {
    /// Sets the issuer ID; defaults to the client ID
    pub fn issuer_id(mut self, issuer_id: impl Into<String>) -> Self {
        self.issuer_id = Some(IssuerId::new(issuer_id.into()));
        self
    }

    /// Sets a `;`-separated list of accepted host names
    pub fn host_name_override(mut self, host_names: impl Into<String>) -> Self {
        self.host_name_override = Some(host_names.into());
        self
    }

    /// Sets the host name of the add-in
    pub fn host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Sets the base64-encoded primary client secret
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(ClientSecret::new(secret.into()));
        self
    }

    /// Sets the base64-encoded secondary client secret
    pub fn secondary_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.secondary_client_secret = Some(ClientSecret::new(secret.into()));
        self
    }

    /// Sets a realm that overrides discovery
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(Realm::new(realm.into()));
        self
    }

    /// Sets the signing credential, enabling high-trust mode
    pub fn signing_credential(mut self, credential: SigningCredential) -> Self {
        self.signing_credential = Some(credential);
        self
    }

    /// Sets the global service hosting trust metadata
    pub fn global_endpoint(mut self, endpoint: GlobalEndpoint) -> Self {
        self.global_endpoint = endpoint;
        self
    }

    /// Sets the timeout applied to every outbound HTTP call
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Finishes building the configuration
    pub fn build(self) -> TrustConfig {
        let issuer_id = self
            .issuer_id
            .unwrap_or_else(|| IssuerId::new(self.client_id.as_str().to_owned()));

        TrustConfig {
            client_id: self.client_id,
            issuer_id,
            host_name_override: self.host_name_override,
            host_name: self.host_name,
            client_secret: self.client_secret,
            secondary_client_secret: self.secondary_client_secret,
            realm: self.realm,
            signing_credential: self.signing_credential,
            global_endpoint: self.global_endpoint,
            http_timeout: self.http_timeout,
        }
    }
}

/// Trust settings as named in the add-in's application settings
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrustSettings {
    /// `ClientId`
    pub client_id: Option<String>,
    /// `HostedAppName`, the legacy name for the client ID
    pub hosted_app_name: Option<String>,
    /// `IssuerId`
    pub issuer_id: Option<String>,
    /// `HostedAppHostNameOverride`
    pub hosted_app_host_name_override: Option<String>,
    /// `HostedAppHostName`
    pub hosted_app_host_name: Option<String>,
    /// `ClientSecret`
    pub client_secret: Option<ClientSecret>,
    /// `HostedAppSigningKey`, the legacy name for the client secret
    pub hosted_app_signing_key: Option<ClientSecret>,
    /// `SecondaryClientSecret`
    pub secondary_client_secret: Option<ClientSecret>,
    /// `Realm`
    pub realm: Option<String>,
    /// `ClientSigningKeyPath`, a PEM private key
    pub client_signing_key_path: Option<PathBuf>,
    /// `ClientSigningCertificatePath`, a PEM certificate
    pub client_signing_certificate_path: Option<PathBuf>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_secret(value: Option<ClientSecret>) -> Option<ClientSecret> {
    value.filter(|v| !v.as_str().is_empty())
}
