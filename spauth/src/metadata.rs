//! Per-realm trust metadata
//!
//! The global trust service publishes a small JSON document for each realm naming the
//! endpoints at which tokens are issued and the certificates it signs with. Documents
//! are fetched fresh for every resolution; the realm is the only dimension along which
//! they vary.

use std::fmt;

use aliri_base64::Base64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{config::GlobalEndpoint, error::MetadataError, RealmRef, TrustConfig};

/// A protocol advertised in a trust metadata document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// The OAuth2 token-issuance endpoint
    OAuth2,
    /// The delegation endpoint
    DelegationIssuance,
}

impl Protocol {
    /// The protocol tag as it appears in the metadata document
    pub const fn tag(self) -> &'static str {
        match self {
            Self::OAuth2 => "OAuth2",
            Self::DelegationIssuance => "DelegationIssuance1.0",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// An endpoint entry in a trust metadata document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEndpoint {
    /// The endpoint URL
    pub location: String,
    /// The protocol tag
    pub protocol: String,
    /// The intended usage, if stated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

/// A key entry in a trust metadata document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataKey {
    /// The intended usage, if stated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    /// The key material
    pub key_value: MetadataKeyValue,
}

/// Key material carried by a [`MetadataKey`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataKeyValue {
    /// The key type, if stated
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// The base64-encoded certificate
    pub value: String,
}

/// A snapshot of the trust metadata for a realm
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustMetadataDocument {
    /// The name of the trust service
    #[serde(default)]
    pub service_name: String,
    /// The advertised endpoints
    #[serde(default)]
    pub endpoints: Vec<MetadataEndpoint>,
    /// The signing keys
    #[serde(default)]
    pub keys: Vec<MetadataKey>,
}

impl TrustMetadataDocument {
    /// The certificate the trust service signs with
    ///
    /// This is always the first key in the document.
    pub fn signing_certificate(&self) -> Result<SigningCertificate, MetadataError> {
        let key = self.keys.first().ok_or(MetadataError::NoSigningKey)?;
        let der = Base64::from_encoded(key.key_value.value.as_bytes())
            .map_err(MetadataError::InvalidCertificate)?;

        Ok(SigningCertificate { der })
    }

    /// The location of the first endpoint advertising `protocol`
    pub fn endpoint_for(&self, protocol: Protocol) -> Result<Url, MetadataError> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.protocol == protocol.tag())
            .ok_or(MetadataError::NoEndpoint {
                protocol: protocol.tag(),
            })?;

        Url::parse(&endpoint.location).map_err(MetadataError::InvalidEndpoint)
    }
}

/// A DER-encoded certificate published by the trust service
#[derive(Clone)]
pub struct SigningCertificate {
    der: Base64,
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("len", &self.der.as_slice().len())
            .finish()
    }
}

impl SigningCertificate {
    /// The DER-encoded certificate
    pub fn der(&self) -> &[u8] {
        self.der.as_slice()
    }

    /// The hex-encoded SHA-1 thumbprint of the certificate, in upper case
    pub fn thumbprint(&self) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, self.der());
        digest.as_ref().iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// Fetches trust metadata documents from the global trust service
#[derive(Clone, Debug)]
pub struct MetadataResolver {
    client: Client,
    endpoint: GlobalEndpoint,
}

impl MetadataResolver {
    /// Constructs a resolver against the configured global endpoint
    pub fn new(config: &TrustConfig, client: Client) -> Self {
        Self {
            client,
            endpoint: config.global_endpoint().clone(),
        }
    }

    /// Fetches the metadata document for a realm
    #[tracing::instrument(err, skip(self, realm), fields(realm = %realm))]
    pub async fn fetch_metadata(
        &self,
        realm: &RealmRef,
    ) -> Result<TrustMetadataDocument, MetadataError> {
        let url = self
            .endpoint
            .metadata_url(realm)
            .map_err(MetadataError::InvalidUrl)?;

        tracing::trace!(%url, "requesting trust metadata");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(MetadataError::Network)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received trust metadata response"
        );

        if let Err(source) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(MetadataError::Network)?;
            return Err(MetadataError::Status { source, body });
        }

        let body = resp.text().await.map_err(MetadataError::Network)?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(MetadataError::EmptyDocument);
        }

        Ok(serde_json::from_str(trimmed)?)
    }

    /// Fetches the metadata for a realm and resolves the endpoint for `protocol`
    pub async fn endpoint_for_realm(
        &self,
        realm: &RealmRef,
        protocol: Protocol,
    ) -> Result<Url, MetadataError> {
        self.fetch_metadata(realm).await?.endpoint_for(protocol)
    }
}
