//! Server-to-server tokens for high-trust mode
//!
//! In high-trust mode the add-in holds a certificate the host trusts directly, so it
//! mints its own access tokens instead of asking the token-issuance service.
//!
//! An app-only token is a single RS256 _actor token_ asserting the add-in's identity.
//! A token on behalf of a user wraps that actor token, marked as trusted for
//! delegation, inside an unsigned _outer token_ carrying the user's identity claims.
//! The outer token's issuer is the actor's `nameid`, tying the two together.

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{IssueError, SigningError},
    jws, principals, AccessToken, IssuedToken, Realm, RealmDiscovery, RealmRef, TrustConfig,
};

/// The lifetime of a self-issued token, in seconds
pub const HIGH_TRUST_LIFETIME: u64 = 12 * 60 * 60;

/// The identity of the user on whose behalf a high-trust token is minted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    security_identifier: String,
    is_authenticated: bool,
    is_guest: bool,
}

impl CallerIdentity {
    /// An authenticated Windows identity
    pub fn authenticated(security_identifier: impl Into<String>) -> Self {
        Self {
            security_identifier: security_identifier.into(),
            is_authenticated: true,
            is_guest: false,
        }
    }

    /// An authenticated guest identity
    pub fn guest(security_identifier: impl Into<String>) -> Self {
        Self {
            security_identifier: security_identifier.into(),
            is_authenticated: true,
            is_guest: true,
        }
    }

    /// An unauthenticated identity
    pub fn anonymous() -> Self {
        Self {
            security_identifier: String::new(),
            is_authenticated: false,
            is_guest: false,
        }
    }

    /// The security identifier, such as `S-1-5-21-...`
    pub fn security_identifier(&self) -> &str {
        &self.security_identifier
    }

    /// Whether the identity was authenticated
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Whether the identity is a guest
    pub fn is_guest(&self) -> bool {
        self.is_guest
    }

    /// Whether tokens may be minted on behalf of this identity
    pub fn is_delegable(&self) -> bool {
        self.is_authenticated && !self.is_guest && !self.security_identifier.is_empty()
    }
}

/// Claims of the signed actor token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorTokenClaims {
    /// `{target_principal}/{target_host}@{realm}`
    pub aud: String,
    /// `{issuer_id}@{realm}`, or the bare issuer ID when the realm is unknown
    pub iss: String,
    /// `{client_id}@{realm}`, or the bare client ID when the realm is unknown
    pub nameid: String,
    /// Not before
    pub nbf: UnixTime,
    /// Expires
    pub exp: UnixTime,
    /// `"true"` when the actor token is wrapped by an outer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trustedfordelegation: Option<String>,
}

/// Claims of the unsigned outer token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterTokenClaims {
    /// Same as the actor token
    pub aud: String,
    /// The actor token's `nameid`
    pub iss: String,
    /// The lower-cased security identifier of the user
    pub nameid: String,
    /// The identity provider of the user
    pub nii: String,
    /// Not before
    pub nbf: UnixTime,
    /// Expires
    pub exp: UnixTime,
    /// The signed actor token
    pub actortoken: String,
}

/// Mints high-trust tokens with the configured signing credential
#[derive(Debug)]
pub struct S2STokenIssuer<C = System> {
    config: Arc<TrustConfig>,
    realms: RealmDiscovery,
    clock: C,
}

impl S2STokenIssuer<System> {
    /// Constructs a new issuer
    pub fn new(config: Arc<TrustConfig>, realms: RealmDiscovery) -> Self {
        Self {
            config,
            realms,
            clock: System,
        }
    }
}

impl<C> S2STokenIssuer<C> {
    /// Replaces the clock used to stamp token lifetimes
    pub fn with_clock<D>(self, clock: D) -> S2STokenIssuer<D> {
        S2STokenIssuer {
            config: self.config,
            realms: self.realms,
            clock,
        }
    }

    /// The realm to mint tokens for `target` within
    ///
    /// The configured realm wins. Otherwise the realm is discovered from the target,
    /// and if discovery fails, tokens are minted with an empty realm.
    pub async fn resolve_realm(&self, target: &Url) -> Realm {
        if let Some(realm) = self.config.realm() {
            return realm.to_owned();
        }

        match self.realms.discover_realm(target).await {
            Some(realm) => realm,
            None => {
                tracing::warn!(%target, "realm unknown; minting high-trust token without a realm");
                Realm::new(String::new())
            }
        }
    }
}

impl<C: Clock> S2STokenIssuer<C> {
    /// Mints a token for `target_principal` at `target_host`
    ///
    /// With no identity, the app-only actor token is returned directly. With an
    /// identity, the actor token is wrapped in an outer token on the user's behalf.
    pub fn issue(
        &self,
        target_principal: &str,
        target_host: &str,
        realm: &RealmRef,
        identity: Option<&CallerIdentity>,
    ) -> Result<IssuedToken, IssueError> {
        let credential = self
            .config
            .signing_credential()
            .ok_or(IssueError::NotConfigured)?;

        let realm = realm.as_str();
        let now = self.clock.now();
        let exp = UnixTime(now.0 + HIGH_TRUST_LIFETIME);

        let audience = principals::format_principal(target_principal, Some(target_host), realm);
        let (issuer, nameid) = if realm.is_empty() {
            (
                self.config.issuer_id().as_str().to_owned(),
                self.config.client_id().as_str().to_owned(),
            )
        } else {
            (
                principals::format_principal(self.config.issuer_id().as_str(), None, realm),
                principals::format_principal(self.config.client_id().as_str(), None, realm),
            )
        };

        let actor = ActorTokenClaims {
            aud: audience.clone(),
            iss: issuer,
            nameid: nameid.clone(),
            nbf: now,
            exp,
            trustedfordelegation: identity.map(|_| "true".to_owned()),
        };
        let actor_token = jws::encode(credential, &actor)?;

        let token = match identity {
            None => actor_token,
            Some(identity) => {
                let outer = OuterTokenClaims {
                    aud: audience,
                    iss: nameid,
                    nameid: identity.security_identifier().to_lowercase(),
                    nii: principals::ACTIVE_DIRECTORY_IDP.to_owned(),
                    nbf: now,
                    exp,
                    actortoken: actor_token,
                };
                jws::encode_unsigned(&outer).map_err(SigningError::from)?
            }
        };

        tracing::debug!(
            target_host,
            realm,
            delegated = identity.is_some(),
            expiry = exp.0,
            "minted high-trust token"
        );

        Ok(IssuedToken::new(AccessToken::new(token), now, exp))
    }

    /// Mints a token for the SharePoint principal at the host of `target`
    pub async fn issue_for_url(
        &self,
        target: &Url,
        identity: Option<&CallerIdentity>,
    ) -> Result<IssuedToken, IssueError> {
        if !self.config.is_high_trust() {
            return Err(IssueError::NotConfigured);
        }

        let realm = self.resolve_realm(target).await;
        self.issue(
            principals::SHAREPOINT_PRINCIPAL,
            &principals::authority(target),
            &realm,
            identity,
        )
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;

    use super::*;
    use crate::{
        jws::{self, Algorithm},
        SigningCredential,
    };

    const KEY_PEM: &str = include_str!("../data/signing-key.pem");
    const CERT_PEM: &str = include_str!("../data/signing-cert.pem");
    const REALM: &str = "3a1b2c3d-4e5f-6789-abcd-ef0123456789";
    const HOST: &str = "contoso.sharepoint.com";
    const NOW: u64 = 1_700_000_000;

    fn issuer(realm: Option<&str>) -> Result<S2STokenIssuer<TestClock>> {
        let mut builder = TrustConfig::builder("client-1")
            .issuer_id("issuer-1")
            .signing_credential(SigningCredential::from_pem(KEY_PEM, CERT_PEM)?);
        if let Some(realm) = realm {
            builder = builder.realm(realm);
        }

        let issuer = S2STokenIssuer::new(
            Arc::new(builder.build()),
            RealmDiscovery::new(reqwest::Client::new()),
        );
        Ok(issuer.with_clock(TestClock::new(UnixTime(NOW))))
    }

    fn realm() -> &'static RealmRef {
        RealmRef::from_str(REALM)
    }

    #[test]
    fn app_only_token_is_the_signed_actor_token() -> Result<()> {
        let issued = issuer(None)?.issue(principals::SHAREPOINT_PRINCIPAL, HOST, realm(), None)?;
        assert_eq!(issued.not_before(), UnixTime(NOW));
        assert_eq!(issued.expires_on(), UnixTime(NOW + HIGH_TRUST_LIFETIME));

        let decomposed = jws::decompose(issued.access_token().as_str())?;
        assert_eq!(decomposed.header().alg(), Algorithm::RS256);
        assert_eq!(decomposed.header().x5t(), Some("PdKBNaTBIMzqrE1-2Y_DKGA2cVU"));

        let credential = SigningCredential::from_pem(KEY_PEM, CERT_PEM)?;
        credential.verify(
            decomposed.message().as_bytes(),
            decomposed.signature().as_slice(),
        )?;

        let claims: serde_json::Value = decomposed.claims()?;
        assert_eq!(
            claims["aud"],
            format!("{}/{}@{}", principals::SHAREPOINT_PRINCIPAL, HOST, REALM)
        );
        assert_eq!(claims["iss"], format!("issuer-1@{}", REALM));
        assert_eq!(claims["nameid"], format!("client-1@{}", REALM));
        assert!(claims.get("actortoken").is_none());
        assert!(claims.get("trustedfordelegation").is_none());
        Ok(())
    }

    #[test]
    fn delegated_token_wraps_actor_token() -> Result<()> {
        let identity = CallerIdentity::authenticated("S-1-5-21-ABC-1001");
        let issued = issuer(None)?.issue(
            principals::SHAREPOINT_PRINCIPAL,
            HOST,
            realm(),
            Some(&identity),
        )?;

        assert!(jws::decompose(issued.access_token().as_str()).is_err());
        assert!(issued.access_token().as_str().ends_with('.'));

        let outer: OuterTokenClaims = jws::decode_unsigned(issued.access_token().as_str())?;
        assert_eq!(outer.nameid, "s-1-5-21-abc-1001");
        assert_eq!(outer.nii, "urn:office:idp:activedirectory");

        let actor: ActorTokenClaims = jws::decompose(&outer.actortoken)?.claims()?;
        assert_eq!(actor.nameid, outer.iss);
        assert_eq!(actor.aud, outer.aud);
        assert_eq!(actor.trustedfordelegation.as_deref(), Some("true"));
        assert_eq!((actor.nbf, actor.exp), (outer.nbf, outer.exp));
        Ok(())
    }

    #[test]
    fn empty_realm_omits_issuer_suffix() -> Result<()> {
        let issued = issuer(None)?.issue(
            principals::SHAREPOINT_PRINCIPAL,
            HOST,
            RealmRef::from_str(""),
            None,
        )?;

        let claims: ActorTokenClaims = jws::decompose(issued.access_token().as_str())?.claims()?;
        assert_eq!(claims.iss, "issuer-1");
        assert_eq!(claims.nameid, "client-1");
        Ok(())
    }

    #[test]
    fn empty_realm_outer_token_is_issued_by_bare_client_id() -> Result<()> {
        let identity = CallerIdentity::authenticated("S-1-5-21-ABC-1001");
        let issued = issuer(None)?.issue(
            principals::SHAREPOINT_PRINCIPAL,
            HOST,
            RealmRef::from_str(""),
            Some(&identity),
        )?;

        let outer: OuterTokenClaims = jws::decode_unsigned(issued.access_token().as_str())?;
        assert_eq!(outer.iss, "client-1");

        let actor: ActorTokenClaims = jws::decompose(&outer.actortoken)?.claims()?;
        assert_eq!(actor.nameid, "client-1");
        assert_eq!(actor.iss, "issuer-1");
        Ok(())
    }

    #[test]
    fn missing_credential_is_not_configured() {
        let issuer = S2STokenIssuer::new(
            Arc::new(TrustConfig::builder("client-1").build()),
            RealmDiscovery::new(reqwest::Client::new()),
        );

        let err = issuer
            .issue(principals::SHAREPOINT_PRINCIPAL, HOST, realm(), None)
            .unwrap_err();
        assert!(matches!(err, IssueError::NotConfigured));
    }

    #[tokio::test]
    async fn configured_realm_skips_discovery() -> Result<()> {
        let issuer = issuer(Some(REALM))?;
        let target = Url::parse("https://contoso.sharepoint.com/sites/dev/")?;

        let issued = issuer.issue_for_url(&target, None).await?;
        let claims: ActorTokenClaims = jws::decompose(issued.access_token().as_str())?.claims()?;
        assert_eq!(
            claims.aud,
            format!("{}/{}@{}", principals::SHAREPOINT_PRINCIPAL, HOST, REALM)
        );
        Ok(())
    }

    #[tokio::test]
    async fn failed_discovery_continues_without_realm() -> Result<()> {
        let issuer = issuer(None)?;
        let target = Url::parse("http://127.0.0.1:9/")?;

        let issued = issuer.issue_for_url(&target, None).await?;
        let claims: ActorTokenClaims = jws::decompose(issued.access_token().as_str())?.claims()?;
        assert_eq!(claims.iss, "issuer-1");
        assert_eq!(
            claims.aud,
            format!("{}/127.0.0.1:9@", principals::SHAREPOINT_PRINCIPAL)
        );
        Ok(())
    }
}
