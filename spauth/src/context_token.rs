//! Validation of inbound context tokens
//!
//! A context token is posted to the add-in by the host when a user launches it. It is
//! signed with HS256 using the add-in's client secret, addressed to the add-in's
//! `{client_id}/{host}@{realm}` principal, and carries a refresh token which the add-in
//! can exchange for access tokens against the host.
//!
//! Validation checks, in order:
//!
//! 1. The token is a well-formed compact JWS (`Malformed`).
//! 2. The signature matches one of the configured client secrets (`InvalidSignature`).
//! 3. The issuer is the trusted token-issuance service (`UntrustedIssuer`).
//! 4. The token has not expired, and is not dated too far into the future
//!    (`Expired`, `NotYetValid`).
//! 5. The audience matches one of the acceptable host names (`AudienceMismatch`).

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};
use serde::Deserialize;

use crate::{
    error::{self, ConfigError, ValidationError},
    jws::{self, SymmetricKey},
    principals, Audience, AudienceRef, CacheKey, CacheKeyRef, EncodedContextToken,
    EncodedContextTokenRef, Realm, RealmRef, RefreshToken, RefreshTokenRef, TrustConfig,
};

/// Leeway allowed for clock skew when checking `nbf`
pub const NOT_BEFORE_LEEWAY: u64 = 5 * 60;

#[derive(Deserialize)]
struct ContextTokenClaims {
    aud: String,
    iss: String,
    #[serde(default)]
    nbf: Option<UnixTime>,
    exp: UnixTime,
    #[serde(default)]
    appctxsender: Option<String>,
    #[serde(default)]
    appctx: Option<String>,
    #[serde(default)]
    refreshtoken: Option<String>,
    #[serde(default)]
    isbrowserhostedapp: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AppContext {
    cache_key: Option<String>,
    security_token_service_uri: Option<String>,
}

/// A validated context token
///
/// Immutable once parsed. [`valid_to()`][ContextToken::valid_to()] is authoritative for
/// whether the token is still usable; [`is_expired_at()`][ContextToken::is_expired_at()]
/// and friends should be consulted every time the token is read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextToken {
    issuer: String,
    audience: Audience,
    realm: Realm,
    target_principal_name: String,
    cache_key: CacheKey,
    refresh_token: RefreshToken,
    security_token_service_uri: Option<String>,
    is_browser_hosted_app: bool,
    valid_from: UnixTime,
    valid_to: UnixTime,
}

impl ContextToken {
    fn from_claims(claims: ContextTokenClaims) -> Result<Self, ValidationError> {
        let realm = match claims.aud.split_once('@') {
            Some((_, realm)) => Realm::new(realm.to_owned()),
            None => return Err(error::malformed_token("audience does not name a realm").into()),
        };

        let sender = claims
            .appctxsender
            .ok_or_else(|| error::malformed_token("missing 'appctxsender' claim"))?;
        let target_principal_name = principals::principal_name(&sender).to_owned();

        let app_context: AppContext = match claims.appctx.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
                .map_err(|e| error::malformed_token_with("'appctx' claim is not valid JSON", e))?,
            _ => AppContext::default(),
        };

        let is_browser_hosted_app = claims
            .isbrowserhostedapp
            .map_or(false, |v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            issuer: claims.iss,
            audience: Audience::new(claims.aud),
            realm,
            target_principal_name,
            cache_key: CacheKey::new(app_context.cache_key.unwrap_or_default()),
            refresh_token: RefreshToken::new(claims.refreshtoken.unwrap_or_default()),
            security_token_service_uri: app_context.security_token_service_uri,
            is_browser_hosted_app,
            valid_from: claims.nbf.unwrap_or_default(),
            valid_to: claims.exp,
        })
    }

    /// The formatted principal of the issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The formatted principal the token is addressed to
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    /// The realm the token was issued within
    pub fn realm(&self) -> &RealmRef {
        &self.realm
    }

    /// The principal the refresh token may be exchanged with, usually the host itself
    pub fn target_principal_name(&self) -> &str {
        &self.target_principal_name
    }

    /// The correlation key to pair with the session cookie
    pub fn cache_key(&self) -> &CacheKeyRef {
        &self.cache_key
    }

    /// The refresh token, which may be empty
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// The token service URI advertised by the host, if any
    pub fn security_token_service_uri(&self) -> Option<&str> {
        self.security_token_service_uri.as_deref()
    }

    /// Whether the host launched the add-in as a browser-hosted app
    pub fn is_browser_hosted_app(&self) -> bool {
        self.is_browser_hosted_app
    }

    /// The start of the validity window
    pub fn valid_from(&self) -> UnixTime {
        self.valid_from
    }

    /// The end of the validity window
    pub fn valid_to(&self) -> UnixTime {
        self.valid_to
    }

    /// Whether the token has expired as of `time`
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        self.valid_to <= time
    }

    /// Whether the token has expired according to `clock`
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the token has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }
}

/// Validates context tokens against the configured secrets and host names
#[derive(Debug)]
pub struct ContextTokenValidator<C = System> {
    config: Arc<TrustConfig>,
    keys: Vec<SymmetricKey>,
    clock: C,
}

impl ContextTokenValidator<System> {
    /// Constructs a validator from the configured client secrets
    pub fn new(config: Arc<TrustConfig>) -> Result<Self, ConfigError> {
        let keys = config.symmetric_keys()?;
        if keys.is_empty() && !config.is_high_trust() {
            tracing::warn!("no client secret configured; every context token will be rejected");
        }

        Ok(Self {
            config,
            keys,
            clock: System,
        })
    }
}

impl<C> ContextTokenValidator<C> {
    /// Replaces the clock used for expiry checks
    pub fn with_clock<D>(self, clock: D) -> ContextTokenValidator<D> {
        ContextTokenValidator {
            config: self.config,
            keys: self.keys,
            clock,
        }
    }

    /// The host names a token may be addressed to
    ///
    /// The configured override is split on `;` and used verbatim. Without one, the
    /// configured host name is used, and failing that, the host name supplied by the
    /// caller, usually the authority of the inbound request.
    pub fn acceptable_audiences(&self, request_host: Option<&str>) -> Vec<String> {
        if let Some(hosts) = self.config.host_name_override() {
            hosts
                .split(';')
                .filter(|h| !h.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        } else if let Some(host) = self.config.host_name() {
            vec![host.to_owned()]
        } else if let Some(host) = request_host {
            vec![host.to_owned()]
        } else {
            Vec::new()
        }
    }
}

impl<C: Clock> ContextTokenValidator<C> {
    /// Parses and validates a context token
    ///
    /// `request_host` is used as the acceptable audience host only when no host name
    /// is configured.
    pub fn validate(
        &self,
        token: &EncodedContextTokenRef,
        request_host: Option<&str>,
    ) -> Result<ContextToken, ValidationError> {
        let decomposed = jws::decompose(token.as_str())?;
        decomposed.verify_with_any(&self.keys)?;

        let claims: ContextTokenClaims = decomposed.claims()?;
        let context_token = ContextToken::from_claims(claims)?;

        let issuer = principals::principal_name(context_token.issuer());
        if issuer != principals::ACS_PRINCIPAL {
            return Err(error::untrusted_issuer(context_token.issuer()).into());
        }

        let now = self.clock.now();
        if context_token.is_expired_at(now) {
            return Err(error::token_expired(context_token.valid_to()).into());
        }
        if context_token.valid_from().0 > now.0 + NOT_BEFORE_LEEWAY {
            return Err(error::token_not_yet_valid(context_token.valid_from()).into());
        }

        self.check_audience(&context_token, request_host)?;

        tracing::debug!(
            realm = %context_token.realm(),
            valid_to = context_token.valid_to().0,
            "validated context token"
        );

        Ok(context_token)
    }

    fn check_audience(
        &self,
        token: &ContextToken,
        request_host: Option<&str>,
    ) -> Result<(), ValidationError> {
        let realm = self.config.realm().unwrap_or_else(|| token.realm());
        let client_id = self.config.client_id();

        let mut attempted = Vec::new();
        for host in self.acceptable_audiences(request_host) {
            let expected = principals::format_principal(
                client_id.as_str(),
                Some(host.as_str()),
                realm.as_str(),
            );
            if expected.eq_ignore_ascii_case(token.audience().as_str()) {
                return Ok(());
            }
            attempted.push(expected);
        }

        Err(error::audience_mismatch(token.audience().as_str(), attempted).into())
    }
}


#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;

    use super::{test_tokens::*, *};

    const NOW: u64 = 1_700_000_000;

    fn validator(config: TrustConfig) -> Result<ContextTokenValidator<TestClock>> {
        Ok(ContextTokenValidator::new(Arc::new(config))?.with_clock(TestClock::new(UnixTime(NOW))))
    }

    fn config() -> TrustConfig {
        TrustConfig::builder(CLIENT_ID)
            .host_name("app.contoso.com")
            .client_secret(SECRET)
            .build()
    }

    fn encoded(token: String) -> EncodedContextToken {
        EncodedContextToken::new(token)
    }

    #[test]
    fn valid_token_round_trips_claims() -> Result<()> {
        let token = encoded(sign(&claims("app.contoso.com", NOW - 10, NOW + 3600), SECRET_RAW));
        let parsed = validator(config())?.validate(&token, None)?;

        assert_eq!(parsed.valid_to(), UnixTime(NOW + 3600));
        assert_eq!(parsed.realm().as_str(), REALM);
        assert_eq!(
            parsed.target_principal_name(),
            "00000003-0000-0ff1-ce00-000000000000"
        );
        assert_eq!(parsed.cache_key().as_str(), "cache-key-1");
        assert_eq!(parsed.refresh_token().as_str(), "refresh-token-1");
        assert_eq!(
            parsed.security_token_service_uri(),
            Some("https://accounts.accesscontrol.windows.net/tokens/OAuth/2")
        );
        assert!(parsed.is_browser_hosted_app());
        Ok(())
    }

    #[test]
    fn secondary_secret_is_accepted() -> Result<()> {
        let config = TrustConfig::builder(CLIENT_ID)
            .host_name("app.contoso.com")
            .client_secret(SECRET)
            .secondary_client_secret(SECONDARY_SECRET)
            .build();
        let token = encoded(sign(
            &claims("app.contoso.com", NOW, NOW + 60),
            SECONDARY_SECRET_RAW,
        ));

        validator(config)?.validate(&token, None)?;
        Ok(())
    }

    #[test]
    fn any_host_in_override_list_is_accepted() -> Result<()> {
        let config = TrustConfig::builder(CLIENT_ID)
            .host_name_override("one.contoso.com;two.contoso.com;three.contoso.com")
            .client_secret(SECRET)
            .build();
        let validator = validator(config)?;

        for host in ["one.contoso.com", "two.contoso.com", "three.contoso.com"] {
            let token = encoded(sign(&claims(host, NOW, NOW + 60), SECRET_RAW));
            validator.validate(&token, Some("ignored.example.com"))?;
        }
        Ok(())
    }

    #[test]
    fn audience_comparison_ignores_case() -> Result<()> {
        let token = encoded(sign(&claims("APP.Contoso.COM", NOW, NOW + 60), SECRET_RAW));
        validator(config())?.validate(&token, None)?;
        Ok(())
    }

    #[test]
    fn mismatch_lists_every_attempted_audience() -> Result<()> {
        let config = TrustConfig::builder(CLIENT_ID)
            .host_name_override("one.contoso.com;two.contoso.com")
            .client_secret(SECRET)
            .build();
        let token = encoded(sign(&claims("evil.example.com", NOW, NOW + 60), SECRET_RAW));

        let err = validator(config)?.validate(&token, None).unwrap_err();
        let mismatch = match err {
            ValidationError::AudienceMismatch(mismatch) => mismatch,
            other => panic!("expected audience mismatch, got {:?}", other),
        };

        assert_eq!(
            mismatch.attempted().to_vec(),
            vec![
                format!("{}/one.contoso.com@{}", CLIENT_ID, REALM),
                format!("{}/two.contoso.com@{}", CLIENT_ID, REALM),
            ]
        );
        assert!(mismatch.to_string().contains("one.contoso.com"));
        assert!(mismatch.to_string().contains("two.contoso.com"));
        Ok(())
    }

    #[test]
    fn request_host_is_used_without_configured_host() -> Result<()> {
        let config = TrustConfig::builder(CLIENT_ID).client_secret(SECRET).build();
        let validator = validator(config)?;
        let token = encoded(sign(&claims("localhost:44300", NOW, NOW + 60), SECRET_RAW));

        validator.validate(&token, Some("localhost:44300"))?;
        assert!(validator.validate(&token, None).is_err());
        Ok(())
    }

    #[test]
    fn configured_realm_overrides_token_realm() -> Result<()> {
        let config = TrustConfig::builder(CLIENT_ID)
            .host_name("app.contoso.com")
            .client_secret(SECRET)
            .realm("00000000-0000-0000-0000-000000000000")
            .build();
        let token = encoded(sign(&claims("app.contoso.com", NOW, NOW + 60), SECRET_RAW));

        let err = validator(config)?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::AudienceMismatch(_)));
        Ok(())
    }

    #[test]
    fn expired_token_fails_fast() -> Result<()> {
        let token = encoded(sign(&claims("app.contoso.com", NOW - 600, NOW), SECRET_RAW));
        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(err.is_expired());
        Ok(())
    }

    #[test]
    fn future_token_is_not_yet_valid() -> Result<()> {
        let token = encoded(sign(
            &claims("app.contoso.com", NOW + NOT_BEFORE_LEEWAY + 1, NOW + 3600),
            SECRET_RAW,
        ));
        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::NotYetValid(_)));
        Ok(())
    }

    #[test]
    fn wrong_secret_is_invalid_signature() -> Result<()> {
        let token = encoded(sign(&claims("app.contoso.com", NOW, NOW + 60), b"not-the-secret"));
        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature(_)));
        Ok(())
    }

    #[test]
    fn rsa_signed_token_is_invalid_signature() -> Result<()> {
        let credential = crate::SigningCredential::from_pem(
            include_str!("../data/signing-key.pem"),
            include_str!("../data/signing-cert.pem"),
        )?;
        let token = encoded(crate::jws::encode(
            &credential,
            &claims("app.contoso.com", NOW, NOW + 60),
        )?);

        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature(_)));
        Ok(())
    }

    #[test]
    fn signature_is_checked_before_expiry() -> Result<()> {
        let token = encoded(sign(&claims("app.contoso.com", NOW - 600, NOW - 1), b"wrong"));
        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature(_)));
        Ok(())
    }

    #[test]
    fn foreign_issuer_is_untrusted() -> Result<()> {
        let mut claims = claims("app.contoso.com", NOW, NOW + 60);
        claims["iss"] = "someone-else@realm".into();
        let token = encoded(sign(&claims, SECRET_RAW));

        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::UntrustedIssuer(_)));
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() -> Result<()> {
        let err = validator(config())?
            .validate(EncodedContextTokenRef::from_str("not-a-token"), None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        Ok(())
    }

    #[test]
    fn missing_sender_is_malformed() -> Result<()> {
        let mut claims = claims("app.contoso.com", NOW, NOW + 60);
        if let Some(claims) = claims.as_object_mut() {
            claims.remove("appctxsender");
        }
        let token = encoded(sign(&claims, SECRET_RAW));

        let err = validator(config())?.validate(&token, None).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        Ok(())
    }

    #[test]
    fn expiry_accessors_follow_valid_to() -> Result<()> {
        let token = encoded(sign(&claims("app.contoso.com", NOW, NOW + 60), SECRET_RAW));
        let parsed = validator(config())?.validate(&token, None)?;

        let mut clock = TestClock::new(UnixTime(NOW + 59));
        assert!(!parsed.is_expired_with_clock(&clock));
        clock.advance(aliri_clock::DurationSecs(1));
        assert!(parsed.is_expired_with_clock(&clock));
        Ok(())
    }
}
