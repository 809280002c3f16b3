//! DTOs for interacting with the token-issuance service

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use spauth::{ClientSecretRef, RefreshTokenRef};

/// The grant-specific portion of a token request
#[derive(Debug)]
pub(super) enum GrantBody<'a> {
    RefreshToken(&'a RefreshTokenRef),
    AuthorizationCode { code: &'a str, redirect_uri: &'a str },
    ClientCredentials,
}

impl GrantBody<'_> {
    pub(super) fn grant_type(&self) -> &'static str {
        match self {
            Self::RefreshToken(_) => "refresh_token",
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// A form-encoded token request
#[derive(Debug)]
pub(super) struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a ClientSecretRef>,
    pub resource: &'a str,
    pub grant: GrantBody<'a>,
}

impl Serialize for TokenRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("TokenRequest", 6)?;
        ser.serialize_field("grant_type", self.grant.grant_type())?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret.as_str())?;
        } else {
            ser.skip_field("client_secret")?;
        }
        match &self.grant {
            GrantBody::RefreshToken(refresh_token) => {
                ser.serialize_field("refresh_token", refresh_token.as_str())?;
            }
            GrantBody::AuthorizationCode { code, redirect_uri } => {
                ser.serialize_field("code", code)?;
                ser.serialize_field("redirect_uri", redirect_uri)?;
            }
            GrantBody::ClientCredentials => {}
        }
        ser.serialize_field("resource", self.resource)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub not_before: Option<u64>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_on: Option<u64>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

/// The issuance service sends numeric claims as strings
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Seconds;

    impl<'de> de::Visitor<'de> for Seconds {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number of seconds, as a number or a string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            if v.is_empty() {
                return Ok(None);
            }
            v.parse()
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Seconds)
}
