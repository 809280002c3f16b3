//! Compact JWS encoding for the token shapes exchanged with the host
//!
//! Context tokens arrive signed with HS256 using the add-in's shared client secret.
//! Actor tokens minted for high-trust mode are signed with RS256, and the outer token
//! that wraps an actor token is left unsigned, its integrity carried by the signed
//! token embedded inside it.
//!
//! Parsing, verification, and signing are handled by [`aliri`]. Only the unsigned
//! outer token, which `aliri` deliberately refuses to produce, is serialized here.

use std::fmt;

use aliri::{
    jwa, jwk,
    jws::Verifier as _,
    jwt::{self, CoreHeaders, HasAlgorithm},
    Jwk, Jwt, JwtRef,
};
use aliri_base64::{Base64Url, Base64UrlRef};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{self, MalformedToken, SignatureMismatch, SigningError};

pub use aliri::jwa::Algorithm;

/// The header of a signed compact token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    alg: Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,
}

impl Header {
    /// A `JWT` typed header for the given algorithm
    pub fn new(alg: Algorithm) -> Self {
        Self {
            typ: Some("JWT".to_owned()),
            alg,
            x5t: None,
        }
    }

    /// Attaches the thumbprint of the certificate used to sign the token
    pub fn with_x5t(mut self, x5t: impl Into<String>) -> Self {
        self.x5t = Some(x5t.into());
        self
    }

    /// The signing algorithm
    pub fn alg(&self) -> Algorithm {
        self.alg
    }

    /// The certificate thumbprint, if any
    pub fn x5t(&self) -> Option<&str> {
        self.x5t.as_deref()
    }
}

impl HasAlgorithm for Header {
    fn alg(&self) -> jwa::Algorithm {
        self.alg
    }
}

impl CoreHeaders for Header {
    fn kid(&self) -> Option<&jwk::KeyIdRef> {
        None
    }
}

/// A key able to sign tokens, along with the header those tokens carry
pub trait Signer {
    /// The header to attach to tokens signed by this signer
    fn header(&self) -> Header;

    /// The key used to sign
    fn key(&self) -> &Jwk;
}

/// A shared secret used to sign and verify HS256 tokens
#[derive(Clone)]
pub struct SymmetricKey {
    key: Jwk,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SymmetricKey { secret }")
    }
}

impl SymmetricKey {
    /// A key over the raw secret bytes
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Jwk::from(jwa::Hmac::new(Base64Url::from_raw(secret))),
        }
    }

    /// Verifies an HS256 signature over `data`
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SignatureMismatch> {
        self.key
            .verify(Algorithm::HS256, data, signature)
            .map_err(|_| error::signature_mismatch())
    }
}

impl Signer for SymmetricKey {
    fn header(&self) -> Header {
        Header::new(Algorithm::HS256)
    }

    fn key(&self) -> &Jwk {
        &self.key
    }
}

/// A signed compact token split into its constituent parts
#[derive(Debug)]
pub struct Decomposed<'a> {
    inner: jwt::Decomposed<'a, Header>,
}

/// Splits a signed compact token into header, payload, and signature
///
/// The header is decoded eagerly. The payload is left encoded until
/// [`claims()`][Decomposed::claims()] is called, so that callers can verify
/// the signature before trusting anything inside it. Tokens declaring an
/// algorithm outside the recognized set, including unsigned tokens, are
/// rejected as malformed.
pub fn decompose(token: &str) -> Result<Decomposed<'_>, MalformedToken> {
    let inner = JwtRef::from_str(token)
        .decompose()
        .map_err(|e| error::malformed_token_with("not a signed compact token", e))?;

    Ok(Decomposed { inner })
}

impl<'a> Decomposed<'a> {
    /// The decoded header
    pub fn header(&self) -> &Header {
        self.inner.untrusted_header()
    }

    /// The raw signature bytes
    pub fn signature(&self) -> &Base64UrlRef {
        self.inner.signature()
    }

    /// The signing input, `header.payload`, as it appeared in the token
    pub fn message(&self) -> &'a str {
        self.inner.untrusted_message()
    }

    /// Verifies an HS256 signature against each key in turn
    ///
    /// Succeeds if any key produced the signature. Tokens declaring any other
    /// algorithm are rejected outright.
    pub fn verify_with_any(&self, keys: &[SymmetricKey]) -> Result<(), SignatureMismatch> {
        if self.header().alg() != Algorithm::HS256 {
            return Err(error::signature_mismatch());
        }

        let message = self.message().as_bytes();
        let signature = self.signature().as_slice();
        if keys
            .iter()
            .any(|key| key.verify(message, signature).is_ok())
        {
            Ok(())
        } else {
            Err(error::signature_mismatch())
        }
    }

    /// Decodes the payload into a claims structure
    ///
    /// This does not verify the signature.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T, MalformedToken> {
        decode_segment(self.inner.untrusted_payload(), PAYLOAD_INVALID)
    }
}

const PAYLOAD_INVALID: &str = "payload is not a valid claims object";

fn decode_segment<T: DeserializeOwned>(
    segment: &str,
    reason: &'static str,
) -> Result<T, MalformedToken> {
    let raw = Base64Url::from_encoded(segment).map_err(|e| error::malformed_token_with(reason, e))?;
    serde_json::from_slice(raw.as_slice()).map_err(|e| error::malformed_token_with(reason, e))
}

/// Serializes and signs a set of claims
pub fn encode<S, T>(signer: &S, claims: &T) -> Result<String, SigningError>
where
    S: Signer + ?Sized,
    T: Serialize,
{
    let token = Jwt::try_from_parts_with_signature(&signer.header(), claims, signer.key())?;
    Ok(token.as_str().to_owned())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Unsigned {
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnsignedHeader {
    typ: String,
    alg: Unsigned,
}

/// Serializes a set of claims into an unsigned `header.payload.` token
pub fn encode_unsigned<T: Serialize + ?Sized>(claims: &T) -> Result<String, serde_json::Error> {
    let header = serde_json::to_vec(&UnsignedHeader {
        typ: "JWT".to_owned(),
        alg: Unsigned::None,
    })?;
    let payload = serde_json::to_vec(claims)?;

    Ok(format!(
        "{}.{}.",
        Base64UrlRef::from_slice(&header),
        Base64UrlRef::from_slice(&payload)
    ))
}

/// Reads the claims of an unsigned `header.payload.` token
///
/// Fails unless the header declares `alg: none` and the signature segment is empty.
pub fn decode_unsigned<T: DeserializeOwned>(token: &str) -> Result<T, MalformedToken> {
    let (header, payload) = match token.split('.').collect::<Vec<_>>()[..] {
        [header, payload, ""] => (header, payload),
        _ => return Err(error::malformed_token("expected an unsigned compact token")),
    };

    let _: UnsignedHeader = decode_segment(header, "header is not an unsigned JOSE header")?;
    decode_segment(payload, PAYLOAD_INVALID)
}
