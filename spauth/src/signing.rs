//! The X.509 signing credential used in high-trust mode

use std::{fmt, path::Path};

use aliri::{jwa, jws::Verifier as _, Jwk};
use aliri_base64::Base64Url;
use openssl::{hash::MessageDigest, x509::X509};

use crate::{
    error::{self, CredentialError, SignatureMismatch},
    jws::{Algorithm, Header, Signer},
};

/// An RSA private key paired with the certificate that vouches for it
///
/// Tokens signed with this credential carry the certificate's SHA-1 thumbprint
/// in their `x5t` header so the host can select the matching public key.
#[derive(Clone)]
pub struct SigningCredential {
    key: Jwk,
    certificate: Vec<u8>,
    x5t: String,
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("key", &"<redacted>")
            .field("x5t", &self.x5t)
            .finish()
    }
}

impl SigningCredential {
    /// Loads a credential from a PEM private key and a PEM certificate
    ///
    /// The key may be either a PKCS#8 `PRIVATE KEY` or a PKCS#1 `RSA PRIVATE KEY`.
    pub fn from_pem(key_pem: &str, certificate_pem: &str) -> Result<Self, CredentialError> {
        let key = jwa::Rsa::private_key_from_pem(key_pem).map_err(CredentialError::KeyRejected)?;

        let certificate =
            X509::from_pem(certificate_pem.as_bytes()).map_err(CredentialError::Certificate)?;
        let thumbprint = certificate
            .digest(MessageDigest::sha1())
            .map_err(CredentialError::Certificate)?;
        let der = certificate.to_der().map_err(CredentialError::Certificate)?;

        Ok(Self {
            key: Jwk::from(key),
            certificate: der,
            x5t: Base64Url::from_raw(thumbprint.to_vec()).to_string(),
        })
    }

    /// Loads a credential from a PEM private key file and a PEM certificate file
    pub fn from_pem_files(
        key_path: impl AsRef<Path>,
        certificate_path: impl AsRef<Path>,
    ) -> Result<Self, CredentialError> {
        let key = read_file(key_path.as_ref())?;
        let certificate = read_file(certificate_path.as_ref())?;
        Self::from_pem(&key, &certificate)
    }

    /// The base64url-encoded SHA-1 thumbprint of the certificate
    pub fn x5t(&self) -> &str {
        &self.x5t
    }

    /// The DER-encoded certificate
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Verifies an RS256 signature made by this credential
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SignatureMismatch> {
        self.key
            .verify(Algorithm::RS256, data, signature)
            .map_err(|_| error::signature_mismatch())
    }
}

impl Signer for SigningCredential {
    fn header(&self) -> Header {
        Header::new(Algorithm::RS256).with_x5t(self.x5t.clone())
    }

    fn key(&self) -> &Jwk {
        &self.key
    }
}

fn read_file(path: &Path) -> Result<String, CredentialError> {
    std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;
    use crate::jws;

    const KEY_PEM: &str = include_str!("../data/signing-key.pem");
    const CERT_PEM: &str = include_str!("../data/signing-cert.pem");

    #[test]
    fn thumbprint_is_sha1_of_certificate() -> Result<()> {
        let credential = SigningCredential::from_pem(KEY_PEM, CERT_PEM)?;
        assert_eq!(credential.x5t(), "PdKBNaTBIMzqrE1-2Y_DKGA2cVU");
        assert!(!credential.certificate().is_empty());
        Ok(())
    }

    #[test]
    fn signatures_verify_against_own_public_key() -> Result<()> {
        let credential = SigningCredential::from_pem(KEY_PEM, CERT_PEM)?;
        let token = jws::encode(&credential, &json!({ "aud": "host" }))?;

        let decomposed = jws::decompose(&token)?;
        let signature = decomposed.signature().as_slice();
        credential.verify(decomposed.message().as_bytes(), signature)?;
        assert!(credential.verify(b"header.tampered", signature).is_err());
        Ok(())
    }

    #[test]
    fn header_carries_thumbprint() -> Result<()> {
        let credential = SigningCredential::from_pem(KEY_PEM, CERT_PEM)?;
        let header = credential.header();
        assert_eq!(header.alg(), Algorithm::RS256);
        assert_eq!(header.x5t(), Some(credential.x5t()));
        Ok(())
    }

    #[test]
    fn missing_certificate_is_rejected() {
        let err = SigningCredential::from_pem(KEY_PEM, "not a certificate").unwrap_err();
        assert!(matches!(err, CredentialError::Certificate(_)));
    }

    #[test]
    fn certificate_in_place_of_key_is_rejected() {
        let err = SigningCredential::from_pem(CERT_PEM, CERT_PEM).unwrap_err();
        assert!(matches!(err, CredentialError::KeyRejected(_)));
    }

    #[test]
    fn debug_does_not_leak_key() -> Result<()> {
        let credential = SigningCredential::from_pem(KEY_PEM, CERT_PEM)?;
        let debug = format!("{:?}", credential);
        assert!(debug.contains("<redacted>"));
        Ok(())
    }
}
