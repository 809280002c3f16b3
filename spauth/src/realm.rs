//! Discovery of a host's trust realm
//!
//! A host answers an unauthenticated request to its client service endpoint with a
//! `401` whose `WWW-Authenticate` challenge names the realm:
//!
//! ```text
//! WWW-Authenticate: Bearer realm="3a1b2c3d-4e5f-6789-abcd-ef0123456789",client_id="00000003-..."
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client};
use url::Url;

use crate::Realm;

const CLIENT_SERVICE_PATH: &str = "_vti_bin/client.svc";
const BEARER_REALM: &str = "Bearer realm=\"";
const REALM_LEN: usize = 36;

static GUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
        .expect("GUID pattern is a valid regular expression")
});

/// Probes hosts for the realm that scopes their trust relationships
#[derive(Clone, Debug)]
pub struct RealmDiscovery {
    client: Client,
}

impl RealmDiscovery {
    /// Constructs a new realm discovery prober
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Discovers the realm of the host at `target`
    ///
    /// Returns `None` on any failure, including network failures, a missing challenge,
    /// or a realm that is not a GUID. Callers should treat `None` as "realm unknown".
    #[tracing::instrument(skip(self, target), fields(target = %target))]
    pub async fn discover_realm(&self, target: &Url) -> Option<Realm> {
        let probe = match probe_url(target) {
            Ok(probe) => probe,
            Err(error) => {
                tracing::debug!(%error, "unable to form realm probe URL");
                return None;
            }
        };

        let resp = match self
            .client
            .get(probe)
            .header(header::AUTHORIZATION, "Bearer ")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(error) => {
                tracing::warn!(%error, "realm probe failed");
                return None;
            }
        };

        if resp.status().is_success() {
            tracing::debug!("host accepted anonymous probe; no realm challenge issued");
            return None;
        }

        let challenge = resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok());

        let realm = challenge.and_then(realm_from_challenge);
        match &realm {
            Some(realm) => tracing::debug!(%realm, "discovered realm"),
            None => tracing::debug!(
                response.status = resp.status().as_u16(),
                "no realm found in challenge"
            ),
        }

        realm
    }
}

fn probe_url(target: &Url) -> Result<Url, url::ParseError> {
    let base = target.as_str().trim_end_matches('/');
    Url::parse(&format!("{}/{}", base, CLIENT_SERVICE_PATH))
}

/// Extracts the realm GUID from a `WWW-Authenticate` bearer challenge
pub fn realm_from_challenge(challenge: &str) -> Option<Realm> {
    let start = challenge.find(BEARER_REALM)? + BEARER_REALM.len();
    let candidate = challenge.get(start..start + REALM_LEN)?;

    if GUID.is_match(candidate) {
        Some(Realm::new(candidate.to_owned()))
    } else {
        None
    }
}
