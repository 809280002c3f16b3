//! Fixtures shared by the tests in this crate

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use aliri_clock::{Clock, TestClock, UnixTime};
use color_eyre::Result;
use reqwest::Url;
use serde_json::{json, Value};
use spauth::{
    config::{GlobalEndpoint, TrustConfigBuilder},
    jws::{self, SymmetricKey},
    TrustConfig,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::TrustEngine;

pub const CLIENT_ID: &str = "c1a7a1d2-4b8e-4c2b-9b1e-6f9d2e7a0c11";
pub const REALM: &str = "3a1b2c3d-4e5f-6789-abcd-ef0123456789";
pub const SECRET: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const SECRET_RAW: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const NOW: u64 = 1_700_000_000;

pub const KEY_PEM: &str = include_str!("../../spauth/data/signing-key.pem");
pub const CERT_PEM: &str = include_str!("../../spauth/data/signing-cert.pem");

/// A clock whose time can be moved while it is shared
#[derive(Clone, Debug)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for SharedClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst))
    }
}

pub fn context_claims(host: &str, exp: u64) -> Value {
    json!({
        "aud": format!("{}/{}@{}", CLIENT_ID, host, REALM),
        "iss": format!("00000001-0000-0000-c000-000000000000@{}", REALM),
        "nbf": NOW - 60,
        "exp": exp,
        "appctxsender": format!("00000003-0000-0ff1-ce00-000000000000@{}", REALM),
        "appctx": "{\"CacheKey\":\"cache-key-1\",\"SecurityTokenServiceUri\":\"https://accounts.accesscontrol.windows.net/tokens/OAuth/2\"}",
        "refreshtoken": "refresh-token-1",
        "isbrowserhostedapp": "true",
    })
}

pub fn sign(claims: &Value) -> String {
    jws::encode(&SymmetricKey::new(SECRET_RAW), claims).expect("test claims sign")
}

pub fn context_token(host: &str, exp: u64) -> String {
    sign(&context_claims(host, exp))
}

pub async fn mount_metadata(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/metadata/json/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoints": [
                { "location": format!("{}/tokens/OAuth/2", server.uri()), "protocol": "OAuth2" },
            ],
            "keys": [],
        })))
        .mount(server)
        .await;
}

pub fn config_builder(server: &MockServer) -> Result<TrustConfigBuilder> {
    Ok(TrustConfig::builder(CLIENT_ID)
        .client_secret(SECRET)
        .global_endpoint(GlobalEndpoint::Base(Url::parse(&server.uri())?)))
}

pub fn delegated_engine(server: &MockServer) -> Result<TrustEngine<TestClock>> {
    let config = config_builder(server)?.build();
    Ok(TrustEngine::new(config)?.with_clock(TestClock::new(UnixTime(NOW))))
}
