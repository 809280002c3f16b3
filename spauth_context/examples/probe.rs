use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Url;
use spauth::{
    metadata::Protocol, CallerIdentity, EncodedContextToken, MetadataResolver, RealmRef,
    SigningCredential, TrustConfig,
};
use spauth_context::TrustEngine;

#[derive(Debug, Parser)]
struct Opts {
    /// The client ID the add-in is registered under
    #[arg(long, env)]
    client_id: String,

    /// The shared client secret, base64-encoded
    #[arg(long, env, hide_env_values = true)]
    client_secret: Option<String>,

    /// The host name context tokens are addressed to
    #[arg(long, env)]
    host_name: Option<String>,

    /// A realm to use instead of discovering one
    #[arg(long, env)]
    realm: Option<String>,

    /// A PEM private key for minting high-trust tokens
    #[arg(long, env, requires = "signing_cert_path")]
    signing_key_path: Option<PathBuf>,

    /// The PEM certificate matching the signing key
    #[arg(long, env, requires = "signing_key_path")]
    signing_cert_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discovers the realm of a host web
    Realm { target: Url },
    /// Fetches the trust metadata for a realm
    Metadata { realm: String },
    /// Validates a context token
    Validate {
        token: String,
        /// The authority the token is expected to be addressed to
        #[arg(long)]
        app_host: Option<String>,
    },
    /// Calls a host web's `_api/web` endpoint with a freshly minted high-trust token
    HighTrust {
        target: Url,
        /// Act on behalf of this security identifier rather than as the add-in alone
        #[arg(long)]
        sid: Option<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut builder = TrustConfig::builder(opts.client_id);
    if let Some(secret) = opts.client_secret {
        builder = builder.client_secret(secret);
    }
    if let Some(host_name) = opts.host_name {
        builder = builder.host_name(host_name);
    }
    if let Some(realm) = opts.realm {
        builder = builder.realm(realm);
    }
    if let (Some(key), Some(cert)) = (opts.signing_key_path, opts.signing_cert_path) {
        builder = builder.signing_credential(SigningCredential::from_pem_files(key, cert)?);
    }

    let engine = TrustEngine::new(builder.build())?;

    match opts.command {
        Command::Realm { target } => match engine.realms().discover_realm(&target).await {
            Some(realm) => tracing::info!(%realm, "discovered realm"),
            None => tracing::warn!("host did not disclose a realm"),
        },
        Command::Metadata { realm } => {
            let resolver = MetadataResolver::new(engine.config(), engine.client().clone());
            let doc = resolver.fetch_metadata(RealmRef::from_str(&realm)).await?;

            tracing::info!(service_name = %doc.service_name, "fetched trust metadata");
            for endpoint in &doc.endpoints {
                tracing::info!(protocol = %endpoint.protocol, location = %endpoint.location, "endpoint");
            }
            tracing::info!(
                oauth2 = %doc.endpoint_for(Protocol::OAuth2)?,
                thumbprint = %doc.signing_certificate()?.thumbprint(),
                "resolved"
            );
        }
        Command::Validate { token, app_host } => {
            let token = EncodedContextToken::new(token);
            let token = engine.validate_context_token(&token, app_host.as_deref())?;
            tracing::info!(
                realm = %token.realm(),
                audience = %token.audience(),
                target_principal = token.target_principal_name(),
                valid_to = token.valid_to().0,
                "context token is valid"
            );
        }
        Command::HighTrust { target, sid } => {
            let identity = sid.map(CallerIdentity::authenticated);
            let client = engine.high_trust_client(&target, identity.as_ref()).await?;
            let resp = client
                .get("_api/web")?
                .header(reqwest::header::ACCEPT, "application/json;odata=nometadata")
                .send()
                .await?;
            tracing::info!(status = resp.status().as_u16(), "host responded");
            println!("{}", resp.text().await?);
        }
    }

    Ok(())
}
