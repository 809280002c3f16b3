//! Well-known principals and principal formatting

use url::Url;

/// The principal of the token-issuance service that signs context tokens
pub const ACS_PRINCIPAL: &str = "00000001-0000-0000-c000-000000000000";

/// The principal of the SharePoint host itself
pub const SHAREPOINT_PRINCIPAL: &str = "00000003-0000-0ff1-ce00-000000000000";

/// The identity provider claimed for Windows identities in outer tokens
pub const ACTIVE_DIRECTORY_IDP: &str = "urn:office:idp:activedirectory";

/// Formats `{principal}/{host}@{realm}`, or `{principal}@{realm}` when no host is given
pub fn format_principal(principal: &str, host: Option<&str>, realm: &str) -> String {
    match host {
        Some(host) if !host.is_empty() => format!("{}/{}@{}", principal, host, realm),
        _ => format!("{}@{}", principal, realm),
    }
}

/// The portion of a formatted principal before the `@`
pub fn principal_name(formatted: &str) -> &str {
    formatted
        .split_once('@')
        .map_or(formatted, |(name, _)| name)
}

/// The `host[:port]` authority of a URL, omitting the scheme's default port
pub fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_owned(),
        _ => String::new(),
    }
}
