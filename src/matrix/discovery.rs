//! Homeserver discovery via `.well-known` documents and `SRV` records.

use hickory_resolver::TokioAsyncResolver;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain_types::HomeserverUrl;

/// What kind of endpoint the caller wants to discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// Federation (server-server) endpoint
    Server,
    /// Client-server endpoint
    Client,
    /// Identity server endpoint
    Identity,
}

#[derive(Debug, Deserialize)]
struct WellKnownServer {
    #[serde(rename = "m.server")]
    m_server: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WellKnownClient {
    #[serde(rename = "m.homeserver")]
    homeserver: Option<WellKnownBaseUrl>,
    #[serde(rename = "m.identity_server")]
    identity_server: Option<WellKnownBaseUrl>,
}

#[derive(Debug, Deserialize)]
struct WellKnownBaseUrl {
    base_url: String,
}

fn fallback(domain: &str) -> HomeserverUrl {
    HomeserverUrl::try_new(format!("https://{domain}:8448"))
        .unwrap_or_else(|_| HomeserverUrl::try_new("https://localhost:8448".to_string()).unwrap())
}

/// Resolves a base URL for `domain` suitable for `target` traffic, following
/// the Matrix server discovery algorithm: explicit `domain:port` skips
/// discovery entirely; otherwise SRV records / `.well-known` documents are
/// consulted before falling back to `domain:8448`.
pub async fn discover(client: &reqwest::Client, domain: &str, target: DiscoveryTarget) -> HomeserverUrl {
    if domain.contains(':') {
        return HomeserverUrl::try_new(format!("https://{domain}"))
            .unwrap_or_else(|_| fallback(domain));
    }

    let resolved = match target {
        DiscoveryTarget::Server => discover_server(client, domain).await,
        DiscoveryTarget::Client | DiscoveryTarget::Identity => {
            discover_client(client, domain, target).await
        }
    };

    resolved.unwrap_or_else(|| fallback(domain))
}

async fn discover_server(client: &reqwest::Client, domain: &str) -> Option<HomeserverUrl> {
    if let Some(target) = srv_lookup(domain).await {
        debug!(domain, %target, "resolved matrix server via SRV");
        return HomeserverUrl::try_new(format!("https://{target}")).ok();
    }

    let url = format!("https://{domain}/.well-known/matrix/server");
    let response = client.get(&url).send().await.ok()?;
    let body: WellKnownServer = response.json().await.ok()?;
    let server = body.m_server?;
    HomeserverUrl::try_new(format!("https://{server}")).ok()
}

async fn discover_client(
    client: &reqwest::Client,
    domain: &str,
    target: DiscoveryTarget,
) -> Option<HomeserverUrl> {
    let url = format!("https://{domain}/.well-known/matrix/client");
    let response = client.get(&url).send().await.ok()?;
    let body: WellKnownClient = response.json().await.ok()?;

    let base_url = match target {
        DiscoveryTarget::Identity => body.identity_server?.base_url,
        _ => body.homeserver?.base_url,
    };
    HomeserverUrl::try_new(base_url).ok()
}

async fn srv_lookup(domain: &str) -> Option<String> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok()?;
    let name = format!("_matrix._tcp.{domain}");
    let lookup = resolver.srv_lookup(name).await.ok()?;
    let record = lookup.iter().next()?;
    let target = record.target().to_utf8();
    let target = target.trim_end_matches('.');
    warn!(domain, target, "SRV discovery resolved a federation target");
    Some(format!("{target}:{}", record.port()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn domain_with_explicit_port_skips_discovery() {
        let client = reqwest::Client::new();
        let result = discover(&client, "example.org:1234", DiscoveryTarget::Client).await;
        assert_eq!(result.into_inner(), "https://example.org:1234");
    }
}
