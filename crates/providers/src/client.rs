use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

/// Effective proxy decision for one endpoint.
#[derive(Debug, PartialEq)]
enum ProxyResolution {
    UseProxy(String),
    /// Provider set `proxy: ""`, or the host matched `noProxy`.
    ForceDirectConnect,
    /// Nothing configured; reqwest reads HTTPS_PROXY/HTTP_PROXY itself.
    None,
}

/// Match a host against `noProxy` rules: exact host, `*.suffix` (subdomains
/// only) and `.suffix` (the domain and its subdomains).
fn is_no_proxy(host: &str, no_proxy_list: &[String]) -> bool {
    let host = host.to_lowercase();
    no_proxy_list.iter().any(|rule| {
        let rule = rule.trim().to_lowercase();
        if rule.is_empty() {
            false
        } else if let Some(suffix) = rule.strip_prefix("*.") {
            host.ends_with(&format!(".{}", suffix))
        } else if let Some(suffix) = rule.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == rule
        }
    })
}

fn extract_host(api_base: &str) -> Option<String> {
    let parsed = url::Url::parse(api_base).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn resolve_proxy(
    provider_proxy: Option<&str>,
    global_proxy: Option<&str>,
    no_proxy: &[String],
    api_base: &str,
) -> ProxyResolution {
    match provider_proxy {
        Some("") => return ProxyResolution::ForceDirectConnect,
        Some(p) => return ProxyResolution::UseProxy(p.to_string()),
        None => {}
    }

    match global_proxy {
        Some(global) if !global.is_empty() => {
            let bypass = extract_host(api_base)
                .map(|host| is_no_proxy(&host, no_proxy))
                .unwrap_or(false);
            if bypass {
                ProxyResolution::ForceDirectConnect
            } else {
                ProxyResolution::UseProxy(global.to_string())
            }
        }
        _ => ProxyResolution::None,
    }
}

/// Build the HTTP client used to reach the oracle endpoint.
///
/// Precedence: provider proxy, then `network.proxy` unless the endpoint host
/// is listed in `network.noProxy`, then the process environment.
pub fn build_http_client(
    provider_proxy: Option<&str>,
    global_proxy: Option<&str>,
    no_proxy: &[String],
    api_base: &str,
    timeout: Duration,
) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(provider_proxy, global_proxy, no_proxy, api_base) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "Oracle client using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, connecting directly");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!(api_base = %api_base, "Oracle client forced to direct connect");
            builder = builder.no_proxy();
        }
        ProxyResolution::None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, using default");
        Client::new()
    })
}
