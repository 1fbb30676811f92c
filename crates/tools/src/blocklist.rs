use surfpilot_core::{Error, Result};
use tracing::warn;

/// Domains the agent must not end up on. A rule matches the domain itself
/// and any subdomain.
#[derive(Debug, Clone, Default)]
pub struct UrlBlocklist {
    domains: Vec<String>,
}

impl UrlBlocklist {
    pub fn new(domains: &[String]) -> Self {
        let domains = domains
            .iter()
            .map(|d| d.trim().trim_start_matches("*.").trim_start_matches('.').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        if self.domains.is_empty() {
            return false;
        }
        let host = match url::Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(h) => h.to_lowercase(),
                None => return false,
            },
            Err(_) => return false,
        };
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }

    /// `BlockedUrl` if `url` is on a blocked domain.
    pub fn check(&self, url: &str) -> Result<()> {
        if self.is_blocked(url) {
            warn!(url = %url, "Blocked URL reached");
            return Err(Error::BlockedUrl(url.to_string()));
        }
        Ok(())
    }
}
