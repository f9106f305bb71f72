use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::rr::Name,
    TokioResolver,
};
use thiserror::Error;
use tracing::debug;

use domain_verify_core::{DnsResolver, ResolutionError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ATTEMPTS: usize = 2;

/// Connection settings for [`HickoryTxtResolver`].
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Explicit upstream nameserver. `None` uses the system configuration.
    pub nameserver: Option<SocketAddr>,
    /// Per-query timeout handed to hickory.
    pub timeout: Duration,
    pub attempts: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            nameserver: None,
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolverSetupError {
    #[error("failed to read system resolver configuration: {0}")]
    SystemConfig(String),
}

/// TXT lookups backed by `hickory-resolver`.
#[derive(Clone)]
pub struct HickoryTxtResolver {
    resolver: TokioResolver,
}

impl HickoryTxtResolver {
    pub fn new(settings: &ResolverSettings) -> Result<Self, ResolverSetupError> {
        let mut options = ResolverOpts::default();
        options.timeout = settings.timeout;
        options.attempts = settings.attempts;

        let builder = match settings.nameserver {
            Some(addr) => {
                let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
                TokioResolver::builder_with_config(
                    ResolverConfig::from_parts(None, Vec::new(), group),
                    TokioConnectionProvider::default(),
                )
            }
            None => TokioResolver::builder_tokio()
                .map_err(|err| ResolverSetupError::SystemConfig(err.to_string()))?,
        };

        Ok(Self {
            resolver: builder.with_options(options).build(),
        })
    }

    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, ResolutionError> {
        // Fully qualified so search domains from resolv.conf never apply.
        let name = Name::from_ascii(format!("{domain}."))
            .map_err(|err| ResolutionError::Malformed(err.to_string()))?;

        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|data| String::from_utf8_lossy(data).to_string())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .collect()),
            Err(err) if err.is_no_records_found() => Ok(Vec::new()),
            Err(err) => Err(ResolutionError::Lookup(err.to_string())),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryTxtResolver {
    async fn resolve(&self, domain: &str, expected_token: &str) -> Result<bool, ResolutionError> {
        let records = self.lookup_txt(domain).await?;
        let matched = txt_matches(records.iter().map(String::as_str), expected_token);
        debug!(
            stage = "dns",
            domain,
            records = records.len(),
            matched,
            "txt lookup completed"
        );
        Ok(matched)
    }
}

/// `true` when any record equals the token exactly once surrounding whitespace is trimmed.
pub fn txt_matches<'a>(records: impl IntoIterator<Item = &'a str>, expected_token: &str) -> bool {
    let expected = expected_token.trim();
    if expected.is_empty() {
        return false;
    }
    records.into_iter().any(|record| record.trim() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_token_matches() {
        assert!(txt_matches(["v=spf1 -all", "abc123"], "abc123"));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert!(txt_matches(["  abc123\t"], "abc123"));
    }

    #[test]
    fn partial_or_case_variant_does_not_match() {
        assert!(!txt_matches(["token=abc123", "abc1234", "ABC123"], "abc123"));
    }

    #[test]
    fn empty_token_never_matches() {
        assert!(!txt_matches(["", "  "], " "));
    }

    #[test]
    fn no_records_is_not_a_match() {
        assert!(!txt_matches(std::iter::empty(), "abc123"));
    }

    #[tokio::test]
    async fn builds_with_explicit_nameserver() {
        let settings = ResolverSettings {
            nameserver: Some("127.0.0.1:53".parse().unwrap()),
            timeout: Duration::from_millis(200),
            attempts: 1,
        };
        assert!(HickoryTxtResolver::new(&settings).is_ok());
    }

    #[tokio::test]
    async fn malformed_domain_is_reported_without_network() {
        let settings = ResolverSettings {
            nameserver: Some("127.0.0.1:9".parse().unwrap()),
            timeout: Duration::from_millis(200),
            attempts: 1,
        };
        let resolver = HickoryTxtResolver::new(&settings).expect("resolver");
        let label = "a".repeat(70);
        let err = resolver
            .resolve(&format!("{label}.example"), "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Malformed(_)));
    }
}
