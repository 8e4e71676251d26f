//! Subscription import: fetch a URL, decode the body, parse the links, and
//! merge them into the owning profile.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link::{base64_decode, parse_share_links, LinkImport};
use super::profile::{Profile, SubscriptionMerge};

const USER_AGENT: &str = concat!("picoroute/", env!("CARGO_PKG_VERSION"));

/// Subscription bodies are either plain share-link lines or the same text
/// base64-wrapped (standard or URL-safe, padded or not).
pub fn decode_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.contains("://") {
        return trimmed.to_string();
    }
    match base64_decode(trimmed) {
        Some(decoded) if decoded.contains("://") => decoded,
        _ => trimmed.to_string(),
    }
}

/// Parse a subscription body. Bad lines land in `failures`.
pub fn parse_subscription(body: &str) -> LinkImport {
    parse_share_links(&decode_body(body))
}

/// Outcome of refreshing one profile.
#[derive(Debug)]
pub struct ProfileUpdate {
    pub merge: SubscriptionMerge,
    /// Lines that failed to parse, as `(line, reason)`.
    pub failures: Vec<(usize, String)>,
}

pub struct SubscriptionFetcher {
    client: reqwest::Client,
}

impl SubscriptionFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url` and parse the body; abandons the request when `cancel` fires.
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<LinkImport> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("subscription fetch cancelled: {}", url),
            body = self.fetch_body(url) => {
                let import = parse_subscription(&body?);
                info!(
                    url = url,
                    outbounds = import.outbounds.len(),
                    failed = import.failures.len(),
                    "subscription fetched"
                );
                Ok(import)
            }
        }
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        debug!(url = url, "fetching subscription");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP {} for {}", response.status(), url);
        }
        Ok(response.text().await?)
    }
}

/// Fetch `profile.url` and replace the profile's imported outbounds.
///
/// A body with no parsable link leaves the profile untouched.
pub async fn update_profile(
    fetcher: &SubscriptionFetcher,
    profile: &mut Profile,
    cancel: &CancellationToken,
) -> Result<ProfileUpdate> {
    if !profile.has_subscription() {
        bail!("profile '{}' has no subscription url", profile.name);
    }
    let import = fetcher.fetch(&profile.url, cancel).await?;
    let failures: Vec<(usize, String)> = import
        .failures
        .iter()
        .map(|f| (f.line, f.error.to_string()))
        .collect();
    if import.outbounds.is_empty() {
        bail!(
            "subscription for profile '{}' yielded no outbounds ({} bad lines)",
            profile.name,
            failures.len()
        );
    }
    let merge = profile.apply_subscription(import.outbounds);
    Ok(ProfileUpdate { merge, failures })
}

/// Refresh several profiles at once.
///
/// Each profile gets a child token of `cancel`, so one shared cancel stops
/// all of them while a failure in one does not affect the others. Results
/// come back in `profiles` order.
pub async fn update_profiles(
    fetcher: &SubscriptionFetcher,
    profiles: &mut [Profile],
    cancel: &CancellationToken,
) -> Vec<Result<ProfileUpdate>> {
    let results = join_all(profiles.iter_mut().map(|profile| {
        let token = cancel.child_token();
        async move { update_profile(fetcher, profile, &token).await }
    }))
    .await;
    for (i, r) in results.iter().enumerate() {
        if let Err(e) = r {
            warn!(index = i, error = %e, "profile update failed");
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine;

    const LINKS: &str = "trojan://pw@a.example.com:443#a\nsocks://b.example.com:1080#b\n";

    #[test]
    fn plain_body_is_used_as_is() {
        let import = parse_subscription(LINKS);
        assert_eq!(import.outbounds.len(), 2);
        assert!(import.is_complete());
    }

    #[test]
    fn base64_bodies_are_unwrapped() {
        for encoded in [STANDARD.encode(LINKS), URL_SAFE_NO_PAD.encode(LINKS)] {
            let wrapped = format!("{}\n", encoded);
            let import = parse_subscription(&wrapped);
            assert_eq!(import.outbounds.len(), 2, "{}", encoded);
        }
    }

    #[test]
    fn junk_body_reports_failures() {
        let import = parse_subscription("not-base64-and-not-links\n\nanother");
        assert!(import.outbounds.is_empty());
        assert_eq!(import.failures.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_error() {
        let fetcher = SubscriptionFetcher::new(Duration::from_secs(5)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch("http://127.0.0.1:9/never", &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn profile_without_url_is_rejected() {
        let fetcher = SubscriptionFetcher::new(Duration::from_secs(5)).unwrap();
        let mut profile = Profile::new("local", "");
        assert!(update_profile(&fetcher, &mut profile, &CancellationToken::new())
            .await
            .is_err());
    }
}
