//! Link Processor
//!
//! Extracts `http`/`https` URLs from a message body and attaches a link
//! preview for each. Previews are shared rows keyed by URL: a URL seen before
//! reuses the stored preview and makes no network call. New URLs go through
//! the [`OgpFetcher`] port; a failed fetch still stores a URL-only preview.
//!
//! Fetching happens in [`prefetch_previews`], before the write transaction
//! opens; [`attach_links`] then stores the results inside it.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::backend::store::models::LinkPreview;
use crate::backend::store::prelude::*;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).expect("url pattern is valid"));

/// Punctuation that usually ends the sentence rather than the URL
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\''];

/// Distinct http(s) URLs in order of first appearance
pub fn extract_urls(body: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_RE.find_iter(body) {
        let candidate = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        let Ok(parsed) = Url::parse(candidate) else {
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            continue;
        }
        if !urls.iter().any(|u| u == candidate) {
            urls.push(candidate.to_string());
        }
    }
    urls
}

/// OGP fields returned by the preview collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OgpData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub card_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum OgpError {
    #[error("OGP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid OGP service URL: {0}")]
    InvalidEndpoint(String),
}

/// Fetches Open Graph data for a URL
#[async_trait]
pub trait OgpFetcher: Send + Sync {
    /// `Ok(None)` when the page has no usable metadata
    async fn fetch(&self, url: &str) -> Result<Option<OgpData>, OgpError>;
}

/// Fetcher used when no OGP service is configured; every link is URL-only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOgpFetcher;

#[async_trait]
impl OgpFetcher for NoopOgpFetcher {
    async fn fetch(&self, _url: &str) -> Result<Option<OgpData>, OgpError> {
        Ok(None)
    }
}

/// Calls an external OGP service as `GET {endpoint}?url={target}`
#[derive(Debug, Clone)]
pub struct HttpOgpFetcher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpOgpFetcher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OgpError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| OgpError::InvalidEndpoint(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl OgpFetcher for HttpOgpFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<OgpData>, OgpError> {
        let mut request_url = self.endpoint.clone();
        request_url.query_pairs_mut().append_pair("url", url);

        let response = self.client.get(request_url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data = response.error_for_status()?.json::<OgpData>().await?;
        Ok(Some(data))
    }
}

/// URLs beyond this many in one body get no preview
pub const MAX_LINKS_PER_MESSAGE: usize = 10;

/// Previews for the URLs of one body, resolved before the write transaction
#[derive(Debug, Clone, Default)]
pub struct LinkPlan {
    pub previews: Vec<LinkPreview>,
}

impl LinkPlan {
    pub fn len(&self) -> usize {
        self.previews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previews.is_empty()
    }
}

/// Look up or fetch a preview for every URL in `body`
///
/// Holds a store handle only for the cache lookup; the OGP calls for unseen
/// URLs run afterwards, concurrently, with no handle open.
pub async fn prefetch_previews(
    store: &dyn Store,
    fetcher: &dyn OgpFetcher,
    body: &str,
) -> Result<LinkPlan, StoreError> {
    let mut urls = extract_urls(body);
    if urls.len() > MAX_LINKS_PER_MESSAGE {
        tracing::debug!(found = urls.len(), "[Links] Too many links, keeping the first ones");
        urls.truncate(MAX_LINKS_PER_MESSAGE);
    }
    if urls.is_empty() {
        return Ok(LinkPlan::default());
    }

    let mut cached = Vec::with_capacity(urls.len());
    {
        let mut repos = store.connect().await?;
        for url in &urls {
            cached.push(repos.find_preview_by_url(url).await?);
        }
    }

    let previews = join_all(urls.iter().zip(cached).map(|(url, hit)| async move {
        match hit {
            Some(existing) => existing,
            None => fetch_preview(fetcher, url).await,
        }
    }))
    .await;

    Ok(LinkPlan { previews })
}

/// Store the planned previews and attach them to `message_id`
///
/// A URL stored by someone else since the lookup keeps the stored row.
/// Returns the number of links attached.
pub async fn attach_links(
    repos: &mut dyn Repos,
    message_id: Uuid,
    plan: &LinkPlan,
    at: DateTime<Utc>,
) -> Result<usize, StoreError> {
    for preview in &plan.previews {
        let stored = repos.upsert_preview(preview).await?;
        repos.attach_link(message_id, stored.id, at).await?;
    }
    Ok(plan.len())
}

async fn fetch_preview(fetcher: &dyn OgpFetcher, url: &str) -> LinkPreview {
    let mut preview = LinkPreview::url_only(url);
    match fetcher.fetch(url).await {
        Ok(Some(data)) => {
            preview.title = data.title;
            preview.description = data.description;
            preview.image_url = data.image_url;
            preview.site_name = data.site_name;
            preview.card_type = data.card_type;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(url = %url, "[Links] OGP fetch failed, storing URL only: {}", e);
        }
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::Fixture;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers with a fixed title
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OgpFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<OgpData>, OgpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(OgpData {
                title: Some("Example Domain".to_string()),
                ..OgpData::default()
            }))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl OgpFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<OgpData>, OgpError> {
            Err(OgpError::InvalidEndpoint("unreachable".to_string()))
        }
    }

    #[test]
    fn test_extract_urls() {
        assert_eq!(
            extract_urls("see https://example.com/docs. and (http://rust-lang.org)"),
            vec!["https://example.com/docs", "http://rust-lang.org"]
        );
        assert_eq!(
            extract_urls("https://a.example.com https://a.example.com"),
            vec!["https://a.example.com"]
        );
        assert!(extract_urls("ftp://files.example.com and mailto:x@y.z").is_empty());
        assert!(extract_urls("https://").is_empty());
    }

    proptest! {
        #[test]
        fn prop_extracted_urls_are_http(body in "[ a-z:/.hpst]{0,80}") {
            for url in extract_urls(&body) {
                let parsed = Url::parse(&url).unwrap();
                prop_assert!(matches!(parsed.scheme(), "http" | "https"));
                prop_assert!(!url.ends_with('.'));
            }
        }
    }

    #[tokio::test]
    async fn test_existing_preview_is_reused_without_fetch() {
        let fx = Fixture::new().await;
        let first = fx.post(fx.alice.id, "https://example.com").await;
        let second = fx.post(fx.bob.id, "again https://example.com").await;
        let fetcher = CountingFetcher::default();
        let store = fx.store();

        let plan = prefetch_previews(store.as_ref(), &fetcher, &first.body).await.unwrap();
        let mut repos = store.connect().await.unwrap();
        attach_links(repos.as_mut(), first.id, &plan, Utc::now()).await.unwrap();
        drop(repos);

        let plan = prefetch_previews(store.as_ref(), &fetcher, &second.body).await.unwrap();
        let mut repos = store.connect().await.unwrap();
        attach_links(repos.as_mut(), second.id, &plan, Utc::now()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let links = repos.list_message_links(&[first.id, second.id]).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link.id, links[1].link.id);
        assert_eq!(links[0].link.title.as_deref(), Some("Example Domain"));
    }

    #[tokio::test]
    async fn test_concurrent_fetch_of_same_url_keeps_one_row() {
        let fx = Fixture::new().await;
        let first = fx.post(fx.alice.id, "https://example.net").await;
        let second = fx.post(fx.bob.id, "https://example.net").await;
        let fetcher = CountingFetcher::default();
        let store = fx.store();

        // Both lookups miss before either write lands
        let plan_a = prefetch_previews(store.as_ref(), &fetcher, &first.body).await.unwrap();
        let plan_b = prefetch_previews(store.as_ref(), &fetcher, &second.body).await.unwrap();
        let mut repos = store.connect().await.unwrap();
        attach_links(repos.as_mut(), first.id, &plan_a, Utc::now()).await.unwrap();
        attach_links(repos.as_mut(), second.id, &plan_b, Utc::now()).await.unwrap();

        let links = repos.list_message_links(&[first.id, second.id]).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link.id, links[1].link.id);
    }

    #[tokio::test]
    async fn test_failed_fetch_stores_url_only() {
        let fx = Fixture::new().await;
        let msg = fx.post(fx.alice.id, "read https://example.org/post").await;
        let store = fx.store();

        let plan = prefetch_previews(store.as_ref(), &FailingFetcher, &msg.body).await.unwrap();
        let mut repos = store.connect().await.unwrap();
        let count = attach_links(repos.as_mut(), msg.id, &plan, Utc::now()).await.unwrap();
        assert_eq!(count, 1);

        let links = repos.list_message_links(&[msg.id]).await.unwrap();
        assert_eq!(links[0].link.url, "https://example.org/post");
        assert!(links[0].link.title.is_none());
    }

    #[tokio::test]
    async fn test_link_count_is_capped() {
        let fx = Fixture::new().await;
        let body: Vec<String> = (0..MAX_LINKS_PER_MESSAGE + 5)
            .map(|i| format!("https://example.com/{}", i))
            .collect();
        let fetcher = CountingFetcher::default();

        let plan = prefetch_previews(fx.store().as_ref(), &fetcher, &body.join(" ")).await.unwrap();
        assert_eq!(plan.len(), MAX_LINKS_PER_MESSAGE);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), MAX_LINKS_PER_MESSAGE);
        assert_eq!(plan.previews[0].url, "https://example.com/0");
    }

    #[test]
    fn test_http_fetcher_rejects_bad_endpoint() {
        let err = HttpOgpFetcher::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, OgpError::InvalidEndpoint(_)));
    }
}
