//! HTTP fetch layer for feed sources.
//!
//! [`HttpClient`] is the low-level seam over `reqwest`, with decorators for
//! the two common feed authentication schemes (API key header, URL query
//! parameter). [`FeedFetcher`] is the high-level seam the poll scheduler
//! consumes: a URL in, raw snapshot bytes out.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Request, Response};

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Plain `reqwest` client with a hard request timeout so a stalled source
/// cannot hold its poll cycle open forever.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self(reqwest::Client::builder().timeout(timeout).build()?))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// `header_name` is the header field to set (e.g. `"Authorization"` or a
/// provider-specific name) and `key` is the raw value written into it.
/// Both are validated once at construction, so every request carries the
/// header.
pub struct ApiKey<C> {
    inner: C,
    name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: String, key: String) -> Result<Self> {
        let name = HeaderName::from_bytes(header_name.as_bytes())
            .with_context(|| format!("invalid auth header name {header_name:?}"))?;
        let value = key
            .parse::<HeaderValue>()
            .context("API key is not a valid header value")?;
        Ok(Self { inner, name, value })
    }

    fn apply(&self, req: &mut Request) {
        req.headers_mut().insert(self.name.clone(), self.value.clone());
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<Response> {
        self.apply(&mut req);
        self.inner.execute(req).await
    }
}

/// An [`HttpClient`] wrapper that appends an API key as a URL query
/// parameter named `param_name`.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

/// Fetches the raw bytes of one feed snapshot.
///
/// The scheduler depends on this seam rather than on [`HttpClient`] so
/// tests can substitute canned or misbehaving sources without constructing
/// HTTP responses.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<C: HttpClient> FeedFetcher for C {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        fetch_bytes(self, url).await
    }
}

pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid feed url {url:?}"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
