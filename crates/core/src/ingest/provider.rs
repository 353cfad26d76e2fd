use crate::config::Settings;
use crate::domain::article::canonical_symbol;
use crate::ingest::error::{FetchError, FetchErrorKind};
use crate::ingest::types::NewsPageResponse;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const LANGUAGE: &str = "en";
const PUBLISHED_AFTER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Upper bound for `lookback_hours`; one year.
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Articles requested per page (`limit`).
    pub page_size: u32,

    /// Stop paging once this many articles have been collected.
    pub max_articles: usize,

    /// Only articles published within this many hours before the call.
    pub lookback_hours: i64,

    /// Pause between successive page requests. Zero disables it.
    pub page_delay: Duration,

    /// Ask the API to return only the entities matching the requested symbol.
    pub filter_entities: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_articles: 30,
            lookback_hours: 48,
            page_delay: Duration::from_millis(300),
            filter_entities: false,
        }
    }
}

impl FetchOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("NEWS_PAGE_SIZE") {
            if let Ok(n) = s.parse::<u32>() {
                out.page_size = n;
            }
        }

        if let Ok(s) = std::env::var("NEWS_MAX_ARTICLES") {
            if let Ok(n) = s.parse::<usize>() {
                out.max_articles = n;
            }
        }

        if let Ok(s) = std::env::var("NEWS_LOOKBACK_HOURS") {
            match parse_lookback_hours(&s) {
                Some(n) => out.lookback_hours = n,
                None => tracing::warn!(
                    value = %s,
                    max = MAX_LOOKBACK_HOURS,
                    default = out.lookback_hours,
                    "ignoring invalid NEWS_LOOKBACK_HOURS"
                ),
            }
        }

        if let Ok(s) = std::env::var("NEWS_PAGE_DELAY_MS") {
            if let Ok(n) = s.parse::<u64>() {
                out.page_delay = Duration::from_millis(n);
            }
        }

        if let Ok(s) = std::env::var("NEWS_FILTER_ENTITIES") {
            out.filter_entities = matches!(s.trim(), "1" | "true" | "TRUE" | "yes");
        }

        out
    }

    /// Cutoff for this fetch. Out-of-range lookbacks are clamped to
    /// `0..=MAX_LOOKBACK_HOURS`, so the cutoff is never after `now`.
    pub fn published_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hours = self.lookback_hours.clamp(0, MAX_LOOKBACK_HOURS);
        now - ChronoDuration::hours(hours)
    }
}

/// Positive hour count no larger than [`MAX_LOOKBACK_HOURS`].
pub fn parse_lookback_hours(s: &str) -> Option<i64> {
    s.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| (1..=MAX_LOOKBACK_HOURS).contains(n))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub ticker: String,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
    pub published_after: DateTime<Utc>,
    pub filter_entities: bool,
}

#[async_trait::async_trait]
pub trait NewsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_page(&self, req: &PageRequest) -> Result<Vec<Value>, FetchError>;
}

/// Collects raw articles for `ticker` page by page until `max_articles` is
/// reached or a page comes back empty.
pub async fn fetch_all<P>(
    provider: &P,
    ticker: &str,
    opts: &FetchOptions,
) -> Result<Vec<Value>, FetchError>
where
    P: NewsProvider + ?Sized,
{
    fetch_all_at(provider, ticker, opts, Utc::now()).await
}

/// Like [`fetch_all`], with the lookback cutoff anchored at `now`.
pub async fn fetch_all_at<P>(
    provider: &P,
    ticker: &str,
    opts: &FetchOptions,
    now: DateTime<Utc>,
) -> Result<Vec<Value>, FetchError>
where
    P: NewsProvider + ?Sized,
{
    let symbol = canonical_symbol(ticker)
        .ok_or_else(|| FetchError::new(ticker, FetchErrorKind::InvalidTicker))?;

    let mut out: Vec<Value> = Vec::new();
    if opts.max_articles == 0 {
        return Ok(out);
    }

    let published_after = opts.published_after(now);
    let page_size = opts.page_size.max(1);
    let mut page: u32 = 1;

    loop {
        if page > 1 && !opts.page_delay.is_zero() {
            tokio::time::sleep(opts.page_delay).await;
        }

        let req = PageRequest {
            ticker: symbol.clone(),
            page,
            page_size,
            published_after,
            filter_entities: opts.filter_entities,
        };
        let articles = provider.fetch_page(&req).await?;

        tracing::debug!(
            provider = provider.provider_name(),
            %symbol,
            page,
            returned = articles.len(),
            "fetched news page"
        );

        if articles.is_empty() {
            break;
        }

        out.extend(articles);
        if out.len() >= opts.max_articles {
            out.truncate(opts.max_articles);
            break;
        }

        page += 1;
    }

    tracing::info!(%symbol, pages = page, articles = out.len(), "news fetch complete");
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct HttpNewsProvider {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    retries: u32,
}

impl HttpNewsProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_news_api_base_url()?.to_string();
        let api_token = settings.require_news_api_token()?.to_string();

        let timeout_secs = std::env::var("NEWS_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("NEWS_API_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build news API http client")?;

        Ok(Self {
            http,
            base_url,
            api_token,
            retries: retries.max(1),
        })
    }

    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build news API http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_token: api_token.into(),
            retries: DEFAULT_RETRIES,
        })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    fn query(&self, req: &PageRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("api_token", self.api_token.clone()),
            ("symbols", req.ticker.clone()),
            ("language", LANGUAGE.to_string()),
            ("limit", req.page_size.to_string()),
            ("page", req.page.to_string()),
            (
                "published_after",
                req.published_after.format(PUBLISHED_AFTER_FORMAT).to_string(),
            ),
        ];
        if req.filter_entities {
            params.push(("filter_entities", "true".to_string()));
        }
        params
    }

    async fn fetch_once(&self, req: &PageRequest) -> Result<Vec<Value>, FetchError> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&self.query(req))
            .send()
            .await
            .map_err(|e| FetchError::new(&req.ticker, FetchErrorKind::Request(e)))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| FetchError::new(&req.ticker, FetchErrorKind::Request(e)))?;

        if !status.is_success() {
            return Err(FetchError::new(
                &req.ticker,
                FetchErrorKind::Status {
                    status: status.as_u16(),
                    body: text,
                },
            ));
        }

        let parsed = serde_json::from_str::<NewsPageResponse>(&text)
            .map_err(|e| FetchError::new(&req.ticker, FetchErrorKind::Decode(e)))?;
        Ok(parsed.data)
    }
}

#[async_trait::async_trait]
impl NewsProvider for HttpNewsProvider {
    fn provider_name(&self) -> &'static str {
        "news_http_json"
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Vec<Value>, FetchError> {
        retry_page(self.retries, req, || self.fetch_once(req)).await
    }
}

/// Runs `attempt_fn` up to `retries` times, sleeping 1s, 2s, 4s, ... between
/// tries. Only retryable errors are retried.
async fn retry_page<F, Fut>(
    retries: u32,
    req: &PageRequest,
    mut attempt_fn: F,
) -> Result<Vec<Value>, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, FetchError>>,
{
    let retries = retries.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match attempt_fn().await {
            Ok(articles) => return Ok(articles),
            Err(err) => {
                if attempt >= retries || !err.is_retryable() {
                    return Err(err);
                }
                let backoff = Duration::from_secs(1 << (attempt - 1).min(6));
                tracing::warn!(
                    attempt,
                    ?backoff,
                    ticker = %req.ticker,
                    page = req.page,
                    error = %err,
                    "news page fetch failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
