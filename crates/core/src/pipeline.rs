use crate::domain::article::{canonical_symbol, normalize_batch, ArticleRecord};
use crate::domain::sentiment::{aggregate, SentimentDistribution, SentimentFilter};
use crate::ingest::{fetch_all, FetchError, FetchErrorKind, FetchOptions, NewsProvider};
use crate::storage::CacheStore;
use serde::Serialize;

pub const NO_DATA_MESSAGE: &str = "No news articles found.";

/// Why refreshing one ticker failed.
#[derive(Debug)]
pub enum RefreshError {
    Fetch(FetchError),
    Store(anyhow::Error),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::Fetch(err) => write!(f, "{err}"),
            RefreshError::Store(err) => write!(f, "failed to update news cache: {err:#}"),
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RefreshError::Fetch(err) => Some(err),
            RefreshError::Store(err) => Some(&**err),
        }
    }
}

impl From<FetchError> for RefreshError {
    fn from(err: FetchError) -> Self {
        RefreshError::Fetch(err)
    }
}

async fn fetch_records<P>(
    provider: &P,
    opts: &FetchOptions,
    ticker: &str,
) -> Result<(String, Vec<ArticleRecord>), FetchError>
where
    P: NewsProvider + ?Sized,
{
    let symbol = canonical_symbol(ticker)
        .ok_or_else(|| FetchError::new(ticker, FetchErrorKind::InvalidTicker))?;

    let raw = fetch_all(provider, &symbol, opts).await?;
    let records = normalize_batch(&raw, &symbol);
    tracing::debug!(%symbol, raw = raw.len(), records = records.len(), "ticker fetched");
    Ok((symbol, records))
}

/// Fetches, normalizes and caches the latest articles for one ticker.
/// Returns the records produced by this fetch. A cache write failure is
/// an error.
pub async fn refresh_ticker<P>(
    provider: &P,
    store: &CacheStore,
    opts: &FetchOptions,
    ticker: &str,
) -> Result<Vec<ArticleRecord>, RefreshError>
where
    P: NewsProvider + ?Sized,
{
    let (symbol, records) = fetch_records(provider, opts, ticker).await?;

    if !records.is_empty() {
        store
            .store(records.clone())
            .map_err(RefreshError::Store)?;
    }

    tracing::info!(%symbol, records = records.len(), "ticker refreshed");
    Ok(records)
}

/// On-demand variant of [`refresh_ticker`]: the fetched records are returned
/// even when they cannot be cached. The cache failure is logged at error
/// level.
pub async fn refresh_for_display<P>(
    provider: &P,
    store: &CacheStore,
    opts: &FetchOptions,
    ticker: &str,
) -> Result<Vec<ArticleRecord>, FetchError>
where
    P: NewsProvider + ?Sized,
{
    let (symbol, records) = fetch_records(provider, opts, ticker).await?;

    if !records.is_empty() {
        if let Err(err) = store.store(records.clone()) {
            tracing::error!(
                %symbol,
                path = %store.path().display(),
                error = %err,
                "failed to cache fetched articles; serving them uncached"
            );
        }
    }

    tracing::info!(%symbol, records = records.len(), "ticker refreshed for display");
    Ok(records)
}

#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    pub refreshed: Vec<(String, usize)>,
    pub failed: Vec<(String, String)>,
}

impl PreloadReport {
    pub fn is_complete_failure(&self) -> bool {
        self.refreshed.is_empty() && !self.failed.is_empty()
    }
}

/// Refreshes every ticker in order. A failing ticker is logged and skipped;
/// tickers already stored stay stored.
pub async fn preload<P>(
    provider: &P,
    store: &CacheStore,
    opts: &FetchOptions,
    tickers: &[String],
) -> PreloadReport
where
    P: NewsProvider + ?Sized,
{
    let mut report = PreloadReport::default();
    let total = tickers.len();

    for (idx, ticker) in tickers.iter().enumerate() {
        match refresh_ticker(provider, store, opts, ticker).await {
            Ok(records) => report.refreshed.push((ticker.clone(), records.len())),
            Err(err) => {
                tracing::warn!(idx, total, %ticker, error = %err, "preload failed; skipping ticker");
                report.failed.push((ticker.clone(), err.to_string()));
            }
        }
    }

    tracing::info!(
        total,
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "preload complete"
    );
    report
}

#[derive(Debug, Clone)]
pub enum InitOutcome {
    /// The cache already had rows; nothing was fetched.
    Cached { rows: usize },
    Preloaded(PreloadReport),
}

/// Start-up step: populate the cache unless it already has rows.
pub async fn initialize<P>(
    provider: &P,
    store: &CacheStore,
    opts: &FetchOptions,
    tickers: &[String],
    force: bool,
) -> anyhow::Result<InitOutcome>
where
    P: NewsProvider + ?Sized,
{
    let rows = store.load().len();
    if rows > 0 && !force {
        tracing::info!(path = %store.path().display(), rows, "cache present; skipping preload");
        return Ok(InitOutcome::Cached { rows });
    }

    let report = preload(provider, store, opts, tickers).await;
    if report.is_complete_failure() {
        let (ticker, err) = &report.failed[0];
        anyhow::bail!("preload failed for every ticker (first: {ticker}): {err}");
    }
    Ok(InitOutcome::Preloaded(report))
}

/// What the presentation layer renders for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerView {
    pub symbol: String,
    pub articles: Vec<ArticleView>,
    /// Absent when there is nothing to chart.
    pub distribution: Option<SentimentDistribution>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleView {
    #[serde(flatten)]
    pub record: ArticleRecord,
    pub published_date: String,
    pub sentiment: crate::domain::sentiment::SentimentLabel,
}

impl TickerView {
    pub fn build(symbol: &str, records: Vec<ArticleRecord>, filter: SentimentFilter) -> Self {
        let symbol = canonical_symbol(symbol).unwrap_or_default();

        if records.is_empty() {
            return Self {
                symbol,
                articles: Vec::new(),
                distribution: None,
                message: Some(NO_DATA_MESSAGE.to_string()),
            };
        }

        let shown: Vec<ArticleRecord> = records.into_iter().filter(|r| filter.admits(r)).collect();
        let distribution = aggregate(&shown);

        let articles = shown
            .into_iter()
            .map(|record| ArticleView {
                published_date: record.published_date().to_string(),
                sentiment: record.label(),
                record,
            })
            .collect();

        Self {
            symbol,
            articles,
            distribution: (!distribution.is_empty()).then_some(distribution),
            message: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.message.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sentiment::SentimentLabel;
    use crate::ingest::PageRequest;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// One page of canned articles per ticker; tickers listed in `failing`
    /// return HTTP 500.
    struct FakeProvider {
        pages: HashMap<String, Vec<Value>>,
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                failing: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_page(mut self, ticker: &str, articles: Vec<Value>) -> Self {
            self.pages.insert(ticker.to_string(), articles);
            self
        }

        fn failing(mut self, ticker: &str) -> Self {
            self.failing.push(ticker.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl NewsProvider for FakeProvider {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_page(&self, req: &PageRequest) -> Result<Vec<Value>, FetchError> {
            self.calls.lock().unwrap().push(req.ticker.clone());
            if self.failing.contains(&req.ticker) {
                return Err(FetchError::new(
                    &req.ticker,
                    FetchErrorKind::Status {
                        status: 500,
                        body: "upstream down".to_string(),
                    },
                ));
            }
            if req.page > 1 {
                return Ok(Vec::new());
            }
            Ok(self.pages.get(&req.ticker).cloned().unwrap_or_default())
        }
    }

    fn article(title: &str, symbol: &str, score: f64) -> Value {
        json!({
            "title": title,
            "url": format!("https://example.com/{title}"),
            "source": "example.com",
            "published_at": "2026-01-27T14:30:00.000000Z",
            "entities": [{"symbol": symbol, "sentiment_score": score}]
        })
    }

    fn opts() -> FetchOptions {
        FetchOptions {
            page_size: 10,
            max_articles: 50,
            lookback_hours: 24,
            page_delay: Duration::ZERO,
            filter_entities: false,
        }
    }

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn refresh_stores_only_matching_articles() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new().with_page(
            "TSLA",
            vec![
                article("t1", "TSLA", 0.3),
                article("a1", "AAPL", -0.5),
                article("t2", "tsla", -0.4),
            ],
        );

        let records = refresh_ticker(&provider, &store, &opts(), "tsla").await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.symbol == "TSLA"));
        assert_eq!(store.records_for("TSLA"), records);
    }

    #[tokio::test]
    async fn refresh_surfaces_fetch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new().failing("TSLA");

        let err = refresh_ticker(&provider, &store, &opts(), "TSLA").await.unwrap_err();

        assert!(matches!(err, RefreshError::Fetch(_)));
        assert!(err.to_string().contains("TSLA"));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn preload_skips_failures_and_keeps_earlier_tickers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new()
            .with_page("TSLA", vec![article("t1", "TSLA", 0.3)])
            .failing("AAPL")
            .with_page("NVDA", vec![article("n1", "NVDA", -0.3)]);

        let report = preload(&provider, &store, &opts(), &tickers(&["TSLA", "AAPL", "NVDA"])).await;

        assert_eq!(
            report.refreshed,
            vec![("TSLA".to_string(), 1), ("NVDA".to_string(), 1)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "AAPL");
        assert_eq!(store.symbols(), vec!["TSLA", "NVDA"]);
    }

    #[tokio::test]
    async fn initialize_skips_fetch_when_cache_has_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new().with_page("TSLA", vec![article("t1", "TSLA", 0.3)]);
        let list = tickers(&["TSLA"]);

        let first = initialize(&provider, &store, &opts(), &list, false).await.unwrap();
        assert!(matches!(first, InitOutcome::Preloaded(_)));
        let calls_after_first = provider.calls();

        let second = initialize(&provider, &store, &opts(), &list, false).await.unwrap();
        assert!(matches!(second, InitOutcome::Cached { rows: 1 }));
        assert_eq!(provider.calls(), calls_after_first);

        let forced = initialize(&provider, &store, &opts(), &list, true).await.unwrap();
        assert!(matches!(forced, InitOutcome::Preloaded(_)));
        assert!(provider.calls() > calls_after_first);
    }

    #[tokio::test]
    async fn initialize_errors_when_every_ticker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new().failing("TSLA").failing("AAPL");

        let err = initialize(&provider, &store, &opts(), &tickers(&["TSLA", "AAPL"]), false)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("every ticker"));
    }

    #[tokio::test]
    async fn display_refresh_returns_records_when_cache_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new().with_page("TSLA", vec![article("t1", "TSLA", 0.3)]);
        let _held = crate::storage::lock::try_acquire_cache_lock(store.path())
            .unwrap()
            .unwrap();

        let err = refresh_ticker(&provider, &store, &opts(), "TSLA").await.unwrap_err();
        assert!(matches!(err, RefreshError::Store(_)));

        let records = refresh_for_display(&provider, &store, &opts(), "TSLA")
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "t1");
        assert!(store.load().is_empty());
    }

    #[tokio::test]
    async fn display_refresh_caches_and_surfaces_fetch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("news.csv"));
        let provider = FakeProvider::new()
            .with_page("TSLA", vec![article("t1", "TSLA", 0.3)])
            .failing("AAPL");

        let records = refresh_for_display(&provider, &store, &opts(), "tsla")
            .await
            .unwrap();
        assert_eq!(store.records_for("TSLA"), records);

        let err = refresh_for_display(&provider, &store, &opts(), "AAPL")
            .await
            .unwrap_err();
        assert_eq!(err.ticker, "AAPL");
    }

    fn record(title: &str, score: Option<f64>) -> ArticleRecord {
        ArticleRecord {
            symbol: "TSLA".to_string(),
            title: title.to_string(),
            url: String::new(),
            source: "example.com".to_string(),
            published_at: "2026-01-27T14:30:00.000000Z".to_string(),
            sentiment_score: score,
        }
    }

    #[test]
    fn view_without_records_signals_no_data() {
        let view = TickerView::build("tsla", Vec::new(), SentimentFilter::All);

        assert_eq!(view.symbol, "TSLA");
        assert!(!view.has_data());
        assert_eq!(view.message.as_deref(), Some(NO_DATA_MESSAGE));
        assert!(view.distribution.is_none());
    }

    #[test]
    fn view_applies_filter_before_aggregating() {
        let records = vec![
            record("a", Some(0.4)),
            record("b", Some(-0.4)),
            record("c", Some(0.9)),
        ];

        let view = TickerView::build(
            "TSLA",
            records,
            SentimentFilter::Only(SentimentLabel::Positive),
        );

        assert_eq!(view.articles.len(), 2);
        assert!(view
            .articles
            .iter()
            .all(|a| a.sentiment == SentimentLabel::Positive));
        let dist = view.distribution.unwrap();
        assert_eq!(dist.positive, 2);
        assert_eq!(dist.total(), 2);
        assert_eq!(view.articles[0].published_date, "2026-01-27");
    }

    #[test]
    fn view_with_everything_filtered_out_has_no_chart() {
        let view = TickerView::build(
            "TSLA",
            vec![record("a", Some(0.4))],
            SentimentFilter::Only(SentimentLabel::Negative),
        );

        assert!(view.has_data());
        assert!(view.articles.is_empty());
        assert!(view.distribution.is_none());
    }
}
