pub mod domain;
pub mod ingest;
pub mod pipeline;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    const DEFAULT_CACHE_PATH: &str = "data/news_cache.csv";
    const DEFAULT_PRELOAD_TICKERS: &str = "TSLA,AAPL,NVDA,MSFT,AMZN";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub news_api_base_url: Option<String>,
        pub news_api_token: Option<String>,
        pub sentry_dsn: Option<String>,
        pub cache_path: PathBuf,
        pub preload_tickers: Vec<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let cache_path = std::env::var("CACHE_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string());

            let preload_tickers = std::env::var("PRELOAD_TICKERS")
                .ok()
                .unwrap_or_else(|| DEFAULT_PRELOAD_TICKERS.to_string());

            Ok(Self {
                news_api_base_url: std::env::var("NEWS_API_BASE_URL").ok(),
                news_api_token: std::env::var("NEWS_API_TOKEN").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                cache_path: PathBuf::from(cache_path),
                preload_tickers: parse_ticker_list(&preload_tickers),
            })
        }

        pub fn require_news_api_base_url(&self) -> anyhow::Result<&str> {
            self.news_api_base_url
                .as_deref()
                .context("NEWS_API_BASE_URL is required")
        }

        pub fn require_news_api_token(&self) -> anyhow::Result<&str> {
            self.news_api_token
                .as_deref()
                .context("NEWS_API_TOKEN is required")
        }
    }

    /// Comma-separated ticker list, canonicalized and de-duplicated in input order.
    pub fn parse_ticker_list(raw: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for symbol in raw.split(',').filter_map(crate::domain::article::canonical_symbol) {
            if !out.contains(&symbol) {
                out.push(symbol);
            }
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ticker_list_is_uppercased_and_deduplicated() {
            let tickers = parse_ticker_list(" tsla, AAPL ,,nvda,TSLA");
            assert_eq!(tickers, vec!["TSLA", "AAPL", "NVDA"]);
        }

        #[test]
        fn empty_ticker_list_yields_nothing() {
            assert!(parse_ticker_list("").is_empty());
            assert!(parse_ticker_list(" , ").is_empty());
        }
    }
}
