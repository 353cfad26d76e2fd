use crate::domain::sentiment::{classify, SentimentLabel};
use crate::ingest::types::RawArticle;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub symbol: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: String,
    pub sentiment_score: Option<f64>,
}

impl ArticleRecord {
    pub fn label(&self) -> SentimentLabel {
        classify(self.sentiment_score)
    }

    /// `YYYY-MM-DD` prefix of the publish timestamp, for display.
    pub fn published_date(&self) -> &str {
        self.published_at
            .get(..10)
            .unwrap_or(self.published_at.as_str())
    }

    pub fn dedup_key(&self) -> (&str, &str) {
        (self.title.as_str(), self.published_at.as_str())
    }
}

/// Trimmed uppercase form of a user-supplied ticker; `None` if blank.
pub fn canonical_symbol(input: &str) -> Option<String> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_uppercase())
}

/// Builds a record from a raw article using the first entity whose symbol
/// matches `target_symbol` case-insensitively. Articles that do not mention
/// the target yield nothing.
pub fn normalize(raw: &RawArticle, target_symbol: &str) -> Option<ArticleRecord> {
    let symbol = canonical_symbol(target_symbol)?;

    let entity = raw.entities.as_deref()?.iter().find(|e| {
        e.symbol
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case(&symbol))
    })?;

    Some(ArticleRecord {
        symbol,
        title: raw.title.clone().unwrap_or_default(),
        url: raw.url.clone().unwrap_or_default(),
        source: raw.source.clone().unwrap_or_default(),
        published_at: raw.published_at.clone().unwrap_or_default(),
        sentiment_score: entity.sentiment_score,
    })
}

/// Normalizes a page of raw payloads. Only items that are not JSON objects
/// are skipped; bad fields inside an article read as absent.
pub fn normalize_batch(raw_articles: &[Value], target_symbol: &str) -> Vec<ArticleRecord> {
    let mut out = Vec::with_capacity(raw_articles.len());
    let mut malformed: usize = 0;

    for (idx, value) in raw_articles.iter().enumerate() {
        if !value.is_object() {
            malformed += 1;
            tracing::warn!(idx, symbol = %target_symbol, "skipping article that is not an object");
            continue;
        }

        match serde_json::from_value::<RawArticle>(value.clone()) {
            Ok(raw) => {
                if let Some(record) = normalize(&raw, target_symbol) {
                    out.push(record);
                }
            }
            Err(err) => {
                malformed += 1;
                tracing::warn!(idx, symbol = %target_symbol, error = %err, "skipping malformed article");
            }
        }
    }

    tracing::debug!(
        symbol = %target_symbol,
        raw = raw_articles.len(),
        normalized = out.len(),
        malformed,
        "normalized articles"
    );

    out
}
