use crate::domain::article::ArticleRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const POSITIVE_THRESHOLD: f64 = 0.15;
pub const NEGATIVE_THRESHOLD: f64 = -0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score cut-offs. Both bounds are exclusive: a score sitting exactly on a
/// threshold is neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub positive: f64,
    pub negative: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            positive: POSITIVE_THRESHOLD,
            negative: NEGATIVE_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, score: Option<f64>) -> SentimentLabel {
        let score = score.unwrap_or(0.0);
        if score > self.positive {
            SentimentLabel::Positive
        } else if score < self.negative {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

/// Classify with the default thresholds. A missing score counts as 0.
pub fn classify(score: Option<f64>) -> SentimentLabel {
    Thresholds::default().classify(score)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

impl SentimentDistribution {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::Negative => self.negative += 1,
        }
    }

    pub fn count(&self, label: SentimentLabel) -> usize {
        match label {
            SentimentLabel::Positive => self.positive,
            SentimentLabel::Neutral => self.neutral,
            SentimentLabel::Negative => self.negative,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.neutral + self.negative
    }

    /// Zero total means there is nothing to chart.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub fn aggregate<'a, I>(records: I) -> SentimentDistribution
where
    I: IntoIterator<Item = &'a ArticleRecord>,
{
    aggregate_with(records, &Thresholds::default())
}

pub fn aggregate_with<'a, I>(records: I, thresholds: &Thresholds) -> SentimentDistribution
where
    I: IntoIterator<Item = &'a ArticleRecord>,
{
    let mut out = SentimentDistribution::default();
    for record in records {
        out.record(thresholds.classify(record.sentiment_score));
    }
    out
}

/// Label selector used by the presentation layer ("All" admits everything).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SentimentFilter {
    #[default]
    All,
    Only(SentimentLabel),
}

impl SentimentFilter {
    pub fn admits(&self, record: &ArticleRecord) -> bool {
        match self {
            SentimentFilter::All => true,
            SentimentFilter::Only(label) => record.label() == *label,
        }
    }
}

impl FromStr for SentimentFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(SentimentFilter::All),
            "positive" => Ok(SentimentFilter::Only(SentimentLabel::Positive)),
            "neutral" => Ok(SentimentFilter::Only(SentimentLabel::Neutral)),
            "negative" => Ok(SentimentFilter::Only(SentimentLabel::Negative)),
            other => anyhow::bail!("unknown sentiment filter: {other}"),
        }
    }
}
