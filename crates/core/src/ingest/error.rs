use std::fmt;

/// A failed news fetch for one ticker.
#[derive(Debug)]
pub struct FetchError {
    pub ticker: String,
    pub kind: FetchErrorKind,
}

#[derive(Debug)]
pub enum FetchErrorKind {
    InvalidTicker,
    Request(reqwest::Error),
    Status { status: u16, body: String },
    Decode(serde_json::Error),
}

impl FetchError {
    pub fn new(ticker: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            ticker: ticker.into(),
            kind,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            FetchErrorKind::Request(_) => true,
            FetchErrorKind::Status { status, .. } => *status == 429 || *status >= 500,
            FetchErrorKind::InvalidTicker | FetchErrorKind::Decode(_) => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FetchErrorKind::InvalidTicker => {
                write!(f, "invalid ticker: {:?}", self.ticker)
            }
            FetchErrorKind::Request(err) => {
                write!(f, "news request failed (ticker={}): {err}", self.ticker)
            }
            FetchErrorKind::Status { status, body } => {
                write!(f, "news API HTTP {status} (ticker={}): {body}", self.ticker)
            }
            FetchErrorKind::Decode(err) => {
                write!(f, "news response is not valid (ticker={}): {err}", self.ticker)
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FetchErrorKind::Request(err) => Some(err),
            FetchErrorKind::Decode(err) => Some(err),
            FetchErrorKind::InvalidTicker | FetchErrorKind::Status { .. } => None,
        }
    }
}
