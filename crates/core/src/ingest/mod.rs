pub mod error;
pub mod provider;
pub mod types;

pub use error::{FetchError, FetchErrorKind};
pub use provider::{fetch_all, FetchOptions, HttpNewsProvider, NewsProvider, PageRequest};
