pub mod cache;
pub mod lock;

pub use cache::{merge, CacheStore};
