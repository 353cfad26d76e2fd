pub mod article;
pub mod sentiment;
