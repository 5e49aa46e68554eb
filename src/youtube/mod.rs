//! YouTube Data API search client and record normalization.

pub mod client;
pub mod models;
pub mod normalize;

pub use client::{VideoSource, YoutubeSearchClient, MAX_RESULTS_LIMIT};
pub use models::RawResult;
pub use normalize::normalize;
