//! State module for tracking session progress
//!
//! - `CrawlState`: how far a postal-code session got through the search form

mod crawl_state;

pub use crawl_state::CrawlState;
