//! Retailer extraction from loaded result pages
//!
//! - `parser`: markup heuristics turning listing containers into records
//! - `record`: the `RetailerRecord` output model

mod parser;
mod record;

pub use parser::{
    normalize_space, parse_address, parse_distance_km, parse_phone, parse_retailers, Address,
};
pub use record::RetailerRecord;

use crate::browser::{BrowserPage, BrowserResult};
use chrono::Utc;
use url::Url;

/// Extracts records from markup, stamping them with the current time
pub fn extract_records(html: &str, base_url: Option<&Url>) -> Vec<RetailerRecord> {
    parse_retailers(html, base_url, Utc::now())
}

/// Extracts records from a loaded page
///
/// The main document is tried first. When it yields nothing, every embedded
/// frame is parsed in order and the first frame with any records wins.
pub async fn extract_from_page(page: &dyn BrowserPage) -> BrowserResult<Vec<RetailerRecord>> {
    let base_url = Url::parse(&page.current_url().await?).ok();

    let html = page.content().await?;
    let records = extract_records(&html, base_url.as_ref());
    if !records.is_empty() {
        return Ok(records);
    }

    let frames = page.frame_count().await?;
    for index in 0..frames {
        let Some(frame_html) = page.frame_content(index).await? else {
            tracing::debug!("Frame {} not reachable, skipping", index);
            continue;
        };
        let records = extract_records(&frame_html, base_url.as_ref());
        if !records.is_empty() {
            tracing::debug!("Frame {} yielded {} records", index, records.len());
            return Ok(records);
        }
    }

    Ok(Vec::new())
}
