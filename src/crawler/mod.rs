//! Crawler module driving the retailer search
//!
//! This module contains the core crawling logic, including:
//! - The per-postal-code interaction state machine
//! - Ordered fallback strategies for the search form
//! - Diagnostic capture for empty or failed sessions and search API payloads
//! - Overall run coordination

mod coordinator;
mod diagnostics;
mod session;
mod strategies;

pub use coordinator::{Coordinator, RunReport, SessionReport};
pub use diagnostics::{Diagnostics, LAST_API_FILE};
pub use session::{CrawlSession, SessionFailure, SessionSettings};
pub use strategies::{
    choose_radius_index, fill_chain, radius_chain, run_chain, submit_chain, zip_input_locators,
    Chain, Strategy, ZipEntry, ZIP_INPUT_SELECTORS,
};

use crate::browser::{ChromiumBrowser, PageFactory};
use crate::config::Config;
use crate::ScoutError;
use std::sync::Arc;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Compute the postal-code list and open storage
/// 2. Load or create a crawl run
/// 3. Launch Chromium
/// 4. Run one session per postal code
/// 5. Shut the browser down
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, stored on the run
/// * `fresh` - Start a new run even if the last one was interrupted
///
/// # Returns
///
/// * `Ok(RunReport)` - Every postal code was processed
/// * `Err(ScoutError)` - Crawl could not start or storage failed
pub async fn crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
) -> Result<RunReport, ScoutError> {
    let browser = Arc::new(ChromiumBrowser::launch(&config.browser).await?);
    let pages: Arc<dyn PageFactory> = Arc::clone(&browser) as Arc<dyn PageFactory>;

    let result = match Coordinator::new(config, config_hash, pages, fresh) {
        Ok(coordinator) => coordinator.run().await,
        Err(e) => Err(e),
    };

    match Arc::try_unwrap(browser) {
        Ok(browser) => {
            if let Err(e) = browser.shutdown().await {
                tracing::warn!("Browser shutdown failed: {}", e);
            }
        }
        Err(_) => tracing::debug!("Browser still referenced, leaving it to drop"),
    }

    result
}
