//! Screenshot and markup capture for sessions that need a closer look
//!
//! Captures are keyed by postal code, except the latest search API payload,
//! which lives in one file that each session overwrites. A failed capture is
//! logged and never affects the session outcome.

use crate::browser::BrowserPage;
use crate::postal::PostalCode;
use std::path::PathBuf;

/// File holding the latest search API payload any page received
pub const LAST_API_FILE: &str = "last_api.json";

/// Writes diagnostic artifacts into one directory
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Screenshot and raw markup of a page that yielded no records
    pub async fn capture_empty(&self, page: &dyn BrowserPage, code: &PostalCode) {
        let stem = format!("debug_{}", code);

        match page.screenshot().await {
            Ok(png) => self.write(&format!("{}.png", stem), &png).await,
            Err(e) => tracing::debug!("{}: screenshot failed: {}", code, e),
        }
        match page.content().await {
            Ok(html) => self.write(&format!("{}.html", stem), html.as_bytes()).await,
            Err(e) => tracing::debug!("{}: reading page markup failed: {}", code, e),
        }
    }

    /// Screenshot of a page whose postal-code input could not be filled
    pub async fn capture_fill_error(&self, page: &dyn BrowserPage, code: &PostalCode) {
        match page.screenshot().await {
            Ok(png) => self.write(&format!("{}_fill_error.png", code), &png).await,
            Err(e) => tracing::debug!("{}: screenshot failed: {}", code, e),
        }
    }

    /// Persists the page's latest search API response, replacing any earlier
    /// one; does nothing when the page saw none
    pub async fn capture_api_response(&self, page: &dyn BrowserPage, code: &PostalCode) {
        let response = match page.last_api_response().await {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("{}: reading captured API response failed: {}", code, e);
                return;
            }
        };

        match serde_json::to_vec_pretty(&response) {
            Ok(bytes) => self.write(LAST_API_FILE, &bytes).await,
            Err(e) => tracing::debug!("{}: cannot serialize API response: {}", code, e),
        }
    }

    async fn write(&self, file_name: &str, bytes: &[u8]) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!("Cannot create diagnostics dir {}: {}", self.dir.display(), e);
            return;
        }

        let path = self.dir.join(file_name);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => tracing::info!("Wrote diagnostics to {}", path.display()),
            Err(e) => tracing::warn!("Failed to write {}: {}", path.display(), e),
        }
    }
}
