//! Browser page abstraction
//!
//! Sessions never talk to a concrete browser. They drive a [`BrowserPage`],
//! where every method is exactly one interaction with the page and therefore
//! one suspension point, and obtain pages from a [`PageFactory`].
//!
//! - `chromium`: the production backend on top of `chromiumoxide`

mod chromium;

pub use chromium::{ChromiumBrowser, ChromiumPage};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static API_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)biohandel|haendl|dealer|search|plg").expect("static regex")
});

/// Errors raised by a browser backend
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("DevTools protocol error: {0}")]
    Cdp(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Timed out after {after:?} during {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("No element matches {0}")]
    ElementNotFound(String),

    #[error("Page is closed")]
    Closed,
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Which document an element lookup runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The top-level document
    Main,
    /// An embedded frame, by position among the page's frames
    Frame(usize),
}

/// Addresses the first element matching a CSS selector list, optionally
/// narrowed to elements whose visible text, value or aria-label contains
/// `text` (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub text: Option<String>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
        }
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: Some(text.into()),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} containing {:?}", self.css, text),
            None => f.write_str(&self.css),
        }
    }
}

/// A JSON payload the page received while talking to the retailer search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub url: String,
    pub json: serde_json::Value,
}

/// Whether a response looks like the retailer search answering with JSON
pub fn is_search_api(url: &str, content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("json") && API_URL_RE.is_match(url)
}

/// One isolated browser page
///
/// Implementations must not share page state with other pages. Methods that
/// look up an element return `Ok(false)` / `Ok(None)` when nothing matches;
/// errors are reserved for the backend itself failing.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigates to `url` and waits for the DOM to be ready
    async fn goto(&self, url: &str) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<String>;

    /// Waits until no network activity is observed; `Ok(false)` if the
    /// budget ran out first
    async fn wait_for_network_idle(&self, timeout: Duration) -> BrowserResult<bool>;

    /// Number of embedded frames in the page
    async fn frame_count(&self) -> BrowserResult<usize>;

    async fn exists(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool>;

    async fn is_visible(&self, locator: &Locator) -> BrowserResult<bool>;

    async fn scroll_into_view(&self, locator: &Locator) -> BrowserResult<()>;

    async fn focus(&self, locator: &Locator) -> BrowserResult<()>;

    /// Empties an input's value
    async fn clear(&self, locator: &Locator) -> BrowserResult<()>;

    /// Types `text` as individual key presses, pausing `per_char_delay`
    /// between characters
    async fn type_text(
        &self,
        locator: &Locator,
        text: &str,
        per_char_delay: Duration,
    ) -> BrowserResult<()>;

    /// Makes an input visible and enabled, sets its value and fires
    /// `input`, `change` and `keyup`; `Ok(false)` if no element matched
    async fn force_value(&self, locator: &Locator, value: &str) -> BrowserResult<bool>;

    /// Clicks the first match; `Ok(false)` if no element matched
    async fn click(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool>;

    /// Clicks the element at `index` among all main-document matches of
    /// `locator`; `Ok(false)` if there are not that many
    async fn click_nth(&self, locator: &Locator, index: usize) -> BrowserResult<bool>;

    /// Focuses the first match and presses `key` on it
    async fn press_key(&self, locator: &Locator, key: &str) -> BrowserResult<bool>;

    /// Visible option labels of the first matching `<select>`
    async fn option_labels(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>>;

    /// Selects the option at `index` of the first matching `<select>`
    async fn select_option(&self, locator: &Locator, index: usize) -> BrowserResult<bool>;

    /// Opens a scripted dropdown and returns its option labels
    async fn open_custom_dropdown(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>>;

    /// Submits the form enclosing the first match, or the page's first form
    async fn submit_form(&self, locator: &Locator) -> BrowserResult<bool>;

    /// Rendered text of the main document body
    async fn body_text(&self) -> BrowserResult<String>;

    async fn scroll_by(&self, dy: f64) -> BrowserResult<()>;

    async fn scroll_height(&self) -> BrowserResult<f64>;

    /// Serialized markup of the main document
    async fn content(&self) -> BrowserResult<String>;

    /// Markup of frame `index`, `None` when the frame's document is not
    /// reachable
    async fn frame_content(&self, index: usize) -> BrowserResult<Option<String>>;

    /// Most recent JSON response from a search-related endpoint seen by
    /// this page
    async fn last_api_response(&self) -> BrowserResult<Option<ApiResponse>>;

    /// Full-page PNG screenshot
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

/// Hands out fresh, isolated pages
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;
}
