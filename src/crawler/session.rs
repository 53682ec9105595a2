//! Per-postal-code interaction state machine
//!
//! A [`CrawlSession`] owns one browser page and walks it from the search form
//! to a loaded result view:
//!
//! `Init -> CookiesHandled -> ZipFilled -> RadiusSelected -> SearchTriggered
//! -> ResultsReady -> Extracted`
//!
//! Only a failed navigation or a postal-code input that no strategy can reach
//! ends the session early (`Failed`). Every other step is best effort and the
//! session moves on when it misses.

use crate::browser::{BrowserError, BrowserPage, Locator, Scope};
use crate::config::{Config, TimeoutConfig};
use crate::crawler::strategies::{
    fill_chain, radius_chain, run_chain, submit_chain, zip_input_locators, ZipEntry,
    ZIP_INPUT_SELECTORS,
};
use crate::extract::{extract_from_page, RetailerRecord};
use crate::postal::PostalCode;
use crate::state::CrawlState;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Consent controls tried in every document of the page
const COOKIE_BUTTON_LABELS: &[&str] = &[
    "Akzeptieren",
    "Einverstanden",
    "Zustimmen",
    "Alle akzeptieren",
];
const COOKIE_ARIA_SELECTOR: &str = r#"[aria-label*="akzeptieren" i]"#;

/// Containers whose presence means the result view has rendered
const RESULT_CONTAINER_SELECTORS: &[&str] = &[
    ".dealer, .dealer-item, .bh-dealer, .result, .entry, .store, [data-dealer]",
    ".list, .results, [data-results]",
];

static RESULTS_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Bio-?Händler|Ergebnisse|Treffer)").expect("valid results text regex")
});

const SETTLE_PAUSE: Duration = Duration::from_millis(500);
const SCROLL_STEP_PX: f64 = 1200.0;
const ATTACH_POLL: Duration = Duration::from_millis(100);

/// Why a session ended without extracting
#[derive(Debug, Error)]
pub enum SessionFailure {
    #[error("Navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error("Postal-code input unreachable by any strategy")]
    ZipInputUnreachable,

    #[error("Page became unavailable: {0}")]
    PageUnavailable(#[source] BrowserError),

    #[error("Session exceeded the handler timeout of {0:?}")]
    HandlerTimeout(Duration),
}

impl SessionFailure {
    /// True when the postal code could not be entered at all
    pub fn is_fill_failure(&self) -> bool {
        matches!(self, Self::ZipInputUnreachable)
    }
}

/// Everything a session needs from the configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub start_url: String,
    pub radius_km: u32,
    pub scroll_steps: u32,
    pub timeouts: TimeoutConfig,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_url: config.crawler.start_url.clone(),
            radius_km: config.crawler.radius_km,
            scroll_steps: config.crawler.scroll_steps,
            timeouts: config.timeouts.clone(),
        }
    }
}

/// Drives one page through the search for one postal code
pub struct CrawlSession {
    page: Box<dyn BrowserPage>,
    postal_code: PostalCode,
    settings: SessionSettings,
    state: CrawlState,
}

impl CrawlSession {
    pub fn new(
        page: Box<dyn BrowserPage>,
        postal_code: PostalCode,
        settings: SessionSettings,
    ) -> Self {
        Self {
            page,
            postal_code,
            settings,
            state: CrawlState::Init,
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn postal_code(&self) -> &PostalCode {
        &self.postal_code
    }

    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    /// Marks the session failed from outside, e.g. after a timeout
    pub fn abort(&mut self) {
        if self.state.can_transition_to(CrawlState::Failed) {
            self.advance(CrawlState::Failed);
        }
    }

    /// Runs the state machine to completion
    ///
    /// # Returns
    ///
    /// * `Ok(records)` - Session reached `Extracted`; may be empty
    /// * `Err(SessionFailure)` - Session ended in `Failed`
    pub async fn run(&mut self) -> Result<Vec<RetailerRecord>, SessionFailure> {
        let result = self.drive().await;
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Closes the page; the session cannot be used afterwards
    pub async fn close(self) {
        let code = self.postal_code;
        if let Err(e) = self.page.close().await {
            tracing::debug!("{}: closing page failed: {}", code, e);
        }
    }

    async fn drive(&mut self) -> Result<Vec<RetailerRecord>, SessionFailure> {
        // Open the search page
        let start_url = self.settings.start_url.clone();
        self.page
            .goto(&start_url)
            .await
            .map_err(|source| SessionFailure::Navigation {
                url: start_url.clone(),
                source,
            })?;
        self.wait_for_idle(self.settings.timeouts.network_idle()).await;
        tokio::time::sleep(SETTLE_PAUSE).await;

        self.accept_cookies().await;
        self.advance(CrawlState::CookiesHandled);

        let zip_input = self.fill_zip().await?;
        self.advance(CrawlState::ZipFilled);

        self.select_radius().await;
        self.advance(CrawlState::RadiusSelected);

        let url_before = self.page.current_url().await.unwrap_or_default();
        self.trigger_search(&zip_input).await;
        self.advance(CrawlState::SearchTriggered);

        self.wait_for_results(&url_before).await;
        self.advance(CrawlState::ResultsReady);

        self.scroll_to_bottom().await;
        let records = extract_from_page(self.page.as_ref())
            .await
            .map_err(SessionFailure::PageUnavailable)?;
        self.advance(CrawlState::Extracted);

        Ok(records)
    }

    fn advance(&mut self, to: CrawlState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {}",
            self.state,
            to
        );
        tracing::debug!("{}: {} -> {}", self.postal_code, self.state, to);
        self.state = to;
    }

    async fn wait_for_idle(&self, timeout: Duration) {
        match self.page.wait_for_network_idle(timeout).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                "{}: network not idle after {:?}",
                self.postal_code,
                timeout
            ),
            Err(e) => tracing::debug!("{}: network idle wait failed: {}", self.postal_code, e),
        }
    }

    /// Clicks every consent control that shows up, in the page and its frames
    async fn accept_cookies(&self) {
        let mut candidates: Vec<Locator> = COOKIE_BUTTON_LABELS
            .iter()
            .map(|label| Locator::with_text("button", *label))
            .collect();
        candidates.push(Locator::css(COOKIE_ARIA_SELECTOR));

        let frames = self.page.frame_count().await.unwrap_or(0);
        let scopes = std::iter::once(Scope::Main).chain((0..frames).map(Scope::Frame));

        for scope in scopes {
            for candidate in &candidates {
                let click = self.page.click(scope, candidate);
                match tokio::time::timeout(self.settings.timeouts.optional_click(), click).await {
                    Ok(Ok(true)) => {
                        tracing::debug!("{}: clicked consent control {}", self.postal_code, candidate)
                    }
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => {
                        tracing::debug!("{}: consent click failed: {}", self.postal_code, e)
                    }
                    Err(_) => tracing::debug!("{}: consent click timed out", self.postal_code),
                }
            }
        }
    }

    /// Waits for the highest-priority postal-code input to attach
    async fn locate_zip_input(&self) -> Option<Locator> {
        let locators = zip_input_locators();
        let deadline = tokio::time::Instant::now() + self.settings.timeouts.element_attach();

        loop {
            for locator in &locators {
                if let Ok(true) = self.page.exists(Scope::Main, locator).await {
                    return Some(locator.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(ATTACH_POLL).await;
        }
    }

    /// Enters the postal code; the only step whose failure ends the session
    async fn fill_zip(&self) -> Result<Locator, SessionFailure> {
        let located = self.locate_zip_input().await;
        if located.is_none() {
            tracing::debug!(
                "{}: no postal-code input attached within {:?}",
                self.postal_code,
                self.settings.timeouts.element_attach()
            );
        }

        let entry = ZipEntry {
            code: self.postal_code.to_string(),
            located,
            type_delay: self.settings.timeouts.type_delay(),
        };

        match run_chain(self.page.as_ref(), &fill_chain(), &entry).await {
            Some("type-into-field") => {}
            Some(strategy) => tracing::warn!(
                "{}: postal code entered via {} fallback",
                self.postal_code,
                strategy
            ),
            None => return Err(SessionFailure::ZipInputUnreachable),
        }

        Ok(entry
            .located
            .unwrap_or_else(|| Locator::css(ZIP_INPUT_SELECTORS[0])))
    }

    async fn select_radius(&self) {
        let radius = self.settings.radius_km;
        match run_chain(self.page.as_ref(), &radius_chain(), &radius).await {
            Some(strategy) => {
                tracing::debug!("{}: radius {} km set via {}", self.postal_code, radius, strategy)
            }
            None => tracing::debug!("{}: no radius control found", self.postal_code),
        }
    }

    /// Fires every search trigger; later ones run even if an earlier one
    /// already navigated
    async fn trigger_search(&self, zip_input: &Locator) {
        match self.page.press_key(zip_input, "Enter").await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("{}: input gone before Enter", self.postal_code),
            Err(e) => tracing::debug!("{}: Enter key press failed: {}", self.postal_code, e),
        }

        match run_chain(self.page.as_ref(), &submit_chain(), zip_input).await {
            Some(strategy) => {
                tracing::debug!("{}: search submitted via {}", self.postal_code, strategy)
            }
            None => tracing::debug!("{}: no submit control or form found", self.postal_code),
        }
    }

    /// Polls for a result view or a URL change
    ///
    /// Returns false when the budget ran out; the session continues anyway.
    async fn wait_for_results(&self, url_before: &str) -> bool {
        let timeouts = &self.settings.timeouts;
        self.wait_for_idle(timeouts.network_idle()).await;

        for attempt in 0..timeouts.result_poll_attempts {
            if self.results_visible().await {
                tracing::debug!("{}: results detected after {} polls", self.postal_code, attempt);
                return true;
            }
            if let Ok(url) = self.page.current_url().await {
                if url != url_before {
                    tracing::debug!("{}: URL changed to {}", self.postal_code, url);
                    return true;
                }
            }
            tokio::time::sleep(timeouts.result_poll_interval()).await;
        }

        tracing::warn!(
            "{}: no result view after {} polls, extracting anyway",
            self.postal_code,
            timeouts.result_poll_attempts
        );
        false
    }

    async fn results_visible(&self) -> bool {
        let signals = RESULT_CONTAINER_SELECTORS
            .iter()
            .map(|css| Locator::css(*css))
            .chain([Locator::with_text("a", "Details")]);

        for locator in signals {
            if let Ok(true) = self.page.exists(Scope::Main, &locator).await {
                return true;
            }
        }

        self.page
            .body_text()
            .await
            .map(|text| RESULTS_TEXT_RE.is_match(&text))
            .unwrap_or(false)
    }

    /// Scrolls until the page stops growing or the step budget is spent
    async fn scroll_to_bottom(&self) {
        for step in 0..self.settings.scroll_steps {
            let Ok(before) = self.page.scroll_height().await else {
                return;
            };
            if let Err(e) = self.page.scroll_by(SCROLL_STEP_PX).await {
                tracing::debug!("{}: scrolling failed: {}", self.postal_code, e);
                return;
            }
            tokio::time::sleep(self.settings.timeouts.scroll_pause()).await;
            let Ok(after) = self.page.scroll_height().await else {
                return;
            };
            if after <= before {
                tracing::trace!(
                    "{}: page stopped growing after {} steps",
                    self.postal_code,
                    step + 1
                );
                return;
            }
        }
    }
}
