//! Scripted in-memory browser used by the integration tests
//!
//! A [`ScriptedSite`] plays the retailer search: it serves a form document
//! until the search is submitted and a result document afterwards. Element
//! lookups run real CSS selectors against the current markup with `scraper`;
//! selectors it cannot parse simply match nothing.

use async_trait::async_trait;
use haendler_scout::browser::{
    ApiResponse, BrowserError, BrowserPage, BrowserResult, Locator, PageFactory, Scope,
};
use haendler_scout::config::{parse_config, Config};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const START_URL: &str = "https://www.bioladen.de/bio-haendler-suche";

pub const SEARCH_FORM: &str = r#"<html><body>
<div class="consent"><button type="button">Alle akzeptieren</button></div>
<h1>Bio-Händler in Ihrer Nähe</h1>
<form action="/bio-haendler-suche" method="get">
  <input type="text" name="tx_biohandel_plg[searchplz]" placeholder="PLZ">
  <select name="tx_biohandel_plg[distance]">
    <option>10 km</option>
    <option>25 km</option>
    <option>50 km</option>
  </select>
  <button type="submit">Händler finden</button>
</form>
</body></html>"#;

pub const FORM_WITHOUT_ZIP_INPUT: &str = r#"<html><body>
<p>Die Händlersuche ist vorübergehend nicht verfügbar.</p>
</body></html>"#;

/// Two listings around Hamburg, linked to their detail pages
pub const HAMBURG_RESULTS: &str = r#"<html><body>
<div class="results">
  <article class="dealer">
    <h3>Bioladen Nord</h3>
    <p class="address">Hauptstraße 1<br>20095 Hamburg</p>
    <span>(1,2 km)</span>
    <a href="tel:040 123456">Anrufen</a>
    <a href="/haendler/bioladen-nord">Details</a>
  </article>
  <article class="dealer">
    <h3>Naturkost am Markt</h3>
    <p class="address">Marktplatz 7<br>20097 Hamburg</p>
    <span>(3,5 km)</span>
    <a href="/haendler/naturkost-am-markt">Details</a>
  </article>
</div>
</body></html>"#;

/// One result card with a root-relative detail link
pub fn listing(name: &str, street: &str, zip_city: &str, detail_path: &str) -> String {
    format!(
        r#"<article class="dealer"><h3>{}</h3><p class="address">{}<br>{}</p><a href="{}">Details</a></article>"#,
        name, street, zip_city, detail_path
    )
}

pub fn results_page(listings: &[String]) -> String {
    format!(
        r#"<html><body><div class="results">{}</div></body></html>"#,
        listings.concat()
    )
}

/// Builds a validated configuration for an explicit list of postal codes
pub fn test_config(codes: &[&str], dir: &Path) -> Config {
    let codes = codes
        .iter()
        .map(|code| format!("\"{}\"", code))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
[crawler]
start-url = "{start}"
radius-km = 25
max-concurrency = 1
scroll-steps = 3

[postal-codes]
mode = "explicit"
codes = [{codes}]

[timeouts]
result-poll-attempts = 5

[output]
database-path = "{db}"
diagnostics-dir = "{diag}"
"#,
        start = START_URL,
        codes = codes,
        db = dir.join("retailers.db").display(),
        diag = dir.join("diagnostics").display(),
    );
    parse_config(&toml).expect("test config is valid")
}

/// What every page handed out by a [`ScriptedSite`] serves
#[derive(Debug, Clone)]
pub struct SiteScript {
    pub form: String,
    /// Form markup overriding `form` for specific page sequence numbers
    pub forms_by_page: HashMap<usize, String>,
    pub default_results: String,
    /// Result markup per entered postal code
    pub results_by_code: HashMap<String, String>,
    /// Frame documents of the result view; `None` is a frame whose document
    /// cannot be reached
    pub result_frames: Vec<Option<String>>,
    /// URL reported once the search was submitted
    pub results_url: Option<String>,
    /// Page sequence numbers whose form has no postal-code input
    pub broken_forms: HashSet<usize>,
    /// Page sequence numbers whose navigation never finishes
    pub stalled_pages: HashSet<usize>,
    /// Document height after n scroll steps; the last entry repeats
    pub page_heights: Vec<f64>,
    /// JSON the search endpoint answers with once the form is submitted
    pub api_response: Option<ApiResponse>,
}

impl Default for SiteScript {
    fn default() -> Self {
        Self {
            form: SEARCH_FORM.to_string(),
            forms_by_page: HashMap::new(),
            default_results: HAMBURG_RESULTS.to_string(),
            results_by_code: HashMap::new(),
            result_frames: Vec::new(),
            results_url: None,
            broken_forms: HashSet::new(),
            stalled_pages: HashSet::new(),
            page_heights: vec![2400.0],
            api_response: None,
        }
    }
}

/// Observations shared by every page of one site
#[derive(Debug, Default)]
pub struct SiteLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    /// Postal codes as they were present in the input on submit
    pub submitted_codes: Mutex<Vec<String>>,
    /// Selected radius option index per page
    pub radius_choices: Mutex<Vec<usize>>,
    pub consent_clicks: AtomicUsize,
    /// Values set by script instead of typed
    pub forced_values: Mutex<Vec<String>>,
    pub body_text_reads: AtomicUsize,
    pub scrolls: AtomicUsize,
}

/// Fake browser handing out one scripted page per session
pub struct ScriptedSite {
    script: Arc<SiteScript>,
    pub log: Arc<SiteLog>,
}

impl ScriptedSite {
    pub fn new(script: SiteScript) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(SiteLog::default()),
        }
    }
}

#[async_trait]
impl PageFactory for ScriptedSite {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let sequence = self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            sequence,
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            state: Mutex::new(PageProgress::default()),
        }))
    }
}

#[derive(Debug, Default)]
struct PageProgress {
    url: String,
    zip_value: String,
    submitted: bool,
    scrolls: usize,
}

struct ScriptedPage {
    sequence: usize,
    script: Arc<SiteScript>,
    log: Arc<SiteLog>,
    state: Mutex<PageProgress>,
}

impl ScriptedPage {
    fn state(&self) -> std::sync::MutexGuard<'_, PageProgress> {
        self.state.lock().expect("page state lock")
    }

    fn main_document(&self) -> String {
        let state = self.state();
        if state.submitted {
            self.script
                .results_by_code
                .get(&state.zip_value)
                .unwrap_or(&self.script.default_results)
                .clone()
        } else if self.script.broken_forms.contains(&self.sequence) {
            FORM_WITHOUT_ZIP_INPUT.to_string()
        } else {
            self.script
                .forms_by_page
                .get(&self.sequence)
                .unwrap_or(&self.script.form)
                .clone()
        }
    }

    fn document(&self, scope: Scope) -> Option<String> {
        match scope {
            Scope::Main => Some(self.main_document()),
            Scope::Frame(index) => self.frames().get(index).cloned().flatten(),
        }
    }

    fn frames(&self) -> Vec<Option<String>> {
        if self.state().submitted {
            self.script.result_frames.clone()
        } else {
            Vec::new()
        }
    }

    fn matches(&self, scope: Scope, locator: &Locator) -> bool {
        self.document(scope)
            .map(|html| !find_all(&html, locator).is_empty())
            .unwrap_or(false)
    }

    fn submit(&self) {
        let mut state = self.state();
        if state.submitted {
            return;
        }
        state.submitted = true;
        self.log
            .submitted_codes
            .lock()
            .expect("log lock")
            .push(state.zip_value.clone());
        if let Some(url) = &self.script.results_url {
            state.url = url.clone();
        }
    }
}

/// Descriptions of every element matching a locator, in document order
fn find_all(html: &str, locator: &Locator) -> Vec<Found> {
    let Ok(selector) = Selector::parse(&locator.css) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let option = Selector::parse("option, [role=\"option\"]").expect("valid option selector");

    document
        .select(&selector)
        .filter(|el| match &locator.text {
            Some(text) => element_label(*el).to_lowercase().contains(&text.to_lowercase()),
            None => true,
        })
        .map(|el| Found {
            tag: el.value().name().to_string(),
            hidden: el.value().attr("hidden").is_some()
                || el.value().attr("type") == Some("hidden"),
            options: el
                .select(&option)
                .map(|o| o.text().collect::<String>().trim().to_string())
                .collect(),
        })
        .collect()
}

fn element_label(el: ElementRef<'_>) -> String {
    let mut label = el.text().collect::<Vec<_>>().join(" ");
    for attr in ["value", "aria-label"] {
        if let Some(value) = el.value().attr(attr) {
            label.push(' ');
            label.push_str(value);
        }
    }
    label
}

fn body_text(html: &str) -> String {
    Html::parse_document(html)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

struct Found {
    tag: String,
    hidden: bool,
    options: Vec<String>,
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        if self.script.stalled_pages.contains(&self.sequence) {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }
        self.state().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.state().url.clone())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn frame_count(&self) -> BrowserResult<usize> {
        Ok(self.frames().len())
    }

    async fn exists(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool> {
        Ok(self.matches(scope, locator))
    }

    async fn is_visible(&self, locator: &Locator) -> BrowserResult<bool> {
        let html = self.main_document();
        Ok(find_all(&html, locator).first().is_some_and(|f| !f.hidden))
    }

    async fn scroll_into_view(&self, locator: &Locator) -> BrowserResult<()> {
        if self.matches(Scope::Main, locator) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn focus(&self, _locator: &Locator) -> BrowserResult<()> {
        Ok(())
    }

    async fn clear(&self, _locator: &Locator) -> BrowserResult<()> {
        self.state().zip_value.clear();
        Ok(())
    }

    async fn type_text(
        &self,
        locator: &Locator,
        text: &str,
        per_char_delay: Duration,
    ) -> BrowserResult<()> {
        if !self.matches(Scope::Main, locator) {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        for c in text.chars() {
            self.state().zip_value.push(c);
            tokio::time::sleep(per_char_delay).await;
        }
        Ok(())
    }

    async fn force_value(&self, locator: &Locator, value: &str) -> BrowserResult<bool> {
        if !self.matches(Scope::Main, locator) {
            return Ok(false);
        }
        self.state().zip_value = value.to_string();
        self.log
            .forced_values
            .lock()
            .expect("log lock")
            .push(value.to_string());
        Ok(true)
    }

    async fn click(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool> {
        let Some(html) = self.document(scope) else {
            return Ok(false);
        };
        let Some(found) = find_all(&html, locator).into_iter().next() else {
            return Ok(false);
        };

        let is_consent = locator
            .text
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains("akzept") || t == "Zustimmen");
        if is_consent {
            self.log.consent_clicks.fetch_add(1, Ordering::SeqCst);
        } else if found.tag == "button" {
            self.submit();
        }
        Ok(true)
    }

    async fn click_nth(&self, locator: &Locator, index: usize) -> BrowserResult<bool> {
        let html = self.main_document();
        if find_all(&html, locator).len() <= index {
            return Ok(false);
        }
        self.log
            .radius_choices
            .lock()
            .expect("log lock")
            .push(index);
        Ok(true)
    }

    async fn press_key(&self, locator: &Locator, _key: &str) -> BrowserResult<bool> {
        Ok(self.matches(Scope::Main, locator))
    }

    async fn option_labels(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>> {
        let html = self.main_document();
        Ok(find_all(&html, locator)
            .into_iter()
            .find(|f| f.tag == "select")
            .map(|f| f.options))
    }

    async fn select_option(&self, locator: &Locator, index: usize) -> BrowserResult<bool> {
        if !self.matches(Scope::Main, locator) {
            return Ok(false);
        }
        self.log
            .radius_choices
            .lock()
            .expect("log lock")
            .push(index);
        Ok(true)
    }

    async fn open_custom_dropdown(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>> {
        let html = self.main_document();
        Ok(find_all(&html, locator).into_iter().next().map(|f| f.options))
    }

    async fn submit_form(&self, locator: &Locator) -> BrowserResult<bool> {
        if !self.matches(Scope::Main, locator) {
            return Ok(false);
        }
        self.submit();
        Ok(true)
    }

    async fn body_text(&self) -> BrowserResult<String> {
        self.log.body_text_reads.fetch_add(1, Ordering::SeqCst);
        Ok(body_text(&self.main_document()))
    }

    async fn scroll_by(&self, _dy: f64) -> BrowserResult<()> {
        self.state().scrolls += 1;
        self.log.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scroll_height(&self) -> BrowserResult<f64> {
        let heights = &self.script.page_heights;
        let step = self.state().scrolls.min(heights.len().saturating_sub(1));
        Ok(heights.get(step).copied().unwrap_or(0.0))
    }

    async fn content(&self) -> BrowserResult<String> {
        Ok(self.main_document())
    }

    async fn frame_content(&self, index: usize) -> BrowserResult<Option<String>> {
        Ok(self.frames().get(index).cloned().flatten())
    }

    async fn last_api_response(&self) -> BrowserResult<Option<ApiResponse>> {
        if self.state().submitted {
            Ok(self.script.api_response.clone())
        } else {
            Ok(None)
        }
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
