//! Chromium backend driven over the DevTools protocol
//!
//! Element lookups run as page scripts so that a [`Locator`]'s text filter
//! behaves identically for every operation. Frame scopes are evaluated in the
//! frame's own execution context, so cross-origin frames are reachable as
//! long as Chromium keeps them in-process (see [`LAUNCH_ARGS`]). Typing and
//! key presses go through real CDP input events on a temporarily tagged
//! element.

use super::{
    is_search_api, ApiResponse, BrowserError, BrowserPage, BrowserResult, Locator, PageFactory,
    Scope,
};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Chromium flags applied to every launch
///
/// Site isolation moves cross-origin frames into separate renderer processes
/// whose execution contexts the page session never sees.
const LAUNCH_ARGS: [&str; 2] = [
    "--disable-dev-shm-usage",
    "--disable-features=IsolateOrigins,site-per-process",
];

/// Helpers available to every page script
///
/// `__find` returns the first element matching a selector list and optional
/// text needle, or `null` when `root` is missing.
const PRELUDE: &str = r#"
const __find = (root, css, text) => {
  if (!root) return null;
  const needle = text === null ? null : text.toLowerCase();
  for (const el of root.querySelectorAll(css)) {
    if (needle === null) return el;
    const hay = [el.innerText || el.textContent || '', el.value || '', el.getAttribute('aria-label') || '']
      .join(' ')
      .toLowerCase();
    if (hay.includes(needle)) return el;
  }
  return null;
};
"#;

const TARGET_ATTR: &str = "data-scout-target";

static NEXT_TARGET: AtomicU64 = AtomicU64::new(0);

fn cdp(err: CdpError) -> BrowserError {
    BrowserError::Cdp(err.to_string())
}

/// Embedded frames in document order, without the page's own frame
fn child_frames(main: Option<&FrameId>, frames: Vec<FrameId>) -> Vec<FrameId> {
    frames
        .into_iter()
        .filter(|frame| Some(frame) != main)
        .collect()
}

/// Decides when the page has gone quiet
///
/// A sample is the document ready state plus the number of resource entries
/// seen so far. The page is idle once a complete document has kept the same
/// count for `quiet`. A missing sample (the probe script failed, typically
/// mid-navigation) counts as activity.
#[derive(Debug)]
struct IdleTracker {
    quiet: Duration,
    last_count: Option<u64>,
    quiet_since: Instant,
}

impl IdleTracker {
    fn new(quiet: Duration, now: Instant) -> Self {
        Self {
            quiet,
            last_count: None,
            quiet_since: now,
        }
    }

    fn observe(&mut self, sample: Option<(&str, u64)>, now: Instant) -> bool {
        match sample {
            Some((ready_state, count))
                if ready_state == "complete" && self.last_count == Some(count) =>
            {
                now.duration_since(self.quiet_since) >= self.quiet
            }
            Some((_, count)) => {
                self.last_count = Some(count);
                self.quiet_since = now;
                false
            }
            None => {
                self.last_count = None;
                self.quiet_since = now;
                false
            }
        }
    }
}

/// Keeps the latest search API response the page receives
async fn sniff_api_responses(
    page: &Page,
    latest: Arc<Mutex<Option<ApiResponse>>>,
) -> BrowserResult<JoinHandle<()>> {
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(cdp)?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let url = &event.response.url;
            if !is_search_api(url, &event.response.mime_type) {
                continue;
            }

            let body = match page
                .execute(GetResponseBodyParams::new(event.request_id.clone()))
                .await
            {
                Ok(body) => body.result.clone(),
                Err(e) => {
                    tracing::trace!("Response body of {} unavailable: {}", url, e);
                    continue;
                }
            };
            if body.base64_encoded {
                tracing::trace!("Skipping base64 encoded response from {}", url);
                continue;
            }

            match serde_json::from_str(&body.body) {
                Ok(json) => {
                    tracing::debug!("Captured API response from {}", url);
                    if let Ok(mut slot) = latest.lock() {
                        *slot = Some(ApiResponse {
                            url: url.clone(),
                            json,
                        });
                    }
                }
                Err(e) => tracing::trace!("Response from {} is not JSON: {}", url, e),
            }
        }
    }))
}

/// A launched Chromium instance handing out pages
pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumBrowser {
    /// Launches Chromium and starts driving its event stream
    pub async fn launch(config: &BrowserConfig) -> BrowserResult<Self> {
        let mut builder = chromiumoxide::BrowserConfig::builder()
            .args(LAUNCH_ARGS)
            .request_timeout(Duration::from_secs(config.navigation_timeout_secs));
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let cdp_config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("CDP handler event error: {}", e);
                }
            }
        });

        tracing::info!(
            "Launched Chromium (headless: {}, navigation timeout: {}s)",
            config.headless,
            config.navigation_timeout_secs
        );

        Ok(Self {
            browser,
            handler,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })
    }

    /// Closes the browser and stops the event loop
    pub async fn shutdown(mut self) -> BrowserResult<()> {
        self.browser.close().await.map_err(cdp)?;
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl PageFactory for ChromiumBrowser {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let page = self.browser.new_page("about:blank").await.map_err(cdp)?;
        let api_response = Arc::new(Mutex::new(None));
        let sniffer = sniff_api_responses(&page, Arc::clone(&api_response)).await?;
        Ok(Box::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
            api_response,
            sniffer,
        }))
    }
}

/// One Chromium tab
pub struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
    api_response: Arc<Mutex<Option<ApiResponse>>>,
    sniffer: JoinHandle<()>,
}

impl ChromiumPage {
    /// Runs `body` with the prelude in scope and decodes its return value
    async fn eval<T: DeserializeOwned>(&self, body: &str) -> BrowserResult<T> {
        self.eval_in(None, body).await
    }

    /// Like [`Self::eval`], inside a specific execution context when given
    async fn eval_in<T: DeserializeOwned>(
        &self,
        context: Option<ExecutionContextId>,
        body: &str,
    ) -> BrowserResult<T> {
        let script = format!("JSON.stringify((() => {{ {PRELUDE} {body} }})() ?? null)");
        let mut params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true);
        if let Some(context) = context {
            params = params.context_id(context);
        }
        let params = params.build().map_err(BrowserError::Script)?;

        let raw: String = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn child_frames(&self) -> BrowserResult<Vec<FrameId>> {
        let main = self.page.mainframe().await.map_err(cdp)?;
        let frames = self.page.frames().await.map_err(cdp)?;
        Ok(child_frames(main.as_ref(), frames))
    }

    /// Execution context of embedded frame `index`, `None` when the frame is
    /// gone or has no document yet
    async fn frame_context(&self, index: usize) -> BrowserResult<Option<ExecutionContextId>> {
        let Some(frame) = self.child_frames().await?.into_iter().nth(index) else {
            return Ok(None);
        };
        self.page.frame_execution_context(frame).await.map_err(cdp)
    }

    /// Runs `body` with `el` bound to the located element, or `null`
    async fn eval_on<T: DeserializeOwned>(
        &self,
        scope: Scope,
        locator: &Locator,
        body: &str,
    ) -> BrowserResult<T> {
        let (context, root) = match scope {
            Scope::Main => (None, "document"),
            Scope::Frame(index) => match self.frame_context(index).await? {
                Some(context) => (Some(context), "document"),
                None => (None, "null"),
            },
        };
        let script = format!(
            "const el = __find({}, {}, {}); {}",
            root,
            json!(locator.css),
            json!(locator.text),
            body
        );
        self.eval_in(context, &script).await
    }

    /// Tags the located main-document element and resolves it over CDP
    async fn tagged_element(&self, locator: &Locator) -> BrowserResult<Option<Element>> {
        let token = NEXT_TARGET.fetch_add(1, Ordering::Relaxed).to_string();
        let body = format!(
            "if (!el) return false; el.setAttribute('{TARGET_ATTR}', {}); return true;",
            json!(token)
        );
        let found: bool = self.eval_on(Scope::Main, locator, &body).await?;
        if !found {
            return Ok(None);
        }

        let element = self
            .page
            .find_element(format!("[{TARGET_ATTR}=\"{token}\"]"))
            .await
            .map_err(cdp)?;
        Ok(Some(element))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(result) => result.map(|_| ()).map_err(cdp),
            Err(_) => Err(BrowserError::Timeout {
                operation: "navigation",
                after: self.navigation_timeout,
            }),
        }
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await.map_err(cdp)?.unwrap_or_default())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> BrowserResult<bool> {
        const QUIET: Duration = Duration::from_millis(500);
        const TICK: Duration = Duration::from_millis(250);

        let deadline = Instant::now() + timeout;
        let mut tracker = IdleTracker::new(QUIET, Instant::now());

        loop {
            let sample: BrowserResult<(String, u64)> = self
                .eval("return [document.readyState, performance.getEntriesByType('resource').length];")
                .await;
            if let Err(e) = &sample {
                tracing::trace!("Idle check failed, treating page as busy: {}", e);
            }

            let now = Instant::now();
            let sample = sample.ok();
            if tracker.observe(sample.as_ref().map(|(state, count)| (state.as_str(), *count)), now) {
                return Ok(true);
            }

            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(TICK).await;
        }
    }

    async fn frame_count(&self) -> BrowserResult<usize> {
        Ok(self.child_frames().await?.len())
    }

    async fn exists(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool> {
        self.eval_on(scope, locator, "return el !== null;").await
    }

    async fn is_visible(&self, locator: &Locator) -> BrowserResult<bool> {
        self.eval_on(
            Scope::Main,
            locator,
            r#"
            if (!el) return false;
            const style = window.getComputedStyle(el);
            const rect = el.getBoundingClientRect();
            return style.visibility !== 'hidden' && style.display !== 'none'
              && rect.width > 0 && rect.height > 0;
            "#,
        )
        .await
    }

    async fn scroll_into_view(&self, locator: &Locator) -> BrowserResult<()> {
        let found: bool = self
            .eval_on(
                Scope::Main,
                locator,
                "if (!el) return false; el.scrollIntoView({block: 'center'}); return true;",
            )
            .await?;
        found
            .then_some(())
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn focus(&self, locator: &Locator) -> BrowserResult<()> {
        let found: bool = self
            .eval_on(Scope::Main, locator, "if (!el) return false; el.focus(); return true;")
            .await?;
        found
            .then_some(())
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn clear(&self, locator: &Locator) -> BrowserResult<()> {
        let found: bool = self
            .eval_on(
                Scope::Main,
                locator,
                r#"
                if (!el) return false;
                el.value = '';
                el.dispatchEvent(new Event('input', {bubbles: true}));
                return true;
                "#,
            )
            .await?;
        found
            .then_some(())
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn type_text(
        &self,
        locator: &Locator,
        text: &str,
        per_char_delay: Duration,
    ) -> BrowserResult<()> {
        let element = self
            .tagged_element(locator)
            .await?
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
        element.focus().await.map_err(cdp)?;

        for ch in text.chars() {
            element.type_str(ch.to_string()).await.map_err(cdp)?;
            tokio::time::sleep(per_char_delay).await;
        }
        Ok(())
    }

    async fn force_value(&self, locator: &Locator, value: &str) -> BrowserResult<bool> {
        let body = format!(
            r#"
            if (!el) return false;
            el.style.display = 'block';
            el.style.visibility = 'visible';
            el.removeAttribute('hidden');
            el.removeAttribute('disabled');
            el.removeAttribute('readonly');
            el.value = {};
            for (const type of ['input', 'change', 'keyup']) {{
              el.dispatchEvent(new Event(type, {{bubbles: true}}));
            }}
            return true;
            "#,
            json!(value)
        );
        self.eval_on(Scope::Main, locator, &body).await
    }

    async fn click(&self, scope: Scope, locator: &Locator) -> BrowserResult<bool> {
        self.eval_on(scope, locator, "if (!el) return false; el.click(); return true;")
            .await
    }

    async fn click_nth(&self, locator: &Locator, index: usize) -> BrowserResult<bool> {
        let body = format!(
            r#"
            const el = document.querySelectorAll({})[{index}];
            if (!el) return false;
            el.click();
            return true;
            "#,
            json!(locator.css)
        );
        self.eval(&body).await
    }

    async fn press_key(&self, locator: &Locator, key: &str) -> BrowserResult<bool> {
        let Some(element) = self.tagged_element(locator).await? else {
            return Ok(false);
        };
        element.focus().await.map_err(cdp)?;
        element.press_key(key).await.map_err(cdp)?;
        Ok(true)
    }

    async fn option_labels(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>> {
        self.eval_on(
            Scope::Main,
            locator,
            r#"
            if (!el || !el.options) return null;
            return Array.from(el.options).map(o => (o.label || o.textContent || '').trim());
            "#,
        )
        .await
    }

    async fn select_option(&self, locator: &Locator, index: usize) -> BrowserResult<bool> {
        let body = format!(
            r#"
            if (!el || !el.options || el.options.length <= {index}) return false;
            el.selectedIndex = {index};
            el.dispatchEvent(new Event('input', {{bubbles: true}}));
            el.dispatchEvent(new Event('change', {{bubbles: true}}));
            return true;
            "#
        );
        self.eval_on(Scope::Main, locator, &body).await
    }

    async fn open_custom_dropdown(&self, locator: &Locator) -> BrowserResult<Option<Vec<String>>> {
        self.eval_on(
            Scope::Main,
            locator,
            r#"
            if (!el) return null;
            el.click();
            const options = document.querySelectorAll('[role="option"]');
            return Array.from(options).map(o => (o.innerText || o.textContent || '').trim());
            "#,
        )
        .await
    }

    async fn submit_form(&self, locator: &Locator) -> BrowserResult<bool> {
        self.eval_on(
            Scope::Main,
            locator,
            r#"
            const form = (el && el.closest('form')) || document.querySelector('form');
            if (!form) return false;
            if (typeof form.requestSubmit === 'function') form.requestSubmit();
            else form.submit();
            return true;
            "#,
        )
        .await
    }

    async fn body_text(&self) -> BrowserResult<String> {
        self.eval("return document.body ? document.body.innerText : '';")
            .await
    }

    async fn scroll_by(&self, dy: f64) -> BrowserResult<()> {
        let _: bool = self
            .eval(&format!("window.scrollBy(0, {dy}); return true;"))
            .await?;
        Ok(())
    }

    async fn scroll_height(&self) -> BrowserResult<f64> {
        self.eval(
            "return Math.max(document.body ? document.body.scrollHeight : 0, \
             document.documentElement.scrollHeight);",
        )
        .await
    }

    async fn content(&self) -> BrowserResult<String> {
        self.page.content().await.map_err(cdp)
    }

    async fn frame_content(&self, index: usize) -> BrowserResult<Option<String>> {
        let Some(context) = self.frame_context(index).await? else {
            return Ok(None);
        };
        self.eval_in(
            Some(context),
            "return document.documentElement ? document.documentElement.outerHTML : null;",
        )
        .await
    }

    async fn last_api_response(&self) -> BrowserResult<Option<ApiResponse>> {
        self.api_response
            .lock()
            .map(|latest| latest.clone())
            .map_err(|_| BrowserError::Closed)
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(cdp)
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.sniffer.abort();
        self.page.close().await.map_err(cdp)
    }
}
