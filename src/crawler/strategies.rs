//! Ordered fallback strategies for form interaction
//!
//! Each step that has more than one way of getting done is a list of
//! [`Strategy`] objects tried in order until one reports success. A strategy
//! that cannot apply returns `Ok(false)`; a backend error counts as a miss and
//! the next strategy runs.

use crate::browser::{BrowserPage, BrowserResult, Locator, Scope};
use async_trait::async_trait;
use std::time::Duration;

/// Postal-code inputs in priority order
pub const ZIP_INPUT_SELECTORS: &[&str] = &[
    r#"input[name="tx_biohandel_plg[searchplz]"]"#,
    r#"input[placeholder*="Postleitzahl" i]"#,
    r#"input[aria-label*="Postleitzahl" i]"#,
    r#"input[placeholder*="PLZ" i]"#,
];

const RADIUS_SELECT: &str = r#"select[name*="distance" i], select[name*="radius" i]"#;
const CUSTOM_DROPDOWN: &str = r#"[role="combobox"], [aria-haspopup="listbox"]"#;
const DROPDOWN_OPTION: &str = r#"[role="option"]"#;
const SUBMIT_LABELS: &[&str] = &["Händler finden", "BIO-HÄNDLER FINDEN", "Suchen"];

/// One way of getting a form step done
#[async_trait]
pub trait Strategy: Send + Sync {
    type Input: ?Sized + Sync;

    fn name(&self) -> &'static str;

    /// Tries the strategy; `Ok(true)` when the step is done
    async fn attempt(&self, page: &dyn BrowserPage, input: &Self::Input) -> BrowserResult<bool>;
}

/// A chain of interchangeable strategies for the same input
pub type Chain<I> = Vec<Box<dyn Strategy<Input = I>>>;

/// Runs strategies in order and returns the name of the first that succeeded
pub async fn run_chain<I>(
    page: &dyn BrowserPage,
    chain: &[Box<dyn Strategy<Input = I>>],
    input: &I,
) -> Option<&'static str>
where
    I: ?Sized + Sync,
{
    for strategy in chain {
        match strategy.attempt(page, input).await {
            Ok(true) => return Some(strategy.name()),
            Ok(false) => tracing::debug!("Strategy {} did not apply", strategy.name()),
            Err(e) => tracing::debug!("Strategy {} failed: {}", strategy.name(), e),
        }
    }
    None
}

/// Locators for every known postal-code input, highest priority first
pub fn zip_input_locators() -> Vec<Locator> {
    ZIP_INPUT_SELECTORS.iter().map(|css| Locator::css(*css)).collect()
}

// ===== Postal-code entry =====

/// What the fill chain needs to enter a postal code
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub code: String,
    /// Input found by the attachment wait, if any
    pub located: Option<Locator>,
    pub type_delay: Duration,
}

/// Clears the visible input and types the code key by key
pub struct TypeIntoField;

#[async_trait]
impl Strategy for TypeIntoField {
    type Input = ZipEntry;

    fn name(&self) -> &'static str {
        "type-into-field"
    }

    async fn attempt(&self, page: &dyn BrowserPage, entry: &ZipEntry) -> BrowserResult<bool> {
        let Some(locator) = &entry.located else {
            return Ok(false);
        };

        page.scroll_into_view(locator).await?;
        if let Err(e) = page.focus(locator).await {
            tracing::debug!("Focusing postal-code input failed: {}", e);
        }
        if !page.is_visible(locator).await? {
            return Ok(false);
        }

        page.clear(locator).await?;
        page.type_text(locator, &entry.code, entry.type_delay).await?;
        Ok(true)
    }
}

/// Forces the input visible and enabled, then sets its value by script
pub struct ForceFieldValue;

#[async_trait]
impl Strategy for ForceFieldValue {
    type Input = ZipEntry;

    fn name(&self) -> &'static str {
        "force-field-value"
    }

    async fn attempt(&self, page: &dyn BrowserPage, entry: &ZipEntry) -> BrowserResult<bool> {
        let candidates = entry.located.iter().cloned().chain(zip_input_locators());
        for locator in candidates {
            if page.force_value(&locator, &entry.code).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub fn fill_chain() -> Chain<ZipEntry> {
    vec![Box::new(TypeIntoField), Box::new(ForceFieldValue)]
}

// ===== Radius selection =====

/// Picks the option whose label contains the radius, else the first one
///
/// Returns the index and whether it was an actual match.
pub fn choose_radius_index(labels: &[String], radius_km: u32) -> (usize, bool) {
    let needle = radius_km.to_string();
    match labels.iter().position(|label| label.contains(&needle)) {
        Some(index) => (index, true),
        None => (0, false),
    }
}

fn warn_unmatched(labels: &[String], radius_km: u32) {
    tracing::warn!(
        "No radius option contains {} km (options: {:?}), using the first option",
        radius_km,
        labels
    );
}

async fn select_radius_in(
    page: &dyn BrowserPage,
    locator: &Locator,
    radius_km: u32,
) -> BrowserResult<bool> {
    let Some(labels) = page.option_labels(locator).await? else {
        return Ok(false);
    };
    if labels.is_empty() {
        return Ok(false);
    }

    let (index, matched) = choose_radius_index(&labels, radius_km);
    if !matched {
        warn_unmatched(&labels, radius_km);
    }
    page.select_option(locator, index).await
}

/// A `<select>` whose name mentions distance or radius
pub struct NamedSelect;

#[async_trait]
impl Strategy for NamedSelect {
    type Input = u32;

    fn name(&self) -> &'static str {
        "named-select"
    }

    async fn attempt(&self, page: &dyn BrowserPage, radius_km: &u32) -> BrowserResult<bool> {
        select_radius_in(page, &Locator::css(RADIUS_SELECT), *radius_km).await
    }
}

/// The first `<select>` on the page
pub struct FirstSelect;

#[async_trait]
impl Strategy for FirstSelect {
    type Input = u32;

    fn name(&self) -> &'static str {
        "first-select"
    }

    async fn attempt(&self, page: &dyn BrowserPage, radius_km: &u32) -> BrowserResult<bool> {
        select_radius_in(page, &Locator::css("select"), *radius_km).await
    }
}

/// A scripted listbox opened by clicking it
pub struct CustomDropdown;

#[async_trait]
impl Strategy for CustomDropdown {
    type Input = u32;

    fn name(&self) -> &'static str {
        "custom-dropdown"
    }

    async fn attempt(&self, page: &dyn BrowserPage, radius_km: &u32) -> BrowserResult<bool> {
        let Some(labels) = page.open_custom_dropdown(&Locator::css(CUSTOM_DROPDOWN)).await? else {
            return Ok(false);
        };
        if labels.is_empty() {
            return Ok(false);
        }

        let (index, matched) = choose_radius_index(&labels, *radius_km);
        if !matched {
            warn_unmatched(&labels, *radius_km);
        }
        page.click_nth(&Locator::css(DROPDOWN_OPTION), index).await
    }
}

pub fn radius_chain() -> Chain<u32> {
    vec![
        Box::new(NamedSelect),
        Box::new(FirstSelect),
        Box::new(CustomDropdown),
    ]
}

// ===== Search submission =====

/// Clicks a submit control, preferring one inside the postal-code form
pub struct ClickSubmit;

impl ClickSubmit {
    fn candidates(zip_input: &Locator) -> Vec<Locator> {
        let mut candidates = vec![Locator::css(format!(
            r#"form:has({}) button[type="submit"]"#,
            zip_input.css
        ))];
        candidates.extend(SUBMIT_LABELS.iter().map(|label| Locator::with_text("button", *label)));
        candidates
    }
}

#[async_trait]
impl Strategy for ClickSubmit {
    type Input = Locator;

    fn name(&self) -> &'static str {
        "click-submit"
    }

    async fn attempt(&self, page: &dyn BrowserPage, zip_input: &Locator) -> BrowserResult<bool> {
        for candidate in Self::candidates(zip_input) {
            if page.click(Scope::Main, &candidate).await? {
                tracing::debug!("Clicked submit control {}", candidate);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Submits the form enclosing the postal-code input by script
pub struct SubmitForm;

#[async_trait]
impl Strategy for SubmitForm {
    type Input = Locator;

    fn name(&self) -> &'static str {
        "submit-form"
    }

    async fn attempt(&self, page: &dyn BrowserPage, zip_input: &Locator) -> BrowserResult<bool> {
        page.submit_form(zip_input).await
    }
}

pub fn submit_chain() -> Chain<Locator> {
    vec![Box::new(ClickSubmit), Box::new(SubmitForm)]
}
