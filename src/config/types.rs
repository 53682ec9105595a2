use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Händler-Scout
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "postal-codes", default)]
    pub postal_codes: PostalCodeConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    pub output: OutputConfig,
}

/// Search behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Page hosting the retailer search form
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Search radius to pick in the distance selector
    #[serde(default = "default_radius_km")]
    pub radius_km: u32,

    /// Which key identifies a retailer across sessions
    #[serde(default)]
    pub deduplicate_by: DedupBy,

    /// Maximum number of concurrently open sessions
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Upper bound on lazy-load scroll steps before extraction
    #[serde(default = "default_scroll_steps")]
    pub scroll_steps: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            radius_km: default_radius_km(),
            deduplicate_by: DedupBy::default(),
            max_concurrency: default_max_concurrency(),
            scroll_steps: default_scroll_steps(),
        }
    }
}

/// Deduplication key selection as written in the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DedupBy {
    #[default]
    #[serde(rename = "detail-url", alias = "detailUrl")]
    DetailUrl,
    #[serde(rename = "fields")]
    Fields,
}

/// Where the postal-code work list comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum PostalCodeMode {
    #[serde(rename = "explicit", alias = "input")]
    Explicit,
    #[default]
    #[serde(rename = "range")]
    Range,
    #[serde(rename = "external-file", alias = "kv")]
    ExternalFile,
}

/// A configured postal code; integers are accepted and coerced to text
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CodeEntry {
    Text(String),
    Number(u64),
}

impl CodeEntry {
    pub fn to_code_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Postal-code source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PostalCodeConfig {
    #[serde(default)]
    pub mode: PostalCodeMode,

    /// Codes used verbatim in explicit mode
    #[serde(default)]
    pub codes: Vec<CodeEntry>,

    /// Two-digit prefixes expanded in range mode, or the sentinel "all"
    #[serde(default = "default_range_prefixes")]
    pub range_prefixes: Vec<String>,

    /// Newline-delimited code list read in external-file mode
    #[serde(default = "default_postal_code_file")]
    pub file: String,
}

impl Default for PostalCodeConfig {
    fn default() -> Self {
        Self {
            mode: PostalCodeMode::default(),
            codes: Vec::new(),
            range_prefixes: default_range_prefixes(),
            file: default_postal_code_file(),
        }
    }
}

/// Headless browser configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chromium binary; autodetected when absent
    #[serde(default)]
    pub executable: Option<String>,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Upper bound on one postal code from page open to extraction
    #[serde(default = "default_request_handler_timeout_secs")]
    pub request_handler_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            navigation_timeout_secs: default_navigation_timeout_secs(),
            request_handler_timeout_secs: default_request_handler_timeout_secs(),
        }
    }
}

/// Per-operation wait budgets, all in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeoutConfig {
    #[serde(default = "default_optional_click_ms")]
    pub optional_click_ms: u64,

    #[serde(default = "default_element_attach_ms")]
    pub element_attach_ms: u64,

    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,

    #[serde(default = "default_result_poll_interval_ms")]
    pub result_poll_interval_ms: u64,

    #[serde(default = "default_result_poll_attempts")]
    pub result_poll_attempts: u32,

    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,

    #[serde(default = "default_type_delay_ms")]
    pub type_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            optional_click_ms: default_optional_click_ms(),
            element_attach_ms: default_element_attach_ms(),
            network_idle_ms: default_network_idle_ms(),
            result_poll_interval_ms: default_result_poll_interval_ms(),
            result_poll_attempts: default_result_poll_attempts(),
            scroll_pause_ms: default_scroll_pause_ms(),
            type_delay_ms: default_type_delay_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn optional_click(&self) -> Duration {
        Duration::from_millis(self.optional_click_ms)
    }

    pub fn element_attach(&self) -> Duration {
        Duration::from_millis(self.element_attach_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(self.result_poll_interval_ms)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }

    pub fn type_delay(&self) -> Duration {
        Duration::from_millis(self.type_delay_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Directory receiving screenshots and raw markup of suspicious sessions
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,
}

fn default_start_url() -> String {
    "https://www.bioladen.de/bio-haendler-suche".to_string()
}

fn default_radius_km() -> u32 {
    25
}

fn default_max_concurrency() -> u32 {
    1
}

fn default_scroll_steps() -> u32 {
    20
}

fn default_range_prefixes() -> Vec<String> {
    [
        "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "20", "30", "40", "50", "60",
        "70", "80", "90",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_postal_code_file() -> String {
    "de_plz.txt".to_string()
}

fn default_true() -> bool {
    true
}

fn default_navigation_timeout_secs() -> u64 {
    90
}

fn default_request_handler_timeout_secs() -> u64 {
    240
}

fn default_optional_click_ms() -> u64 {
    1500
}

fn default_element_attach_ms() -> u64 {
    10_000
}

fn default_network_idle_ms() -> u64 {
    15_000
}

fn default_result_poll_interval_ms() -> u64 {
    500
}

fn default_result_poll_attempts() -> u32 {
    40
}

fn default_scroll_pause_ms() -> u64 {
    300
}

fn default_type_delay_ms() -> u64 {
    30
}

fn default_diagnostics_dir() -> String {
    "diagnostics".to_string()
}
