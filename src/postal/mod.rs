//! Postal-code work list
//!
//! Produces the ordered list of postal codes a run walks through, from one of
//! three sources selected in the config:
//!
//! - `explicit`: the configured codes, verbatim
//! - `range`: every `prefix + 000..=999` for the configured two-digit prefixes
//! - `external-file`: a newline-delimited list, falling back to `range` when
//!   the file is missing
//!
//! The list is computed once before any session starts and never changes
//! afterwards.

use crate::config::{PostalCodeConfig, PostalCodeMode};
use crate::ConfigError;
use std::fmt;
use std::path::Path;

/// Sentinel in `range-prefixes` selecting every prefix
pub const ALL_PREFIXES: &str = "all";

/// A German postal code (PLZ) as used for one search
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostalCode(String);

impl PostalCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for exactly five ASCII digits
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 5 && self.0.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PostalCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Loads the postal-code work list described by `config`
///
/// Relative external-file paths are resolved against the working directory.
///
/// # Errors
///
/// [`ConfigError::NoPostalCodes`] when the resulting list is empty, and
/// [`ConfigError::Io`] when an existing code file cannot be read.
pub fn load_postal_codes(config: &PostalCodeConfig) -> Result<Vec<PostalCode>, ConfigError> {
    let codes = match config.mode {
        PostalCodeMode::Explicit => config
            .codes
            .iter()
            .map(|entry| PostalCode::new(entry.to_code_string()))
            .collect(),
        PostalCodeMode::Range => generate_range(&config.range_prefixes),
        PostalCodeMode::ExternalFile => {
            let path = Path::new(&config.file);
            match read_code_file(path)? {
                Some(codes) => codes,
                None => {
                    tracing::warn!(
                        "postal-codes.mode is external-file but {} was not found, falling back to range",
                        path.display()
                    );
                    generate_range(&config.range_prefixes)
                }
            }
        }
    };

    if codes.is_empty() {
        return Err(ConfigError::NoPostalCodes);
    }

    let malformed = codes.iter().filter(|c| !c.is_well_formed()).count();
    if malformed > 0 {
        tracing::warn!("{} configured postal codes are not 5 digits", malformed);
    }

    tracing::info!("Loaded {} postal codes ({:?} mode)", codes.len(), config.mode);
    Ok(codes)
}

/// Expands two-digit prefixes into full five-digit codes
///
/// Codes starting with "00" are never produced: that leading pair is not
/// assigned in Germany.
pub fn generate_range(prefixes: &[String]) -> Vec<PostalCode> {
    let prefixes: Vec<String> = if prefixes.iter().any(|p| p == ALL_PREFIXES) {
        (0..100).map(|n| format!("{:02}", n)).collect()
    } else {
        prefixes.iter().map(|p| format!("{:0>2}", p)).collect()
    };

    let mut codes = Vec::with_capacity(prefixes.len() * 1000);
    for prefix in &prefixes {
        if prefix == "00" {
            continue;
        }
        for suffix in 0..1000 {
            codes.push(PostalCode(format!("{}{:03}", prefix, suffix)));
        }
    }
    codes
}

/// Reads a newline-delimited code list; `Ok(None)` when the file does not exist
fn read_code_file(path: &Path) -> Result<Option<Vec<PostalCode>>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(parse_code_lines(&content)))
}

/// Splits file content into trimmed, non-blank codes
pub fn parse_code_lines(content: &str) -> Vec<PostalCode> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PostalCode::new)
        .collect()
}
