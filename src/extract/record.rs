//! Retailer record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One retailer listing as extracted from a result page
///
/// Every derived field is optional: a heuristic that misses leaves `None`
/// behind instead of failing the extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetailerRecord {
    pub name: String,
    pub street: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub opening_hours: Option<String>,
    pub detail_url: Option<String>,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    pub distance_km: Option<f64>,
    pub category: Option<String>,
}

impl RetailerRecord {
    /// Creates an otherwise empty record carrying the fixed market constants
    pub fn new(name: impl Into<String>, scraped_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            street: None,
            zip: None,
            city: None,
            country: crate::COUNTRY.to_string(),
            lat: None,
            lng: None,
            phone: None,
            email: None,
            website: None,
            opening_hours: None,
            detail_url: None,
            source: crate::SOURCE.to_string(),
            scraped_at,
            distance_km: None,
            category: None,
        }
    }

    /// A record is worth keeping once it has a name, a street or a detail link
    pub fn is_valid(&self) -> bool {
        let filled = |value: Option<&str>| value.is_some_and(|v| !v.trim().is_empty());
        !self.name.trim().is_empty()
            || filled(self.street.as_deref())
            || filled(self.detail_url.as_deref())
    }
}
