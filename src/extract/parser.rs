//! Heuristic retailer parser
//!
//! The result markup is not under our control and changes without notice, so
//! nothing here relies on a single exact structure. Candidates are found among
//! broadly card-like containers and kept only when their text carries a
//! listing signal; every field is then derived independently and left empty
//! when its heuristic misses.

use crate::extract::record::RetailerRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static CANDIDATE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("article, li, .card, .result, .dealer, .entry, .store, [data-dealer]")
        .expect("valid candidate selector")
});
static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"h1, h2, h3, h4, .title, .name, [class*="title"]"#)
        .expect("valid name selector")
});
static ADDRESS_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("p, .address, address, .addr, .contact").expect("valid address selector")
});
static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));

/// Text that marks a container as a retailer listing
static LISTING_SIGNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bdetails\b|\badresse\b|bioladen|markt|lieferservice|hofladen|reformhaus|\(\s*\d+(?:[.,]\d+)?\s*km\s*\)|\b\d{5}\s+[A-Za-zÄÖÜäöüß-]+",
    )
    .expect("valid listing signal regex")
});
static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Bioladen|Biomarkt|Supermarkt|Markt|Lieferservice|Hofladen|Reformhaus)\b")
        .expect("valid category regex")
});
static FIVE_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{5}\b").expect("valid zip regex"));
static ZIP_CITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5})\s+(.+)").expect("valid zip/city regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d \t\u{a0}()/-]{6,}").expect("valid phone regex"));
static HOURS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:Mo|Di|Mi|Do|Fr|Sa|So)\.?(?:\s*[-–]\s*(?:Mo|Di|Mi|Do|Fr|Sa|So)\.?)?\s*:?\s*\d{1,2}(?:[:.]\d{2})?\s*[-–]\s*\d{1,2}(?:[:.]\d{2})?(?:\s*Uhr)?",
    )
    .expect("valid opening hours regex")
});
static DISTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(\d+(?:[.,]\d+)?)\s*km\s*\)").expect("valid distance regex")
});

/// Anchors pointing here are never a retailer's detail page
const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "linkedin.com",
    "pinterest.com",
    "pinterest.de",
    "tiktok.com",
];

/// Elements whose boundaries break a line in rendered text
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "dd", "div", "dt", "h1", "h2", "h3", "h4", "h5", "h6", "li", "p",
    "section", "td", "tr",
];

/// Street and locality parsed from an address block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub street: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
}

/// Extracts every valid retailer record from one document
///
/// # Arguments
///
/// * `html` - Markup of the page or frame
/// * `base_url` - Page URL used to resolve root-relative detail links
/// * `scraped_at` - Timestamp stamped on every record
pub fn parse_retailers(
    html: &str,
    base_url: Option<&Url>,
    scraped_at: DateTime<Utc>,
) -> Vec<RetailerRecord> {
    let document = Html::parse_document(html);

    document
        .select(&CANDIDATE_SEL)
        .filter_map(|candidate| {
            let text = rendered_text(candidate);
            if !LISTING_SIGNAL_RE.is_match(&text) {
                return None;
            }
            let record = build_record(candidate, &text, base_url, scraped_at);
            record.is_valid().then_some(record)
        })
        .collect()
}

/// Derives all fields of one candidate container
fn build_record(
    candidate: ElementRef<'_>,
    text: &str,
    base_url: Option<&Url>,
    scraped_at: DateTime<Utc>,
) -> RetailerRecord {
    let name = candidate
        .select(&NAME_SEL)
        .next()
        .map(|el| normalize_space(&el.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default();

    let mut record = RetailerRecord::new(name, scraped_at);

    let address = address_block(candidate)
        .map(|block| parse_address(&block))
        .unwrap_or_default();
    record.street = address.street;
    record.zip = address.zip;
    record.city = address.city;

    record.detail_url = detail_url(candidate, base_url);
    record.website = anchors(candidate)
        .find(|href| href.starts_with("http"))
        .map(str::to_string);
    record.email = anchors(candidate)
        .find_map(|href| href.strip_prefix("mailto:"))
        .map(|addr| addr.split('?').next().unwrap_or(addr).trim().to_string())
        .filter(|addr| !addr.is_empty());
    record.phone = anchors(candidate)
        .find_map(|href| href.strip_prefix("tel:"))
        .map(normalize_space)
        .filter(|tel| !tel.is_empty())
        .or_else(|| parse_phone(text));
    record.opening_hours = HOURS_RE.find(text).map(|m| normalize_space(m.as_str()));
    record.distance_km = parse_distance_km(text);
    record.category = CATEGORY_RE.find(text).map(|m| m.as_str().to_string());
    record.lat = coordinate(candidate, &["data-lat", "data-latitude"]);
    record.lng = coordinate(candidate, &["data-lng", "data-lon", "data-longitude"]);

    record
}

/// Picks the address-like descendant, preferring one that carries a postal code
fn address_block(candidate: ElementRef<'_>) -> Option<String> {
    let blocks: Vec<String> = candidate
        .select(&ADDRESS_SEL)
        .map(rendered_text)
        .filter(|text| !text.is_empty())
        .collect();

    blocks
        .iter()
        .find(|text| FIVE_DIGITS_RE.is_match(text))
        .or_else(|| blocks.first())
        .cloned()
}

/// Splits an address block into street, postal code and city
///
/// Lines are separated by line breaks, `·` or `|`. The line holding the
/// "12345 City" pattern supplies zip and city and the line before it the
/// street; without such a line the first two lines are taken as street and
/// city. A single line is split on commas first.
pub fn parse_address(block: &str) -> Address {
    let mut parts: Vec<String> = block
        .split(['\n', '·', '|'])
        .map(normalize_space)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.len() == 1 {
        parts = parts[0]
            .split(", ")
            .map(normalize_space)
            .filter(|part| !part.is_empty())
            .collect();
    }

    if parts.len() < 2 {
        return Address::default();
    }

    let zip_line = parts
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, part)| ZIP_CITY_RE.is_match(part))
        .map(|(index, _)| index);

    match zip_line {
        Some(index) => {
            let (zip, city) = ZIP_CITY_RE
                .captures(&parts[index])
                .map(|caps| (caps[1].to_string(), normalize_space(&caps[2])))
                .unwrap_or_default();
            Address {
                street: Some(parts[index - 1].clone()),
                zip: Some(zip),
                city: Some(city),
            }
        }
        None => Address {
            street: Some(parts[0].clone()),
            zip: None,
            city: Some(parts[1].clone()),
        },
    }
}

/// First phone-like digit run of at least seven characters
///
/// Shorter runs such as opening hours ("9 - 18") are skipped, not fatal.
pub fn parse_phone(text: &str) -> Option<String> {
    PHONE_RE.find_iter(text).find_map(|m| {
        let phone = normalize_space(
            m.as_str()
                .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '/'),
        );
        (phone.len() >= 7).then_some(phone)
    })
}

/// Parses a "(3,5 km)" marker into kilometres
pub fn parse_distance_km(text: &str) -> Option<f64> {
    DISTANCE_RE
        .captures(text)
        .and_then(|caps| caps[1].replace(',', ".").parse::<f64>().ok())
}

/// First external non-social anchor, else the first root-relative one
fn detail_url(candidate: ElementRef<'_>, base_url: Option<&Url>) -> Option<String> {
    let external = anchors(candidate).find(|href| href.starts_with("http") && !is_social(href));
    if let Some(href) = external {
        return Some(href.to_string());
    }

    anchors(candidate)
        .find(|href| href.starts_with('/') && !href.starts_with("//"))
        .map(|href| match base_url.and_then(|base| base.join(href).ok()) {
            Some(absolute) => absolute.to_string(),
            None => href.to_string(),
        })
}

fn is_social(href: &str) -> bool {
    let Some(host) = Url::parse(href).ok().and_then(|u| u.host_str().map(str::to_lowercase))
    else {
        return false;
    };
    SOCIAL_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

fn anchors<'a>(candidate: ElementRef<'a>) -> impl Iterator<Item = &'a str> + 'a {
    candidate
        .select(&ANCHOR_SEL)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
}

fn coordinate(candidate: ElementRef<'_>, attrs: &[&str]) -> Option<f64> {
    attrs
        .iter()
        .filter_map(|attr| candidate.value().attr(attr))
        .find_map(|value| value.trim().parse::<f64>().ok())
}

/// Text of an element with line breaks at `<br>` and block boundaries
///
/// Each line is whitespace-normalized and blank lines are dropped.
pub fn rendered_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);

    raw.lines()
        .map(normalize_space)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let tag = el.name();
                if tag == "br" {
                    out.push('\n');
                    continue;
                }
                if tag == "script" || tag == "style" {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    let block = BLOCK_ELEMENTS.contains(&tag);
                    if block {
                        out.push('\n');
                    }
                    collect_text(child_el, out);
                    if block {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Collapses whitespace runs (including no-break spaces) and trims
pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
