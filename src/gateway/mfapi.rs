//! MFAPI (api.mfapi.in) gateway
//!
//! The upstream has no search endpoint, so name search scans the full scheme
//! listing, which is fetched once and kept for the cache TTL. Scheme details
//! carry the complete NAV series; returns and history windows are derived
//! from it locally.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{FundGateway, GatewayResult};
use crate::classifier::infer_fund_house;
use crate::config::Settings;
use crate::error::GatewayError;
use crate::models::{
    FundRecord, FundSummary, HistoryWindow, NavPoint, PerformanceMetrics, SchemeCode,
};

const NAV_DATE_FORMAT: &str = "%d-%m-%Y";

/// Furthest a NAV point may sit from a return window's start date
const MAX_NAV_GAP_DAYS: i64 = 365;

pub struct MfApiGateway {
    client: Client,
    base_url: String,
    listing_ttl: Duration,
    listing: RwLock<Option<SchemeListing>>,
}

struct SchemeListing {
    fetched_at: Instant,
    schemes: Arc<Vec<(SchemeCode, String)>>,
}

impl MfApiGateway {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_ttl: Duration::from_secs(3600),
            listing: RwLock::new(None),
        })
    }

    pub fn from_settings(settings: &Settings) -> GatewayResult<Self> {
        let mut gateway = Self::new(&settings.mfapi_base_url, settings.mfapi_timeout)?;
        gateway.listing_ttl = settings.cache_ttl;
        Ok(gateway)
    }

    async fn fetch_text(&self, path: &str) -> GatewayResult<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "MFAPI request");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(path.trim_start_matches('/').to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        Ok(response.text().await?)
    }

    async fn schemes(&self) -> GatewayResult<Arc<Vec<(SchemeCode, String)>>> {
        {
            let cached = self.listing.read().await;
            if let Some(listing) = cached.as_ref() {
                if listing.fetched_at.elapsed() < self.listing_ttl {
                    return Ok(listing.schemes.clone());
                }
            }
        }

        // fetched without holding the lock; a concurrent refresh just wins the race
        let body = self.fetch_text("").await?;
        let schemes = Arc::new(parse_scheme_listing(&body)?);
        debug!(count = schemes.len(), "Scheme listing refreshed");

        let mut cached = self.listing.write().await;
        *cached = Some(SchemeListing {
            fetched_at: Instant::now(),
            schemes: schemes.clone(),
        });
        Ok(schemes)
    }

    async fn scheme_details(&self, code: &SchemeCode) -> GatewayResult<(FundRecord, Vec<NavPoint>)> {
        let body = self.fetch_text(&format!("/{}", code)).await?;
        parse_scheme_details(code, &body)
    }
}

#[async_trait]
impl FundGateway for MfApiGateway {
    fn name(&self) -> &str {
        "mfapi"
    }

    async fn search_by_name(&self, term: &str, limit: usize) -> GatewayResult<Vec<FundSummary>> {
        let schemes = self.schemes().await?;
        Ok(match_schemes(&schemes, term, limit.max(1)))
    }

    async fn get_by_code(&self, code: &SchemeCode) -> GatewayResult<FundRecord> {
        let (record, _) = self.scheme_details(code).await?;
        Ok(record)
    }

    async fn get_history(
        &self,
        code: &SchemeCode,
        window: HistoryWindow,
    ) -> GatewayResult<Vec<NavPoint>> {
        let (_, points) = self.scheme_details(code).await?;
        Ok(slice_window(&points, window))
    }
}

// ===== Payloads =====

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Number(u64),
    Text(String),
}

impl RawCode {
    fn to_code(&self) -> Option<SchemeCode> {
        match self {
            RawCode::Number(n) => SchemeCode::parse(&n.to_string()),
            RawCode::Text(s) => SchemeCode::parse(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawListing {
    #[serde(rename = "schemeCode")]
    scheme_code: RawCode,
    #[serde(rename = "schemeName", default)]
    scheme_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMeta {
    fund_house: String,
    scheme_type: String,
    scheme_category: String,
    scheme_name: String,
}

#[derive(Debug, Deserialize)]
struct RawNav {
    #[serde(default)]
    date: String,
    #[serde(default)]
    nav: String,
}

#[derive(Debug, Deserialize)]
struct RawScheme {
    #[serde(default)]
    meta: Option<RawMeta>,
    #[serde(default)]
    data: Vec<RawNav>,
    #[serde(default)]
    status: String,
}

/// `GET {base}` body: every scheme code with its name
pub fn parse_scheme_listing(body: &str) -> GatewayResult<Vec<(SchemeCode, String)>> {
    let raw: Vec<RawListing> =
        serde_json::from_str(body).map_err(|e| GatewayError::Invalid(e.to_string()))?;

    Ok(raw
        .into_iter()
        .filter_map(|item| Some((item.scheme_code.to_code()?, item.scheme_name)))
        .collect())
}

/// `GET {base}/{code}` body: the fund record plus its NAV series, newest first
pub fn parse_scheme_details(
    code: &SchemeCode,
    body: &str,
) -> GatewayResult<(FundRecord, Vec<NavPoint>)> {
    let raw: RawScheme =
        serde_json::from_str(body).map_err(|e| GatewayError::Invalid(e.to_string()))?;

    let meta = match raw.meta {
        Some(meta) if raw.status.eq_ignore_ascii_case("success") && !meta.scheme_name.is_empty() => meta,
        _ => return Err(GatewayError::NotFound(code.to_string())),
    };

    let points = parse_nav_points(&raw.data);
    let latest = points.first();

    let fund_house = if meta.fund_house.is_empty() {
        infer_fund_house(&meta.scheme_name)
    } else {
        meta.fund_house
    };

    let record = FundRecord {
        scheme_code: code.clone(),
        scheme_category: meta.scheme_category,
        scheme_type: meta.scheme_type,
        fund_house,
        latest_nav: latest.map(|p| p.nav),
        nav_date: latest.map(|p| p.date),
        performance: calculate_returns(&points),
        scheme_name: meta.scheme_name,
    };

    Ok((record, points))
}

fn parse_nav_points(data: &[RawNav]) -> Vec<NavPoint> {
    let mut skipped = 0usize;
    let mut points: Vec<NavPoint> = data
        .iter()
        .filter_map(|raw| {
            let date = NaiveDate::parse_from_str(raw.date.trim(), NAV_DATE_FORMAT).ok();
            let nav = raw.nav.trim().parse::<f64>().ok().filter(|v| v.is_finite());
            match (date, nav) {
                (Some(date), Some(nav)) => Some(NavPoint { date, nav }),
                _ => {
                    skipped += 1;
                    None
                }
            }
        })
        .collect();

    if skipped > 0 {
        warn!(skipped, "Skipped malformed NAV entries");
    }

    points.sort_by(|a, b| b.date.cmp(&a.date));
    points
}

// ===== Derivations =====

/// Case-insensitive all-words match against scheme names, up to `limit` hits
pub fn match_schemes(
    schemes: &[(SchemeCode, String)],
    term: &str,
    limit: usize,
) -> Vec<FundSummary> {
    let words: Vec<String> = term.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words.is_empty() {
        return Vec::new();
    }

    schemes
        .iter()
        .filter(|(_, name)| {
            let lowered = name.to_lowercase();
            words.iter().all(|w| lowered.contains(w.as_str()))
        })
        .take(limit)
        .map(|(code, name)| FundSummary {
            scheme_code: code.clone(),
            scheme_name: name.clone(),
            fund_house: infer_fund_house(name),
            category: categorize_fund(name).to_string(),
        })
        .collect()
}

/// Broad category from keywords in the scheme name
pub fn categorize_fund(scheme_name: &str) -> &'static str {
    let lowered = scheme_name.to_lowercase();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if has_any(&["equity", "large cap", "mid cap", "small cap", "flexi cap"]) {
        "Equity"
    } else if has_any(&["debt", "bond", "income", "liquid", "gilt"]) {
        "Debt"
    } else if has_any(&["hybrid", "balanced", "equity savings"]) {
        "Hybrid"
    } else if has_any(&["retirement", "children", "tax saver", "elss"]) {
        "Solution Oriented"
    } else {
        "Other"
    }
}

/// Point-to-point returns against the NAV closest to each window start.
///
/// `points` must be newest first. A window gets no value when no NAV lies
/// within a year of its start date.
pub fn calculate_returns(points: &[NavPoint]) -> PerformanceMetrics {
    let mut metrics = PerformanceMetrics::default();
    if points.len() < 2 {
        return metrics;
    }

    let latest = &points[0];

    for window in HistoryWindow::ALL {
        let target = latest.date - ChronoDuration::days(window.days());

        let closest = points
            .iter()
            .map(|p| (p, (p.date - target).num_days().abs()))
            .filter(|(_, gap)| *gap < MAX_NAV_GAP_DAYS)
            .min_by_key(|(_, gap)| *gap)
            .map(|(p, _)| p);

        if let Some(start) = closest.filter(|p| p.nav > 0.0) {
            let change = (latest.nav - start.nav) / start.nav * 100.0;
            metrics.set(window, round2(change));
        }
    }

    metrics
}

/// Points of the last `window`, oldest first
pub fn slice_window(points: &[NavPoint], window: HistoryWindow) -> Vec<NavPoint> {
    let Some(latest) = points.iter().map(|p| p.date).max() else {
        return Vec::new();
    };
    let cutoff = latest - ChronoDuration::days(window.days());

    let mut slice: Vec<NavPoint> = points.iter().filter(|p| p.date >= cutoff).cloned().collect();
    slice.sort_by(|a, b| a.date.cmp(&b.date));
    slice
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
