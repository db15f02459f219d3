//! Fund data gateway
//!
//! Every read of scheme data goes through `FundGateway`. The HTTP
//! implementation talks to MFAPI; `CachedGateway` adds a TTL cache in front
//! of any gateway; `StaticGateway` serves in-memory records for development
//! and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::config::Settings;
use crate::error::GatewayError;
use crate::models::{FundRecord, FundSummary, HistoryWindow, NavPoint, SchemeCode};

pub mod cache;
pub mod mfapi;

pub use cache::CachedGateway;
pub use mfapi::MfApiGateway;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Read-only access to mutual fund data
#[async_trait]
pub trait FundGateway: Send + Sync {
    fn name(&self) -> &str;

    /// At most `limit` schemes whose name contains every word of `term`
    async fn search_by_name(&self, term: &str, limit: usize) -> GatewayResult<Vec<FundSummary>>;

    async fn get_by_code(&self, code: &SchemeCode) -> GatewayResult<FundRecord>;

    /// NAV points inside `window`, oldest first
    async fn get_history(
        &self,
        code: &SchemeCode,
        window: HistoryWindow,
    ) -> GatewayResult<Vec<NavPoint>>;
}

#[async_trait]
impl<G: FundGateway + ?Sized> FundGateway for Arc<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search_by_name(&self, term: &str, limit: usize) -> GatewayResult<Vec<FundSummary>> {
        (**self).search_by_name(term, limit).await
    }

    async fn get_by_code(&self, code: &SchemeCode) -> GatewayResult<FundRecord> {
        (**self).get_by_code(code).await
    }

    async fn get_history(
        &self,
        code: &SchemeCode,
        window: HistoryWindow,
    ) -> GatewayResult<Vec<NavPoint>> {
        (**self).get_history(code, window).await
    }
}

/// MFAPI gateway, behind the cache when enabled
pub fn create_default_gateway(settings: &Settings) -> GatewayResult<Arc<dyn FundGateway>> {
    let http = MfApiGateway::from_settings(settings)?;

    if settings.enable_cache {
        info!(
            ttl_secs = settings.cache_ttl.as_secs(),
            max_size = settings.cache_max_size,
            "Fund data cache enabled"
        );
        return Ok(Arc::new(CachedGateway::new(
            http,
            settings.cache_ttl,
            settings.cache_max_size,
        )));
    }

    Ok(Arc::new(http))
}

// ===== In-memory gateway =====

/// In-memory gateway for development & testing.
///
/// Failures can be scripted per scheme code, either permanently or for the
/// first N calls, and every call can be delayed.
#[derive(Default)]
pub struct StaticGateway {
    funds: HashMap<SchemeCode, FundRecord>,
    histories: HashMap<(SchemeCode, HistoryWindow), Vec<NavPoint>>,
    failures: Mutex<HashMap<String, ScriptedFailure>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

struct ScriptedFailure {
    error: GatewayError,
    /// `None` fails forever
    remaining: Option<usize>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fund(mut self, record: FundRecord) -> Self {
        self.funds.insert(record.scheme_code.clone(), record);
        self
    }

    pub fn with_history(
        mut self,
        code: SchemeCode,
        window: HistoryWindow,
        points: Vec<NavPoint>,
    ) -> Self {
        self.histories.insert((code, window), points);
        self
    }

    /// Every call touching `key` (a scheme code or search term) fails
    pub fn with_failure(self, key: &str, error: GatewayError) -> Self {
        self.script(key, error, None)
    }

    /// The first `times` calls touching `key` fail, later ones succeed
    pub fn with_transient_failure(self, key: &str, error: GatewayError, times: usize) -> Self {
        self.script(key, error, Some(times))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(self, key: &str, error: GatewayError, remaining: Option<usize>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(key.to_lowercase(), ScriptedFailure { error, remaining });
        }
        self
    }

    async fn enter(&self, key: &str) -> GatewayResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(scripted) = failures.get_mut(&key.to_lowercase()) {
            match scripted.remaining {
                None => return Err(scripted.error.clone()),
                Some(0) => {}
                Some(ref mut n) => {
                    *n -= 1;
                    return Err(scripted.error.clone());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FundGateway for StaticGateway {
    fn name(&self) -> &str {
        "static"
    }

    async fn search_by_name(&self, term: &str, limit: usize) -> GatewayResult<Vec<FundSummary>> {
        self.enter(term).await?;

        let mut records: Vec<&FundRecord> = self.funds.values().collect();
        records.sort_by(|a, b| a.scheme_code.cmp(&b.scheme_code));

        let names: Vec<(SchemeCode, String)> = records
            .iter()
            .map(|r| (r.scheme_code.clone(), r.scheme_name.clone()))
            .collect();

        Ok(mfapi::match_schemes(&names, term, limit))
    }

    async fn get_by_code(&self, code: &SchemeCode) -> GatewayResult<FundRecord> {
        self.enter(code.as_str()).await?;
        self.funds
            .get(code)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(code.to_string()))
    }

    async fn get_history(
        &self,
        code: &SchemeCode,
        window: HistoryWindow,
    ) -> GatewayResult<Vec<NavPoint>> {
        self.enter(code.as_str()).await?;
        self.histories
            .get(&(code.clone(), window))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("{} history {}", code, window)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PerformanceMetrics;
    use tokio_test::{assert_err, assert_ok};

    fn record(code: &str, name: &str) -> FundRecord {
        FundRecord {
            scheme_code: SchemeCode::parse(code).unwrap(),
            scheme_name: name.to_string(),
            fund_house: String::new(),
            scheme_type: String::new(),
            scheme_category: String::new(),
            latest_nav: Some(50.0),
            nav_date: None,
            performance: PerformanceMetrics::default(),
        }
    }

    #[tokio::test]
    async fn test_static_gateway_search_and_lookup() {
        let gateway = StaticGateway::new()
            .with_fund(record("119598", "SBI Bluechip Fund - Direct Plan - Growth"))
            .with_fund(record("120586", "ICICI Prudential Bluechip Fund - Direct Plan - Growth"));

        let matches = assert_ok!(gateway.search_by_name("sbi bluechip", 10).await);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fund_house, "SBI");

        let code = SchemeCode::parse("120586").unwrap();
        let fund = assert_ok!(gateway.get_by_code(&code).await);
        assert!(fund.scheme_name.starts_with("ICICI"));

        let missing = SchemeCode::parse("999999").unwrap();
        assert_err!(gateway.get_by_code(&missing).await);
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_transient_failure() {
        let gateway = StaticGateway::new()
            .with_fund(record("119598", "SBI Bluechip Fund"))
            .with_transient_failure("119598", GatewayError::Timeout, 1);

        let code = SchemeCode::parse("119598").unwrap();
        assert_eq!(gateway.get_by_code(&code).await, Err(GatewayError::Timeout));
        assert_ok!(gateway.get_by_code(&code).await);
    }

    #[tokio::test]
    async fn test_arc_gateway_delegates() {
        let inner = Arc::new(StaticGateway::new().with_fund(record("119598", "SBI Bluechip Fund")));
        let shared: Arc<dyn FundGateway> = inner.clone();

        let code = SchemeCode::parse("119598").unwrap();
        assert_ok!(shared.get_by_code(&code).await);
        assert_eq!(inner.call_count(), 1);
        assert_eq!(shared.name(), "static");
    }
}
