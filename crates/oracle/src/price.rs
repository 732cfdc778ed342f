//! Cached USD price feed with serve-stale degradation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use paygate_core::{PayCurrency, UnixTime};
use tracing::{debug, warn};

/// Oracle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleMode {
    /// Fixed rates for development and tests
    Mock,
    /// Live HTTP price feed
    Live,
}

/// Oracle configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub mode: OracleMode,
    /// CoinGecko-compatible `simple/price` endpoint
    pub feed_url: String,
    /// Cache entries younger than this are served without refreshing
    pub refresh_secs: u64,
    /// Served rates older than this are flagged stale
    pub max_staleness_secs: u64,
    /// Per-request timeout for feed fetches
    pub request_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            mode: OracleMode::Mock,
            feed_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            refresh_secs: 60,
            max_staleness_secs: 15 * 60,
            request_timeout_secs: 5,
        }
    }
}

impl OracleConfig {
    /// Create a mock configuration for development
    pub fn mock() -> Self {
        Self::default()
    }

    /// Create a live configuration against a feed endpoint
    pub fn live(feed_url: impl Into<String>) -> Self {
        Self {
            mode: OracleMode::Live,
            feed_url: feed_url.into(),
            ..Default::default()
        }
    }
}

/// A rate as served to the quote calculator.
///
/// Always available; `stale` signals degraded freshness, never an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    /// USD per whole coin
    pub rate_usd: f64,
    /// Seconds since the rate was fetched (0 for mock and fallback rates)
    pub age_secs: u64,
    /// Rate is older than the configured max staleness, or a hardcoded
    /// fallback with no cache behind it
    pub stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate_usd: f64,
    fetched_at: UnixTime,
}

struct OracleInner {
    config: OracleConfig,
    http: reqwest::Client,
    cache: RwLock<HashMap<PayCurrency, CachedRate>>,
    /// Single periodic writer: set while a background refresh is in flight
    refreshing: AtomicBool,
    mock_rates: RwLock<HashMap<PayCurrency, f64>>,
}

/// Process-wide read-mostly price cache.
///
/// Readers never block on a refresh: an expired entry is served as-is and
/// a background refresh is kicked off for the next caller.
#[derive(Clone)]
pub struct PriceOracle {
    inner: Arc<OracleInner>,
}

impl PriceOracle {
    /// Hardcoded conservative fallback, used only when a currency has never
    /// been fetched successfully
    fn fallback_rate(currency: PayCurrency) -> f64 {
        match currency {
            PayCurrency::Sol => 150.0,
            PayCurrency::Ton => 5.0,
            PayCurrency::Usdc | PayCurrency::Stars => 1.0,
        }
    }

    /// Feed identifier for an oracle-priced currency
    fn feed_id(currency: PayCurrency) -> Option<&'static str> {
        match currency {
            PayCurrency::Sol => Some("solana"),
            PayCurrency::Ton => Some("the-open-network"),
            PayCurrency::Usdc | PayCurrency::Stars => None,
        }
    }

    pub fn new(config: OracleConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(OracleInner {
                config,
                http,
                cache: RwLock::new(HashMap::new()),
                refreshing: AtomicBool::new(false),
                mock_rates: RwLock::new(HashMap::from([
                    (PayCurrency::Sol, 150.0),
                    (PayCurrency::Ton, 5.0),
                ])),
            }),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.inner.config.mode == OracleMode::Mock
    }

    /// Override a mock rate (mock mode only, for testing)
    pub fn set_mock_rate(&self, currency: PayCurrency, rate_usd: f64) {
        let mut rates = self.inner.mock_rates.write().expect("oracle lock poisoned");
        rates.insert(currency, rate_usd);
    }

    fn now() -> UnixTime {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Get the USD rate for a currency. Infallible by contract: degraded
    /// results carry the `stale` flag instead of an error.
    pub async fn rate(&self, currency: PayCurrency) -> RateSample {
        // Pegged currencies need no feed
        if !currency.is_oracle_priced() {
            return RateSample {
                rate_usd: 1.0,
                age_secs: 0,
                stale: false,
            };
        }

        if self.is_mock() {
            let rates = self.inner.mock_rates.read().expect("oracle lock poisoned");
            let rate_usd = rates
                .get(&currency)
                .copied()
                .unwrap_or_else(|| Self::fallback_rate(currency));
            return RateSample {
                rate_usd,
                age_secs: 0,
                stale: false,
            };
        }

        let now = Self::now();
        let cached = {
            let cache = self.inner.cache.read().expect("oracle lock poisoned");
            cache.get(&currency).copied()
        };

        match cached {
            Some(entry) => {
                let age = now.saturating_sub(entry.fetched_at);
                if age >= self.inner.config.refresh_secs {
                    // Serve stale, refresh in the background
                    self.spawn_refresh(currency);
                }
                RateSample {
                    rate_usd: entry.rate_usd,
                    age_secs: age,
                    stale: age > self.inner.config.max_staleness_secs,
                }
            }
            None => {
                // First ask for this currency: fetch inline (bounded by the
                // request timeout), fall back if the feed is down
                match self.fetch(currency).await {
                    Some(rate_usd) => RateSample {
                        rate_usd,
                        age_secs: 0,
                        stale: false,
                    },
                    None => {
                        warn!(
                            "Price feed unavailable for {}, serving fallback",
                            currency.code()
                        );
                        RateSample {
                            rate_usd: Self::fallback_rate(currency),
                            age_secs: 0,
                            stale: true,
                        }
                    }
                }
            }
        }
    }

    fn spawn_refresh(&self, currency: PayCurrency) {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // refresh already in flight
        }

        let oracle = self.clone();
        tokio::spawn(async move {
            oracle.fetch(currency).await;
            oracle.inner.refreshing.store(false, Ordering::Release);
        });
    }

    /// Fetch a rate from the feed and cache it. Returns None on any
    /// transport or shape error.
    async fn fetch(&self, currency: PayCurrency) -> Option<f64> {
        let id = Self::feed_id(currency)?;
        let url = format!(
            "{}?ids={}&vs_currencies=usd",
            self.inner.config.feed_url, id
        );

        let response = match self.inner.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Price feed request failed: {}", e);
                return None;
            }
        };

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Price feed returned malformed body: {}", e);
                return None;
            }
        };

        let rate_usd = body.get(id)?.get("usd")?.as_f64()?;
        if !(rate_usd.is_finite() && rate_usd > 0.0) {
            warn!("Price feed returned unusable rate for {}: {}", id, rate_usd);
            return None;
        }

        debug!("Fetched {} rate: {} USD", currency.code(), rate_usd);
        let mut cache = self.inner.cache.write().expect("oracle lock poisoned");
        cache.insert(
            currency,
            CachedRate {
                rate_usd,
                fetched_at: Self::now(),
            },
        );
        Some(rate_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rates() {
        let oracle = PriceOracle::new(OracleConfig::mock());
        let sample = oracle.rate(PayCurrency::Sol).await;
        assert_eq!(sample.rate_usd, 150.0);
        assert!(!sample.stale);
        assert_eq!(sample.age_secs, 0);
    }

    #[tokio::test]
    async fn test_mock_rate_override() {
        let oracle = PriceOracle::new(OracleConfig::mock());
        oracle.set_mock_rate(PayCurrency::Sol, 200.0);
        let sample = oracle.rate(PayCurrency::Sol).await;
        assert_eq!(sample.rate_usd, 200.0);
    }

    #[tokio::test]
    async fn test_pegged_currency_never_fetched() {
        let oracle = PriceOracle::new(OracleConfig::live("http://127.0.0.1:1/price"));
        let sample = oracle.rate(PayCurrency::Usdc).await;
        assert_eq!(sample.rate_usd, 1.0);
        assert!(!sample.stale);
    }

    #[tokio::test]
    async fn test_live_feed_down_serves_fallback() {
        // Unroutable endpoint: fetch fails, fallback served, marked stale
        let mut config = OracleConfig::live("http://127.0.0.1:1/price");
        config.request_timeout_secs = 1;
        let oracle = PriceOracle::new(config);

        let sample = oracle.rate(PayCurrency::Sol).await;
        assert_eq!(sample.rate_usd, 150.0);
        assert!(sample.stale);
    }

    #[test]
    fn test_fallback_rates_conservative() {
        assert_eq!(PriceOracle::fallback_rate(PayCurrency::Sol), 150.0);
        assert_eq!(PriceOracle::fallback_rate(PayCurrency::Ton), 5.0);
        assert_eq!(PriceOracle::fallback_rate(PayCurrency::Usdc), 1.0);
    }
}
