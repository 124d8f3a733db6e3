//! Currency rate lookups for referral pricing.
//!
//! Referral country groups quote their credit in a fiat currency; the
//! consumer needs the day's rate against the base currency to turn that
//! credit into probi. The lookup is behind a trait so tests and the
//! in-memory pipeline can run on fixed rates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Looks up conversion rates from the base currency.
#[async_trait]
pub trait RateClient: Send + Sync {
    /// Returns how many units of each target currency one unit of
    /// `base` buys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rates`] when the lookup fails and
    /// [`Error::MissingRate`] when the response omits a requested
    /// currency.
    async fn fetch_rates(
        &self,
        base: &str,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>>;
}

/// A rate client with a fixed table.
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<String, Decimal>,
}

impl FixedRates {
    /// Creates a fixed table from (currency, rate) pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self {
            rates: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RateClient for FixedRates {
    async fn fetch_rates(
        &self,
        _base: &str,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>> {
        let mut rates = HashMap::with_capacity(currencies.len());
        for currency in currencies {
            let rate = self
                .rates
                .get(currency)
                .ok_or_else(|| Error::MissingRate {
                    currency: currency.clone(),
                })?;
            rates.insert(currency.clone(), *rate);
        }
        Ok(rates)
    }
}

/// Response shape of the rate service's relative endpoint.
#[derive(Debug, Deserialize)]
struct RatesResponse {
    payload: HashMap<String, Decimal>,
}

/// Rate client backed by the platform's rate service.
#[derive(Debug, Clone)]
pub struct HttpRates {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRates {
    /// Creates a client for the rate service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is empty or the HTTP
    /// client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(Error::config("rates base url cannot be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }
}

#[async_trait]
impl RateClient for HttpRates {
    async fn fetch_rates(
        &self,
        base: &str,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>> {
        let url = format!(
            "{}/v1/relative/provider/coingecko/{base}/{}/live",
            self.base_url,
            currencies.join(",")
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::rates_with_source("rate service request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::Rates {
                message: format!("rate service returned {status}: {body}"),
                source: None,
            });
        }

        let parsed: RatesResponse = response
            .json()
            .await
            .map_err(|e| Error::rates_with_source("rate response did not parse", e))?;

        for currency in currencies {
            if !parsed.payload.contains_key(currency) {
                return Err(Error::MissingRate {
                    currency: currency.clone(),
                });
            }
        }
        Ok(parsed.payload)
    }
}
