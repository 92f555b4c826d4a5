//! Price Sources
//!
//! Read-only conversion from account units to the currency a bet is
//! denominated in. Consulted outside the scheduler lock.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// Currency ticker, normalized to upper case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a ticker, trimming and upper-casing it.
    pub fn new(ticker: &str) -> Self {
        Self(ticker.trim().to_ascii_uppercase())
    }

    /// Ticker string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only price feed.
pub trait PriceSource: Send + Sync {
    /// Price of one unit of `currency` in account units, if known.
    fn price_of(&self, currency: &Currency) -> Option<f64>;
}

/// Fixed price table.
#[derive(Clone, Debug, Default)]
pub struct StaticPriceSource {
    prices: BTreeMap<Currency, f64>,
}

impl StaticPriceSource {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table the game shipped with: BTC and ETH.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_price("BTC", 60_000.0)
            .with_price("ETH", 3_500.0)
    }

    /// Add or replace a price.
    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices.insert(Currency::new(ticker), price);
        self
    }

    /// Parse `BTC=60000,ETH=3500` style overrides.
    ///
    /// Malformed entries are skipped.
    pub fn parse(table: &str) -> Self {
        table.split(',')
            .filter_map(|entry| {
                let (ticker, price) = entry.split_once('=')?;
                let price: f64 = price.trim().parse().ok()?;
                Some((ticker.to_string(), price))
            })
            .fold(Self::new(), |source, (ticker, price)| source.with_price(&ticker, price))
    }

    /// Known tickers.
    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        self.prices.keys()
    }
}

impl PriceSource for StaticPriceSource {
    fn price_of(&self, currency: &Currency) -> Option<f64> {
        self.prices
            .get(currency)
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}
