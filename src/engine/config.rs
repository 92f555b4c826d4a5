//! Engine Configuration
//!
//! Defaults: 10 s betting window, 3 s cooldown,
//! 100 ms ticks, ten rounds of history, a 1000-unit starting bankroll,
//! at most 10 000 accounts.

use std::time::Duration;
use thiserror::Error;

use crate::core::rng::derive_seed;
use crate::engine::clock::DEFAULT_GROWTH_CONSTANT;
use crate::engine::crash_point::{CrashPointGenerator, SeededSampler, DEFAULT_HOUSE_EDGE};
use crate::engine::events::DEFAULT_EVENT_CAPACITY;
use crate::engine::history::DEFAULT_HISTORY_CAPACITY;
use crate::engine::price::StaticPriceSource;
use crate::proof::commitment::ProvablyFairGenerator;

/// Default account cap.
pub const DEFAULT_MAX_ACCOUNTS: usize = 10_000;

/// Which crash point generator backs the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FairnessMode {
    /// Commit–reveal over OS-random server seeds.
    ProvablyFair,
    /// Deterministic sampler; for simulation and load tests only.
    Seeded(u64),
}

/// Round engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Betting window before each round.
    pub waiting_duration: Duration,
    /// Pause after the crash before the next round opens.
    pub cooldown_duration: Duration,
    /// Scheduling tick period.
    pub tick_period: Duration,
    /// Multiplier growth constant `k` (per second).
    pub growth_constant: f64,
    /// Rounds kept in history.
    pub history_capacity: usize,
    /// House edge in `[0, 0.99]`.
    pub house_edge: f64,
    /// Balance granted to a newly opened account.
    pub starting_balance: f64,
    /// Accounts the ledger will open before refusing new players.
    pub max_accounts: usize,
    /// Crash point generator.
    pub fairness: FairnessMode,
    /// Public seed mixed into provably fair rounds.
    pub client_seed: String,
    /// Currency prices.
    pub prices: StaticPriceSource,
    /// Per-listener event buffer.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waiting_duration: Duration::from_secs(10),
            cooldown_duration: Duration::from_secs(3),
            tick_period: Duration::from_millis(100),
            growth_constant: DEFAULT_GROWTH_CONSTANT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            house_edge: DEFAULT_HOUSE_EDGE,
            starting_balance: 1000.0,
            max_accounts: DEFAULT_MAX_ACCOUNTS,
            fairness: FairnessMode::ProvablyFair,
            client_seed: "crash-engine".to_string(),
            prices: StaticPriceSource::with_defaults(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A variable was set to something unparseable.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl EngineConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `CRASH_WAITING_MS` | betting window |
    /// | `CRASH_COOLDOWN_MS` | cooldown |
    /// | `CRASH_TICK_MS` | tick period |
    /// | `CRASH_GROWTH` | growth constant |
    /// | `CRASH_HISTORY` | history capacity |
    /// | `CRASH_HOUSE_EDGE` | house edge |
    /// | `CRASH_STARTING_BALANCE` | new account balance |
    /// | `CRASH_MAX_ACCOUNTS` | account cap |
    /// | `CRASH_FAIRNESS` | `provably_fair` or `seeded:<u64 or label>` |
    /// | `CRASH_CLIENT_SEED` | public client seed |
    /// | `CRASH_PRICES` | `BTC=60000,ETH=3500` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "CRASH_WAITING_MS")? {
            config.waiting_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CRASH_COOLDOWN_MS")? {
            config.cooldown_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CRASH_TICK_MS")? {
            if ms == 0 {
                return Err(invalid("CRASH_TICK_MS", "0"));
            }
            config.tick_period = Duration::from_millis(ms);
        }
        if let Some(k) = parse_var::<f64, _>(&lookup, "CRASH_GROWTH")? {
            if !(k.is_finite() && k > 0.0) {
                return Err(invalid("CRASH_GROWTH", &k.to_string()));
            }
            config.growth_constant = k;
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "CRASH_HISTORY")? {
            config.history_capacity = n;
        }
        if let Some(edge) = parse_var::<f64, _>(&lookup, "CRASH_HOUSE_EDGE")? {
            if !(0.0..1.0).contains(&edge) {
                return Err(invalid("CRASH_HOUSE_EDGE", &edge.to_string()));
            }
            config.house_edge = edge;
        }
        if let Some(balance) = parse_var::<f64, _>(&lookup, "CRASH_STARTING_BALANCE")? {
            if !(balance.is_finite() && balance >= 0.0) {
                return Err(invalid("CRASH_STARTING_BALANCE", &balance.to_string()));
            }
            config.starting_balance = balance;
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "CRASH_MAX_ACCOUNTS")? {
            if n == 0 {
                return Err(invalid("CRASH_MAX_ACCOUNTS", "0"));
            }
            config.max_accounts = n;
        }
        if let Some(mode) = lookup("CRASH_FAIRNESS") {
            config.fairness = parse_fairness(&mode)?;
        }
        if let Some(seed) = lookup("CRASH_CLIENT_SEED") {
            config.client_seed = seed;
        }
        if let Some(prices) = lookup("CRASH_PRICES") {
            config.prices = StaticPriceSource::parse(&prices);
        }

        Ok(config)
    }

    /// Instantiate the configured generator.
    pub fn build_generator(&self) -> Box<dyn CrashPointGenerator> {
        match self.fairness {
            FairnessMode::ProvablyFair => Box::new(ProvablyFairGenerator::new(
                self.house_edge,
                self.client_seed.clone(),
            )),
            FairnessMode::Seeded(seed) => Box::new(SeededSampler::new(seed, self.house_edge)),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
        None => Ok(None),
    }
}

fn parse_fairness(raw: &str) -> Result<FairnessMode, ConfigError> {
    let raw = raw.trim();
    if raw == "provably_fair" {
        return Ok(FairnessMode::ProvablyFair);
    }
    match raw.strip_prefix("seeded:") {
        Some(seed) if !seed.is_empty() => Ok(FairnessMode::Seeded(
            seed.parse::<u64>().unwrap_or_else(|_| derive_seed(seed)),
        )),
        _ => Err(invalid("CRASH_FAIRNESS", raw)),
    }
}
