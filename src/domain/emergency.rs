//! Emergency approximation table.
//!
//! Fixed reference prices committed ahead of time, served only when every
//! live tier and the cache have failed. The values go stale by nature; they
//! are a last-resort approximation and are always tagged `EMERGENCY`.

use std::collections::HashMap;

use super::market::DataType;

/// Built-in approximate prices (USDT quote).
const DEFAULT_PRICES: &[(&str, f64)] = &[
    ("BTCUSDT", 43_000.0),
    ("ETHUSDT", 2_650.0),
    ("BNBUSDT", 310.0),
    ("SOLUSDT", 98.0),
    ("XRPUSDT", 0.52),
    ("ADAUSDT", 0.48),
    ("DOGEUSDT", 0.08),
    ("AVAXUSDT", 36.0),
    ("DOTUSDT", 7.2),
    ("LINKUSDT", 14.5),
];

/// Static per-symbol fallback values.
#[derive(Debug, Clone)]
pub struct EmergencyTable {
    prices: HashMap<String, f64>,
}

impl Default for EmergencyTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EmergencyTable {
    /// Table with no entries.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Table seeded with the built-in prices.
    pub fn with_defaults() -> Self {
        Self {
            prices: DEFAULT_PRICES
                .iter()
                .map(|(symbol, price)| ((*symbol).to_string(), *price))
                .collect(),
        }
    }

    /// Add or replace entries (config overrides win over defaults).
    #[must_use]
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        for (symbol, price) in overrides {
            self.prices.insert(symbol.into(), price);
        }
        self
    }

    /// Emergency value for `(data_type, symbol)`. Only prices are covered.
    pub fn lookup(&self, data_type: DataType, symbol: &str) -> Option<f64> {
        match data_type {
            DataType::Price => self.prices.get(symbol).copied(),
            DataType::Ticker | DataType::Indicators | DataType::Balance => None,
        }
    }

    /// Number of symbols covered.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
