// ============================================================================
// Asset and Asset Pair
// Static description of tradable instruments
// ============================================================================

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tradable asset. Immutable once configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    /// Unique ticker, e.g. "BTC"
    pub symbol: String,
    /// Number of fractional digits amounts of this asset may carry
    pub decimals: u32,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        Ok(())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Ordered (base, quote) pair, e.g. ETHBTC: quantities in ETH, prices in BTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub symbol: String,
    pub base: Asset,
    pub quote: Asset,
}

impl AssetPair {
    /// Build a pair whose symbol is the concatenation of both tickers.
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self {
            symbol: format!("{}{}", base.symbol, quote.symbol),
            base,
            quote,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        self.base.validate()?;
        self.quote.validate()?;
        if self.base.symbol == self.quote.symbol {
            return Err(ConfigError::Malformed(format!(
                "pair {} trades an asset against itself",
                self.symbol
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_symbol() {
        let pair = AssetPair::new(Asset::new("ETH", 18), Asset::new("BTC", 8));
        assert_eq!(pair.symbol, "ETHBTC");
        assert!(pair.validate().is_ok());
    }

    #[test]
    fn test_pair_validation() {
        let pair = AssetPair::new(Asset::new("BTC", 8), Asset::new("BTC", 8));
        assert!(pair.validate().is_err());

        let empty = Asset::new(" ", 8);
        assert_eq!(empty.validate(), Err(ConfigError::EmptySymbol));
    }
}
