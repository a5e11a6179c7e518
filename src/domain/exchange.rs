// ============================================================================
// Exchange Configuration
// Venue parameters: supported instruments, commission, HTLC timeouts and
// the matching algorithm used by every book of the exchange
// ============================================================================

use super::{Asset, AssetPair};
use crate::errors::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Matching Algorithm Type
// ============================================================================

/// Defines the matching algorithm used for every book of an exchange.
///
/// Persisted as a lowercase tag. Any other tag is rejected while the exchange
/// document is loaded, never at matching time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MatchingAlgorithmType {
    /// Price/time priority with the base compatibility rules
    Standard,

    /// Standard descent, but every match pairs one merchant order with one
    /// retail order
    Merchant,

    /// Over-the-counter: make orders rest untouched, take orders address a
    /// make order by id and must match it exactly
    Otc,
}

impl MatchingAlgorithmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingAlgorithmType::Standard => "standard",
            MatchingAlgorithmType::Merchant => "merchant",
            MatchingAlgorithmType::Otc => "otc",
        }
    }
}

impl FromStr for MatchingAlgorithmType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(MatchingAlgorithmType::Standard),
            "merchant" => Ok(MatchingAlgorithmType::Merchant),
            "otc" => Ok(MatchingAlgorithmType::Otc),
            _ => Err(ConfigError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for MatchingAlgorithmType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MatchingAlgorithmType> for String {
    fn from(value: MatchingAlgorithmType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MatchingAlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// HTLC Timeouts
// ============================================================================

/// Lock times of the two swap contracts, in seconds.
///
/// `initiate` is the lock time of the initiator's contract and must exceed
/// `participate` so that the initiator cannot refund before the participant
/// has had the chance to redeem. `participate_effective` bounds how long each
/// setup step may take before the settlement times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcTimeouts {
    pub initiate: u64,
    pub participate: u64,
    pub participate_effective: u64,
}

impl HtlcTimeouts {
    pub fn new(initiate: u64, participate: u64, participate_effective: u64) -> Self {
        Self {
            initiate,
            participate,
            participate_effective,
        }
    }

    pub fn initiate_duration(&self) -> chrono::Duration {
        seconds(self.initiate)
    }

    pub fn participate_duration(&self) -> chrono::Duration {
        seconds(self.participate)
    }

    pub fn participate_effective_duration(&self) -> chrono::Duration {
        seconds(self.participate_effective)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initiate == 0 || self.participate == 0 || self.participate_effective == 0 {
            return Err(ConfigError::InvalidTimeouts(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.participate >= self.initiate {
            return Err(ConfigError::InvalidTimeouts(format!(
                "participate ({}s) must be shorter than initiate ({}s)",
                self.participate, self.initiate
            )));
        }
        if self.participate_effective > self.participate {
            return Err(ConfigError::InvalidTimeouts(format!(
                "participate_effective ({}s) exceeds participate ({}s)",
                self.participate_effective, self.participate
            )));
        }
        Ok(())
    }
}

impl Default for HtlcTimeouts {
    /// 48h / 24h / 12h
    fn default() -> Self {
        Self::new(48 * 3600, 24 * 3600, 12 * 3600)
    }
}

// chrono::Duration::seconds panics past this bound
const MAX_TIMEOUT_SECS: u64 = (i64::MAX / 1_000) as u64;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_TIMEOUT_SECS) as i64)
}

// ============================================================================
// Exchange
// ============================================================================

/// Process-wide venue description, loaded once from persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub assets: Vec<Asset>,
    pub asset_pairs: Vec<AssetPair>,
    /// Commission percentage charged on each settlement channel (0.25 = 0.25%)
    pub commission: Decimal,
    pub timeouts: HtlcTimeouts,
    pub matching_algorithm: MatchingAlgorithmType,
}

impl Exchange {
    /// Create an exchange with no instruments, zero commission and default timeouts
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        matching_algorithm: MatchingAlgorithmType,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            assets: Vec::new(),
            asset_pairs: Vec::new(),
            commission: Decimal::ZERO,
            timeouts: HtlcTimeouts::default(),
            matching_algorithm,
        }
    }

    /// Builder method: add a supported asset
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Builder method: add a pair, registering its assets if missing
    pub fn with_pair(mut self, pair: AssetPair) -> Self {
        for asset in [&pair.base, &pair.quote] {
            if self.asset(&asset.symbol).is_none() {
                self.assets.push(asset.clone());
            }
        }
        self.asset_pairs.push(pair);
        self
    }

    /// Builder method: set the commission percentage
    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission = commission;
        self
    }

    /// Builder method: set HTLC timeouts
    pub fn with_timeouts(mut self, timeouts: HtlcTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn asset(&self, symbol: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.symbol == symbol)
    }

    pub fn pair(&self, symbol: &str) -> Option<&AssetPair> {
        self.asset_pairs.iter().find(|pair| pair.symbol == symbol)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }

        for asset in &self.assets {
            asset.validate()?;
        }

        for pair in &self.asset_pairs {
            pair.validate()?;
            for asset in [&pair.base, &pair.quote] {
                if self.asset(&asset.symbol) != Some(asset) {
                    return Err(ConfigError::UnknownAsset {
                        asset: asset.symbol.clone(),
                        context: format!("pair {} on exchange {}", pair.symbol, self.id),
                    });
                }
            }
        }

        if self.commission < Decimal::ZERO || self.commission >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::InvalidCommission(self.commission.to_string()));
        }

        self.timeouts.validate()
    }
}
