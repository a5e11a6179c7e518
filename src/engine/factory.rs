// ============================================================================
// Order Book Factory
// Resolves the exchange's matching algorithm and builds per-book engines
// ============================================================================

use crate::domain::{AssetPair, EngineConfig, Exchange, MatchingAlgorithmType, Order, OrderBook};
use crate::engine::{MatchingEngine, MerchantMatching, OtcMatching, StandardMatching};
use crate::errors::{ConfigError, MatchingError};
use crate::interfaces::{EventHandler, MatchOutcome, MatchingAlgorithm};
use std::sync::Arc;

// ============================================================================
// Matcher
// ============================================================================

/// Closed set of matching algorithms, selected once per book
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    Standard(StandardMatching),
    Merchant(MerchantMatching),
    Otc(OtcMatching),
}

impl Matcher {
    pub fn from_type(algorithm: MatchingAlgorithmType) -> Self {
        match algorithm {
            MatchingAlgorithmType::Standard => Matcher::Standard(StandardMatching),
            MatchingAlgorithmType::Merchant => Matcher::Merchant(MerchantMatching),
            MatchingAlgorithmType::Otc => Matcher::Otc(OtcMatching),
        }
    }

    fn inner(&self) -> &dyn MatchingAlgorithm {
        match self {
            Matcher::Standard(algo) => algo,
            Matcher::Merchant(algo) => algo,
            Matcher::Otc(algo) => algo,
        }
    }
}

impl MatchingAlgorithm for Matcher {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn can_match(&self, a: &Order, b: &Order) -> bool {
        self.inner().can_match(a, b)
    }

    fn submit(&self, book: &mut OrderBook, order: Order) -> Result<MatchOutcome, MatchingError> {
        self.inner().submit(book, order)
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Creates the matching engine for one pair of an exchange
///
/// # Example
/// ```
/// use swap_clearing_engine::prelude::*;
/// use swap_clearing_engine::engine::factory::create_from_exchange;
/// use std::sync::Arc;
///
/// let exchange = Exchange::new("x1", "SWAP", "Swap Venue", MatchingAlgorithmType::Standard)
///     .with_pair(AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)));
/// let engine = create_from_exchange(
///     &exchange,
///     "ETHBTC",
///     &EngineConfig::default(),
///     Arc::new(NoOpEventHandler),
/// )
/// .unwrap();
/// assert_eq!(engine.algorithm_name(), "standard");
/// ```
pub fn create_from_exchange(
    exchange: &Exchange,
    pair: &str,
    config: &EngineConfig,
    event_handler: Arc<dyn EventHandler>,
) -> Result<MatchingEngine, ConfigError> {
    exchange.validate()?;
    config.validate()?;

    let pair = exchange.pair(pair).ok_or_else(|| ConfigError::UnknownAsset {
        asset: pair.to_string(),
        context: format!("exchange {}", exchange.id),
    })?;

    Ok(MatchingEngine::new(
        OrderBook::new(exchange.id.clone(), pair.clone()),
        Matcher::from_type(exchange.matching_algorithm),
        event_handler,
        config.snapshot_depth,
    ))
}

/// Creates one matching engine per asset pair of the exchange
pub fn create_for_exchange(
    exchange: &Exchange,
    config: &EngineConfig,
    event_handler: Arc<dyn EventHandler>,
) -> Result<Vec<MatchingEngine>, ConfigError> {
    exchange
        .asset_pairs
        .iter()
        .map(|pair| create_from_exchange(exchange, &pair.symbol, config, Arc::clone(&event_handler)))
        .collect()
}

// ============================================================================
// Builder Pattern
// ============================================================================

/// Builder for standalone matching engines
///
/// # Example
/// ```
/// use swap_clearing_engine::prelude::*;
/// use swap_clearing_engine::engine::factory::MatchingEngineBuilder;
/// use std::sync::Arc;
///
/// let engine = MatchingEngineBuilder::new(
///     "x1",
///     AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)),
/// )
/// .otc_matching()
/// .with_snapshot_depth(5)
/// .build(Arc::new(NoOpEventHandler))
/// .unwrap();
/// assert_eq!(engine.algorithm_name(), "otc");
/// ```
pub struct MatchingEngineBuilder {
    exchange_id: String,
    pair: AssetPair,
    algorithm: MatchingAlgorithmType,
    snapshot_depth: usize,
}

impl MatchingEngineBuilder {
    pub fn new(exchange_id: impl Into<String>, pair: AssetPair) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            pair,
            algorithm: MatchingAlgorithmType::Standard,
            snapshot_depth: EngineConfig::default().snapshot_depth,
        }
    }

    // ========================================================================
    // Matching Algorithm Configuration
    // ========================================================================

    pub fn standard_matching(mut self) -> Self {
        self.algorithm = MatchingAlgorithmType::Standard;
        self
    }

    pub fn merchant_matching(mut self) -> Self {
        self.algorithm = MatchingAlgorithmType::Merchant;
        self
    }

    pub fn otc_matching(mut self) -> Self {
        self.algorithm = MatchingAlgorithmType::Otc;
        self
    }

    /// Parse the algorithm from its persisted tag
    pub fn with_algorithm_tag(mut self, tag: &str) -> Result<Self, ConfigError> {
        self.algorithm = tag.parse()?;
        Ok(self)
    }

    // ========================================================================
    // Additional Configuration
    // ========================================================================

    pub fn with_snapshot_depth(mut self, depth: usize) -> Self {
        self.snapshot_depth = depth;
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    pub fn build(self, event_handler: Arc<dyn EventHandler>) -> Result<MatchingEngine, ConfigError> {
        if self.exchange_id.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        self.pair.validate()?;
        if self.snapshot_depth == 0 {
            return Err(ConfigError::InvalidEngineConfig(
                "snapshot_depth must be positive".to_string(),
            ));
        }

        Ok(MatchingEngine::new(
            OrderBook::new(self.exchange_id, self.pair),
            Matcher::from_type(self.algorithm),
            event_handler,
            self.snapshot_depth,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Asset;
    use crate::interfaces::NoOpEventHandler;

    fn pair() -> AssetPair {
        AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8))
    }

    fn exchange(algorithm: MatchingAlgorithmType) -> Exchange {
        Exchange::new("x1", "SWAP", "Swap Venue", algorithm)
            .with_pair(pair())
            .with_pair(AssetPair::new(Asset::new("LTC", 8), Asset::new("BTC", 8)))
    }

    #[test]
    fn test_matcher_resolution() {
        assert_eq!(Matcher::from_type(MatchingAlgorithmType::Standard).name(), "standard");
        assert_eq!(Matcher::from_type(MatchingAlgorithmType::Merchant).name(), "merchant");
        assert_eq!(Matcher::from_type(MatchingAlgorithmType::Otc).name(), "otc");
    }

    #[test]
    fn test_create_for_exchange() {
        let engines = create_for_exchange(
            &exchange(MatchingAlgorithmType::Merchant),
            &EngineConfig::default(),
            Arc::new(NoOpEventHandler),
        )
        .unwrap();

        assert_eq!(engines.len(), 2);
        assert!(engines.iter().all(|engine| engine.algorithm_name() == "merchant"));
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let result = create_from_exchange(
            &exchange(MatchingAlgorithmType::Standard),
            "XRPBTC",
            &EngineConfig::default(),
            Arc::new(NoOpEventHandler),
        );
        assert!(matches!(result, Err(ConfigError::UnknownAsset { .. })));
    }

    #[test]
    fn test_builder_rejects_unknown_tag() {
        let result = MatchingEngineBuilder::new("x1", pair()).with_algorithm_tag("pro-rata");
        assert!(matches!(result, Err(ConfigError::UnsupportedAlgorithm(_))));

        let engine = MatchingEngineBuilder::new("x1", pair())
            .with_algorithm_tag("OTC")
            .unwrap()
            .build(Arc::new(NoOpEventHandler))
            .unwrap();
        assert_eq!(engine.algorithm_name(), "otc");
    }

    #[test]
    fn test_builder_presets() {
        let engine = MatchingEngineBuilder::new("x1", pair())
            .merchant_matching()
            .build(Arc::new(NoOpEventHandler))
            .unwrap();
        assert_eq!(engine.algorithm_name(), "merchant");

        let result = MatchingEngineBuilder::new("x1", pair())
            .with_snapshot_depth(0)
            .build(Arc::new(NoOpEventHandler));
        assert!(matches!(result, Err(ConfigError::InvalidEngineConfig(_))));
    }
}
