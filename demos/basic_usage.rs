// ============================================================================
// Basic Usage Example
// One trade from order entry to a completed atomic swap
// ============================================================================

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use swap_clearing_engine::prelude::*;

async fn wait_for(venue: &TradingVenue, id: SettlementId, state: SettlementState) -> Settlement {
    loop {
        let settlement = venue.get_settlement(id).await.expect("settlement exists");
        if settlement.state() == state {
            return settlement;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), VenueError> {
    #[cfg(feature = "logging")]
    swap_clearing_engine::utils::setup_logger();

    println!("=== Swap Clearing Engine Example ===\n");

    let exchange = Exchange::new("x1", "SWAP", "Swap Venue", MatchingAlgorithmType::Standard)
        .with_pair(AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)))
        .with_commission(Decimal::new(25, 2));
    let persistence = Arc::new(InMemoryPersistence::new().with_exchange(exchange));

    // simulated ledgers; confirmations are driven by hand below
    let eth = Arc::new(InMemoryLedger::new("ETH"));
    let btc = Arc::new(InMemoryLedger::new("BTC"));
    let ledgers = LedgerRegistry::new()
        .with_service(eth.clone())
        .with_service(btc.clone());

    let venue = TradingVenue::start(
        persistence,
        ledgers,
        Arc::new(LoggingEventHandler),
        EngineConfig::fast(),
    )
    .await?;
    println!("Venue started for ETHBTC\n");

    // Add sell orders at different prices
    println!("Adding sell orders...");
    for i in 0..5 {
        let price = Decimal::new(500 + i, 4);
        venue
            .submit_order(Quote::limit("x1", "ETHBTC", format!("seller_{}", i), Side::Sell, price, Decimal::ONE))
            .await?;
    }

    // Add buy orders
    println!("Adding buy orders...");
    for i in 0..5 {
        let price = Decimal::new(499 - i, 4);
        venue
            .submit_order(Quote::limit("x1", "ETHBTC", format!("buyer_{}", i), Side::Buy, price, Decimal::ONE))
            .await?;
    }

    println!("\n=== Order Book Snapshot ===");
    let snapshot = venue.get_book("x1", "ETHBTC").await?;
    println!("\nBids:");
    for level in &snapshot.bids {
        println!("  {} @ {}", level.quantity, level.price);
    }
    println!("\nAsks:");
    for level in &snapshot.asks {
        println!("  {} @ {}", level.quantity, level.price);
    }
    println!("\nSpread: {:?}", snapshot.spread);

    // Cross the spread
    println!("\n=== Crossing the spread ===");
    let result = venue
        .submit_order(Quote::limit("x1", "ETHBTC", "aggressive_buyer", Side::Buy, Decimal::new(500, 4), Decimal::ONE))
        .await?;
    let trade = &result.trades[0];
    println!("Trade: {} ETH @ {} BTC", trade.quantity, trade.price);

    // Settle the trade
    let id = trade.settlement_id;
    println!("\n=== Settling {} ===", id);

    let settlement = venue
        .settle(id, ChannelType::Initiate, Some("sha256(secret)".to_string()))
        .await?;
    println!(
        "Initiator {} locked {} ETH (commission {})",
        settlement.initiator_id, settlement.initiate_channel.amount, settlement.initiate_channel.commission
    );
    if let Some(hash) = &settlement.initiate_channel.tx_contract.hash {
        eth.confirm(hash);
    }
    wait_for(&venue, id, SettlementState::ParticipateSetupAwaiting).await;

    let settlement = venue.settle(id, ChannelType::Participate, None).await?;
    println!(
        "Participant {} locked {} BTC",
        settlement.participant_id, settlement.participate_channel.amount
    );
    if let Some(hash) = &settlement.participate_channel.tx_contract.hash {
        btc.confirm(hash);
    }
    wait_for(&venue, id, SettlementState::InitiateRedeemAwaiting).await;

    let settlement = venue
        .redeem(id, ChannelType::Initiate, Some("secret".to_string()))
        .await?;
    if let Some(hash) = &settlement.initiate_channel.tx_redeem.hash {
        eth.confirm(hash);
    }
    wait_for(&venue, id, SettlementState::InitiateRedeemDone).await;

    let settlement = venue.redeem(id, ChannelType::Participate, None).await?;
    if let Some(hash) = &settlement.participate_channel.tx_redeem.hash {
        btc.confirm(hash);
    }
    let settlement = wait_for(&venue, id, SettlementState::ParticipateRedeemDone).await;

    println!("\nSettlement history:");
    for record in settlement.history() {
        println!("  {:?} at {}", record.state, record.at);
    }

    venue.shutdown().await;
    println!("\n=== Example Complete ===");
    Ok(())
}
