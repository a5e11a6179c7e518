// ============================================================================
// Settlement Channel
// One leg of the two-leg atomic swap
// ============================================================================

use super::{Transaction, TxType};
use crate::numeric::Quantity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Initiate,
    Participate,
}

impl ChannelType {
    pub fn other(&self) -> ChannelType {
        match self {
            ChannelType::Initiate => ChannelType::Participate,
            ChannelType::Participate => ChannelType::Initiate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_type: ChannelType,
    pub asset: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Quantity,
    pub commission: Quantity,
    /// HTLC lock time in seconds
    pub timeout: u64,
    /// Hash of the swap secret, set once known
    pub secret_hash: Option<String>,
    pub tx_contract: Transaction,
    pub tx_redeem: Transaction,
    pub tx_refund: Transaction,
}

impl Channel {
    pub fn new(
        channel_type: ChannelType,
        asset: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        amount: Quantity,
        commission: Quantity,
        timeout: u64,
    ) -> Self {
        let asset = asset.into();
        Self {
            channel_type,
            from_address: from_address.into(),
            to_address: to_address.into(),
            amount,
            commission,
            timeout,
            secret_hash: None,
            tx_contract: Transaction::new(asset.clone(), TxType::Contract),
            tx_redeem: Transaction::new(asset.clone(), TxType::Redeem),
            tx_refund: Transaction::new(asset.clone(), TxType::Refund),
            asset,
        }
    }

    pub fn tx(&self, tx_type: TxType) -> &Transaction {
        match tx_type {
            TxType::Contract => &self.tx_contract,
            TxType::Redeem => &self.tx_redeem,
            TxType::Refund => &self.tx_refund,
        }
    }

    pub fn tx_mut(&mut self, tx_type: TxType) -> &mut Transaction {
        match tx_type {
            TxType::Contract => &mut self.tx_contract,
            TxType::Redeem => &mut self.tx_redeem,
            TxType::Refund => &mut self.tx_refund,
        }
    }

    pub fn transactions(&self) -> [&Transaction; 3] {
        [&self.tx_contract, &self.tx_redeem, &self.tx_refund]
    }

    /// Which of this channel's transactions carries `hash`.
    pub fn tx_type_of(&self, hash: &str) -> Option<TxType> {
        self.transactions()
            .into_iter()
            .find(|tx| tx.hash.as_deref() == Some(hash))
            .map(|tx| tx.tx_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tx_lookup_by_hash() {
        let mut channel = Channel::new(
            ChannelType::Initiate,
            "ETH",
            "seller-send",
            "buyer-receive",
            dec!(4),
            dec!(0.01),
            3600,
        );
        channel.tx_mut(TxType::Redeem).broadcast("0xabc", Utc::now());

        assert_eq!(channel.tx_type_of("0xabc"), Some(TxType::Redeem));
        assert_eq!(channel.tx_type_of("0xdef"), None);
        assert_eq!(channel.tx(TxType::Redeem).asset, "ETH");
    }
}
