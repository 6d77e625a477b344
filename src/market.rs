//! Market data sources
//!
//! The protocol accounts (markets, trade history, funding rate history) are
//! read through [`MarketDataSource`]. Talking to the chain and decoding the
//! accounts is left to the protocol SDK; [`SnapshotSource`] consumes the JSON
//! dump that tooling produces.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::types::{FundingRateRecord, Market, MarketMeta, TradeRecord};

/// Listed perpetual markets: (market_index, symbol, base_asset_symbol).
///
/// Position in this table matches the market's slot in the on-chain markets array.
pub const MARKETS: &[(u64, &str, &str)] = &[
    (0, "SOL-PERP", "SOL"),
    (1, "BTC-PERP", "BTC"),
    (2, "ETH-PERP", "ETH"),
    (3, "LUNA-PERP", "LUNA"),
    (4, "AVAX-PERP", "AVAX"),
    (5, "BNB-PERP", "BNB"),
    (6, "MATIC-PERP", "MATIC"),
    (7, "ATOM-PERP", "ATOM"),
    (8, "DOT-PERP", "DOT"),
    (9, "ADA-PERP", "ADA"),
    (10, "ALGO-PERP", "ALGO"),
    (11, "FTT-PERP", "FTT"),
    (12, "LTC-PERP", "LTC"),
];

pub fn market_metadata() -> Vec<MarketMeta> {
    MARKETS
        .iter()
        .map(|&(market_index, symbol, base)| MarketMeta {
            symbol: symbol.to_string(),
            base_asset_symbol: base.to_string(),
            market_index,
        })
        .collect()
}

/// Read access to the protocol's market state and history
pub trait MarketDataSource {
    /// All market slots in on-chain order, including uninitialized ones
    fn markets(&self) -> Result<Vec<Market>>;

    fn trade_history(&self) -> Result<Vec<TradeRecord>>;

    fn funding_rate_history(&self) -> Result<Vec<FundingRateRecord>>;
}

/// Account snapshot loaded from a JSON file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotSource {
    #[serde(default)]
    markets: Vec<Market>,
    #[serde(default)]
    trade_records: Vec<TradeRecord>,
    #[serde(default)]
    funding_rate_records: Vec<FundingRateRecord>,
}

impl SnapshotSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;

        info!(
            "Loaded snapshot {}: {} markets, {} trades, {} funding records",
            path.display(),
            snapshot.markets.len(),
            snapshot.trade_records.len(),
            snapshot.funding_rate_records.len()
        );
        Ok(snapshot)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn new(
        markets: Vec<Market>,
        trade_records: Vec<TradeRecord>,
        funding_rate_records: Vec<FundingRateRecord>,
    ) -> Self {
        Self {
            markets,
            trade_records,
            funding_rate_records,
        }
    }
}

impl MarketDataSource for SnapshotSource {
    fn markets(&self) -> Result<Vec<Market>> {
        Ok(self.markets.clone())
    }

    fn trade_history(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.trade_records.clone())
    }

    fn funding_rate_history(&self) -> Result<Vec<FundingRateRecord>> {
        Ok(self.funding_rate_records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_indices_match_positions() {
        for (position, meta) in market_metadata().iter().enumerate() {
            assert_eq!(meta.market_index, position as u64);
            assert!(meta.symbol.starts_with(&meta.base_asset_symbol));
        }
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "markets": [
                {"initialized": true, "base_asset_amount_long": "1000", "base_asset_amount_short": "-500"},
                {"initialized": false}
            ],
            "trade_records": [
                {"ts": 1647734400, "direction": "long", "fee": 1500, "market_index": 0}
            ],
            "funding_rate_records": [
                {"ts": 1647734400, "market_index": 0, "oracle_price_twap": "1000", "mark_price_twap": "1010"}
            ]
        }"#;
        let source = SnapshotSource::from_json(json).unwrap();

        assert_eq!(source.markets().unwrap().len(), 2);
        assert_eq!(source.trade_history().unwrap()[0].fee, 1500);
        assert_eq!(source.funding_rate_history().unwrap()[0].mark_price_twap, 1010);
    }

    #[test]
    fn test_snapshot_missing_file_is_an_error() {
        let err = SnapshotSource::from_file("does/not/exist.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read snapshot"));
    }
}
