//! Core data types shared by the reporting and export flows

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Transfers
// =============================================================================

/// Direction of a token balance change for the tracked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    #[serde(rename = "inc", alias = "in")]
    Inc,
    #[serde(rename = "dec", alias = "out")]
    Dec,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Inc => write!(f, "inc"),
            ChangeType::Dec => write!(f, "dec"),
        }
    }
}

/// One SPL token transfer touching a tracked account.
///
/// Field names follow the indexing API so the same struct decodes API pages
/// and round-trips through the exported CSV. Any other keys in an API record
/// are dropped on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Token account the balance change happened on
    pub address: String,
    #[serde(rename = "changeType")]
    pub change_type: ChangeType,
    /// Raw integer amount, not scaled by `decimals`. SPL amounts are u64, so
    /// this is wider than i64 to keep the sign some indexers attach.
    #[serde(
        rename = "changeAmount",
        serialize_with = "raw_int::serialize",
        deserialize_with = "raw_int::deserialize"
    )]
    pub change_amount: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub decimals: u32,
    /// Empty for mints the indexer has no metadata for (missing or null)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub symbol: String,
    /// Seconds since the unix epoch
    #[serde(rename = "blockTime", deserialize_with = "raw_int::deserialize")]
    pub block_time: i64,
    /// Token mint
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    /// Provider-assigned record id
    #[serde(rename = "_id")]
    pub id: String,
}

impl TransferRecord {
    /// Amount in token units, i.e. `change_amount / 10^decimals`
    pub fn ui_amount(&self) -> Decimal {
        scale_raw(self.change_amount, self.decimals)
    }

    /// Signed UI amount: positive for inflows, negative for outflows
    pub fn signed_ui_amount(&self) -> Decimal {
        let amount = self.ui_amount().abs();
        match self.change_type {
            ChangeType::Inc => amount,
            ChangeType::Dec => -amount,
        }
    }

    pub fn block_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.block_time, 0)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Scale a raw on-chain integer by `10^decimals`.
///
/// Falls back to `f64` when the value does not fit a `Decimal` mantissa.
pub fn scale_raw(raw: i128, decimals: u32) -> Decimal {
    match Decimal::try_from_i128_with_scale(raw, decimals) {
        Ok(d) => d.normalize(),
        Err(_) => {
            let value = raw as f64 / 10f64.powi(decimals as i32);
            Decimal::try_from(value).unwrap_or_default()
        }
    }
}

// =============================================================================
// Market data
// =============================================================================

/// Static listing info for a perpetual market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMeta {
    pub symbol: String,
    pub base_asset_symbol: String,
    pub market_index: u64,
}

/// Automated market maker state of a market
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Amm {
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub base_asset_reserve: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub quote_asset_reserve: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub peg_multiplier: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub cumulative_funding_rate_long: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub cumulative_funding_rate_short: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub last_funding_rate: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub last_funding_rate_ts: i64,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub funding_period: i64,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub last_oracle_price_twap: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub last_mark_price_twap: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub total_fee: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub total_fee_minus_distributions: u128,
}

/// On-chain market account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Market {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub base_asset_amount_long: i128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub base_asset_amount_short: i128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub base_asset_amount: i128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub open_interest: u128,
    #[serde(default)]
    pub amm: Amm,
}

/// Side of a perpetual trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "Long")]
    Long,
    #[serde(alias = "Short")]
    Short,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fill recorded in the trade history account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub ts: i64,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub record_id: u128,
    #[serde(default)]
    pub user_authority: String,
    pub direction: Direction,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub base_asset_amount: u128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub quote_asset_amount: u128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub mark_price_before: u128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub mark_price_after: u128,
    /// Fee paid in quote (USDC) base units
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub fee: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub market_index: u64,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub oracle_price: i128,
}

/// Entry of the funding rate history account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRateRecord {
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub ts: i64,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub record_id: u128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub market_index: u64,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub funding_rate: i128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub cumulative_funding_rate_long: i128,
    #[serde(default, deserialize_with = "raw_int::deserialize")]
    pub cumulative_funding_rate_short: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub oracle_price_twap: i128,
    #[serde(deserialize_with = "raw_int::deserialize")]
    pub mark_price_twap: u128,
}

/// Convert a unix timestamp (seconds) to UTC, clamping invalid values to the epoch
pub fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

// =============================================================================
// Raw integer decoding
// =============================================================================

/// Integers that arrive either as JSON numbers or as decimal strings.
///
/// On-chain u128/i128 fields are usually serialized as strings by RPC
/// tooling, while small fields come through as plain numbers.
pub mod raw_int {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    struct RawInt;

    impl<'de> Visitor<'de> for RawInt {
        type Value = i128;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer or a string holding an integer")
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v as i128)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v as i128)
        }

        fn visit_i128<E>(self, v: i128) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v)
        }

        fn visit_u128<E>(self, v: u128) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            i128::try_from(v).map_err(|_| E::custom(format!("integer {} out of range", v)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.fract() == 0.0 && v.is_finite() {
                Ok(v as i128)
            } else {
                Err(E::custom(format!("expected an integer, got {}", v)))
            }
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            v.trim()
                .parse::<i128>()
                .map_err(|_| E::custom(format!("invalid integer string: {:?}", v)))
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_str(&v)
        }
    }

    /// Written as a decimal string so 128-bit values survive any serializer
    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: fmt::Display,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i128>,
    {
        let value = deserializer.deserialize_any(RawInt)?;
        T::try_from(value)
            .map_err(|_| de::Error::custom(format!("integer {} out of range", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_transfer() -> TransferRecord {
        TransferRecord {
            address: "9xQe".to_string(),
            change_type: ChangeType::Dec,
            change_amount: 1_250_000,
            decimals: 6,
            symbol: "USDC".to_string(),
            block_time: 1_647_734_400,
            token_address: "EPjF".to_string(),
            id: "abc123".to_string(),
        }
    }

    #[test]
    fn test_ui_amount_scales_by_decimals() {
        let transfer = sample_transfer();
        assert_eq!(transfer.ui_amount(), dec!(1.25));
        assert_eq!(transfer.signed_ui_amount(), dec!(-1.25));
    }

    #[test]
    fn test_decode_api_record_with_string_amount() {
        let json = r#"{
            "address": "9xQe",
            "changeType": "inc",
            "changeAmount": "500",
            "decimals": 2,
            "symbol": "RAY",
            "blockTime": 1647734400,
            "tokenAddress": "4k3D",
            "_id": "id-1",
            "fee": 5000,
            "signature": ["sig"]
        }"#;
        let transfer: TransferRecord = serde_json::from_str(json).unwrap();
        assert_eq!(transfer.change_type, ChangeType::Inc);
        assert_eq!(transfer.change_amount, 500);
        assert_eq!(transfer.ui_amount(), dec!(5));
        assert_eq!(
            transfer.block_datetime().unwrap().format("%Y-%m-%d").to_string(),
            "2022-03-20"
        );
    }

    #[test]
    fn test_decode_amount_above_i64() {
        let json = r#"{"address":"a","changeType":"inc","changeAmount":"18000000000000000000",
            "decimals":9,"symbol":"BONK","blockTime":1,"tokenAddress":"m","_id":"x"}"#;
        let transfer: TransferRecord = serde_json::from_str(json).unwrap();
        assert_eq!(transfer.change_amount, 18_000_000_000_000_000_000);
        assert_eq!(transfer.ui_amount(), dec!(18000000000));
    }

    #[test]
    fn test_decode_null_symbol_as_empty() {
        let json = r#"{"address":"a","changeType":"dec","changeAmount":7,"decimals":0,
            "symbol":null,"blockTime":1,"tokenAddress":"m","_id":"x"}"#;
        let transfer: TransferRecord = serde_json::from_str(json).unwrap();
        assert_eq!(transfer.symbol, "");
        assert_eq!(transfer.signed_ui_amount(), dec!(-7));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let json = r#"{"address": "a", "changeType": "inc", "changeAmount": 1}"#;
        assert!(serde_json::from_str::<TransferRecord>(json).is_err());
    }

    #[test]
    fn test_market_accepts_string_and_number_integers() {
        let json = r#"{
            "initialized": true,
            "base_asset_amount_long": "340282366920938463463374607431",
            "base_asset_amount_short": -1200,
            "amm": { "last_mark_price_twap": 1000000000, "funding_period": 3600 }
        }"#;
        let market: Market = serde_json::from_str(json).unwrap();
        assert_eq!(market.base_asset_amount_long, 340_282_366_920_938_463_463_374_607_431);
        assert_eq!(market.base_asset_amount_short, -1200);
        assert_eq!(market.amm.funding_period, 3600);
        assert_eq!(market.amm.total_fee, 0);
    }

    #[test]
    fn test_direction_aliases() {
        let d: Direction = serde_json::from_str(r#""Long""#).unwrap();
        assert_eq!(d, Direction::Long);
        let d: Direction = serde_json::from_str(r#""short""#).unwrap();
        assert_eq!(d.label(), "short");
    }

    #[test]
    fn test_scale_raw_large_value_falls_back() {
        // 10^30 does not fit the 96-bit mantissa, 10^24 does
        let scaled = scale_raw(10i128.pow(30), 6);
        assert!(scaled > Decimal::ZERO);
        assert!(scaled > Decimal::from(10i64.pow(18)));
    }
}
