//! Market report computations
//!
//! Joins on-chain market state with the static listing table and derives the
//! series behind each chart: long/short ratio, cumulative fees, fees per
//! market and the hourly funding rate implied by mark vs oracle TWAP.

use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::market::MarketDataSource;
use crate::types::{scale_raw, ts_to_datetime, FundingRateRecord, Market, MarketMeta, TradeRecord};

/// Funding is paid hourly; TWAP spread is quoted per day
const FUNDING_PERIODS_PER_DAY: f64 = 24.0;

// =============================================================================
// Rows
// =============================================================================

/// A listed market joined with its on-chain account
#[derive(Debug, Clone)]
pub struct MarketSummary {
    pub market_index: u64,
    pub symbol: String,
    pub base_asset_symbol: String,
    pub market: Market,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongShortRatio {
    pub symbol: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeePoint {
    pub ts: DateTime<Utc>,
    /// Fees collected up to and including this trade, in quote units
    pub cumulative: Decimal,
    /// Change from the previous point; `None` for the first trade
    pub delta: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketFees {
    pub symbol: String,
    pub market_index: u64,
    pub fee: Decimal,
}

/// Funding rate (percent per hour) over time, keyed by market symbol
pub type FundingSeries = BTreeMap<String, Vec<(DateTime<Utc>, f64)>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FundingStats {
    pub symbol: String,
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

// =============================================================================
// Transformations
// =============================================================================

/// Pair each on-chain market slot with the listing at the same position.
///
/// Slots with no listing have no symbol and are dropped.
pub fn build_market_summary(metadata: &[MarketMeta], markets: &[Market]) -> Vec<MarketSummary> {
    if markets.len() > metadata.len() {
        debug!(
            "Dropping {} market slots without a listed symbol",
            markets.len() - metadata.len()
        );
    }

    metadata
        .iter()
        .zip(markets.iter())
        .map(|(meta, market)| MarketSummary {
            market_index: meta.market_index,
            symbol: meta.symbol.clone(),
            base_asset_symbol: meta.base_asset_symbol.clone(),
            market: market.clone(),
        })
        .collect()
}

/// `|long| / |short|` base asset amounts per market; markets with no short
/// open interest have no ratio and are skipped.
pub fn long_short_ratios(summary: &[MarketSummary]) -> Vec<LongShortRatio> {
    summary
        .iter()
        .filter_map(|row| {
            let long = row.market.base_asset_amount_long.unsigned_abs() as f64;
            let short = row.market.base_asset_amount_short.unsigned_abs() as f64;
            if short == 0.0 {
                warn!("{}: no short open interest, skipping long/short ratio", row.symbol);
                return None;
            }
            Some(LongShortRatio {
                symbol: row.symbol.clone(),
                ratio: long / short,
            })
        })
        .collect()
}

/// Trades in ascending time order (stable for equal timestamps)
pub fn trade_history(mut records: Vec<TradeRecord>) -> Vec<TradeRecord> {
    records.sort_by_key(|t| t.ts);
    records
}

/// Running fee total over time-ordered trades, scaled to quote units
pub fn cumulative_fees(trades: &[TradeRecord], quote_decimals: u32) -> Vec<FeePoint> {
    let mut running: u128 = 0;
    let mut previous: Option<Decimal> = None;

    trades
        .iter()
        .map(|trade| {
            running = running.saturating_add(trade.fee);
            let cumulative = scale_raw(running.min(i128::MAX as u128) as i128, quote_decimals);
            let delta = previous.map(|p| cumulative - p);
            previous = Some(cumulative);
            FeePoint {
                ts: ts_to_datetime(trade.ts),
                cumulative,
                delta,
            }
        })
        .collect()
}

/// Total fees per listed market; markets without trades are left out
pub fn fee_breakdown(
    summary: &[MarketSummary],
    trades: &[TradeRecord],
    quote_decimals: u32,
) -> Vec<MarketFees> {
    let mut totals: HashMap<u64, u128> = HashMap::new();
    for trade in trades {
        *totals.entry(trade.market_index).or_default() += trade.fee;
    }

    summary
        .iter()
        .filter_map(|row| {
            totals.get(&row.market_index).map(|&raw| MarketFees {
                symbol: row.symbol.clone(),
                market_index: row.market_index,
                fee: scale_raw(raw.min(i128::MAX as u128) as i128, quote_decimals),
            })
        })
        .collect()
}

/// Hourly funding rate in percent implied by the TWAP spread:
/// `100 * (1/24) * (mark_twap - oracle_twap) / oracle_twap`
pub fn calc_funding_rate(record: &FundingRateRecord) -> Option<f64> {
    if record.oracle_price_twap == 0 {
        return None;
    }
    let mark = record.mark_price_twap as f64;
    let oracle = record.oracle_price_twap as f64;
    Some(100.0 * (1.0 / FUNDING_PERIODS_PER_DAY) * (mark - oracle) / oracle)
}

/// Funding rate series per listed market, ordered by time.
///
/// Records for unlisted markets are dropped. If a market has two records at
/// the same timestamp the later one wins.
pub fn funding_rates_by_market(
    summary: &[MarketSummary],
    funding: &[FundingRateRecord],
) -> FundingSeries {
    let symbols: HashMap<u64, &str> = summary
        .iter()
        .map(|row| (row.market_index, row.symbol.as_str()))
        .collect();

    let mut pivot: BTreeMap<String, BTreeMap<i64, f64>> = BTreeMap::new();
    for record in funding {
        let Some(symbol) = symbols.get(&record.market_index) else {
            continue;
        };
        let Some(rate) = calc_funding_rate(record) else {
            warn!(
                "{}: zero oracle TWAP at ts {}, skipping funding record",
                symbol, record.ts
            );
            continue;
        };
        pivot
            .entry(symbol.to_string())
            .or_default()
            .insert(record.ts, rate);
    }

    pivot
        .into_iter()
        .map(|(symbol, points)| {
            let series = points
                .into_iter()
                .map(|(ts, rate)| (ts_to_datetime(ts), rate))
                .collect();
            (symbol, series)
        })
        .collect()
}

pub fn funding_stats(series: &FundingSeries) -> Vec<FundingStats> {
    series
        .iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(symbol, points)| {
            let rates: Vec<f64> = points.iter().map(|(_, r)| *r).collect();
            FundingStats {
                symbol: symbol.clone(),
                samples: rates.len(),
                mean: Statistics::mean(rates.iter()),
                std_dev: Statistics::std_dev(rates.iter()),
                min: Statistics::min(rates.iter()),
                max: Statistics::max(rates.iter()),
            }
        })
        .collect()
}

// =============================================================================
// Report
// =============================================================================

/// Everything the charts and console summary need
#[derive(Debug, Clone)]
pub struct MarketReport {
    pub summary: Vec<MarketSummary>,
    pub ratios: Vec<LongShortRatio>,
    pub trades: Vec<TradeRecord>,
    pub fees: Vec<FeePoint>,
    pub fee_breakdown: Vec<MarketFees>,
    pub funding: FundingSeries,
    pub funding_stats: Vec<FundingStats>,
}

impl MarketReport {
    /// Query the source one account at a time and derive every series
    pub fn build(
        source: &dyn MarketDataSource,
        metadata: &[MarketMeta],
        quote_decimals: u32,
    ) -> Result<Self> {
        let markets = source.markets()?;
        let summary = build_market_summary(metadata, &markets);

        let trades = trade_history(source.trade_history()?);
        let funding_records = source.funding_rate_history()?;

        let ratios = long_short_ratios(&summary);
        let fees = cumulative_fees(&trades, quote_decimals);
        let fee_breakdown = fee_breakdown(&summary, &trades, quote_decimals);
        let funding = funding_rates_by_market(&summary, &funding_records);
        let funding_stats = funding_stats(&funding);

        Ok(Self {
            summary,
            ratios,
            trades,
            fees,
            fee_breakdown,
            funding,
            funding_stats,
        })
    }

    pub fn total_fees(&self) -> Decimal {
        self.fees.last().map(|p| p.cumulative).unwrap_or_default()
    }

    /// Trade counts per direction label
    pub fn direction_counts(&self) -> Vec<(&'static str, usize)> {
        self.trades
            .iter()
            .map(|t| t.direction.label())
            .counts()
            .into_iter()
            .sorted()
            .collect()
    }
}

/// Convert for plotting; amounts here are far inside f64 range
pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
