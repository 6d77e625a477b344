//! Transfer CSV export and loading
//!
//! Writes fetched transfers to `<name>.csv` and reads them back for the
//! per-token summary.

use anyhow::{Context, Result};
use itertools::Itertools;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::{ChangeType, TransferRecord};

/// Column order of exported files
pub const TRANSFER_COLUMNS: [&str; 8] = [
    "address",
    "changeType",
    "changeAmount",
    "decimals",
    "symbol",
    "blockTime",
    "tokenAddress",
    "_id",
];

/// Write transfers to `<dir>/<name>.csv`, creating `dir` if needed
pub fn write_transfers_csv(
    dir: impl AsRef<Path>,
    name: &str,
    records: &[TransferRecord],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = dir.join(format!("{}.csv", name));
    let mut writer = csv::Writer::from_path(&path).context("Failed to create output file")?;

    if records.is_empty() {
        // serde only emits the header together with the first row
        writer.write_record(TRANSFER_COLUMNS)?;
    }
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write transfer {}", record.id))?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", records.len(), path.display());
    Ok(path)
}

/// Load transfers previously written by [`write_transfers_csv`]
pub fn load_transfers_csv(path: impl AsRef<Path>) -> Result<Vec<TransferRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("Failed to open CSV file {}", path.as_ref().display()))?;

    let mut records = Vec::new();
    for (row_idx, result) in reader.deserialize().enumerate() {
        let record: TransferRecord =
            result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        records.push(record);
    }

    Ok(records)
}

/// Per-token totals over a set of transfers
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSummary {
    pub token_address: String,
    pub symbol: String,
    pub transfers: usize,
    pub inflow: Decimal,
    pub outflow: Decimal,
}

impl TokenSummary {
    pub fn net(&self) -> Decimal {
        self.inflow - self.outflow
    }

    /// Symbol, or a shortened mint when the indexer had no symbol
    pub fn label(&self) -> String {
        if !self.symbol.is_empty() {
            self.symbol.clone()
        } else {
            self.token_address.chars().take(8).collect()
        }
    }
}

/// Group transfers by mint and total the in/out UI amounts, sorted by label
pub fn summarize_transfers(records: &[TransferRecord]) -> Vec<TokenSummary> {
    records
        .iter()
        .into_group_map_by(|r| r.token_address.clone())
        .into_iter()
        .map(|(token_address, group)| {
            let symbol = group
                .iter()
                .map(|r| r.symbol.as_str())
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string();
            let (inflow, outflow) =
                group
                    .iter()
                    .fold((Decimal::ZERO, Decimal::ZERO), |(inc, dec), r| {
                        match r.change_type {
                            ChangeType::Inc => (inc + r.ui_amount().abs(), dec),
                            ChangeType::Dec => (inc, dec + r.ui_amount().abs()),
                        }
                    });
            TokenSummary {
                token_address,
                symbol,
                transfers: group.len(),
                inflow,
                outflow,
            }
        })
        .sorted_by(|a, b| {
            a.label()
                .cmp(&b.label())
                .then_with(|| a.token_address.cmp(&b.token_address))
        })
        .collect()
}
