//! Report command implementation

use anyhow::Result;
use drift_analytics::market::{market_metadata, SnapshotSource};
use drift_analytics::report::MarketReport;
use drift_analytics::{charts, Config};
use std::path::PathBuf;
use tracing::{debug, info};

pub fn run(
    mut config: Config,
    snapshot_override: Option<PathBuf>,
    images_override: Option<PathBuf>,
) -> Result<()> {
    info!("Starting market report ({})", config.market.network);

    if let Some(snapshot) = snapshot_override {
        info!("Overriding snapshot to: {}", snapshot.display());
        config.market.snapshot_path = snapshot;
    }

    if let Some(images) = images_override {
        info!("Overriding images directory to: {}", images.display());
        config.report.images_dir = images;
    }

    let source = SnapshotSource::from_file(config.market.resolved_snapshot_path())?;
    let metadata = market_metadata();
    let report = MarketReport::build(&source, &metadata, config.report.quote_decimals)?;

    print_summary(&report);

    let written = charts::render_report(&report, &config.report)?;
    info!(
        "Report completed: {} charts in {}",
        written.len(),
        config.report.images_dir.display()
    );

    Ok(())
}

fn print_summary(report: &MarketReport) {
    println!("\n{}", "=".repeat(72));
    println!("MARKETS");
    println!("{}", "=".repeat(72));
    println!(
        "{:<6} {:<12} {:<6} {:>22} {:>22}",
        "index", "symbol", "base", "base_long", "base_short"
    );
    for row in &report.summary {
        println!(
            "{:<6} {:<12} {:<6} {:>22} {:>22}",
            row.market_index,
            row.symbol,
            row.base_asset_symbol,
            row.market.base_asset_amount_long,
            row.market.base_asset_amount_short
        );
        debug!("{} amm: {:?}", row.symbol, row.market.amm);
    }

    println!("\nLong/Short Ratio");
    for ratio in &report.ratios {
        println!("  {:<12} {:>10.4}", ratio.symbol, ratio.ratio);
    }

    println!("\nTrades:             {}", report.trades.len());
    for (direction, count) in report.direction_counts() {
        println!("  {:<16} {}", direction, count);
    }
    if let (Some(first), Some(last)) = (report.trades.first(), report.trades.last()) {
        println!("  first ts          {}", drift_analytics::ts_to_datetime(first.ts));
        println!("  last ts           {}", drift_analytics::ts_to_datetime(last.ts));
    }
    println!("Total Fees:         ${:.2}", report.total_fees());

    println!("\nFees By Market");
    for fees in &report.fee_breakdown {
        println!("  {:<12} {:>5} ${:>14.2}", fees.symbol, fees.market_index, fees.fee);
    }

    println!("\nFunding Rates (% per hour)");
    println!(
        "  {:<12} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "symbol", "samples", "mean", "std", "min", "max"
    );
    for stats in &report.funding_stats {
        println!(
            "  {:<12} {:>7} {:>10.5} {:>10.5} {:>10.5} {:>10.5}",
            stats.symbol, stats.samples, stats.mean, stats.std_dev, stats.min, stats.max
        );
    }
    println!("{}", "=".repeat(72));
}
