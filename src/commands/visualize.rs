//! Visualize command implementation

use anyhow::Result;
use drift_analytics::export::{load_transfers_csv, summarize_transfers};
use drift_analytics::Config;
use std::path::PathBuf;
use tracing::{info, warn};

pub fn run(config: Config, input_override: Option<PathBuf>) -> Result<()> {
    let input = input_override.unwrap_or_else(|| config.export.output_dir.clone());
    info!("Summarizing transfer exports in {}", input.display());

    let mut loaded = 0;
    for tracked in &config.export.accounts {
        let path = input.join(format!("{}.csv", tracked.name));
        if !path.exists() {
            warn!("Export not found: {}", path.display());
            continue;
        }

        let records = load_transfers_csv(&path)?;
        info!("Loaded {} transfers for {}", records.len(), tracked.name);
        loaded += 1;

        println!("\n{}", "=".repeat(72));
        println!("{} ({} transfers)", tracked.name.to_uppercase(), records.len());
        println!("{}", "=".repeat(72));
        println!(
            "{:<10} {:>6} {:>18} {:>18} {:>18}",
            "token", "count", "inflow", "outflow", "net"
        );
        for token in summarize_transfers(&records) {
            println!(
                "{:<10} {:>6} {:>18} {:>18} {:>18}",
                token.label(),
                token.transfers,
                token.inflow,
                token.outflow,
                token.net()
            );
        }
    }

    if loaded == 0 {
        anyhow::bail!("No transfer exports found in {}", input.display());
    }

    Ok(())
}
