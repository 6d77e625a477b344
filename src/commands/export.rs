//! Export command implementation

use anyhow::{Context, Result};
use drift_analytics::config::TrackedAccount;
use drift_analytics::export::write_transfers_csv;
use drift_analytics::transfers::{
    FetchOutcome, SolscanClient, TransferFetcher, TransferPageSource,
};
use drift_analytics::Config;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub fn run(
    mut config: Config,
    accounts: Vec<String>,
    from_override: Option<String>,
    to_override: Option<String>,
    output_override: Option<PathBuf>,
) -> Result<()> {
    info!("Starting transfer export");

    if let Some(from) = from_override {
        info!("Overriding start date to: {}", from);
        config.export.from = from;
    }

    if let Some(to) = to_override {
        info!("Overriding end date to: {}", to);
        config.export.to = to;
    }

    if let Some(output) = output_override {
        info!("Overriding output directory to: {}", output.display());
        config.export.output_dir = output;
    }

    let selected = select_accounts(&config.export.accounts, &accounts)?;
    let (from_time, to_time) = config.export.window()?;

    let client = SolscanClient::from_config(&config.export)?;
    let fetcher = TransferFetcher::from_config(client, &config.export);

    export_accounts(&fetcher, &selected, (from_time, to_time), &config.export.output_dir)
}

/// Fetch and write each account in turn. A failed account is logged and the
/// remaining accounts still run; the error lists every account that failed.
fn export_accounts<S: TransferPageSource>(
    fetcher: &TransferFetcher<S>,
    accounts: &[&TrackedAccount],
    (from_time, to_time): (i64, i64),
    output_dir: &Path,
) -> Result<()> {
    let mut failed: Vec<&str> = Vec::new();
    for tracked in accounts {
        info!("Starting {}...", tracked.name);
        info!("StartDate: {}", from_time);
        info!("EndDate: {}", to_time);

        let report = match fetcher.fetch_all(&tracked.account, from_time, to_time) {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to fetch transfers for {}: {}", tracked.name, e);
                failed.push(&tracked.name);
                continue;
            }
        };

        if let FetchOutcome::Aborted { status } = report.outcome {
            warn!(
                "{}: fetch stopped early on HTTP {}, CSV will be partial",
                tracked.name, status
            );
        }
        if report.rate_limited > 0 {
            info!("{}: waited out {} rate limits", tracked.name, report.rate_limited);
        }
        if report.skipped > 0 {
            warn!("{}: skipped {} undecodable records", tracked.name, report.skipped);
        }

        write_transfers_csv(output_dir, &tracked.name, &report.records)?;
        info!(
            "Finished recording {} tx's for {}",
            report.records.len(),
            tracked.name
        );
    }

    if !failed.is_empty() {
        anyhow::bail!("Export failed for: {}", failed.join(", "));
    }

    Ok(())
}

/// Tracked accounts filtered by name; an empty filter keeps all of them
fn select_accounts<'a>(
    tracked: &'a [TrackedAccount],
    names: &[String],
) -> Result<Vec<&'a TrackedAccount>> {
    if names.is_empty() {
        return Ok(tracked.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            tracked.iter().find(|t| &t.name == name).with_context(|| {
                let known: Vec<&str> = tracked.iter().map(|t| t.name.as_str()).collect();
                format!("Unknown account: {}. Available accounts: {}", name, known.join(", "))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_analytics::export::load_transfers_csv;
    use drift_analytics::transfers::{FetchError, PageQuery, PageReply};

    /// One record per account, except `down` whose requests never connect
    struct FlakyIndexer;

    impl TransferPageSource for FlakyIndexer {
        fn get_page(&self, query: &PageQuery) -> Result<PageReply, FetchError> {
            if query.account == "down" {
                return Err(FetchError::Transport {
                    offset: query.offset,
                    message: "connection refused".to_string(),
                });
            }
            if query.offset > 0 {
                return Ok(PageReply::new(200, r#"{"data": []}"#));
            }
            let body = format!(
                r#"{{"data":[{{"address":"{0}","changeType":"inc","changeAmount":"5",
                    "decimals":0,"symbol":null,"blockTime":1647734400,
                    "tokenAddress":"mint","_id":"{0}-1"}}]}}"#,
                query.account
            );
            Ok(PageReply::new(200, body))
        }
    }

    #[test]
    fn test_select_accounts() {
        let tracked = vec![
            TrackedAccount::new("orca", "a"),
            TrackedAccount::new("raydium", "b"),
        ];

        assert_eq!(select_accounts(&tracked, &[]).unwrap().len(), 2);

        let only = select_accounts(&tracked, &["raydium".to_string()]).unwrap();
        assert_eq!(only[0].account, "b");

        assert!(select_accounts(&tracked, &["serum".to_string()]).is_err());
    }

    #[test]
    fn test_failed_account_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let tracked = vec![
            TrackedAccount::new("orca", "up-a"),
            TrackedAccount::new("serum", "down"),
            TrackedAccount::new("raydium", "up-b"),
        ];
        let selected: Vec<&TrackedAccount> = tracked.iter().collect();
        let fetcher = TransferFetcher::new(FlakyIndexer);

        let err = export_accounts(&fetcher, &selected, (0, 86_400), dir.path()).unwrap_err();
        assert!(err.to_string().contains("serum"));

        assert_eq!(load_transfers_csv(dir.path().join("orca.csv")).unwrap().len(), 1);
        assert_eq!(load_transfers_csv(dir.path().join("raydium.csv")).unwrap().len(), 1);
        assert!(!dir.path().join("serum.csv").exists());
    }
}
