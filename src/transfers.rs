//! Paginated transfer history fetching
//!
//! Walks the indexing API's `splTransfers` endpoint page by page for one
//! account and time window. The endpoint caps page size and rate-limits
//! callers with HTTP 429, so the loop waits out a fixed cool-down and retries
//! the same page until it gets through.

use anyhow::Context;
use serde::Deserialize;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::types::TransferRecord;

// =============================================================================
// Constants
// =============================================================================

pub const SOLSCAN_SPL_TRANSFERS_URL: &str = "https://public-api.solscan.io/account/splTransfers";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(31);
pub const DEFAULT_PROGRESS_EVERY: u32 = 250;

const STATUS_OK: u16 = 200;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

// =============================================================================
// Errors and results
// =============================================================================

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for offset {offset} failed: {message}")]
    Transport { offset: u32, message: String },

    #[error("malformed page at offset {offset}: {source}")]
    Malformed {
        offset: u32,
        #[source]
        source: serde_json::Error,
    },
}

/// How a fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// An empty page was returned; the history is complete
    Exhausted,
    /// A status other than 200/429 ended the fetch early
    Aborted { status: u16 },
}

/// Records collected for one account plus how the walk went
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub records: Vec<TransferRecord>,
    pub outcome: FetchOutcome,
    /// Non-empty pages appended
    pub pages: usize,
    /// Number of 429 cool-downs waited out
    pub rate_limited: usize,
    /// Records dropped because they did not decode as transfers
    pub skipped: usize,
    /// Progress lines logged (one per multiple of `progress_every` reached by the offset)
    pub progress_notices: usize,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == FetchOutcome::Exhausted
    }
}

// =============================================================================
// Page source
// =============================================================================

/// One page request: account, time window and the cursor position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub account: String,
    pub from_time: i64,
    pub to_time: i64,
    pub limit: u32,
    pub offset: u32,
}

/// Raw HTTP reply for a page; the body is only decoded on 200
#[derive(Debug, Clone)]
pub struct PageReply {
    pub status: u16,
    pub body: String,
}

impl PageReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Something that can answer page queries (the live API or a test double)
pub trait TransferPageSource {
    fn get_page(&self, query: &PageQuery) -> Result<PageReply, FetchError>;
}

/// Records stay untyped until the page is known to be well formed, so one
/// odd record does not cost the rest of the page
#[derive(Debug, Deserialize)]
struct PageBody {
    data: Vec<serde_json::Value>,
}

/// Blocking client for the public Solscan API
pub struct SolscanClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl SolscanClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &ExportConfig) -> anyhow::Result<Self> {
        Self::new(config.endpoint.clone(), config.request_timeout())
    }
}

impl TransferPageSource for SolscanClient {
    fn get_page(&self, query: &PageQuery) -> Result<PageReply, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            offset: query.offset,
            message: e.to_string(),
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("account", query.account.clone()),
                ("fromTime", query.from_time.to_string()),
                ("toTime", query.to_time.to_string()),
                ("limit", query.limit.to_string()),
                ("offset", query.offset.to_string()),
            ])
            .send()
            .map_err(transport)?;

        let status = response.status().as_u16();
        let body = response.text().map_err(transport)?;

        Ok(PageReply { status, body })
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Drives a [`TransferPageSource`] through every page of an account's history
pub struct TransferFetcher<S> {
    source: S,
    page_size: u32,
    cooldown: Duration,
    progress_every: u32,
}

impl<S: TransferPageSource> TransferFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            page_size: DEFAULT_PAGE_SIZE,
            cooldown: DEFAULT_COOLDOWN,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    pub fn from_config(source: S, config: &ExportConfig) -> Self {
        Self::new(source)
            .with_page_size(config.page_size)
            .with_cooldown(config.cooldown())
            .with_progress_every(config.progress_every)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_progress_every(mut self, progress_every: u32) -> Self {
        self.progress_every = progress_every;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch every transfer for `account` between `from_time` and `to_time`.
    ///
    /// A 429 is retried forever at the same offset after the cool-down. Any
    /// other non-200 status stops the walk and returns what was collected so
    /// far with [`FetchOutcome::Aborted`].
    pub fn fetch_all(
        &self,
        account: &str,
        from_time: i64,
        to_time: i64,
    ) -> Result<FetchReport, FetchError> {
        let mut query = PageQuery {
            account: account.to_string(),
            from_time,
            to_time,
            limit: self.page_size,
            offset: 0,
        };

        let mut report = FetchReport {
            records: Vec::new(),
            outcome: FetchOutcome::Exhausted,
            pages: 0,
            rate_limited: 0,
            skipped: 0,
            progress_notices: 0,
        };

        loop {
            debug!("Requesting {} offset={} limit={}", account, query.offset, query.limit);
            let reply = self.source.get_page(&query)?;

            match reply.status {
                STATUS_TOO_MANY_REQUESTS => {
                    report.rate_limited += 1;
                    info!("Rate limited, waiting {}s...", self.cooldown.as_secs());
                    sleep(self.cooldown);
                    info!("Done waiting");
                }
                STATUS_OK => {
                    let page: PageBody = serde_json::from_str(&reply.body).map_err(|source| {
                        FetchError::Malformed {
                            offset: query.offset,
                            source,
                        }
                    })?;

                    if page.data.is_empty() {
                        return Ok(report);
                    }

                    report.pages += 1;
                    for (i, value) in page.data.into_iter().enumerate() {
                        match serde_json::from_value::<TransferRecord>(value) {
                            Ok(record) => report.records.push(record),
                            Err(e) => {
                                report.skipped += 1;
                                warn!(
                                    "Skipping undecodable record {} of page at offset {}: {}",
                                    i, query.offset, e
                                );
                            }
                        }
                    }
                    query.offset += query.limit;

                    if self.progress_every > 0 && query.offset % self.progress_every == 0 {
                        report.progress_notices += 1;
                        info!("Recorded {} tx's", query.offset);
                    }
                }
                status => {
                    warn!(
                        "Unexpected status {} for {} at offset {}, keeping {} records",
                        status,
                        account,
                        query.offset,
                        report.records.len()
                    );
                    report.outcome = FetchOutcome::Aborted { status };
                    return Ok(report);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned replies and records every query it sees
    struct ScriptedSource {
        replies: RefCell<VecDeque<PageReply>>,
        seen: RefCell<Vec<PageQuery>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<PageReply>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                seen: RefCell::new(Vec::new()),
            }
        }

        fn offsets(&self) -> Vec<u32> {
            self.seen.borrow().iter().map(|q| q.offset).collect()
        }
    }

    impl TransferPageSource for ScriptedSource {
        fn get_page(&self, query: &PageQuery) -> Result<PageReply, FetchError> {
            self.seen.borrow_mut().push(query.clone());
            Ok(self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| PageReply::new(200, r#"{"data": []}"#)))
        }
    }

    fn record_json(id: usize) -> String {
        format!(
            r#"{{"address":"acc","changeType":"inc","changeAmount":"{}","decimals":6,
                "symbol":"USDC","blockTime":1647734400,"tokenAddress":"mint","_id":"id-{}",
                "owner":"extra","signature":["sig-{}"]}}"#,
            id * 10,
            id,
            id
        )
    }

    fn page(start: usize, len: usize) -> PageReply {
        let items: Vec<String> = (start..start + len).map(record_json).collect();
        PageReply::new(200, format!(r#"{{"success":true,"data":[{}]}}"#, items.join(",")))
    }

    fn fetcher(source: ScriptedSource) -> TransferFetcher<ScriptedSource> {
        TransferFetcher::new(source).with_cooldown(Duration::ZERO)
    }

    #[test]
    fn test_stops_on_empty_page() {
        let f = fetcher(ScriptedSource::new(vec![page(0, 50), page(50, 30), page(80, 0)]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), 80);
        assert_eq!(report.outcome, FetchOutcome::Exhausted);
        assert_eq!(report.pages, 2);
        assert_eq!(f.source().offsets(), vec![0, 50, 100]);
    }

    #[test]
    fn test_length_is_sum_of_page_sizes() {
        let sizes = [50, 50, 50, 17];
        let mut replies = Vec::new();
        let mut start = 0;
        for size in sizes {
            replies.push(page(start, size));
            start += size;
        }
        let f = fetcher(ScriptedSource::new(replies));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), sizes.iter().sum::<usize>());
        assert!(report.is_complete());
        // Four pages then the trailing empty one
        assert_eq!(f.source().offsets().len(), 5);
    }

    #[test]
    fn test_rate_limit_retries_same_offset() {
        let f = fetcher(ScriptedSource::new(vec![
            PageReply::new(429, ""),
            PageReply::new(429, "slow down"),
            page(0, 20),
        ]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), 20);
        assert_eq!(report.rate_limited, 2);
        assert_eq!(f.source().offsets(), vec![0, 0, 0, 50]);

        let ids: Vec<&str> = report.records.iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("id-{}", i)).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_rate_limit_mid_walk_does_not_duplicate() {
        let f = fetcher(ScriptedSource::new(vec![
            page(0, 50),
            PageReply::new(429, ""),
            page(50, 10),
        ]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), 60);
        assert_eq!(f.source().offsets(), vec![0, 50, 50, 100]);
    }

    #[test]
    fn test_other_status_aborts_with_partial_records() {
        let f = fetcher(ScriptedSource::new(vec![
            page(0, 50),
            page(50, 50),
            page(100, 50),
            PageReply::new(500, "internal error"),
            page(150, 50),
        ]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), 3 * 50);
        assert_eq!(report.outcome, FetchOutcome::Aborted { status: 500 });
        assert!(!report.is_complete());
        assert_eq!(f.source().offsets(), vec![0, 50, 100, 150]);
    }

    #[test]
    fn test_first_page_error_returns_empty() {
        let f = fetcher(ScriptedSource::new(vec![PageReply::new(403, "forbidden")]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert!(report.records.is_empty());
        assert_eq!(report.outcome, FetchOutcome::Aborted { status: 403 });
    }

    #[test]
    fn test_normalization_keeps_only_transfer_fields() {
        let f = fetcher(ScriptedSource::new(vec![page(0, 3)]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        for record in &report.records {
            let value = serde_json::to_value(record).unwrap();
            let mut keys: Vec<&String> = value.as_object().unwrap().keys().collect();
            keys.sort();
            assert_eq!(
                keys,
                vec![
                    "_id",
                    "address",
                    "blockTime",
                    "changeAmount",
                    "changeType",
                    "decimals",
                    "symbol",
                    "tokenAddress"
                ]
            );
        }
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let f = fetcher(ScriptedSource::new(vec![
            page(0, 50),
            PageReply::new(200, "<html>gateway</html>"),
        ]));
        match f.fetch_all("acc", 0, 100) {
            Err(FetchError::Malformed { offset, .. }) => assert_eq!(offset, 50),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_no_progress_notice_below_threshold() {
        let f = fetcher(ScriptedSource::new(vec![page(0, 50), page(50, 30)]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.records.len(), 80);
        assert_eq!(report.progress_notices, 0);
    }

    #[test]
    fn test_one_progress_notice_per_threshold() {
        let replies: Vec<PageReply> = (0..6).map(|i| page(i * 50, 50)).collect();
        let f = fetcher(ScriptedSource::new(replies));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        // Offsets after each page: 50..=300, only 250 is a multiple
        assert_eq!(report.records.len(), 300);
        assert_eq!(report.progress_notices, 1);
    }

    #[test]
    fn test_progress_interval_is_configurable() {
        let replies: Vec<PageReply> = (0..4).map(|i| page(i * 50, 50)).collect();
        let f = fetcher(ScriptedSource::new(replies)).with_progress_every(100);
        let report = f.fetch_all("acc", 0, 100).unwrap();
        assert_eq!(report.progress_notices, 2);

        let f = fetcher(ScriptedSource::new(vec![page(0, 50)])).with_progress_every(0);
        assert_eq!(f.fetch_all("acc", 0, 100).unwrap().progress_notices, 0);
    }

    #[test]
    fn test_undecodable_record_is_skipped_not_fatal() {
        let body = format!(
            r#"{{"data":[{},{{"address":"acc","changeType":"inc"}},{}]}}"#,
            record_json(0),
            record_json(2)
        );
        let f = fetcher(ScriptedSource::new(vec![PageReply::new(200, body), page(50, 5)]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.records.len(), 7);
        assert!(report.is_complete());
        assert_eq!(f.source().offsets(), vec![0, 50, 100]);
    }

    #[test]
    fn test_large_amount_and_null_symbol_decode() {
        let body = r#"{"data":[{"address":"acc","changeType":"inc",
            "changeAmount":"18000000000000000000","decimals":9,"symbol":null,
            "blockTime":1647734400,"tokenAddress":"mint","_id":"big"}]}"#;
        let f = fetcher(ScriptedSource::new(vec![PageReply::new(200, body)]));
        let report = f.fetch_all("acc", 0, 100).unwrap();

        assert_eq!(report.skipped, 0);
        assert_eq!(report.records[0].change_amount, 18_000_000_000_000_000_000);
        assert_eq!(report.records[0].symbol, "");
    }

    #[test]
    fn test_client_builds_from_default_config() {
        assert!(SolscanClient::from_config(&ExportConfig::default()).is_ok());
    }

    #[test]
    fn test_query_carries_account_and_window() {
        let f = fetcher(ScriptedSource::new(vec![])).with_page_size(25);
        f.fetch_all("wallet-1", 1_647_734_400, 1_647_820_800).unwrap();

        let seen = f.source().seen.borrow();
        assert_eq!(
            seen[0],
            PageQuery {
                account: "wallet-1".to_string(),
                from_time: 1_647_734_400,
                to_time: 1_647_820_800,
                limit: 25,
                offset: 0,
            }
        );
    }
}
