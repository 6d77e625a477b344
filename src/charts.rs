//! PNG chart rendering
//!
//! Titles and tick labels are rasterized with the system sans-serif font
//! through plotters' `ttf` backend.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ReportConfig;
use crate::report::{decimal_to_f64, FundingSeries, MarketReport};

pub const LONG_SHORT_RATIO_PNG: &str = "long_short_ratio.png";
pub const CUMULATIVE_FEES_PNG: &str = "cumulative_fees_generated.png";
pub const CUMULATIVE_FEE_DELTA_PNG: &str = "cumulative_fees_delta.png";
pub const FEES_BY_MARKET_PNG: &str = "fees_by_market.png";
pub const FUNDING_RATES_PNG: &str = "funding_rates_by_market.png";

const FONT: &str = "sans-serif";

fn chart_err<E: std::fmt::Display>(err: E) -> anyhow::Error {
    anyhow::anyhow!("Chart rendering failed: {}", err)
}

/// Render all five report charts into `config.images_dir`.
///
/// Returns the files written; a chart with no data is skipped.
pub fn render_report(report: &MarketReport, config: &ReportConfig) -> Result<Vec<PathBuf>> {
    let dir = &config.images_dir;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create images directory {}", dir.display()))?;
    let size = (config.chart_width, config.chart_height);
    let mut written = Vec::new();

    let ratios: Vec<(String, f64)> = report
        .ratios
        .iter()
        .map(|r| (r.symbol.clone(), r.ratio))
        .collect();
    let path = dir.join(LONG_SHORT_RATIO_PNG);
    if draw_bar_chart(&path, "Long/Short Ratio", "ratio", &ratios, size)? {
        written.push(path);
    }

    let cumulative: Vec<(DateTime<Utc>, f64)> = report
        .fees
        .iter()
        .map(|p| (p.ts, decimal_to_f64(p.cumulative)))
        .collect();
    let path = dir.join(CUMULATIVE_FEES_PNG);
    if draw_time_series(&path, "Cumulative Fees Generated", "cumulative fees", &cumulative, size)? {
        written.push(path);
    }

    let delta: Vec<(DateTime<Utc>, f64)> = report
        .fees
        .iter()
        .filter_map(|p| p.delta.map(|d| (p.ts, decimal_to_f64(d))))
        .collect();
    let path = dir.join(CUMULATIVE_FEE_DELTA_PNG);
    if draw_time_series(&path, "Cumulative Fee Delta", "cumulative fee delta", &delta, size)? {
        written.push(path);
    }

    let by_market: Vec<(String, f64)> = report
        .fee_breakdown
        .iter()
        .map(|m| (m.symbol.clone(), decimal_to_f64(m.fee)))
        .collect();
    let path = dir.join(FEES_BY_MARKET_PNG);
    if draw_bar_chart(&path, "Fees By Market", "fee", &by_market, size)? {
        written.push(path);
    }

    let path = dir.join(FUNDING_RATES_PNG);
    if draw_funding_grid(&path, &report.funding, config.funding_grid, size)? {
        written.push(path);
    }

    for path in &written {
        info!("Saved chart {}", path.display());
    }
    Ok(written)
}

/// Bar per label. Returns `false` without touching the file if `bars` is empty.
pub fn draw_bar_chart(
    path: &Path,
    title: &str,
    y_desc: &str,
    bars: &[(String, f64)],
    size: (u32, u32),
) -> Result<bool> {
    if bars.is_empty() {
        warn!("No data for '{}', skipping {}", title, path.display());
        return Ok(false);
    }

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    let (y_lo, y_hi) = padded_range(bars.iter().map(|(_, v)| *v).chain(std::iter::once(0.0)));
    let n = bars.len() as f64;
    let labels: Vec<&str> = bars.iter().map(|(label, _)| label.as_str()).collect();
    let label_at = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 {
            labels.get(idx as usize).map(|s| s.to_string()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 28))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(n - 0.5), y_lo..y_hi)
        .map_err(chart_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len())
        .x_label_formatter(&label_at)
        .y_desc(y_desc)
        .draw()
        .map_err(chart_err)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
            let x = i as f64;
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *value)], BLUE.mix(0.7).filled())
        }))
        .map_err(chart_err)?;

    root.present().map_err(chart_err)?;
    Ok(true)
}

/// Single line over time. Returns `false` if `points` is empty.
pub fn draw_time_series(
    path: &Path,
    title: &str,
    y_desc: &str,
    points: &[(DateTime<Utc>, f64)],
    size: (u32, u32),
) -> Result<bool> {
    if points.is_empty() {
        warn!("No data for '{}', skipping {}", title, path.display());
        return Ok(false);
    }

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    let (x_lo, x_hi) = time_range(points.iter().map(|(t, _)| *t));
    let (y_lo, y_hi) = padded_range(points.iter().map(|(_, v)| *v));

    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 28))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(chart_err)?;

    chart
        .configure_mesh()
        .x_labels(6)
        .x_label_formatter(&|x: &f64| format_ts(*x, "%m-%d %H:%M"))
        .x_desc("ts")
        .y_desc(y_desc)
        .draw()
        .map_err(chart_err)?;

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|(t, v)| (t.timestamp() as f64, *v)),
            &BLUE,
        ))
        .map_err(chart_err)?;

    root.present().map_err(chart_err)?;
    Ok(true)
}

/// Small multiples of funding rate per market, sharing both axes.
///
/// Panels are filled down each column first. Markets beyond `rows * cols`
/// are not drawn.
pub fn draw_funding_grid(
    path: &Path,
    series: &FundingSeries,
    (rows, cols): (usize, usize),
    size: (u32, u32),
) -> Result<bool> {
    let all_points: Vec<&(DateTime<Utc>, f64)> = series.values().flatten().collect();
    if all_points.is_empty() || rows == 0 || cols == 0 {
        warn!("No funding data, skipping {}", path.display());
        return Ok(false);
    }

    let capacity = rows * cols;
    if series.len() > capacity {
        let dropped: Vec<&str> = series.keys().skip(capacity).map(String::as_str).collect();
        warn!("Funding grid holds {} panels, not drawing {:?}", capacity, dropped);
    }

    let (x_lo, x_hi) = time_range(all_points.iter().map(|(t, _)| *t));
    let (y_lo, y_hi) = padded_range(all_points.iter().map(|(_, v)| *v));

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let root = root
        .titled("Funding Rates by Market", (FONT, 30))
        .map_err(chart_err)?;
    let panels = root.split_evenly((rows, cols));

    for (i, (symbol, points)) in series.iter().take(capacity).enumerate() {
        let (row, col) = (i % rows, i / rows);
        let area = &panels[row * cols + col];

        let mut chart = ChartBuilder::on(area)
            .caption(symbol, (FONT, 14))
            .margin(5)
            .x_label_area_size(20)
            .y_label_area_size(40)
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .x_labels(3)
            .y_labels(4)
            .x_label_formatter(&|x: &f64| format_ts(*x, "%m-%d"))
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(LineSeries::new(
                points.iter().map(|(t, v)| (t.timestamp() as f64, *v)),
                &BLUE,
            ))
            .map_err(chart_err)?;
    }

    root.present().map_err(chart_err)?;
    Ok(true)
}

/// Min/max of `values` widened by 5%, never a zero-width range
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    if span == 0.0 {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return (lo - pad, hi + pad);
    }
    (lo - span * 0.05, hi + span * 0.05)
}

/// Time axis bounds in unix seconds; a single instant is widened by an hour each side
fn time_range(times: impl Iterator<Item = DateTime<Utc>>) -> (f64, f64) {
    let (lo, hi) = times.fold((i64::MAX, i64::MIN), |(lo, hi), t| {
        (lo.min(t.timestamp()), hi.max(t.timestamp()))
    });
    if lo > hi {
        return (0.0, 1.0);
    }
    if lo == hi {
        return ((lo - 3600) as f64, (hi + 3600) as f64);
    }
    (lo as f64, hi as f64)
}

fn format_ts(secs: f64, fmt: &str) -> String {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.format(fmt).to_string())
        .unwrap_or_default()
}
