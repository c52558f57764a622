//! Flat exports of a finished analysis: JSON for downstream tooling, and
//! delimited detail/negatives files with round-trip-safe quoting.

use std::{fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result};
use csv::QuoteStyle;
use serde::Serialize;

use crate::{
    aggregate::{AggregationResult, PeriodTotal, calculate_totals},
    bridge::BridgeResult,
};

#[derive(Serialize)]
struct AnalysisReport<'a> {
    methodology: &'static str,
    stats: &'a crate::aggregate::RunStats,
    period_totals: Vec<PeriodTotal>,
    aggregation: &'a AggregationResult,
    bridge: &'a BridgeResult,
}

/// Writes the full analysis as pretty JSON.
pub fn write_json(path: &Path, aggregate: &AggregationResult, bridge: &BridgeResult) -> Result<()> {
    let report = AnalysisReport {
        methodology: bridge.methodology,
        stats: &aggregate.stats,
        period_totals: calculate_totals(aggregate),
        aggregation: aggregate,
        bridge,
    };
    let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .with_context(|| format!("Writing JSON report to {path:?}"))?;
    Ok(())
}

fn open_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<File>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    builder
        .from_path(path)
        .with_context(|| format!("Creating output file {path:?}"))
}

/// One row per bucket per period pair, dimensions expanded into columns.
pub fn write_detail(
    path: &Path,
    dimension_names: &[String],
    bridge: &BridgeResult,
    delimiter: u8,
) -> Result<()> {
    let mut writer = open_writer(path, delimiter)?;
    let mut headers = vec!["pair".to_string()];
    headers.extend(dimension_names.iter().cloned());
    headers.extend(
        [
            "classification",
            "py_value",
            "cy_value",
            "total_change",
            "price_impact",
            "volume_impact",
            "mix_impact",
            "cost_impact",
        ]
        .map(String::from),
    );
    writer.write_record(&headers)?;
    for pair in &bridge.pairs {
        for bucket in &pair.buckets {
            let mut record = vec![pair.label.clone()];
            record.extend(bucket.dimensions.iter().cloned());
            record.push(bucket.classification.to_string());
            for value in [
                bucket.py_value,
                bucket.cy_value,
                bucket.total_change,
                bucket.price_impact,
                bucket.volume_impact,
                bucket.mix_impact,
                bucket.cost_impact,
            ] {
                record.push(format_amount(value));
            }
            writer.write_record(&record)?;
        }
    }
    writer
        .flush()
        .with_context(|| format!("Flushing output file {path:?}"))?;
    Ok(())
}

/// The excluded non-positive rows, one line per period.
pub fn write_negatives(path: &Path, aggregate: &AggregationResult, delimiter: u8) -> Result<()> {
    let mut writer = open_writer(path, delimiter)?;
    writer.write_record(["period", "rows", "sales", "quantity", "cost"])?;
    for (window, entry) in aggregate.windows.iter().zip(&aggregate.negatives) {
        writer.write_record([
            window.tag.to_string(),
            entry.count.to_string(),
            format_amount(entry.sales),
            format_amount(entry.quantity),
            format_amount(entry.cost),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing output file {path:?}"))?;
    Ok(())
}

/// Whole amounts render without decimals; everything else with two.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

pub fn format_pct(value: f64) -> String {
    format!("{value:.1}%")
}
