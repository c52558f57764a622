//! Price/Volume/Mix decomposition over finalized aggregates.
//!
//! For each bucket and each adjacent period pair, the change in the headline
//! metric (sales, or gross margin in GM mode) splits into a price effect, a
//! volume effect, a residual mix effect, and (in GM mode with a
//! sales-per-unit price basis) a separate cost effect. Mix is computed as
//! the residual, so the components reconcile to the total change by
//! construction, not by rounding luck.

use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use crate::{
    aggregate::{Accumulator, AggregationResult},
    config::{Mode, PriceBasis},
    periods::PeriodTag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    New,
    Discontinued,
    Continuing,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::New => f.write_str("new"),
            Classification::Discontinued => f.write_str("discontinued"),
            Classification::Continuing => f.write_str("continuing"),
        }
    }
}

/// One bucket's attribution for one adjacent period pair.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeBucketResult {
    pub label: String,
    pub dimensions: Vec<String>,
    /// `"PY-CY"` in two-period mode, `"{yearA}-{yearB}"` in multi-year mode.
    pub pair: String,
    pub py_value: f64,
    pub cy_value: f64,
    pub total_change: f64,
    pub price_impact: f64,
    pub volume_impact: f64,
    pub mix_impact: f64,
    pub cost_impact: f64,
    pub classification: Classification,
}

/// Totals across buckets, summed after decomposition. The per-bucket
/// impacts are non-linear in the underlying sums, so summing first and
/// decomposing once would not reconcile.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeSummary {
    pub py_value: f64,
    pub cy_value: f64,
    pub total_change: f64,
    pub price_impact: f64,
    pub volume_impact: f64,
    pub mix_impact: f64,
    pub cost_impact: f64,
    pub change_pct: f64,
    pub price_pct: f64,
    pub volume_pct: f64,
    pub mix_pct: f64,
    pub cost_pct: f64,
    pub new_count: u64,
    pub discontinued_count: u64,
    pub continuing_count: u64,
}

/// All buckets and the summary for one adjacent period pair.
#[derive(Debug, Clone, Serialize)]
pub struct BridgePair {
    pub label: String,
    pub buckets: Vec<BridgeBucketResult>,
    pub summary: BridgeSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeResult {
    pub mode: Mode,
    pub methodology: &'static str,
    pub pairs: Vec<BridgePair>,
}

/// Decomposes every adjacent period pair of the finalized aggregate.
pub fn compute_bridge(aggregate: &AggregationResult, mode: Mode) -> BridgeResult {
    let pairs = (0..aggregate.windows.len())
        .tuple_windows()
        .map(|(py_idx, cy_idx)| {
            let label = pair_label(
                aggregate.windows[py_idx].tag,
                aggregate.windows[cy_idx].tag,
            );
            let buckets: Vec<BridgeBucketResult> = aggregate
                .buckets
                .iter()
                .filter(|bucket| {
                    // Buckets with no activity in either period of this pair
                    // belong to other years entirely.
                    bucket.periods[py_idx].count > 0 || bucket.periods[cy_idx].count > 0
                })
                .map(|bucket| {
                    decompose_bucket(
                        bucket.label(),
                        bucket.dimensions.clone(),
                        &label,
                        &bucket.periods[py_idx],
                        &bucket.periods[cy_idx],
                        mode,
                    )
                })
                .collect();
            let summary = summarize(&buckets);
            BridgePair {
                label,
                buckets,
                summary,
            }
        })
        .collect();
    BridgeResult {
        mode,
        methodology: mode.describe(),
        pairs,
    }
}

fn pair_label(py: PeriodTag, cy: PeriodTag) -> String {
    match (py, cy) {
        (PeriodTag::FiscalYear(a), PeriodTag::FiscalYear(b)) => format!("{a}-{b}"),
        (a, b) => format!("{a}-{b}"),
    }
}

fn period_value(acc: &Accumulator, mode: Mode) -> f64 {
    match mode {
        Mode::Pvm => acc.sales,
        Mode::Gm(PriceBasis::MarginPerUnit) => acc.sales - acc.cost,
        Mode::Gm(PriceBasis::SalesPerUnit) => acc.sales,
    }
}

fn cost_component(py: &Accumulator, cy: &Accumulator, mode: Mode) -> f64 {
    match mode {
        Mode::Gm(PriceBasis::SalesPerUnit) => -(cy.cost - py.cost),
        Mode::Pvm | Mode::Gm(PriceBasis::MarginPerUnit) => 0.0,
    }
}

fn decompose_bucket(
    label: String,
    dimensions: Vec<String>,
    pair: &str,
    py: &Accumulator,
    cy: &Accumulator,
    mode: Mode,
) -> BridgeBucketResult {
    let is_new = py.sales <= 0.0 || py.quantity <= 0.0;
    let is_discontinued = cy.sales <= 0.0 || cy.quantity <= 0.0;

    let py_value = period_value(py, mode);
    let cy_value = period_value(cy, mode);
    // Division by zero is guarded to 0, never NaN.
    let py_price = if py.quantity > 0.0 { py_value / py.quantity } else { 0.0 };
    let cy_price = if cy.quantity > 0.0 { cy_value / cy.quantity } else { 0.0 };

    let cost_impact = cost_component(py, cy, mode);
    // With a sales-per-unit basis the headline metric is still the margin,
    // so the cost component is part of the total change.
    let total_change = (cy_value - py_value) + cost_impact;

    let (price_impact, volume_impact, mix_impact, classification) = if is_new || is_discontinued {
        let classification = if is_new {
            Classification::New
        } else {
            Classification::Discontinued
        };
        (0.0, total_change - cost_impact, 0.0, classification)
    } else {
        let price_impact = (cy_price - py_price) * py.quantity;
        let volume_impact = (cy.quantity - py.quantity) * py_price;
        // Residual: reconciliation holds exactly by construction.
        let mix_impact = (cy_value - py_value) - price_impact - volume_impact;
        (price_impact, volume_impact, mix_impact, Classification::Continuing)
    };

    BridgeBucketResult {
        label,
        dimensions,
        pair: pair.to_string(),
        py_value,
        cy_value,
        total_change,
        price_impact,
        volume_impact,
        mix_impact,
        cost_impact,
        classification,
    }
}

fn pct(value: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        value / denominator * 100.0
    }
}

/// Sums per-bucket results into a pair summary with guarded percentages.
pub fn summarize(buckets: &[BridgeBucketResult]) -> BridgeSummary {
    let mut summary = BridgeSummary::default();
    for bucket in buckets {
        summary.py_value += bucket.py_value;
        summary.cy_value += bucket.cy_value;
        summary.total_change += bucket.total_change;
        summary.price_impact += bucket.price_impact;
        summary.volume_impact += bucket.volume_impact;
        summary.mix_impact += bucket.mix_impact;
        summary.cost_impact += bucket.cost_impact;
        match bucket.classification {
            Classification::New => summary.new_count += 1,
            Classification::Discontinued => summary.discontinued_count += 1,
            Classification::Continuing => summary.continuing_count += 1,
        }
    }
    let magnitude = summary.total_change.abs();
    summary.change_pct = pct(summary.total_change, summary.py_value.abs());
    summary.price_pct = pct(summary.price_impact, magnitude);
    summary.volume_pct = pct(summary.volume_impact, magnitude);
    summary.mix_pct = pct(summary.mix_impact, magnitude);
    summary.cost_pct = pct(summary.cost_impact, magnitude);
    summary
}

/// Field to rank buckets by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactField {
    TotalChange,
    Price,
    Volume,
    Mix,
    Cost,
}

impl ImpactField {
    fn of(&self, bucket: &BridgeBucketResult) -> f64 {
        match self {
            ImpactField::TotalChange => bucket.total_change,
            ImpactField::Price => bucket.price_impact,
            ImpactField::Volume => bucket.volume_impact,
            ImpactField::Mix => bucket.mix_impact,
            ImpactField::Cost => bucket.cost_impact,
        }
    }
}

/// Sorts by absolute magnitude of `field`, descending unless `ascending`.
pub fn sort_buckets(buckets: &mut [BridgeBucketResult], field: ImpactField, ascending: bool) {
    buckets.sort_by(|a, b| {
        let ord = field.of(a).abs().total_cmp(&field.of(b).abs());
        if ascending { ord } else { ord.reverse() }
    });
}

/// Keeps buckets whose dimension values contain `needle`, case-insensitively.
pub fn filter_buckets(buckets: &mut Vec<BridgeBucketResult>, needle: &str) {
    let needle = needle.to_lowercase();
    buckets.retain(|bucket| {
        bucket
            .dimensions
            .iter()
            .any(|value| value.to_lowercase().contains(&needle))
    });
}
