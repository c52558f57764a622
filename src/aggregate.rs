//! Incremental aggregation of an unbounded row stream into bounded
//! per-bucket accumulators.
//!
//! An [`AggregationContext`] moves through created → accumulating →
//! finalized; `finalize` takes the context by value, so no row can be
//! processed after the result freezes. Every rejected row is counted under
//! exactly one category, so the accounting identity
//! `total == included + excluded` holds for any input stream.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;

use crate::{
    config::{AnalysisConfig, ConfigError},
    data::{Header, Record, parse_amount},
    periods::{self, DateFormat, PeriodTag, PeriodWindow},
    reader::{CancelFlag, RowSource},
};

/// Sentinel for blank dimension values.
pub const UNKNOWN_DIMENSION: &str = "Unknown";
/// Bucket label when no dimension columns are configured.
pub const TOTAL_BUCKET: &str = "Total";

/// Reserved join character for synthesized dimension keys.
const KEY_SEPARATOR: char = '\u{1f}';
/// Rows between cancellation polls in the run driver.
const CANCEL_POLL_ROWS: u64 = 1_000;
/// Rows between progress reports.
const PROGRESS_ROWS: u64 = 10_000;
/// Records buffered to sample the date column when no format is configured.
const DATE_SAMPLE_ROWS: usize = 100;

/// Per-(bucket, period) running sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Accumulator {
    pub sales: f64,
    pub quantity: f64,
    pub cost: f64,
    pub count: u64,
}

impl Accumulator {
    fn add(&mut self, sales: f64, quantity: f64, cost: f64) {
        self.sales += sales;
        self.quantity += quantity;
        self.cost += cost;
        self.count += 1;
    }
}

/// Excluded non-positive rows, tracked per period and never merged back
/// into the bridge accumulators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub count: u64,
    pub sales: f64,
    pub quantity: f64,
    pub cost: f64,
}

impl LedgerEntry {
    fn absorb(&mut self, sales: f64, quantity: f64, cost: f64) {
        self.count += 1;
        self.sales += sales;
        self.quantity += quantity;
        self.cost += cost;
    }
}

/// One dimension bucket with an accumulator per period window.
#[derive(Debug, Clone, Serialize)]
pub struct BucketAggregate {
    #[serde(skip)]
    pub key: String,
    pub dimensions: Vec<String>,
    pub periods: Vec<Accumulator>,
}

impl BucketAggregate {
    /// Human-readable bucket label.
    pub fn label(&self) -> String {
        if self.dimensions.is_empty() {
            TOTAL_BUCKET.to_string()
        } else {
            self.dimensions.join(" / ")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_rows: u64,
    pub included_rows: u64,
    pub date_parse_errors: u64,
    pub value_parse_errors: u64,
    pub outside_period_rows: u64,
    pub non_positive_rows: u64,
    pub unique_buckets: u64,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl RunStats {
    pub fn parse_errors(&self) -> u64 {
        self.date_parse_errors + self.value_parse_errors
    }

    pub fn excluded_rows(&self) -> u64 {
        self.parse_errors() + self.outside_period_rows + self.non_positive_rows
    }

    fn observe_date(&mut self, date: NaiveDate) {
        self.min_date = Some(self.min_date.map_or(date, |d| d.min(date)));
        self.max_date = Some(self.max_date.map_or(date, |d| d.max(date)));
    }
}

/// Where a row ended up. Exactly one outcome per processed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Included,
    DateParseError,
    ValueParseError,
    OutsidePeriods,
    NonPositive,
}

impl RowOutcome {
    pub fn included(&self) -> bool {
        matches!(self, RowOutcome::Included)
    }
}

/// Column bindings and period windows resolved once against the header.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub date_idx: usize,
    pub sales_idx: usize,
    pub quantity_idx: usize,
    pub cost_idx: Option<usize>,
    pub dimension_idxs: Vec<usize>,
    pub dimension_names: Vec<String>,
    pub date_format: DateFormat,
    pub windows: Vec<PeriodWindow>,
}

impl RunPlan {
    pub fn bind(
        config: &AnalysisConfig,
        header: &Header,
        date_format: DateFormat,
    ) -> Result<Self, ConfigError> {
        let position = |name: &str, role: &'static str| {
            header
                .position(name)
                .ok_or_else(|| ConfigError::UnknownColumn {
                    name: name.to_string(),
                    role,
                })
        };
        let cost_idx = match &config.cost_column {
            Some(name) if !name.trim().is_empty() => Some(position(name, "cost")?),
            _ => None,
        };
        let dimension_idxs = config
            .dimensions
            .iter()
            .map(|name| position(name, "dimension"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            date_idx: position(&config.date_column, "date")?,
            sales_idx: position(&config.sales_column, "sales")?,
            quantity_idx: position(&config.quantity_column, "quantity")?,
            cost_idx,
            dimension_idxs,
            dimension_names: config.dimensions.clone(),
            date_format,
            windows: config.windows()?,
        })
    }
}

/// Finalized, immutable aggregation output.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub windows: Vec<PeriodWindow>,
    pub dimension_names: Vec<String>,
    pub buckets: Vec<BucketAggregate>,
    pub negatives: Vec<LedgerEntry>,
    pub stats: RunStats,
}

/// Summed accumulators per period, independent of the bridge math.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodTotal {
    pub tag: PeriodTag,
    pub totals: Accumulator,
}

/// Pure reduction over the finalized buckets.
pub fn calculate_totals(result: &AggregationResult) -> Vec<PeriodTotal> {
    result
        .windows
        .iter()
        .enumerate()
        .map(|(idx, window)| {
            let mut totals = Accumulator::default();
            for bucket in &result.buckets {
                let acc = &bucket.periods[idx];
                totals.sales += acc.sales;
                totals.quantity += acc.quantity;
                totals.cost += acc.cost;
                totals.count += acc.count;
            }
            PeriodTotal {
                tag: window.tag,
                totals,
            }
        })
        .collect()
}

/// Mutable per-run aggregation state. One writer, no concurrent readers.
pub struct AggregationContext {
    plan: RunPlan,
    buckets: Vec<BucketAggregate>,
    key_index: HashMap<String, usize>,
    negatives: Vec<LedgerEntry>,
    stats: RunStats,
    key_scratch: String,
}

impl AggregationContext {
    pub fn new(plan: RunPlan) -> Self {
        let window_count = plan.windows.len();
        Self {
            plan,
            buckets: Vec::new(),
            key_index: HashMap::new(),
            negatives: vec![LedgerEntry::default(); window_count],
            stats: RunStats::default(),
            key_scratch: String::new(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn process_row(&mut self, record: &Record) -> RowOutcome {
        self.stats.total_rows += 1;

        let Some(date) = periods::parse_date(record.field(self.plan.date_idx), self.plan.date_format)
        else {
            self.stats.date_parse_errors += 1;
            return RowOutcome::DateParseError;
        };
        self.stats.observe_date(date);

        let Some(window_idx) = self
            .plan
            .windows
            .iter()
            .position(|window| window.range.contains(date))
        else {
            self.stats.outside_period_rows += 1;
            return RowOutcome::OutsidePeriods;
        };

        let parsed = (
            parse_amount(record.field(self.plan.sales_idx)),
            parse_amount(record.field(self.plan.quantity_idx)),
            match self.plan.cost_idx {
                Some(idx) => parse_amount(record.field(idx)),
                None => Ok(0.0),
            },
        );
        let (Ok(sales), Ok(quantity), Ok(cost)) = parsed else {
            self.stats.value_parse_errors += 1;
            return RowOutcome::ValueParseError;
        };

        if sales <= 0.0 || quantity <= 0.0 {
            self.negatives[window_idx].absorb(sales, quantity, cost);
            self.stats.non_positive_rows += 1;
            return RowOutcome::NonPositive;
        }

        let bucket_idx = self.bucket_index(record);
        self.buckets[bucket_idx].periods[window_idx].add(sales, quantity, cost);
        self.stats.included_rows += 1;
        RowOutcome::Included
    }

    /// Freezes the run. Bucket order is first-seen.
    pub fn finalize(mut self) -> AggregationResult {
        self.stats.unique_buckets = self.buckets.len() as u64;
        AggregationResult {
            windows: self.plan.windows,
            dimension_names: self.plan.dimension_names,
            buckets: self.buckets,
            negatives: self.negatives,
            stats: self.stats,
        }
    }

    /// Returns the partial statistics of a run that will not finalize.
    pub fn into_stats(mut self) -> RunStats {
        self.stats.unique_buckets = self.buckets.len() as u64;
        self.stats
    }

    fn bucket_index(&mut self, record: &Record) -> usize {
        self.key_scratch.clear();
        if self.plan.dimension_idxs.is_empty() {
            self.key_scratch.push_str(TOTAL_BUCKET);
        } else {
            for (pos, idx) in self.plan.dimension_idxs.iter().enumerate() {
                if pos > 0 {
                    self.key_scratch.push(KEY_SEPARATOR);
                }
                let value = record.field(*idx).trim();
                self.key_scratch
                    .push_str(if value.is_empty() { UNKNOWN_DIMENSION } else { value });
            }
        }
        if let Some(idx) = self.key_index.get(self.key_scratch.as_str()) {
            return *idx;
        }
        let dimensions = self
            .plan
            .dimension_idxs
            .iter()
            .map(|idx| {
                let value = record.field(*idx).trim();
                if value.is_empty() {
                    UNKNOWN_DIMENSION.to_string()
                } else {
                    value.to_string()
                }
            })
            .collect();
        let bucket_idx = self.buckets.len();
        self.buckets.push(BucketAggregate {
            key: self.key_scratch.clone(),
            dimensions,
            periods: vec![Accumulator::default(); self.plan.windows.len()],
        });
        self.key_index.insert(self.key_scratch.clone(), bucket_idx);
        bucket_idx
    }
}

/// Outcome of a full run: either a frozen aggregate or the partial
/// statistics of a cooperatively cancelled one.
#[derive(Debug)]
pub enum RunOutcome {
    Complete(AggregationResult),
    Cancelled(RunStats),
}

/// Pulls every record out of `source`, classifies and accumulates it, and
/// finalizes the aggregate. Per-row problems become statistics; transport
/// failures abort; cancellation returns partial statistics.
pub fn run_analysis<S: RowSource>(
    source: &mut S,
    config: &AnalysisConfig,
    cancel: &CancelFlag,
    mut progress: Option<&mut dyn FnMut(&RunStats)>,
) -> Result<RunOutcome> {
    let header = source
        .header()?
        .ok_or_else(|| anyhow!("input contains no header row"))?;

    // Resolve the date column early so format detection can sample it.
    let date_idx =
        header
            .position(&config.date_column)
            .ok_or_else(|| ConfigError::UnknownColumn {
                name: config.date_column.clone(),
                role: "date",
            })?;

    let mut buffered: Vec<Record> = Vec::new();
    let date_format = match &config.date_format {
        Some(id) => DateFormat::from_id(id)
            .ok_or_else(|| ConfigError::UnknownDateFormat(id.clone()))?,
        None => {
            while buffered.len() < DATE_SAMPLE_ROWS {
                match source.next_record()? {
                    Some(record) => buffered.push(record),
                    None => break,
                }
            }
            let samples: Vec<&str> = buffered
                .iter()
                .map(|record| record.field(date_idx).trim())
                .filter(|value| !value.is_empty())
                .collect();
            let detected = periods::detect_date_format(&samples).ok_or_else(|| {
                anyhow!(
                    "could not detect a date format from column '{}'",
                    config.date_column
                )
            })?;
            debug!("Detected date format {detected} from {} sample(s)", samples.len());
            detected
        }
    };

    let plan = RunPlan::bind(config, &header, date_format)?;
    let mut ctx = AggregationContext::new(plan);

    let mut emit = |ctx: &mut AggregationContext, record: Record| {
        ctx.process_row(&record);
        let rows = ctx.stats().total_rows;
        if rows.is_multiple_of(PROGRESS_ROWS) {
            debug!(
                "Processed {rows} row(s), {} bucket(s) so far",
                ctx.buckets.len()
            );
            if let Some(report) = progress.as_mut() {
                report(ctx.stats());
            }
        }
    };

    for record in buffered.drain(..) {
        emit(&mut ctx, record);
    }
    loop {
        if ctx.stats().total_rows.is_multiple_of(CANCEL_POLL_ROWS) && cancel.is_cancelled() {
            warn!("Run cancelled after {} row(s)", ctx.stats().total_rows);
            return Ok(RunOutcome::Cancelled(ctx.into_stats()));
        }
        let next = source.next_record().with_context(|| {
            let stats = ctx.stats();
            format!(
                "Input failed after {} row(s) ({} included)",
                stats.total_rows, stats.included_rows
            )
        })?;
        match next {
            Some(record) => emit(&mut ctx, record),
            None => break,
        }
    }
    if cancel.is_cancelled() {
        warn!("Run cancelled after {} row(s)", ctx.stats().total_rows);
        return Ok(RunOutcome::Cancelled(ctx.into_stats()));
    }

    Ok(RunOutcome::Complete(ctx.finalize()))
}
