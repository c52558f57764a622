pub mod aggregate;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod data;
pub mod io_utils;
pub mod periods;
pub mod reader;
pub mod report;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    aggregate::RunOutcome,
    cli::{AnalyzeArgs, Cli, Commands, ProbeArgs},
    config::{AnalysisConfig, ModeChoice, PeriodSelection, PriceBasis},
    periods::PeriodRange,
    reader::{CancelFlag, ReadChunkSource, RecordStream, RowSource},
    report::{format_amount, format_pct},
    table::Align,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("pvm_bridge", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => handle_probe(&args),
        Commands::Analyze(args) => handle_analyze(&args),
    }
}

fn handle_probe(args: &ProbeArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    info!(
        "Probing '{}' with delimiter '{}'",
        args.input.display(),
        io_utils::printable_delimiter(delimiter)
    );

    let source = ReadChunkSource::open(&args.input, encoding, reader::DEFAULT_CHUNK_SIZE)?;
    let mut stream = RecordStream::new(source, delimiter as char);
    let header = stream
        .header()?
        .ok_or_else(|| anyhow!("input contains no header row"))?;
    let date_idx = header
        .position(&args.date_column)
        .ok_or_else(|| anyhow!("column '{}' not found in input header", args.date_column))?;

    let mut samples: Vec<String> = Vec::new();
    while args.sample_rows == 0 || samples.len() < args.sample_rows {
        match stream.next_record()? {
            Some(record) => {
                let value = record.field(date_idx).trim();
                if !value.is_empty() {
                    samples.push(value.to_string());
                }
            }
            None => break,
        }
    }
    let refs: Vec<&str> = samples.iter().map(String::as_str).collect();
    let format = periods::detect_date_format(&refs)
        .ok_or_else(|| anyhow!("no parseable dates found in column '{}'", args.date_column))?;

    let mut min: Option<chrono::NaiveDate> = None;
    let mut max: Option<chrono::NaiveDate> = None;
    let mut parsed = 0usize;
    for value in &refs {
        if let Some(date) = periods::parse_date(value, format) {
            parsed += 1;
            min = Some(min.map_or(date, |d| d.min(date)));
            max = Some(max.map_or(date, |d| d.max(date)));
        }
    }
    let (Some(min), Some(max)) = (min, max) else {
        bail!("no parseable dates found in column '{}'", args.date_column);
    };
    info!(
        "Detected format {format}: {parsed} of {} sample(s) parse, spanning {min}..{max}",
        refs.len()
    );

    let windows = periods::discover_fiscal_years(min, max, args.fiscal_year_end);
    let headers = ["fiscal_year", "start", "end", "coverage"]
        .map(String::from)
        .to_vec();
    let rows: Vec<Vec<String>> = windows
        .iter()
        .map(|w| {
            vec![
                w.year.to_string(),
                w.range.start.to_string(),
                w.range.end.to_string(),
                if w.fully_covered { "full" } else { "partial" }.to_string(),
            ]
        })
        .collect();
    table::print_table(
        &headers,
        &rows,
        &[Align::Right, Align::Left, Align::Left, Align::Left],
    );
    Ok(())
}

fn handle_analyze(args: &AnalyzeArgs) -> Result<()> {
    let config = build_config(args)?;
    let warnings = config.validate()?;
    for warning in &warnings {
        warn!("{warning}");
    }

    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    info!(
        "Analyzing '{}' (delimiter '{}'): {}",
        args.input.display(),
        io_utils::printable_delimiter(delimiter),
        config.mode().describe()
    );

    let source = ReadChunkSource::open(&args.input, encoding, args.chunk_size)?;
    let cancel = CancelFlag::new();
    let mut stream = RecordStream::new(source, delimiter as char).with_cancel(cancel.clone());
    let outcome = aggregate::run_analysis(&mut stream, &config, &cancel, None)
        .with_context(|| format!("Analyzing {:?}", args.input))?;
    let aggregated = match outcome {
        RunOutcome::Cancelled(stats) => {
            info!("Run cancelled after {} row(s)", stats.total_rows);
            return Ok(());
        }
        RunOutcome::Complete(result) => result,
    };

    let mut bridged = bridge::compute_bridge(&aggregated, config.mode());
    for pair in &mut bridged.pairs {
        bridge::sort_buckets(&mut pair.buckets, args.sort_by.into(), args.ascending);
    }

    print_summary(&bridged);
    print_buckets(&bridged, args.filter.as_deref(), args.top);

    let stats = &aggregated.stats;
    info!(
        "Rows: {} total = {} included + {} excluded ({} parse, {} outside periods, {} non-positive); {} bucket(s)",
        stats.total_rows,
        stats.included_rows,
        stats.excluded_rows(),
        stats.parse_errors(),
        stats.outside_period_rows,
        stats.non_positive_rows,
        stats.unique_buckets
    );
    let ledger_rows: u64 = aggregated.negatives.iter().map(|entry| entry.count).sum();
    if ledger_rows > 0 {
        warn!(
            "{ledger_rows} row(s) with non-positive sales or quantity were set aside in the negatives ledger"
        );
    }

    if let Some(path) = &args.output {
        report::write_json(path, &aggregated, &bridged)?;
        info!("Wrote JSON report to {path:?}");
    }
    if let Some(path) = &args.detail {
        report::write_detail(path, &aggregated.dimension_names, &bridged, delimiter)?;
        info!("Wrote bucket detail to {path:?}");
    }
    if let Some(path) = &args.negatives {
        report::write_negatives(path, &aggregated, delimiter)?;
        info!("Wrote negatives ledger to {path:?}");
    }
    Ok(())
}

/// Merges the optional YAML configuration with CLI flag overrides.
fn build_config(args: &AnalyzeArgs) -> Result<AnalysisConfig> {
    let base = match &args.config {
        Some(path) => Some(AnalysisConfig::load(path)?),
        None => None,
    };

    let periods = if let Some(end) = args.ltm_end {
        Some(PeriodSelection::LastTwelveMonths { end })
    } else if !args.years.is_empty() {
        Some(PeriodSelection::FiscalYears {
            years: args.years.clone(),
        })
    } else {
        match (args.py_start, args.py_end, args.cy_start, args.cy_end) {
            (Some(py_start), Some(py_end), Some(cy_start), Some(cy_end)) => {
                Some(PeriodSelection::TwoPeriod {
                    py: PeriodRange::new(py_start, py_end),
                    cy: PeriodRange::new(cy_start, cy_end),
                })
            }
            (None, None, None, None) => None,
            _ => bail!("--py-start, --py-end, --cy-start, and --cy-end must be given together"),
        }
    };

    let mut config = match (base, periods) {
        (Some(mut base), overridden) => {
            if let Some(periods) = overridden {
                base.periods = periods;
            }
            base
        }
        (None, Some(periods)) => AnalysisConfig {
            dimensions: Vec::new(),
            date_column: String::new(),
            sales_column: String::new(),
            quantity_column: String::new(),
            cost_column: None,
            date_format: None,
            fiscal_year_end: 12,
            periods,
            mode: ModeChoice::default(),
            price_basis: PriceBasis::default(),
        },
        (None, None) => bail!(
            "no analysis periods specified; use --config, --py-*/--cy-*, --ltm-end, or --years"
        ),
    };

    if !args.dimensions.is_empty() {
        config.dimensions = args.dimensions.clone();
    }
    if let Some(value) = &args.date_column {
        config.date_column = value.clone();
    }
    if let Some(value) = &args.sales_column {
        config.sales_column = value.clone();
    }
    if let Some(value) = &args.quantity_column {
        config.quantity_column = value.clone();
    }
    if let Some(value) = &args.cost_column {
        config.cost_column = Some(value.clone());
    }
    if let Some(value) = &args.date_format {
        config.date_format = Some(value.clone());
    }
    if let Some(value) = args.fiscal_year_end {
        config.fiscal_year_end = value;
    }
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(basis) = args.price_basis {
        config.price_basis = basis.into();
    }
    Ok(config)
}

fn print_summary(bridged: &bridge::BridgeResult) {
    let headers = [
        "pair", "py_value", "cy_value", "change", "price", "volume", "mix", "cost", "change_%",
    ]
    .map(String::from)
    .to_vec();
    let aligns = [
        Align::Left,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
    ];
    let rows: Vec<Vec<String>> = bridged
        .pairs
        .iter()
        .map(|pair| {
            let s = &pair.summary;
            vec![
                pair.label.clone(),
                format_amount(s.py_value),
                format_amount(s.cy_value),
                format_amount(s.total_change),
                format_amount(s.price_impact),
                format_amount(s.volume_impact),
                format_amount(s.mix_impact),
                format_amount(s.cost_impact),
                format_pct(s.change_pct),
            ]
        })
        .collect();
    println!("Bridge summary ({})", bridged.methodology);
    table::print_table(&headers, &rows, &aligns);
}

fn print_buckets(bridged: &bridge::BridgeResult, filter: Option<&str>, top: usize) {
    let headers = [
        "bucket",
        "classification",
        "py_value",
        "cy_value",
        "change",
        "price",
        "volume",
        "mix",
        "cost",
    ]
    .map(String::from)
    .to_vec();
    let aligns = [
        Align::Left,
        Align::Left,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
        Align::Right,
    ];
    for pair in &bridged.pairs {
        let mut buckets = pair.buckets.clone();
        if let Some(needle) = filter {
            bridge::filter_buckets(&mut buckets, needle);
        }
        if top > 0 {
            buckets.truncate(top);
        }
        let rows: Vec<Vec<String>> = buckets
            .iter()
            .map(|bucket| {
                vec![
                    bucket.label.clone(),
                    bucket.classification.to_string(),
                    format_amount(bucket.py_value),
                    format_amount(bucket.cy_value),
                    format_amount(bucket.total_change),
                    format_amount(bucket.price_impact),
                    format_amount(bucket.volume_impact),
                    format_amount(bucket.mix_impact),
                    format_amount(bucket.cost_impact),
                ]
            })
            .collect();
        println!();
        println!(
            "Buckets {} ({} shown of {})",
            pair.label,
            rows.len(),
            pair.buckets.len()
        );
        table::print_table(&headers, &rows, &aligns);
    }
}
