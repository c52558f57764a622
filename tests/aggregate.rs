//! Run-level aggregation tests: classification, accounting, cancellation,
//! and the end-to-end two-row bridge scenario.

use chrono::NaiveDate;
use pvm_bridge::{
    aggregate::{self, RunOutcome},
    bridge,
    config::{AnalysisConfig, ModeChoice, PeriodSelection, PriceBasis},
    periods::{PeriodRange, PeriodTag},
    reader::{CancelFlag, PretokenizedRows, RecordStream, StringChunkSource},
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn two_period_config() -> AnalysisConfig {
    AnalysisConfig {
        dimensions: vec!["region".into()],
        date_column: "date".into(),
        sales_column: "sales".into(),
        quantity_column: "qty".into(),
        cost_column: None,
        date_format: None,
        fiscal_year_end: 12,
        periods: PeriodSelection::TwoPeriod {
            py: PeriodRange::new(date(2023, 1, 1), date(2023, 12, 31)),
            cy: PeriodRange::new(date(2024, 1, 1), date(2024, 12, 31)),
        },
        mode: ModeChoice::Pvm,
        price_basis: PriceBasis::MarginPerUnit,
    }
}

fn run_csv(csv: &str, config: &AnalysisConfig) -> RunOutcome {
    let mut stream = RecordStream::new(StringChunkSource::new([csv.to_string()]), ',');
    aggregate::run_analysis(&mut stream, config, &CancelFlag::new(), None).expect("run")
}

#[test]
fn two_row_scenario_bridges_to_a_pure_price_effect() {
    let csv = "date,region,sales,qty\n\
               2023-03-01,East,100,10\n\
               2024-03-01,East,150,10\n";
    let RunOutcome::Complete(result) = run_csv(csv, &two_period_config()) else {
        panic!("run should complete");
    };

    assert_eq!(result.buckets.len(), 1);
    assert_eq!(result.buckets[0].label(), "East");
    let py = result.buckets[0].periods[0];
    let cy = result.buckets[0].periods[1];
    assert_eq!(py.sales / py.quantity, 10.0);
    assert_eq!(cy.sales / cy.quantity, 15.0);

    let bridged = bridge::compute_bridge(&result, pvm_bridge::config::Mode::Pvm);
    assert_eq!(bridged.pairs.len(), 1);
    assert_eq!(bridged.pairs[0].label, "PY-CY");
    let bucket = &bridged.pairs[0].buckets[0];
    assert_eq!(bucket.total_change, 50.0);
    assert_eq!(bucket.price_impact, 50.0);
    assert_eq!(bucket.volume_impact, 0.0);
    assert_eq!(bucket.mix_impact, 0.0);
}

#[test]
fn date_format_is_autodetected_from_the_stream() {
    // Day-first slash dates; 13 in the first component forces DD/MM/YYYY.
    let csv = "date,region,sales,qty\n\
               13/03/2023,East,100,10\n\
               01/03/2024,East,150,10\n";
    let RunOutcome::Complete(result) = run_csv(csv, &two_period_config()) else {
        panic!("run should complete");
    };
    assert_eq!(result.stats.included_rows, 2);
    assert_eq!(result.stats.min_date, Some(date(2023, 3, 13)));
    assert_eq!(result.stats.max_date, Some(date(2024, 3, 1)));
}

#[test]
fn row_accounting_always_balances() {
    let csv = "date,region,sales,qty\n\
               2023-03-01,East,100,10\n\
               garbage,East,100,10\n\
               2020-01-01,East,100,10\n\
               2023-03-02,East,oops,10\n\
               2023-03-03,East,100,0\n\
               2024-03-01,West,\"$1,200.00\",10\n";
    let RunOutcome::Complete(result) = run_csv(csv, &two_period_config()) else {
        panic!("run should complete");
    };
    let stats = &result.stats;
    assert_eq!(stats.total_rows, 6);
    assert_eq!(stats.included_rows, 2);
    assert_eq!(stats.excluded_rows(), 4);
    assert_eq!(
        stats.excluded_rows(),
        stats.parse_errors() + stats.outside_period_rows + stats.non_positive_rows
    );
    assert_eq!(stats.total_rows, stats.included_rows + stats.excluded_rows());
    assert_eq!(stats.unique_buckets, 2);

    // The zero-quantity row landed in the PY ledger, untouched by buckets.
    assert_eq!(result.negatives[0].count, 1);
    assert_eq!(result.negatives[0].sales, 100.0);
}

#[test]
fn multi_year_runs_chain_consecutive_fiscal_years() {
    let mut config = two_period_config();
    config.fiscal_year_end = 6;
    config.periods = PeriodSelection::FiscalYears {
        years: vec![2023, 2024, 2025],
    };

    // FY boundaries at June 30: 2024-07-01 is FY2025, 2024-06-30 is FY2024.
    let csv = "date,region,sales,qty\n\
               2022-09-01,East,100,10\n\
               2023-09-01,East,120,10\n\
               2024-06-30,East,30,3\n\
               2024-07-01,East,180,12\n";
    let RunOutcome::Complete(result) = run_csv(csv, &config) else {
        panic!("run should complete");
    };
    let tags: Vec<PeriodTag> = result.windows.iter().map(|w| w.tag).collect();
    assert_eq!(
        tags,
        vec![
            PeriodTag::FiscalYear(2023),
            PeriodTag::FiscalYear(2024),
            PeriodTag::FiscalYear(2025),
        ]
    );
    let east = &result.buckets[0];
    assert_eq!(east.periods[0].sales, 100.0);
    assert_eq!(east.periods[1].sales, 150.0);
    assert_eq!(east.periods[2].sales, 180.0);

    let bridged = bridge::compute_bridge(&result, pvm_bridge::config::Mode::Pvm);
    let labels: Vec<&str> = bridged.pairs.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["2023-2024", "2024-2025"]);
    assert_eq!(bridged.pairs[0].buckets[0].total_change, 50.0);
}

#[test]
fn gross_margin_runs_carry_cost_through_the_pipeline() {
    let mut config = two_period_config();
    config.cost_column = Some("cost".into());
    config.mode = ModeChoice::Gm;
    config.price_basis = PriceBasis::SalesPerUnit;

    let csv = "date,region,sales,qty,cost\n\
               2023-03-01,East,100,10,40\n\
               2024-03-01,East,150,10,60\n";
    let mut stream = RecordStream::new(StringChunkSource::new([csv.to_string()]), ',');
    let outcome = aggregate::run_analysis(&mut stream, &config, &CancelFlag::new(), None)
        .expect("run");
    let RunOutcome::Complete(result) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(result.buckets[0].periods[0].cost, 40.0);
    assert_eq!(result.buckets[0].periods[1].cost, 60.0);

    let bridged = bridge::compute_bridge(&result, config.mode());
    let bucket = &bridged.pairs[0].buckets[0];
    // Margin went from 60 to 90; price carries the sales change, cost is
    // broken out separately.
    assert_eq!(bucket.total_change, 30.0);
    assert_eq!(bucket.price_impact, 50.0);
    assert_eq!(bucket.cost_impact, -20.0);
    let sum = bucket.price_impact + bucket.volume_impact + bucket.mix_impact + bucket.cost_impact;
    assert!((sum - bucket.total_change).abs() < 1e-9);
}

#[test]
fn pretokenized_rows_run_the_same_pipeline() {
    let rows = vec![
        vec!["date".into(), "region".into(), "sales".into(), "qty".into()],
        vec!["2023-03-01".into(), "East".into(), "100".into(), "10".into()],
        vec!["2024-03-01".into(), "East".into(), "150".into(), "10".into()],
    ];
    let mut source = PretokenizedRows::new(rows);
    let outcome =
        aggregate::run_analysis(&mut source, &two_period_config(), &CancelFlag::new(), None)
            .expect("run");
    let RunOutcome::Complete(result) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(result.stats.included_rows, 2);
}

#[test]
fn cancelled_runs_return_partial_statistics() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let csv = "date,region,sales,qty\n2023-03-01,East,100,10\n";
    let mut config = two_period_config();
    config.date_format = Some("YYYY-MM-DD".into());
    let mut stream = RecordStream::new(StringChunkSource::new([csv.to_string()]), ',');
    let outcome = aggregate::run_analysis(&mut stream, &config, &cancel, None).expect("run");
    let RunOutcome::Cancelled(stats) = outcome else {
        panic!("run should report cancellation");
    };
    assert_eq!(stats.included_rows, 0);
}

#[test]
fn unknown_columns_fail_before_any_row_is_processed() {
    let csv = "date,region,sales,qty\n2023-03-01,East,100,10\n";
    let mut config = two_period_config();
    config.quantity_column = "units".into();
    let mut stream = RecordStream::new(StringChunkSource::new([csv.to_string()]), ',');
    let err = aggregate::run_analysis(&mut stream, &config, &CancelFlag::new(), None)
        .expect_err("missing column must be fatal");
    assert!(err.to_string().contains("units"));
}

#[test]
fn no_dimensions_collapse_to_a_single_total_bucket() {
    let mut config = two_period_config();
    config.dimensions = Vec::new();
    let csv = "date,region,sales,qty\n\
               2023-03-01,East,100,10\n\
               2023-04-01,West,50,5\n";
    let RunOutcome::Complete(result) = run_csv(csv, &config) else {
        panic!("run should complete");
    };
    assert_eq!(result.buckets.len(), 1);
    assert_eq!(result.buckets[0].label(), "Total");
    assert_eq!(result.buckets[0].periods[0].sales, 150.0);
}
