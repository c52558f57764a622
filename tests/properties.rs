//! Randomized properties: parser chunk-split idempotence and bridge
//! reconciliation.

use chrono::NaiveDate;
use proptest::prelude::*;
use pvm_bridge::{
    aggregate::{Accumulator, AggregationResult, BucketAggregate, RunStats},
    bridge::{self, Classification},
    config::{Mode, PriceBasis},
    periods::{PeriodRange, PeriodTag, PeriodWindow},
    reader::{RecordStream, RowSource, StringChunkSource},
};

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn parse_rows(chunks: Vec<String>) -> Vec<Vec<String>> {
    let mut stream = RecordStream::new(StringChunkSource::new(chunks), ',');
    let mut rows = Vec::new();
    if let Some(header) = stream.header().expect("parse") {
        rows.push(header.names().to_vec());
    }
    while let Some(record) = stream.next_record().expect("parse") {
        rows.push(record.iter().map(|(_, value)| value.to_string()).collect());
    }
    rows
}

fn two_period_result(buckets: Vec<BucketAggregate>) -> AggregationResult {
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
    AggregationResult {
        windows: vec![
            PeriodWindow {
                tag: PeriodTag::Py,
                range: PeriodRange::new(date(2023, 1, 1), date(2023, 12, 31)),
            },
            PeriodWindow {
                tag: PeriodTag::Cy,
                range: PeriodRange::new(date(2024, 1, 1), date(2024, 12, 31)),
            },
        ],
        dimension_names: vec!["region".into()],
        buckets,
        negatives: Vec::new(),
        stats: RunStats::default(),
    }
}

fn accumulator() -> impl Strategy<Value = Accumulator> {
    // Zero quantity with prob ~1/5 exercises the new/discontinued paths.
    (
        0.0f64..1e6,
        prop_oneof![4 => 1.0f64..1e4, 1 => Just(0.0)],
        0.0f64..1e6,
    )
        .prop_map(|(sales, quantity, cost)| Accumulator {
            sales: if quantity == 0.0 { 0.0 } else { sales },
            quantity,
            cost,
            count: if quantity == 0.0 { 0 } else { 1 },
        })
}

fn modes() -> impl Strategy<Value = Mode> {
    prop_oneof![
        Just(Mode::Pvm),
        Just(Mode::Gm(PriceBasis::MarginPerUnit)),
        Just(Mode::Gm(PriceBasis::SalesPerUnit)),
    ]
}

proptest! {
    #[test]
    fn chunk_splits_never_change_the_parsed_rows(
        cells in prop::collection::vec(
            prop::collection::vec("[a-zA-Z0-9 ,\"\n-]{0,12}", 3),
            2..8,
        ),
        split in 1usize..64,
    ) {
        let input: String = cells
            .iter()
            .map(|row| row.iter().map(|cell| quote(cell)).collect::<Vec<_>>().join(","))
            .map(|line| format!("{line}\n"))
            .collect();

        let whole = parse_rows(vec![input.clone()]);

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < input.len() {
            let mut end = (start + split).min(input.len());
            while !input.is_char_boundary(end) {
                end += 1;
            }
            chunks.push(input[start..end].to_string());
            start = end;
        }
        prop_assert_eq!(parse_rows(chunks), whole);
    }

    #[test]
    fn bridge_components_always_reconcile(
        pairs in prop::collection::vec((accumulator(), accumulator()), 1..12),
        mode in modes(),
    ) {
        let buckets = pairs
            .iter()
            .enumerate()
            .map(|(idx, (py, cy))| BucketAggregate {
                key: format!("bucket-{idx}"),
                dimensions: vec![format!("bucket-{idx}")],
                periods: vec![*py, *cy],
            })
            .collect();
        let result = two_period_result(buckets);
        let bridged = bridge::compute_bridge(&result, mode);

        for pair in &bridged.pairs {
            for bucket in &pair.buckets {
                let sum = bucket.price_impact
                    + bucket.volume_impact
                    + bucket.mix_impact
                    + bucket.cost_impact;
                let tolerance = 1e-6 * bucket.total_change.abs().max(1.0);
                prop_assert!((sum - bucket.total_change).abs() <= tolerance);
                if bucket.classification != Classification::Continuing {
                    prop_assert_eq!(bucket.price_impact, 0.0);
                    prop_assert_eq!(bucket.mix_impact, 0.0);
                }
            }
            let summary = &pair.summary;
            let sum = summary.price_impact
                + summary.volume_impact
                + summary.mix_impact
                + summary.cost_impact;
            let tolerance = 1e-6 * summary.total_change.abs().max(1.0);
            prop_assert!((sum - summary.total_change).abs() <= tolerance);
        }
    }
}
