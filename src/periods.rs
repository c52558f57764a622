//! Calendar arithmetic for period classification.
//!
//! Pure functions over `chrono::NaiveDate`: date-format detection and
//! parsing, fiscal-year math with a configurable year-end month,
//! Last-Twelve-Months windows, and inclusive range membership. Nothing in
//! this module performs I/O or holds run state.

use std::{fmt, sync::OnceLock};

use chrono::{Datelike, Days, Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Calendar years accepted while scoring date-format candidates.
const DETECTION_YEAR_MIN: i32 = 1900;
const DETECTION_YEAR_MAX: i32 = 2100;

/// Two slash formats scoring within this window trigger the
/// day/month-ordering disambiguation scan.
const AMBIGUITY_WINDOW: f64 = 0.1;

/// The fixed, ordered catalog of recognized date formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    IsoDash,
    MonthDaySlash,
    DayMonthSlash,
    IsoSlash,
    DayMonthDash,
    DayMonthDot,
}

impl DateFormat {
    pub const CATALOG: [DateFormat; 6] = [
        DateFormat::IsoDash,
        DateFormat::MonthDaySlash,
        DateFormat::DayMonthSlash,
        DateFormat::IsoSlash,
        DateFormat::DayMonthDash,
        DateFormat::DayMonthDot,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            DateFormat::IsoDash => "YYYY-MM-DD",
            DateFormat::MonthDaySlash => "MM/DD/YYYY",
            DateFormat::DayMonthSlash => "DD/MM/YYYY",
            DateFormat::IsoSlash => "YYYY/MM/DD",
            DateFormat::DayMonthDash => "DD-MM-YYYY",
            DateFormat::DayMonthDot => "DD.MM.YYYY",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::CATALOG
            .into_iter()
            .find(|format| format.id().eq_ignore_ascii_case(id.trim()))
    }

    fn chrono_format(&self) -> &'static str {
        match self {
            DateFormat::IsoDash => "%Y-%m-%d",
            DateFormat::MonthDaySlash => "%m/%d/%Y",
            DateFormat::DayMonthSlash => "%d/%m/%Y",
            DateFormat::IsoSlash => "%Y/%m/%d",
            DateFormat::DayMonthDash => "%d-%m-%Y",
            DateFormat::DayMonthDot => "%d.%m.%Y",
        }
    }

    fn pattern(&self) -> &'static Regex {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                r"^\d{4}-\d{1,2}-\d{1,2}$",
                r"^\d{1,2}/\d{1,2}/\d{4}$",
                r"^\d{1,2}/\d{1,2}/\d{4}$",
                r"^\d{4}/\d{1,2}/\d{1,2}$",
                r"^\d{1,2}-\d{1,2}-\d{4}$",
                r"^\d{1,2}\.\d{1,2}\.\d{4}$",
            ]
            .iter()
            .map(|p| Regex::new(p).expect("static date pattern"))
            .collect()
        });
        &patterns[Self::CATALOG
            .iter()
            .position(|f| f == self)
            .expect("format present in catalog")]
    }

    fn matches(&self, value: &str) -> bool {
        self.pattern().is_match(value)
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Parses `value` with a known format. Failure is `None`, never a default.
pub fn parse_date(value: &str, format: DateFormat) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, format.chrono_format()).ok()
}

/// Parses `value` by format id; an unknown id falls back to detecting the
/// format from the value itself.
pub fn parse_date_with_id(value: &str, format_id: &str) -> Option<NaiveDate> {
    let format = DateFormat::from_id(format_id).or_else(|| detect_date_format(&[value]))?;
    parse_date(value, format)
}

/// Detects the date format of a sample set.
///
/// Every catalog format is scored by the fraction of samples that match its
/// pattern and parse to a year within [1900, 2100]; the highest score wins,
/// earlier catalog position breaking exact ties. When the two slash-delimited
/// month/day orderings score within 0.1 of each other, any sample with a
/// numeric component exceeding 12 pins down which component is the day.
/// Returns `None` when no sample is parseable.
pub fn detect_date_format(samples: &[&str]) -> Option<DateFormat> {
    let samples: Vec<&str> = samples
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if samples.is_empty() {
        return None;
    }

    let scores: Vec<f64> = DateFormat::CATALOG
        .iter()
        .map(|format| score_format(*format, &samples))
        .collect();

    // Strict comparison keeps the earliest catalog entry on exact ties.
    let mut best_idx = 0;
    for (idx, score) in scores.iter().copied().enumerate().skip(1) {
        if score > scores[best_idx] {
            best_idx = idx;
        }
    }
    if scores[best_idx] == 0.0 {
        return None;
    }
    let best = DateFormat::CATALOG[best_idx];

    if matches!(
        best,
        DateFormat::MonthDaySlash | DateFormat::DayMonthSlash
    ) {
        let mdy = score_format(DateFormat::MonthDaySlash, &samples);
        let dmy = score_format(DateFormat::DayMonthSlash, &samples);
        if (mdy - dmy).abs() <= AMBIGUITY_WINDOW
            && let Some(resolved) = disambiguate_slash_order(&samples)
        {
            return Some(resolved);
        }
    }
    Some(best)
}

fn score_format(format: DateFormat, samples: &[&str]) -> f64 {
    let valid = samples
        .iter()
        .filter(|sample| {
            format.matches(sample)
                && parse_date(sample, format).is_some_and(|date| {
                    (DETECTION_YEAR_MIN..=DETECTION_YEAR_MAX).contains(&date.year())
                })
        })
        .count();
    valid as f64 / samples.len() as f64
}

/// A component greater than 12 must be the day; the first sample that has
/// one settles the slash ordering.
fn disambiguate_slash_order(samples: &[&str]) -> Option<DateFormat> {
    for sample in samples {
        if !DateFormat::MonthDaySlash.matches(sample) {
            continue;
        }
        let mut parts = sample.split('/');
        let first: u32 = parts.next()?.parse().ok()?;
        let second: u32 = parts.next()?.parse().ok()?;
        if first > 12 && second <= 12 {
            return Some(DateFormat::DayMonthSlash);
        }
        if second > 12 && first <= 12 {
            return Some(DateFormat::MonthDaySlash);
        }
    }
    None
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for PeriodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Tag identifying which analysis period an accumulator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodTag {
    Py,
    Cy,
    FiscalYear(i32),
}

impl fmt::Display for PeriodTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodTag::Py => f.write_str("PY"),
            PeriodTag::Cy => f.write_str("CY"),
            PeriodTag::FiscalYear(year) => write!(f, "FY{year}"),
        }
    }
}

impl Serialize for PeriodTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One classification window of a run: a tag plus its inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodWindow {
    pub tag: PeriodTag,
    pub range: PeriodRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodAssignment {
    Py,
    Cy,
    Unclassified,
}

/// Assigns a date to PY or CY. Ranges are inclusive and may overlap; a date
/// inside both counts toward PY (overlap is surfaced as a configuration
/// warning, not resolved here).
pub fn classify_period(
    date: NaiveDate,
    py: &PeriodRange,
    cy: &PeriodRange,
) -> PeriodAssignment {
    if py.contains(date) {
        PeriodAssignment::Py
    } else if cy.contains(date) {
        PeriodAssignment::Cy
    } else {
        PeriodAssignment::Unclassified
    }
}

/// Fiscal year of `date` for a fiscal year ending in month `end_month`.
/// Months after the year-end month roll into the next fiscal year.
///
/// `end_month` must be in 1..=12 (validated at configuration time).
pub fn fiscal_year_of(date: NaiveDate, end_month: u32) -> i32 {
    if date.month() > end_month {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Inclusive range of fiscal year `year`: the day after `end_month` of the
/// prior calendar year through the last day of `end_month` in `year`. With
/// `end_month == 12` this is the calendar year itself.
pub fn fiscal_year_range(year: i32, end_month: u32) -> PeriodRange {
    let start = if end_month == 12 {
        ymd(year, 1, 1)
    } else {
        ymd(year - 1, end_month + 1, 1)
    };
    let end = last_day_of_month(year, end_month);
    PeriodRange::new(start, end)
}

/// The Last-Twelve-Months window ending on `end`, inclusive: starts the day
/// after the same calendar date one year earlier (month-end clamped).
pub fn ltm_range(end: NaiveDate) -> PeriodRange {
    let start = end
        .checked_sub_months(Months::new(12))
        .and_then(|d| d.checked_add_days(Days::new(1)))
        .unwrap_or(NaiveDate::MIN);
    PeriodRange::new(start, end)
}

/// A fiscal year touched by the observed data range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalYearWindow {
    pub year: i32,
    pub range: PeriodRange,
    pub fully_covered: bool,
}

/// Enumerates every fiscal year touched by the observed [min, max] date
/// range, flagging those the data spans end to end.
pub fn discover_fiscal_years(
    min: NaiveDate,
    max: NaiveDate,
    end_month: u32,
) -> Vec<FiscalYearWindow> {
    if max < min {
        return Vec::new();
    }
    let first = fiscal_year_of(min, end_month);
    let last = fiscal_year_of(max, end_month);
    (first..=last)
        .map(|year| {
            let range = fiscal_year_range(year, end_month);
            FiscalYearWindow {
                year,
                range,
                fully_covered: min <= range.start && max >= range.end,
            }
        })
        .collect()
}

/// Maximum PY→CY gap tolerated without a warning.
const MAX_SILENT_GAP_DAYS: i64 = 365;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodWarning {
    #[error("prior and current period ranges overlap by {days} day(s); rows in the overlap count toward the prior period")]
    Overlap { days: i64 },
    #[error("gap of {days} day(s) between prior and current period ranges")]
    Gap { days: i64 },
}

/// Flags (never rejects) overlapping PY/CY ranges and gaps exceeding a year.
pub fn validate_ranges(py: &PeriodRange, cy: &PeriodRange) -> Vec<PeriodWarning> {
    let mut warnings = Vec::new();
    let overlap_start = py.start.max(cy.start);
    let overlap_end = py.end.min(cy.end);
    if overlap_start <= overlap_end {
        let days = (overlap_end - overlap_start).num_days() + 1;
        warnings.push(PeriodWarning::Overlap { days });
        return warnings;
    }
    let gap = if py.end < cy.start {
        (cy.start - py.end).num_days() - 1
    } else {
        (py.start - cy.end).num_days() - 1
    };
    if gap > MAX_SILENT_GAP_DAYS {
        warnings.push(PeriodWarning::Gap { days: gap });
    }
    warnings
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("fiscal-year-end month must be 1..=12")
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month_start = if month == 12 {
        ymd(year + 1, 1, 1)
    } else {
        ymd(year, month + 1, 1)
    };
    next_month_start.pred_opt().unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn detects_iso_dates() {
        let samples = ["2024-01-31", "2024-02-01", "2023-12-25"];
        assert_eq!(detect_date_format(&samples), Some(DateFormat::IsoDash));
    }

    #[test]
    fn component_above_twelve_disambiguates_slash_order() {
        let samples = ["13/01/2024", "02/05/2024"];
        assert_eq!(
            detect_date_format(&samples),
            Some(DateFormat::DayMonthSlash)
        );

        let samples = ["01/13/2024", "05/02/2024"];
        assert_eq!(
            detect_date_format(&samples),
            Some(DateFormat::MonthDaySlash)
        );
    }

    #[test]
    fn undisambiguated_slash_samples_fall_back_to_catalog_order() {
        // Both orderings parse every sample; MM/DD/YYYY comes first.
        let samples = ["01/02/2024"];
        assert_eq!(
            detect_date_format(&samples),
            Some(DateFormat::MonthDaySlash)
        );
    }

    #[test]
    fn detection_rejects_unparseable_samples() {
        assert_eq!(detect_date_format(&["not a date", ""]), None);
        assert_eq!(detect_date_format(&[]), None);
        // Years outside [1900, 2100] do not count as valid parses.
        assert_eq!(detect_date_format(&["0001-01-01"]), None);
    }

    #[test]
    fn parse_date_with_id_falls_back_to_detection() {
        let parsed = parse_date_with_id("2024-05-06", "no-such-format");
        assert_eq!(parsed, Some(date(2024, 5, 6)));
        assert_eq!(parse_date_with_id("garbage", "no-such-format"), None);
    }

    #[test]
    fn fiscal_year_boundary_with_june_year_end() {
        assert_eq!(fiscal_year_of(date(2024, 7, 1), 6), 2025);
        assert_eq!(fiscal_year_of(date(2024, 6, 30), 6), 2024);
    }

    #[test]
    fn fiscal_year_range_spans_the_expected_months() {
        let fy2024 = fiscal_year_range(2024, 6);
        assert_eq!(fy2024.start, date(2023, 7, 1));
        assert_eq!(fy2024.end, date(2024, 6, 30));

        let calendar = fiscal_year_range(2024, 12);
        assert_eq!(calendar.start, date(2024, 1, 1));
        assert_eq!(calendar.end, date(2024, 12, 31));
    }

    #[test]
    fn ltm_range_covers_twelve_inclusive_months() {
        let range = ltm_range(date(2024, 3, 31));
        assert_eq!(range.start, date(2023, 4, 1));
        assert_eq!(range.end, date(2024, 3, 31));

        // Leap-day end clamps through the month subtraction.
        let leap = ltm_range(date(2024, 2, 29));
        assert_eq!(leap.start, date(2023, 3, 1));
    }

    #[test]
    fn discover_fiscal_years_flags_full_coverage() {
        let windows = discover_fiscal_years(date(2022, 7, 1), date(2024, 1, 15), 6);
        let years: Vec<i32> = windows.iter().map(|w| w.year).collect();
        assert_eq!(years, vec![2023, 2024]);
        assert!(windows[0].fully_covered);
        assert!(!windows[1].fully_covered);
    }

    #[test]
    fn classify_period_prefers_py_on_overlap() {
        let py = PeriodRange::new(date(2023, 1, 1), date(2023, 12, 31));
        let cy = PeriodRange::new(date(2023, 12, 1), date(2024, 11, 30));
        assert_eq!(
            classify_period(date(2023, 12, 15), &py, &cy),
            PeriodAssignment::Py
        );
        assert_eq!(
            classify_period(date(2024, 1, 15), &py, &cy),
            PeriodAssignment::Cy
        );
        assert_eq!(
            classify_period(date(2025, 1, 1), &py, &cy),
            PeriodAssignment::Unclassified
        );
    }

    #[test]
    fn validate_ranges_warns_on_overlap_and_long_gaps() {
        let py = PeriodRange::new(date(2023, 1, 1), date(2023, 12, 31));
        let cy = PeriodRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert!(validate_ranges(&py, &cy).is_empty());

        let overlapping = PeriodRange::new(date(2023, 12, 1), date(2024, 11, 30));
        assert_eq!(
            validate_ranges(&py, &overlapping),
            vec![PeriodWarning::Overlap { days: 31 }]
        );

        let distant = PeriodRange::new(date(2026, 1, 1), date(2026, 12, 31));
        assert_eq!(
            validate_ranges(&py, &distant),
            vec![PeriodWarning::Gap { days: 731 }]
        );
    }
}
