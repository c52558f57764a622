//! Analysis configuration: column mappings, period selection, and mode.
//!
//! A configuration is assembled from CLI flags or loaded from a YAML file,
//! then validated once before a run starts. Hard errors (missing column
//! mappings, impossible ranges) reject the run; data-quality findings
//! (overlapping PY/CY ranges, long gaps) come back as warnings to log.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::periods::{
    self, PeriodRange, PeriodTag, PeriodWarning, PeriodWindow, fiscal_year_range, ltm_range,
};

/// Analysis mode as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeChoice {
    #[default]
    Pvm,
    Gm,
}

/// How the unit price is defined in gross-margin mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceBasis {
    /// Unit value = (sales − cost) / quantity; cost is folded into price.
    #[default]
    MarginPerUnit,
    /// Unit value = sales / quantity; cost change is a separate component.
    SalesPerUnit,
}

/// Resolved analysis mode driving the bridge decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Pvm,
    Gm(PriceBasis),
}

impl Mode {
    pub fn requires_cost(&self) -> bool {
        matches!(self, Mode::Gm(_))
    }

    /// One-line methodology statement for reports and logs.
    pub fn describe(&self) -> &'static str {
        match self {
            Mode::Pvm => "Sales bridge: price, volume, and mix effects on revenue",
            Mode::Gm(PriceBasis::MarginPerUnit) => {
                "Gross-margin bridge: price measured as margin per unit"
            }
            Mode::Gm(PriceBasis::SalesPerUnit) => {
                "Gross-margin bridge: price measured as sales per unit, cost as a separate component"
            }
        }
    }
}

/// Which periods the analysis compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodSelection {
    /// Explicit prior-year and current-year ranges.
    TwoPeriod { py: PeriodRange, cy: PeriodRange },
    /// CY is the twelve months ending on `end`; PY is the twelve months
    /// before that.
    LastTwelveMonths { end: NaiveDate },
    /// Chained year-over-year bridges across the selected fiscal years.
    FiscalYears { years: Vec<i32> },
}

fn default_fiscal_year_end() -> u32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Dimension columns defining the bridge buckets, in display order.
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub date_column: String,
    pub sales_column: String,
    pub quantity_column: String,
    #[serde(default)]
    pub cost_column: Option<String>,
    /// Date format id (e.g. "YYYY-MM-DD"); auto-detected when omitted.
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default = "default_fiscal_year_end")]
    pub fiscal_year_end: u32,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub periods: PeriodSelection,
    #[serde(default)]
    pub mode: ModeChoice,
    #[serde(default)]
    pub price_basis: PriceBasis,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required {0} column mapping")]
    MissingMapping(&'static str),
    #[error("gross-margin analysis requires a cost column mapping")]
    MissingCostColumn,
    #[error("fiscal-year-end month must be between 1 and 12, got {0}")]
    InvalidFiscalMonth(u32),
    #[error("unknown date format id '{0}'")]
    UnknownDateFormat(String),
    #[error("period range {0} starts after it ends")]
    InvertedRange(PeriodRange),
    #[error("multi-year analysis needs at least two distinct fiscal years, got {0}")]
    TooFewYears(usize),
    #[error("column '{name}' ({role}) not found in input header")]
    UnknownColumn { name: String, role: &'static str },
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading analysis config {path:?}"))?;
        let config: AnalysisConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Parsing analysis config {path:?}"))?;
        Ok(config)
    }

    pub fn mode(&self) -> Mode {
        match self.mode {
            ModeChoice::Pvm => Mode::Pvm,
            ModeChoice::Gm => Mode::Gm(self.price_basis),
        }
    }

    /// Rejects unrunnable configurations and surfaces data-quality warnings
    /// for runnable ones.
    pub fn validate(&self) -> Result<Vec<PeriodWarning>, ConfigError> {
        if self.date_column.trim().is_empty() {
            return Err(ConfigError::MissingMapping("date"));
        }
        if self.sales_column.trim().is_empty() {
            return Err(ConfigError::MissingMapping("sales"));
        }
        if self.quantity_column.trim().is_empty() {
            return Err(ConfigError::MissingMapping("quantity"));
        }
        if self.mode().requires_cost()
            && self
                .cost_column
                .as_deref()
                .is_none_or(|c| c.trim().is_empty())
        {
            return Err(ConfigError::MissingCostColumn);
        }
        if !(1..=12).contains(&self.fiscal_year_end) {
            return Err(ConfigError::InvalidFiscalMonth(self.fiscal_year_end));
        }
        if let Some(id) = &self.date_format
            && periods::DateFormat::from_id(id).is_none()
        {
            return Err(ConfigError::UnknownDateFormat(id.clone()));
        }
        let windows = self.windows()?;
        if let [py, cy] = windows.as_slice()
            && py.tag == PeriodTag::Py
        {
            return Ok(periods::validate_ranges(&py.range, &cy.range));
        }
        Ok(Vec::new())
    }

    /// The ordered classification windows of the run. Two-period selections
    /// yield `[PY, CY]`; fiscal-year selections yield one window per
    /// distinct selected year, ascending (non-overlapping by construction).
    pub fn windows(&self) -> Result<Vec<PeriodWindow>, ConfigError> {
        match &self.periods {
            PeriodSelection::TwoPeriod { py, cy } => {
                for range in [py, cy] {
                    if range.start > range.end {
                        return Err(ConfigError::InvertedRange(*range));
                    }
                }
                Ok(vec![
                    PeriodWindow {
                        tag: PeriodTag::Py,
                        range: *py,
                    },
                    PeriodWindow {
                        tag: PeriodTag::Cy,
                        range: *cy,
                    },
                ])
            }
            PeriodSelection::LastTwelveMonths { end } => {
                let cy = ltm_range(*end);
                let py = ltm_range(cy.start.pred_opt().unwrap_or(NaiveDate::MIN));
                Ok(vec![
                    PeriodWindow {
                        tag: PeriodTag::Py,
                        range: py,
                    },
                    PeriodWindow {
                        tag: PeriodTag::Cy,
                        range: cy,
                    },
                ])
            }
            PeriodSelection::FiscalYears { years } => {
                let mut ordered = years.clone();
                ordered.sort_unstable();
                ordered.dedup();
                if ordered.len() < 2 {
                    return Err(ConfigError::TooFewYears(ordered.len()));
                }
                Ok(ordered
                    .into_iter()
                    .map(|year| PeriodWindow {
                        tag: PeriodTag::FiscalYear(year),
                        range: fiscal_year_range(year, self.fiscal_year_end),
                    })
                    .collect())
            }
        }
    }
}
