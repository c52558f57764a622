use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    bridge::ImpactField,
    config::{ModeChoice, PriceBasis},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Streaming Price/Volume/Mix bridge analysis for delimited sales data",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sample a date column: detect its format and the fiscal years covered
    Probe(ProbeArgs),
    /// Run the full Price/Volume/Mix (or Gross Margin) bridge
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input delimited file to inspect ('-' reads standard input)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Column holding the transaction date
    #[arg(long = "date-column")]
    pub date_column: String,
    /// Number of rows to sample (0 means full scan)
    #[arg(long, default_value_t = 200)]
    pub sample_rows: usize,
    /// Fiscal-year-end month (1-12) used when listing covered years
    #[arg(long = "fiscal-year-end", default_value_t = 12)]
    pub fiscal_year_end: u32,
    /// Delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Input delimited file to analyze ('-' reads standard input)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML analysis configuration; flags below override its values
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Dimension columns defining the bridge buckets
    #[arg(short = 'D', long = "dimensions", value_delimiter = ',')]
    pub dimensions: Vec<String>,
    /// Column holding the transaction date
    #[arg(long = "date-column")]
    pub date_column: Option<String>,
    /// Column holding the sales amount
    #[arg(long = "sales-column")]
    pub sales_column: Option<String>,
    /// Column holding the quantity
    #[arg(long = "quantity-column")]
    pub quantity_column: Option<String>,
    /// Column holding the cost amount (required for gm mode)
    #[arg(long = "cost-column")]
    pub cost_column: Option<String>,
    /// Date format id such as YYYY-MM-DD (auto-detected when omitted)
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    /// Fiscal-year-end month (1-12)
    #[arg(long = "fiscal-year-end")]
    pub fiscal_year_end: Option<u32>,
    /// Prior-period start date (ISO)
    #[arg(long = "py-start")]
    pub py_start: Option<NaiveDate>,
    /// Prior-period end date (ISO)
    #[arg(long = "py-end")]
    pub py_end: Option<NaiveDate>,
    /// Current-period start date (ISO)
    #[arg(long = "cy-start")]
    pub cy_start: Option<NaiveDate>,
    /// Current-period end date (ISO)
    #[arg(long = "cy-end")]
    pub cy_end: Option<NaiveDate>,
    /// Compare the twelve months ending on this date against the prior twelve
    #[arg(long = "ltm-end", conflicts_with_all = ["py_start", "py_end", "cy_start", "cy_end"])]
    pub ltm_end: Option<NaiveDate>,
    /// Chain year-over-year bridges across these fiscal years
    #[arg(long = "years", value_delimiter = ',', conflicts_with = "ltm_end")]
    pub years: Vec<i32>,
    /// Analysis mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Price definition for gm mode
    #[arg(long = "price-basis", value_enum)]
    pub price_basis: Option<PriceBasisArg>,
    /// Delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Read chunk size in bytes
    #[arg(long = "chunk-size", default_value_t = crate::reader::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Rank buckets by this impact field
    #[arg(long = "sort-by", value_enum, default_value = "total-change")]
    pub sort_by: SortFieldArg,
    /// Sort ascending instead of descending
    #[arg(long)]
    pub ascending: bool,
    /// Keep only buckets whose dimensions contain this substring
    #[arg(long)]
    pub filter: Option<String>,
    /// Buckets to display per pair (0 = all)
    #[arg(long, default_value_t = 20)]
    pub top: usize,
    /// Write the full analysis as JSON
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write per-bucket detail as a delimited file
    #[arg(long)]
    pub detail: Option<PathBuf>,
    /// Write the negative/zero-value ledger as a delimited file
    #[arg(long)]
    pub negatives: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ModeArg {
    Pvm,
    Gm,
}

impl From<ModeArg> for ModeChoice {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Pvm => ModeChoice::Pvm,
            ModeArg::Gm => ModeChoice::Gm,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum PriceBasisArg {
    MarginPerUnit,
    SalesPerUnit,
}

impl From<PriceBasisArg> for PriceBasis {
    fn from(value: PriceBasisArg) -> Self {
        match value {
            PriceBasisArg::MarginPerUnit => PriceBasis::MarginPerUnit,
            PriceBasisArg::SalesPerUnit => PriceBasis::SalesPerUnit,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum SortFieldArg {
    TotalChange,
    Price,
    Volume,
    Mix,
    Cost,
}

impl From<SortFieldArg> for ImpactField {
    fn from(value: SortFieldArg) -> Self {
        match value {
            SortFieldArg::TotalChange => ImpactField::TotalChange,
            SortFieldArg::Price => ImpactField::Price,
            SortFieldArg::Volume => ImpactField::Volume,
            SortFieldArg::Mix => ImpactField::Mix,
            SortFieldArg::Cost => ImpactField::Cost,
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
