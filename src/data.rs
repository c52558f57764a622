use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;

/// Column header shared by every record of a run.
///
/// Built once from the first parsed row; records hold an `Arc` to it instead
/// of carrying their own copy of the column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            // First occurrence wins for duplicate column names.
            index.entry(name.clone()).or_insert(position);
        }
        Self { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// One input row keyed by the run's header.
///
/// Fields are padded with empty strings when the row is shorter than the
/// header and silently truncated when it is longer.
#[derive(Debug, Clone)]
pub struct Record {
    header: Arc<Header>,
    fields: Vec<String>,
}

impl Record {
    pub fn new(header: Arc<Header>, mut fields: Vec<String>) -> Self {
        let width = header.len();
        if fields.len() < width {
            fields.resize(width, String::new());
        } else {
            fields.truncate(width);
        }
        Self { header, fields }
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.header
            .position(name)
            .map(|idx| self.fields[idx].as_str())
    }

    /// Positional access; `idx` must come from the same header.
    pub fn field(&self, idx: usize) -> &str {
        self.fields.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.fields.iter().map(String::as_str))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("empty value")]
    Empty,
    #[error("'{0}' is not numeric")]
    NotNumeric(String),
}

/// Parses a monetary or quantity field into an `f64`.
///
/// Strips currency symbols and thousands separators, and reads the
/// accounting negation styles: parentheses (`"(1,234.50)"`) and a trailing
/// minus (`"17.25-"`) both parse negative. A residue that is not numeric is
/// an error, never a silent zero.
pub fn parse_amount(raw: &str) -> Result<f64, AmountParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AmountParseError::Empty);
    }

    let (body, mut negated) = match trimmed.strip_prefix('(') {
        Some(rest) => match rest.strip_suffix(')') {
            Some(inner) => (inner, true),
            None => (trimmed, false),
        },
        None => (trimmed, false),
    };

    let mut cleaned = String::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '$' | '€' | '£' | '¥' | ',' | ' ' | '\u{a0}' => {}
            other => cleaned.push(other),
        }
    }

    let digits = match cleaned.strip_suffix('-') {
        Some(rest) if !rest.is_empty() => {
            negated = !negated;
            rest
        }
        _ => cleaned.as_str(),
    };

    let value: f64 = digits
        .parse()
        .map_err(|_| AmountParseError::NotNumeric(trimmed.to_string()))?;
    Ok(if negated { -value } else { value })
}
