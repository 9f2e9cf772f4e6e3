use chrono::NaiveDate;
use kitty_core::Money;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// Column positions of an upstream statement export. `amount_column` is a
/// signed alternative to separate credit/debit columns (positive = credit).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatementColumnMapping {
    pub date_column: Option<usize>,
    pub narration_column: Option<usize>,
    pub credit_column: Option<usize>,
    pub debit_column: Option<usize>,
    pub amount_column: Option<usize>,
    pub code_column: Option<usize>,
    pub date_format: String,
}

impl Default for StatementColumnMapping {
    fn default() -> Self {
        Self {
            date_column: Some(0),
            narration_column: Some(1),
            credit_column: Some(2),
            debit_column: Some(3),
            amount_column: None,
            code_column: None,
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatementProfile {
    pub name: String,
    pub mapping: StatementColumnMapping,
    pub has_header: bool,
    pub delimiter: String,
}

impl Default for StatementProfile {
    fn default() -> Self {
        Self {
            name: "Default statement".to_string(),
            mapping: StatementColumnMapping::default(),
            has_header: true,
            delimiter: ",".to_string(),
        }
    }
}

/// One raw line handed over by the statement-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    pub date: NaiveDate,
    pub narration: String,
    pub credit: Money,
    pub debit: Money,
    pub transaction_code: Option<String>,
}

impl StatementRow {
    pub fn credit(date: NaiveDate, narration: &str, credit: Money) -> Self {
        Self {
            date,
            narration: narration.to_string(),
            credit,
            debit: Money::zero(),
            transaction_code: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.transaction_code = Some(code.to_string());
        self
    }

    /// Debit-only and zero-credit lines carry nothing to attribute.
    pub fn is_credit(&self) -> bool {
        self.credit.is_positive()
    }
}

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("No data rows")]
    NoDataRows,
}

pub struct StatementReader;

impl StatementReader {
    pub fn parse_profile<R: Read>(
        reader: &mut csv::Reader<R>,
        profile: &StatementProfile,
    ) -> Result<Vec<StatementRow>, StatementError> {
        let mut rows = Vec::new();
        let mapping = &profile.mapping;
        let date_col = mapping
            .date_column
            .ok_or_else(|| StatementError::MissingColumn("date_column".to_string()))?;
        let narration_col = mapping
            .narration_column
            .ok_or_else(|| StatementError::MissingColumn("narration_column".to_string()))?;

        for result in reader.records() {
            let record = result?;

            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            let field = record
                .get(date_col)
                .ok_or_else(|| StatementError::MissingColumn(format!("date_column {}", date_col)))?;
            let date = parse_date(field, &mapping.date_format)?;

            let narration = record.get(narration_col).unwrap_or_default().trim().to_string();

            let (credit, debit) = if let Some(col) = mapping.amount_column {
                let amount = parse_amount(record.get(col).unwrap_or_default())?;
                if amount >= 0 {
                    (amount, 0)
                } else {
                    (0, -amount)
                }
            } else if mapping.credit_column.is_some() || mapping.debit_column.is_some() {
                let read = |col: Option<usize>| -> Result<i64, StatementError> {
                    col.and_then(|c| record.get(c))
                        .filter(|s| !s.trim().is_empty())
                        .map(parse_amount)
                        .transpose()
                        .map(|v| v.unwrap_or(0).abs())
                };
                (read(mapping.credit_column)?, read(mapping.debit_column)?)
            } else {
                return Err(StatementError::MissingColumn("credit_column".to_string()));
            };

            let transaction_code = mapping
                .code_column
                .and_then(|col| record.get(col))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());

            rows.push(StatementRow {
                date,
                narration,
                credit: Money::from_cents(credit),
                debit: Money::from_cents(debit),
                transaction_code,
            });
        }

        if rows.is_empty() {
            return Err(StatementError::NoDataRows);
        }

        tracing::debug!(profile = %profile.name, rows = rows.len(), "read statement rows");
        Ok(rows)
    }

    pub fn detect_columns<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>, StatementError> {
        let mut headers = Vec::new();

        if let Some(result) = reader.records().next() {
            let record = result?;
            headers = record.iter().map(|s| s.to_string()).collect();
        }

        Ok(headers)
    }
}

fn parse_date(s: &str, format: &str) -> Result<NaiveDate, StatementError> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Ok(date);
    }

    for fmt in &[
        "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%d %b %Y", "%d-%b-%Y", "%Y-%m-%d",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(StatementError::InvalidDate(s.to_string()))
}

fn parse_amount(s: &str) -> Result<i64, StatementError> {
    let s = s.trim();
    let (negative, s) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };
    let s = s
        .trim_start_matches("KES")
        .trim_start_matches("KSh")
        .replace([',', ' '], "");
    let mut dec = Decimal::from_str(&s).map_err(|_| StatementError::InvalidAmount(s.to_string()))?;
    if negative {
        dec = -dec;
    }
    let cents = (dec * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| StatementError::InvalidAmount(s.to_string()))?;
    Ok(cents)
}

pub fn read_statement<R: Read>(
    data: R,
    profile: &StatementProfile,
) -> Result<Vec<StatementRow>, StatementError> {
    let delimiter = profile
        .delimiter
        .as_bytes()
        .first()
        .copied()
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    StatementReader::parse_profile(&mut reader, profile)
}
