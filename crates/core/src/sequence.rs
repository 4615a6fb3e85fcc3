//! Human-readable document numbers: `PREFIX + YYYYMMDD + NNN`.
//!
//! Formatting and parsing only. Counter allocation lives with storage because
//! uniqueness depends on an atomic increment there.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

pub const DEFAULT_PAD_LENGTH: usize = 3;
pub const MAX_PAD_LENGTH: usize = 9;
const DATE_KEY_LEN: usize = 8;
const MAX_PREFIX_LEN: usize = 16;

/// Whether a number came from the atomic counter or from the count-based
/// fallback, which can hand the same value to concurrent callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uniqueness {
    Guaranteed,
    BestEffort,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNumber {
    pub value: String,
    pub prefix: String,
    pub date_key: String,
    pub counter: u64,
    pub uniqueness: Uniqueness,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedNumber {
    pub prefix: String,
    pub date: NaiveDate,
    pub counter: u64,
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Prefixes are short upper-case ASCII tags such as `QT`, `CT` or `FLOW`.
pub fn validate_prefix(prefix: &str) -> Result<(), WorkflowError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(WorkflowError::invalid_input(
            "prefix",
            format!("must be 1 to {MAX_PREFIX_LEN} characters"),
        ));
    }
    if !prefix.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(WorkflowError::invalid_input("prefix", "must be upper-case ASCII letters"));
    }
    Ok(())
}

pub fn validate_pad_length(pad_length: usize) -> Result<(), WorkflowError> {
    if !(1..=MAX_PAD_LENGTH).contains(&pad_length) {
        return Err(WorkflowError::invalid_input(
            "pad_length",
            format!("must be between 1 and {MAX_PAD_LENGTH}"),
        ));
    }
    Ok(())
}

/// Counters that outgrow the padding are written in full rather than
/// truncated.
pub fn format_document_number(
    prefix: &str,
    date: NaiveDate,
    counter: u64,
    pad_length: usize,
) -> String {
    format!("{prefix}{}{counter:0>width$}", date_key(date), width = pad_length)
}

pub fn parse_document_number(value: &str, prefix: &str) -> Option<ParsedNumber> {
    let rest = value.strip_prefix(prefix)?;
    if rest.len() <= DATE_KEY_LEN || !rest.is_char_boundary(DATE_KEY_LEN) {
        return None;
    }
    let (date_part, counter_part) = rest.split_at(DATE_KEY_LEN);
    if !counter_part.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
    let counter = counter_part.parse().ok()?;
    Some(ParsedNumber { prefix: prefix.to_owned(), date, counter })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        format_document_number, parse_document_number, validate_pad_length, validate_prefix,
    };

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date")
    }

    #[test]
    fn numbers_are_prefix_date_and_padded_counter() {
        assert_eq!(format_document_number("QT", day(), 7, 3), "QT20260301007");
        assert_eq!(format_document_number("FLOW", day(), 12, 3), "FLOW20260301012");
        assert_eq!(format_document_number("RPT", day(), 1234, 3), "RPT202603011234");
    }

    #[test]
    fn formatted_numbers_parse_back() {
        let value = format_document_number("CT", day(), 42, 4);
        let parsed = parse_document_number(&value, "CT").expect("parses");
        assert_eq!(parsed.date, day());
        assert_eq!(parsed.counter, 42);
    }

    #[test]
    fn foreign_or_malformed_numbers_do_not_parse() {
        assert_eq!(parse_document_number("CT20260301001", "QT"), None);
        assert_eq!(parse_document_number("QT20261301001", "QT"), None);
        assert_eq!(parse_document_number("QT20260301", "QT"), None);
        assert_eq!(parse_document_number("QT2026030100A", "QT"), None);
    }

    #[test]
    fn prefix_and_padding_are_validated() {
        assert!(validate_prefix("QT").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("qt").is_err());
        assert!(validate_prefix("QT-").is_err());
        assert!(validate_pad_length(3).is_ok());
        assert!(validate_pad_length(0).is_err());
        assert!(validate_pad_length(10).is_err());
    }
}
