//! Record parser for data-logger table exports.
//!
//! The export is comma-delimited with a fixed preamble:
//!
//! 1. banner with station and program metadata (ignored)
//! 2. header with the field names
//! 3. units row (ignored)
//! 4. aggregation row, e.g. `"Smp"`, `"Avg"` (ignored)
//!
//! Every following line is a data line. Tokens are zipped positionally with the
//! header and typed by their lexical shape.

use crate::reading::{ReadingSet, Value};
use thiserror::Error;

/// One-based line number of the header line.
pub const HEADER_LINE: usize = 2;

/// One-based line number of the first data line.
pub const FIRST_DATA_LINE: usize = 5;

/// Token written by the logger when a value is missing.
pub const NAN_SENTINEL: &str = "NAN";

const QUOTE: char = '"';
const DELIMITER: char = ',';

/// Errors raised while turning data lines into reading sets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A data line has fewer tokens than the header has fields
    #[error("malformed record on line {line}: expected {expected} fields, found {found}")]
    MalformedRecord {
        line: usize,
        expected: usize,
        found: usize,
    },
    /// A token is neither quoted, numeric nor the NAN sentinel
    #[error("cannot coerce {token:?} for field '{field}' on line {line}")]
    TypeCoercion {
        line: usize,
        field: String,
        token: String,
    },
}

/// A typed raw token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Present(Value),
    /// The NAN sentinel; the field is left out of the reading set
    Missing,
}

fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Split a header line into field names, dropping every quote character.
pub fn parse_header(line: &str) -> Vec<String> {
    trim_line_ending(line)
        .replace(QUOTE, "")
        .split(DELIMITER)
        .map(str::to_string)
        .collect()
}

/// Type a single raw token.
///
/// Returns `None` when the token cannot be coerced. Unquoted tokens without a
/// `.` must fit in an `i64`; larger counters are coercion errors rather than
/// silently widened to reals. Reals must be finite, so `1.0e999` and `inf`
/// spellings are rejected instead of reaching the sinks.
pub fn parse_token(raw: &str) -> Option<Token> {
    let value = if raw.contains(QUOTE) {
        Value::Text(raw.replace(QUOTE, ""))
    } else if raw.trim() == NAN_SENTINEL {
        return Some(Token::Missing);
    } else if raw.contains('.') {
        Value::Real(raw.trim().parse().ok().filter(|x: &f64| x.is_finite())?)
    } else {
        Value::Integer(raw.trim().parse().ok()?)
    };

    match value {
        Value::Text(ref s) if s == NAN_SENTINEL => Some(Token::Missing),
        value => Some(Token::Present(value)),
    }
}

/// Parse one data line against `header`.
///
/// `line_no` is only used for error reporting. Tokens past the end of the
/// header are ignored.
pub fn parse_record(header: &[String], line: &str, line_no: usize) -> Result<ReadingSet, ParseError> {
    let tokens: Vec<&str> = trim_line_ending(line).split(DELIMITER).collect();
    if tokens.len() < header.len() {
        return Err(ParseError::MalformedRecord {
            line: line_no,
            expected: header.len(),
            found: tokens.len(),
        });
    }

    let mut readings = ReadingSet::with_capacity(header.len());
    for (name, raw) in header.iter().zip(tokens) {
        match parse_token(raw) {
            Some(Token::Present(value)) => readings.push(name.as_str(), value),
            Some(Token::Missing) => {}
            None => {
                return Err(ParseError::TypeCoercion {
                    line: line_no,
                    field: name.clone(),
                    token: raw.to_string(),
                });
            }
        }
    }
    Ok(readings)
}

/// Line-at-a-time parser that tracks its position in the stream.
#[derive(Debug, Default)]
pub struct RecordParser {
    lines_seen: usize,
    header: Vec<String>,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines consumed so far.
    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    /// Field names from the header line, empty until it has been seen.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Consume the next line of the stream.
    ///
    /// # Arguments
    /// * `line` - The next raw line, with or without its line ending
    ///
    /// # Returns
    /// A reading set for data lines and `None` for preamble lines (banner,
    /// header, units, aggregation). The header line is remembered.
    ///
    /// # Errors
    /// Returns `ParseError::MalformedRecord` when a data line has fewer tokens
    /// than the header, and `ParseError::TypeCoercion` when a token cannot be
    /// typed.
    pub fn push_line(&mut self, line: &str) -> Result<Option<ReadingSet>, ParseError> {
        self.lines_seen += 1;
        match self.lines_seen {
            HEADER_LINE => {
                self.header = parse_header(line);
                Ok(None)
            }
            n if n >= FIRST_DATA_LINE => parse_record(&self.header, line, n).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SAMPLE_EXPORT, header};

    #[test]
    fn test_parse_header_strips_quotes_and_newline() {
        assert_eq!(
            parse_header("\"TIMESTAMP\",\"RECORD\",\"AirTC_Avg\"\r\n"),
            ["TIMESTAMP", "RECORD", "AirTC_Avg"]
        );
        assert_eq!(parse_header("Timestamp,Temp\n"), ["Timestamp", "Temp"]);
    }

    #[test]
    fn test_parse_token_shapes() {
        assert_eq!(
            parse_token("\"2024-01-01 00:00\""),
            Some(Token::Present(Value::from("2024-01-01 00:00")))
        );
        assert_eq!(parse_token("23.5"), Some(Token::Present(Value::Real(23.5))));
        assert_eq!(parse_token("-0.25"), Some(Token::Present(Value::Real(-0.25))));
        assert_eq!(parse_token("42"), Some(Token::Present(Value::Integer(42))));
        assert_eq!(parse_token("-7"), Some(Token::Present(Value::Integer(-7))));
        // A quoted number stays text.
        assert_eq!(parse_token("\"1.5\""), Some(Token::Present(Value::from("1.5"))));
    }

    #[test]
    fn test_parse_token_nan_sentinel() {
        assert_eq!(parse_token("\"NAN\""), Some(Token::Missing));
        assert_eq!(parse_token("NAN"), Some(Token::Missing));
        assert_eq!(
            parse_token("\"nan\""),
            Some(Token::Present(Value::from("nan")))
        );
    }

    #[test]
    fn test_parse_token_rejects_garbage() {
        assert_eq!(parse_token("abc"), None);
        assert_eq!(parse_token("1.2.3"), None);
        assert_eq!(parse_token(""), None);
        assert_eq!(parse_token("12x"), None);
    }

    #[test]
    fn test_parse_token_rejects_non_finite_reals() {
        assert_eq!(parse_token("1.0e999"), None);
        assert_eq!(parse_token("-1.0e999"), None);
        assert_eq!(parse_token("inf."), None);
        assert_eq!(
            parse_token("1.0e300"),
            Some(Token::Present(Value::Real(1.0e300)))
        );
    }

    #[test]
    fn test_parse_token_integer_range() {
        assert_eq!(
            parse_token("9223372036854775807"),
            Some(Token::Present(Value::Integer(i64::MAX)))
        );
        assert_eq!(parse_token("9223372036854775808"), None);
        assert_eq!(
            parse_token("-9223372036854775808"),
            Some(Token::Present(Value::Integer(i64::MIN)))
        );
    }

    #[test]
    fn test_parse_record_example() {
        let header = header(&["Timestamp", "Temp"]);
        let readings = parse_record(&header, "\"2024-01-01 00:00\",23.5", 5).unwrap();
        let expected: ReadingSet = [
            ("Timestamp", Value::from("2024-01-01 00:00")),
            ("Temp", Value::Real(23.5)),
        ]
        .into_iter()
        .collect();
        assert_eq!(readings, expected);
    }

    #[test]
    fn test_parse_record_drops_nan_fields() {
        let header = header(&["Timestamp", "Temp", "RH", "Batt"]);
        let readings =
            parse_record(&header, "\"2024-01-01 00:01\",NAN,\"NAN\",12.6", 6).unwrap();

        assert_eq!(readings.len(), header.len() - 2);
        assert_eq!(readings.get("Temp"), None);
        assert_eq!(readings.get("RH"), None);
        assert_eq!(readings.get("Batt"), Some(&Value::Real(12.6)));
    }

    #[test]
    fn test_parse_record_short_line_is_malformed() {
        let header = header(&["Timestamp", "Temp", "RH"]);
        let err = parse_record(&header, "\"2024-01-01 00:01\",1.0", 9).unwrap_err();
        assert_eq!(
            err,
            ParseError::MalformedRecord {
                line: 9,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_parse_record_ignores_extra_tokens() {
        let header = header(&["Timestamp", "Temp"]);
        let readings = parse_record(&header, "\"t\",1.0,99,100", 5).unwrap();
        assert_eq!(readings.len(), 2);
    }

    #[test]
    fn test_parse_record_reports_uncoercible_token() {
        let header = header(&["Timestamp", "Temp"]);
        let err = parse_record(&header, "\"t\",warm", 12).unwrap_err();
        assert_eq!(
            err,
            ParseError::TypeCoercion {
                line: 12,
                field: "Temp".to_string(),
                token: "warm".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "cannot coerce \"warm\" for field 'Temp' on line 12"
        );
    }

    #[test]
    fn test_parse_record_rejects_overflowing_real() {
        let header = header(&["Timestamp", "Temp"]);
        let err = parse_record(&header, "\"t\",1.0e999", 7).unwrap_err();
        assert_eq!(
            err,
            ParseError::TypeCoercion {
                line: 7,
                field: "Temp".to_string(),
                token: "1.0e999".to_string()
            }
        );
    }

    #[test]
    fn test_record_parser_skips_preamble() {
        let mut parser = RecordParser::new();
        let mut produced = Vec::new();
        for line in SAMPLE_EXPORT.lines() {
            if let Some(readings) = parser.push_line(line).unwrap() {
                produced.push(readings);
            }
        }

        let line_count = SAMPLE_EXPORT.lines().count();
        assert_eq!(parser.lines_seen(), line_count);
        assert_eq!(produced.len(), line_count - 4);
        assert_eq!(parser.header()[0], "TIMESTAMP");
        assert_eq!(produced[0].get("RECORD"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_record_parser_with_only_preamble() {
        let mut parser = RecordParser::new();
        for line in ["banner", "\"A\",\"B\"", "units", "aggregation"] {
            assert_eq!(parser.push_line(line).unwrap(), None);
        }
        assert_eq!(parser.header(), ["A", "B"]);
    }
}
