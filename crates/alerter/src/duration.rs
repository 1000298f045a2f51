//! Parser for Go-style duration strings (`"90s"`, `"2m"`, `"1h30m"`).
//!
//! Operators write health-check thresholds in job metadata using the same
//! syntax Nomad uses everywhere else, so this accepts what Go's
//! `time.ParseDuration` accepts, minus negative values.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("negative duration {0:?}")]
    Negative(String),
    #[error("invalid number in duration {0:?}")]
    InvalidNumber(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
    #[error("duration {0:?} out of range")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(1e3),
        "ms" => Some(1e6),
        "s" => Some(1e9),
        "m" => Some(60e9),
        "h" => Some(3600e9),
        _ => None,
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Parse a duration such as `"120s"`, `"1.5h"` or `"1h30m10s"`.
pub fn parse_go_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s.starts_with('-') {
        return Err(DurationError::Negative(s.to_string()));
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(DurationError::InvalidNumber(s.to_string()));
    }

    let mut total_nanos = 0.0_f64;
    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !is_number_char(c)).unwrap_or(rest.len());
        if number_len == 0 {
            return Err(DurationError::InvalidNumber(s.to_string()));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| DurationError::InvalidNumber(s.to_string()))?;

        let unit_len = tail.find(is_number_char).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(s.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: s.to_string(),
        })?;

        total_nanos += value * scale;
        rest = next;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(DurationError::Overflow(s.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
