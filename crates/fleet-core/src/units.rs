//! Parsers for human-friendly resource and duration strings.
//!
//! All parsers are total: every input either yields a value or a
//! `UnitError`. For CPU and memory limits the empty string is the single
//! input that means "no limit" (zero); anything else that does not parse
//! is rejected so typos never turn into silent zero limits.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_CORE: f64 = 1e9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("invalid cpu quantity {0:?}: expected a non-negative number of cores")]
    Cpus(String),

    #[error("invalid memory size {0:?}: expected a number with optional b/k/m/g suffix")]
    Memory(String),

    #[error("invalid duration {0:?}: expected e.g. 500ms, 10s, 5m, 1h")]
    Duration(String),
}

/// Parse a CPU core count (`"0.5"`, `"2"`) into nano-CPUs.
pub fn parse_cpus(input: &str) -> Result<i64, UnitError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }

    let cores: f64 = s.parse().map_err(|_| UnitError::Cpus(input.to_string()))?;
    if !cores.is_finite() || cores < 0.0 {
        return Err(UnitError::Cpus(input.to_string()));
    }

    let nanos = (cores * NANOS_PER_CORE).round();
    if nanos > i64::MAX as f64 {
        return Err(UnitError::Cpus(input.to_string()));
    }
    Ok(nanos as i64)
}

/// Parse a memory size (`"1024"`, `"512k"`, `"2m"`, `"1g"`) into bytes.
///
/// Suffixes are case-insensitive and multiply by 1024^n.
pub fn parse_memory(input: &str) -> Result<i64, UnitError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }

    let err = || UnitError::Memory(input.to_string());
    let last = s.chars().last().ok_or_else(err)?.to_ascii_lowercase();

    let (number, multiplier) = match last {
        'b' => (&s[..s.len() - 1], 1.0),
        'k' => (&s[..s.len() - 1], 1024.0),
        'm' => (&s[..s.len() - 1], 1024.0 * 1024.0),
        'g' => (&s[..s.len() - 1], 1024.0 * 1024.0 * 1024.0),
        c if c.is_ascii_digit() || c == '.' => (s, 1.0),
        _ => return Err(err()),
    };

    let value: f64 = number.trim().parse().map_err(|_| err())?;
    if !value.is_finite() || value < 0.0 {
        return Err(err());
    }

    let bytes = value * multiplier;
    if bytes > i64::MAX as f64 {
        return Err(err());
    }
    Ok(bytes as i64)
}

/// Parse a duration like `"500ms"`, `"10s"`, `"5m"`, `"1h"` or `"1m30s"`.
///
/// A bare integer is taken as seconds. Empty input is an error; callers
/// that treat an absent value as zero must check for it themselves.
pub fn parse_duration(input: &str) -> Result<Duration, UnitError> {
    let s = input.trim();
    let err = || UnitError::Duration(input.to_string());
    if s.is_empty() {
        return Err(err());
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if number_len == 0 {
            return Err(err());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| err())?;

        let tail = &rest[number_len..];
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let nanos_per_unit = match &tail[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(err()),
        };

        total += Duration::from_nanos((value * nanos_per_unit).round() as u64);
        rest = &tail[unit_len..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sizes() {
        assert_eq!(parse_memory("1024"), Ok(1024));
        assert_eq!(parse_memory("1024b"), Ok(1024));
        assert_eq!(parse_memory("1k"), Ok(1024));
        assert_eq!(parse_memory("2m"), Ok(2_097_152));
        assert_eq!(parse_memory("1g"), Ok(1_073_741_824));
        assert_eq!(parse_memory("512M"), Ok(512 * 1024 * 1024));
        assert_eq!(parse_memory("1.5k"), Ok(1536));
    }

    #[test]
    fn empty_memory_means_no_limit() {
        assert_eq!(parse_memory(""), Ok(0));
        assert_eq!(parse_memory("   "), Ok(0));
    }

    #[test]
    fn malformed_memory_rejected() {
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("12x").is_err());
        assert!(parse_memory("k").is_err());
        assert!(parse_memory("-1m").is_err());
        assert!(parse_memory("1tb").is_err());
    }

    #[test]
    fn cpu_quantities() {
        assert_eq!(parse_cpus("0.5"), Ok(500_000_000));
        assert_eq!(parse_cpus("2"), Ok(2_000_000_000));
        assert_eq!(parse_cpus("0.1"), Ok(100_000_000));
        assert_eq!(parse_cpus(""), Ok(0));
    }

    #[test]
    fn malformed_cpus_rejected() {
        assert!(parse_cpus("two").is_err());
        assert!(parse_cpus("-1").is_err());
        assert!(parse_cpus("inf").is_err());
        assert!(parse_cpus("NaN").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn malformed_durations_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("10s5").is_err());
        assert!(parse_duration("s").is_err());
    }
}
