//! Grammars for the small literals rule authors write by hand: time windows
//! (`"3d"`, `"1h30m"`) and dotted version numbers (`"2.10.1"`).

mod error;
mod grammar;

use chrono::Duration;
use winnow::Parser;

pub use error::{LiteralKind, ParseError};

/// Parse a duration literal made of `<number><unit>` segments, where the unit
/// is one of `ms`, `s`, `m`, `h` or `d`.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed input or a duration too large to
/// represent.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let segments = grammar::duration
        .parse(input.trim())
        .map_err(|e| ParseError::new(LiteralKind::Duration, input, e.to_string()))?;
    let mut total: i64 = 0;
    for (amount, unit) in segments {
        let millis = amount
            .checked_mul(unit.millis())
            .and_then(|m| i64::try_from(m).ok())
            .and_then(|m| total.checked_add(m))
            .ok_or_else(|| ParseError::new(LiteralKind::Duration, input, "out of range"))?;
        total = millis;
    }
    Duration::try_milliseconds(total)
        .ok_or_else(|| ParseError::new(LiteralKind::Duration, input, "out of range"))
}

/// Parse a dotted version of one to four numeric components.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a dotted version number.
pub fn parse_version(input: &str) -> Result<Vec<u64>, ParseError> {
    grammar::version
        .parse(input.trim())
        .map_err(|e| ParseError::new(LiteralKind::Version, input, e.to_string()))
}
