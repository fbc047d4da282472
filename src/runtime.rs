//! Operator semantics shared by the interpreter and the compiled evaluator.
//!
//! Every comparison takes the rule literal as the threshold and the context
//! value as the subject, and orders them as `subject` against `threshold`:
//! `GreaterThan` with threshold `18` holds for a subject of `20`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sha1::{Digest, Sha1};

use crate::parse::parse_version;
use crate::{ComparisonOp, EvalError, SYSTEM_TIME_KEY, Value};

/// Hash capability used for bucketing: bytes in, 20-byte digest out.
pub type Sha1Provider = Arc<dyn Fn(&[u8]) -> [u8; 20] + Send + Sync>;

/// Maps a string to an orderable key, or `None` if it cannot.
pub type Comparer = Arc<dyn Fn(&str) -> Option<OrderKey> + Send + Sync>;

/// Named comparers available to typed string comparisons.
pub type ComparerRegistry = HashMap<String, Comparer>;

/// Orderable key produced by a [`Comparer`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderKey {
    Text(String),
    Number(Decimal),
    /// Version components, padded so `1.2` and `1.2.0.0` are equal.
    Version(Vec<u64>),
}

static NULL: Value = Value::Null;

/// SHA-1 via the `sha1` crate.
#[must_use]
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Comparer for dotted version strings of up to four numeric components.
#[must_use]
pub fn version_comparer() -> Comparer {
    Arc::new(|input: &str| {
        parse_version(input).ok().map(|mut parts| {
            parts.resize(4, 0);
            OrderKey::Version(parts)
        })
    })
}

/// Compare a context value against a rule literal.
///
/// An absent subject counts as null. Two nulls are equal; a null against a
/// non-null is `false` for every operator, `NotEqual` included.
///
/// # Errors
///
/// [`EvalError::TypeMismatch`] for unsupported kind pairs,
/// [`EvalError::UnknownComparer`] and [`EvalError::ComparerRejected`] for
/// typed string comparisons.
pub fn compare(
    threshold: &Value,
    subject: Option<&Value>,
    op: ComparisonOp,
    comparison_type: Option<&str>,
    comparers: &ComparerRegistry,
) -> Result<bool, EvalError> {
    let subject = subject.unwrap_or(&NULL);
    let ordering = match (subject, threshold) {
        (Value::Null, Value::Null) => return Ok(op == ComparisonOp::Equal),
        (Value::Null, _) | (_, Value::Null) => return Ok(false),
        (Value::String(s), Value::String(t)) => match comparison_type {
            None => cmp_ignore_case(s, t),
            Some(name) => {
                let comparer = comparers
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownComparer {
                        name: name.to_owned(),
                    })?;
                order_key(comparer, name, s)?.cmp(&order_key(comparer, name, t)?)
            }
        },
        (Value::Number(s), Value::Number(t)) => s.cmp(t),
        (Value::Float(s), Value::Float(t)) => match s.partial_cmp(t) {
            Some(ordering) => ordering,
            None => return Ok(op == ComparisonOp::NotEqual),
        },
        (Value::Bool(s), Value::Bool(t)) => s.cmp(t),
        _ => {
            return Err(EvalError::TypeMismatch {
                threshold: threshold.type_name(),
                subject: subject.type_name(),
            });
        }
    };
    Ok(holds(ordering, op))
}

fn holds(ordering: Ordering, op: ComparisonOp) -> bool {
    match op {
        ComparisonOp::Equal => ordering.is_eq(),
        ComparisonOp::NotEqual => ordering.is_ne(),
        ComparisonOp::LessThan => ordering.is_lt(),
        ComparisonOp::LessEqual => ordering.is_le(),
        ComparisonOp::GreaterEqual => ordering.is_ge(),
        ComparisonOp::GreaterThan => ordering.is_gt(),
    }
}

/// Case folding used by every case-insensitive string test.
fn folded(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_uppercase)
}

fn fold_case(s: &str) -> String {
    folded(s).collect()
}

/// Ordinal comparison ignoring case.
fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    folded(a).cmp(folded(b))
}

fn order_key(comparer: &Comparer, name: &str, input: &str) -> Result<OrderKey, EvalError> {
    comparer(input).ok_or_else(|| EvalError::ComparerRejected {
        name: name.to_owned(),
        input: input.to_owned(),
    })
}

/// `true` if any literal equals the subject. Stops at the first match.
///
/// # Errors
///
/// Propagates errors from [`compare`].
pub fn in_array(
    values: &[Value],
    subject: Option<&Value>,
    comparison_type: Option<&str>,
    comparers: &ComparerRegistry,
) -> Result<bool, EvalError> {
    for value in values {
        if compare(value, subject, ComparisonOp::Equal, comparison_type, comparers)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Polymorphic containment of the literal `left` in the subject `right`.
///
/// - string in string: case-insensitive substring
/// - array in array: every literal element is present in the subject
/// - scalar in array: the subject holds an equal element
/// - one-element array against a scalar: plain equality
///
/// Anything else, including a missing subject, is `false`.
///
/// # Errors
///
/// Propagates errors from [`compare`].
pub fn contains(
    left: &Value,
    right: Option<&Value>,
    comparison_type: Option<&str>,
    comparers: &ComparerRegistry,
) -> Result<bool, EvalError> {
    let Some(right) = right else {
        return Ok(false);
    };
    match (left, right) {
        (Value::String(needle), Value::String(haystack)) => {
            Ok(fold_case(haystack).contains(&fold_case(needle)))
        }
        (Value::Array(needles), Value::Array(haystack)) => {
            for needle in needles {
                if !in_array(haystack, Some(needle), comparison_type, comparers)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Array(single), _) if single.len() == 1 => compare(
            &single[0],
            Some(right),
            ComparisonOp::Equal,
            comparison_type,
            comparers,
        ),
        (Value::Array(_), _) => Ok(false),
        (_, Value::Array(haystack)) => in_array(haystack, Some(left), comparison_type, comparers),
        _ => Ok(false),
    }
}

/// Case-insensitive prefix test. `false` unless the subject is a string.
#[must_use]
pub fn starts_with(subject: Option<&Value>, prefix: &str) -> bool {
    match subject {
        Some(Value::String(s)) => fold_case(s).starts_with(&fold_case(prefix)),
        _ => false,
    }
}

/// Case-insensitive suffix test. `false` unless the subject is a string.
#[must_use]
pub fn ends_with(subject: Option<&Value>, suffix: &str) -> bool {
    match subject {
        Some(Value::String(s)) => fold_case(s).ends_with(&fold_case(suffix)),
        _ => false,
    }
}

/// `true` if the subject timestamp lies strictly within `window` of `now`,
/// in either direction. An unparsable or missing subject is `false`.
///
/// # Errors
///
/// [`EvalError::MissingSystemTime`] when the subject parses but `now` does not.
pub fn within_time(
    subject: Option<&Value>,
    now: Option<&Value>,
    window: Duration,
) -> Result<bool, EvalError> {
    let Some(subject) = subject.and_then(parse_timestamp) else {
        return Ok(false);
    };
    let now = now
        .and_then(parse_timestamp)
        .ok_or(EvalError::MissingSystemTime {
            key: SYSTEM_TIME_KEY,
        })?;
    let distance = if subject >= now {
        subject - now
    } else {
        now - subject
    };
    Ok(distance < window)
}

/// Read a timestamp from a string value: RFC 3339, a naive date-time (taken as
/// UTC) or a bare date (midnight UTC).
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Dispatch key for a partition: the lower-cased text form of a scalar.
/// Null and arrays have no key and select the fallback branch.
#[must_use]
pub fn partition_key(value: &Value) -> Option<String> {
    value.to_text().map(|text| text.to_lowercase())
}

/// Context key holding the identity of a bucketing owner.
#[must_use]
pub fn owner_key(owner_type: &str) -> String {
    format!("{owner_type}.@@id")
}

/// Stable 64-bit bucket hash for an owner: the first eight bytes of
/// `sha1("<owner_id>.<salt>")`, little-endian. `None` if the owner id is null
/// or an array.
#[must_use]
pub fn owner_hash(owner_id: &Value, salt: &str, sha1: &Sha1Provider) -> Option<u64> {
    let owner_id = owner_id.to_text()?;
    let digest = sha1(format!("{owner_id}.{salt}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Some(u64::from_le_bytes(head))
}

/// Walk the table in order and return the first entry whose cumulative weight
/// exceeds `hash mod total`. Empty or zero-weight tables select nothing.
#[must_use]
pub fn weighted_select(table: &[(Value, u64)], hash: u64) -> Option<&Value> {
    let total: u128 = table.iter().map(|(_, w)| u128::from(*w)).sum();
    if total == 0 {
        return None;
    }
    let target = u128::from(hash) % total;
    let mut cumulative: u128 = 0;
    for (value, weight) in table {
        cumulative += u128::from(*weight);
        if cumulative > target {
            return Some(value);
        }
    }
    None
}

/// `values[hash mod len]`, or `None` for an empty table.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn uniform_select(values: &[Value], hash: u64) -> Option<&Value> {
    if values.is_empty() {
        return None;
    }
    values.get((hash % values.len() as u64) as usize)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn registry() -> ComparerRegistry {
        let mut comparers = ComparerRegistry::new();
        comparers.insert("version".into(), version_comparer());
        comparers
    }

    fn cmp(threshold: Value, subject: Option<Value>, op: ComparisonOp) -> Result<bool, EvalError> {
        compare(&threshold, subject.as_ref(), op, None, &registry())
    }

    #[test]
    fn null_semantics() {
        use ComparisonOp::*;
        assert_eq!(cmp(Value::Null, None, Equal), Ok(true));
        assert_eq!(cmp(Value::Null, Some(Value::Null), Equal), Ok(true));
        assert_eq!(cmp(Value::Null, None, NotEqual), Ok(false));
        for op in [Equal, NotEqual, LessThan, LessEqual, GreaterThan, GreaterEqual] {
            assert_eq!(cmp(Value::Null, Some(Value::from(1_i64)), op), Ok(false));
            assert_eq!(cmp(Value::from("x"), None, op), Ok(false));
        }
    }

    #[test]
    fn ordering_reads_subject_against_threshold() {
        use ComparisonOp::*;
        // threshold 18, subject 20: "20 > 18"
        let threshold = Value::from(18_i64);
        let older = Some(Value::from(20_i64));
        let younger = Some(Value::from(10_i64));
        assert_eq!(cmp(threshold.clone(), older.clone(), GreaterThan), Ok(true));
        assert_eq!(cmp(threshold.clone(), older.clone(), LessThan), Ok(false));
        assert_eq!(cmp(threshold.clone(), younger.clone(), LessThan), Ok(true));
        assert_eq!(cmp(threshold.clone(), younger.clone(), GreaterEqual), Ok(false));
        assert_eq!(cmp(threshold, younger, LessEqual), Ok(true));
    }

    #[test]
    fn greater_than_is_strict() {
        let five = Value::from(5_i64);
        assert_eq!(
            cmp(five.clone(), Some(five.clone()), ComparisonOp::GreaterThan),
            Ok(false)
        );
        assert_eq!(
            cmp(five.clone(), Some(five), ComparisonOp::GreaterEqual),
            Ok(true)
        );
    }

    #[test]
    fn strings_ignore_case_by_default() {
        use ComparisonOp::*;
        assert_eq!(cmp("Apple".into(), Some("aPPLE".into()), Equal), Ok(true));
        assert_eq!(cmp("apple".into(), Some("Banana".into()), GreaterThan), Ok(true));
        assert_eq!(cmp("b".into(), Some("A".into()), LessThan), Ok(true));
    }

    #[test]
    fn decimals_compare_numerically() {
        let threshold = Value::Number(Decimal::from_str("2.50").unwrap());
        let subject = Value::Number(Decimal::from_str("2.5").unwrap());
        assert_eq!(cmp(threshold.clone(), Some(subject), ComparisonOp::Equal), Ok(true));
        let bigger = Value::Number(Decimal::from_str("10").unwrap());
        assert_eq!(cmp(threshold, Some(bigger), ComparisonOp::GreaterThan), Ok(true));
    }

    #[test]
    fn floats_and_booleans() {
        use ComparisonOp::*;
        assert_eq!(cmp(Value::Float(1.5), Some(Value::Float(2.5)), GreaterThan), Ok(true));
        assert_eq!(cmp(Value::Float(f64::NAN), Some(Value::Float(1.0)), NotEqual), Ok(true));
        assert_eq!(cmp(Value::Float(f64::NAN), Some(Value::Float(1.0)), Equal), Ok(false));
        assert_eq!(cmp(false.into(), Some(true.into()), GreaterThan), Ok(true));
        assert_eq!(cmp(true.into(), Some(true.into()), Equal), Ok(true));
    }

    #[test]
    fn mixed_kinds_are_a_type_mismatch() {
        assert_eq!(
            cmp(Value::from(5_i64), Some(Value::from("5")), ComparisonOp::Equal),
            Err(EvalError::TypeMismatch {
                threshold: "number",
                subject: "string",
            })
        );
        assert!(cmp(Value::from(1_i64), Some(Value::Float(1.0)), ComparisonOp::Equal).is_err());
    }

    #[test]
    fn named_comparer_orders_versions() {
        let comparers = registry();
        let gte = |threshold: &str, subject: &str| {
            compare(
                &Value::from(threshold),
                Some(&Value::from(subject)),
                ComparisonOp::GreaterEqual,
                Some("version"),
                &comparers,
            )
        };
        assert_eq!(gte("1.9", "1.10"), Ok(true));
        assert_eq!(gte("1.10", "1.9"), Ok(false));
        assert_eq!(gte("1.2", "1.2.0.0"), Ok(true));
    }

    #[test]
    fn unknown_and_rejecting_comparers() {
        let comparers = registry();
        let result = compare(
            &Value::from("1.0"),
            Some(&Value::from("2.0")),
            ComparisonOp::Equal,
            Some("semver"),
            &comparers,
        );
        assert_eq!(
            result,
            Err(EvalError::UnknownComparer {
                name: "semver".into()
            })
        );
        let result = compare(
            &Value::from("1.0"),
            Some(&Value::from("latest")),
            ComparisonOp::Equal,
            Some("version"),
            &comparers,
        );
        assert_eq!(
            result,
            Err(EvalError::ComparerRejected {
                name: "version".into(),
                input: "latest".into(),
            })
        );
    }

    #[test]
    fn in_array_matches_any_element() {
        let values = vec![Value::from("a"), Value::from("B")];
        let comparers = registry();
        assert_eq!(in_array(&values, Some(&Value::from("b")), None, &comparers), Ok(true));
        assert_eq!(in_array(&values, Some(&Value::from("c")), None, &comparers), Ok(false));
        assert_eq!(in_array(&values, None, None, &comparers), Ok(false));
    }

    #[test]
    fn contains_variants() {
        let comparers = registry();
        let c = |left: Value, right: Option<Value>| contains(&left, right.as_ref(), None, &comparers);

        assert_eq!(c("WORLD".into(), Some("hello world".into())), Ok(true));
        assert_eq!(c("mars".into(), Some("hello world".into())), Ok(false));
        assert_eq!(
            c(vec!["a", "b"].into(), Some(vec!["c", "b", "a"].into())),
            Ok(true)
        );
        assert_eq!(c(vec!["a", "z"].into(), Some(vec!["a", "b"].into())), Ok(false));
        assert_eq!(c("b".into(), Some(vec!["a", "b"].into())), Ok(true));
        assert_eq!(c(vec!["x"].into(), Some("X".into())), Ok(true));
        assert_eq!(c(vec!["x", "y"].into(), Some("x".into())), Ok(false));
        assert_eq!(c(Value::from(1_i64), Some(Value::from(1_i64))), Ok(false));
        assert_eq!(c("a".into(), None), Ok(false));
    }

    #[test]
    fn prefix_and_suffix_ignore_case() {
        let subject = Value::from("Hello World");
        assert!(starts_with(Some(&subject), "hello"));
        assert!(!starts_with(Some(&subject), "world"));
        assert!(ends_with(Some(&subject), "WORLD"));
        assert!(!ends_with(None, "x"));
        assert!(!starts_with(Some(&Value::from(5_i64)), "5"));
    }

    #[test]
    fn within_time_window() {
        let now = Value::from("2024-05-01T12:00:00Z");
        let window = Duration::hours(1);
        let recent = Value::from("2024-05-01T11:30:00Z");
        let old = Value::from("2024-05-01T10:00:00Z");
        let future = Value::from("2024-05-01 12:59:59");
        let edge = Value::from("2024-05-01T13:00:00Z");
        assert_eq!(within_time(Some(&recent), Some(&now), window), Ok(true));
        assert_eq!(within_time(Some(&old), Some(&now), window), Ok(false));
        assert_eq!(within_time(Some(&future), Some(&now), window), Ok(true));
        assert_eq!(within_time(Some(&edge), Some(&now), window), Ok(false));
    }

    #[test]
    fn within_time_soft_and_hard_failures() {
        let window = Duration::hours(1);
        let now = Value::from("2024-05-01T12:00:00Z");
        assert_eq!(within_time(Some(&Value::from("yesterday")), Some(&now), window), Ok(false));
        assert_eq!(within_time(None, None, window), Ok(false));
        assert_eq!(
            within_time(Some(&now), None, window),
            Err(EvalError::MissingSystemTime {
                key: SYSTEM_TIME_KEY
            })
        );
        assert_eq!(
            within_time(Some(&now), Some(&Value::from("later")), window),
            Err(EvalError::MissingSystemTime {
                key: SYSTEM_TIME_KEY
            })
        );
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp(&Value::from("2024-05-01T12:00:00+02:00")).is_some());
        assert!(parse_timestamp(&Value::from("2024-05-01T12:00:00.250")).is_some());
        assert_eq!(
            parse_timestamp(&Value::from("2024-05-01")),
            parse_timestamp(&Value::from("2024-05-01T00:00:00Z"))
        );
        assert!(parse_timestamp(&Value::from(1_i64)).is_none());
    }

    #[test]
    fn sha1_known_vector() {
        let digest = sha1_digest(b"abc");
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn owner_hash_reads_little_endian_prefix() {
        // Fake digest: first byte is the input length, the rest zero.
        let sha1: Sha1Provider = Arc::new(|data: &[u8]| {
            let mut d = [0u8; 20];
            d[0] = u8::try_from(data.len()).unwrap_or(u8::MAX);
            d[8] = 0xff;
            d
        });
        // "u-1" + "." + "salt" is 8 bytes.
        assert_eq!(owner_hash(&Value::from("u-1"), "salt", &sha1), Some(8));
        assert_eq!(owner_hash(&Value::from(42_i64), "s", &sha1), Some(4));
        assert_eq!(owner_hash(&Value::Null, "salt", &sha1), None);
    }

    #[test]
    fn weighted_walks_cumulative_weights() {
        let table = vec![
            (Value::from("a"), 1),
            (Value::from("b"), 2),
            (Value::from("c"), 3),
        ];
        // total 6: targets 0 -> a, 1..=2 -> b, 3..=5 -> c
        assert_eq!(weighted_select(&table, 0), Some(&Value::from("a")));
        assert_eq!(weighted_select(&table, 1), Some(&Value::from("b")));
        assert_eq!(weighted_select(&table, 2), Some(&Value::from("b")));
        assert_eq!(weighted_select(&table, 3), Some(&Value::from("c")));
        assert_eq!(weighted_select(&table, 11), Some(&Value::from("c")));
        assert_eq!(weighted_select(&table, 12), Some(&Value::from("a")));
    }

    #[test]
    fn weighted_skips_zero_weights() {
        let table = vec![(Value::from("off"), 0), (Value::from("on"), 5)];
        for h in 0..10 {
            assert_eq!(weighted_select(&table, h), Some(&Value::from("on")));
        }
        let empty: Vec<(Value, u64)> = vec![(Value::from("x"), 0)];
        assert_eq!(weighted_select(&empty, 3), None);
    }

    #[test]
    fn uniform_indexes_by_modulo() {
        let values = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        assert_eq!(uniform_select(&values, 4), Some(&Value::from("b")));
        assert_eq!(uniform_select(&values, u64::MAX), Some(&Value::from("a")));
        assert_eq!(uniform_select(&[], 4), None);
    }

    #[test]
    fn case_folding_is_shared() {
        let registry = registry();
        let subject = Value::from("Straße");
        assert!(compare(
            &Value::from("STRASSE"),
            Some(&subject),
            ComparisonOp::Equal,
            None,
            &registry
        )
        .unwrap());
        assert!(contains(&Value::from("strasse"), Some(&subject), None, &registry).unwrap());
        assert!(starts_with(Some(&subject), "STRASS"));
        assert!(ends_with(Some(&subject), "SSE"));
    }
}
