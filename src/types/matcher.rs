use std::fmt;
use std::ops::Not;

use chrono::Duration;

use super::Value;

/// Comparison operators supported by property conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComparisonOp {
    Equal,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    NotEqual,
}

/// A test applied to the value of one context property.
///
/// The literal in each variant is the threshold; the context value is the
/// subject. `comparison_type` names a comparer from the engine's registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        op: ComparisonOp,
        value: Value,
        comparison_type: Option<String>,
    },
    In {
        values: Vec<Value>,
        comparison_type: Option<String>,
    },
    Contains {
        value: Value,
        comparison_type: Option<String>,
    },
    StartsWith(String),
    EndsWith(String),
    WithinTime(Duration),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

/// Predicate over context properties gating a rule.
///
/// `All` is an ordered conjunction: members are tested in declaration order
/// and the first failure stops evaluation. An empty `All` always matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Property { name: String, condition: Condition },
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Equal => write!(f, "=="),
            ComparisonOp::NotEqual => write!(f, "!="),
            ComparisonOp::GreaterThan => write!(f, ">"),
            ComparisonOp::GreaterEqual => write!(f, ">="),
            ComparisonOp::LessThan => write!(f, "<"),
            ComparisonOp::LessEqual => write!(f, "<="),
        }
    }
}

impl Condition {
    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::All(mut items) => {
                items.push(other);
                Condition::All(items)
            }
            first => Condition::All(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Any(mut items) => {
                items.push(other);
                Condition::Any(items)
            }
            first => Condition::Any(vec![first, other]),
        }
    }

    pub(crate) fn comparison_type(&self) -> Option<&str> {
        match self {
            Condition::Compare {
                comparison_type, ..
            }
            | Condition::In {
                comparison_type, ..
            }
            | Condition::Contains {
                comparison_type, ..
            } => comparison_type.as_deref(),
            _ => None,
        }
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

impl Matcher {
    /// A matcher that accepts every context.
    #[must_use]
    pub fn always() -> Matcher {
        Matcher::All(Vec::new())
    }

    #[must_use]
    pub fn and(self, other: Matcher) -> Matcher {
        match self {
            Matcher::All(mut items) => {
                items.push(other);
                Matcher::All(items)
            }
            first => Matcher::All(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Matcher) -> Matcher {
        match self {
            Matcher::Any(mut items) => {
                items.push(other);
                Matcher::Any(items)
            }
            first => Matcher::Any(vec![first, other]),
        }
    }
}

impl Not for Matcher {
    type Output = Matcher;

    fn not(self) -> Matcher {
        Matcher::Not(Box::new(self))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare {
                op,
                value,
                comparison_type,
            } => match comparison_type {
                Some(ty) => write!(f, "{op} {value} as {ty}"),
                None => write!(f, "{op} {value}"),
            },
            Condition::In { values, .. } => write!(f, "in {}", Value::Array(values.clone())),
            Condition::Contains { value, .. } => write!(f, "contains {value}"),
            Condition::StartsWith(s) => write!(f, "starts with \"{s}\""),
            Condition::EndsWith(s) => write!(f, "ends with \"{s}\""),
            Condition::WithinTime(d) => write!(f, "within {}ms", d.num_milliseconds()),
            Condition::All(items) => write_joined(f, items, " AND "),
            Condition::Any(items) => write_joined(f, items, " OR "),
            Condition::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Property { name, condition } => write!(f, "({name} {condition})"),
            Matcher::All(items) if items.is_empty() => write!(f, "*"),
            Matcher::All(items) => write_joined(f, items, " AND "),
            Matcher::Any(items) => write_joined(f, items, " OR "),
            Matcher::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, ")")
}

/// Intermediate builder for property conditions.
/// Created by [`property()`]; a test method turns it into a [`Matcher`].
#[derive(Debug, Clone)]
pub struct PropertyExpr {
    name: String,
    comparison_type: Option<String>,
}

impl PropertyExpr {
    /// Order string values with the named comparer instead of the default
    /// case-insensitive ordering.
    #[must_use]
    pub fn using(mut self, comparison_type: &str) -> Self {
        self.comparison_type = Some(comparison_type.to_owned());
        self
    }

    #[must_use]
    pub fn satisfies(self, condition: Condition) -> Matcher {
        Matcher::Property {
            name: self.name,
            condition,
        }
    }

    fn compare(self, op: ComparisonOp, value: Value) -> Matcher {
        let comparison_type = self.comparison_type.clone();
        self.satisfies(Condition::Compare {
            op,
            value,
            comparison_type,
        })
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::Equal, value.into())
    }

    #[must_use]
    pub fn neq(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::NotEqual, value.into())
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::GreaterThan, value.into())
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::GreaterEqual, value.into())
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::LessThan, value.into())
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Matcher {
        self.compare(ComparisonOp::LessEqual, value.into())
    }

    #[must_use]
    pub fn one_of<T: Into<Value>>(self, values: impl IntoIterator<Item = T>) -> Matcher {
        let comparison_type = self.comparison_type.clone();
        self.satisfies(Condition::In {
            values: values.into_iter().map(Into::into).collect(),
            comparison_type,
        })
    }

    #[must_use]
    pub fn contains(self, value: impl Into<Value>) -> Matcher {
        let comparison_type = self.comparison_type.clone();
        self.satisfies(Condition::Contains {
            value: value.into(),
            comparison_type,
        })
    }

    #[must_use]
    pub fn starts_with(self, prefix: &str) -> Matcher {
        self.satisfies(Condition::StartsWith(prefix.to_owned()))
    }

    #[must_use]
    pub fn ends_with(self, suffix: &str) -> Matcher {
        self.satisfies(Condition::EndsWith(suffix.to_owned()))
    }

    #[must_use]
    pub fn within(self, window: Duration) -> Matcher {
        self.satisfies(Condition::WithinTime(window))
    }
}

#[must_use]
pub fn property(name: &str) -> PropertyExpr {
    PropertyExpr {
        name: name.to_owned(),
        comparison_type: None,
    }
}
