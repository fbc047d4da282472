use std::fmt;

use super::{Matcher, Value};

/// A candidate rule: when the matcher accepts the context, the value
/// distribution decides what the rule-set returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub matcher: Matcher,
    pub value: ValueDistribution,
}

/// How a matched rule produces its value.
///
/// The bucketed variants read the owner identity from `<owner_type>.@@id` and
/// hash it with `salt`, so the same owner always lands in the same bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDistribution {
    Single(Value),
    Weighted {
        owner_type: String,
        salt: String,
        table: Vec<(Value, u64)>,
    },
    Uniform {
        owner_type: String,
        salt: String,
        values: Vec<Value>,
    },
}

impl ValueDistribution {
    pub(crate) fn owner_type(&self) -> Option<&str> {
        match self {
            ValueDistribution::Single(_) => None,
            ValueDistribution::Weighted { owner_type, .. }
            | ValueDistribution::Uniform { owner_type, .. } => Some(owner_type),
        }
    }
}

impl fmt::Display for ValueDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDistribution::Single(v) => write!(f, "{v}"),
            ValueDistribution::Weighted {
                owner_type,
                salt,
                table,
            } => {
                write!(f, "weighted by {owner_type}/{salt} {{")?;
                for (i, (value, weight)) in table.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}: {weight}")?;
                }
                write!(f, "}}")
            }
            ValueDistribution::Uniform {
                owner_type,
                salt,
                values,
            } => write!(
                f,
                "uniform by {owner_type}/{salt} {}",
                Value::Array(values.clone())
            ),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.matcher, self.value)
    }
}
