use std::fmt;

use super::error::CompileError;
use super::matcher::Matcher;
use super::rule::{Rule, ValueDistribution};
use super::value::Value;

/// A complete decision table: a rules container plus an optional default
/// returned when nothing in the container produces a value.
///
/// A `RuleSet` is plain data. Turn it into an evaluator with
/// [`EngineSettings::interpret()`](crate::EngineSettings::interpret) or
/// [`EngineSettings::compile()`](crate::EngineSettings::compile).
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub rules: RulesContainer,
    pub default_value: Option<Value>,
}

/// Either an ordered list of candidate rules, or a partition that first
/// dispatches on one property's value and then evaluates the nested container.
#[derive(Debug, Clone, PartialEq)]
pub enum RulesContainer {
    List(Vec<Rule>),
    Partition {
        property: String,
        /// Branches keyed by the lower-cased partition value.
        branches: Vec<(String, RulesContainer)>,
        /// Taken when the property is absent or matches no branch.
        fallback: Box<RulesContainer>,
    },
}

impl RuleSet {
    /// Check the tree for structural problems shared by both backends.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] on duplicate partition keys, empty partition
    /// properties or empty bucketing owner types.
    pub fn validate(&self) -> Result<(), CompileError> {
        crate::validate::validate(self)
    }
}

impl RulesContainer {
    #[must_use]
    pub fn empty() -> Self {
        RulesContainer::List(Vec::new())
    }
}

/// Builder for constructing a [`RuleSet`].
///
/// # Example
///
/// ```
/// use flagpole::{RuleSetBuilder, property};
///
/// let ruleset = RuleSetBuilder::new()
///     .rule(|r| r.when(property("fruit").eq("apple")).value("red"))
///     .rule(|r| r.when(property("fruit").eq("banana")).value("yellow"))
///     .default_value("unknown")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: RulesBuilder,
    default_value: Option<Value>,
}

/// Builds one rules container: either a list of rules or a partition.
#[derive(Debug, Default)]
pub struct RulesBuilder {
    rules: Vec<RuleBuilder>,
    partition: Option<Box<PartitionBuilder>>,
}

/// Intermediate builder passed to the rule definition closure.
#[derive(Debug, Default)]
pub struct RuleBuilder {
    matchers: Vec<Matcher>,
    value: Option<ValueDistribution>,
}

/// Intermediate builder passed to the partition definition closure.
#[derive(Debug)]
pub struct PartitionBuilder {
    property: String,
    branches: Vec<(String, RulesBuilder)>,
    fallback: Option<RulesBuilder>,
}

impl RuleSetBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Rules are tried in the order they are added.
    #[must_use]
    pub fn rule(mut self, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        self.rules = self.rules.rule(f);
        self
    }

    /// Dispatch on `property` first, then evaluate the selected branch.
    #[must_use]
    pub fn partition(
        mut self,
        property: &str,
        f: impl FnOnce(PartitionBuilder) -> PartitionBuilder,
    ) -> Self {
        self.rules = self.rules.partition(property, f);
        self
    }

    /// Value returned when no rule matches.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Assemble and validate the rule-set.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if a rule has no value, a rules block mixes
    /// rules with a partition, or validation fails.
    pub fn build(self) -> Result<RuleSet, CompileError> {
        let mut next_index = 0;
        let ruleset = RuleSet {
            rules: self.rules.finish(&mut next_index)?,
            default_value: self.default_value,
        };
        ruleset.validate()?;
        Ok(ruleset)
    }
}

impl RulesBuilder {
    #[must_use]
    pub fn rule(mut self, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        self.rules.push(f(RuleBuilder::default()));
        self
    }

    #[must_use]
    pub fn partition(
        mut self,
        property: &str,
        f: impl FnOnce(PartitionBuilder) -> PartitionBuilder,
    ) -> Self {
        self.partition = Some(Box::new(f(PartitionBuilder {
            property: property.to_owned(),
            branches: Vec::new(),
            fallback: None,
        })));
        self
    }

    fn finish(self, next_index: &mut usize) -> Result<RulesContainer, CompileError> {
        match self.partition {
            Some(_) if !self.rules.is_empty() => Err(CompileError::MixedRules),
            Some(partition) => (*partition).finish(next_index),
            None => {
                let mut rules = Vec::with_capacity(self.rules.len());
                for builder in self.rules {
                    let index = *next_index;
                    *next_index += 1;
                    let value = builder.value.ok_or(CompileError::MissingValue { index })?;
                    rules.push(Rule {
                        matcher: Matcher::All(builder.matchers),
                        value,
                    });
                }
                Ok(RulesContainer::List(rules))
            }
        }
    }
}

impl RuleBuilder {
    /// Add a matcher. Successive calls form an ordered conjunction.
    #[must_use]
    pub fn when(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Return a fixed value when matched.
    #[must_use]
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(ValueDistribution::Single(value.into()));
        self
    }

    /// Pick a value by weight, bucketing on the owner `<owner_type>.@@id`.
    #[must_use]
    pub fn weighted<V: Into<Value>>(
        mut self,
        owner_type: &str,
        salt: &str,
        table: impl IntoIterator<Item = (V, u64)>,
    ) -> Self {
        self.value = Some(ValueDistribution::Weighted {
            owner_type: owner_type.to_owned(),
            salt: salt.to_owned(),
            table: table.into_iter().map(|(v, w)| (v.into(), w)).collect(),
        });
        self
    }

    /// Pick one of `values` with equal probability, bucketing on the owner.
    #[must_use]
    pub fn uniform<V: Into<Value>>(
        mut self,
        owner_type: &str,
        salt: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.value = Some(ValueDistribution::Uniform {
            owner_type: owner_type.to_owned(),
            salt: salt.to_owned(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }
}

impl PartitionBuilder {
    /// Rules evaluated when the partition property equals `key`
    /// (case-insensitively).
    #[must_use]
    pub fn branch(mut self, key: &str, f: impl FnOnce(RulesBuilder) -> RulesBuilder) -> Self {
        self.branches
            .push((key.to_lowercase(), f(RulesBuilder::default())));
        self
    }

    /// Shorthand for a branch holding one unconditional rule.
    #[must_use]
    pub fn branch_value(self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.branch(key, |b| b.rule(|r| r.value(value)))
    }

    /// Rules evaluated when the property is missing or matches no branch.
    #[must_use]
    pub fn fallback(mut self, f: impl FnOnce(RulesBuilder) -> RulesBuilder) -> Self {
        self.fallback = Some(f(RulesBuilder::default()));
        self
    }

    fn finish(self, next_index: &mut usize) -> Result<RulesContainer, CompileError> {
        let mut branches = Vec::with_capacity(self.branches.len());
        for (key, builder) in self.branches {
            branches.push((key, builder.finish(next_index)?));
        }
        let fallback = match self.fallback {
            Some(builder) => builder.finish(next_index)?,
            None => RulesContainer::empty(),
        };
        Ok(RulesContainer::Partition {
            property: self.property,
            branches,
            fallback: Box::new(fallback),
        })
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RuleSet:")?;
        fmt_container(f, &self.rules, 1)?;
        match &self.default_value {
            Some(value) => writeln!(f, "  default: {value}"),
            None => writeln!(f, "  default: none"),
        }
    }
}

fn fmt_container(f: &mut fmt::Formatter<'_>, container: &RulesContainer, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match container {
        RulesContainer::List(rules) => {
            for rule in rules {
                writeln!(f, "{pad}{rule}")?;
            }
            Ok(())
        }
        RulesContainer::Partition {
            property,
            branches,
            fallback,
        } => {
            writeln!(f, "{pad}partition on {property}:")?;
            for (key, branch) in branches {
                writeln!(f, "{pad}  \"{key}\":")?;
                fmt_container(f, branch, depth + 2)?;
            }
            writeln!(f, "{pad}  *:")?;
            fmt_container(f, fallback, depth + 2)
        }
    }
}
