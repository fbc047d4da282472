use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::engine::Evaluator;
use crate::runtime::{self, ComparerRegistry, Sha1Provider};
use crate::{
    Condition, ContextLookup, EvalError, Matcher, Rule, RuleSet, RulesContainer, SYSTEM_TIME_KEY,
    Value, ValueDistribution,
};

/// Tree-walking evaluator. Walks its own copy of the rule tree on every call.
pub struct Interpreter {
    root: Block,
    default_value: Option<Value>,
    sha1: Sha1Provider,
    comparers: Arc<ComparerRegistry>,
}

/// The interpreter's copy of a rules container. Partition branches are
/// indexed by lower-cased key so dispatch is one hash lookup.
#[derive(Debug)]
enum Block {
    List(Vec<Rule>),
    Partition {
        property: String,
        branches: HashMap<String, Block>,
        fallback: Box<Block>,
    },
}

impl From<&RulesContainer> for Block {
    fn from(container: &RulesContainer) -> Self {
        match container {
            RulesContainer::List(rules) => Block::List(rules.clone()),
            RulesContainer::Partition {
                property,
                branches,
                fallback,
            } => Block::Partition {
                property: property.clone(),
                branches: branches
                    .iter()
                    .map(|(key, branch)| (key.to_lowercase(), Block::from(branch)))
                    .collect(),
                fallback: Box::new(Block::from(fallback.as_ref())),
            },
        }
    }
}

impl Interpreter {
    pub(crate) fn new(ruleset: &RuleSet, sha1: Sha1Provider, comparers: Arc<ComparerRegistry>) -> Self {
        Self {
            root: Block::from(&ruleset.rules),
            default_value: ruleset.default_value.clone(),
            sha1,
            comparers,
        }
    }

    fn eval_block(&self, block: &Block, ctx: &dyn ContextLookup) -> Result<Option<Value>, EvalError> {
        match block {
            Block::List(rules) => {
                for (index, rule) in rules.iter().enumerate() {
                    if !self.eval_matcher(&rule.matcher, ctx)? {
                        continue;
                    }
                    trace!(rule = index, "rule matched");
                    // A bucketed rule with no owner falls through to the next rule.
                    if let Some(value) = self.eval_value(&rule.value, ctx) {
                        return Ok(Some(value));
                    }
                }
                Ok(None)
            }
            Block::Partition {
                property,
                branches,
                fallback,
            } => {
                let key = ctx
                    .lookup(property)
                    .and_then(|value| runtime::partition_key(&value));
                let branch = key.as_deref().and_then(|key| branches.get(key));
                trace!(property = %property, key = ?key, matched = branch.is_some(), "partition dispatch");
                self.eval_block(branch.unwrap_or(fallback), ctx)
            }
        }
    }

    fn eval_matcher(&self, matcher: &Matcher, ctx: &dyn ContextLookup) -> Result<bool, EvalError> {
        match matcher {
            Matcher::Property { name, condition } => {
                let subject = ctx.lookup(name);
                self.eval_condition(condition, subject.as_ref(), ctx)
            }
            Matcher::All(items) => {
                for item in items {
                    if !self.eval_matcher(item, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Matcher::Any(items) => {
                for item in items {
                    if self.eval_matcher(item, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Matcher::Not(inner) => Ok(!self.eval_matcher(inner, ctx)?),
        }
    }

    fn eval_condition(
        &self,
        condition: &Condition,
        subject: Option<&Value>,
        ctx: &dyn ContextLookup,
    ) -> Result<bool, EvalError> {
        match condition {
            Condition::Compare {
                op,
                value,
                comparison_type,
            } => runtime::compare(
                value,
                subject,
                *op,
                comparison_type.as_deref(),
                &self.comparers,
            ),
            Condition::In {
                values,
                comparison_type,
            } => runtime::in_array(values, subject, comparison_type.as_deref(), &self.comparers),
            Condition::Contains {
                value,
                comparison_type,
            } => runtime::contains(value, subject, comparison_type.as_deref(), &self.comparers),
            Condition::StartsWith(prefix) => Ok(runtime::starts_with(subject, prefix)),
            Condition::EndsWith(suffix) => Ok(runtime::ends_with(subject, suffix)),
            Condition::WithinTime(window) => {
                let now = ctx.lookup(SYSTEM_TIME_KEY);
                runtime::within_time(subject, now.as_ref(), *window)
            }
            Condition::All(items) => {
                for item in items {
                    if !self.eval_condition(item, subject, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(items) => {
                for item in items {
                    if self.eval_condition(item, subject, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!self.eval_condition(inner, subject, ctx)?),
        }
    }

    fn eval_value(&self, value: &ValueDistribution, ctx: &dyn ContextLookup) -> Option<Value> {
        match value {
            ValueDistribution::Single(value) => Some(value.clone()),
            ValueDistribution::Weighted {
                owner_type,
                salt,
                table,
            } => {
                let hash = self.bucket(owner_type, salt, ctx)?;
                runtime::weighted_select(table, hash).cloned()
            }
            ValueDistribution::Uniform {
                owner_type,
                salt,
                values,
            } => {
                let hash = self.bucket(owner_type, salt, ctx)?;
                runtime::uniform_select(values, hash).cloned()
            }
        }
    }

    fn bucket(&self, owner_type: &str, salt: &str, ctx: &dyn ContextLookup) -> Option<u64> {
        let owner_id = ctx.lookup(&runtime::owner_key(owner_type))?;
        runtime::owner_hash(&owner_id, salt, &self.sha1)
    }
}

impl Evaluator for Interpreter {
    fn evaluate(&self, ctx: &dyn ContextLookup) -> Result<Option<Value>, EvalError> {
        if let Some(value) = self.eval_block(&self.root, ctx)? {
            return Ok(Some(value));
        }
        Ok(self.default_value.clone())
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("root", &self.root)
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}
