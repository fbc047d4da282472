//! Closure compiler.
//!
//! Each rule node becomes a boxed closure. Literals and distribution tables are
//! hoisted into a content-addressed constant pool and read back by index, so
//! the compiled tree keeps only indices, property names and operators. The
//! finished closure is bound to the frozen pool and the injected capabilities
//! in [`CompiledEvaluator`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::engine::Evaluator;
use crate::pool::{ConstantPool, PoolBuilder};
use crate::runtime::{self, ComparerRegistry, Sha1Provider};
use crate::{
    ComparisonOp, Condition, ContextLookup, EvalError, Matcher, Rule, RuleSet, RulesContainer,
    SYSTEM_TIME_KEY, Value, ValueDistribution,
};

/// Everything a compiled closure can reach during one call.
pub(crate) struct Frame<'a> {
    pool: &'a ConstantPool,
    sha1: &'a Sha1Provider,
    comparers: &'a ComparerRegistry,
    ctx: &'a dyn ContextLookup,
}

/// Produces the rule-set's value, or `None` to fall through.
pub(crate) type Step = Box<dyn Fn(&Frame<'_>) -> Result<Option<Value>, EvalError> + Send + Sync>;

/// Decides whether a matcher accepts the context.
type Guard = Box<dyn Fn(&Frame<'_>) -> Result<bool, EvalError> + Send + Sync>;

/// Tests an already-fetched property value.
type Test = Box<dyn Fn(&Frame<'_>, Option<&Value>) -> Result<bool, EvalError> + Send + Sync>;

/// Walks a rule tree once, interning literals and emitting closures.
///
/// [`finalize()`](Self::finalize) consumes the compiler, so nothing can be
/// compiled against a pool after it has been frozen.
pub(crate) struct Compiler {
    pool: PoolBuilder,
}

impl Compiler {
    pub(crate) fn new() -> Self {
        Self {
            pool: PoolBuilder::new(),
        }
    }

    pub(crate) fn compile_ruleset(&mut self, ruleset: &RuleSet) -> Step {
        let body = self.compile_container(&ruleset.rules);
        let default = match &ruleset.default_value {
            Some(value) => self.emit_return_some(value),
            None => emit_return_none(),
        };
        Box::new(move |frame| match body(frame)? {
            Some(value) => Ok(Some(value)),
            None => default(frame),
        })
    }

    /// Freeze the pool and bind it, with the capabilities, to `entry`.
    pub(crate) fn finalize(
        self,
        entry: Step,
        sha1: Sha1Provider,
        comparers: Arc<ComparerRegistry>,
    ) -> CompiledEvaluator {
        CompiledEvaluator {
            pool: self.pool.freeze(),
            sha1,
            comparers,
            entry,
        }
    }

    fn compile_container(&mut self, container: &RulesContainer) -> Step {
        match container {
            RulesContainer::List(rules) => self.compile_rules(rules),
            RulesContainer::Partition {
                property,
                branches,
                fallback,
            } => {
                let mut jump_table = HashMap::with_capacity(branches.len());
                for (key, branch) in branches {
                    let step = self.compile_container(branch);
                    jump_table.insert(key.to_lowercase(), step);
                }
                let fallback = self.compile_container(fallback);
                emit_partition(property.clone(), jump_table, fallback)
            }
        }
    }

    fn compile_rules(&mut self, rules: &[Rule]) -> Step {
        let arms: Vec<(Guard, Step)> = rules
            .iter()
            .map(|rule| {
                let guard = self.compile_matcher(&rule.matcher);
                let step = self.compile_value(&rule.value);
                (guard, step)
            })
            .collect();
        Box::new(move |frame| {
            for (guard, step) in &arms {
                // branch-if-false to the next arm
                if !guard(frame)? {
                    continue;
                }
                if let Some(value) = step(frame)? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }

    fn compile_matcher(&mut self, matcher: &Matcher) -> Guard {
        match matcher {
            Matcher::Property { name, condition } => {
                let test = self.compile_condition(condition);
                emit_fetch_and_test(name.clone(), test)
            }
            Matcher::All(items) => {
                let guards: Vec<Guard> = items.iter().map(|m| self.compile_matcher(m)).collect();
                Box::new(move |frame| {
                    for guard in &guards {
                        if !guard(frame)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                })
            }
            Matcher::Any(items) => {
                let guards: Vec<Guard> = items.iter().map(|m| self.compile_matcher(m)).collect();
                Box::new(move |frame| {
                    for guard in &guards {
                        if guard(frame)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                })
            }
            Matcher::Not(inner) => {
                let guard = self.compile_matcher(inner);
                Box::new(move |frame| Ok(!guard(frame)?))
            }
        }
    }

    fn compile_condition(&mut self, condition: &Condition) -> Test {
        let comparison_type = condition.comparison_type().map(str::to_owned);
        match condition {
            Condition::Compare { op, value, .. } => {
                self.emit_comparison(*op, value, comparison_type)
            }
            Condition::In { values, .. } => self.emit_in_array(values, comparison_type),
            Condition::Contains { value, .. } => self.emit_contains(value, comparison_type),
            Condition::StartsWith(prefix) => self.emit_starts_with(prefix),
            Condition::EndsWith(suffix) => self.emit_ends_with(suffix),
            Condition::WithinTime(window) => emit_within_time(*window),
            Condition::All(items) => {
                let tests: Vec<Test> = items.iter().map(|c| self.compile_condition(c)).collect();
                Box::new(move |frame, subject| {
                    for test in &tests {
                        if !test(frame, subject)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                })
            }
            Condition::Any(items) => {
                let tests: Vec<Test> = items.iter().map(|c| self.compile_condition(c)).collect();
                Box::new(move |frame, subject| {
                    for test in &tests {
                        if test(frame, subject)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                })
            }
            Condition::Not(inner) => {
                let test = self.compile_condition(inner);
                Box::new(move |frame, subject| Ok(!test(frame, subject)?))
            }
        }
    }

    fn compile_value(&mut self, value: &ValueDistribution) -> Step {
        match value {
            ValueDistribution::Single(value) => self.emit_return_some(value),
            ValueDistribution::Weighted {
                owner_type,
                salt,
                table,
            } => {
                let index = self.pool.weighted.intern(table);
                let key = runtime::owner_key(owner_type);
                let salt = salt.clone();
                Box::new(move |frame| {
                    Ok(emit_owner_hash(frame, &key, &salt)
                        .and_then(|hash| runtime::weighted_select(&frame.pool.weighted[index], hash))
                        .cloned())
                })
            }
            ValueDistribution::Uniform {
                owner_type,
                salt,
                values,
            } => {
                let index = self.pool.uniform.intern(values);
                let key = runtime::owner_key(owner_type);
                let salt = salt.clone();
                Box::new(move |frame| {
                    Ok(emit_owner_hash(frame, &key, &salt)
                        .and_then(|hash| runtime::uniform_select(&frame.pool.uniform[index], hash))
                        .cloned())
                })
            }
        }
    }

    // -- Instructions --------------------------------------------------------

    fn emit_load_constant(&mut self, value: &Value) -> usize {
        self.pool.values.intern(value)
    }

    fn emit_return_some(&mut self, value: &Value) -> Step {
        let index = self.emit_load_constant(value);
        Box::new(move |frame| Ok(Some(frame.pool.values[index].clone())))
    }

    fn emit_comparison(
        &mut self,
        op: ComparisonOp,
        threshold: &Value,
        comparison_type: Option<String>,
    ) -> Test {
        let index = self.emit_load_constant(threshold);
        Box::new(move |frame, subject| {
            runtime::compare(
                &frame.pool.values[index],
                subject,
                op,
                comparison_type.as_deref(),
                frame.comparers,
            )
        })
    }

    fn emit_in_array(&mut self, values: &[Value], comparison_type: Option<String>) -> Test {
        let index = self.emit_load_constant(&Value::Array(values.to_vec()));
        Box::new(move |frame, subject| {
            let values = frame.pool.values[index].as_array().unwrap_or_default();
            runtime::in_array(values, subject, comparison_type.as_deref(), frame.comparers)
        })
    }

    fn emit_contains(&mut self, value: &Value, comparison_type: Option<String>) -> Test {
        let index = self.emit_load_constant(value);
        Box::new(move |frame, subject| {
            runtime::contains(
                &frame.pool.values[index],
                subject,
                comparison_type.as_deref(),
                frame.comparers,
            )
        })
    }

    fn emit_starts_with(&mut self, prefix: &str) -> Test {
        let index = self.emit_load_constant(&Value::from(prefix));
        Box::new(move |frame, subject| {
            let prefix = frame.pool.values[index].as_str().unwrap_or_default();
            Ok(runtime::starts_with(subject, prefix))
        })
    }

    fn emit_ends_with(&mut self, suffix: &str) -> Test {
        let index = self.emit_load_constant(&Value::from(suffix));
        Box::new(move |frame, subject| {
            let suffix = frame.pool.values[index].as_str().unwrap_or_default();
            Ok(runtime::ends_with(subject, suffix))
        })
    }
}

fn emit_return_none() -> Step {
    Box::new(|_| Ok(None))
}

fn emit_fetch_and_test(property: String, test: Test) -> Guard {
    Box::new(move |frame| {
        let subject = frame.ctx.lookup(&property);
        test(frame, subject.as_ref())
    })
}

fn emit_within_time(window: Duration) -> Test {
    Box::new(move |frame, subject| {
        let now = frame.ctx.lookup(SYSTEM_TIME_KEY);
        runtime::within_time(subject, now.as_ref(), window)
    })
}

fn emit_owner_hash(frame: &Frame<'_>, key: &str, salt: &str) -> Option<u64> {
    let owner_id = frame.ctx.lookup(key)?;
    runtime::owner_hash(&owner_id, salt, frame.sha1)
}

fn emit_partition(property: String, jump_table: HashMap<String, Step>, fallback: Step) -> Step {
    Box::new(move |frame| {
        let branch = frame
            .ctx
            .lookup(&property)
            .and_then(|value| runtime::partition_key(&value))
            .and_then(|key| jump_table.get(&key));
        match branch {
            Some(step) => step(frame),
            None => fallback(frame),
        }
    })
}

/// Sizes of a compiled evaluator's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub literals: usize,
    pub weighted_tables: usize,
    pub uniform_tables: usize,
}

/// Evaluator produced by compilation: one closure over a frozen constant
/// pool plus the hash provider and comparer registry it was finalized with.
pub struct CompiledEvaluator {
    pool: ConstantPool,
    sha1: Sha1Provider,
    comparers: Arc<ComparerRegistry>,
    entry: Step,
}

impl CompiledEvaluator {
    /// Run the compiled closure against one context.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when a taken branch cannot be evaluated.
    pub fn invoke(&self, ctx: &dyn ContextLookup) -> Result<Option<Value>, EvalError> {
        let frame = Frame {
            pool: &self.pool,
            sha1: &self.sha1,
            comparers: &self.comparers,
            ctx,
        };
        (self.entry)(&frame)
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            literals: self.pool.values.len(),
            weighted_tables: self.pool.weighted.len(),
            uniform_tables: self.pool.uniform.len(),
        }
    }
}

impl Evaluator for CompiledEvaluator {
    fn evaluate(&self, ctx: &dyn ContextLookup) -> Result<Option<Value>, EvalError> {
        self.invoke(ctx)
    }
}

impl fmt::Debug for CompiledEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEvaluator")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
