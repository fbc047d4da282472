use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::compile::{CompiledEvaluator, Compiler};
use crate::evaluate::Interpreter;
use crate::runtime::{self, Comparer, ComparerRegistry, OrderKey, Sha1Provider};
use crate::{CompileError, ContextLookup, EvalError, RuleSet, Value};

/// The shared surface of both backends.
///
/// Evaluators are immutable once built and can be called from any number of
/// threads at once, typically behind an `Arc`.
pub trait Evaluator: Send + Sync {
    /// Evaluate the rule-set against one request context.
    ///
    /// Returns `Ok(None)` when no rule produced a value and there is no default.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when a taken branch cannot be evaluated. The error
    /// affects only this call.
    fn evaluate(&self, ctx: &dyn ContextLookup) -> Result<Option<Value>, EvalError>;
}

/// Capabilities injected into every evaluator: the bucketing hash and the
/// named comparer registry.
///
/// The default uses SHA-1 and registers a `version` comparer for dotted
/// version strings.
///
/// # Example
///
/// ```
/// use flagpole::{Context, EngineSettings, Evaluator, RuleSetBuilder, Value, property};
///
/// let ruleset = RuleSetBuilder::new()
///     .rule(|r| r.when(property("app.version").using("version").gte("2.0")).value("new-ui"))
///     .default_value("old-ui")
///     .build()
///     .unwrap();
///
/// let evaluator = EngineSettings::default().compile(&ruleset).unwrap();
/// let ctx = Context::new().set("app.version", "2.1.3");
/// assert_eq!(evaluator.evaluate(&ctx).unwrap(), Some(Value::from("new-ui")));
/// ```
#[derive(Clone)]
pub struct EngineSettings {
    sha1: Sha1Provider,
    comparers: Arc<ComparerRegistry>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::bare().with_comparer_fn("version", runtime::version_comparer())
    }
}

impl EngineSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SHA-1 hashing and an empty comparer registry.
    #[must_use]
    pub fn bare() -> Self {
        Self {
            sha1: Arc::new(runtime::sha1_digest),
            comparers: Arc::new(ComparerRegistry::new()),
        }
    }

    /// Replace the bucketing hash.
    #[must_use]
    pub fn with_sha1(mut self, sha1: impl Fn(&[u8]) -> [u8; 20] + Send + Sync + 'static) -> Self {
        self.sha1 = Arc::new(sha1);
        self
    }

    /// Register (or replace) a named comparer.
    #[must_use]
    pub fn with_comparer(
        self,
        name: &str,
        comparer: impl Fn(&str) -> Option<OrderKey> + Send + Sync + 'static,
    ) -> Self {
        self.with_comparer_fn(name, Arc::new(comparer))
    }

    fn with_comparer_fn(mut self, name: &str, comparer: Comparer) -> Self {
        Arc::make_mut(&mut self.comparers).insert(name.to_owned(), comparer);
        self
    }

    /// Registered comparer names, sorted.
    #[must_use]
    pub fn comparer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.comparers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a tree-walking evaluator over a copy of `ruleset`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if the rule-set fails validation.
    #[instrument(skip_all)]
    pub fn interpret(&self, ruleset: &RuleSet) -> Result<Interpreter, CompileError> {
        ruleset.validate()?;
        debug!("built interpreted evaluator");
        Ok(Interpreter::new(
            ruleset,
            Arc::clone(&self.sha1),
            Arc::clone(&self.comparers),
        ))
    }

    /// Compile `ruleset` into a closure over a frozen constant pool. The
    /// result holds no reference to the rule tree.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if the rule-set fails validation.
    #[instrument(skip_all)]
    pub fn compile(&self, ruleset: &RuleSet) -> Result<CompiledEvaluator, CompileError> {
        ruleset.validate()?;
        let mut compiler = Compiler::new();
        let entry = compiler.compile_ruleset(ruleset);
        let evaluator = compiler.finalize(entry, Arc::clone(&self.sha1), Arc::clone(&self.comparers));
        let stats = evaluator.pool_stats();
        debug!(
            literals = stats.literals,
            weighted_tables = stats.weighted_tables,
            uniform_tables = stats.uniform_tables,
            "compiled evaluator"
        );
        Ok(evaluator)
    }
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("comparers", &self.comparer_names())
            .finish_non_exhaustive()
    }
}
