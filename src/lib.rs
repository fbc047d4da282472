mod compile;
mod engine;
mod error;
mod evaluate;
pub mod parse;
mod pool;
pub mod runtime;
mod types;
mod validate;

pub use compile::{CompiledEvaluator, PoolStats};
pub use engine::{EngineSettings, Evaluator};
pub use error::FlagpoleError;
pub use evaluate::Interpreter;
pub use parse::{LiteralKind, ParseError, parse_duration, parse_version};
pub use runtime::{Comparer, ComparerRegistry, OrderKey, Sha1Provider};
pub use types::{
    CompileError, ComparisonOp, Condition, Context, ContextLookup, EvalError, Matcher,
    PartitionBuilder, PropertyExpr, Rule, RuleBuilder, RuleSet, RuleSetBuilder, RulesBuilder,
    RulesContainer, SYSTEM_TIME_KEY, Value, ValueDistribution, property,
};
