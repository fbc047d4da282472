mod context;
mod error;
mod matcher;
mod rule;
mod ruleset;
mod value;

pub use context::{Context, ContextLookup, SYSTEM_TIME_KEY};
pub use error::{CompileError, EvalError};
pub use matcher::{ComparisonOp, Condition, Matcher, PropertyExpr, property};
pub use rule::{Rule, ValueDistribution};
pub use ruleset::{
    PartitionBuilder, RuleBuilder, RuleSet, RuleSetBuilder, RulesBuilder, RulesContainer,
};
pub use value::Value;
