use thiserror::Error;

/// Errors detected while validating a rule tree, before any evaluator exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("rule #{index} has no value; call .value(), .weighted() or .uniform()")]
    MissingValue { index: usize },

    #[error("partition property name must not be empty")]
    EmptyPartitionProperty,

    #[error("duplicate partition key '{key}' on property '{property}'")]
    DuplicatePartitionKey { property: String, key: String },

    #[error("bucketed value in rule #{index} has an empty owner type")]
    EmptyOwnerType { index: usize },

    #[error("a rules block cannot hold both a partition and plain rules")]
    MixedRules,
}

/// Fatal errors raised while evaluating a context. Each one aborts the single
/// call that raised it; the evaluator stays usable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("comparer '{name}' is not registered")]
    UnknownComparer { name: String },

    #[error("comparer '{name}' cannot order '{input}'")]
    ComparerRejected { name: String, input: String },

    #[error("cannot compare {subject} value against {threshold} literal")]
    TypeMismatch {
        threshold: &'static str,
        subject: &'static str,
    },

    #[error("time window test needs a valid '{key}' in the context")]
    MissingSystemTime { key: &'static str },
}
