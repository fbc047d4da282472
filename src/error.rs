use thiserror::Error;

use crate::parse::ParseError;
use crate::{CompileError, EvalError};

/// Unified error type covering literal parsing, compilation and evaluation.
///
/// Handy for callers that build a rule-set from hand-written literals and
/// evaluate it in one function.
#[derive(Debug, Error)]
pub enum FlagpoleError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}
