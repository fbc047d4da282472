use std::fmt;

/// Which literal grammar rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Duration,
    Version,
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralKind::Duration => write!(f, "duration"),
            LiteralKind::Version => write!(f, "version"),
        }
    }
}

/// A duration or version literal that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: LiteralKind,
    input: String,
    reason: String,
}

impl ParseError {
    pub(crate) fn new(kind: LiteralKind, input: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.to_owned(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> LiteralKind {
        self.kind
    }

    /// The rejected literal, as given.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.input, self.reason)
    }
}

impl std::error::Error for ParseError {}
