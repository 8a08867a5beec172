//! Error types for the compiler.
//!
//! Only [`CompileError::Type`] describes a mistake in the program being
//! compiled. Every other variant means an earlier pass handed a later pass
//! something outside its input grammar, which is a compiler bug.

use thiserror::Error;

use crate::{frontend::intern::InternedSymbol, middle::ty::Type};

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("type error: {kind} (in `{context}`)")]
    Type {
        kind: TypeErrorKind,
        context: String,
        /// Boxed so the derive does not treat it as the error's backtrace,
        /// which only builds on nightly
        #[cfg(feature = "error-backtrace")]
        trace: Box<std::backtrace::Backtrace>,
    },

    #[error("internal error: {stage} received unsupported construct `{construct}`")]
    UnsupportedConstruct {
        stage: &'static str,
        construct: String,
    },

    #[error("internal error: function `{function}` jumps to unknown label `{label}`")]
    UnboundLabel {
        function: InternedSymbol,
        label: InternedSymbol,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl CompileError {
    pub fn type_error(kind: TypeErrorKind, context: impl core::fmt::Display) -> Self {
        Self::Type {
            kind,
            context: context.to_string(),
            #[cfg(feature = "error-backtrace")]
            trace: Box::new(std::backtrace::Backtrace::capture()),
        }
    }

    pub fn unsupported(stage: &'static str, construct: impl core::fmt::Debug) -> Self {
        Self::UnsupportedConstruct {
            stage,
            construct: format!("{construct:?}"),
        }
    }

    /// Whether the error describes a problem in the user's program rather than
    /// a defect in the compiler itself
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Type { .. })
    }

    /// Where the type error was raised. Only captured when `RUST_BACKTRACE`
    /// or `RUST_LIB_BACKTRACE` is set.
    #[cfg(feature = "error-backtrace")]
    pub fn trace(&self) -> Option<&std::backtrace::Backtrace> {
        match self {
            Self::Type { trace, .. } => Some(trace),
            _ => None,
        }
    }

    pub fn type_error_kind(&self) -> Option<&TypeErrorKind> {
        match self {
            Self::Type { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeErrorKind {
    #[error("expected `{expected}` but found `{actual}`")]
    Mismatch { expected: Type, actual: Type },

    #[error("`{operator}` expects {expected} operand(s) but was given {actual}")]
    OperandCount {
        operator: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("function expects {expected} argument(s) but was given {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    #[error("`{actual}` is not a function")]
    NotAFunction { actual: Type },

    #[error("`{actual}` is not a tuple")]
    NotATuple { actual: Type },

    #[error("cannot print a value of type `{actual}`")]
    NotPrintable { actual: Type },

    #[error("tuple index must be a constant integer")]
    NonConstantIndex,

    #[error("index {index} is out of bounds for a tuple of {length} field(s)")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("tuples may have at most {max} fields but this one has {actual}")]
    TupleTooLarge { max: usize, actual: usize },

    #[error("`{name}` is used before it is assigned")]
    UnboundVariable { name: InternedSymbol },

    #[error("`{name}` names a function and cannot be assigned to or shadowed")]
    AssignToFunction { name: InternedSymbol },

    #[error("`{name}` is defined more than once")]
    DuplicateDefinition { name: InternedSymbol },

    #[error("`{name}` is a reserved name")]
    ReservedName { name: InternedSymbol },

    #[error("`return` is only allowed inside a function definition")]
    ReturnOutsideFunction,

    #[error("functions may only be defined at the top level")]
    NestedFunction,
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_errors_are_user_facing() {
        let error = CompileError::type_error(TypeErrorKind::ReturnOutsideFunction, "return 1");

        assert!(error.is_user_facing());
        assert_eq!(error.type_error_kind(), Some(&TypeErrorKind::ReturnOutsideFunction));
        assert_eq!(
            error.to_string(),
            "type error: `return` is only allowed inside a function definition (in `return 1`)"
        );
    }

    #[cfg(feature = "error-backtrace")]
    #[test]
    fn type_errors_carry_a_trace() {
        let error = CompileError::type_error(TypeErrorKind::NestedFunction, "f");
        let trace = error.trace().unwrap();

        // renders whether or not anything was captured
        let _ = trace.to_string();
        let _ = trace.status();

        let other = CompileError::InvalidConfiguration {
            reason: "empty".into(),
        };
        assert!(other.trace().is_none());
    }
}
