//! Compilation errors, all carrying the source line they were raised on.

use scriv_bytecode::FormatError;
use scriv_core::SpecError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("line {line}: syntax error, unexpected '{what}'")]
    Unexpected { line: u32, what: String },

    #[error("line {line}: no operator between operands")]
    MissingOperator { line: u32 },

    #[error("line {line}: unexpected end of expression")]
    MissingOperand { line: u32 },

    #[error("line {line}: '(' not closed")]
    UnclosedParen { line: u32 },

    #[error("line {line}: unexpected ')'")]
    UnmatchedParen { line: u32 },

    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: u32 },

    #[error("line {line}: call to undefined tag '{name}'")]
    UndefinedTag { line: u32, name: String },

    #[error("line {line}: '{arg}' is already specified in '{tag}'")]
    DuplicateArgument { line: u32, arg: String, tag: String },

    #[error("line {line}: too many arguments for '{tag}'")]
    TooManyArguments { line: u32, tag: String },

    #[error("line {line}: label '{name}' is overloaded")]
    DuplicateLabel { line: u32, name: String },

    #[error("line {line}: tag pair opened here is never closed")]
    UnterminatedPair { line: u32 },

    #[error("line {line}: pair tag before '{name}' is required")]
    PairOpenerRequired { line: u32, name: String },

    #[error("line {line}: '{name}' is not available at this location")]
    NotAvailableHere { line: u32, name: String },

    #[error("line {line}: argument '{param}' of '{tag}' requires a variable")]
    RefArgNotVariable {
        line: u32,
        param: String,
        tag: String,
    },

    #[error("line {line}: a reference applies only to a plain variable")]
    RefNotPlainVar { line: u32 },

    #[error("line {line}: '[]' is only valid as an assignment target")]
    AppendNotAssigned { line: u32 },

    #[error("line {line}: arguments of '{tag}' must be constant")]
    ArgNotConstant { line: u32, tag: String },

    #[error("line {line}: cannot open '{path}'")]
    FileOpen { line: u32, path: String },

    #[error("line {line}: {message}")]
    Hook { line: u32, message: String },

    #[error("line {line}: {source}")]
    Spec { line: u32, source: SpecError },

    #[error("line {line}: malformed expression data: {source}")]
    Format { line: u32, source: FormatError },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Unexpected { line, .. }
            | CompileError::MissingOperator { line }
            | CompileError::MissingOperand { line }
            | CompileError::UnclosedParen { line }
            | CompileError::UnmatchedParen { line }
            | CompileError::UnterminatedString { line }
            | CompileError::UndefinedTag { line, .. }
            | CompileError::DuplicateArgument { line, .. }
            | CompileError::TooManyArguments { line, .. }
            | CompileError::DuplicateLabel { line, .. }
            | CompileError::UnterminatedPair { line }
            | CompileError::PairOpenerRequired { line, .. }
            | CompileError::NotAvailableHere { line, .. }
            | CompileError::RefArgNotVariable { line, .. }
            | CompileError::RefNotPlainVar { line }
            | CompileError::AppendNotAssigned { line }
            | CompileError::ArgNotConstant { line, .. }
            | CompileError::FileOpen { line, .. }
            | CompileError::Hook { line, .. }
            | CompileError::Spec { line, .. }
            | CompileError::Format { line, .. } => *line,
        }
    }
}
