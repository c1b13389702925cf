// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Front-end and compiler core for the silscheme language.
//!
//! This crate lexes, parses and lowers silscheme source (a
//! Scheme-family surface syntax with lambdas, quasi-quotation,
//! first-class continuations and modules) into a flat, line-oriented
//! instruction stream for a stack-based IL virtual machine. It knows
//! nothing about the VM itself; it only produces the textual program.

pub mod ast;
pub mod diag;
pub mod lexer;
pub mod stdlib;
pub mod types;

mod lower;
mod metrics;
mod parser;

pub use metrics::CompilerMetrics;
pub use parser::parse;

use thiserror::Error;
use tracing::{debug, instrument};

pub(crate) const MAX_TOKENS: usize = 200_000;
pub(crate) const MAX_PARSE_DEPTH: usize = 1_024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("lex: unterminated string literal at offset {0}")]
    UnterminatedString(usize),
    #[error("parse: unexpected end of input")]
    Eof,
    #[error("parse: undefined token '{token}' at offset {offset}")]
    UndefinedToken { token: String, offset: usize },
    #[error("parse: missing ')' closing {context} at offset {offset}")]
    MissingRParen { context: &'static str, offset: usize },
    #[error("parse: missing '(' before the parameter list at offset {offset}")]
    MissingLParen { offset: usize },
    #[error("parse: duplicate parameter '{name}' at offset {offset}")]
    DuplicateParameter { name: String, offset: usize },
    #[error("parse: illegal symbol '{token}' at offset {offset}")]
    IllegalSymbol { token: String, offset: usize },
    #[error("preprocess: 'import' expects a module alias and a module path")]
    ImportArity { offset: Option<usize> },
    #[error("preprocess: module path must be a string")]
    ImportPath { offset: Option<usize> },
    #[error("preprocess: 'native' expects a symbol")]
    NativeArity { offset: Option<usize> },
    #[error("compile: [{form}] expects {expected} argument(s), {given} given")]
    WrongArgumentCount {
        form: &'static str,
        expected: usize,
        given: usize,
        offset: Option<usize>,
    },
    #[error("compile: the first argument '{operator}' is not callable")]
    NotCallable {
        operator: String,
        offset: Option<usize>,
    },
    #[error("compile: {form}'s target '{target}' should be a variable, not a {actual}")]
    TargetNotVariable {
        form: &'static str,
        target: String,
        actual: &'static str,
        offset: Option<usize>,
    },
    #[error("compile: a variadic lambda takes exactly one argument after '.'")]
    VariadicTail { offset: Option<usize> },
    #[error("compile: 'list' expects at least one argument")]
    EmptyList { offset: Option<usize> },
    #[error("compile: operand '{operand}' has undefined type")]
    UndefinedOperand {
        operand: String,
        offset: Option<usize>,
    },
    #[error("compile: 'define' value '{value}' is invalid")]
    BadDefineValue {
        value: String,
        offset: Option<usize>,
    },
    #[error("compile: cond clause must be a predicate/body list")]
    MalformedCondClause { offset: Option<usize> },
    #[error("compile: call/cc expects a lambda or a variable")]
    BadContinuationThunk { offset: Option<usize> },
    #[error("compile: 'apply' cannot take 'apply' as its operator")]
    ApplySelf { offset: Option<usize> },
    #[error("compile: internal: {0}")]
    Internal(&'static str),
    #[error("limit: {0}")]
    Limit(&'static str),
}

impl Error {
    /// Byte offset into the wrapped source, when the error carries one.
    pub fn offset(&self) -> Option<usize> {
        use Error::*;
        match self {
            UnterminatedString(o) => Some(*o),
            UndefinedToken { offset, .. }
            | MissingRParen { offset, .. }
            | MissingLParen { offset }
            | DuplicateParameter { offset, .. }
            | IllegalSymbol { offset, .. } => Some(*offset),
            ImportArity { offset }
            | ImportPath { offset }
            | NativeArity { offset }
            | WrongArgumentCount { offset, .. }
            | NotCallable { offset, .. }
            | TargetNotVariable { offset, .. }
            | VariadicTail { offset }
            | EmptyList { offset }
            | UndefinedOperand { offset, .. }
            | BadDefineValue { offset, .. }
            | MalformedCondClause { offset }
            | BadContinuationThunk { offset }
            | ApplySelf { offset } => *offset,
            Eof | Internal(_) | Limit(_) => None,
        }
    }

    /// Pipeline stage, used as the diagnostic banner title.
    pub fn stage(&self) -> &'static str {
        use Error::*;
        match self {
            UnterminatedString(_) => "Lex Error",
            Eof
            | UndefinedToken { .. }
            | MissingRParen { .. }
            | MissingLParen { .. }
            | DuplicateParameter { .. }
            | IllegalSymbol { .. } => "Parse Error",
            ImportArity { .. } | ImportPath { .. } | NativeArity { .. } => "Preprocess Error",
            Limit(_) => "Limit Error",
            _ => "Compile Error",
        }
    }
}

/// A compiled module: the IL lines plus compilation counters.
#[derive(Clone, Debug)]
pub struct Program {
    pub module: String,
    pub code: Vec<String>,
    pub metrics: CompilerMetrics,
}

impl Program {
    pub fn text(&self) -> String {
        let mut out = self.code.join("\n");
        out.push('\n');
        out
    }
}

/// Wrap raw source in the synthetic top lambda.
///
/// Every definition lives inside the top lambda's body sequence, so
/// the emitted program is `call @<top>` / `halt` followed by the
/// lambda blocks. All diagnostics offsets refer to the wrapped text.
pub fn wrap_source(src: &str) -> String {
    format!("((lambda () {src}\n))")
}

#[instrument(level = "info", skip(src))]
pub fn compile_module(module_name: &str, src: &str) -> Result<Program, Error> {
    let wrapped = wrap_source(src);

    let toks = lexer::lex(&wrapped)?;
    debug!(toks = toks.len(), "lexed");

    let ast = parser::parse(&toks, module_name, &wrapped)?;
    debug!(
        nodes = ast.len(),
        lambdas = ast.lambda_handles.len(),
        "parsed"
    );

    let (code, metrics) = lower::lower(ast)?;
    debug!(il = code.len(), "lowered");

    Ok(Program {
        module: module_name.to_string(),
        code,
        metrics,
    })
}

pub fn compile_str(src: &str) -> Result<Program, Error> {
    compile_module("main", src)
}
