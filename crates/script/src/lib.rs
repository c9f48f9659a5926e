//! Tether script sandbox -- evaluates operator-authored scripts against an
//! explicitly injected namespace.
//!
//! The language is a small indentation-structured Python subset. Scripts
//! cannot import modules or touch the filesystem, processes, or network;
//! every capability beyond pure computation is a value the caller placed
//! in the [`Namespace`] handed to [`Sandbox::execute`]. Results come back
//! through the injected `export` callable.
//!
//! Two rulesets exist. The baseline ruleset (library and task code) rejects
//! attributes starting with `_` and enforces a step budget; the elevated
//! ruleset (core code) permits single-underscore attributes and runs without
//! a budget by default.

pub mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod namespace;
mod parser;
mod sandbox;
mod validate;
mod value;

pub use builtins::{percent_format, sort_values, str_format};
pub use error::{Diagnostic, ErrorKind, ScriptError};
pub use interp::{binary_op, compare_op, contains, Interpreter, Limits, Scope};
pub use namespace::Namespace;
pub use parser::parse;
pub use sandbox::{Module, Ruleset, Sandbox, Variant, BASELINE_MAX_STEPS};
pub use value::{
    format_float, Args, BoundMethod, DictKey, ExceptionValue, Function, HostObject,
    NativeFunction, Value,
};

/// Static validation with the given variant's rules.
pub fn validate(source: &str, variant: Variant) -> Vec<Diagnostic> {
    let sandbox = match variant {
        Variant::Baseline => Sandbox::baseline(),
        Variant::Elevated => Sandbox::elevated(),
    };
    sandbox.validate(source)
}
