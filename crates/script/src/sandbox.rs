use crate::ast::Program;
use crate::error::{Diagnostic, ScriptError};
use crate::interp::{Interpreter, Limits, Scope};
use crate::namespace::Namespace;
use crate::parser::parse;
use crate::validate::{self, Rules};
use crate::value::{Args, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Default step budget for baseline scripts.
pub const BASELINE_MAX_STEPS: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Library and task code.
    Baseline,
    /// Core code, written by managers only.
    Elevated,
}

/// Static and dynamic rules for one sandbox variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ruleset {
    pub variant: Variant,
    pub allow_private_attributes: bool,
    pub limits: Limits,
}

impl Ruleset {
    pub fn baseline() -> Self {
        Ruleset {
            variant: Variant::Baseline,
            allow_private_attributes: false,
            limits: Limits {
                max_steps: Some(BASELINE_MAX_STEPS),
                max_depth: 64,
            },
        }
    }

    pub fn elevated() -> Self {
        Ruleset {
            variant: Variant::Elevated,
            allow_private_attributes: true,
            limits: Limits {
                max_steps: None,
                max_depth: 256,
            },
        }
    }

    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.limits.max_steps = max_steps;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.limits.max_depth = max_depth;
        self
    }
}

/// Result of executing a script: its exports and its module globals.
pub struct Module {
    pub exports: Namespace,
    globals: Rc<Scope>,
}

impl Module {
    /// A module-level binding, such as a task entry point.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get_local(name)
    }

    /// A module-level callable, such as a task entry point.
    pub fn function(&self, name: &str) -> Option<Value> {
        self.get(name).filter(Value::is_callable)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sandbox {
    ruleset: Ruleset,
}

impl Sandbox {
    pub fn new(ruleset: Ruleset) -> Self {
        Sandbox { ruleset }
    }

    pub fn baseline() -> Self {
        Sandbox::new(Ruleset::baseline())
    }

    pub fn elevated() -> Self {
        Sandbox::new(Ruleset::elevated())
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    fn rules(&self) -> Rules {
        Rules {
            allow_private_attributes: self.ruleset.allow_private_attributes,
        }
    }

    /// Every static problem in `source`. Never fails; an empty list means
    /// the source may be stored and evaluated.
    pub fn validate(&self, source: &str) -> Vec<Diagnostic> {
        match parse(source) {
            Ok(program) => validate::check(&program, &self.rules()),
            Err(diag) => vec![diag],
        }
    }

    /// Parse and validate, failing on the first problem.
    pub fn compile(&self, source: &str) -> Result<Program, ScriptError> {
        let program = parse(source)?;
        match validate::check(&program, &self.rules()).into_iter().next() {
            Some(diag) => Err(ScriptError::Forbidden {
                line: diag.line,
                message: diag.message,
            }),
            None => Ok(program),
        }
    }

    /// Run `source` with exec semantics against `injected`. The script sees
    /// only the injected names, the pure builtins, and `export`.
    pub fn execute(
        &self,
        interp: &mut Interpreter,
        source: &str,
        injected: &Namespace,
    ) -> Result<Module, ScriptError> {
        let program = self.compile(source)?;
        let globals = interp.module_scope();
        for (name, value) in injected.iter() {
            globals.set(name, value.clone());
        }
        let exports = Rc::new(RefCell::new(Namespace::new()));
        let sink = exports.clone();
        globals.set(
            "export",
            Value::native("export", move |_, args: Args| {
                sink.borrow_mut().add_items(args)?;
                Ok(Value::None)
            }),
        );

        let previous = interp.set_limits(self.ruleset.limits);
        let result = interp.run(&program, &globals);
        interp.set_limits(previous);
        result?;

        let exports = exports.borrow().clone();
        Ok(Module { exports, globals })
    }

    /// Run `source` and return what it exported.
    pub fn evaluate(
        &self,
        interp: &mut Interpreter,
        source: &str,
        injected: &Namespace,
    ) -> Result<Namespace, ScriptError> {
        Ok(self.execute(interp, source, injected)?.exports)
    }
}
