//! Tree-walking interpreter.
//!
//! The interpreter owns the step counter and call depth for one job.
//! Scripts never see anything but the names placed in their module scope
//! and the pure builtins installed at construction.

use crate::ast::*;
use crate::builtins;
use crate::error::{ErrorKind, ScriptError};
use crate::value::{Args, BoundMethod, ExceptionValue, Function, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

// ──────────────────────────────────────────────
// Scopes
// ──────────────────────────────────────────────

/// A variable scope. Lookups walk up to the builtins scope; assignments
/// always bind in the innermost scope.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_owned(), value);
    }

    fn clear(&self) {
        self.vars.borrow_mut().clear();
    }
}

/// Resource limits applied while a ruleset is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_steps: Option<u64>,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_steps: None,
            max_depth: 64,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

// ──────────────────────────────────────────────
// Interpreter
// ──────────────────────────────────────────────

pub struct Interpreter {
    limits: Limits,
    steps: u64,
    depth: usize,
    handling: Vec<Rc<ExceptionValue>>,
    tracked: Vec<Rc<Scope>>,
    builtins: Rc<Scope>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new(Limits::default())
    }
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        let builtins = Scope::new(None);
        builtins::install(&builtins);
        Interpreter {
            limits,
            steps: 0,
            depth: 0,
            handling: Vec::new(),
            tracked: Vec::new(),
            builtins,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Replace the active limits, returning the previous ones.
    pub fn set_limits(&mut self, limits: Limits) -> Limits {
        std::mem::replace(&mut self.limits, limits)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Fresh module scope whose parent is the builtins.
    pub fn module_scope(&mut self) -> Rc<Scope> {
        let scope = Scope::new(Some(self.builtins.clone()));
        self.track(&scope);
        scope
    }

    fn track(&mut self, scope: &Rc<Scope>) {
        if !self.tracked.iter().any(|s| Rc::ptr_eq(s, scope)) {
            self.tracked.push(scope.clone());
        }
    }

    /// Break the reference cycles between closures and the scopes that hold
    /// them. Functions created by this interpreter stop working afterwards.
    pub fn release(&mut self) {
        for scope in self.tracked.drain(..) {
            scope.clear();
        }
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        match self.limits.max_steps {
            Some(limit) if self.steps > limit => Err(ScriptError::BudgetExceeded { limit }),
            _ => Ok(()),
        }
    }

    pub fn run(&mut self, program: &Program, scope: &Rc<Scope>) -> Result<(), ScriptError> {
        self.exec_block(&program.body, scope)?;
        Ok(())
    }

    // -- Statements ------------------------------------------------

    fn exec_block(&mut self, block: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, ScriptError> {
        for stmt in block {
            let flow = self
                .exec_stmt(stmt, scope)
                .map_err(|e| e.at_line(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, ScriptError> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::Assign { target, value } => {
                let v = self.eval(value, scope)?;
                self.assign(target, v, scope)?;
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, scope)?.truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body, scope);
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter, scope)?.iterate()?;
                for item in items {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::While { cond, body } => loop {
                self.tick()?;
                if !self.eval(cond, scope)?.truthy() {
                    break;
                }
                match self.exec_block(body, scope)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            },
            StmtKind::Def(def) => {
                let f = self.make_function(def, scope)?;
                scope.set(&def.name, f);
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref(), scope)?),
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => return self.exec_try(body, handlers, finally.as_deref(), scope),
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import { module } => {
                return Err(ScriptError::forbidden(format!(
                    "import of '{}' is not allowed",
                    module
                )))
            }
            StmtKind::Scope { keyword, .. } => {
                return Err(ScriptError::forbidden(format!(
                    "'{}' statements are not allowed",
                    keyword
                )))
            }
        }
        Ok(Flow::Normal)
    }

    /// Build the error a `raise` statement throws.
    fn raise(&mut self, value: Option<&Expr>, scope: &Rc<Scope>) -> Result<ScriptError, ScriptError> {
        let Some(expr) = value else {
            return Ok(match self.handling.last() {
                Some(exc) => ScriptError::raised(exc.kind, exc.message.clone()),
                None => ScriptError::raised(
                    ErrorKind::Exception,
                    "No active exception to reraise",
                ),
            });
        };
        Ok(match self.eval(expr, scope)? {
            Value::Exception(exc) => ScriptError::raised(exc.kind, exc.message.clone()),
            Value::ExceptionType(kind) => ScriptError::raised(kind, ""),
            other => ScriptError::type_error(format!(
                "exceptions must derive from Exception, not {}",
                other.type_name()
            )),
        }
        .at_line(expr.line))
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        finally: Option<&[Stmt]>,
        scope: &Rc<Scope>,
    ) -> Result<Flow, ScriptError> {
        let outcome = match self.exec_block(body, scope) {
            Err(err) if err.is_catchable() => self.handle(err, handlers, scope),
            other => other,
        };
        if matches!(&outcome, Err(e) if !e.is_catchable()) {
            return outcome;
        }
        if let Some(fin) = finally {
            match self.exec_block(fin, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn handle(
        &mut self,
        err: ScriptError,
        handlers: &[Handler],
        scope: &Rc<Scope>,
    ) -> Result<Flow, ScriptError> {
        let Some(kind) = err.kind() else {
            return Err(err);
        };
        for handler in handlers {
            let matched = match &handler.class {
                None => true,
                Some(expr) => {
                    let class = self.eval(expr, scope)?;
                    exception_matches(kind, &class).map_err(|e| e.at_line(handler.line))?
                }
            };
            if !matched {
                continue;
            }
            let exc = Rc::new(ExceptionValue {
                kind,
                message: err.message(),
            });
            if let Some(name) = &handler.binding {
                scope.set(name, Value::Exception(exc.clone()));
            }
            self.handling.push(exc);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            return result;
        }
        Err(err)
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Result<Value, ScriptError> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for p in &def.params {
            defaults.push(match &p.default {
                Some(e) => Some(self.eval(e, scope)?),
                None => None,
            });
        }
        self.track(scope);
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            scope: scope.clone(),
        })))
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                scope.set(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() < targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v, scope)?;
                }
                Ok(())
            }
            Target::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let idx = self.eval(index, scope)?;
                self.set_item(&obj, idx, value)
            }
            Target::Attr { object, name } => {
                let obj = self.eval(object, scope)?;
                self.set_attr(&obj, name, value)
            }
        }
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                let current = scope.lookup(name).ok_or_else(|| name_error(name))?;
                let rhs = self.eval(value, scope)?;
                let result = self.in_place(op, current, rhs)?;
                scope.set(name, result);
            }
            Target::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let idx = self.eval(index, scope)?;
                let current = self.get_item(&obj, &idx)?;
                let rhs = self.eval(value, scope)?;
                let result = self.in_place(op, current, rhs)?;
                self.set_item(&obj, idx, result)?;
            }
            Target::Attr { object, name } => {
                let obj = self.eval(object, scope)?;
                let current = self.get_attr(&obj, name)?;
                let rhs = self.eval(value, scope)?;
                let result = self.in_place(op, current, rhs)?;
                self.set_attr(&obj, name, result)?;
            }
            Target::Tuple(_) => {
                return Err(ScriptError::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn in_place(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value, ScriptError> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let items = rhs.iterate()?;
            list.borrow_mut().extend(items);
            return Ok(current);
        }
        binary_op(op, &current, &rhs)
    }

    // -- Expressions -----------------------------------------------

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, ScriptError> {
        self.eval_inner(expr, scope).map_err(|e| e.at_line(expr.line))
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, ScriptError> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::str(s),
            }),
            ExprKind::Name(name) => scope.lookup(name).ok_or_else(|| name_error(name)),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, scope)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, scope)?)),
            ExprKind::Dict(pairs) => {
                let mut map = IndexMap::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k, scope)?.to_key()?;
                    let value = self.eval(v, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Attr { object, name } => {
                let obj = self.eval(object, scope)?;
                self.get_attr(&obj, name)
            }
            ExprKind::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let idx = self.eval(index, scope)?;
                self.get_item(&obj, &idx)
            }
            ExprKind::Slice { object, start, end } => {
                let obj = self.eval(object, scope)?;
                let start = match start {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                let end = match end {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                slice(&obj, &start, &end)
            }
            ExprKind::Call { func, args, kwargs } => {
                let f = self.eval(func, scope)?;
                let positional = self.eval_all(args, scope)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    keywords.push((name.clone(), self.eval(e, scope)?));
                }
                self.call(
                    &f,
                    Args {
                        positional,
                        keywords,
                    },
                )
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand, scope)?;
                match (op, &v) {
                    (UnaryOp::Neg, Value::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(overflow),
                    (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
                    (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
                    _ => Err(ScriptError::type_error(format!(
                        "bad operand type for unary {}: '{}'",
                        if *op == UnaryOp::Neg { "-" } else { "+" },
                        v.type_name()
                    ))),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                binary_op(*op, &l, &r)
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                compare_op(*op, &l, &r).map(Value::Bool)
            }
            ExprKind::And(l, r) => {
                let left = self.eval(l, scope)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(r, scope)
            }
            ExprKind::Or(l, r) => {
                let left = self.eval(l, scope)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(r, scope)
            }
            ExprKind::Not(e) => Ok(Value::Bool(!self.eval(e, scope)?.truthy())),
            ExprKind::IfElse { cond, then, orelse } => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, scope),
            ExprKind::ListComp { elt, clauses } => {
                let inner = Scope::new(Some(scope.clone()));
                let mut out = Vec::new();
                self.comprehend(clauses, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    out.push(interp.eval(elt, s)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp {
                key,
                value,
                clauses,
            } => {
                let inner = Scope::new(Some(scope.clone()));
                let mut out = IndexMap::new();
                self.comprehend(clauses, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    let k = interp.eval(key, s)?.to_key()?;
                    let v = interp.eval(value, s)?;
                    out.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, ScriptError> {
        items.iter().map(|e| self.eval(e, scope)).collect()
    }

    fn comprehend(
        &mut self,
        clauses: &[CompClause],
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Interpreter, &Rc<Scope>) -> Result<(), ScriptError>,
    ) -> Result<(), ScriptError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self, scope);
        };
        let items = self.eval(&clause.iter, scope)?.iterate()?;
        'items: for item in items {
            self.tick()?;
            self.assign(&clause.target, item, scope)?;
            for cond in &clause.conds {
                if !self.eval(cond, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, scope, emit)?;
        }
        Ok(())
    }

    // -- Calls -----------------------------------------------------

    /// Call any callable value. Host code uses this to invoke script
    /// callbacks.
    pub fn call(&mut self, f: &Value, args: Args) -> Result<Value, ScriptError> {
        match f {
            Value::Function(func) => self.call_function(func, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Method(m) => match &m.receiver {
                Value::Host(h) => {
                    let h = h.clone();
                    h.call_method(self, &m.name, args)
                }
                receiver => builtins::call_method(self, receiver, &m.name, args),
            },
            Value::ExceptionType(kind) => {
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [one] => one.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::exception(*kind, message))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Args) -> Result<Value, ScriptError> {
        self.tick()?;
        if self.depth >= self.limits.max_depth {
            return Err(ScriptError::raised(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let def = &func.def;
        let local = Scope::new(Some(func.scope.clone()));
        let params = &def.params;
        if args.positional.len() > params.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                args.positional.len()
            )));
        }
        let mut slots = vec![None; params.len()];
        for (slot, v) in slots.iter_mut().zip(args.positional) {
            *slot = Some(v);
        }
        for (name, v) in args.keywords {
            let Some(i) = params.iter().position(|p| p.name == name) else {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            };
            if slots[i].is_some() {
                return Err(ScriptError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            slots[i] = Some(v);
        }
        for (i, p) in params.iter().enumerate() {
            let value = match slots[i].take().or_else(|| func.defaults[i].clone()) {
                Some(v) => v,
                None => {
                    return Err(ScriptError::type_error(format!(
                        "{}() missing required positional argument: '{}'",
                        def.name, p.name
                    )))
                }
            };
            local.set(&p.name, value);
        }

        self.depth += 1;
        let result = self.exec_block(&def.body, &local);
        self.depth -= 1;
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    // -- Attributes and items --------------------------------------

    pub fn get_attr(&mut self, obj: &Value, name: &str) -> Result<Value, ScriptError> {
        if name.starts_with("__") {
            return Err(ScriptError::forbidden(format!(
                "access to attribute '{}' is not allowed",
                name
            )));
        }
        match obj {
            Value::Host(h) => {
                if let Some(v) = h.get_attr(name)? {
                    return Ok(v);
                }
                if h.has_method(name) {
                    return Ok(bound(obj, name));
                }
                Err(no_attribute(obj, name))
            }
            Value::Exception(exc) if name == "args" => {
                Ok(Value::tuple(vec![Value::str(&exc.message)]))
            }
            _ if builtins::has_method(obj, name) => Ok(bound(obj, name)),
            _ => Err(no_attribute(obj, name)),
        }
    }

    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> Result<(), ScriptError> {
        if name.starts_with("__") {
            return Err(ScriptError::forbidden(format!(
                "access to attribute '{}' is not allowed",
                name
            )));
        }
        match obj {
            Value::Host(h) => h.set_attr(name, value),
            other => Err(ScriptError::raised(
                ErrorKind::AttributeError,
                format!(
                    "'{}' object has no attribute '{}' to assign",
                    other.type_name(),
                    name
                ),
            )),
        }
    }

    pub fn get_item(&mut self, obj: &Value, idx: &Value) -> Result<Value, ScriptError> {
        match obj {
            Value::List(l) => {
                let l = l.borrow();
                let i = seq_index(idx, l.len(), "list")?;
                Ok(l[i].clone())
            }
            Value::Tuple(t) => {
                let i = seq_index(idx, t.len(), "tuple")?;
                Ok(t[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = seq_index(idx, chars.len(), "string")?;
                Ok(Value::str(chars[i].to_string()))
            }
            Value::Bytes(b) => {
                let i = seq_index(idx, b.len(), "bytes")?;
                Ok(Value::Int(i64::from(b[i])))
            }
            Value::Dict(d) => {
                let key = idx.to_key()?;
                d.borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ScriptError::raised(ErrorKind::KeyError, idx.repr()))
            }
            Value::Host(h) => h.get_item(idx),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub fn set_item(&mut self, obj: &Value, idx: Value, value: Value) -> Result<(), ScriptError> {
        match obj {
            Value::List(l) => {
                let mut l = l.borrow_mut();
                let i = seq_index(&idx, l.len(), "list")?;
                l[i] = value;
                Ok(())
            }
            Value::Dict(d) => {
                let key = idx.to_key()?;
                d.borrow_mut().insert(key, value);
                Ok(())
            }
            Value::Host(h) => h.set_item(idx, value),
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }
}

fn bound(obj: &Value, name: &str) -> Value {
    Value::Method(Rc::new(BoundMethod {
        receiver: obj.clone(),
        name: name.to_owned(),
    }))
}

fn name_error(name: &str) -> ScriptError {
    ScriptError::raised(
        ErrorKind::NameError,
        format!("name '{}' is not defined", name),
    )
}

fn no_attribute(obj: &Value, name: &str) -> ScriptError {
    ScriptError::raised(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", obj.type_name(), name),
    )
}

fn exception_matches(kind: ErrorKind, class: &Value) -> Result<bool, ScriptError> {
    match class {
        Value::ExceptionType(parent) => Ok(kind.is_subclass_of(*parent)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(kind, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ScriptError::type_error(
            "catching classes that do not inherit from Exception is not allowed",
        )),
    }
}

/// Resolve a possibly negative index against a sequence length.
fn seq_index(idx: &Value, len: usize, what: &str) -> Result<usize, ScriptError> {
    let Some(i) = idx.as_int() else {
        return Err(ScriptError::type_error(format!(
            "{} indices must be integers, not {}",
            what,
            idx.type_name()
        )));
    };
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::raised(
            ErrorKind::IndexError,
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

fn slice_bounds(start: &Value, end: &Value, len: usize) -> Result<(usize, usize), ScriptError> {
    let len = len as i64;
    let clamp = |v: &Value, default: i64| -> Result<i64, ScriptError> {
        match v {
            Value::None => Ok(default),
            other => {
                let i = other.as_int().ok_or_else(|| {
                    ScriptError::type_error("slice indices must be integers or None")
                })?;
                let i = if i < 0 { i + len } else { i };
                Ok(i.clamp(0, len))
            }
        }
    };
    let s = clamp(start, 0)?;
    let e = clamp(end, len)?;
    Ok((s as usize, e.max(s) as usize))
}

fn slice(obj: &Value, start: &Value, end: &Value) -> Result<Value, ScriptError> {
    match obj {
        Value::List(l) => {
            let l = l.borrow();
            let (s, e) = slice_bounds(start, end, l.len())?;
            Ok(Value::list(l[s..e].to_vec()))
        }
        Value::Tuple(t) => {
            let (s, e) = slice_bounds(start, end, t.len())?;
            Ok(Value::tuple(t[s..e].to_vec()))
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(start, end, chars.len())?;
            Ok(Value::str(chars[s..e].iter().collect::<String>()))
        }
        Value::Bytes(b) => {
            let (s, e) = slice_bounds(start, end, b.len())?;
            Ok(Value::bytes(&b[s..e]))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ──────────────────────────────────────────────
// Operators
// ──────────────────────────────────────────────

fn unsupported(op: &str, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> ScriptError {
    ScriptError::overflow_error("integer overflow")
}

fn is_int_like(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

/// `items * n`, refusing results longer than [`builtins::MAX_SEQUENCE`].
fn repeat(items: &[Value], n: i64) -> Result<Vec<Value>, ScriptError> {
    let n = usize::try_from(n.max(0)).map_err(|_| overflow())?;
    let len = builtins::sequence_len(items.len().checked_mul(n), "repeated sequence")?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn repeat_str(s: &str, n: i64) -> Result<String, ScriptError> {
    let n = usize::try_from(n.max(0)).map_err(|_| overflow())?;
    builtins::sequence_len(s.len().checked_mul(n), "repeated string")?;
    Ok(s.repeat(n))
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> Result<Value, ScriptError> {
    let sym = op.symbol();
    if is_int_like(a) && is_int_like(b) {
        let (x, y) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
        return match op {
            BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if y == 0 {
                    return Err(zero_division("division by zero"));
                }
                Ok(Value::Float(x as f64 / y as f64))
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                Ok(Value::Int(if x % y != 0 && ((x < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }))
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
            }
            BinOp::Pow => {
                if y < 0 {
                    return Ok(Value::Float((x as f64).powf(y as f64)));
                }
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
            }
        };
    }
    if let (Some(x), Some(y), true) = (
        a.as_float(),
        b.as_float(),
        matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)),
    ) {
        return match op {
            BinOp::Add => Ok(Value::Float(x + y)),
            BinOp::Sub => Ok(Value::Float(x - y)),
            BinOp::Mul => Ok(Value::Float(x * y)),
            BinOp::Div => {
                if y == 0.0 {
                    return Err(zero_division("float division by zero"));
                }
                Ok(Value::Float(x / y))
            }
            BinOp::FloorDiv => {
                if y == 0.0 {
                    return Err(zero_division("float floor division by zero"));
                }
                Ok(Value::Float((x / y).floor()))
            }
            BinOp::Mod => {
                if y == 0.0 {
                    return Err(zero_division("float modulo"));
                }
                let r = x % y;
                Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                    r + y
                } else {
                    r
                }))
            }
            BinOp::Pow => Ok(Value::Float(x.powf(y))),
        };
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            builtins::sequence_len(x.len().checked_add(y.len()), "concatenated string")?;
            Ok(Value::str(format!("{}{}", x, y)))
        }
        (BinOp::Add, Value::Bytes(x), Value::Bytes(y)) => {
            builtins::sequence_len(x.len().checked_add(y.len()), "concatenated bytes")?;
            Ok(Value::bytes([x.as_ref(), y.as_ref()].concat()))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            builtins::sequence_len(items.len().checked_add(y.borrow().len()), "concatenated list")?;
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            builtins::sequence_len(x.len().checked_add(y.len()), "concatenated tuple")?;
            Ok(Value::tuple([x.as_ref(), y.as_ref()].concat()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if is_int_like(n) => {
            repeat_str(s, n.as_int().unwrap_or(0)).map(Value::str)
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if is_int_like(n) => {
            repeat(&l.borrow(), n.as_int().unwrap_or(0)).map(Value::list)
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if is_int_like(n) => {
            repeat(t, n.as_int().unwrap_or(0)).map(Value::tuple)
        }
        (BinOp::Mod, Value::Str(fmt), args) => {
            builtins::percent_format(fmt, args).map(Value::str)
        }
        _ => Err(unsupported(sym, a, b)),
    }
}

fn zero_division(msg: &str) -> ScriptError {
    ScriptError::raised(ErrorKind::ZeroDivisionError, msg)
}

pub fn compare_op(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    use std::cmp::Ordering::*;
    Ok(match op {
        CmpOp::Eq => a.py_eq(b),
        CmpOp::Neq => !a.py_eq(b),
        CmpOp::Lt => a.compare(b)? == Less,
        CmpOp::Lte => a.compare(b)? != Greater,
        CmpOp::Gt => a.compare(b)? == Greater,
        CmpOp::Gte => a.compare(b)? != Less,
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => a.is_same(b),
        CmpOp::IsNot => !a.is_same(b),
    })
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(l) => Ok(l.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(t) => Ok(t.iter().any(|v| v.py_eq(item))),
        Value::Dict(d) => match item.to_key() {
            Ok(key) => Ok(d.borrow().contains_key(&key)),
            Err(_) => Ok(false),
        },
        Value::Host(h) => h.contains(item),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_follow_python() {
        assert!(binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2))
            .unwrap()
            .py_eq(&Value::Int(-4)));
        assert!(binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2))
            .unwrap()
            .py_eq(&Value::Int(1)));
        assert!(binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2))
            .unwrap()
            .py_eq(&Value::Float(3.5)));
    }

    #[test]
    fn division_by_zero_is_catchable() {
        let err = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ZeroDivisionError));
    }

    #[test]
    fn slices_clamp() {
        let v = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let s = slice(&v, &Value::Int(-2), &Value::None).unwrap();
        assert_eq!(s.repr(), "[2, 3]");
        let s = slice(&Value::str("hello"), &Value::Int(1), &Value::Int(99)).unwrap();
        assert_eq!(s.to_str(), "ello");
    }

    #[test]
    fn membership() {
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::str("hello"), &Value::Int(1)).is_err());
    }
}
