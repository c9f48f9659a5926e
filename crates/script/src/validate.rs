/// Static checks run before any evaluation: forbidden statements, dunder
/// names, private attributes, and misplaced control flow.
use crate::ast::*;
use crate::error::Diagnostic;

pub struct Rules {
    pub allow_private_attributes: bool,
}

pub fn check(program: &Program, rules: &Rules) -> Vec<Diagnostic> {
    let mut v = Validator {
        rules,
        out: Vec::new(),
        in_function: false,
        in_loop: false,
    };
    v.block(&program.body);
    v.out
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

struct Validator<'a> {
    rules: &'a Rules,
    out: Vec<Diagnostic>,
    in_function: bool,
    in_loop: bool,
}

impl Validator<'_> {
    fn report(&mut self, line: u32, msg: impl Into<String>) {
        self.out.push(Diagnostic::new(line, msg));
    }

    fn name(&mut self, name: &str, line: u32) {
        if is_dunder(name) {
            self.report(line, format!("use of dunder name '{}' is not allowed", name));
        }
    }

    fn attribute(&mut self, name: &str, line: u32) {
        if name.starts_with("__") {
            self.report(line, format!("access to attribute '{}' is not allowed", name));
        } else if name.starts_with('_') && !self.rules.allow_private_attributes {
            self.report(
                line,
                format!("access to private attribute '{}' is not allowed", name),
            );
        }
    }

    fn block(&mut self, block: &[Stmt]) {
        for stmt in block {
            self.stmt(stmt);
        }
    }

    fn loop_body(&mut self, body: &[Stmt]) {
        let was = std::mem::replace(&mut self.in_loop, true);
        self.block(body);
        self.in_loop = was;
    }

    fn function(&mut self, def: &FunctionDef) {
        self.name(&def.name, def.line);
        for p in &def.params {
            self.name(&p.name, def.line);
            if let Some(d) = &p.default {
                self.expr(d);
            }
        }
        let outer = (self.in_function, self.in_loop);
        self.in_function = true;
        self.in_loop = false;
        self.block(&def.body);
        (self.in_function, self.in_loop) = outer;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { target, value } => {
                self.target(target, line);
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, line);
                self.expr(value);
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    self.expr(cond);
                    self.block(body);
                }
                if let Some(body) = orelse {
                    self.block(body);
                }
            }
            StmtKind::For { target, iter, body } => {
                self.target(target, line);
                self.expr(iter);
                self.loop_body(body);
            }
            StmtKind::While { cond, body } => {
                self.expr(cond);
                self.loop_body(body);
            }
            StmtKind::Def(def) => self.function(def),
            StmtKind::Return(value) => {
                if !self.in_function {
                    self.report(line, "'return' outside function");
                }
                if let Some(e) = value {
                    self.expr(e);
                }
            }
            StmtKind::Raise(value) => {
                if let Some(e) = value {
                    self.expr(e);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                self.block(body);
                for h in handlers {
                    if let Some(c) = &h.class {
                        self.expr(c);
                    }
                    if let Some(b) = &h.binding {
                        self.name(b, h.line);
                    }
                    self.block(&h.body);
                }
                if let Some(f) = finally {
                    self.block(f);
                }
            }
            StmtKind::Break => {
                if !self.in_loop {
                    self.report(line, "'break' outside loop");
                }
            }
            StmtKind::Continue => {
                if !self.in_loop {
                    self.report(line, "'continue' not properly in loop");
                }
            }
            StmtKind::Pass => {}
            StmtKind::Import { module } => {
                self.report(line, format!("import of '{}' is not allowed", module));
            }
            StmtKind::Scope { keyword, .. } => {
                self.report(line, format!("'{}' statements are not allowed", keyword));
            }
        }
    }

    fn target(&mut self, target: &Target, line: u32) {
        match target {
            Target::Name(n) => self.name(n, line),
            Target::Tuple(items) => {
                for t in items {
                    self.target(t, line);
                }
            }
            Target::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Target::Attr { object, name } => {
                self.expr(object);
                self.attribute(name, line);
            }
        }
    }

    fn clauses(&mut self, clauses: &[CompClause], line: u32) {
        for c in clauses {
            self.target(&c.target, line);
            self.expr(&c.iter);
            for cond in &c.conds {
                self.expr(cond);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Name(n) => self.name(n, line),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for e in items {
                    self.expr(e);
                }
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    self.expr(k);
                    self.expr(v);
                }
            }
            ExprKind::Attr { object, name } => {
                self.expr(object);
                self.attribute(name, line);
            }
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            ExprKind::Slice { object, start, end } => {
                self.expr(object);
                if let Some(s) = start {
                    self.expr(s);
                }
                if let Some(e) = end {
                    self.expr(e);
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                self.expr(func);
                for a in args {
                    self.expr(a);
                }
                for (name, value) in kwargs {
                    self.name(name, line);
                    self.expr(value);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::Compare { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::And(l, r) | ExprKind::Or(l, r) => {
                self.expr(l);
                self.expr(r);
            }
            ExprKind::Not(e) => self.expr(e),
            ExprKind::IfElse { cond, then, orelse } => {
                self.expr(cond);
                self.expr(then);
                self.expr(orelse);
            }
            ExprKind::Lambda(def) => self.function(def),
            ExprKind::ListComp { elt, clauses } => {
                self.clauses(clauses, line);
                self.expr(elt);
            }
            ExprKind::DictComp {
                key,
                value,
                clauses,
            } => {
                self.clauses(clauses, line);
                self.expr(key);
                self.expr(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(src: &str, private: bool) -> Vec<Diagnostic> {
        let program = parse(src).unwrap();
        check(
            &program,
            &Rules {
                allow_private_attributes: private,
            },
        )
    }

    #[test]
    fn collects_every_problem() {
        let diags = run("import os\nx = y.__class__\nglobal z\n", true);
        let lines: Vec<u32> = diags.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn private_attributes_depend_on_rules() {
        assert_eq!(run("x = rec._name\n", false).len(), 1);
        assert!(run("x = rec._name\n", true).is_empty());
    }

    #[test]
    fn misplaced_control_flow() {
        assert_eq!(run("return 1\n", false).len(), 1);
        assert_eq!(run("break\n", false).len(), 1);
        assert!(run("def f():\n    for x in y:\n        break\n    return 1\n", false).is_empty());
    }

    #[test]
    fn dunder_names_are_rejected() {
        assert_eq!(run("x = __builtins__\n", true).len(), 1);
        assert!(run("_private = 1\n", false).is_empty());
    }
}
