/// Recursive-descent parser from the token stream to the syntax tree.
/// Reports the first problem it meets as a `Diagnostic`.
use crate::ast::*;
use crate::error::Diagnostic;
use crate::lexer::{lex, Spanned, Token};
use std::rc::Rc;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Keywords the language deliberately leaves out.
const UNSUPPORTED: &[&str] = &[
    "assert", "async", "await", "class", "del", "with", "yield",
];

pub fn parse(src: &str) -> Result<Program, Diagnostic> {
    let tokens = lex(src)?;
    let mut p = Parser::new(&tokens);
    let mut body = Vec::new();
    while p.peek() != &Token::Eof {
        if p.peek() == &Token::Newline {
            p.advance();
            continue;
        }
        p.statement(&mut body)?;
    }
    Ok(Program { body })
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].token
    }

    fn cur_line(&self) -> u32 {
        self.cur().line
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> Diagnostic {
        Diagnostic::new(self.cur_line(), msg)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, w: &str) -> bool {
        if self.is_word(w) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token, shown: &str) -> Result<(), Diagnostic> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {}", shown, describe(self.peek()))))
        }
    }

    fn expect_word(&mut self, w: &str) -> Result<(), Diagnostic> {
        if self.eat_word(w) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {}", w, describe(self.peek()))))
        }
    }

    fn take_name(&mut self) -> Result<String, Diagnostic> {
        match self.peek().clone() {
            Token::Word(w) if !KEYWORDS.contains(&w.as_str()) => {
                self.advance();
                Ok(w)
            }
            other => Err(self.err(format!("expected identifier, got {}", describe(&other)))),
        }
    }

    // -- Statements ------------------------------------------------

    fn statement(&mut self, out: &mut Block) -> Result<(), Diagnostic> {
        let line = self.cur_line();
        if let Token::Word(w) = self.peek().clone() {
            match w.as_str() {
                "if" => return self.if_stmt(line).map(|s| out.push(s)),
                "for" => return self.for_stmt(line).map(|s| out.push(s)),
                "while" => return self.while_stmt(line).map(|s| out.push(s)),
                "def" => return self.def_stmt(line).map(|s| out.push(s)),
                "try" => return self.try_stmt(line).map(|s| out.push(s)),
                "elif" | "else" | "except" | "finally" => {
                    return Err(self.err(format!("'{}' without a matching block", w)))
                }
                _ => {}
            }
        }
        self.simple_statements(out)
    }

    /// `small (';' small)* NEWLINE`
    fn simple_statements(&mut self, out: &mut Block) -> Result<(), Diagnostic> {
        loop {
            out.push(self.small_statement()?);
            if self.eat(&Token::Semicolon) {
                if matches!(self.peek(), Token::Newline | Token::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Eof | Token::Dedent => Ok(()),
            other => Err(self.err(format!("invalid syntax near {}", describe(other)))),
        }
    }

    fn small_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.cur_line();
        let kind = match self.peek().clone() {
            Token::Word(w) => match w.as_str() {
                "pass" => {
                    self.advance();
                    StmtKind::Pass
                }
                "break" => {
                    self.advance();
                    StmtKind::Break
                }
                "continue" => {
                    self.advance();
                    StmtKind::Continue
                }
                "return" => {
                    self.advance();
                    if self.at_statement_end() {
                        StmtKind::Return(None)
                    } else {
                        StmtKind::Return(Some(self.expr_list()?))
                    }
                }
                "raise" => {
                    self.advance();
                    if self.at_statement_end() {
                        StmtKind::Raise(None)
                    } else {
                        StmtKind::Raise(Some(self.test()?))
                    }
                }
                "import" | "from" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    self.skip_to_statement_end();
                    StmtKind::Import { module }
                }
                "global" | "nonlocal" => {
                    self.advance();
                    let mut names = vec![self.take_name()?];
                    while self.eat(&Token::Comma) {
                        names.push(self.take_name()?);
                    }
                    StmtKind::Scope { keyword: w, names }
                }
                kw if UNSUPPORTED.contains(&kw) => {
                    return Err(self.err(format!("'{}' is not supported", kw)))
                }
                _ => self.expression_statement()?,
            },
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, Diagnostic> {
        let first = self.expr_list()?;
        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            _ => return Ok(StmtKind::Expr(first)),
        };
        self.advance();
        let target = to_target(first)?;
        if let Some(op) = op {
            if matches!(target, Target::Tuple(_)) {
                return Err(self.err("illegal expression for augmented assignment"));
            }
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }
        let value = self.expr_list()?;
        if self.peek() == &Token::Assign {
            return Err(self.err("chained assignment is not supported"));
        }
        Ok(StmtKind::Assign { target, value })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Newline | Token::Semicolon | Token::Eof | Token::Dedent
        )
    }

    fn skip_to_statement_end(&mut self) {
        while !self.at_statement_end() {
            self.advance();
        }
    }

    fn dotted_name(&mut self) -> Result<String, Diagnostic> {
        let mut name = match self.peek().clone() {
            Token::Word(w) => {
                self.advance();
                w
            }
            Token::Dot => String::new(),
            other => return Err(self.err(format!("expected module name, got {}", describe(&other)))),
        };
        while self.eat(&Token::Dot) {
            name.push('.');
            if let Token::Word(w) = self.peek().clone() {
                self.advance();
                name.push_str(&w);
            }
        }
        Ok(name)
    }

    /// `':' (simple_statements | NEWLINE INDENT statement+ DEDENT)`
    fn block(&mut self) -> Result<Block, Diagnostic> {
        self.expect(Token::Colon, ":")?;
        let mut body = Vec::new();
        if !self.eat(&Token::Newline) {
            self.simple_statements(&mut body)?;
            return Ok(body);
        }
        if !self.eat(&Token::Indent) {
            return Err(self.err("expected an indented block"));
        }
        while !matches!(self.peek(), Token::Dedent | Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            self.statement(&mut body)?;
        }
        self.eat(&Token::Dedent);
        Ok(body)
    }

    fn if_stmt(&mut self, line: u32) -> Result<Stmt, Diagnostic> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.test()?;
        branches.push((cond, self.block()?));
        let mut orelse = None;
        loop {
            if self.eat_word("elif") {
                let cond = self.test()?;
                branches.push((cond, self.block()?));
            } else if self.eat_word("else") {
                orelse = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_stmt(&mut self, line: u32) -> Result<Stmt, Diagnostic> {
        self.advance();
        let target = self.for_target()?;
        self.expect_word("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        if self.is_word("else") {
            return Err(self.err("'for ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn while_stmt(&mut self, line: u32) -> Result<Stmt, Diagnostic> {
        self.advance();
        let cond = self.test()?;
        let body = self.block()?;
        if self.is_word("else") {
            return Err(self.err("'while ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            line,
        })
    }

    fn def_stmt(&mut self, line: u32) -> Result<Stmt, Diagnostic> {
        self.advance();
        let name = self.take_name()?;
        self.expect(Token::LParen, "(")?;
        let params = self.params(&Token::RParen)?;
        self.expect(Token::RParen, ")")?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::Def(Rc::new(FunctionDef {
                name,
                params,
                body,
                line,
            })),
            line,
        })
    }

    fn params(&mut self, close: &Token) -> Result<Vec<Param>, Diagnostic> {
        let mut params: Vec<Param> = Vec::new();
        while self.peek() != close {
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(self.err("*args and **kwargs parameters are not supported"));
            }
            let name = self.take_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.err(format!("duplicate argument '{}'", name)));
            }
            let default = if self.eat(&Token::Assign) {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.err("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param { name, default });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn try_stmt(&mut self, line: u32) -> Result<Stmt, Diagnostic> {
        self.advance();
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.is_word("except") {
            let hline = self.cur_line();
            self.advance();
            let mut class = None;
            let mut binding = None;
            if self.peek() != &Token::Colon {
                class = Some(self.test()?);
                if self.eat_word("as") {
                    binding = Some(self.take_name()?);
                }
            }
            let hbody = self.block()?;
            handlers.push(Handler {
                class,
                binding,
                body: hbody,
                line: hline,
            });
        }
        if self.is_word("else") {
            return Err(self.err("'try ... else' is not supported"));
        }
        let finally = if self.eat_word("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handlers.is_empty() && finally.is_none() {
            return Err(self.err("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                finally,
            },
            line,
        })
    }

    /// Targets of `for` and comprehension clauses: stop before `in`.
    fn for_target(&mut self) -> Result<Target, Diagnostic> {
        let line = self.cur_line();
        let first = self.postfix()?;
        if self.peek() != &Token::Comma {
            return to_target(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.is_word("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        to_target(Expr::new(ExprKind::Tuple(items), line))
    }

    // -- Expressions -----------------------------------------------

    /// `test (',' test)* [',']`, building a tuple when a comma appears.
    fn expr_list(&mut self) -> Result<Expr, Diagnostic> {
        let line = self.cur_line();
        let first = self.test()?;
        if self.peek() != &Token::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.at_expr_list_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn at_expr_list_end(&self) -> bool {
        self.at_statement_end()
            || matches!(
                self.peek(),
                Token::Assign
                    | Token::PlusAssign
                    | Token::MinusAssign
                    | Token::StarAssign
                    | Token::SlashAssign
                    | Token::Colon
                    | Token::RParen
            )
    }

    fn test(&mut self) -> Result<Expr, Diagnostic> {
        if self.is_word("lambda") {
            return self.lambda();
        }
        let line = self.cur_line();
        let body = self.or_test()?;
        if self.eat_word("if") {
            let cond = self.or_test()?;
            self.expect_word("else")?;
            let orelse = self.test()?;
            return Ok(Expr::new(
                ExprKind::IfElse {
                    cond: Box::new(cond),
                    then: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, Diagnostic> {
        let line = self.cur_line();
        self.advance();
        let params = self.params(&Token::Colon)?;
        self.expect(Token::Colon, ":")?;
        let body_line = self.cur_line();
        let value = self.test()?;
        let def = FunctionDef {
            name: "<lambda>".to_owned(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(value)),
                line: body_line,
            }],
            line,
        };
        Ok(Expr::new(ExprKind::Lambda(Rc::new(def)), line))
    }

    fn or_test(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.and_test()?;
        while self.is_word("or") {
            let line = self.cur_line();
            self.advance();
            let right = self.and_test()?;
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.not_test()?;
        while self.is_word("and") {
            let line = self.cur_line();
            self.advance();
            let right = self.not_test()?;
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, Diagnostic> {
        if self.is_word("not") {
            let line = self.cur_line();
            self.advance();
            let operand = self.not_test()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), line));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek().clone() {
            Token::Eq => CmpOp::Eq,
            Token::Neq => CmpOp::Neq,
            Token::Lt => CmpOp::Lt,
            Token::Lte => CmpOp::Lte,
            Token::Gt => CmpOp::Gt,
            Token::Gte => CmpOp::Gte,
            Token::Word(w) if w == "in" => CmpOp::In,
            Token::Word(w) if w == "is" => {
                if matches!(self.peek_at(1), Token::Word(n) if n == "not") {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            Token::Word(w)
                if w == "not" && matches!(self.peek_at(1), Token::Word(n) if n == "in") =>
            {
                self.advance();
                CmpOp::NotIn
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    /// Chained comparisons `a < b < c` become `a < b and b < c`.
    fn comparison(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.arith()?;
        let mut result: Option<Expr> = None;
        let mut left = first.clone();
        loop {
            let line = self.cur_line();
            let Some(op) = self.compare_op() else { break };
            let right = self.arith()?;
            let cmp = Expr::new(
                ExprKind::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right.clone()),
                },
                line,
            );
            result = Some(match result {
                None => cmp,
                Some(prev) => Expr::new(ExprKind::And(Box::new(prev), Box::new(cmp)), line),
            });
            left = right;
        }
        Ok(result.unwrap_or(first))
    }

    fn arith(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, Diagnostic> {
        let line = self.cur_line();
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.factor()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    fn power(&mut self) -> Result<Expr, Diagnostic> {
        let base = self.postfix()?;
        if self.peek() == &Token::DoubleStar {
            let line = self.cur_line();
            self.advance();
            let exp = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exp, line));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.atom()?;
        loop {
            let line = self.cur_line();
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_args()?;
                    self.expect(Token::RParen, ")")?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            kwargs,
                        },
                        line,
                    );
                }
                Token::LBracket => {
                    self.advance();
                    expr = self.subscript(expr, line)?;
                    self.expect(Token::RBracket, "]")?;
                }
                Token::Dot => {
                    self.advance();
                    let name = match self.peek().clone() {
                        Token::Word(w) => {
                            self.advance();
                            w
                        }
                        other => {
                            return Err(self.err(format!(
                                "expected attribute name, got {}",
                                describe(&other)
                            )))
                        }
                    };
                    expr = Expr::new(
                        ExprKind::Attr {
                            object: Box::new(expr),
                            name,
                        },
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn subscript(&mut self, object: Expr, line: u32) -> Result<Expr, Diagnostic> {
        let start = if self.peek() == &Token::Colon {
            None
        } else {
            let index = self.test()?;
            if self.peek() != &Token::Colon {
                return Ok(Expr::new(
                    ExprKind::Index {
                        object: Box::new(object),
                        index: Box::new(index),
                    },
                    line,
                ));
            }
            Some(Box::new(index))
        };
        self.expect(Token::Colon, ":")?;
        let end = if self.peek() == &Token::RBracket {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        if self.peek() == &Token::Colon {
            return Err(self.err("slice steps are not supported"));
        }
        Ok(Expr::new(
            ExprKind::Slice {
                object: Box::new(object),
                start,
                end,
            },
            line,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), Diagnostic> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while self.peek() != &Token::RParen {
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(self.err("argument unpacking is not supported"));
            }
            let is_keyword =
                matches!(self.peek(), Token::Word(_)) && self.peek_at(1) == &Token::Assign;
            if is_keyword {
                let name = self.take_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.err(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.err("positional argument follows keyword argument"));
                }
                let line = self.cur_line();
                let arg = self.test()?;
                if self.is_word("for") {
                    // A lone generator argument: `any(x for x in xs)`.
                    let clauses = self.comp_clauses()?;
                    args.push(Expr::new(
                        ExprKind::ListComp {
                            elt: Box::new(arg),
                            clauses,
                        },
                        line,
                    ));
                } else {
                    args.push(arg);
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn comp_clauses(&mut self) -> Result<Vec<CompClause>, Diagnostic> {
        let mut clauses = Vec::new();
        while self.eat_word("for") {
            let target = self.for_target()?;
            self.expect_word("in")?;
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_word("if") {
                conds.push(self.or_test()?);
            }
            clauses.push(CompClause {
                target,
                iter,
                conds,
            });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, Diagnostic> {
        let line = self.cur_line();
        let tok = self.peek().clone();
        match tok {
            Token::Int(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Int(n)), line))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Float(f)), line))
            }
            Token::Str(s) => {
                self.advance();
                let mut s = s;
                // Adjacent literals concatenate.
                while let Token::Str(more) = self.peek().clone() {
                    self.advance();
                    s.push_str(&more);
                }
                Ok(Expr::new(ExprKind::Literal(Literal::Str(s)), line))
            }
            Token::Word(w) => match w.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Literal(Literal::None), line))
                }
                "True" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), line))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Literal(Literal::Bool(false)), line))
                }
                kw if UNSUPPORTED.contains(&kw) => {
                    Err(self.err(format!("'{}' is not supported", kw)))
                }
                kw if KEYWORDS.contains(&kw) => {
                    Err(self.err(format!("invalid syntax near '{}'", kw)))
                }
                _ => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Name(w), line))
                }
            },
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
                }
                let first = self.test()?;
                if self.is_word("for") {
                    let clauses = self.comp_clauses()?;
                    self.expect(Token::RParen, ")")?;
                    return Ok(Expr::new(
                        ExprKind::ListComp {
                            elt: Box::new(first),
                            clauses,
                        },
                        line,
                    ));
                }
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == &Token::RParen {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect(Token::RParen, ")")?;
                Ok(Expr::new(ExprKind::Tuple(items), line))
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != &Token::RBracket {
                    let first = self.test()?;
                    if self.is_word("for") {
                        let clauses = self.comp_clauses()?;
                        self.expect(Token::RBracket, "]")?;
                        return Ok(Expr::new(
                            ExprKind::ListComp {
                                elt: Box::new(first),
                                clauses,
                            },
                            line,
                        ));
                    }
                    items.push(first);
                    while self.eat(&Token::Comma) {
                        if self.peek() == &Token::RBracket {
                            break;
                        }
                        items.push(self.test()?);
                    }
                }
                self.expect(Token::RBracket, "]")?;
                Ok(Expr::new(ExprKind::List(items), line))
            }
            Token::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if self.peek() != &Token::RBrace {
                    let key = self.test()?;
                    if self.peek() != &Token::Colon {
                        return Err(self.err("set literals are not supported"));
                    }
                    self.advance();
                    let value = self.test()?;
                    if self.is_word("for") {
                        let clauses = self.comp_clauses()?;
                        self.expect(Token::RBrace, "}")?;
                        return Ok(Expr::new(
                            ExprKind::DictComp {
                                key: Box::new(key),
                                value: Box::new(value),
                                clauses,
                            },
                            line,
                        ));
                    }
                    pairs.push((key, value));
                    while self.eat(&Token::Comma) {
                        if self.peek() == &Token::RBrace {
                            break;
                        }
                        let key = self.test()?;
                        self.expect(Token::Colon, ":")?;
                        let value = self.test()?;
                        pairs.push((key, value));
                    }
                }
                self.expect(Token::RBrace, "}")?;
                Ok(Expr::new(ExprKind::Dict(pairs), line))
            }
            other => Err(self.err(format!("invalid syntax near {}", describe(&other)))),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr, line: u32) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    )
}

fn to_target(expr: Expr) -> Result<Target, Diagnostic> {
    let line = expr.line;
    match expr.kind {
        ExprKind::Name(n) => Ok(Target::Name(n)),
        ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(to_target)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        ExprKind::Index { object, index } => Ok(Target::Index {
            object: *object,
            index: *index,
        }),
        ExprKind::Attr { object, name } => Ok(Target::Attr {
            object: *object,
            name,
        }),
        _ => Err(Diagnostic::new(line, "cannot assign to expression")),
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Word(w) => format!("'{}'", w),
        Token::Str(_) => "string literal".to_owned(),
        Token::Int(n) => format!("'{}'", n),
        Token::Float(f) => format!("'{}'", f),
        Token::Newline => "end of line".to_owned(),
        Token::Indent => "unexpected indent".to_owned(),
        Token::Dedent => "unexpected dedent".to_owned(),
        Token::Eof => "end of input".to_owned(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_with_defaults() {
        let prog = parse("def f(a, b=2):\n    return a + b\n").unwrap();
        let StmtKind::Def(def) = &prog.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
    }

    #[test]
    fn parses_tuple_assignment_and_slices() {
        let prog = parse("a, b = xs[1:], xs[:2]\n").unwrap();
        let StmtKind::Assign { target, value } = &prog.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target, Target::Tuple(t) if t.len() == 2));
        assert!(matches!(&value.kind, ExprKind::Tuple(v) if v.len() == 2));
    }

    #[test]
    fn parses_try_except_finally() {
        let src = "try:\n    x()\nexcept UserError as e:\n    pass\nfinally:\n    y()\n";
        let prog = parse(src).unwrap();
        let StmtKind::Try {
            handlers, finally, ..
        } = &prog.body[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(handlers[0].binding.as_deref(), Some("e"));
        assert_eq!(handlers[0].line, 3);
        assert!(finally.is_some());
    }

    #[test]
    fn not_in_and_is_not() {
        let prog = parse("x = a not in b\ny = a is not None\n").unwrap();
        let StmtKind::Assign { value, .. } = &prog.body[0].kind else {
            panic!()
        };
        assert!(matches!(
            value.kind,
            ExprKind::Compare {
                op: CmpOp::NotIn,
                ..
            }
        ));
        let StmtKind::Assign { value, .. } = &prog.body[1].kind else {
            panic!()
        };
        assert!(matches!(
            value.kind,
            ExprKind::Compare {
                op: CmpOp::IsNot,
                ..
            }
        ));
    }

    #[test]
    fn comprehension_and_generator_argument() {
        assert!(parse("ys = [x * 2 for x in xs if x]\n").is_ok());
        assert!(parse("ok = any(x > 1 for x in xs)\n").is_ok());
        assert!(parse("d = {k: v for k, v in items}\n").is_ok());
    }

    #[test]
    fn import_is_parsed_for_the_validator() {
        let prog = parse("import os\nfrom os import path\n").unwrap();
        assert!(matches!(&prog.body[0].kind, StmtKind::Import { module } if module == "os"));
        assert!(matches!(&prog.body[1].kind, StmtKind::Import { .. }));
    }

    #[test]
    fn reports_line_of_syntax_error() {
        let err = parse("x = 1\ny = (2\nz = 3\n").unwrap_err();
        assert_eq!(err.line, 3);
        let err = parse("class A:\n    pass\n").unwrap_err();
        assert!(err.message.contains("not supported"));
    }

    #[test]
    fn single_line_blocks() {
        assert!(parse("if x: y = 1\nelse: y = 2\n").is_ok());
    }
}
