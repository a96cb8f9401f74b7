//! Recursive-descent parser producing the sandbox AST.

use super::lexer::{Tok, Token};
use super::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    ListComp {
        element: Box<Expr>,
        target: Box<Target>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Index(Box<Expr>, Box<Expr>),
    Slice {
        target: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index(Expr, Expr),
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
}

/// Words with statement meaning in Python that the sandbox does not allow.
const FORBIDDEN: &[&str] = &[
    "import", "from", "def", "class", "lambda", "return", "yield", "with", "try", "except",
    "finally", "raise", "global", "nonlocal", "del", "assert", "async", "await", "exec", "eval",
    "open", "__import__", "compile", "globals", "locals", "getattr", "setattr",
];

const RESERVED: &[&str] = &[
    "if", "elif", "else", "for", "in", "while", "break", "continue", "pass", "and", "or", "not",
    "is", "True", "False", "None",
];

/// Deepest syntax tree the parser builds. Operator chains, postfix chains
/// and indented blocks count one level per link.
const MAX_NESTING: usize = 200;

pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, SandboxError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        loops: 0,
    };
    let mut program = Vec::new();
    while !parser.check(&Tok::Eof) {
        parser.statement(&mut program)?;
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    loops: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == word)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Syntax {
            message: message.into(),
            line: self.line(),
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SandboxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn enter(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ── Statements ──────────────────────────────────────────────────

    fn statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), SandboxError> {
        if self.eat_word("if") {
            out.push(self.if_statement()?);
        } else if self.eat_word("for") {
            let target = self.target_list()?;
            if !self.eat_word("in") {
                return Err(self.error("expected 'in'"));
            }
            let iter = self.expression_list()?;
            self.loops += 1;
            let body = self.suite();
            self.loops -= 1;
            out.push(Stmt::For {
                target,
                iter,
                body: body?,
            });
        } else if self.eat_word("while") {
            let condition = self.expression()?;
            self.loops += 1;
            let body = self.suite();
            self.loops -= 1;
            out.push(Stmt::While {
                condition,
                body: body?,
            });
        } else {
            self.simple_statements(out)?;
        }
        Ok(())
    }

    fn if_statement(&mut self) -> Result<Stmt, SandboxError> {
        let mut branches = Vec::new();
        let condition = self.expression()?;
        branches.push((condition, self.suite()?));
        let mut otherwise = Vec::new();
        loop {
            if self.eat_word("elif") {
                let condition = self.expression()?;
                branches.push((condition, self.suite()?));
            } else if self.eat_word("else") {
                otherwise = self.suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    /// `':' simple_statements` on the same line, or an indented block.
    fn suite(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.enter()?;
        let body = self.block();
        self.leave();
        body
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect_op(":")?;
        let mut body = Vec::new();
        if self.check(&Tok::Newline) {
            self.advance();
            if !self.check(&Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            self.advance();
            while !self.check(&Tok::Dedent) && !self.check(&Tok::Eof) {
                self.statement(&mut body)?;
            }
            if self.check(&Tok::Dedent) {
                self.advance();
            }
        } else {
            self.simple_statements(&mut body)?;
        }
        Ok(body)
    }

    fn simple_statements(&mut self, out: &mut Vec<Stmt>) -> Result<(), SandboxError> {
        loop {
            out.push(self.simple_statement()?);
            if self.eat_op(";") {
                if self.check(&Tok::Newline) || self.check(&Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt, SandboxError> {
        if let Tok::Name(word) = self.peek() {
            let word = word.clone();
            if FORBIDDEN.contains(&word.as_str()) {
                return Err(self.error(format!("'{}' is not allowed in the sandbox", word)));
            }
            match word.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(Stmt::Pass);
                }
                "break" | "continue" => {
                    if self.loops == 0 {
                        return Err(self.error(format!("'{}' outside loop", word)));
                    }
                    self.advance();
                    return Ok(if word == "break" {
                        Stmt::Break
                    } else {
                        Stmt::Continue
                    });
                }
                "elif" | "else" => return Err(self.error("invalid syntax")),
                _ => {}
            }
        }

        let first = self.expression_list()?;

        for (op, bin) in [
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
        ] {
            if self.eat_op(op) {
                let target = self.to_target(first)?;
                if matches!(target, Target::Unpack(_)) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.expression_list()?;
                return Ok(Stmt::AugAssign {
                    target,
                    op: bin,
                    value,
                });
            }
        }

        if self.check_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.expression_list()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error("invalid syntax"))?;
            let targets = exprs
                .into_iter()
                .map(|e| self.to_target(e))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Stmt::Assign { targets, value });
        }

        Ok(Stmt::Expr(first))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SandboxError> {
        match expr {
            Expr::Name(name) => {
                if RESERVED.contains(&name.as_str()) {
                    return Err(self.error(format!("cannot assign to {}", name)));
                }
                Ok(Target::Name(name))
            }
            Expr::Index(target, index) => Ok(Target::Index(*target, *index)),
            Expr::List(items) => Ok(Target::Unpack(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// Loop targets: postfix expressions separated by commas (stops before `in`).
    fn target_list(&mut self) -> Result<Target, SandboxError> {
        let mut items = vec![self.postfix()?];
        while self.eat_op(",") {
            if self.check_word("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        let expr = if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::List(items)
        };
        self.to_target(expr)
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// Comma-separated expressions; more than one becomes a tuple (list).
    fn expression_list(&mut self) -> Result<Expr, SandboxError> {
        let first = self.expression()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::List(items))
    }

    fn at_expression_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent)
            || self.check_op("=")
            || self.check_op(")")
            || self.check_op(";")
            || self.check_op(":")
    }

    fn expression(&mut self) -> Result<Expr, SandboxError> {
        self.enter()?;
        let result = self.ternary();
        self.leave();
        result
    }

    fn ternary(&mut self) -> Result<Expr, SandboxError> {
        let then = self.or_expr()?;
        if self.eat_word("if") {
            let condition = self.or_expr()?;
            if !self.eat_word("else") {
                return Err(self.error("expected 'else' in conditional expression"));
            }
            let otherwise = self.expression()?;
            return Ok(Expr::IfElse {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let depth = self.depth;
        let mut lhs = self.and_expr()?;
        while self.eat_word("or") {
            self.enter()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let depth = self.depth;
        let mut lhs = self.not_expr()?;
        while self.eat_word("and") {
            self.enter()?;
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_word("not") {
            self.enter()?;
            let inner = self.not_expr();
            self.leave();
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = if self.eat_op("==") {
                CmpOp::Eq
            } else if self.eat_op("!=") {
                CmpOp::NotEq
            } else if self.eat_op("<=") {
                CmpOp::LtE
            } else if self.eat_op(">=") {
                CmpOp::GtE
            } else if self.eat_op("<") {
                CmpOp::Lt
            } else if self.eat_op(">") {
                CmpOp::Gt
            } else if self.eat_word("in") {
                CmpOp::In
            } else if self.check_word("not")
                && matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Name(n)) if n == "in")
            {
                self.pos += 2;
                CmpOp::NotIn
            } else if self.eat_word("is") {
                if self.eat_word("not") {
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            } else {
                break;
            };
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(lhs)
        } else {
            Ok(Expr::Compare(Box::new(lhs), ops))
        }
    }

    fn arith(&mut self) -> Result<Expr, SandboxError> {
        let depth = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            self.enter()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        let depth = self.depth;
        let mut lhs = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            self.enter()?;
            let rhs = self.factor()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, SandboxError> {
        if self.check_op("-") || self.check_op("+") {
            let negative = self.check_op("-");
            self.advance();
            self.enter()?;
            let inner = self.factor();
            self.leave();
            let inner = Box::new(inner?);
            return Ok(if negative {
                Expr::Neg(inner)
            } else {
                Expr::Pos(inner)
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SandboxError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.factor();
            self.leave();
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent?)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            if self.check_op("(") || self.check_op("[") || self.check_op(".") {
                self.enter()?;
            }
            if self.eat_op("(") {
                let Expr::Name(function) = expr else {
                    return Err(self.error("only builtin functions can be called"));
                };
                let args = self.call_arguments()?;
                expr = Expr::Call { function, args };
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let Tok::Name(name) = self.advance() else {
                    return Err(self.error("expected method name after '.'"));
                };
                if name.starts_with("__") {
                    return Err(self.error("dunder attributes are not allowed in the sandbox"));
                }
                if !self.eat_op("(") {
                    return Err(self.error(format!("attribute access '.{}' is not allowed", name)));
                }
                let args = self.call_arguments()?;
                expr = Expr::Method {
                    receiver: Box::new(expr),
                    name,
                    args,
                };
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<Vec<Expr>, SandboxError> {
        let mut args = Vec::new();
        while !self.check_op(")") {
            if matches!(self.peek(), Tok::Name(_))
                && matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Op("=")))
            {
                return Err(self.error("keyword arguments are not supported"));
            }
            let arg = self.expression()?;
            if self.check_word("for") {
                args.push(self.comprehension(arg)?);
            } else {
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, SandboxError> {
        let lower = if self.check_op(":") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if self.eat_op(":") {
            let upper = if self.check_op("]") {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                target: Box::new(target),
                lower,
                upper,
            });
        }
        self.expect_op("]")?;
        let index = lower.ok_or_else(|| self.error("empty subscript"))?;
        Ok(Expr::Index(Box::new(target), index))
    }

    fn comprehension(&mut self, element: Expr) -> Result<Expr, SandboxError> {
        if !self.eat_word("for") {
            return Err(self.error("expected 'for'"));
        }
        let target = self.target_list()?;
        if !self.eat_word("in") {
            return Err(self.error("expected 'in'"));
        }
        let iter = self.or_expr()?;
        let condition = if self.eat_word("if") {
            Some(Box::new(self.or_expr()?))
        } else {
            None
        };
        Ok(Expr::ListComp {
            element: Box::new(element),
            target: Box::new(target),
            iter: Box::new(iter),
            condition,
        })
    }

    fn atom(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(mut s) => {
                // Adjacent literals concatenate.
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Str(s))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                n if FORBIDDEN.contains(&n) => {
                    Err(self.error(format!("'{}' is not allowed in the sandbox", n)))
                }
                n if RESERVED.contains(&n) => Err(self.error("invalid syntax")),
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => {
                self.enter()?;
                let result = self.parenthesized();
                self.leave();
                result
            }
            Tok::Op("[") => {
                self.enter()?;
                let result = self.list_display();
                self.leave();
                result
            }
            Tok::Op("{") => {
                self.enter()?;
                let result = self.dict_display();
                self.leave();
                result
            }
            Tok::Eof | Tok::Newline => Err(self.error("unexpected end of input")),
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op(")") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.check_word("for") {
            let comp = self.comprehension(first)?;
            self.expect_op(")")?;
            return Ok(comp);
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op(")")?;
        Ok(Expr::List(items))
    }

    fn list_display(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.check_word("for") {
            let comp = self.comprehension(first)?;
            self.expect_op("]")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr, SandboxError> {
        let mut entries = Vec::new();
        while !self.check_op("}") {
            let key = self.expression()?;
            self.expect_op(":")?;
            let value = self.expression()?;
            entries.push((key, value));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }
}
