//! Tree-walking evaluator over the parsed program.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::budget::Budget;
use super::parser::{BinOp, CmpOp, Expr, Stmt, Target};
use super::value::{check_len, check_str_len, range_len, Dict, DictRef, ListRef, Num, Value};
use super::SandboxError;

/// Captured `print` output cap, in bytes.
const MAX_STDOUT_LEN: usize = 64 * 1024;

const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "dict", "sum", "min", "max", "range",
    "abs", "round", "sorted",
];

enum Flow {
    Normal,
    Break,
    Continue,
}

/// Snapshot of something being iterated. Ranges stay lazy.
enum Items {
    Range { start: i64, step: i64, len: usize },
    Values(Vec<Value>),
}

impl Items {
    fn of(value: &Value) -> Result<Self, SandboxError> {
        match value {
            Value::List(items) => Ok(Items::Values(items.borrow().clone())),
            Value::Dict(dict) => Ok(Items::Values(dict.borrow().keys())),
            Value::Str(s) => Ok(Items::Values(
                s.chars().map(|c| Value::str(c.to_string())).collect(),
            )),
            Value::Range { start, stop, step } => Ok(Items::Range {
                start: *start,
                step: *step,
                len: range_len(*start, *stop, *step),
            }),
            other => Err(SandboxError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Items::Range { len, .. } => *len,
            Items::Values(values) => values.len(),
        }
    }

    fn get(&self, n: usize) -> Value {
        match self {
            Items::Range { start, step, .. } => {
                Value::Int((*start as i128 + *step as i128 * n as i128) as i64)
            }
            Items::Values(values) => values[n].clone(),
        }
    }

    fn into_vec(self, budget: &Budget) -> Result<Vec<Value>, SandboxError> {
        match self {
            Items::Values(values) => Ok(values),
            range @ Items::Range { .. } => {
                check_len(range.len())?;
                budget.charge(range.len())?;
                Ok((0..range.len()).map(|n| range.get(n)).collect())
            }
        }
    }
}

#[derive(Default)]
pub struct Interpreter {
    globals: HashMap<String, Value>,
    stdout: String,
    budget: Budget,
}

impl Interpreter {
    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        Self {
            budget: Budget::new(cancel),
            ..Self::default()
        }
    }

    pub fn execute(&mut self, program: &[Stmt]) -> Result<(), SandboxError> {
        self.exec_block(program).map(|_| ())
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn into_stdout(self) -> String {
        self.stdout
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.budget.tick()
    }

    // ── Statements ──────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, SandboxError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            Stmt::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(otherwise);
            }
            Stmt::For { target, iter, body } => {
                let items = Items::of(&self.eval(iter)?)?;
                for n in 0..items.len() {
                    self.tick()?;
                    self.assign(target, items.get(n))?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
            }
            Stmt::While { condition, body } => {
                while self.eval(condition)?.truthy() {
                    self.tick()?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                self.globals.insert(name.clone(), value);
                Ok(())
            }
            Target::Index(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                set_item(&container, index, value)
            }
            Target::Unpack(targets) => {
                let items = Items::of(&value)?.into_vec(&self.budget)?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Less => Err(SandboxError::Value(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ))),
                    Ordering::Greater => Err(SandboxError::Value(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ))),
                    Ordering::Equal => {
                        for (target, item) in targets.iter().zip(items) {
                            self.assign(target, item)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value)?;
                let updated = augmented(op, &current, &rhs, &self.budget)?;
                self.globals.insert(name.clone(), updated);
                Ok(())
            }
            Target::Index(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = get_item(&container, &index)?;
                let rhs = self.eval(value)?;
                let updated = augmented(op, &current, &rhs, &self.budget)?;
                set_item(&container, index, updated)
            }
            Target::Unpack(_) => Err(SandboxError::Type(
                "illegal expression for augmented assignment".to_string(),
            )),
        }
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn load(&self, name: &str) -> Result<Value, SandboxError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        BUILTINS
            .iter()
            .copied()
            .find(|b| *b == name)
            .map(Value::Builtin)
            .ok_or_else(|| SandboxError::Name(name.to_string()))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => self.load(name),
            Expr::List(items) => {
                check_len(items.len())?;
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::default();
                for (k, v) in entries {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp {
                element,
                target,
                iter,
                condition,
            } => self.list_comprehension(element, target, iter, condition.as_deref()),
            Expr::Neg(inner) => match self.eval(inner)?.as_number() {
                Some(Num::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| SandboxError::Overflow("integer overflow".to_string())),
                Some(Num::Float(f)) => Ok(Value::Float(-f)),
                None => Err(SandboxError::Type("bad operand type for unary -".to_string())),
            },
            Expr::Pos(inner) => match self.eval(inner)?.as_number() {
                Some(n) => Ok(n.into_value()),
                None => Err(SandboxError::Type("bad operand type for unary +".to_string())),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::Binary(lhs, op, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                arith(*op, &a, &b)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare(*op, &left, &right, &self.budget)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(rhs)
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(rhs)
            }
            Expr::IfElse {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { function, args } => {
                let callee = self.load(function)?;
                let args = self.eval_args(args)?;
                match callee {
                    Value::Builtin(name) => self.call_builtin(name, args),
                    other => Err(SandboxError::Type(format!(
                        "'{}' object is not callable",
                        other.type_name()
                    ))),
                }
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_args(args)?;
                call_method(&receiver, name, args, &self.budget)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                get_item(&target, &index)
            }
            Expr::Slice {
                target,
                lower,
                upper,
            } => {
                let target = self.eval(target)?;
                let lower = self.eval_bound(lower.as_deref())?;
                let upper = self.eval_bound(upper.as_deref())?;
                slice(&target, lower, upper)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, SandboxError> {
        args.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_bound(&mut self, bound: Option<&Expr>) -> Result<Option<i64>, SandboxError> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            Value::Bool(b) => Ok(Some(b as i64)),
            other => Err(SandboxError::Type(format!(
                "slice indices must be integers or None, not {}",
                other.type_name()
            ))),
        }
    }

    /// The loop variable is scoped to the comprehension.
    fn list_comprehension(
        &mut self,
        element: &Expr,
        target: &Target,
        iter: &Expr,
        condition: Option<&Expr>,
    ) -> Result<Value, SandboxError> {
        let items = Items::of(&self.eval(iter)?)?;
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .iter()
            .map(|n| (n.clone(), self.globals.get(n).cloned()))
            .collect();

        let outcome = (|| -> Result<Value, SandboxError> {
            let mut out = Vec::new();
            for n in 0..items.len() {
                self.tick()?;
                self.assign(target, items.get(n))?;
                if let Some(condition) = condition {
                    if !self.eval(condition)?.truthy() {
                        continue;
                    }
                }
                out.push(self.eval(element)?);
                check_len(out.len())?;
            }
            Ok(Value::list(out))
        })();

        for (name, previous) in saved {
            match previous {
                Some(value) => self.globals.insert(name, value),
                None => self.globals.remove(&name),
            };
        }
        outcome
    }

    // ── Builtins ────────────────────────────────────────────────────

    fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(Value::py_str)
                    .collect::<Result<Vec<_>, _>>()?
                    .join(" ");
                if self.stdout.len() + line.len() + 1 > MAX_STDOUT_LEN {
                    return Err(SandboxError::Limit(format!(
                        "printed output exceeds {} bytes",
                        MAX_STDOUT_LEN
                    )));
                }
                self.stdout.push_str(&line);
                self.stdout.push('\n');
                Ok(Value::None)
            }
            "len" => {
                let [value] = exact::<1>(name, args)?;
                let len = match &value {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Dict(dict) => dict.borrow().len(),
                    Value::Range { start, stop, step } => range_len(*start, *stop, *step),
                    other => {
                        return Err(SandboxError::Type(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(len as i64))
            }
            "str" => match optional::<1>(name, args)? {
                [None] => Ok(Value::str("")),
                [Some(value)] => {
                    let text = value.py_str()?;
                    check_str_len(text.len())?;
                    Ok(Value::str(text))
                }
            },
            "int" => match optional::<1>(name, args)? {
                [None] => Ok(Value::Int(0)),
                [Some(value)] => to_int(&value),
            },
            "float" => match optional::<1>(name, args)? {
                [None] => Ok(Value::Float(0.0)),
                [Some(value)] => to_float(&value),
            },
            "bool" => match optional::<1>(name, args)? {
                [None] => Ok(Value::Bool(false)),
                [Some(value)] => Ok(Value::Bool(value.truthy())),
            },
            "list" => match optional::<1>(name, args)? {
                [None] => Ok(Value::list(Vec::new())),
                [Some(value)] => Ok(Value::list(Items::of(&value)?.into_vec(&self.budget)?)),
            },
            "dict" => match optional::<1>(name, args)? {
                [None] => Ok(Value::dict(Dict::default())),
                [Some(value)] => to_dict(&value, &self.budget),
            },
            "sum" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(arity(name, "1 or 2", args.len()));
                }
                let mut args = args.into_iter();
                let items = args.next().map(|v| Items::of(&v)).transpose()?;
                let mut total = args.next().unwrap_or(Value::Int(0));
                if let Some(items) = items {
                    for n in 0..items.len() {
                        self.budget.charge(1)?;
                        total = arith(BinOp::Add, &total, &items.get(n))?;
                    }
                }
                Ok(total)
            }
            "min" | "max" => {
                let candidates = match args.len() {
                    0 => return Err(arity(name, "at least 1", 0)),
                    1 => Items::of(&args[0])?.into_vec(&self.budget)?,
                    _ => args,
                };
                let wanted = if name == "min" {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut iter = candidates.into_iter();
                let mut best = iter.next().ok_or_else(|| {
                    SandboxError::Value(format!("{}() arg is an empty sequence", name))
                })?;
                for candidate in iter {
                    if candidate.compare(&best, &self.budget)? == wanted {
                        best = candidate;
                    }
                }
                Ok(best)
            }
            "range" => {
                let bounds = args
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Ok(*i),
                        Value::Bool(b) => Ok(*b as i64),
                        other => Err(SandboxError::Type(format!(
                            "'{}' object cannot be interpreted as an integer",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(arity(name, "1 to 3", bounds.len())),
                };
                if step == 0 {
                    return Err(SandboxError::Value(
                        "range() arg 3 must not be zero".to_string(),
                    ));
                }
                Ok(Value::Range { start, stop, step })
            }
            "abs" => {
                let [value] = exact::<1>(name, args)?;
                match value.as_number() {
                    Some(Num::Int(i)) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| SandboxError::Overflow("integer overflow".to_string())),
                    Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
                    None => Err(SandboxError::Type(format!(
                        "bad operand type for abs(): '{}'",
                        value.type_name()
                    ))),
                }
            }
            "round" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(arity(name, "1 or 2", args.len()));
                }
                let digits = match args.get(1) {
                    None | Some(Value::None) => None,
                    Some(Value::Int(d)) => Some(*d),
                    Some(other) => {
                        return Err(SandboxError::Type(format!(
                            "'{}' object cannot be interpreted as an integer",
                            other.type_name()
                        )))
                    }
                };
                round(&args[0], digits)
            }
            "sorted" => {
                let [value] = exact::<1>(name, args)?;
                let mut items = Items::of(&value)?.into_vec(&self.budget)?;
                sort_values(&mut items, &self.budget)?;
                Ok(Value::list(items))
            }
            other => Err(SandboxError::Name(other.to_string())),
        }
    }
}

fn target_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(name) => out.push(name.clone()),
        Target::Unpack(targets) => targets.iter().for_each(|t| target_names(t, out)),
        Target::Index(..) => {}
    }
}

fn arity(name: &str, expected: &str, got: usize) -> SandboxError {
    SandboxError::Type(format!(
        "{}() takes {} arguments ({} given)",
        name, expected, got
    ))
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], SandboxError> {
    let got = args.len();
    args.try_into()
        .map_err(|_| arity(name, &N.to_string(), got))
}

fn optional<const N: usize>(
    name: &str,
    args: Vec<Value>,
) -> Result<[Option<Value>; N], SandboxError> {
    if args.len() > N {
        return Err(arity(name, &format!("at most {}", N), args.len()));
    }
    let mut slots: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (slot, arg) in slots.iter_mut().zip(args) {
        *slot = Some(arg);
    }
    Ok(slots)
}

fn sort_values(items: &mut [Value], budget: &Budget) -> Result<(), SandboxError> {
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b, budget) {
        Ok(order) => order,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    failure.map_or(Ok(()), Err)
}

fn float_to_int(f: f64) -> Result<i64, SandboxError> {
    if f.is_nan() {
        return Err(SandboxError::Value(
            "cannot convert float NaN to integer".to_string(),
        ));
    }
    if !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&f) {
        return Err(SandboxError::Overflow(
            "cannot convert float to integer".to_string(),
        ));
    }
    Ok(f as i64)
}

fn to_int(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => float_to_int(f.trunc()).map(Value::Int),
        Value::Str(s) => match s.trim().replace('_', "").parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => Err(SandboxError::Value(format!(
                "invalid literal for int() with base 10: {}",
                value.py_repr()?
            ))),
        },
        other => Err(SandboxError::Type(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(Value::Float(f)),
            Err(_) => Err(SandboxError::Value(format!(
                "could not convert string to float: {}",
                value.py_repr()?
            ))),
        },
        other => other
            .as_number()
            .map(|n| Value::Float(n.as_f64()))
            .ok_or_else(|| {
                SandboxError::Type(format!(
                    "float() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))
            }),
    }
}

fn to_dict(value: &Value, budget: &Budget) -> Result<Value, SandboxError> {
    let mut dict = Dict::default();
    match value {
        Value::Dict(source) => {
            for (k, v) in source.borrow().iter() {
                dict.insert(k.clone(), v.clone())?;
            }
        }
        other => {
            let pairs = Items::of(other)?.into_vec(budget)?;
            for pair in pairs {
                budget.charge(1)?;
                let [k, v]: [Value; 2] = Items::of(&pair)?
                    .into_vec(budget)?
                    .try_into()
                    .map_err(|_| {
                        SandboxError::Value(
                            "dictionary update sequence element has wrong length".to_string(),
                        )
                    })?;
                dict.insert(k, v)?;
            }
        }
    }
    Ok(Value::dict(dict))
}

fn round(value: &Value, digits: Option<i64>) -> Result<Value, SandboxError> {
    match (value.as_number(), digits) {
        (Some(Num::Int(i)), _) => Ok(Value::Int(i)),
        (Some(Num::Float(f)), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Some(Num::Float(f)), Some(d)) => {
            let scale = 10f64.powi(d.clamp(-308, 308) as i32);
            let rounded = (f * scale).round_ties_even() / scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
        }
        (None, _) => Err(SandboxError::Type(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn augmented(
    op: BinOp,
    current: &Value,
    rhs: &Value,
    budget: &Budget,
) -> Result<Value, SandboxError> {
    // `list += iterable` extends in place.
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        let extra = Items::of(rhs)?.into_vec(budget)?;
        check_len(items.borrow().len() + extra.len())?;
        items.borrow_mut().extend(extra);
        return Ok(current.clone());
    }
    arith(op, current, rhs)
}

fn arith(op: BinOp, a: &Value, b: &Value) -> Result<Value, SandboxError> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return numeric(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_str_len(x.len() + y.len())?;
            Ok(Value::str(format!("{}{}", x, y)))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            check_len(items.len())?;
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            check_str_len(s.len().saturating_mul(count))?;
            Ok(Value::str(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(l), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::List(l)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            let items = l.borrow();
            check_len(items.len().saturating_mul(count))?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => Err(SandboxError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol(op),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn numeric(op: BinOp, x: Num, y: Num) -> Result<Value, SandboxError> {
    let overflow = || SandboxError::Overflow("integer overflow".to_string());
    let zero = |message: &str| Err(SandboxError::ZeroDivision(message.to_string()));

    if let (Num::Int(a), Num::Int(b)) = (x, y) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    return zero("division by zero");
                }
                Ok(Value::Float(a as f64 / b as f64))
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    return zero("integer division or modulo by zero");
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let adjust = a % b != 0 && ((a < 0) != (b < 0));
                Ok(Value::Int(if adjust { q - 1 } else { q }))
            }
            BinOp::Mod => {
                if b == 0 {
                    return zero("integer modulo by zero");
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                let adjust = r != 0 && ((r < 0) != (b < 0));
                Ok(Value::Int(if adjust { r + b } else { r }))
            }
            BinOp::Pow => {
                if b >= 0 {
                    let exp = u32::try_from(b).map_err(|_| overflow())?;
                    a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
                } else if a == 0 {
                    zero("0.0 cannot be raised to a negative power")
                } else {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                }
            }
        };
    }

    let (a, b) = (x.as_f64(), y.as_f64());
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return zero("float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return zero("float floor division by zero");
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return zero("float modulo");
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return zero("0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(SandboxError::Value(
                    "negative number cannot be raised to a fractional power".to_string(),
                ));
            }
            let power = a.powf(b);
            if power.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(SandboxError::Overflow(
                    "(34, 'Numerical result out of range')".to_string(),
                ));
            }
            power
        }
    };
    Ok(Value::Float(value))
}

fn compare(op: CmpOp, a: &Value, b: &Value, budget: &Budget) -> Result<bool, SandboxError> {
    Ok(match op {
        CmpOp::Eq => a.equals(b, budget)?,
        CmpOp::NotEq => !a.equals(b, budget)?,
        CmpOp::Lt => a.compare(b, budget)? == Ordering::Less,
        CmpOp::LtE => a.compare(b, budget)? != Ordering::Greater,
        CmpOp::Gt => a.compare(b, budget)? == Ordering::Greater,
        CmpOp::GtE => a.compare(b, budget)? != Ordering::Less,
        CmpOp::In => contains(b, a, budget)?,
        CmpOp::NotIn => !contains(b, a, budget)?,
        CmpOp::Is => identical(a, b, budget)?,
        CmpOp::IsNot => !identical(a, b, budget)?,
    })
}

fn identical(a: &Value, b: &Value, budget: &Budget) -> Result<bool, SandboxError> {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(Rc::ptr_eq(x, y)),
        (Value::Dict(x), Value::Dict(y)) => Ok(Rc::ptr_eq(x, y)),
        _ => Ok(a.type_name() == b.type_name() && a.equals(b, budget)?),
    }
}

/// First position in `items` equal to `item`.
fn position(
    items: &[Value],
    item: &Value,
    budget: &Budget,
) -> Result<Option<usize>, SandboxError> {
    for (n, candidate) in items.iter().enumerate() {
        if candidate.equals(item, budget)? {
            return Ok(Some(n));
        }
    }
    Ok(None)
}

fn contains(container: &Value, item: &Value, budget: &Budget) -> Result<bool, SandboxError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(SandboxError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(position(&items.borrow(), item, budget)?.is_some()),
        Value::Dict(dict) => dict.borrow().contains(item),
        Value::Range { start, stop, step } => Ok(match item.as_number() {
            Some(Num::Int(i)) => {
                let len = range_len(*start, *stop, *step) as i128;
                let offset = i as i128 - *start as i128;
                offset % *step as i128 == 0 && (0..len).contains(&(offset / *step as i128))
            }
            _ => false,
        }),
        other => Err(SandboxError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn index_of(index: &Value, len: usize, what: &str) -> Result<usize, SandboxError> {
    let i = match index {
        Value::Int(i) => *i,
        Value::Bool(b) => *b as i64,
        other => {
            return Err(SandboxError::Type(format!(
                "{} indices must be integers, not {}",
                what,
                other.type_name()
            )))
        }
    };
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(SandboxError::Index(format!("{} index out of range", what)));
    }
    Ok(resolved as usize)
}

fn get_item(target: &Value, index: &Value) -> Result<Value, SandboxError> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let slot = index_of(index, items.len(), "list")?;
            Ok(items[slot].clone())
        }
        Value::Str(s) => {
            let slot = index_of(index, s.chars().count(), "string")?;
            Ok(s
                .chars()
                .nth(slot)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or_else(|| Value::str("")))
        }
        Value::Dict(dict) => match dict.borrow().get(index)? {
            Some(value) => Ok(value),
            None => Err(SandboxError::Key(index.py_repr()?)),
        },
        Value::Range { start, stop, step } => {
            let slot = index_of(index, range_len(*start, *stop, *step), "range")?;
            Ok(Value::Int(
                (*start as i128 + *step as i128 * slot as i128) as i64,
            ))
        }
        other => Err(SandboxError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(target: &Value, index: Value, value: Value) -> Result<(), SandboxError> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let slot = index_of(&index, items.len(), "list")?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index, value),
        other => Err(SandboxError::Type(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bounds(lower: Option<i64>, upper: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |v: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(0, len)
    };
    let start = lower.map(clamp).unwrap_or(0);
    let end = upper.map(clamp).unwrap_or(len).max(start);
    (start as usize, end as usize)
}

fn slice(target: &Value, lower: Option<i64>, upper: Option<i64>) -> Result<Value, SandboxError> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let (start, end) = slice_bounds(lower, upper, items.len());
            Ok(Value::list(items[start..end].to_vec()))
        }
        Value::Str(s) => {
            let (start, end) = slice_bounds(lower, upper, s.chars().count());
            Ok(Value::str(
                s.chars().skip(start).take(end - start).collect::<String>(),
            ))
        }
        other => Err(SandboxError::Type(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

fn no_attribute(receiver: &Value, name: &str) -> SandboxError {
    SandboxError::Attribute(format!(
        "'{}' object has no attribute '{}'",
        receiver.type_name(),
        name
    ))
}

fn str_arg(value: &Value, method: &str) -> Result<Rc<str>, SandboxError> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(SandboxError::Type(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn call_method(
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, SandboxError> {
    match receiver {
        Value::List(items) => list_method(receiver, items, name, args, budget),
        Value::Dict(dict) => dict_method(receiver, dict, name, args, budget),
        Value::Str(s) => str_method(receiver, s, name, args, budget),
        other => Err(no_attribute(other, name)),
    }
}

fn list_method(
    receiver: &Value,
    items: &ListRef,
    name: &str,
    args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, SandboxError> {
    match name {
        "append" => {
            let [item] = exact::<1>(name, args)?;
            check_len(items.borrow().len() + 1)?;
            items.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            let [other] = exact::<1>(name, args)?;
            let extra = Items::of(&other)?.into_vec(budget)?;
            check_len(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let [index, item] = exact::<2>(name, args)?;
            let Value::Int(i) = index else {
                return Err(SandboxError::Type("list indices must be integers".to_string()));
            };
            let mut items = items.borrow_mut();
            check_len(items.len() + 1)?;
            let len = items.len() as i64;
            let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
            items.insert(at as usize, item);
            Ok(Value::None)
        }
        "pop" => {
            let [index] = optional::<1>(name, args)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(SandboxError::Index("pop from empty list".to_string()));
            }
            let slot = match index {
                Some(index) => index_of(&index, items.len(), "pop")?,
                None => items.len() - 1,
            };
            Ok(items.remove(slot))
        }
        "index" => {
            let [item] = exact::<1>(name, args)?;
            let found = position(&items.borrow(), &item, budget)?;
            match found {
                Some(p) => Ok(Value::Int(p as i64)),
                None => Err(SandboxError::Value(format!(
                    "{} is not in list",
                    item.py_repr()?
                ))),
            }
        }
        "count" => {
            let [item] = exact::<1>(name, args)?;
            let mut count = 0;
            for candidate in items.borrow().iter() {
                if candidate.equals(&item, budget)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "reverse" => {
            exact::<0>(name, args)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            exact::<0>(name, args)?;
            let mut sorted = items.borrow().clone();
            sort_values(&mut sorted, budget)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn dict_method(
    receiver: &Value,
    dict: &DictRef,
    name: &str,
    args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, SandboxError> {
    match name {
        "keys" => {
            exact::<0>(name, args)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            exact::<0>(name, args)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            exact::<0>(name, args)?;
            let pairs = dict
                .borrow()
                .iter()
                .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                .collect();
            Ok(Value::list(pairs))
        }
        "get" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity(name, "1 or 2", args.len()));
            }
            let found = dict.borrow().get(&args[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "pop" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity(name, "1 or 2", args.len()));
            }
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(SandboxError::Key(args[0].py_repr()?)),
            }
        }
        "update" => {
            let [other] = exact::<1>(name, args)?;
            let Value::Dict(source) = to_dict(&other, budget)? else {
                return Err(no_attribute(receiver, name));
            };
            let entries: Vec<(Value, Value)> = source.borrow().iter().cloned().collect();
            let mut dict = dict.borrow_mut();
            for (k, v) in entries {
                dict.insert(k, v)?;
            }
            Ok(Value::None)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn str_method(
    receiver: &Value,
    s: &str,
    name: &str,
    args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, SandboxError> {
    match name {
        "upper" => {
            exact::<0>(name, args)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            exact::<0>(name, args)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            let [chars] = optional::<1>(name, args)?;
            let chars: Option<Vec<char>> = match chars {
                None | Some(Value::None) => None,
                Some(other) => Some(str_arg(&other, name)?.chars().collect()),
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "lstrip" => s.trim_start_matches(matches),
                "rstrip" => s.trim_end_matches(matches),
                _ => s.trim_matches(matches),
            };
            Ok(Value::str(stripped))
        }
        "split" => {
            let [sep] = optional::<1>(name, args)?;
            let parts: Vec<Value> = match sep {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = str_arg(&sep, name)?;
                    if sep.is_empty() {
                        return Err(SandboxError::Value("empty separator".to_string()));
                    }
                    s.split(&*sep).map(Value::str).collect()
                }
            };
            check_len(parts.len())?;
            Ok(Value::list(parts))
        }
        "join" => {
            let [iterable] = exact::<1>(name, args)?;
            let parts = Items::of(&iterable)?.into_vec(budget)?;
            let mut pieces = Vec::with_capacity(parts.len());
            for (n, part) in parts.iter().enumerate() {
                match part {
                    Value::Str(p) => pieces.push(p.to_string()),
                    other => {
                        return Err(SandboxError::Type(format!(
                            "sequence item {}: expected str instance, {} found",
                            n,
                            other.type_name()
                        )))
                    }
                }
            }
            let total = pieces.iter().map(String::len).sum::<usize>()
                + s.len() * pieces.len().saturating_sub(1);
            check_str_len(total)?;
            Ok(Value::str(pieces.join(s)))
        }
        "replace" => {
            let [from, to] = exact::<2>(name, args)?;
            let (from, to) = (str_arg(&from, name)?, str_arg(&to, name)?);
            let occurrences = if from.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*from).count()
            };
            check_str_len(s.len() + occurrences.saturating_mul(to.len()))?;
            Ok(Value::str(s.replace(&*from, &*to)))
        }
        "startswith" => {
            let [prefix] = exact::<1>(name, args)?;
            Ok(Value::Bool(s.starts_with(&*str_arg(&prefix, name)?)))
        }
        "endswith" => {
            let [suffix] = exact::<1>(name, args)?;
            Ok(Value::Bool(s.ends_with(&*str_arg(&suffix, name)?)))
        }
        "find" => {
            let [needle] = exact::<1>(name, args)?;
            let needle = str_arg(&needle, name)?;
            Ok(Value::Int(
                s.find(&*needle)
                    .map(|byte| s[..byte].chars().count() as i64)
                    .unwrap_or(-1),
            ))
        }
        "count" => {
            let [needle] = exact::<1>(name, args)?;
            let needle = str_arg(&needle, name)?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        _ => Err(no_attribute(receiver, name)),
    }
}
