use std::cell::RefCell;
use std::cmp::Ordering;
use std::ops::Deref;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Number as JsonNumber, Value as Json};

use super::super::calculator::format_float;
use super::budget::Budget;
use super::SandboxError;

/// Largest list, dict or range a program may materialize.
pub const MAX_COLLECTION_LEN: usize = 100_000;

/// Largest string a program may build, in bytes. Also caps rendered output.
pub const MAX_STRING_LEN: usize = 1_000_000;

/// Nesting depth at which repr prints `...`, which also breaks cycles.
const MAX_RENDER_DEPTH: usize = 32;

/// Nesting depth at which `==` and ordering give up with a RecursionError.
const MAX_COMPARE_DEPTH: usize = 64;

pub type ListRef = Rc<ListCell>;
pub type DictRef = Rc<RefCell<Dict>>;

/// Backing store of a list value.
#[derive(Debug, Default)]
pub struct ListCell {
    items: RefCell<Vec<Value>>,
}

impl ListCell {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }
}

impl Deref for ListCell {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl Drop for ListCell {
    fn drop(&mut self) {
        release(std::mem::take(self.items.get_mut()));
    }
}

/// Drops nested containers with a work list instead of recursion.
/// Containers still shared elsewhere only lose a reference.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(list) => {
                if let Ok(mut list) = Rc::try_unwrap(list) {
                    pending.append(list.items.get_mut());
                }
            }
            Value::Dict(dict) => {
                if let Ok(mut dict) = Rc::try_unwrap(dict) {
                    pending.extend(dict.get_mut().drain());
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Dict(DictRef),
    Range { start: i64, stop: i64, step: i64 },
    Builtin(&'static str),
}

pub fn check_len(len: usize) -> Result<(), SandboxError> {
    if len > MAX_COLLECTION_LEN {
        return Err(SandboxError::Limit(format!(
            "collection size exceeds {} items",
            MAX_COLLECTION_LEN
        )));
    }
    Ok(())
}

pub fn check_str_len(len: usize) -> Result<(), SandboxError> {
    if len > MAX_STRING_LEN {
        return Err(SandboxError::Limit(format!(
            "string length exceeds {} bytes",
            MAX_STRING_LEN
        )));
    }
    Ok(())
}

/// Hash identity of a dict key. Equal numbers share a key, as in Python.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
}

impl DictKey {
    pub fn of(value: &Value) -> Result<Self, SandboxError> {
        match value {
            Value::None => Ok(DictKey::None),
            Value::Bool(b) => Ok(DictKey::Int(*b as i64)),
            Value::Int(i) => Ok(DictKey::Int(*i)),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(DictKey::Int(*f as i64))
                } else {
                    Ok(DictKey::Float(f.to_bits()))
                }
            }
            Value::Str(s) => Ok(DictKey::Str(Rc::clone(s))),
            other => Err(SandboxError::Type(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }
}

/// Insertion-ordered mapping. Keeps the first key object seen for each key.
#[derive(Debug, Default)]
pub struct Dict {
    entries: IndexMap<DictKey, (Value, Value)>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, SandboxError> {
        let key = DictKey::of(key)?;
        Ok(self.entries.get(&key).map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> Result<bool, SandboxError> {
        Ok(self.entries.contains_key(&DictKey::of(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), SandboxError> {
        let hashed = DictKey::of(&key)?;
        match self.entries.get_mut(&hashed) {
            Some(slot) => slot.1 = value,
            None => {
                check_len(self.entries.len() + 1)?;
                self.entries.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, SandboxError> {
        let key = DictKey::of(key)?;
        Ok(self.entries.shift_remove(&key).map(|(_, v)| v))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.values()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    fn drain(&mut self) -> impl Iterator<Item = Value> + '_ {
        self.entries.drain(..).flat_map(|(_, (k, v))| [k, v])
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            release(self.drain().collect());
        }
    }
}


impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(ListCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Builtin(_) => "builtin_function_or_method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Value::Builtin(_) => true,
        }
    }

    /// Numeric view used by arithmetic; bools count as ints.
    pub fn as_number(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// `str(value)`
    pub fn py_str(&self) -> Result<String, SandboxError> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            other => other.py_repr(),
        }
    }

    /// `repr(value)`, failing once the text outgrows the string limit.
    pub fn py_repr(&self) -> Result<String, SandboxError> {
        let mut out = String::new();
        self.write_repr(&mut out, 0)?;
        check_str_len(out.len())?;
        Ok(out)
    }

    fn write_repr(&self, out: &mut String, depth: usize) -> Result<(), SandboxError> {
        check_str_len(out.len())?;
        if depth > MAX_RENDER_DEPTH {
            out.push_str("...");
            return Ok(());
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(items) => {
                out.push('[');
                for (n, item) in items.borrow().iter().enumerate() {
                    if n > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1)?;
                }
                out.push(']');
            }
            Value::Dict(dict) => {
                out.push('{');
                for (n, (k, v)) in dict.borrow().iter().enumerate() {
                    if n > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1)?;
                    out.push_str(": ");
                    v.write_repr(out, depth + 1)?;
                }
                out.push('}');
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Builtin(name) => out.push_str(&format!("<built-in function {}>", name)),
        }
        Ok(())
    }

    /// Convert to JSON. Values without a JSON form are stringified. Fails
    /// when the serialized form would outgrow the string limit.
    pub fn to_json(&self) -> Result<Json, SandboxError> {
        let mut allowance = Allowance(MAX_STRING_LEN);
        self.json_at(0, &mut allowance)
    }

    fn json_at(&self, depth: usize, allowance: &mut Allowance) -> Result<Json, SandboxError> {
        if depth > MAX_RENDER_DEPTH {
            let text = self.py_repr()?;
            allowance.spend(text.len() + 2)?;
            return Ok(Json::String(text));
        }
        match self {
            Value::None => {
                allowance.spend(4)?;
                Ok(Json::Null)
            }
            Value::Bool(b) => {
                allowance.spend(5)?;
                Ok(Json::Bool(*b))
            }
            Value::Int(i) => {
                allowance.spend(20)?;
                Ok(Json::from(*i))
            }
            Value::Float(f) => {
                allowance.spend(24)?;
                Ok(JsonNumber::from_f64(*f)
                    .map(Json::Number)
                    .unwrap_or_else(|| Json::String(format_float(*f))))
            }
            Value::Str(s) => {
                allowance.spend(s.len() + 2)?;
                Ok(Json::String(s.to_string()))
            }
            Value::List(items) => {
                allowance.spend(2)?;
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    allowance.spend(1)?;
                    out.push(item.json_at(depth + 1, allowance)?);
                }
                Ok(Json::Array(out))
            }
            Value::Dict(dict) => {
                allowance.spend(2)?;
                let mut map = Map::new();
                for (k, v) in dict.borrow().iter() {
                    let key = k.py_str()?;
                    allowance.spend(key.len() + 4)?;
                    map.insert(key, v.json_at(depth + 1, allowance)?);
                }
                Ok(Json::Object(map))
            }
            other => {
                let text = other.py_repr()?;
                allowance.spend(text.len() + 2)?;
                Ok(Json::String(text))
            }
        }
    }

    /// Python `==`.
    pub fn equals(&self, other: &Value, budget: &Budget) -> Result<bool, SandboxError> {
        self.equals_at(other, 0, budget)
    }

    fn equals_at(&self, other: &Value, depth: usize, budget: &Budget) -> Result<bool, SandboxError> {
        budget.charge(1)?;
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(match (a, b) {
                (Num::Int(x), Num::Int(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            });
        }
        match (self, other) {
            (Value::None, Value::None) => Ok(true),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                let depth = deeper(depth)?;
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals_at(y, depth, budget)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                let depth = deeper(depth)?;
                for (k, v) in a.iter() {
                    let equal = match b.get(k)? {
                        Some(other) => v.equals_at(&other, depth, budget)?,
                        None => false,
                    };
                    if !equal {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (
                Value::Range { start, stop, step },
                Value::Range {
                    start: s2,
                    stop: e2,
                    step: st2,
                },
            ) => Ok(start == s2 && stop == e2 && step == st2),
            (Value::Builtin(a), Value::Builtin(b)) => Ok(a == b),
            _ => Ok(false),
        }
    }

    /// Python ordering for `<`, `sorted`, `min` and `max`.
    pub fn compare(&self, other: &Value, budget: &Budget) -> Result<Ordering, SandboxError> {
        self.compare_at(other, 0, budget)
    }

    fn compare_at(
        &self,
        other: &Value,
        depth: usize,
        budget: &Budget,
    ) -> Result<Ordering, SandboxError> {
        budget.charge(1)?;
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
                _ => a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .ok_or_else(|| SandboxError::Value("cannot order NaN".to_string())),
            };
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let depth = deeper(depth)?;
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals_at(y, depth, budget)? {
                        return x.compare_at(y, depth, budget);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(SandboxError::Type(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

fn deeper(depth: usize) -> Result<usize, SandboxError> {
    if depth >= MAX_COMPARE_DEPTH {
        return Err(SandboxError::Recursion(
            "maximum recursion depth exceeded in comparison".to_string(),
        ));
    }
    Ok(depth + 1)
}

/// Remaining bytes for a JSON rendering, by approximate serialized size.
struct Allowance(usize);

impl Allowance {
    fn spend(&mut self, bytes: usize) -> Result<(), SandboxError> {
        if bytes > self.0 {
            return Err(SandboxError::Limit(format!(
                "result exceeds {} bytes",
                MAX_STRING_LEN
            )));
        }
        self.0 -= bytes;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::Float(f),
        }
    }
}

pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let span = if step > 0 { stop - start } else { start - stop };
    if span <= 0 || step == 0 {
        0
    } else {
        let len = (span + step.abs() - 1) / step.abs();
        usize::try_from(len).unwrap_or(usize::MAX)
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dict_of(entries: Vec<(Value, Value)>) -> Value {
        let mut dict = Dict::default();
        for (k, v) in entries {
            dict.insert(k, v).unwrap();
        }
        Value::dict(dict)
    }

    fn self_containing() -> (ListRef, Value) {
        let items = Rc::new(ListCell::new(vec![Value::Int(1)]));
        let v = Value::List(Rc::clone(&items));
        items.borrow_mut().push(v.clone());
        (items, v)
    }

    /// `a = [a, a]` repeated: linear memory, exponential when walked.
    fn doubled(times: usize) -> Value {
        let mut v = Value::list(vec![]);
        for _ in 0..times {
            v = Value::list(vec![v.clone(), v]);
        }
        v
    }

    #[test]
    fn repr_matches_python() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::str("it's"),
            Value::None,
            dict_of(vec![(Value::str("k"), Value::Bool(true))]),
        ]);
        assert_eq!(v.py_repr().unwrap(), "[1, 2.0, \"it's\", None, {'k': True}]");
        assert_eq!(Value::str("plain").py_str().unwrap(), "plain");
        assert_eq!(
            Value::Range { start: 0, stop: 5, step: 1 }.py_repr().unwrap(),
            "range(0, 5)"
        );
    }

    #[test]
    fn self_referencing_list_renders() {
        let (items, v) = self_containing();
        assert!(v.py_repr().unwrap().contains("..."));
        items.borrow_mut().clear();
    }

    #[test]
    fn json_conversion() {
        let v = dict_of(vec![
            (Value::Int(1), Value::Float(f64::INFINITY)),
            (Value::str("r"), Value::Range { start: 0, stop: 3, step: 1 }),
        ]);
        assert_eq!(v.to_json().unwrap(), json!({"1": "inf", "r": "range(0, 3)"}));
    }

    #[test]
    fn shared_nesting_hits_the_output_limit() {
        let v = doubled(20);
        assert!(matches!(v.py_repr(), Err(SandboxError::Limit(_))));
        assert!(matches!(v.py_str(), Err(SandboxError::Limit(_))));
        assert!(matches!(v.to_json(), Err(SandboxError::Limit(_))));

        let small = doubled(3);
        assert_eq!(
            small.to_json().unwrap(),
            json!([[[[], []], [[], []]], [[[], []], [[], []]]])
        );
    }

    #[test]
    fn dict_keys_follow_numeric_equality() {
        let mut dict = Dict::default();
        dict.insert(Value::Int(1), Value::str("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("float")).unwrap();
        dict.insert(Value::Bool(true), Value::str("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.keys()[0].py_repr().unwrap(), "1");
        assert_eq!(dict.values()[0].py_str().unwrap(), "bool");

        let err = dict
            .insert(Value::list(vec![]), Value::None)
            .unwrap_err();
        assert_eq!(err, SandboxError::Type("unhashable type: 'list'".to_string()));
    }

    #[test]
    fn numeric_equality_crosses_types() {
        let budget = Budget::default();
        assert!(Value::Int(1).equals(&Value::Float(1.0), &budget).unwrap());
        assert!(Value::Bool(true).equals(&Value::Int(1), &budget).unwrap());
        assert!(!Value::str("1").equals(&Value::Int(1), &budget).unwrap());
        assert_eq!(
            Value::Int(2).compare(&Value::Float(1.5), &budget).unwrap(),
            Ordering::Greater
        );
        assert!(Value::str("a").compare(&Value::Int(1), &budget).is_err());
    }

    #[test]
    fn cyclic_lists_fail_comparison_instead_of_overflowing() {
        let budget = Budget::default();
        let (a_items, a) = self_containing();
        let (b_items, b) = self_containing();

        assert!(matches!(a.equals(&b, &budget), Err(SandboxError::Recursion(_))));
        assert!(matches!(a.compare(&b, &budget), Err(SandboxError::Recursion(_))));
        assert!(a.equals(&a, &budget).unwrap());

        a_items.borrow_mut().clear();
        b_items.borrow_mut().clear();
    }

    #[test]
    fn comparing_shared_nesting_is_charged_to_the_budget() {
        let budget = Budget::default();
        let (a, b) = (doubled(30), doubled(30));
        assert!(matches!(a.equals(&b, &budget), Err(SandboxError::Limit(_))));
    }

    #[test]
    fn deeply_nested_values_drop_without_recursion() {
        let mut list = Value::list(vec![]);
        for _ in 0..1_000_000 {
            list = Value::list(vec![list]);
        }
        drop(list);

        let mut dict = Value::dict(Dict::default());
        for _ in 0..200_000 {
            let mut outer = Dict::default();
            outer.insert(Value::str("next"), dict).unwrap();
            dict = Value::dict(outer);
        }
        drop(dict);
    }

    #[test]
    fn range_lengths() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(5, 0, -2), 3);
        assert_eq!(range_len(5, 0, 1), 0);
    }
}
