//! The Harmony value algebra.
//!
//! Every datum a program can manipulate is a [`Value`]: immutable,
//! structurally comparable, hashable, and totally ordered. The variant
//! declaration order below *is* the ordering tag (`Bool < Int < Atom < PC <
//! Address < Dict < Set < Context`), so the derived `Ord` implements the
//! canonical value order that `min`, `max`, `Cut` and choose-resolution
//! depend on. Compound values share structure through `Arc`, which keeps
//! state snapshots cheap to clone.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::context::Context;
use crate::errors::Failure;

/// Interned symbol type. Atoms double as variable names and string values.
pub type AtomStr = Arc<str>;

lazy_static::lazy_static! {
    static ref NOVALUE: Value = Value::Dict(Arc::new(Dict::new()));
    static ref NONE_ADDRESS: Value = Value::Address(Arc::new(Vec::new()));
}

/// Well-known atoms used by the calling convention and process identities.
pub mod atoms {
    use super::AtomStr;
    use std::sync::Arc;

    lazy_static::lazy_static! {
        pub static ref NAME: AtomStr = Arc::from("name");
        pub static ref TAG: AtomStr = Arc::from("tag");
        pub static ref RESULT: AtomStr = Arc::from("result");
        pub static ref NORMAL: AtomStr = Arc::from("normal");
        pub static ref INTERRUPT: AtomStr = Arc::from("interrupt");
        pub static ref PROCESS: AtomStr = Arc::from("process");
        pub static ref INIT: AtomStr = Arc::from("__init__");
        pub static ref CONST: AtomStr = Arc::from("__const__");
    }
}

/// An integer that may be one of the two infinities.
///
/// Variant order gives the derived `Ord`: `-inf` below every finite value,
/// `inf` above. Infinities take part in comparison and division only; any
/// other arithmetic involving them (or finite overflow) is a runtime
/// failure, surfaced as `None` from the checked operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Number {
    NegInf,
    Finite(i64),
    PosInf,
}

impl Number {
    pub fn as_finite(self) -> Option<i64> {
        match self {
            Number::Finite(n) => Some(n),
            _ => None,
        }
    }

    pub fn checked_add(self, other: Number) -> Option<Number> {
        let (a, b) = (self.as_finite()?, other.as_finite()?);
        a.checked_add(b).map(Number::Finite)
    }

    pub fn checked_sub(self, other: Number) -> Option<Number> {
        let (a, b) = (self.as_finite()?, other.as_finite()?);
        a.checked_sub(b).map(Number::Finite)
    }

    pub fn checked_mul(self, other: Number) -> Option<Number> {
        let (a, b) = (self.as_finite()?, other.as_finite()?);
        a.checked_mul(b).map(Number::Finite)
    }

    pub fn checked_neg(self) -> Option<Number> {
        match self {
            Number::Finite(n) => n.checked_neg().map(Number::Finite),
            Number::PosInf => Some(Number::NegInf),
            Number::NegInf => Some(Number::PosInf),
        }
    }

    /// Floor division. A finite value divided by an infinity is 0; an
    /// infinity divided by a finite value keeps its (sign-adjusted)
    /// infinity; dividing by zero or mixing two infinities fails.
    pub fn floor_div(self, other: Number) -> Result<Number, Failure> {
        match (self, other) {
            (_, Number::Finite(0)) => Err(Failure::DivisionByZero),
            (Number::Finite(_), Number::PosInf | Number::NegInf) => Ok(Number::Finite(0)),
            (Number::Finite(a), Number::Finite(b)) => {
                if a == i64::MIN && b == -1 {
                    return Err(Failure::IntegerOverflow);
                }
                let q = a / b;
                if a % b != 0 && (a < 0) != (b < 0) {
                    Ok(Number::Finite(q - 1))
                } else {
                    Ok(Number::Finite(q))
                }
            }
            (inf, Number::Finite(b)) => {
                let negate = b < 0;
                match (inf, negate) {
                    (Number::PosInf, false) | (Number::NegInf, true) => Ok(Number::PosInf),
                    _ => Ok(Number::NegInf),
                }
            }
            _ => Err(Failure::UnexpectedType {
                expected: "finite integer",
                found: "infinity".to_string(),
            }),
        }
    }

    /// Floored modulus: the result carries the sign of the divisor.
    pub fn floor_mod(self, other: Number) -> Result<Number, Failure> {
        let a = self.as_finite().ok_or(Failure::UnexpectedType {
            expected: "finite integer",
            found: "infinity".to_string(),
        })?;
        let b = other.as_finite().ok_or(Failure::UnexpectedType {
            expected: "finite integer",
            found: "infinity".to_string(),
        })?;
        if b == 0 {
            return Err(Failure::DivisionByZero);
        }
        if a == i64::MIN && b == -1 {
            return Err(Failure::IntegerOverflow);
        }
        let r = a % b;
        if r != 0 && (r < 0) != (b < 0) {
            Ok(Number::Finite(r + b))
        } else {
            Ok(Number::Finite(r))
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Finite(n) => write!(f, "{n}"),
            Number::PosInf => write!(f, "inf"),
            Number::NegInf => write!(f, "-inf"),
        }
    }
}

impl FromStr for Number {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inf" => Ok(Number::PosInf),
            "-inf" => Ok(Number::NegInf),
            _ => s.parse::<i64>().map(Number::Finite),
        }
    }
}

/// A mapping from values to values, kept sorted by key.
///
/// Dicts are Harmony's only compound record: a dict whose keys are exactly
/// `0..n-1` doubles as a list/tuple (see [`Dict::is_list`]). The sorted-vec
/// representation makes the derived equality, hash and lexicographic
/// ordering agree with the canonical value order for free.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Dict {
            entries: Vec::new(),
        }
    }

    pub fn from_entries(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut dict = Dict::new();
        for (k, v) in pairs {
            dict.insert(k, v);
        }
        dict
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (key, value)),
        }
    }

    /// Remove a key if present.
    pub fn remove(&mut self, key: &Value) {
        if let Ok(i) = self.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            self.entries.remove(i);
        }
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// True when the keys are exactly `0..n-1`, i.e. the dict is a list.
    pub fn is_list(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(i, (k, _))| matches!(k, Value::Int(Number::Finite(n)) if *n == i as i64))
    }

    /// Append a value under the next list index.
    pub fn push_back(&mut self, value: Value) {
        let key = Value::int(self.entries.len() as i64);
        self.insert(key, value);
    }

    /// List concatenation: the values of `self` followed by the values of
    /// `other`, renumbered from 0.
    pub fn concat(&self, other: &Dict) -> Dict {
        let mut result = Dict::new();
        for v in self.values().chain(other.values()) {
            result.push_back(v.clone());
        }
        result
    }
}

/// A set of values, kept sorted and deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Set {
    members: Vec<Value>,
}

impl Set {
    pub fn new() -> Self {
        Set {
            members: Vec::new(),
        }
    }

    pub fn from_members(values: impl IntoIterator<Item = Value>) -> Self {
        let mut members: Vec<Value> = values.into_iter().collect();
        members.sort();
        members.dedup();
        Set { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.members.binary_search(value).is_ok()
    }

    pub fn insert(&mut self, value: Value) {
        if let Err(i) = self.members.binary_search(&value) {
            self.members.insert(i, value);
        }
    }

    /// Members in ascending value order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.members.iter()
    }

    pub fn min(&self) -> Option<&Value> {
        self.members.first()
    }

    pub fn max(&self) -> Option<&Value> {
        self.members.last()
    }

    /// Split off the minimum element, returning it and the remainder.
    pub fn cut(&self) -> Option<(Value, Set)> {
        let (first, rest) = self.members.split_first()?;
        Some((
            first.clone(),
            Set {
                members: rest.to_vec(),
            },
        ))
    }

    pub fn union(&self, other: &Set) -> Set {
        let mut members = self.members.clone();
        members.extend(other.members.iter().cloned());
        members.sort();
        members.dedup();
        Set { members }
    }

    pub fn intersection(&self, other: &Set) -> Set {
        Set {
            members: self
                .members
                .iter()
                .filter(|v| other.contains(v))
                .cloned()
                .collect(),
        }
    }

    pub fn difference(&self, other: &Set) -> Set {
        Set {
            members: self
                .members
                .iter()
                .filter(|v| !other.contains(v))
                .cloned()
                .collect(),
        }
    }
}

/// An immutable Harmony value.
///
/// Variant order is the ordering tag; do not reorder.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Int(Number),
    Atom(AtomStr),
    Pc(usize),
    /// A rooted path into a shared or local compound variable:
    /// `[base, i1, i2, ...]` with an atom base. The empty address is `None`.
    Address(Arc<Vec<Value>>),
    Dict(Arc<Dict>),
    Set(Arc<Set>),
    Context(Arc<Context>),
}

impl Value {
    pub fn int(n: i64) -> Value {
        Value::Int(Number::Finite(n))
    }

    pub fn atom(s: &str) -> Value {
        Value::Atom(Arc::from(s))
    }

    pub fn dict(d: Dict) -> Value {
        Value::Dict(Arc::new(d))
    }

    pub fn set(s: Set) -> Value {
        Value::Set(Arc::new(s))
    }

    pub fn address(indexes: Vec<Value>) -> Value {
        Value::Address(Arc::new(indexes))
    }

    /// The empty dict, Harmony's unit value.
    pub fn novalue() -> Value {
        NOVALUE.clone()
    }

    /// The empty address, printed as `None`.
    pub fn none_address() -> Value {
        NONE_ADDRESS.clone()
    }

    pub fn is_novalue(&self) -> bool {
        matches!(self, Value::Dict(d) if d.is_empty())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Atom(_) => "atom",
            Value::Pc(_) => "program counter",
            Value::Address(_) => "address",
            Value::Dict(_) => "dictionary",
            Value::Set(_) => "set",
            Value::Context(_) => "context",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&AtomStr> {
        match self {
            Value::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_pc(&self) -> Option<usize> {
        match self {
            Value::Pc(pc) => Some(*pc),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&[Value]> {
        match self {
            Value::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<&Arc<Context>> {
        match self {
            Value::Context(c) => Some(c),
            _ => None,
        }
    }

    /// Traverse a dict by an index path.
    pub fn iget(&self, path: &[Value]) -> Result<Value, Failure> {
        let mut current = self;
        for index in path {
            let dict = current.as_dict().ok_or_else(|| Failure::NotADictionary {
                found: current.type_name().to_string(),
            })?;
            current = dict.get(index).ok_or_else(|| Failure::NoSuchEntry {
                index: index.to_string(),
            })?;
        }
        Ok(current.clone())
    }

    /// Functional update: a copy of `self` with the entry at `path` set to
    /// `value`. Intermediate path components must exist and be dicts; the
    /// final component may be a fresh key.
    pub fn update(&self, path: &[Value], value: Value) -> Result<Value, Failure> {
        let (index, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(value),
        };
        let dict = self.as_dict().ok_or_else(|| Failure::NotADictionary {
            found: self.type_name().to_string(),
        })?;
        let new_entry = if rest.is_empty() {
            value
        } else {
            let inner = dict.get(index).ok_or_else(|| Failure::NoSuchEntry {
                index: index.to_string(),
            })?;
            inner.update(rest, value)?
        };
        let mut copy = dict.clone();
        copy.insert(index.clone(), new_entry);
        Ok(Value::dict(copy))
    }

    /// Functional deletion: a copy of `self` without the entry at `path`.
    /// Deleting a key that is already absent is a no-op.
    pub fn remove(&self, path: &[Value]) -> Result<Value, Failure> {
        let (index, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(self.clone()),
        };
        let dict = self.as_dict().ok_or_else(|| Failure::NotADictionary {
            found: self.type_name().to_string(),
        })?;
        let mut copy = dict.clone();
        if rest.is_empty() {
            copy.remove(index);
        } else {
            let inner = dict.get(index).ok_or_else(|| Failure::NoSuchEntry {
                index: index.to_string(),
            })?;
            copy.insert(index.clone(), inner.remove(rest)?);
        }
        Ok(Value::dict(copy))
    }
}

/// Content hash of a value, exposed to programs through the `hash` operator.
/// FxHasher is deterministic across runs, which keeps exploration
/// reproducible.
pub fn content_hash(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Atom(a) => write!(f, ".{a}"),
            Value::Pc(pc) => write!(f, "PC({pc})"),
            Value::Address(indexes) => {
                let (base, rest) = match indexes.split_first() {
                    Some(split) => split,
                    None => return write!(f, "None"),
                };
                match base {
                    Value::Atom(a) => write!(f, "&{a}")?,
                    other => write!(f, "&[{other}]")?,
                }
                for index in rest {
                    match index {
                        Value::Atom(a) => write!(f, ".{a}")?,
                        other => write!(f, "[{other}]")?,
                    }
                }
                Ok(())
            }
            Value::Dict(d) => {
                if d.is_empty() {
                    write!(f, "()")
                } else if d.is_list() {
                    write!(f, "[")?;
                    for (i, v) in d.values().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, "]")
                } else {
                    write!(f, "dict{{ ")?;
                    for (i, (k, v)) in d.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{k}:{v}")?;
                    }
                    write!(f, " }}")
                }
            }
            Value::Set(s) => {
                if s.is_empty() {
                    write!(f, "{{}}")
                } else {
                    write!(f, "{{ ")?;
                    for (i, v) in s.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, " }}")
                }
            }
            Value::Context(c) => write!(f, "{c}"),
        }
    }
}

/// Render a shared-variable record as `{a=1, b=2}` for report rows.
pub fn vars_string(vars: &Value) -> String {
    let mut out = String::from("{");
    if let Value::Dict(d) = vars {
        for (i, (k, v)) in d.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match k {
                Value::Atom(a) => out.push_str(a),
                other => out.push_str(&other.to_string()),
            }
            out.push('=');
            out.push_str(&v.to_string());
        }
    }
    out.push('}');
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn samples() -> Vec<Value> {
        vec![
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(Number::NegInf),
            Value::int(-3),
            Value::int(7),
            Value::Int(Number::PosInf),
            Value::atom("a"),
            Value::atom("b"),
            Value::Pc(2),
            Value::address(vec![Value::atom("x"), Value::int(0)]),
            Value::novalue(),
            Value::dict(Dict::from_entries([(Value::int(0), Value::int(9))])),
            Value::set(Set::from_members([Value::int(1)])),
        ]
    }

    #[test]
    fn ordering_is_total_and_consistent_with_equality() {
        let values = samples();
        for a in &values {
            for b in &values {
                match a.cmp(b) {
                    std::cmp::Ordering::Equal => assert_eq!(a, b),
                    _ => assert_ne!(a, b),
                }
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
            }
        }
    }

    #[test]
    fn variant_tags_order_before_content() {
        assert!(Value::Bool(true) < Value::int(i64::MIN));
        assert!(Value::Int(Number::PosInf) < Value::atom(""));
        assert!(Value::atom("zzz") < Value::Pc(0));
        assert!(Value::Pc(usize::MAX) < Value::none_address());
        assert!(Value::address(vec![Value::atom("z")]) < Value::novalue());
        assert!(Value::novalue() < Value::set(Set::new()));
    }

    #[test]
    fn dict_doubles_as_list() {
        let d = Dict::from_entries([
            (Value::int(1), Value::atom("b")),
            (Value::int(0), Value::atom("a")),
        ]);
        assert!(d.is_list());
        assert_eq!(Value::dict(d).to_string(), "[.a, .b]");

        let d = Dict::from_entries([(Value::atom("k"), Value::int(1))]);
        assert!(!d.is_list());
        assert_eq!(Value::dict(d).to_string(), "dict{ .k:1 }");
    }

    #[test]
    fn concat_renumbers_keys() {
        let a = Dict::from_entries([(Value::int(0), Value::int(10))]);
        let b = Dict::from_entries([
            (Value::int(0), Value::int(20)),
            (Value::int(1), Value::int(30)),
        ]);
        let c = a.concat(&b);
        assert!(c.is_list());
        assert_eq!(
            c.values().cloned().collect::<Vec<_>>(),
            vec![Value::int(10), Value::int(20), Value::int(30)]
        );
    }

    #[test]
    fn cut_pops_minimum_and_rebuilds() {
        let s = Set::from_members([Value::int(3), Value::int(1), Value::int(2)]);
        let (min, rest) = s.cut().unwrap();
        assert_eq!(min, Value::int(1));
        let rebuilt = rest.union(&Set::from_members([min]));
        assert_eq!(rebuilt, s);
    }

    #[test]
    fn update_and_remove_are_functional() {
        let root = Value::dict(Dict::from_entries([(
            Value::atom("a"),
            Value::dict(Dict::from_entries([(Value::int(0), Value::int(1))])),
        )]));
        let path = [Value::atom("a"), Value::int(0)];
        let updated = root.update(&path, Value::int(5)).unwrap();
        assert_eq!(updated.iget(&path).unwrap(), Value::int(5));
        assert_eq!(root.iget(&path).unwrap(), Value::int(1));

        let removed = updated.remove(&path).unwrap();
        assert!(removed.iget(&path).is_err());
        assert_eq!(updated.iget(&path).unwrap(), Value::int(5));
    }

    #[test]
    fn floor_division_follows_the_divisor_sign() {
        let div = |a: i64, b: i64| {
            Number::Finite(a)
                .floor_div(Number::Finite(b))
                .unwrap()
                .as_finite()
                .unwrap()
        };
        assert_eq!(div(7, 2), 3);
        assert_eq!(div(-7, 2), -4);
        assert_eq!(div(7, -2), -4);
        assert_eq!(div(-7, -2), 3);

        let modulo = |a: i64, b: i64| {
            Number::Finite(a)
                .floor_mod(Number::Finite(b))
                .unwrap()
                .as_finite()
                .unwrap()
        };
        assert_eq!(modulo(7, 3), 1);
        assert_eq!(modulo(-7, 3), 2);
        assert_eq!(modulo(7, -3), -2);
    }

    #[test]
    fn division_by_infinity_is_zero() {
        assert_eq!(
            Number::Finite(42).floor_div(Number::PosInf).unwrap(),
            Number::Finite(0)
        );
        assert_eq!(
            Number::Finite(42).floor_div(Number::NegInf).unwrap(),
            Number::Finite(0)
        );
        assert!(Number::Finite(1).floor_div(Number::Finite(0)).is_err());
    }

    #[test]
    fn display_matches_surface_syntax() {
        assert_eq!(Value::novalue().to_string(), "()");
        assert_eq!(Value::set(Set::new()).to_string(), "{}");
        assert_eq!(Value::atom("lock").to_string(), ".lock");
        assert_eq!(Value::Pc(3).to_string(), "PC(3)");
        assert_eq!(Value::none_address().to_string(), "None");
        assert_eq!(
            Value::address(vec![Value::atom("q"), Value::int(0), Value::atom("hd")]).to_string(),
            "&q[0].hd"
        );
        assert_eq!(Value::Int(Number::PosInf).to_string(), "inf");
    }

    #[test]
    fn content_hash_agrees_with_equality() {
        let a = Value::dict(Dict::from_entries([(Value::atom("x"), Value::int(1))]));
        let b = Value::dict(Dict::from_entries([(Value::atom("x"), Value::int(1))]));
        assert_eq!(content_hash(&a), content_hash(&b));
    }
}
