//! Compiled programs and their JSON wire format.
//!
//! The surface compiler is a separate tool; its contract with the checker
//! is a JSON document holding the opcode vector plus label, location,
//! constant and module tables. Values travel as tagged objects
//! (`{"type": "int", "value": "3"}`); named constants are closed code
//! slices evaluated at load time by the same VM that runs the model.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::errors::CompileError;
use crate::eval::eval_constant;
use crate::opcodes::{NaryOp, Opcode};
use crate::value::{Dict, Number, Set, Value};

/// Source position of an instruction, for listings and reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub code: Vec<Opcode>,
    /// Label name to pc; consulted by the `atLabel` operator.
    pub labels: FxHashMap<String, usize>,
    pub locations: FxHashMap<usize, SourceLoc>,
    /// Compile-time constants after evaluation.
    pub constants: BTreeMap<String, Value>,
    /// Module versions the compiler selected.
    pub modules: BTreeMap<String, String>,
}

impl Program {
    /// A bare program, mainly for building instruction sequences in tests.
    pub fn new(code: Vec<Opcode>) -> Program {
        Program {
            code,
            ..Program::default()
        }
    }

    pub fn with_label(mut self, name: &str, pc: usize) -> Program {
        self.labels.insert(name.to_string(), pc);
        self
    }

    pub fn load(
        path: &Path,
        consts: &[(String, Value)],
        mods: &[(String, String)],
    ) -> Result<Program, CompileError> {
        let filename = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompileError::new(&filename, format!("cannot read file: {e}")))?;
        Program::from_json_str(&text, &filename, consts, mods)
    }

    pub fn from_json_str(
        text: &str,
        filename: &str,
        consts: &[(String, Value)],
        mods: &[(String, String)],
    ) -> Result<Program, CompileError> {
        let doc: Json = serde_json::from_str(text).map_err(|e| CompileError {
            message: format!("malformed program document: {e}"),
            filename: filename.to_string(),
            line: e.line() as u32,
            column: e.column() as u32,
            lexeme: None,
            is_eof: e.is_eof(),
        })?;
        let doc = doc
            .as_object()
            .ok_or_else(|| CompileError::new(filename, "program document must be an object"))?;

        let mut program = Program::default();

        if let Some(modules) = doc.get("modules") {
            let modules = modules
                .as_object()
                .ok_or_else(|| CompileError::new(filename, "modules must be an object"))?;
            for (name, version) in modules {
                let version = version.as_str().ok_or_else(|| {
                    CompileError::new(filename, format!("module {name} version must be a string"))
                })?;
                program.modules.insert(name.clone(), version.to_string());
            }
        }
        for (name, version) in mods {
            match program.modules.get(name) {
                Some(compiled) if compiled == version => {}
                Some(compiled) => {
                    return Err(CompileError::new(
                        filename,
                        format!(
                            "module {name} version mismatch: compiled with {compiled}, requested {version}"
                        ),
                    )
                    .with_lexeme(name.clone()));
                }
                None => {
                    return Err(CompileError::new(filename, format!("unknown module {name}"))
                        .with_lexeme(name.clone()));
                }
            }
        }

        // Constants: command-line overrides win over the compiled slices.
        let overridden: BTreeMap<&str, &Value> =
            consts.iter().map(|(n, v)| (n.as_str(), v)).collect();
        if let Some(constants) = doc.get("constants") {
            let constants = constants
                .as_object()
                .ok_or_else(|| CompileError::new(filename, "constants must be an object"))?;
            for (name, slice) in constants {
                if overridden.contains_key(name.as_str()) {
                    continue;
                }
                let slice = slice.as_array().ok_or_else(|| {
                    CompileError::new(filename, format!("constant {name} must be a code slice"))
                })?;
                let empty = BTreeMap::new();
                let mut code = Vec::with_capacity(slice.len());
                for (pc, entry) in slice.iter().enumerate() {
                    code.push(opcode_from_json(entry, &empty, filename, pc)?);
                }
                let value = eval_constant(code, name, filename)?;
                program.constants.insert(name.clone(), value);
            }
        }
        for (name, value) in consts {
            program.constants.insert(name.clone(), value.clone());
        }

        let code = doc
            .get("code")
            .and_then(Json::as_array)
            .ok_or_else(|| CompileError::new(filename, "missing code array"))?;
        for (pc, entry) in code.iter().enumerate() {
            program
                .code
                .push(opcode_from_json(entry, &program.constants, filename, pc)?);
        }

        if let Some(labels) = doc.get("labels") {
            let labels = labels
                .as_object()
                .ok_or_else(|| CompileError::new(filename, "labels must be an object"))?;
            for (name, pc) in labels {
                let pc = pc.as_u64().ok_or_else(|| {
                    CompileError::new(filename, format!("label {name} must map to a pc"))
                })?;
                program.labels.insert(name.clone(), pc as usize);
            }
        }

        if let Some(locations) = doc.get("locations") {
            let locations = locations
                .as_object()
                .ok_or_else(|| CompileError::new(filename, "locations must be an object"))?;
            for (pc, loc) in locations {
                let pc: usize = pc.parse().map_err(|_| {
                    CompileError::new(filename, format!("location key {pc} is not a pc"))
                })?;
                let obj = loc.as_object().ok_or_else(|| {
                    CompileError::new(filename, format!("location for pc {pc} must be an object"))
                })?;
                let file = obj
                    .get("file")
                    .and_then(Json::as_str)
                    .unwrap_or(filename)
                    .to_string();
                let line = obj.get("line").and_then(Json::as_u64).unwrap_or(0) as u32;
                program.locations.insert(pc, SourceLoc { file, line });
            }
        }

        program.validate(filename)?;
        Ok(program)
    }

    /// Static checks of the compiler contract.
    pub fn validate(&self, filename: &str) -> Result<(), CompileError> {
        if self.code.is_empty() {
            return Err(CompileError::new(filename, "empty program"));
        }
        if !matches!(self.code.last(), Some(Opcode::Return)) {
            return Err(CompileError::new(
                filename,
                "program must end with Return",
            ));
        }
        let len = self.code.len();
        for (pc, op) in self.code.iter().enumerate() {
            let target = match op {
                Opcode::Jump(t) | Opcode::JumpCond(_, t) => Some(*t),
                Opcode::Push(Value::Pc(t)) => Some(*t),
                _ => None,
            };
            if let Some(target) = target
                && target >= len
            {
                return Err(CompileError::new(
                    filename,
                    format!("pc {pc}: target {target} out of range"),
                ));
            }
            if matches!(op, Opcode::Stop(_))
                && !matches!(self.code.get(pc + 1), Some(Opcode::Continue))
            {
                return Err(CompileError::new(
                    filename,
                    format!("pc {pc}: Stop must be followed by Continue"),
                ));
            }
        }
        for (label, pc) in &self.labels {
            if *pc >= len {
                return Err(CompileError::new(
                    filename,
                    format!("label {label} points outside the program"),
                ));
            }
        }
        Ok(())
    }

    /// The `-a` instruction listing: pcs and opcodes, with source
    /// positions interleaved where they change.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        let mut last: Option<&SourceLoc> = None;
        for (pc, op) in self.code.iter().enumerate() {
            if let Some(loc) = self.locations.get(&pc)
                && last != Some(loc)
            {
                out.push_str(&format!("{}:{}\n", loc.file, loc.line));
                last = Some(loc);
            }
            out.push_str(&format!("  {pc} {op}\n"));
        }
        out
    }
}

/// Parse a `-c NAME=EXPR` literal: either a tagged value object or a bare
/// JSON scalar (number, boolean, or string for an atom).
pub fn parse_literal(expr: &str) -> Result<Value, CompileError> {
    const ORIGIN: &str = "<constant argument>";
    let js: Json = serde_json::from_str(expr)
        .map_err(|e| CompileError::new(ORIGIN, format!("malformed literal: {e}")))?;
    if js.is_object() {
        return value_from_json(&js, ORIGIN);
    }
    match js {
        Json::Bool(b) => Ok(Value::Bool(b)),
        Json::Null => Ok(Value::none_address()),
        scalar => {
            let tag = if scalar.is_number() { "int" } else { "atom" };
            value_from_json(&serde_json::json!({"type": tag, "value": scalar}), ORIGIN)
        }
    }
}

fn field<'j>(
    obj: &'j serde_json::Map<String, Json>,
    key: &str,
    filename: &str,
    pc: usize,
) -> Result<&'j Json, CompileError> {
    obj.get(key).ok_or_else(|| {
        CompileError::new(filename, format!("pc {pc}: missing {key} operand"))
    })
}

fn field_usize(
    obj: &serde_json::Map<String, Json>,
    key: &str,
    filename: &str,
    pc: usize,
) -> Result<usize, CompileError> {
    field(obj, key, filename, pc)?
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| {
            CompileError::new(filename, format!("pc {pc}: {key} operand must be a number"))
        })
}

fn field_atom(
    obj: &serde_json::Map<String, Json>,
    key: &str,
    filename: &str,
    pc: usize,
) -> Result<Arc<str>, CompileError> {
    field(obj, key, filename, pc)?
        .as_str()
        .map(Arc::from)
        .ok_or_else(|| {
            CompileError::new(filename, format!("pc {pc}: {key} operand must be a string"))
        })
}

fn optional_name(
    obj: &serde_json::Map<String, Json>,
    filename: &str,
    pc: usize,
) -> Result<Option<Arc<str>>, CompileError> {
    match obj.get("name") {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(Arc::from(s.as_str()))),
        Some(_) => Err(CompileError::new(
            filename,
            format!("pc {pc}: name operand must be a string"),
        )),
    }
}

fn opcode_from_json(
    entry: &Json,
    constants: &BTreeMap<String, Value>,
    filename: &str,
    pc: usize,
) -> Result<Opcode, CompileError> {
    let obj = entry.as_object().ok_or_else(|| {
        CompileError::new(filename, format!("instruction {pc} is not an object"))
    })?;
    let op = obj
        .get("op")
        .and_then(Json::as_str)
        .ok_or_else(|| CompileError::new(filename, format!("instruction {pc} has no op")))?;

    let opcode = match op {
        "Push" => {
            if let Some(name) = obj.get("const").and_then(Json::as_str) {
                let value = constants.get(name).ok_or_else(|| {
                    CompileError::new(filename, format!("pc {pc}: unknown constant {name}"))
                        .with_lexeme(name)
                })?;
                Opcode::Push(value.clone())
            } else {
                Opcode::Push(value_from_json(field(obj, "value", filename, pc)?, filename)?)
            }
        }
        "Pop" => Opcode::Pop,
        "Dup" => Opcode::Dup,
        "Move" => Opcode::Move(field_usize(obj, "n", filename, pc)?),
        "Split" => Opcode::Split,
        "Cut" => Opcode::Cut,
        "LoadVar" => Opcode::LoadVar(optional_name(obj, filename, pc)?),
        "StoreVar" => Opcode::StoreVar(optional_name(obj, filename, pc)?),
        "DelVar" => Opcode::DelVar(optional_name(obj, filename, pc)?),
        "PushAddress" => Opcode::PushAddress(field_atom(obj, "name", filename, pc)?),
        "Address" => Opcode::Address(field_usize(obj, "n", filename, pc)?),
        "Load" => Opcode::Load(optional_name(obj, filename, pc)?),
        "Store" => Opcode::Store(optional_name(obj, filename, pc)?),
        "Del" => Opcode::Del(optional_name(obj, filename, pc)?),
        "Stop" => Opcode::Stop(optional_name(obj, filename, pc)?),
        "Continue" => Opcode::Continue,
        "Jump" => Opcode::Jump(field_usize(obj, "pc", filename, pc)?),
        "JumpCond" => Opcode::JumpCond(
            value_from_json(field(obj, "cond", filename, pc)?, filename)?,
            field_usize(obj, "pc", filename, pc)?,
        ),
        "Set" => Opcode::Set,
        "Dict" => Opcode::Dict,
        "Nary" => {
            let symbol = field(obj, "operator", filename, pc)?
                .as_str()
                .ok_or_else(|| {
                    CompileError::new(filename, format!("pc {pc}: operator must be a string"))
                })?;
            let operator = NaryOp::from_str(symbol).map_err(|_| {
                CompileError::new(filename, format!("pc {pc}: unknown operator {symbol}"))
                    .with_lexeme(symbol)
            })?;
            Opcode::Nary(operator, field_usize(obj, "arity", filename, pc)?)
        }
        "Apply" => Opcode::Apply,
        "Frame" => {
            let name = field_atom(obj, "name", filename, pc)?;
            let mut args = Vec::new();
            if let Some(list) = obj.get("args") {
                let list = list.as_array().ok_or_else(|| {
                    CompileError::new(filename, format!("pc {pc}: args must be an array"))
                })?;
                for arg in list {
                    args.push(arg.as_str().map(Arc::from).ok_or_else(|| {
                        CompileError::new(
                            filename,
                            format!("pc {pc}: argument names must be strings"),
                        )
                    })?);
                }
            }
            Opcode::Frame { name, args }
        }
        "Return" => Opcode::Return,
        "Spawn" => Opcode::Spawn,
        "Trap" => Opcode::Trap,
        "Go" => Opcode::Go,
        "AtomicInc" => Opcode::AtomicInc,
        "AtomicDec" => Opcode::AtomicDec,
        "Choose" => Opcode::Choose,
        "Assert" => Opcode::Assert(obj.get("expr").and_then(Json::as_bool).unwrap_or(false)),
        other => {
            return Err(
                CompileError::new(filename, format!("pc {pc}: unknown opcode {other}"))
                    .with_lexeme(other),
            );
        }
    };
    Ok(opcode)
}

/// Decode a tagged value object.
pub fn value_from_json(js: &Json, filename: &str) -> Result<Value, CompileError> {
    let obj = js
        .as_object()
        .ok_or_else(|| CompileError::new(filename, "value must be a tagged object"))?;
    let tag = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| CompileError::new(filename, "value has no type tag"))?;
    let body = obj
        .get("value")
        .ok_or_else(|| CompileError::new(filename, format!("{tag} value has no payload")))?;

    match tag {
        "bool" => match body {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) if s == "True" => Ok(Value::Bool(true)),
            Json::String(s) if s == "False" => Ok(Value::Bool(false)),
            _ => Err(CompileError::new(filename, "malformed boolean value")),
        },
        "int" => match body {
            Json::Number(n) => n
                .as_i64()
                .map(Value::int)
                .ok_or_else(|| CompileError::new(filename, "integer out of range")),
            Json::String(s) => s
                .parse::<Number>()
                .map(Value::Int)
                .map_err(|_| CompileError::new(filename, format!("malformed integer {s}"))),
            _ => Err(CompileError::new(filename, "malformed integer value")),
        },
        "atom" => body
            .as_str()
            .map(Value::atom)
            .ok_or_else(|| CompileError::new(filename, "malformed atom value")),
        "pc" => body
            .as_u64()
            .map(|pc| Value::Pc(pc as usize))
            .ok_or_else(|| CompileError::new(filename, "malformed pc value")),
        "set" => {
            let list = body
                .as_array()
                .ok_or_else(|| CompileError::new(filename, "set value must be a list"))?;
            let mut members = Vec::with_capacity(list.len());
            for member in list {
                members.push(value_from_json(member, filename)?);
            }
            Ok(Value::set(Set::from_members(members)))
        }
        "dict" => {
            let list = body
                .as_array()
                .ok_or_else(|| CompileError::new(filename, "dict value must be a list"))?;
            let mut dict = Dict::new();
            for pair in list {
                let pair = pair.as_object().ok_or_else(|| {
                    CompileError::new(filename, "dict entries must be key/value objects")
                })?;
                let key = pair
                    .get("key")
                    .ok_or_else(|| CompileError::new(filename, "dict entry missing key"))?;
                let value = pair
                    .get("value")
                    .ok_or_else(|| CompileError::new(filename, "dict entry missing value"))?;
                dict.insert(
                    value_from_json(key, filename)?,
                    value_from_json(value, filename)?,
                );
            }
            Ok(Value::dict(dict))
        }
        "address" => {
            let list = body
                .as_array()
                .ok_or_else(|| CompileError::new(filename, "address value must be a list"))?;
            let mut indexes = Vec::with_capacity(list.len());
            for index in list {
                indexes.push(value_from_json(index, filename)?);
            }
            Ok(Value::address(indexes))
        }
        "context" => Err(CompileError::new(
            filename,
            "context values cannot appear in compiled programs",
        )),
        other => Err(
            CompileError::new(filename, format!("unknown value type {other}")).with_lexeme(other),
        ),
    }
}

/// Encode a value as a tagged object, for the state-graph dump.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => serde_json::json!({"type": "bool", "value": b}),
        Value::Int(n) => serde_json::json!({"type": "int", "value": n.to_string()}),
        Value::Atom(a) => serde_json::json!({"type": "atom", "value": a.as_ref()}),
        Value::Pc(pc) => serde_json::json!({"type": "pc", "value": pc}),
        Value::Address(indexes) => {
            let list: Vec<Json> = indexes.iter().map(value_to_json).collect();
            serde_json::json!({"type": "address", "value": list})
        }
        Value::Dict(d) => {
            let list: Vec<Json> = d
                .iter()
                .map(|(k, v)| serde_json::json!({"key": value_to_json(k), "value": value_to_json(v)}))
                .collect();
            serde_json::json!({"type": "dict", "value": list})
        }
        Value::Set(s) => {
            let list: Vec<Json> = s.iter().map(value_to_json).collect();
            serde_json::json!({"type": "set", "value": list})
        }
        Value::Context(c) => serde_json::json!({
            "type": "context",
            "value": {"name": value_to_json(&c.nametag), "pc": c.pc},
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_encode_round_trips() {
        let value = Value::dict(Dict::from_entries([
            (Value::atom("xs"), Value::set(Set::from_members([
                Value::int(1),
                Value::Int(Number::PosInf),
            ]))),
            (Value::int(0), Value::address(vec![Value::atom("a"), Value::int(2)])),
        ]));
        let encoded = value_to_json(&value);
        let decoded = value_from_json(&encoded, "t").unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn loads_a_minimal_program() {
        let text = r#"{
            "code": [
                {"op": "Push", "value": {"type": "int", "value": "3"}},
                {"op": "Store", "name": "x"},
                {"op": "Return"}
            ],
            "labels": {"end": 2},
            "locations": {"0": {"file": "t.hny", "line": 1}}
        }"#;
        let program = Program::from_json_str(text, "t.json", &[], &[]).unwrap();
        assert_eq!(program.code.len(), 3);
        assert_eq!(program.labels["end"], 2);
        assert_eq!(
            program.code[1],
            Opcode::Store(Some(Arc::from("x")))
        );
        let listing = program.listing();
        assert!(listing.starts_with("t.hny:1\n  0 Push 3\n"));
    }

    #[test]
    fn named_constants_resolve_and_can_be_overridden() {
        let text = r#"{
            "code": [
                {"op": "Push", "const": "N"},
                {"op": "Return"}
            ],
            "constants": {
                "N": [
                    {"op": "Push", "value": {"type": "int", "value": "2"}},
                    {"op": "Push", "value": {"type": "int", "value": "3"}},
                    {"op": "Nary", "operator": "+", "arity": 2}
                ]
            }
        }"#;
        let program = Program::from_json_str(text, "t.json", &[], &[]).unwrap();
        assert_eq!(program.code[0], Opcode::Push(Value::int(5)));

        let over = [("N".to_string(), Value::int(9))];
        let program = Program::from_json_str(text, "t.json", &over, &[]).unwrap();
        assert_eq!(program.code[0], Opcode::Push(Value::int(9)));
    }

    #[test]
    fn module_version_mismatch_is_a_compile_error() {
        let text = r#"{
            "code": [{"op": "Return"}],
            "modules": {"synch": "v2"}
        }"#;
        assert!(Program::from_json_str(text, "t.json", &[], &[]).is_ok());
        let mods = [("synch".to_string(), "v1".to_string())];
        let err = Program::from_json_str(text, "t.json", &[], &mods).unwrap_err();
        assert!(err.message.contains("version mismatch"));
    }

    #[test]
    fn validation_rejects_broken_programs() {
        let missing_return = Program::new(vec![Opcode::Push(Value::int(1))]);
        assert!(missing_return.validate("t").is_err());

        let bad_jump = Program::new(vec![Opcode::Jump(9), Opcode::Return]);
        assert!(bad_jump.validate("t").is_err());

        let lone_stop = Program::new(vec![Opcode::Stop(None), Opcode::Return]);
        assert!(lone_stop.validate("t").is_err());
    }

    #[test]
    fn literal_forms() {
        assert_eq!(parse_literal("5").unwrap(), Value::int(5));
        assert_eq!(parse_literal("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_literal("\"lock\"").unwrap(), Value::atom("lock"));
        assert_eq!(
            parse_literal(r#"{"type": "set", "value": [{"type": "int", "value": "1"}]}"#).unwrap(),
            Value::set(Set::from_members([Value::int(1)]))
        );
        assert!(parse_literal("{oops").is_err());
    }
}
