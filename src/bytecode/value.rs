//! Runtime values and the prototype tables of the built-in types.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Parameter;
use crate::bytecode::chunk::Chunk;
use crate::bytecode::vm::VM;
use crate::error::RuntimeError;
use crate::types::{FunctionSignature, TypeSignature};

/// Result of a native function call.
pub type NativeResult = Result<Value, RuntimeError>;

/// A native callable: `(vm, receiver, args)`. The VM is absent when the
/// compiler folds a `Constant` builtin at compile time.
pub type NativeFn = fn(Option<&mut VM>, Option<&Value>, &[Value]) -> NativeResult;

/// A tagged runtime value.
///
/// Lists and objects are mutable containers behind shared handles; every
/// other variant is immutable after construction. `deep_clone` is what
/// variable declaration and assignment use, so independent variables never
/// alias.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<IndexMap<String, Value>>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    /// Wrapper naming a stack slot. Lives only on the value stack, between
    /// the stack base and the VM's `variable_end`.
    Variable(Box<Variable>),
}

/// A source-level function: its parameters, declared yield type and the
/// chunk holding its compiled body.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub yields: TypeSignature,
    pub chunk: Rc<Chunk>,
    /// Receiver bound by the last property access, if any.
    pub parent: Option<Value>,
}

/// A native function with its type signature. `constant` marks builtins the
/// compiler may evaluate at compile time.
#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub signature: FunctionSignature,
    pub f: NativeFn,
    pub parent: Option<Box<Value>>,
    pub constant: bool,
}

impl Builtin {
    pub fn new(name: &'static str, signature: FunctionSignature, f: NativeFn) -> Self {
        Self {
            name,
            signature,
            f,
            parent: None,
            constant: false,
        }
    }

    pub fn constant(name: &'static str, signature: FunctionSignature, f: NativeFn) -> Self {
        Self {
            name,
            signature,
            f,
            parent: None,
            constant: true,
        }
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("constant", &self.constant)
            .finish_non_exhaustive()
    }
}

/// A named variable on the value stack.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    /// Scope depth at declaration; never mutated afterwards.
    pub scope: usize,
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_object(members: IndexMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(members)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin function",
            Value::Variable(_) => "variable",
        }
    }

    /// The structural type signature of this value.
    pub fn signature(&self) -> TypeSignature {
        match self {
            Value::Nil => TypeSignature::Nil,
            Value::Bool(_) => TypeSignature::Boolean,
            Value::Number(_) => TypeSignature::Number,
            Value::String(_) => TypeSignature::String,
            Value::List(items) => {
                let signatures: Vec<TypeSignature> =
                    items.borrow().iter().map(Value::signature).collect();
                let contents =
                    TypeSignature::unify_all(&signatures).unwrap_or(TypeSignature::Any);
                TypeSignature::List(Box::new(contents))
            }
            Value::Object(members) => TypeSignature::Object(
                members
                    .borrow()
                    .iter()
                    .map(|(name, member)| (name.clone(), member.signature()))
                    .collect(),
            ),
            Value::Function(function) => TypeSignature::Function(FunctionSignature::new(
                function
                    .parameters
                    .iter()
                    .map(|p| p.signature.clone())
                    .collect(),
                function.yields.clone(),
            )),
            Value::Builtin(builtin) => TypeSignature::Function(builtin.signature.clone()),
            Value::Variable(_) => panic!("tried getting the signature of a variable wrapper"),
        }
    }

    /// Semantic equality, used by the constant pool, `==`/`!=` and the
    /// assertion builtins.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(name, x)| b.get(name).is_some_and(|y| x.equals(y)))
            }
            (Value::Function(a), Value::Function(b)) => {
                a.name == b.name && Rc::ptr_eq(&a.chunk, &b.chunk)
            }
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Variable(a), Value::Variable(b)) => {
                a.name == b.name && a.value.equals(&b.value)
            }
            _ => false,
        }
    }

    /// Structurally deep copy: containers are duplicated recursively, every
    /// other variant is a cheap handle copy.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(items) => {
                Value::new_list(items.borrow().iter().map(Value::deep_clone).collect())
            }
            Value::Object(members) => Value::new_object(
                members
                    .borrow()
                    .iter()
                    .map(|(name, member)| (name.clone(), member.deep_clone()))
                    .collect(),
            ),
            Value::Variable(variable) => Value::Variable(Box::new(Variable {
                name: variable.name.clone(),
                value: variable.value.deep_clone(),
                scope: variable.scope,
            })),
            other => other.clone(),
        }
    }

    /// Debug form: like `Display`, but strings keep their quotes. Used when
    /// rendering list items and diagnostics.
    pub fn debug_string(&self) -> String {
        match self {
            Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        }
    }

    /// Get a member from the value: instance members for objects, then the
    /// prototype table of the receiver's type.
    pub fn get(&self, key: &str) -> Result<Value, RuntimeError> {
        match self {
            Value::String(_) => string_prototype(key).map(Value::Builtin).ok_or_else(|| {
                RuntimeError::native(format!("string has no property \"{}\"", key))
            }),
            Value::List(_) => list_prototype(key)
                .map(Value::Builtin)
                .ok_or_else(|| RuntimeError::native(format!("list has no property \"{}\"", key))),
            Value::Object(members) => {
                if let Some(member) = members.borrow().get(key) {
                    return Ok(member.clone());
                }
                object_prototype(key).map(Value::Builtin).ok_or_else(|| {
                    RuntimeError::native(format!("no property found with name \"{}\"", key))
                })
            }
            Value::Nil => Err(RuntimeError::native("nil has no properties")),
            Value::Bool(_) => Err(RuntimeError::native("booleans have no properties")),
            Value::Number(_) => Err(RuntimeError::native("numbers have no properties")),
            Value::Function(_) | Value::Builtin(_) => {
                Err(RuntimeError::native("functions have no properties"))
            }
            Value::Variable(_) => Err(RuntimeError::native("variables have no properties")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.debug_string())?;
                }
                write!(f, "]")
            }
            Value::Object(members) => {
                write!(f, "{{")?;
                for (i, (name, member)) in members.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"={}", name, member)?;
                }
                write!(f, "}}")
            }
            Value::Function(function) => write!(f, "<function name={}>", function.name),
            Value::Builtin(builtin) => write!(f, "<function name={} builtin>", builtin.name),
            Value::Variable(variable) => write!(
                f,
                "<variable name={} value={} scope={}>",
                variable.name, variable.value, variable.scope
            ),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(Rc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::new_list(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(members: IndexMap<String, Value>) -> Value {
        Value::new_object(members)
    }
}

// ===== Prototype tables =====
//
// A prototype is a fixed table of methods per built-in value kind. Builtins
// are interned by name; every lookup constructs a fresh unbound value whose
// receiver is attached on property access.

/// Methods available on every string.
pub fn string_prototype(name: &str) -> Option<Builtin> {
    match name {
        "split" => Some(Builtin::new(
            "split",
            FunctionSignature::new(
                vec![TypeSignature::String],
                TypeSignature::List(Box::new(TypeSignature::String)),
            ),
            native_string_split,
        )),
        "length" => Some(Builtin::new(
            "length",
            FunctionSignature::new(vec![], TypeSignature::Number),
            native_string_length,
        )),
        _ => None,
    }
}

/// Methods available on every list.
pub fn list_prototype(name: &str) -> Option<Builtin> {
    match name {
        "append" => Some(Builtin::new(
            "append",
            FunctionSignature::new(vec![TypeSignature::Any], TypeSignature::Nil),
            native_list_append,
        )),
        "at" => Some(Builtin::new(
            "at",
            FunctionSignature::new(vec![TypeSignature::Number], TypeSignature::Inner),
            native_list_at,
        )),
        "length" => Some(Builtin::new(
            "length",
            FunctionSignature::new(vec![], TypeSignature::Number),
            native_list_length,
        )),
        "map" => Some(Builtin::new(
            "map",
            FunctionSignature::new(
                vec![TypeSignature::Function(FunctionSignature::new(
                    vec![TypeSignature::Inner],
                    TypeSignature::Inner,
                ))],
                TypeSignature::List(Box::new(TypeSignature::Inner)),
            ),
            native_list_map,
        )),
        "reduce" => Some(Builtin::new(
            "reduce",
            FunctionSignature::new(
                vec![TypeSignature::Any, TypeSignature::Any],
                TypeSignature::Any,
            ),
            native_list_reduce,
        )),
        _ => None,
    }
}

/// Methods available on every object.
pub fn object_prototype(name: &str) -> Option<Builtin> {
    match name {
        "set" => Some(Builtin::new(
            "set",
            FunctionSignature::new(
                vec![TypeSignature::String, TypeSignature::Any],
                TypeSignature::Nil,
            ),
            native_object_set,
        )),
        _ => None,
    }
}

fn receiver(parent: Option<&Value>, method: &str) -> Result<Value, RuntimeError> {
    parent.cloned().ok_or_else(|| {
        RuntimeError::native(format!("{} called without a receiver", method))
    })
}

fn as_list(value: &Value, method: &str) -> Result<Rc<RefCell<Vec<Value>>>, RuntimeError> {
    match value {
        Value::List(items) => Ok(items.clone()),
        other => Err(RuntimeError::native(format!(
            "{} requires a list receiver, got {}",
            method,
            other.type_name()
        ))),
    }
}

fn native_string_split(_: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let this = receiver(parent, "split")?;
    let (Value::String(text), Value::String(separator)) = (&this, &args[0]) else {
        return Err(RuntimeError::native("split requires string arguments"));
    };

    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::from(c.to_string())).collect()
    } else {
        text.split(separator.as_ref()).map(Value::from).collect()
    };

    Ok(Value::new_list(parts))
}

fn native_string_length(_: Option<&mut VM>, parent: Option<&Value>, _: &[Value]) -> NativeResult {
    let this = receiver(parent, "length")?;
    let Value::String(text) = &this else {
        return Err(RuntimeError::native("length requires a string receiver"));
    };

    Ok(Value::Number(text.len() as f64))
}

fn native_list_append(_: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let this = receiver(parent, "append")?;
    let items = as_list(&this, "append")?;
    items.borrow_mut().push(args[0].clone());

    Ok(Value::Nil)
}

fn native_list_at(_: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let this = receiver(parent, "at")?;
    let items = as_list(&this, "at")?;
    let Value::Number(index) = &args[0] else {
        return Err(RuntimeError::native("at requires a number index"));
    };
    let index = *index;

    let items = items.borrow();
    if index < 0.0 || index as usize >= items.len() {
        return Err(RuntimeError::native(format!(
            "list index {} out of range",
            index
        )));
    }

    Ok(items[index as usize].clone())
}

fn native_list_length(_: Option<&mut VM>, parent: Option<&Value>, _: &[Value]) -> NativeResult {
    let this = receiver(parent, "length")?;
    let items = as_list(&this, "length")?;
    let length = items.borrow().len();

    Ok(Value::Number(length as f64))
}

fn native_list_map(vm: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let vm = vm.ok_or_else(|| RuntimeError::native("map requires a running vm"))?;
    let this = receiver(parent, "map")?;
    let items = as_list(&this, "map")?;
    let f = &args[0];

    if !matches!(f, Value::Function(_) | Value::Builtin(_)) {
        return Err(RuntimeError::native(format!(
            "not a function to apply: {}",
            f.debug_string()
        )));
    }

    // items are replaced in place; the borrow must not be held across the
    // re-entrant call
    let length = items.borrow().len();
    for i in 0..length {
        let item = items.borrow()[i].clone();
        let mapped = vm.call(f.clone(), vec![item])?;
        items.borrow_mut()[i] = mapped;
    }

    Ok(this)
}

fn native_list_reduce(vm: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let vm = vm.ok_or_else(|| RuntimeError::native("reduce requires a running vm"))?;
    let this = receiver(parent, "reduce")?;
    let items = as_list(&this, "reduce")?;
    let f = &args[0];
    let mut accumulator = args[1].clone();

    let length = items.borrow().len();
    for i in 0..length {
        let item = items.borrow()[i].clone();
        accumulator = vm.call(f.clone(), vec![accumulator, item])?;
    }

    Ok(accumulator)
}

fn native_object_set(_: Option<&mut VM>, parent: Option<&Value>, args: &[Value]) -> NativeResult {
    let this = receiver(parent, "set")?;
    let Value::Object(members) = &this else {
        return Err(RuntimeError::native("set requires an object receiver"));
    };
    let Value::String(name) = &args[0] else {
        return Err(RuntimeError::native("set requires a string member name"));
    };

    members
        .borrow_mut()
        .insert(name.to_string(), args[1].clone());

    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_of_values() {
        assert_eq!(Value::Nil.signature(), TypeSignature::Nil);
        assert_eq!(Value::Number(1.0).signature(), TypeSignature::Number);
        assert_eq!(Value::from("x").signature(), TypeSignature::String);
        assert_eq!(
            Value::new_list(vec![Value::Number(1.0), Value::Number(2.0)]).signature(),
            TypeSignature::List(Box::new(TypeSignature::Number))
        );
    }

    #[test]
    fn test_mixed_list_signature_widens_to_any() {
        let mixed = Value::new_list(vec![Value::Number(1.0), Value::from("a")]);
        assert_eq!(mixed.signature().to_string(), "list[any]");
    }

    #[test]
    fn test_empty_list_signature() {
        assert_eq!(Value::new_list(vec![]).signature().to_string(), "list[any]");
    }

    #[test]
    fn test_equals_is_semantic() {
        assert!(Value::Number(1.0).equals(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).equals(&Value::from("1")));
        assert!(Value::new_list(vec![Value::Number(1.0)])
            .equals(&Value::new_list(vec![Value::Number(1.0)])));
        assert!(!Value::new_list(vec![Value::Number(1.0)])
            .equals(&Value::new_list(vec![Value::Number(2.0)])));
    }

    #[test]
    fn test_deep_clone_does_not_alias() {
        let original = Value::new_list(vec![Value::Number(1.0)]);
        let copy = original.deep_clone();

        if let Value::List(items) = &original {
            items.borrow_mut().push(Value::Number(2.0));
        }

        if let Value::List(items) = &copy {
            assert_eq!(items.borrow().len(), 1);
        } else {
            panic!("clone changed the variant");
        }
    }

    #[test]
    fn test_shallow_clone_aliases() {
        let original = Value::new_list(vec![Value::Number(1.0)]);
        let alias = original.clone();

        if let Value::List(items) = &original {
            items.borrow_mut().push(Value::Number(2.0));
        }

        if let Value::List(items) = &alias {
            assert_eq!(items.borrow().len(), 2);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(
            Value::new_list(vec![Value::Number(1.0), Value::from("a")]).to_string(),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn test_prototype_lookup() {
        assert!(string_prototype("split").is_some());
        assert!(string_prototype("reverse").is_none());
        assert!(list_prototype("map").is_some());
        assert!(object_prototype("set").is_some());
    }

    #[test]
    fn test_get_on_primitives_errors() {
        assert!(Value::Nil.get("x").is_err());
        assert!(Value::Number(1.0).get("x").is_err());
    }
}
