//! The default global environment.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::bytecode::value::{Builtin, NativeResult, Value};
use crate::bytecode::vm::VM;
use crate::error::RuntimeError;
use crate::types::{FunctionSignature, TypeSignature};

/// Names of every default global, in registration order.
pub const GLOBAL_NAMES: &[&str] = &[
    "write",
    "print",
    "format",
    "char",
    "byte",
    "assertEq",
    "assertNotEq",
    "str",
    "type",
    "exit",
];

lazy_static! {
    /// Compile-time view of the global environment: name to type signature.
    /// The compiler consults this to resolve references it cannot find on
    /// its symbol stack.
    pub static ref GLOBAL_SIGNATURES: HashMap<&'static str, TypeSignature> = GLOBAL_NAMES
        .iter()
        .map(|name| {
            let builtin = lookup(name).expect("registered global");
            (*name, TypeSignature::Function(builtin.signature))
        })
        .collect();
}

/// Whether a name is defined in the default global environment.
pub fn is_global(name: &str) -> bool {
    GLOBAL_SIGNATURES.contains_key(name)
}

/// Look up a default global by name, constructing a fresh unbound value.
pub fn lookup(name: &str) -> Option<Builtin> {
    let builtin = match name {
        "write" => Builtin::new(
            "write",
            FunctionSignature::new(vec![TypeSignature::String], TypeSignature::Nil),
            native_write,
        ),
        "print" => Builtin::new(
            "print",
            FunctionSignature::new(vec![TypeSignature::String], TypeSignature::Nil),
            native_print,
        ),
        "format" => Builtin::constant(
            "format",
            FunctionSignature::new(
                vec![
                    TypeSignature::String,
                    TypeSignature::List(Box::new(TypeSignature::Any)),
                ],
                TypeSignature::String,
            ),
            native_format,
        ),
        "char" => Builtin::constant(
            "char",
            FunctionSignature::new(vec![TypeSignature::Number], TypeSignature::String),
            native_char,
        ),
        "byte" => Builtin::constant(
            "byte",
            FunctionSignature::new(vec![TypeSignature::String], TypeSignature::Number),
            native_byte,
        ),
        "assertEq" => Builtin::new(
            "assertEq",
            FunctionSignature::new(
                vec![TypeSignature::Any, TypeSignature::Any],
                TypeSignature::Nil,
            ),
            native_assert_eq,
        ),
        "assertNotEq" => Builtin::new(
            "assertNotEq",
            FunctionSignature::new(
                vec![TypeSignature::Any, TypeSignature::Any],
                TypeSignature::Nil,
            ),
            native_assert_not_eq,
        ),
        "str" => Builtin::constant(
            "str",
            FunctionSignature::new(vec![TypeSignature::Any], TypeSignature::String),
            native_str,
        ),
        "type" => Builtin::constant(
            "type",
            FunctionSignature::new(vec![TypeSignature::Any], TypeSignature::String),
            native_type,
        ),
        "exit" => Builtin::new(
            "exit",
            FunctionSignature::new(vec![TypeSignature::Number], TypeSignature::Nil),
            native_exit,
        ),
        _ => return None,
    };

    Some(builtin)
}

/// The runtime global environment a fresh VM starts with.
pub fn default_globals() -> HashMap<String, Value> {
    GLOBAL_NAMES
        .iter()
        .map(|name| {
            let builtin = lookup(name).expect("registered global");
            (name.to_string(), Value::Builtin(builtin))
        })
        .collect()
}

fn native_write(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    println!("{}", args[0]);
    Ok(Value::Nil)
}

fn native_print(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    print!("{}", args[0]);
    Ok(Value::Nil)
}

/// Replace each `%` in the template with the display form of the next
/// argument.
fn native_format(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    let Value::String(template) = &args[0] else {
        return Err(RuntimeError::native("format requires a string template"));
    };
    let Value::List(values) = &args[1] else {
        return Err(RuntimeError::native("format requires a list of values"));
    };
    let values = values.borrow();

    let mut out = String::new();
    let mut next = 0;
    for part in template.split('%') {
        if next == 0 {
            out.push_str(part);
            next += 1;
            continue;
        }

        let Some(value) = values.get(next - 1) else {
            return Err(RuntimeError::native(format!(
                "format template needs at least {} values, got {}",
                next,
                values.len()
            )));
        };
        out.push_str(&value.to_string());
        out.push_str(part);
        next += 1;
    }

    Ok(Value::from(out))
}

/// Convert a byte to a one-character string. Operates on bytes, not
/// codepoints.
fn native_char(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    let Value::Number(n) = &args[0] else {
        return Err(RuntimeError::native("char requires a number"));
    };
    let byte = *n as u8;

    Ok(Value::from(
        String::from_utf8_lossy(&[byte]).into_owned(),
    ))
}

/// The first byte of a string. On multi-byte text this is the first byte of
/// the encoding, not the first codepoint.
fn native_byte(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    let Value::String(s) = &args[0] else {
        return Err(RuntimeError::native("byte requires a string"));
    };
    let Some(byte) = s.as_bytes().first() else {
        return Err(RuntimeError::native("byte of empty string"));
    };

    Ok(Value::Number(*byte as f64))
}

fn native_assert_eq(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    if !args[0].equals(&args[1]) {
        return Err(RuntimeError::native(format!(
            "assertion failed: {} does not equal {}",
            args[0].debug_string(),
            args[1].debug_string()
        )));
    }

    Ok(Value::Nil)
}

fn native_assert_not_eq(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    if args[0].equals(&args[1]) {
        return Err(RuntimeError::native(format!(
            "assertion failed: {} equals {}",
            args[0].debug_string(),
            args[1].debug_string()
        )));
    }

    Ok(Value::Nil)
}

fn native_str(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    Ok(Value::from(args[0].to_string()))
}

fn native_type(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    Ok(Value::from(args[0].signature().to_string()))
}

fn native_exit(_: Option<&mut VM>, _: Option<&Value>, args: &[Value]) -> NativeResult {
    let Value::Number(code) = &args[0] else {
        return Err(RuntimeError::native("exit requires a number"));
    };

    std::process::exit(*code as i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in GLOBAL_NAMES {
            assert!(lookup(name).is_some(), "missing global {}", name);
        }
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_constant_flags() {
        for name in ["format", "char", "byte", "str", "type"] {
            assert!(lookup(name).unwrap().constant, "{} should fold", name);
        }
        for name in ["write", "print", "assertEq", "assertNotEq", "exit"] {
            assert!(!lookup(name).unwrap().constant, "{} should not fold", name);
        }
    }

    #[test]
    fn test_format() {
        let result = native_format(
            None,
            None,
            &[
                Value::from("a % and %!"),
                Value::new_list(vec![Value::Number(1.0), Value::from("b")]),
            ],
        )
        .unwrap();
        assert_eq!(result.to_string(), "a 1 and b!");
    }

    #[test]
    fn test_format_with_too_few_values_errors() {
        let result = native_format(
            None,
            None,
            &[Value::from("% %"), Value::new_list(vec![Value::Number(1.0)])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_char_and_byte() {
        let c = native_char(None, None, &[Value::Number(65.0)]).unwrap();
        assert_eq!(c.to_string(), "A");

        let b = native_byte(None, None, &[Value::from("A")]).unwrap();
        assert!(b.equals(&Value::Number(65.0)));

        // multi-byte input: first byte of the encoding
        let b = native_byte(None, None, &[Value::from("é")]).unwrap();
        assert!(b.equals(&Value::Number(0xc3 as f64)));
    }

    #[test]
    fn test_assertions() {
        assert!(native_assert_eq(None, None, &[Value::Number(1.0), Value::Number(1.0)]).is_ok());
        assert!(native_assert_eq(None, None, &[Value::Number(1.0), Value::Number(2.0)]).is_err());
        assert!(
            native_assert_not_eq(None, None, &[Value::Number(1.0), Value::Number(2.0)]).is_ok()
        );
        assert!(
            native_assert_not_eq(None, None, &[Value::Number(1.0), Value::Number(1.0)]).is_err()
        );
    }

    #[test]
    fn test_type_renders_signatures() {
        let t = native_type(
            None,
            None,
            &[Value::new_list(vec![Value::Number(1.0), Value::Number(2.0)])],
        )
        .unwrap();
        assert_eq!(t.to_string(), "list[number]");

        let t = native_type(
            None,
            None,
            &[Value::new_list(vec![Value::Number(1.0), Value::from("a")])],
        )
        .unwrap();
        assert_eq!(t.to_string(), "list[any]");
    }
}
