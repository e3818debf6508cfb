//! Binary encoding of compiled chunks.
//!
//! A self-describing, length-prefixed big-endian format: a header, the raw
//! bytecode, then the constant pool with one tag byte per constant.
//! Function constants recurse into their own chunk, so the decoder recovers
//! the full chunk graph. Builtin functions live in the global environment,
//! never in constant pools, and are not encodable.

use std::io::{self, Write};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Parameter;
use crate::bytecode::chunk::Chunk;
use crate::bytecode::value::{Function, Value};
use crate::error::DecodeError;
use crate::types::{FunctionSignature, TypeSignature};

const MAGIC: &[u8; 4] = b"LUME";
const VERSION: u8 = 1;

mod value_tag {
    pub const NIL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const NUMBER: u8 = 2;
    pub const STRING: u8 = 3;
    pub const LIST: u8 = 4;
    pub const OBJECT: u8 = 5;
    pub const FUNCTION: u8 = 6;
}

mod sig_tag {
    pub const NIL: u8 = 0;
    pub const STRING: u8 = 1;
    pub const NUMBER: u8 = 2;
    pub const BOOLEAN: u8 = 3;
    pub const LIST: u8 = 4;
    pub const OBJECT: u8 = 5;
    pub const FUNCTION: u8 = 6;
    pub const ANY: u8 = 7;
    pub const COMPOSITE: u8 = 8;
    pub const INNER: u8 = 9;
}

/// Encode a chunk into a standalone byte buffer.
pub fn encode_chunk(chunk: &Chunk) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_all(MAGIC)?;
    wr_u8(&mut out, VERSION)?;
    wr_chunk(&mut out, chunk)?;
    Ok(out)
}

/// Decode a buffer produced by [`encode_chunk`] back into an identical
/// chunk.
pub fn decode_chunk(bytes: &[u8]) -> Result<Chunk, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    rd_chunk(&mut reader)
}

fn wr_chunk<W: Write>(w: &mut W, chunk: &Chunk) -> io::Result<()> {
    wr_u32(w, chunk.code.len() as u32)?;
    w.write_all(&chunk.code)?;

    wr_u16(w, chunk.constants.len() as u16)?;
    for constant in &chunk.constants {
        wr_value(w, constant)?;
    }

    Ok(())
}

fn wr_value<W: Write>(w: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Nil => wr_u8(w, value_tag::NIL),
        Value::Bool(b) => {
            wr_u8(w, value_tag::BOOL)?;
            wr_u8(w, *b as u8)
        }
        Value::Number(n) => {
            wr_u8(w, value_tag::NUMBER)?;
            w.write_all(&n.to_bits().to_be_bytes())
        }
        Value::String(s) => {
            wr_u8(w, value_tag::STRING)?;
            wr_str(w, s)
        }
        Value::List(items) => {
            wr_u8(w, value_tag::LIST)?;
            let items = items.borrow();
            wr_u32(w, items.len() as u32)?;
            for item in items.iter() {
                wr_value(w, item)?;
            }
            Ok(())
        }
        Value::Object(members) => {
            wr_u8(w, value_tag::OBJECT)?;
            let members = members.borrow();
            wr_u32(w, members.len() as u32)?;
            for (name, member) in members.iter() {
                wr_str(w, name)?;
                wr_value(w, member)?;
            }
            Ok(())
        }
        Value::Function(function) => {
            wr_u8(w, value_tag::FUNCTION)?;
            wr_str(w, &function.name)?;
            wr_u16(w, function.parameters.len() as u16)?;
            for parameter in &function.parameters {
                wr_str(w, &parameter.name)?;
                wr_signature(w, &parameter.signature)?;
            }
            wr_signature(w, &function.yields)?;
            wr_chunk(w, &function.chunk)
        }
        Value::Builtin(builtin) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("builtin function {} cannot be serialized", builtin.name),
        )),
        Value::Variable(variable) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("variable {} cannot be serialized", variable.name),
        )),
    }
}

fn wr_signature<W: Write>(w: &mut W, signature: &TypeSignature) -> io::Result<()> {
    match signature {
        TypeSignature::Nil => wr_u8(w, sig_tag::NIL),
        TypeSignature::String => wr_u8(w, sig_tag::STRING),
        TypeSignature::Number => wr_u8(w, sig_tag::NUMBER),
        TypeSignature::Boolean => wr_u8(w, sig_tag::BOOLEAN),
        TypeSignature::List(contents) => {
            wr_u8(w, sig_tag::LIST)?;
            wr_signature(w, contents)
        }
        TypeSignature::Object(members) => {
            wr_u8(w, sig_tag::OBJECT)?;
            wr_u16(w, members.len() as u16)?;
            for (name, member) in members {
                wr_str(w, name)?;
                wr_signature(w, member)?;
            }
            Ok(())
        }
        TypeSignature::Function(f) => {
            wr_u8(w, sig_tag::FUNCTION)?;
            wr_u16(w, f.params.len() as u16)?;
            for param in &f.params {
                wr_signature(w, param)?;
            }
            wr_signature(w, &f.yields)
        }
        TypeSignature::Any => wr_u8(w, sig_tag::ANY),
        TypeSignature::Composite(a, b) => {
            wr_u8(w, sig_tag::COMPOSITE)?;
            wr_signature(w, a)?;
            wr_signature(w, b)
        }
        TypeSignature::Inner => wr_u8(w, sig_tag::INNER),
    }
}

fn wr_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn wr_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn wr_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn wr_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    wr_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }
}

fn rd_chunk(r: &mut Reader) -> Result<Chunk, DecodeError> {
    let code_len = r.u32()? as usize;
    let code = r.take(code_len)?.to_vec();

    let constant_count = r.u16()? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(rd_value(r)?);
    }

    Ok(Chunk::with_parts(code, constants))
}

fn rd_value(r: &mut Reader) -> Result<Value, DecodeError> {
    let tag = r.u8()?;
    match tag {
        value_tag::NIL => Ok(Value::Nil),
        value_tag::BOOL => Ok(Value::Bool(r.u8()? != 0)),
        value_tag::NUMBER => {
            let bytes = r.take(8)?;
            let bits = u64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            Ok(Value::Number(f64::from_bits(bits)))
        }
        value_tag::STRING => Ok(Value::from(r.str()?)),
        value_tag::LIST => {
            let count = r.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(rd_value(r)?);
            }
            Ok(Value::new_list(items))
        }
        value_tag::OBJECT => {
            let count = r.u32()? as usize;
            let mut members = IndexMap::with_capacity(count);
            for _ in 0..count {
                let name = r.str()?;
                members.insert(name, rd_value(r)?);
            }
            Ok(Value::new_object(members))
        }
        value_tag::FUNCTION => {
            let name = r.str()?;

            let parameter_count = r.u16()? as usize;
            let mut parameters = Vec::with_capacity(parameter_count);
            for _ in 0..parameter_count {
                let name = r.str()?;
                let signature = rd_signature(r)?;
                parameters.push(Parameter { name, signature });
            }

            let yields = rd_signature(r)?;
            let chunk = rd_chunk(r)?;

            Ok(Value::Function(Rc::new(Function {
                name,
                parameters,
                yields,
                chunk: Rc::new(chunk),
                parent: None,
            })))
        }
        tag => Err(DecodeError::InvalidTag {
            what: "constant",
            tag,
        }),
    }
}

fn rd_signature(r: &mut Reader) -> Result<TypeSignature, DecodeError> {
    let tag = r.u8()?;
    match tag {
        sig_tag::NIL => Ok(TypeSignature::Nil),
        sig_tag::STRING => Ok(TypeSignature::String),
        sig_tag::NUMBER => Ok(TypeSignature::Number),
        sig_tag::BOOLEAN => Ok(TypeSignature::Boolean),
        sig_tag::LIST => Ok(TypeSignature::List(Box::new(rd_signature(r)?))),
        sig_tag::OBJECT => {
            let count = r.u16()? as usize;
            let mut members = IndexMap::with_capacity(count);
            for _ in 0..count {
                let name = r.str()?;
                members.insert(name, rd_signature(r)?);
            }
            Ok(TypeSignature::Object(members))
        }
        sig_tag::FUNCTION => {
            let param_count = r.u16()? as usize;
            let mut params = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                params.push(rd_signature(r)?);
            }
            let yields = rd_signature(r)?;
            Ok(TypeSignature::Function(FunctionSignature::new(
                params, yields,
            )))
        }
        sig_tag::ANY => Ok(TypeSignature::Any),
        sig_tag::COMPOSITE => Ok(TypeSignature::Composite(
            Box::new(rd_signature(r)?),
            Box::new(rd_signature(r)?),
        )),
        sig_tag::INNER => Ok(TypeSignature::Inner),
        tag => Err(DecodeError::InvalidTag {
            what: "signature",
            tag,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::Compiler;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn compile(source: &str) -> Chunk {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse("test.lume").unwrap();
        let mut compiler = Compiler::new(source);
        compiler.compile(&program).unwrap();
        compiler.into_chunk()
    }

    fn assert_chunks_identical(a: &Chunk, b: &Chunk) {
        assert_eq!(a.code, b.code);
        assert_eq!(a.constants.len(), b.constants.len());
        for (x, y) in a.constants.iter().zip(&b.constants) {
            match (x, y) {
                (Value::Function(f), Value::Function(g)) => {
                    assert_eq!(f.name, g.name);
                    assert_eq!(f.parameters, g.parameters);
                    assert_eq!(f.yields, g.yields);
                    assert_chunks_identical(&f.chunk, &g.chunk);
                }
                _ => assert!(x.equals(y), "{} != {}", x.debug_string(), y.debug_string()),
            }
        }
    }

    #[test]
    fn test_round_trip_simple_program() {
        let chunk = compile("a := 1\nwrite(str(a + 2))");
        let bytes = encode_chunk(&chunk).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_chunks_identical(&chunk, &decoded);
    }

    #[test]
    fn test_round_trip_functions_and_lists() {
        let chunk = compile(
            "xs := [1, 2, 3]\n\
             func add(a: number, b: number) number { return a + b }\n\
             func greet(name: string|nil) string { return \"hi\" }\n\
             _ = add(1, 2)",
        );
        let bytes = encode_chunk(&chunk).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_chunks_identical(&chunk, &decoded);
    }

    #[test]
    fn test_decoded_chunk_executes() {
        use crate::bytecode::vm::{CALL_STACK_SIZE, STACK_SIZE, VM};

        let chunk = compile(
            "func double(x: number) number { return x * 2 }\n\
             assertEq(double(21), 42)",
        );
        let bytes = encode_chunk(&chunk).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();

        let mut vm = VM::new(std::rc::Rc::new(decoded), STACK_SIZE, CALL_STACK_SIZE);
        vm.run().unwrap();
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let err = decode_chunk(b"NOPE\x01").unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic));
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let chunk = compile("a := 1");
        let bytes = encode_chunk(&chunk).unwrap();
        let err = decode_chunk(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let chunk = compile("");
        let mut bytes = encode_chunk(&chunk).unwrap();
        bytes[4] = 99;
        let err = decode_chunk(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(99)));
    }
}
