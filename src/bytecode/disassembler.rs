//! Bytecode disassembler for debugging.

use std::fmt::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::instruction::Op;
use crate::bytecode::value::Value;

/// Disassemble a chunk and, recursively, every function in its constant
/// pool.
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut output = String::new();
    write_chunk(chunk, "<main>", &mut output);
    output
}

fn write_chunk(chunk: &Chunk, name: &str, output: &mut String) {
    writeln!(output, "== {} ==", name).unwrap();

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = write_instruction(chunk, offset, output);
    }

    writeln!(output, "-- constants --").unwrap();
    for (i, constant) in chunk.constants.iter().enumerate() {
        writeln!(output, "c={:<3} {}", i, constant.debug_string()).unwrap();
    }

    // nested function chunks
    for constant in &chunk.constants {
        if let Value::Function(function) = constant {
            writeln!(output).unwrap();
            write_chunk(&function.chunk, &function.name, output);
        }
    }
}

/// Render one instruction, returning the offset of the next.
pub fn write_instruction(chunk: &Chunk, offset: usize, output: &mut String) -> usize {
    write!(output, "{:04} ", offset).unwrap();

    let byte = chunk.code[offset];
    let Some(op) = Op::from_u8(byte) else {
        writeln!(output, "unknown opcode {}", byte).unwrap();
        return offset + 1;
    };

    match op.operand_size() {
        0 => {
            writeln!(output, "{}", op).unwrap();
        }
        1 => {
            let index = chunk.code[offset + 1] as usize;
            let constant = chunk
                .constants
                .get(index)
                .map(Value::debug_string)
                .unwrap_or_else(|| "<pending>".to_string());
            writeln!(output, "{:<20} {} ({})", op.to_string(), index, constant).unwrap();
        }
        2 => {
            let value = chunk.read_u16(offset + 1);
            writeln!(output, "{:<20} {}", op.to_string(), value).unwrap();
        }
        _ => unreachable!(),
    }

    offset + 1 + op.operand_size()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassembles_operands() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(42.0));
        chunk.code = vec![
            Op::Constant as u8,
            index,
            Op::Jump as u8,
            0x01,
            0x00,
            Op::Return as u8,
        ];

        let output = disassemble_chunk(&chunk);
        assert!(output.contains("CONSTANT"), "{}", output);
        assert!(output.contains("42"), "{}", output);
        assert!(output.contains("JUMP"), "{}", output);
        assert!(output.contains("256"), "{}", output);
        assert!(output.contains("RETURN"), "{}", output);
    }

    #[test]
    fn test_unknown_byte_does_not_panic() {
        let chunk = Chunk::with_parts(vec![250], vec![]);
        let output = disassemble_chunk(&chunk);
        assert!(output.contains("unknown opcode 250"), "{}", output);
    }
}
