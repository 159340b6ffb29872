//! Decodes bytecode into structured instructions, for tests and tracing.

use crate::chunk::{Chunk, OpCode};
use crate::object::Obj;
use crate::value::Value;

/// One decoded instruction: the opcode, where it started, where the next
/// instruction starts, and its decoded operand (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub offset: usize,
    pub next_offset: usize,
    pub operand: Operand,
}

/// A decoded operand. Which variant an opcode carries is fixed by the
/// instruction set; [Operand::Closure] additionally captures the trailing
/// `(is_local, index)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    /// A one-byte index into the constant pool.
    Constant(u8),
    /// A one-byte stack or upvalue slot.
    Slot(u8),
    /// A one-byte argument count.
    ArgCount(u8),
    /// A two-byte big-endian jump displacement.
    Jump(u16),
    /// A function constant plus one capture descriptor per upvalue.
    Closure {
        constant: u8,
        upvalues: Vec<(bool, u8)>,
    },
}

/// Decode the whole chunk. Given well-formed bytecode, the instructions
/// tile the byte stream exactly: each `next_offset` is the following
/// instruction's `offset`, and the last one equals `chunk.len()`.
pub fn disassemble(chunk: &Chunk) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < chunk.len() {
        let instruction = disassemble_one(chunk, offset);
        offset = instruction.next_offset;
        instructions.push(instruction);
    }
    instructions
}

/// Decode the single instruction starting at `offset`.
///
/// # Panics
///
/// Panics when the offset is out of bounds or the byte there is not an
/// opcode. Chunks produced by the compiler contain only well-formed
/// instructions, so either case means the caller lost alignment.
pub fn disassemble_one(chunk: &Chunk, offset: usize) -> Instruction {
    let opcode = chunk
        .get(offset)
        .expect("offset past the end of the chunk")
        .as_opcode()
        .expect("byte is not a valid opcode");

    let operand_byte = || {
        chunk
            .get(offset + 1)
            .expect("instruction is missing its operand")
            .byte()
    };

    use OpCode::*;
    let (operand, next_offset) = match opcode {
        Constant | DefineGlobal | GetGlobal | SetGlobal => {
            (Operand::Constant(operand_byte()), offset + 2)
        }
        GetLocal | SetLocal | GetUpvalue | SetUpvalue => {
            (Operand::Slot(operand_byte()), offset + 2)
        }
        Call => (Operand::ArgCount(operand_byte()), offset + 2),
        Jump | JumpIfFalse | Loop => {
            let displacement = chunk
                .short_at(offset + 1)
                .expect("jump is missing its displacement");
            (Operand::Jump(displacement), offset + 3)
        }
        Closure => {
            let constant = operand_byte();
            let function = match chunk.constant(constant as usize) {
                Some(Value::Obj(Obj::Function(function))) => function,
                _ => panic!("closure operand is not a function constant"),
            };

            let mut upvalues = Vec::with_capacity(function.upvalue_count);
            let mut cursor = offset + 2;
            for _ in 0..function.upvalue_count {
                let is_local = chunk
                    .get(cursor)
                    .expect("closure is missing an is_local byte")
                    .byte();
                let index = chunk
                    .get(cursor + 1)
                    .expect("closure is missing an index byte")
                    .byte();
                upvalues.push((is_local != 0, index));
                cursor += 2;
            }

            (Operand::Closure { constant, upvalues }, cursor)
        }
        Nil | True | False | Pop | Equal | Greater | Less | Add | Subtract | Multiply | Divide
        | Not | Negate | Print | CloseUpvalue | Return => (Operand::None, offset + 1),
    };

    Instruction {
        opcode,
        offset,
        next_offset,
        operand,
    }
}

///////////////////////////////////////////// Printing /////////////////////////////////////////////

/// Given a chunk, prints its disassembly to `stdout`, recursing into any
/// function constants reached through `OP_CLOSURE`.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }

    // Nested functions get their own listing, after the outer one.
    for instruction in disassemble(chunk) {
        if let Operand::Closure { constant, .. } = instruction.operand {
            if let Some(Value::Obj(Obj::Function(function))) = chunk.constant(constant as usize) {
                disassemble_chunk(&function.chunk, &function.name);
            }
        }
    }
}

/// Print one instruction from the [Chunk] to `stdout`, taking into account
/// its operands. Returns the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");

    if offset > 0 && at_same_line_as_previous_offset(chunk, offset) {
        print!("   | ");
    } else {
        let line = chunk.line_number_for(offset).unwrap_or(0);
        print!("{line:4} ");
    }

    let instruction = disassemble_one(chunk, offset);
    let name = instruction.opcode.name();

    match &instruction.operand {
        Operand::None => println!("{name:<16}"),
        Operand::Constant(index) => {
            let value = chunk.constant(*index as usize);
            match value {
                Some(value) => println!("{name:<16} {index:4} '{value}'"),
                None => println!("{name:<16} {index:4} <bad constant>"),
            }
        }
        Operand::Slot(slot) => println!("{name:<16} {slot:4}"),
        Operand::ArgCount(count) => println!("{name:<16} {count:4}"),
        Operand::Jump(displacement) => {
            let target = if instruction.opcode == OpCode::Loop {
                instruction.next_offset - *displacement as usize
            } else {
                instruction.next_offset + *displacement as usize
            };
            println!("{name:<16} {offset:4} -> {target}");
        }
        Operand::Closure { constant, upvalues } => {
            let value = chunk.constant(*constant as usize);
            match value {
                Some(value) => println!("{name:<16} {constant:4} {value}"),
                None => println!("{name:<16} {constant:4} <bad constant>"),
            }
            for (i, (is_local, index)) in upvalues.iter().enumerate() {
                let what = if *is_local { "local" } else { "upvalue" };
                println!("{:04}    |      {} {}", offset + 2 + 2 * i, what, index);
            }
        }
    }

    instruction.next_offset
}

//////////////////////////////////////////// Utilities ////////////////////////////////////////////

/// Returns true if the given offset is at the same line number as the
/// previous offset.
fn at_same_line_as_previous_offset(chunk: &Chunk, offset: usize) -> bool {
    assert!(offset > 0);

    chunk
        .line_number_for(offset)
        .zip(chunk.line_number_for(offset - 1))
        .map(|(current_line, previous_line)| current_line == previous_line)
        .unwrap_or(false)
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use super::*;
    use crate::object::{Function, FunctionKind};

    #[test]
    fn decodes_simple_and_constant_instructions() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(1.5)).unwrap();
        chunk.write_opcode(OpCode::Constant, 1).with_operand(index);
        chunk.write_opcode(OpCode::Negate, 1);
        chunk.write_opcode(OpCode::Return, 2);

        let instructions = disassemble(&chunk);
        assert_eq!(3, instructions.len());

        assert_eq!(OpCode::Constant, instructions[0].opcode);
        assert_eq!(Operand::Constant(0), instructions[0].operand);
        assert_eq!(2, instructions[0].next_offset);

        assert_eq!(OpCode::Negate, instructions[1].opcode);
        assert_eq!(Operand::None, instructions[1].operand);

        assert_eq!(OpCode::Return, instructions[2].opcode);
        assert_eq!(chunk.len(), instructions[2].next_offset);
    }

    #[test]
    fn decodes_jumps_big_endian() {
        let mut chunk = Chunk::new();
        chunk
            .write_opcode(OpCode::JumpIfFalse, 1)
            .with_short_operand(0x0104);

        let instruction = disassemble_one(&chunk, 0);
        assert_eq!(OpCode::JumpIfFalse, instruction.opcode);
        assert_eq!(Operand::Jump(0x0104), instruction.operand);
        assert_eq!(3, instruction.next_offset);
    }

    #[test]
    fn decodes_closures_with_their_upvalue_pairs() {
        let mut inner = Function::new(FunctionKind::Function, "inner");
        inner.upvalue_count = 2;

        let mut chunk = Chunk::new();
        let index = chunk
            .add_constant(Value::Obj(Obj::Function(Rc::new(inner))))
            .unwrap();
        chunk
            .write_opcode(OpCode::Closure, 1)
            .with_operand(index)
            // captures enclosing local 1, then enclosing upvalue 0
            .with_operand(1)
            .with_operand(1)
            .with_operand(0)
            .with_operand(0);
        chunk.write_opcode(OpCode::Return, 1);

        let instructions = disassemble(&chunk);
        assert_eq!(2, instructions.len());
        assert_eq!(
            Operand::Closure {
                constant: index,
                upvalues: vec![(true, 1), (false, 0)],
            },
            instructions[0].operand
        );
        assert_eq!(6, instructions[0].next_offset);
    }

    #[test]
    #[should_panic(expected = "not a valid opcode")]
    fn misaligned_decode_panics() {
        let mut chunk = Chunk::new();
        chunk.write_opcode(OpCode::Constant, 1).with_operand(0xfe);
        // Offset 1 is the operand byte, not an instruction boundary.
        disassemble_one(&chunk, 1);
    }
}
