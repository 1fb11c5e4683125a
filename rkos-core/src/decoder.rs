use crate::constants::opcodes::*;
use crate::instructions::{Instruction, Mnemonic};

/// Decodes one opcode byte against the fixed instruction table.
///
/// Unknown opcodes are an explicit error rather than a guessed operand
/// count: the CPU must not consume operand bytes for an instruction it
/// does not recognize.
pub fn decode(opcode: u8) -> Result<Instruction, &'static str> {
    let i = match opcode {
        OP_LDA_IMM => Instruction::new(opcode, Mnemonic::LdaImm, 1),
        OP_LDA_ABS => Instruction::new(opcode, Mnemonic::LdaAbs, 2),
        OP_STA_ABS => Instruction::new(opcode, Mnemonic::StaAbs, 2),
        OP_ADC_ABS => Instruction::new(opcode, Mnemonic::AdcAbs, 2),
        OP_LDX_IMM => Instruction::new(opcode, Mnemonic::LdxImm, 1),
        OP_LDX_ABS => Instruction::new(opcode, Mnemonic::LdxAbs, 2),
        OP_LDY_IMM => Instruction::new(opcode, Mnemonic::LdyImm, 1),
        OP_LDY_ABS => Instruction::new(opcode, Mnemonic::LdyAbs, 2),
        OP_NOP => Instruction::new(opcode, Mnemonic::Nop, 0),
        OP_BRK => Instruction::new(opcode, Mnemonic::Brk, 0),
        OP_CPX_ABS => Instruction::new(opcode, Mnemonic::CpxAbs, 2),
        OP_BNE_REL => Instruction::new(opcode, Mnemonic::BneRel, 1),
        OP_INC_ABS => Instruction::new(opcode, Mnemonic::IncAbs, 2),
        OP_SYS => Instruction::new(opcode, Mnemonic::Sys, 0),
        _ => return Err("unrecognized opcode"),
    };
    Ok(i)
}
