use super::Instruction;
use crate::cpu::{Cpu, Signal};
use crate::memory::{MemoryError, MemoryManager};

/// Accumulator and index register load/store operations
pub trait LoadStore {
    fn lda_imm(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn lda_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn sta_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn ldx_imm(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn ldx_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn ldy_imm(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn ldy_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
}

impl LoadStore for Cpu {
    fn lda_imm(&mut self, _mm: &mut MemoryManager, _frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.acc = cmd.imm();
        Ok(1)
    }

    fn lda_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.acc = mm.read_page(frame, cmd.addr())?;
        Ok(2)
    }

    fn sta_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        mm.write_page(frame, cmd.addr(), self.acc)?;
        Ok(2)
    }

    fn ldx_imm(&mut self, _mm: &mut MemoryManager, _frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.x = cmd.imm();
        Ok(1)
    }

    fn ldx_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.x = mm.read_page(frame, cmd.addr())?;
        Ok(2)
    }

    fn ldy_imm(&mut self, _mm: &mut MemoryManager, _frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.y = cmd.imm();
        Ok(1)
    }

    fn ldy_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        self.y = mm.read_page(frame, cmd.addr())?;
        Ok(2)
    }
}

/// Byte arithmetic, modulo 256
pub trait Arithmetic {
    fn adc_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn inc_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
}

impl Arithmetic for Cpu {
    fn adc_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        let operand = mm.read_page(frame, cmd.addr())?;
        self.acc = self.acc.wrapping_add(operand);
        Ok(2)
    }

    fn inc_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        let value = mm.read_page(frame, cmd.addr())?.wrapping_add(1);
        mm.write_page(frame, cmd.addr(), value)?;
        Ok(2)
    }
}

/// Compare, branch and no-op
pub trait ControlFlow {
    fn nop(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn cpx_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn bne_rel(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
}

impl ControlFlow for Cpu {
    fn nop(&mut self, _mm: &mut MemoryManager, _frame: usize, _cmd: &Instruction) -> Result<u16, MemoryError> {
        Ok(1)
    }

    fn cpx_abs(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        let operand = mm.read_page(frame, cmd.addr())?;
        self.zflag = self.x == operand;
        Ok(2)
    }

    fn bne_rel(&mut self, _mm: &mut MemoryManager, _frame: usize, cmd: &Instruction) -> Result<u16, MemoryError> {
        if self.zflag {
            return Ok(2);
        }
        // Two's-complement relative branch; wrapping u8 addition is
        // exactly signed offset arithmetic modulo the page size
        self.pc = self.pc.wrapping_add(cmd.op1);
        Ok(1)
    }
}

/// Instructions that hand control up to the kernel
pub trait System {
    fn brk(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
    fn sys(&mut self, mm: &mut MemoryManager, frame: usize, cmd: &Instruction) -> Result<u16, MemoryError>;
}

impl System for Cpu {
    fn brk(&mut self, _mm: &mut MemoryManager, _frame: usize, _cmd: &Instruction) -> Result<u16, MemoryError> {
        self.raise(Signal::Break);
        Ok(1)
    }

    fn sys(&mut self, _mm: &mut MemoryManager, _frame: usize, _cmd: &Instruction) -> Result<u16, MemoryError> {
        // The sub-opcode and argument are snapshots of X and Y at the
        // moment SYS executes; dispatch happens on a later tick
        self.raise(Signal::SystemCall {
            call: self.x,
            arg: self.y,
        });
        Ok(1)
    }
}
