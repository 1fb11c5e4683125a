use crate::decoder::decode;
use crate::instructions::{Arithmetic, ControlFlow, LoadStore, System};
use crate::instructions::{Instruction, Mnemonic};
use crate::interrupts::FaultKind;
use crate::memory::MemoryManager;
use crate::process::{MemoryBase, Pcb, Pid};

use log::debug;

/// Signals raised while executing one cycle. The kernel drains these
/// into the interrupt queue so faults and system calls are serviced on
/// a later tick, never synchronously mid-cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Break,
    SystemCall { call: u8, arg: u8 },
    Fault(FaultKind),
}

/// Struct representing the CPU and its register state
pub struct Cpu {
    pub pc: u8,       // Program counter within the 256-byte page
    pub acc: u8,      // Accumulator
    pub x: u8,        // X register
    pub y: u8,        // Y register
    pub zflag: bool,  // Zero flag, set by compare

    current: Option<Pcb>,    // Process bound to the CPU, if any
    signal: Option<Signal>,  // Raised during the last cycle

    pub total_cycles: usize, // Total cycles executed
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            pc: 0,
            acc: 0,
            x: 0,
            y: 0,
            zflag: false,
            current: None,
            signal: None,
            total_cycles: 0,
        }
    }

    /// Restores a PCB's saved registers and takes ownership of it
    pub fn bind(&mut self, pcb: Pcb) {
        debug!("binding pid {} to the cpu", pcb.pid);
        self.pc = pcb.pc;
        self.acc = pcb.acc;
        self.x = pcb.x;
        self.y = pcb.y;
        self.zflag = pcb.zflag;
        self.current = Some(pcb);
    }

    /// Copies the live registers back into the PCB and releases it
    pub fn unbind(&mut self) -> Option<Pcb> {
        let mut pcb = self.current.take()?;
        pcb.pc = self.pc;
        pcb.acc = self.acc;
        pcb.x = self.x;
        pcb.y = self.y;
        pcb.zflag = self.zflag;
        Some(pcb)
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&Pcb> {
        self.current.as_ref()
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current.as_ref().map(|pcb| pcb.pid)
    }

    pub fn take_signal(&mut self) -> Option<Signal> {
        self.signal.take()
    }

    pub(crate) fn raise(&mut self, signal: Signal) {
        self.signal = Some(signal);
    }

    /// One fetch/decode/execute cycle. Returns the cycle cost; any
    /// break, system call or fault is left in the signal slot.
    pub fn step(&mut self, mm: &mut MemoryManager) -> u16 {
        let frame = match self.current.as_ref().map(|pcb| &pcb.base) {
            Some(MemoryBase::Frame(idx)) => *idx,
            Some(MemoryBase::SwapFile(_)) => {
                self.raise(Signal::Fault(FaultKind::PageNotResident));
                return 0;
            }
            None => return 0,
        };

        // Fetch the opcode byte, advancing the program counter
        let at = self.pc;
        let opcode = match mm.read_page(frame, at as u16) {
            Ok(b) => b,
            Err(err) => {
                self.raise(Signal::Fault(FaultKind::Memory { err, at }));
                return 0;
            }
        };
        self.pc = self.pc.wrapping_add(1);

        // Decode. Unknown opcodes take the explicit unrecognized path
        // and consume no operand bytes.
        let mut inst = match decode(opcode) {
            Ok(i) => i,
            Err(_) => {
                self.raise(Signal::Fault(FaultKind::UnknownOpcode { opcode, at }));
                return 1;
            }
        };

        // Fetch 0, 1 or 2 operand bytes
        for slot in 0..inst.operand_count {
            let b = match mm.read_page(frame, self.pc as u16) {
                Ok(b) => b,
                Err(err) => {
                    self.raise(Signal::Fault(FaultKind::Memory { err, at: self.pc }));
                    return 1;
                }
            };
            if slot == 0 {
                inst.op1 = b;
            } else {
                inst.op2 = b;
            }
            self.pc = self.pc.wrapping_add(1);
        }

        let cycles = match self.execute(mm, frame, &inst) {
            Ok(c) => c,
            Err(err) => {
                self.raise(Signal::Fault(FaultKind::Memory { err, at }));
                1
            }
        };
        self.total_cycles += cycles as usize;
        cycles
    }

    /// Dispatches one decoded instruction to its handler
    fn execute(
        &mut self,
        mm: &mut MemoryManager,
        frame: usize,
        inst: &Instruction,
    ) -> Result<u16, crate::memory::MemoryError> {
        match inst.mnem {
            Mnemonic::LdaImm => self.lda_imm(mm, frame, inst),
            Mnemonic::LdaAbs => self.lda_abs(mm, frame, inst),
            Mnemonic::StaAbs => self.sta_abs(mm, frame, inst),
            Mnemonic::AdcAbs => self.adc_abs(mm, frame, inst),
            Mnemonic::LdxImm => self.ldx_imm(mm, frame, inst),
            Mnemonic::LdxAbs => self.ldx_abs(mm, frame, inst),
            Mnemonic::LdyImm => self.ldy_imm(mm, frame, inst),
            Mnemonic::LdyAbs => self.ldy_abs(mm, frame, inst),
            Mnemonic::Nop => self.nop(mm, frame, inst),
            Mnemonic::Brk => self.brk(mm, frame, inst),
            Mnemonic::CpxAbs => self.cpx_abs(mm, frame, inst),
            Mnemonic::BneRel => self.bne_rel(mm, frame, inst),
            Mnemonic::IncAbs => self.inc_abs(mm, frame, inst),
            Mnemonic::Sys => self.sys(mm, frame, inst),
        }
    }
}

#[cfg(test)]
mod cpu_tests {
    use super::*;
    use crate::constants::opcodes::*;

    fn cpu_with_program(program: &[u8]) -> (Cpu, MemoryManager) {
        let mut mm = MemoryManager::new();
        let mut residents = Vec::new();
        mm.store_program(program, 3, &mut residents).unwrap();
        let mut cpu = Cpu::new();
        cpu.bind(residents.pop().unwrap());
        (cpu, mm)
    }

    #[test]
    fn test_branch_back_128_when_zflag_clear() {
        // Pad so the branch sits at a known pc
        let mut program = vec![OP_NOP; 0x20];
        program.extend_from_slice(&[OP_BNE_REL, 0x80]);
        let (mut cpu, mut mm) = cpu_with_program(&program);

        for _ in 0..0x20 {
            cpu.step(&mut mm);
        }
        assert_eq!(cpu.pc, 0x20);
        cpu.step(&mut mm);
        // Operand fetched at 0x21, pc 0x22, then back by 128
        assert_eq!(cpu.pc, 0x22u8.wrapping_add(0x80));
        assert_eq!(cpu.pc, 0xA2);
    }

    #[test]
    fn test_branch_forward_127_when_zflag_clear() {
        let (mut cpu, mut mm) = cpu_with_program(&[OP_BNE_REL, 0x7F]);
        cpu.step(&mut mm);
        assert_eq!(cpu.pc, 0x02 + 127);
    }

    #[test]
    fn test_branch_not_taken_when_zflag_set() {
        let (mut cpu, mut mm) = cpu_with_program(&[OP_BNE_REL, 0x80]);
        cpu.zflag = true;
        cpu.step(&mut mm);
        // Only the fetch advanced the program counter
        assert_eq!(cpu.pc, 0x02);
    }

    #[test]
    fn test_load_store_and_add() {
        // acc = 7; mem[30] = acc; acc += mem[30]; mem[30] += 1
        let program = [
            OP_LDA_IMM, 0x07, OP_STA_ABS, 0x30, 0x00, OP_ADC_ABS, 0x30, 0x00,
            OP_INC_ABS, 0x30, 0x00,
        ];
        let (mut cpu, mut mm) = cpu_with_program(&program);
        cpu.step(&mut mm);
        assert_eq!(cpu.acc, 7);
        cpu.step(&mut mm);
        assert_eq!(mm.read_page(0, 0x30), Ok(7));
        cpu.step(&mut mm);
        assert_eq!(cpu.acc, 14);
        cpu.step(&mut mm);
        assert_eq!(mm.read_page(0, 0x30), Ok(8));
        assert!(cpu.take_signal().is_none());
    }

    #[test]
    fn test_add_wraps_modulo_256() {
        let program = [OP_LDA_IMM, 0xF0, OP_STA_ABS, 0x20, 0x00, OP_ADC_ABS, 0x20, 0x00];
        let (mut cpu, mut mm) = cpu_with_program(&program);
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        assert_eq!(cpu.acc, 0xE0); // 0xF0 + 0xF0 mod 256
    }

    #[test]
    fn test_compare_x_sets_and_clears_zflag() {
        let program = [
            OP_LDX_IMM, 0x05, OP_CPX_ABS, 0x20, 0x00, OP_LDX_IMM, 0x00, OP_CPX_ABS,
            0x20, 0x00,
        ];
        let (mut cpu, mut mm) = cpu_with_program(&program);
        mm.write_page(0, 0x20, 0x05).unwrap();
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        assert!(cpu.zflag);
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        assert!(!cpu.zflag);
    }

    #[test]
    fn test_break_raises_signal() {
        let (mut cpu, mut mm) = cpu_with_program(&[OP_BRK]);
        cpu.step(&mut mm);
        assert_eq!(cpu.take_signal(), Some(Signal::Break));
    }

    #[test]
    fn test_sys_snapshots_x_and_y() {
        let program = [OP_LDX_IMM, 0x01, OP_LDY_IMM, 0x2A, OP_SYS];
        let (mut cpu, mut mm) = cpu_with_program(&program);
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        cpu.step(&mut mm);
        assert_eq!(
            cpu.take_signal(),
            Some(Signal::SystemCall { call: 1, arg: 0x2A })
        );
    }

    #[test]
    fn test_unknown_opcode_faults_without_consuming_operands() {
        let (mut cpu, mut mm) = cpu_with_program(&[0x02, 0x55]);
        cpu.step(&mut mm);
        match cpu.take_signal() {
            Some(Signal::Fault(FaultKind::UnknownOpcode { opcode, at })) => {
                assert_eq!(opcode, 0x02);
                assert_eq!(at, 0x00);
            }
            other => panic!("expected unknown-opcode fault, got {:?}", other),
        }
        // The byte after the bad opcode was not consumed as an operand
        assert_eq!(cpu.pc, 0x01);
    }

    #[test]
    fn test_idle_cpu_steps_are_no_ops() {
        let mut cpu = Cpu::new();
        let mut mm = MemoryManager::new();
        assert_eq!(cpu.step(&mut mm), 0);
        assert!(cpu.take_signal().is_none());
    }
}
