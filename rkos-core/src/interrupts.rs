use core::fmt;
use std::collections::VecDeque;

use crate::constants::irq::*;
use crate::devices::OutputSink;
use crate::memory::MemoryError;
use crate::process::{Pcb, Pid};

/// Runtime faults attributable to the executing process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    UnknownOpcode { opcode: u8, at: u8 },
    Memory { err: MemoryError, at: u8 },
    InvalidSystemCall { call: u8 },
    PageNotResident,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FaultKind::UnknownOpcode { opcode, at } => {
                write!(f, "unrecognized opcode {:02X} at {:02X}", opcode, at)
            }
            FaultKind::Memory { err, at } => write!(f, "{} at {:02X}", err, at),
            FaultKind::InvalidSystemCall { call } => {
                write!(f, "invalid system call {}", call)
            }
            FaultKind::PageNotResident => write!(f, "page not resident"),
        }
    }
}

/// File-system operations carried by disk interrupts. The swap
/// variants are issued only by the memory manager and scheduler.
#[derive(Clone, Debug)]
pub enum DiskOp {
    Format,
    Create(String),
    Read(String),
    Write(String, Vec<u8>),
    Delete(String),
    List,
    ReadSwap(String, u16),
    WriteSwap(String, Vec<u8>),
}

/// Result handed to a disk continuation, exactly once per operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskReply {
    Done,
    Data(Vec<u8>),
    Listing(Vec<String>),
    Failed(crate::fs::FsError),
}

/// Host-supplied completion callback for user-facing file operations
pub type DiskCallback = Box<dyn FnOnce(&DiskReply, &mut dyn OutputSink)>;

/// What to do when a disk operation completes. User operations carry a
/// callback that produces the user-visible output; the swap and load
/// protocols are typed variants so the kernel can resume them, and
/// they own the in-flight PCB while it belongs to no other container.
pub enum DiskContinuation {
    Report(DiskCallback),
    LoadImage { pid: Pid },
    SwapIn { incoming: Pcb },
    SwapOut { incoming: Pcb, out_pid: Pid },
}

/// One queued interrupt: the IRQ kind and its parameters
pub enum Interrupt {
    Timer,
    Keyboard(char),
    SystemCall { call: u8, arg: u8 },
    Fault { pid: Option<Pid>, kind: FaultKind },
    Break { killed: bool },
    Trap(String),
    ContextSwitch { finished: bool },
    Disk { op: DiskOp, cont: DiskContinuation },
}

impl Interrupt {
    /// Numeric IRQ value. Carried for logging only: the queue is
    /// strict FIFO and never reorders on these numbers.
    pub fn irq(&self) -> u8 {
        match self {
            Interrupt::Timer => IRQ_TIMER,
            Interrupt::Keyboard(_) => IRQ_KEYBOARD,
            Interrupt::SystemCall { .. } => IRQ_SYSTEM_CALL,
            Interrupt::Fault { .. } => IRQ_FAULT,
            Interrupt::Break { .. } => IRQ_BREAK,
            Interrupt::Trap(_) => IRQ_TRAP,
            Interrupt::ContextSwitch { .. } => IRQ_CONTEXT_SWITCH,
            Interrupt::Disk { .. } => IRQ_DISK_REQUEST,
        }
    }
}

/// Strict FIFO interrupt queue
pub type InterruptQueue = VecDeque<Interrupt>;

#[cfg(test)]
mod interrupt_tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_across_irq_kinds() {
        let mut queue = InterruptQueue::new();
        // Disk carries a higher irq number than keyboard, but arrival
        // order is all that matters
        queue.push_back(Interrupt::Disk {
            op: DiskOp::List,
            cont: DiskContinuation::Report(Box::new(|_, _| {})),
        });
        queue.push_back(Interrupt::Keyboard('a'));
        queue.push_back(Interrupt::Timer);

        assert_eq!(queue.pop_front().unwrap().irq(), super::IRQ_DISK_REQUEST);
        assert_eq!(queue.pop_front().unwrap().irq(), super::IRQ_KEYBOARD);
        assert_eq!(queue.pop_front().unwrap().irq(), super::IRQ_TIMER);
    }
}
