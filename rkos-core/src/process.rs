use core::fmt;

pub type Pid = u32;

/// Where a process's memory image currently lives. A page is either
/// bound to a main-memory frame or rolled out to a named swap file on
/// disk, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryBase {
    Frame(usize),
    SwapFile(String),
}

impl MemoryBase {
    pub fn is_frame(&self) -> bool {
        matches!(self, MemoryBase::Frame(_))
    }
}

impl fmt::Display for MemoryBase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryBase::Frame(idx) => write!(f, "frame {}", idx),
            MemoryBase::SwapFile(name) => write!(f, "swap {}", name),
        }
    }
}

/// Saved execution state and memory binding for one process.
///
/// A PCB value is owned by exactly one of the resident list, the ready
/// structure, the CPU, or the terminated list at any time; it moves
/// between those containers rather than being shared.
#[derive(Clone, Debug)]
pub struct Pcb {
    pub pid: Pid,

    // Saved register state, copied in and out at context switches
    pub pc: u8,
    pub acc: u8,
    pub x: u8,
    pub y: u8,
    pub zflag: bool,

    pub base: MemoryBase,
    pub limit: u16,       // Page size in bytes
    pub priority: u8,     // Lower is more urgent
}

impl Pcb {
    pub fn new(pid: Pid, base: MemoryBase, limit: u16, priority: u8) -> Pcb {
        Pcb {
            pid,
            pc: 0,
            acc: 0,
            x: 0,
            y: 0,
            zflag: false,
            base,
            limit,
            priority,
        }
    }
}

impl fmt::Display for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "pid {} (prio {}, {}, pc {:02X})",
            self.pid, self.priority, self.base, self.pc
        )
    }
}
