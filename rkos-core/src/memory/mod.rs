use core::fmt;

use crate::constants::{FRAME_COUNT, FRAME_SIZE, MEMORY_SIZE};
use crate::process::{MemoryBase, Pcb, Pid};

use log::{debug, error};

/// Errors surfaced by memory operations. Structural violations are
/// reported as faults by the kernel, never silently truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryError {
    AddressOutOfBounds,
    MemoryOverflow,
    MissingTerminator,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::AddressOutOfBounds => write!(f, "address out of bounds"),
            MemoryError::MemoryOverflow => write!(f, "memory overflow"),
            MemoryError::MissingTerminator => write!(f, "string terminator not found"),
        }
    }
}

/// Owns the fixed frame pool and mediates every memory access made by
/// the CPU and the kernel. Frames are bound to at most one process.
pub struct MemoryManager {
    ram: [[u8; FRAME_SIZE]; FRAME_COUNT], // Main memory, one row per frame
    frames: [Option<Pid>; FRAME_COUNT],   // Frame owner, None when free
    next_pid: Pid,
}

impl MemoryManager {
    pub fn new() -> MemoryManager {
        MemoryManager {
            ram: [[0; FRAME_SIZE]; FRAME_COUNT],
            frames: [None; FRAME_COUNT],
            next_pid: 0,
        }
    }

    /// Monotone process-id allocation, shared by the frame and swap
    /// load paths
    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    // Flat-address operations over the whole frame pool

    /// Copies bytes into memory starting at a flat address
    pub fn store(&mut self, address: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        if address >= MEMORY_SIZE {
            return Err(MemoryError::AddressOutOfBounds);
        }
        if address + bytes.len() > MEMORY_SIZE {
            return Err(MemoryError::MemoryOverflow);
        }
        for (i, b) in bytes.iter().enumerate() {
            let flat = address + i;
            self.ram[flat / FRAME_SIZE][flat % FRAME_SIZE] = *b;
        }
        Ok(())
    }

    /// Returns the byte at a flat address
    pub fn byte_at(&self, address: usize) -> Result<u8, MemoryError> {
        if address >= MEMORY_SIZE {
            return Err(MemoryError::AddressOutOfBounds);
        }
        Ok(self.ram[address / FRAME_SIZE][address % FRAME_SIZE])
    }

    /// Bounded multi-byte read from a flat address
    pub fn bytes_at(&self, address: usize, count: usize) -> Result<Vec<u8>, MemoryError> {
        if address >= MEMORY_SIZE {
            return Err(MemoryError::AddressOutOfBounds);
        }
        if address + count > MEMORY_SIZE {
            return Err(MemoryError::MemoryOverflow);
        }
        (address..address + count).map(|a| self.byte_at(a)).collect()
    }

    /// Reads until the terminator byte, excluding it; fails if the
    /// terminator is not seen within max_count bytes or memory bounds
    pub fn bytes_to_terminator(
        &self,
        address: usize,
        terminator: u8,
        max_count: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        let mut out = Vec::new();
        for offset in 0..max_count {
            let b = self.byte_at(address + offset)?;
            if b == terminator {
                return Ok(out);
            }
            out.push(b);
        }
        Err(MemoryError::MissingTerminator)
    }

    // Frame pool management

    /// Index of the first free frame, if any
    pub fn free_frame(&self) -> Option<usize> {
        self.frames.iter().position(|owner| owner.is_none())
    }

    /// Binds a frame to a process
    pub fn claim_frame(&mut self, frame: usize, pid: Pid) {
        self.frames[frame] = Some(pid);
    }

    /// Marks the page behind a base descriptor free again. Swap-file
    /// space is reclaimed by the file system, so that arm is a no-op.
    pub fn reclaim_page(&mut self, base: &MemoryBase) {
        match base {
            MemoryBase::Frame(frame) => {
                debug!("reclaiming frame {}", frame);
                self.frames[*frame] = None;
                self.ram[*frame] = [0; FRAME_SIZE];
            }
            MemoryBase::SwapFile(_) => {}
        }
    }

    pub fn occupied_frames(&self) -> usize {
        self.frames.iter().filter(|owner| owner.is_some()).count()
    }

    pub fn frame_owner(&self, frame: usize) -> Option<Pid> {
        self.frames[frame]
    }

    /// Writes a verified program into the first free frame, builds its
    /// PCB and registers it on the resident list. None when every
    /// frame is taken; the caller decides whether to roll out to disk.
    pub fn store_program(
        &mut self,
        program: &[u8],
        priority: u8,
        residents: &mut Vec<Pcb>,
    ) -> Option<Pid> {
        if program.len() > FRAME_SIZE {
            error!("program of {} bytes exceeds the frame size", program.len());
            return None;
        }
        let frame = self.free_frame()?;
        let pid = self.allocate_pid();

        self.ram[frame] = [0; FRAME_SIZE];
        self.ram[frame][..program.len()].copy_from_slice(program);
        self.claim_frame(frame, pid);

        let pcb = Pcb::new(pid, MemoryBase::Frame(frame), FRAME_SIZE as u16, priority);
        residents.push(pcb);
        debug!("stored program as pid {} in frame {}", pid, frame);
        Some(pid)
    }

    // Per-process page access used by the CPU and the swap protocol

    /// Reads one byte from a process page, offset checked against the
    /// page limit
    pub fn read_page(&self, frame: usize, offset: u16) -> Result<u8, MemoryError> {
        if offset as usize >= FRAME_SIZE {
            return Err(MemoryError::AddressOutOfBounds);
        }
        Ok(self.ram[frame][offset as usize])
    }

    /// Writes one byte into a process page
    pub fn write_page(&mut self, frame: usize, offset: u16, value: u8) -> Result<(), MemoryError> {
        if offset as usize >= FRAME_SIZE {
            return Err(MemoryError::AddressOutOfBounds);
        }
        self.ram[frame][offset as usize] = value;
        Ok(())
    }

    /// Full copy of a frame, taken before its owner is rolled out
    pub fn snapshot_frame(&self, frame: usize) -> Vec<u8> {
        self.ram[frame].to_vec()
    }

    /// Restores a disk image into a frame, zero-filling any shortfall
    pub fn load_frame(&mut self, frame: usize, image: &[u8]) {
        self.ram[frame] = [0; FRAME_SIZE];
        let len = image.len().min(FRAME_SIZE);
        self.ram[frame][..len].copy_from_slice(&image[..len]);
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[test]
    fn test_store_at_last_byte_succeeds() {
        let mut mm = MemoryManager::new();
        assert_eq!(mm.store(MEMORY_SIZE - 1, &[0xAB]), Ok(()));
        assert_eq!(mm.byte_at(MEMORY_SIZE - 1), Ok(0xAB));
    }

    #[test]
    fn test_store_past_end_overflows() {
        let mut mm = MemoryManager::new();
        assert_eq!(
            mm.store(MEMORY_SIZE - 1, &[1, 2]),
            Err(MemoryError::MemoryOverflow)
        );
    }

    #[test]
    fn test_store_out_of_bounds() {
        let mut mm = MemoryManager::new();
        assert_eq!(
            mm.store(MEMORY_SIZE, &[1]),
            Err(MemoryError::AddressOutOfBounds)
        );
    }

    #[test]
    fn test_retrieve_out_of_bounds() {
        let mm = MemoryManager::new();
        assert_eq!(mm.byte_at(MEMORY_SIZE), Err(MemoryError::AddressOutOfBounds));
    }

    #[test]
    fn test_bytes_at_reads_a_bounded_span() {
        let mut mm = MemoryManager::new();
        mm.store(100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mm.bytes_at(100, 4), Ok(vec![1, 2, 3, 4]));
        assert_eq!(
            mm.bytes_at(MEMORY_SIZE - 2, 4),
            Err(MemoryError::MemoryOverflow)
        );
    }

    #[test]
    fn test_bytes_to_terminator() {
        let mut mm = MemoryManager::new();
        mm.store(16, b"abc\x00").unwrap();
        assert_eq!(mm.bytes_to_terminator(16, 0, 64), Ok(b"abc".to_vec()));
    }

    #[test]
    fn test_bytes_to_terminator_missing() {
        let mut mm = MemoryManager::new();
        mm.store(16, b"abcd").unwrap();
        assert_eq!(
            mm.bytes_to_terminator(16, 0xFE, 4),
            Err(MemoryError::MissingTerminator)
        );
    }

    #[test]
    fn test_store_program_fills_frames_then_fails() {
        let mut mm = MemoryManager::new();
        let mut residents = Vec::new();
        let program = [0xA9, 0x01, 0x00];

        for expected_pid in 0..FRAME_COUNT as Pid {
            let pid = mm.store_program(&program, 3, &mut residents).unwrap();
            assert_eq!(pid, expected_pid);
        }
        assert_eq!(mm.occupied_frames(), FRAME_COUNT);
        assert_eq!(mm.store_program(&program, 3, &mut residents), None);
        assert_eq!(residents.len(), FRAME_COUNT);
    }

    #[test]
    fn test_reclaim_page_frees_frame() {
        let mut mm = MemoryManager::new();
        let mut residents = Vec::new();
        mm.store_program(&[0xEA, 0x00], 3, &mut residents).unwrap();
        let base = residents[0].base.clone();

        assert_eq!(mm.occupied_frames(), 1);
        mm.reclaim_page(&base);
        assert_eq!(mm.occupied_frames(), 0);

        // Swap-file bases are the file system's job, not ours
        mm.reclaim_page(&MemoryBase::SwapFile("@0".to_string()));
        assert_eq!(mm.occupied_frames(), 0);
    }

    #[test]
    fn test_page_access_respects_limit() {
        let mut mm = MemoryManager::new();
        mm.write_page(0, 0x10, 0x42).unwrap();
        assert_eq!(mm.read_page(0, 0x10), Ok(0x42));
        assert_eq!(
            mm.read_page(0, FRAME_SIZE as u16),
            Err(MemoryError::AddressOutOfBounds)
        );
    }

    #[test]
    fn test_snapshot_and_load_frame_round_trip() {
        let mut mm = MemoryManager::new();
        mm.write_page(1, 0, 0x11).unwrap();
        mm.write_page(1, 255, 0x22).unwrap();
        let image = mm.snapshot_frame(1);
        assert_eq!(image.len(), FRAME_SIZE);

        mm.load_frame(2, &image);
        assert_eq!(mm.read_page(2, 0), Ok(0x11));
        assert_eq!(mm.read_page(2, 255), Ok(0x22));
    }
}
