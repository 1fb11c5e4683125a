use crate::constants::syscalls::*;
use crate::constants::{FRAME_SIZE, INPUT_QUEUE_DEPTH, SWAP_SENTINEL};
use crate::cpu::{Cpu, Signal};
use crate::devices::{BlockStore, OutputSink};
use crate::fs::FileSystem;
use crate::interrupts::{
    DiskCallback, DiskContinuation, DiskOp, DiskReply, FaultKind, Interrupt, InterruptQueue,
};
use crate::memory::MemoryManager;
use crate::process::{MemoryBase, Pcb, Pid};
use crate::scheduler::{Scheduler, SchedulerKind};

use log::{debug, error, info, warn};

/// The kernel context: every piece of mutable kernel state, built at
/// bootstrap and passed around explicitly instead of living in
/// globals. One `on_clock_pulse` call services exactly one interrupt
/// or performs exactly one CPU cycle, never both.
pub struct Kernel<'a> {
    cpu: Cpu,
    mm: MemoryManager,
    scheduler: Scheduler,
    irq: InterruptQueue,
    input: heapless::Deque<char, INPUT_QUEUE_DEPTH>, // Keyboard type-ahead

    residents: Vec<Pcb>,  // Loaded but not yet scheduled
    terminated: Vec<Pcb>, // Retained for inspection

    store: &'a mut dyn BlockStore,
    sink: &'a mut dyn OutputSink,

    interrupts_enabled: bool,
    single_step: bool,
    step_requested: bool,
    swap_in_flight: bool, // A roll-in or exchange is on the disk queue
}

impl<'a> Kernel<'a> {
    /// Brings the kernel up around its host-supplied devices
    pub fn bootstrap(store: &'a mut dyn BlockStore, sink: &'a mut dyn OutputSink) -> Kernel<'a> {
        info!("kernel bootstrap");
        Kernel {
            cpu: Cpu::new(),
            mm: MemoryManager::new(),
            scheduler: Scheduler::new(SchedulerKind::RoundRobin),
            irq: InterruptQueue::new(),
            input: heapless::Deque::new(),
            residents: Vec::new(),
            terminated: Vec::new(),
            store,
            sink,
            interrupts_enabled: true,
            single_step: false,
            step_requested: false,
            swap_in_flight: false,
        }
    }

    /// Disables interrupt delivery. A process still bound to the CPU
    /// keeps burning cycles until the host stops pulsing the clock;
    /// shutdown does not forcibly terminate it.
    pub fn shutdown(&mut self) {
        info!("kernel shutdown");
        self.interrupts_enabled = false;
    }

    /// The single driving entry point, invoked once per hardware tick
    pub fn on_clock_pulse(&mut self) {
        if self.interrupts_enabled {
            if let Some(interrupt) = self.irq.pop_front() {
                self.dispatch(interrupt);
                return;
            }
        }
        if !self.cpu.is_idle() && (!self.single_step || self.step_requested) {
            self.step_requested = false;
            self.cpu.step(&mut self.mm);
            if let Some(signal) = self.cpu.take_signal() {
                self.raise_signal(signal);
            }
            self.scheduler.is_ready(&mut self.irq);
        }
        // Nothing pending and nothing runnable: stay idle
    }

    /// Enqueues an interrupt, subject to interrupt delivery being
    /// enabled
    pub fn raise_interrupt(&mut self, interrupt: Interrupt) {
        if !self.interrupts_enabled {
            debug!("interrupt delivery disabled, dropping irq {}", interrupt.irq());
            return;
        }
        self.irq.push_back(interrupt);
    }

    /// Keyboard collaborator entry point: one decoded character
    pub fn key_pressed(&mut self, c: char) {
        self.raise_interrupt(Interrupt::Keyboard(c));
    }

    /// Oldest unread input character, if any
    pub fn take_input(&mut self) -> Option<char> {
        self.input.pop_front()
    }

    /// Raises a fatal trap
    pub fn trap(&mut self, message: &str) {
        self.raise_interrupt(Interrupt::Trap(message.to_string()));
    }

    fn raise_signal(&mut self, signal: Signal) {
        let pid = self.cpu.current_pid();
        match signal {
            Signal::Break => self.irq.push_back(Interrupt::Break { killed: false }),
            Signal::SystemCall { call, arg } => {
                self.irq.push_back(Interrupt::SystemCall { call, arg })
            }
            Signal::Fault(kind) => self.irq.push_back(Interrupt::Fault { pid, kind }),
        }
    }

    /// Runs exactly one interrupt handler to completion
    fn dispatch(&mut self, interrupt: Interrupt) {
        debug!("servicing irq {}", interrupt.irq());
        match interrupt {
            Interrupt::Timer => self.timer_isr(),
            Interrupt::Keyboard(c) => self.keyboard_isr(c),
            Interrupt::SystemCall { call, arg } => self.system_call_isr(call, arg),
            Interrupt::Fault { pid, kind } => self.fault_isr(pid, kind),
            Interrupt::Break { killed } => self.break_isr(killed),
            Interrupt::Trap(message) => self.trap_isr(message),
            Interrupt::ContextSwitch { finished } => self.process_next(finished),
            Interrupt::Disk { op, cont } => self.disk_isr(op, cont),
        }
    }

    /// Quantum enforcement lives in the scheduler's readiness check,
    /// so the timer ISR itself is a placeholder
    fn timer_isr(&mut self) {
        debug!("timer tick");
    }

    fn keyboard_isr(&mut self, c: char) {
        if self.input.push_back(c).is_err() {
            warn!("input queue full, dropping {:?}", c);
            return;
        }
        // Echo; rendering is the host console's concern
        if c == '\n' {
            self.sink.advance_line();
        } else {
            self.sink.put_text(&c.to_string());
        }
    }

    fn system_call_isr(&mut self, call: u8, arg: u8) {
        match call {
            SYSCALL_PRINT_INT => {
                self.sink.put_text(&arg.to_string());
            }
            SYSCALL_PRINT_STRING => {
                let frame = match self.cpu.current().map(|pcb| &pcb.base) {
                    Some(MemoryBase::Frame(idx)) => *idx,
                    _ => {
                        warn!("print-string system call with no resident process");
                        return;
                    }
                };
                let flat = frame * FRAME_SIZE + arg as usize;
                let span = FRAME_SIZE - arg as usize;
                match self.mm.bytes_to_terminator(flat, STRING_TERMINATOR, span) {
                    Ok(bytes) => {
                        let text = crate::utils::bytes_to_text(&bytes);
                        self.sink.put_text(&text);
                    }
                    Err(err) => {
                        let pid = self.cpu.current_pid();
                        self.irq.push_back(Interrupt::Fault {
                            pid,
                            kind: FaultKind::Memory { err, at: arg },
                        });
                    }
                }
            }
            other => {
                let pid = self.cpu.current_pid();
                self.irq.push_back(Interrupt::Fault {
                    pid,
                    kind: FaultKind::InvalidSystemCall { call: other },
                });
            }
        }
    }

    fn fault_isr(&mut self, pid: Option<Pid>, kind: FaultKind) {
        error!("fault: {}", kind);
        self.sink.put_text(&format!("fault: {}", kind));
        self.sink.advance_line();

        if let Some(pid) = pid {
            let alive = self.cpu.current_pid() == Some(pid)
                || self.scheduler.contains(pid)
                || self.residents.iter().any(|p| p.pid == pid);
            if alive {
                self.kill_process(pid);
            }
        }
    }

    /// Retires the current process: registers stay whatever they were,
    /// its page is reclaimed, and the PCB moves to the terminated list
    fn break_isr(&mut self, killed: bool) {
        let pcb = match self.cpu.unbind() {
            Some(pcb) => pcb,
            None => {
                warn!("break with no bound process");
                return;
            }
        };
        let pid = pcb.pid;
        if let MemoryBase::SwapFile(name) = &pcb.base {
            self.enqueue_swap_delete(name.clone());
        }
        self.mm.reclaim_page(&pcb.base);
        self.terminated.push(pcb);

        let verb = if killed { "killed" } else { "exited" };
        self.sink.advance_line();
        self.sink.put_text(&format!("process {} {}", pid, verb));
        self.sink.advance_line();
        info!("process {} {}", pid, verb);

        self.process_next(true);
    }

    fn trap_isr(&mut self, message: String) {
        error!("KERNEL TRAP: {}", message);
        self.sink.advance_line();
        self.sink.put_text(&format!("KERNEL TRAP: {}", message));
        self.sink.advance_line();
        self.shutdown();
    }

    /// The context-switch handler shared by every discipline
    fn process_next(&mut self, finished: bool) {
        self.scheduler.disarm();
        if self.swap_in_flight {
            debug!("context switch deferred, swap in flight");
            return;
        }
        if !finished {
            if let Some(pcb) = self.cpu.unbind() {
                self.scheduler.requeue(pcb);
            }
        }
        match self.scheduler.dequeue_runnable(&mut self.terminated) {
            Some(next) => match next.base {
                MemoryBase::Frame(_) => {
                    self.scheduler.reset_ticks();
                    self.cpu.bind(next);
                }
                MemoryBase::SwapFile(_) => self.start_swap_in(next),
            },
            None => {
                if self.cpu.is_idle() {
                    self.scheduler.set_work_pending(false);
                    // Hand the console back to the host prompt
                    self.sink.advance_line();
                }
            }
        }
    }

    // Swap orchestration. Both disk legs ride the interrupt queue as
    // asynchronous requests; the PCB being rolled in travels inside
    // the continuation so it is never owned twice.

    fn start_swap_in(&mut self, incoming: Pcb) {
        let name = match &incoming.base {
            MemoryBase::SwapFile(name) => name.clone(),
            MemoryBase::Frame(_) => unreachable!("swap-in of a frame-resident process"),
        };
        info!("rolling in pid {} from {}", incoming.pid, name);
        self.swap_in_flight = true;
        let limit = incoming.limit;
        self.irq.push_back(Interrupt::Disk {
            op: DiskOp::ReadSwap(name, limit),
            cont: DiskContinuation::SwapIn { incoming },
        });
    }

    fn finish_swap_in(&mut self, mut incoming: Pcb, reply: DiskReply) {
        let image = match reply {
            DiskReply::Data(bytes) => bytes,
            other => {
                error!("swap-in of pid {} failed: {:?}", incoming.pid, other);
                self.sink
                    .put_text(&format!("process {} lost its swap image", incoming.pid));
                self.sink.advance_line();
                self.swap_in_flight = false;
                self.terminated.push(incoming);
                return;
            }
        };
        let swap_name = match &incoming.base {
            MemoryBase::SwapFile(name) => name.clone(),
            MemoryBase::Frame(_) => unreachable!("swap-in of a frame-resident process"),
        };

        if let Some(frame) = self.mm.free_frame() {
            // Plain roll-in: no victim needed
            self.mm.claim_frame(frame, incoming.pid);
            self.mm.load_frame(frame, &image);
            incoming.base = MemoryBase::Frame(frame);
            self.enqueue_swap_delete(swap_name);
            self.swap_in_flight = false;
            self.scheduler.reset_ticks();
            self.cpu.bind(incoming);
            return;
        }

        // Exchange with the most recently readied frame resident: it
        // takes over the incoming process's swap file name
        let mm = &mut self.mm;
        let victim_name = swap_name.clone();
        let exchange = self.scheduler.swap_victim(move |victim| {
            let frame = match victim.base {
                MemoryBase::Frame(idx) => idx,
                MemoryBase::SwapFile(_) => unreachable!("victim filter admits frames only"),
            };
            let snapshot = mm.snapshot_frame(frame);
            let limit = victim.limit;
            let out_pid = victim.pid;
            victim.base = MemoryBase::SwapFile(victim_name);
            (frame, limit, snapshot, out_pid)
        });

        match exchange {
            Some((frame, limit, snapshot, out_pid)) => {
                info!("swapping pid {} out for pid {}", out_pid, incoming.pid);
                self.mm.claim_frame(frame, incoming.pid);
                self.mm.load_frame(frame, &image);
                incoming.base = MemoryBase::Frame(frame);
                incoming.limit = limit;
                // The CPU binding waits for the outgoing image to land
                self.irq.push_back(Interrupt::Disk {
                    op: DiskOp::WriteSwap(swap_name, snapshot),
                    cont: DiskContinuation::SwapOut { incoming, out_pid },
                });
            }
            None => {
                error!("no frame to roll pid {} into", incoming.pid);
                self.swap_in_flight = false;
                self.scheduler.requeue(incoming);
            }
        }
    }

    fn finish_swap_out(&mut self, incoming: Pcb, out_pid: Pid, reply: DiskReply) {
        self.swap_in_flight = false;
        self.scheduler.reset_ticks();
        self.cpu.bind(incoming);

        if let DiskReply::Failed(err) = reply {
            // The outgoing image never made it to disk; its process
            // cannot be resumed
            error!("swap-out of pid {} failed: {}", out_pid, err);
            self.sink
                .put_text(&format!("process {} lost its memory image: {}", out_pid, err));
            self.sink.advance_line();
            self.kill_process(out_pid);
        }
    }

    fn finish_load(&mut self, pid: Pid, reply: DiskReply) {
        match reply {
            DiskReply::Failed(err) => {
                error!("disk load of pid {} failed: {}", pid, err);
                self.sink
                    .put_text(&format!("process {} could not be stored on disk: {}", pid, err));
                self.sink.advance_line();
                if let Some(pos) = self.residents.iter().position(|p| p.pid == pid) {
                    let pcb = self.residents.remove(pos);
                    if let MemoryBase::SwapFile(name) = &pcb.base {
                        self.enqueue_swap_delete(name.clone());
                    }
                }
            }
            _ => debug!("pid {} image stored on disk", pid),
        }
    }

    fn enqueue_swap_delete(&mut self, name: String) {
        self.irq.push_back(Interrupt::Disk {
            op: DiskOp::Delete(name),
            cont: DiskContinuation::Report(Box::new(|reply, _sink| {
                if let DiskReply::Failed(err) = reply {
                    warn!("swap file cleanup failed: {}", err);
                }
            })),
        });
    }

    /// Services one queued disk request and hands the result to its
    /// continuation, exactly once
    fn disk_isr(&mut self, op: DiskOp, cont: DiskContinuation) {
        let reply = self.perform_disk_op(op);
        match cont {
            DiskContinuation::Report(callback) => callback(&reply, &mut *self.sink),
            DiskContinuation::LoadImage { pid } => self.finish_load(pid, reply),
            DiskContinuation::SwapIn { incoming } => self.finish_swap_in(incoming, reply),
            DiskContinuation::SwapOut { incoming, out_pid } => {
                self.finish_swap_out(incoming, out_pid, reply)
            }
        }
    }

    fn perform_disk_op(&mut self, op: DiskOp) -> DiskReply {
        let mut fs = FileSystem::new(&mut *self.store);
        match op {
            DiskOp::Format => {
                fs.format();
                DiskReply::Done
            }
            DiskOp::Create(name) => match fs.create_file(&name) {
                Ok(()) => DiskReply::Done,
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::Read(name) => match fs.read_file(&name) {
                Ok(data) => DiskReply::Data(data),
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::Write(name, data) => match fs.write_file(&name, &data) {
                Ok(()) => DiskReply::Done,
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::Delete(name) => match fs.delete_file(&name) {
                Ok(()) => DiskReply::Done,
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::List => match fs.list_files() {
                Ok(names) => DiskReply::Listing(names),
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::ReadSwap(name, limit) => match fs.read_swap(&name, limit) {
                Ok(data) => DiskReply::Data(data),
                Err(err) => DiskReply::Failed(err),
            },
            DiskOp::WriteSwap(name, data) => match fs.write_swap(&name, &data) {
                Ok(()) => DiskReply::Done,
                Err(err) => DiskReply::Failed(err),
            },
        }
    }

    // Host-facing process management

    /// Loads a verified program image. It lands in a free frame when
    /// one exists, otherwise it is rolled straight out to a swap file.
    pub fn load_program(&mut self, program: &[u8], priority: u8) -> Option<Pid> {
        if program.is_empty() || program.len() > FRAME_SIZE {
            self.sink.put_text(&format!(
                "program rejected: must be 1 to {} bytes",
                FRAME_SIZE
            ));
            self.sink.advance_line();
            return None;
        }

        if let Some(pid) = self.mm.store_program(program, priority, &mut self.residents) {
            self.sink.put_text(&format!("process {} loaded", pid));
            self.sink.advance_line();
            return Some(pid);
        }

        let pid = self.mm.allocate_pid();
        let name = format!("{}{}", SWAP_SENTINEL, pid);
        self.residents.push(Pcb::new(
            pid,
            MemoryBase::SwapFile(name.clone()),
            FRAME_SIZE as u16,
            priority,
        ));
        let mut image = program.to_vec();
        image.resize(FRAME_SIZE, 0);
        self.irq.push_back(Interrupt::Disk {
            op: DiskOp::WriteSwap(name, image),
            cont: DiskContinuation::LoadImage { pid },
        });
        self.sink
            .put_text(&format!("process {} loaded to disk", pid));
        self.sink.advance_line();
        Some(pid)
    }

    /// Moves a resident process onto the ready queue
    pub fn run_program(&mut self, pid: Pid) {
        let pcb = self
            .residents
            .iter()
            .position(|p| p.pid == pid)
            .map(|pos| self.residents.remove(pos));
        let idle = self.cpu.is_idle();
        self.scheduler
            .schedule_process(pcb, idle, &mut self.irq, &mut *self.sink);
    }

    /// Schedules every resident process in load order
    pub fn run_all_residents(&mut self) {
        while !self.residents.is_empty() {
            let pcb = self.residents.remove(0);
            let idle = self.cpu.is_idle();
            self.scheduler
                .schedule_process(Some(pcb), idle, &mut self.irq, &mut *self.sink);
        }
    }

    /// Kills a process wherever it currently lives. The running
    /// process goes through the break path so cleanup is funneled
    /// through one place.
    pub fn kill_process(&mut self, pid: Pid) {
        if self.cpu.current_pid() == Some(pid) {
            self.irq.push_back(Interrupt::Break { killed: true });
            return;
        }
        if let Some(base) = self.scheduler.kill_queued(pid) {
            match base {
                MemoryBase::Frame(_) => self.mm.reclaim_page(&base),
                MemoryBase::SwapFile(name) => self.enqueue_swap_delete(name),
            }
            self.sink.put_text(&format!("process {} killed", pid));
            self.sink.advance_line();
            return;
        }
        if let Some(pos) = self.residents.iter().position(|p| p.pid == pid) {
            let pcb = self.residents.remove(pos);
            if let MemoryBase::SwapFile(name) = &pcb.base {
                self.enqueue_swap_delete(name.clone());
            }
            self.mm.reclaim_page(&pcb.base);
            self.terminated.push(pcb);
            self.sink.put_text(&format!("process {} killed", pid));
            self.sink.advance_line();
            return;
        }
        self.sink.put_text(&format!("process {} not found", pid));
        self.sink.advance_line();
    }

    pub fn set_scheduler(&mut self, kind: SchedulerKind) {
        self.scheduler.set_kind(kind);
    }

    pub fn set_quantum(&mut self, quantum: u32) {
        self.scheduler.set_quantum(quantum);
    }

    pub fn set_single_step(&mut self, enabled: bool) {
        self.single_step = enabled;
    }

    pub fn request_step(&mut self) {
        self.step_requested = true;
    }

    // Host-facing file operations; each takes a completion
    // continuation invoked with the disk reply. Reserved names are a
    // recoverable user error and never reach the disk queue.

    pub fn format_disk(&mut self, done: DiskCallback) {
        self.enqueue_disk(DiskOp::Format, done);
    }

    pub fn create_file(&mut self, name: &str, done: DiskCallback) {
        if self.reject_reserved(name) {
            return;
        }
        self.enqueue_disk(DiskOp::Create(name.to_string()), done);
    }

    pub fn read_file(&mut self, name: &str, done: DiskCallback) {
        if self.reject_reserved(name) {
            return;
        }
        self.enqueue_disk(DiskOp::Read(name.to_string()), done);
    }

    pub fn write_file(&mut self, name: &str, data: &[u8], done: DiskCallback) {
        if self.reject_reserved(name) {
            return;
        }
        self.enqueue_disk(DiskOp::Write(name.to_string(), data.to_vec()), done);
    }

    pub fn delete_file(&mut self, name: &str, done: DiskCallback) {
        if self.reject_reserved(name) {
            return;
        }
        self.enqueue_disk(DiskOp::Delete(name.to_string()), done);
    }

    pub fn list_files(&mut self, done: DiskCallback) {
        self.enqueue_disk(DiskOp::List, done);
    }

    fn enqueue_disk(&mut self, op: DiskOp, done: DiskCallback) {
        self.raise_interrupt(Interrupt::Disk {
            op,
            cont: DiskContinuation::Report(done),
        });
    }

    fn reject_reserved(&mut self, name: &str) -> bool {
        if name.starts_with(SWAP_SENTINEL) {
            self.sink.put_text(&format!(
                "file names beginning with '{}' are reserved",
                SWAP_SENTINEL
            ));
            self.sink.advance_line();
            return true;
        }
        false
    }

    // Inspection for the host's status display and for tests

    pub fn residents(&self) -> &[Pcb] {
        &self.residents
    }

    pub fn terminated(&self) -> &[Pcb] {
        &self.terminated
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.mm
    }

    /// True once nothing is bound, queued or in flight
    pub fn is_idle(&self) -> bool {
        self.cpu.is_idle()
            && self.irq.is_empty()
            && self.scheduler.is_empty()
            && !self.swap_in_flight
    }
}

#[cfg(test)]
mod kernel_tests {
    use super::*;
    use crate::constants::FRAME_COUNT;
    use crate::devices::CapturedSink;
    use crate::fs::Tsb;
    use crate::utils::parse_hex_program;
    use std::collections::HashMap;

    struct MapStore {
        values: HashMap<Tsb, Vec<u8>>,
    }

    impl MapStore {
        fn new() -> MapStore {
            MapStore {
                values: HashMap::new(),
            }
        }
    }

    impl BlockStore for MapStore {
        fn get(&self, tsb: Tsb) -> Option<Vec<u8>> {
            self.values.get(&tsb).cloned()
        }

        fn set(&mut self, tsb: Tsb, bytes: Vec<u8>) {
            self.values.insert(tsb, bytes);
        }
    }

    // Prints "123 done" and exits
    const COUNTER: &str = "A9 01 8D 30 00 A2 01 AC 30 00 FF EE 30 00 A2 04 EC 30 00 \
                           D0 F0 A2 02 A0 1B FF 00 20 64 6F 6E 65 00";

    // Counts a byte to 30 and exits, printing nothing
    const BUSY: &str = "A9 00 8D 40 00 EE 40 00 A2 1E EC 40 00 D0 F6 00";

    // Prints a two-letter tag and exits
    fn tagged(tag: &str) -> Vec<u8> {
        let mut program = parse_hex_program("A2 02 A0 06 FF 00").unwrap();
        program.extend_from_slice(tag.as_bytes());
        program.push(0);
        program
    }

    fn pulse_until_idle(kernel: &mut Kernel) {
        for _ in 0..200_000 {
            kernel.on_clock_pulse();
            if kernel.is_idle() {
                return;
            }
        }
        panic!("kernel did not go idle");
    }

    fn quiet() -> DiskCallback {
        Box::new(|_, _| {})
    }

    #[test]
    fn test_single_program_runs_to_completion() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            let program = parse_hex_program(COUNTER).unwrap();
            let pid = kernel.load_program(&program, 3).unwrap();
            kernel.run_program(pid);
            pulse_until_idle(&mut kernel);

            assert_eq!(kernel.terminated().len(), 1);
            assert_eq!(kernel.memory().occupied_frames(), 0);
        }
        assert!(sink.text().contains("123 done"));
        assert!(sink.text().contains("process 0 exited"));
    }

    #[test]
    fn test_round_robin_rotates_in_arrival_order() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
        kernel.set_quantum(2);

        let program = parse_hex_program(BUSY).unwrap();
        for _ in 0..3 {
            kernel.load_program(&program, 3);
        }
        kernel.run_all_residents();

        let mut bindings: Vec<Pid> = Vec::new();
        let mut last = None;
        while bindings.len() < 9 {
            kernel.on_clock_pulse();
            let current = kernel.cpu().current_pid();
            if current.is_some() && current != last {
                bindings.push(current.unwrap());
            }
            last = current;
        }
        // One binding per process per rotation, in arrival order
        assert_eq!(bindings, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_priority_runs_most_urgent_first() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.set_scheduler(SchedulerKind::Priority);

            kernel.load_program(&tagged("QQ"), 2);
            kernel.load_program(&tagged("WW"), 0);
            kernel.load_program(&tagged("ZZ"), 1);
            kernel.run_all_residents();
            pulse_until_idle(&mut kernel);

            let order: Vec<Pid> = kernel.terminated().iter().map(|p| p.pid).collect();
            assert_eq!(order, vec![1, 2, 0]);
        }
        let text = sink.text();
        let qq = text.find("QQ").unwrap();
        let ww = text.find("WW").unwrap();
        let zz = text.find("ZZ").unwrap();
        assert!(ww < zz && zz < qq);
    }

    #[test]
    fn test_fourth_load_rolls_out_to_disk_and_swaps_back() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.set_quantum(2);
            kernel.format_disk(quiet());
            kernel.on_clock_pulse();

            let busy = parse_hex_program(BUSY).unwrap();
            for _ in 0..FRAME_COUNT {
                kernel.load_program(&busy, 3);
            }
            let swapped = kernel.load_program(&tagged("JJ"), 3).unwrap();
            assert_eq!(
                kernel.residents().last().unwrap().base,
                MemoryBase::SwapFile(format!("@{}", swapped))
            );

            kernel.run_all_residents();

            // No pid may ever be owned by two containers at once
            for _ in 0..200_000 {
                kernel.on_clock_pulse();
                let mut seen: Vec<Pid> = Vec::new();
                seen.extend(kernel.residents().iter().map(|p| p.pid));
                seen.extend(kernel.terminated().iter().map(|p| p.pid));
                seen.extend(kernel.scheduler().ready_pids());
                seen.extend(kernel.cpu().current_pid());
                let dup = seen.iter().enumerate().any(|(i, pid)| {
                    seen[..i].contains(pid)
                });
                assert!(!dup, "pid owned twice: {:?}", seen);
                assert!(kernel.memory().occupied_frames() <= FRAME_COUNT);
                if kernel.is_idle() {
                    break;
                }
            }
            assert!(kernel.is_idle());
            assert_eq!(kernel.terminated().len(), FRAME_COUNT + 1);
            assert_eq!(kernel.memory().occupied_frames(), 0);
        }
        assert!(sink.text().contains("JJ"));
    }

    #[test]
    fn test_kill_running_process() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            let pid = kernel
                .load_program(&parse_hex_program(BUSY).unwrap(), 3)
                .unwrap();
            kernel.run_program(pid);
            for _ in 0..10 {
                kernel.on_clock_pulse();
            }
            kernel.kill_process(pid);
            pulse_until_idle(&mut kernel);

            assert_eq!(kernel.terminated().len(), 1);
            assert_eq!(kernel.memory().occupied_frames(), 0);
        }
        assert!(sink.text().contains("process 0 killed"));
    }

    #[test]
    fn test_kill_queued_process_is_skipped() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        let mut kernel = Kernel::bootstrap(&mut store, &mut sink);

        let busy = parse_hex_program(BUSY).unwrap();
        let first = kernel.load_program(&busy, 3).unwrap();
        let second = kernel.load_program(&busy, 3).unwrap();
        kernel.run_all_residents();
        kernel.on_clock_pulse(); // Service the context switch

        assert_eq!(kernel.cpu().current_pid(), Some(first));
        kernel.kill_process(second);
        // The frame came back before the husk drains from the queue
        assert_eq!(kernel.memory().occupied_frames(), 1);

        pulse_until_idle(&mut kernel);
        assert_eq!(kernel.terminated().len(), 2);
    }

    #[test]
    fn test_kill_unknown_pid_reports_not_found() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.kill_process(41);
        }
        assert!(sink.text().contains("process 41 not found"));
    }

    #[test]
    fn test_unknown_opcode_faults_and_kills() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            let pid = kernel.load_program(&[0x02, 0x55], 3).unwrap();
            kernel.run_program(pid);
            pulse_until_idle(&mut kernel);
            assert_eq!(kernel.terminated().len(), 1);
            assert_eq!(kernel.memory().occupied_frames(), 0);
        }
        let text = sink.text();
        assert!(text.contains("unrecognized opcode"));
        assert!(text.contains("process 0 killed"));
    }

    #[test]
    fn test_unterminated_string_is_a_memory_fault() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            // Print-string pointed at a page of 0xEE bytes: the
            // terminator is never found
            let mut program = parse_hex_program("A2 02 A0 10 FF 00").unwrap();
            program.resize(FRAME_SIZE, 0xEE);
            let pid = kernel.load_program(&program, 3).unwrap();
            kernel.run_program(pid);
            pulse_until_idle(&mut kernel);
        }
        assert!(sink.text().contains("string terminator not found"));
    }

    #[test]
    fn test_trap_reports_and_shuts_down() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.trap("self test");
            kernel.on_clock_pulse();

            // Interrupt delivery is now off
            kernel.key_pressed('x');
            kernel.on_clock_pulse();
            assert_eq!(kernel.take_input(), None);
        }
        assert!(sink.text().contains("KERNEL TRAP: self test"));
    }

    #[test]
    fn test_keyboard_characters_queue_and_echo() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.key_pressed('h');
            kernel.key_pressed('i');
            kernel.on_clock_pulse();
            kernel.on_clock_pulse();
            assert_eq!(kernel.take_input(), Some('h'));
            assert_eq!(kernel.take_input(), Some('i'));
            assert_eq!(kernel.take_input(), None);
        }
        assert!(sink.text().contains("hi"));
    }

    #[test]
    fn test_file_operations_round_trip_through_the_disk_queue() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.format_disk(quiet());
            kernel.create_file("story", quiet());
            kernel.write_file("story", b"once upon", quiet());
            kernel.read_file(
                "story",
                Box::new(|reply, sink| match reply {
                    DiskReply::Data(data) => {
                        sink.put_text(&crate::utils::bytes_to_text(data));
                        sink.advance_line();
                    }
                    other => sink.put_text(&format!("read failed: {:?}", other)),
                }),
            );
            kernel.list_files(Box::new(|reply, sink| {
                if let DiskReply::Listing(names) = reply {
                    sink.put_text(&names.join(" "));
                    sink.advance_line();
                }
            }));
            kernel.delete_file("story", quiet());
            pulse_until_idle(&mut kernel);
        }
        let text = sink.text();
        assert!(text.contains("once upon"));
        assert!(text.contains("story"));
    }

    #[test]
    fn test_reserved_names_never_reach_the_disk() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        {
            let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
            kernel.format_disk(quiet());
            kernel.create_file("@0", quiet());
            pulse_until_idle(&mut kernel);

            kernel.list_files(Box::new(|reply, sink| {
                if let DiskReply::Listing(names) = reply {
                    sink.put_text(&format!("{} files", names.len()));
                }
            }));
            pulse_until_idle(&mut kernel);
        }
        let text = sink.text();
        assert!(text.contains("reserved"));
        assert!(text.contains("0 files"));
    }

    #[test]
    fn test_single_step_gates_cpu_cycles() {
        let mut store = MapStore::new();
        let mut sink = CapturedSink::new();
        let mut kernel = Kernel::bootstrap(&mut store, &mut sink);
        kernel.set_single_step(true);

        let pid = kernel
            .load_program(&parse_hex_program(BUSY).unwrap(), 3)
            .unwrap();
        kernel.run_program(pid);
        kernel.on_clock_pulse(); // Context switch binds the process

        let pc_before = kernel.cpu().pc;
        for _ in 0..5 {
            kernel.on_clock_pulse();
        }
        assert_eq!(kernel.cpu().pc, pc_before);

        kernel.request_step();
        kernel.on_clock_pulse();
        assert_ne!(kernel.cpu().pc, pc_before);
    }
}
