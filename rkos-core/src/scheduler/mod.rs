use core::fmt;
use std::collections::{BinaryHeap, VecDeque};

use crate::constants::DEFAULT_QUANTUM;
use crate::devices::OutputSink;
use crate::interrupts::{Interrupt, InterruptQueue};
use crate::process::{MemoryBase, Pcb, Pid};

use log::{debug, info, warn};

/// The three interchangeable ready-queue disciplines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerKind {
    Fcfs,
    RoundRobin,
    Priority,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerKind::Fcfs => write!(f, "fcfs"),
            SchedulerKind::RoundRobin => write!(f, "round robin"),
            SchedulerKind::Priority => write!(f, "priority"),
        }
    }
}

/// Heap entry ordered by (priority, arrival sequence); the reversed
/// comparison turns the standard max-heap into the minimum extraction
/// the Priority discipline needs, with FIFO tie-breaks
struct PrioEntry {
    priority: u8,
    seq: u64,
    pcb: Pcb,
}

impl PartialEq for PrioEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PrioEntry {}

impl PartialOrd for PrioEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

enum ReadyQueue {
    Fifo(VecDeque<Pcb>),
    Heap(BinaryHeap<PrioEntry>),
}

impl ReadyQueue {
    fn for_kind(kind: SchedulerKind) -> ReadyQueue {
        match kind {
            SchedulerKind::Fcfs | SchedulerKind::RoundRobin => ReadyQueue::Fifo(VecDeque::new()),
            SchedulerKind::Priority => ReadyQueue::Heap(BinaryHeap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            ReadyQueue::Fifo(q) => q.len(),
            ReadyQueue::Heap(h) => h.len(),
        }
    }
}

/// Owns the ready structure and decides which process runs next. The
/// shared behavior lives here once; the discipline only changes the
/// queue type, the quantum handling and the dequeue order.
pub struct Scheduler {
    kind: SchedulerKind,
    ready: ReadyQueue,
    quantum: u32,       // Configured Round-Robin quantum, in cycles
    ticks: u32,         // Cycles burned in the current quantum
    seq: u64,           // Arrival counter for FIFO tie-breaks
    skip: Vec<Pid>,     // Killed-while-queued pids, dropped on dequeue
    work_pending: bool,
    switch_armed: bool, // An idle-CPU context switch is already queued
}

impl Scheduler {
    pub fn new(kind: SchedulerKind) -> Scheduler {
        Scheduler {
            kind,
            ready: ReadyQueue::for_kind(kind),
            quantum: DEFAULT_QUANTUM,
            ticks: 0,
            seq: 0,
            skip: Vec::new(),
            work_pending: false,
            switch_armed: false,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn set_quantum(&mut self, quantum: u32) {
        info!("quantum set to {}", quantum);
        self.quantum = quantum.max(1);
    }

    /// Swaps the discipline, rebuilding the ready structure with the
    /// old dequeue order as the new arrival order
    pub fn set_kind(&mut self, kind: SchedulerKind) {
        info!("scheduler set to {}", kind);
        let drained = self.drain();
        self.kind = kind;
        self.ready = ReadyQueue::for_kind(kind);
        self.seq = 0;
        self.ticks = 0;
        for pcb in drained {
            self.requeue(pcb);
        }
    }

    pub fn work_pending(&self) -> bool {
        self.work_pending
    }

    pub fn set_work_pending(&mut self, pending: bool) {
        self.work_pending = pending;
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.len() == 0
    }

    pub fn reset_ticks(&mut self) {
        self.ticks = 0;
    }

    pub(crate) fn disarm(&mut self) {
        self.switch_armed = false;
    }

    // FCFS is the non-preemptive special case of the shared quantum
    // mechanics: it never expires
    fn effective_quantum(&self) -> u32 {
        match self.kind {
            SchedulerKind::Fcfs => u32::MAX,
            _ => self.quantum,
        }
    }

    /// Readies a process. Fails loudly on an absent PCB; on an idle
    /// CPU it arms one immediate context switch.
    pub fn schedule_process(
        &mut self,
        pcb: Option<Pcb>,
        cpu_idle: bool,
        irq: &mut InterruptQueue,
        sink: &mut dyn OutputSink,
    ) {
        let pcb = match pcb {
            Some(pcb) => pcb,
            None => {
                warn!("schedule_process called without a pcb");
                sink.put_text("no process to schedule");
                sink.advance_line();
                return;
            }
        };
        debug!("scheduling {}", pcb);
        self.requeue(pcb);
        self.work_pending = true;

        if cpu_idle && !self.switch_armed {
            self.switch_armed = true;
            irq.push_back(Interrupt::ContextSwitch { finished: false });
        }
    }

    /// Enqueue preserving arrival order, without the idle-CPU arming
    pub fn requeue(&mut self, pcb: Pcb) {
        let seq = self.seq;
        self.seq += 1;
        match &mut self.ready {
            ReadyQueue::Fifo(q) => q.push_back(pcb),
            ReadyQueue::Heap(h) => h.push(PrioEntry {
                priority: pcb.priority,
                seq,
                pcb,
            }),
        }
    }

    /// The post-cycle readiness check. Round-Robin and FCFS count
    /// cycles against the quantum; Priority is non-preemptive between
    /// arrivals and never switches here.
    pub fn is_ready(&mut self, irq: &mut InterruptQueue) {
        if self.kind == SchedulerKind::Priority {
            return;
        }
        self.ticks += 1;
        if self.ticks < self.effective_quantum() {
            return;
        }
        self.ticks = 0;
        if self.ready.len() > 0 {
            debug!("quantum expired, raising context switch");
            irq.push_back(Interrupt::ContextSwitch { finished: false });
        }
    }

    /// Dequeues the next runnable PCB, draining killed husks to the
    /// terminated list on the way
    pub fn dequeue_runnable(&mut self, terminated: &mut Vec<Pcb>) -> Option<Pcb> {
        loop {
            let pcb = match &mut self.ready {
                ReadyQueue::Fifo(q) => q.pop_front()?,
                ReadyQueue::Heap(h) => h.pop()?.pcb,
            };
            if let Some(pos) = self.skip.iter().position(|&pid| pid == pcb.pid) {
                self.skip.swap_remove(pos);
                debug!("dropping killed pid {} from the ready queue", pcb.pid);
                terminated.push(pcb);
                continue;
            }
            return Some(pcb);
        }
    }

    /// True when the pid is queued and not already marked killed
    pub fn contains(&self, pid: Pid) -> bool {
        if self.skip.contains(&pid) {
            return false;
        }
        match &self.ready {
            ReadyQueue::Fifo(q) => q.iter().any(|p| p.pid == pid),
            ReadyQueue::Heap(h) => h.iter().any(|e| e.pcb.pid == pid),
        }
    }

    /// Kills a queued process in place: its page is reclaimed by the
    /// caller right away, while the PCB itself cannot be pulled out of
    /// a heap without breaking its structure, so the pid is marked to
    /// be skipped on its eventual dequeue.
    pub fn kill_queued(&mut self, pid: Pid) -> Option<MemoryBase> {
        if !self.contains(pid) {
            return None;
        }
        let base = match &self.ready {
            ReadyQueue::Fifo(q) => q.iter().find(|p| p.pid == pid).map(|p| p.base.clone()),
            ReadyQueue::Heap(h) => h
                .iter()
                .find(|e| e.pcb.pid == pid)
                .map(|e| e.pcb.base.clone()),
        }?;
        self.skip.push(pid);
        Some(base)
    }

    /// Picks the swap victim: the most recently readied frame-resident
    /// process. Runs the closure against it in place and hands back
    /// the closure's result.
    pub fn swap_victim<R>(&mut self, f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
        let skip = &self.skip;
        match &mut self.ready {
            ReadyQueue::Fifo(q) => q
                .iter_mut()
                .rev()
                .find(|p| p.base.is_frame() && !skip.contains(&p.pid))
                .map(f),
            ReadyQueue::Heap(h) => {
                let mut entries = core::mem::replace(h, BinaryHeap::new()).into_vec();
                let result = entries
                    .iter_mut()
                    .filter(|e| e.pcb.base.is_frame() && !skip.contains(&e.pcb.pid))
                    .max_by_key(|e| e.seq)
                    .map(|e| f(&mut e.pcb));
                h.extend(entries);
                result
            }
        }
    }

    /// Empties the ready structure in dequeue order
    pub fn drain(&mut self) -> Vec<Pcb> {
        let mut out = Vec::new();
        loop {
            let pcb = match &mut self.ready {
                ReadyQueue::Fifo(q) => q.pop_front(),
                ReadyQueue::Heap(h) => h.pop().map(|e| e.pcb),
            };
            match pcb {
                Some(pcb) => out.push(pcb),
                None => return out,
            }
        }
    }

    /// Queued pids in arrival order, killed husks excluded
    pub fn ready_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<(u64, Pid)> = match &self.ready {
            ReadyQueue::Fifo(q) => q.iter().enumerate().map(|(i, p)| (i as u64, p.pid)).collect(),
            ReadyQueue::Heap(h) => h.iter().map(|e| (e.seq, e.pcb.pid)).collect(),
        };
        pids.sort_by_key(|&(seq, _)| seq);
        pids.iter()
            .map(|&(_, pid)| pid)
            .filter(|pid| !self.skip.contains(pid))
            .collect()
    }

    /// Deterministic listing of the ready structure for diagnostics
    pub fn actives_to_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match &self.ready {
            ReadyQueue::Fifo(q) => {
                for pcb in q {
                    parts.push(pcb.to_string());
                }
            }
            ReadyQueue::Heap(h) => {
                let mut entries: Vec<&PrioEntry> = h.iter().collect();
                entries.sort_by_key(|e| (e.priority, e.seq));
                for entry in entries {
                    parts.push(entry.pcb.to_string());
                }
            }
        }
        parts.join(", ")
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} scheduler, quantum {}, ready [{}]",
            self.kind,
            self.quantum,
            self.actives_to_string()
        )
    }
}
