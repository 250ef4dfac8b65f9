/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Breakpoints and the cooperative debugger entry points.
//!
//! The hot paths only ever test one flag; everything else happens on a
//! hit. Execute breakpoints are checked at the fetch gate with the full
//! machine in view. Memory and port accesses are matched where they
//! happen, but their conditions are evaluated (and the halt raised) at
//! the next fetch gate, where the register file is available again.
use std::collections::HashMap;

use ferrospec_core::clock::{EventScheduler, EventType, FTs};
use ferrospec_core::memory::{MemoryPage, PageSource};
use ferrospec_core::z80::Z80;

use crate::machine::Board;

mod expression;
pub use expression::{BinaryOp, EvalContext, Expression, UnaryOp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerMode {
    /// No breakpoints: the gates fall straight through.
    Inactive,
    /// Breakpoints armed.
    Active,
    /// A breakpoint hit; the embedder owns the machine until resume.
    Halted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    Execute,
    Read,
    Write,
    PortRead,
    PortWrite,
    Time,
    Event,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointLife {
    Permanent,
    Oneshot,
}

/// Where an execute/read/write breakpoint points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AddressSpec {
    /// Any mapping of this CPU address.
    Absolute(u16),
    /// A specific page, wherever it is mapped.
    Paged {
        source: PageSource,
        page: u8,
        offset: u16,
    },
}

impl AddressSpec {
    fn matches(&self, address: u16, page: &MemoryPage) -> bool {
        match self {
            AddressSpec::Absolute(target) => *target == address,
            AddressSpec::Paged { source, page: bank, offset } => {
                (page.source == *source || *source == PageSource::Any)
                    && page.page_num == *bank
                    && address & 0x1fff == offset & 0x1fff
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BreakpointValue {
    Address(AddressSpec),
    Port { mask: u16, port: u16 },
    Time { tstates: FTs },
    Event { kind: String, detail: String },
}

#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub id: usize,
    pub kind: BreakpointKind,
    pub value: BreakpointValue,
    pub ignore: u64,
    pub life: BreakpointLife,
    pub condition: Option<Expression>,
    /// Command text handed back to the UI on a hit; never interpreted
    /// here.
    pub commands: Option<String>,
    /// For time breakpoints: the original target, kept across frames.
    pub initial_tstates: FTs,
    /// Set while this breakpoint already fired in the current frame.
    triggered: bool,
}

pub struct Debugger {
    pub mode: DebuggerMode,
    breakpoints: Vec<Breakpoint>,
    next_id: usize,
    /// Memory/port hits awaiting condition evaluation at the fetch gate.
    pending: Vec<usize>,
    /// The breakpoint that halted the machine, for the UI.
    pub last_hit: Option<usize>,
    /// Armed by [resume][Debugger::resume]: the halting breakpoint is let
    /// through once so CONTINUE moves past it.
    skip_once: Option<usize>,
    pub variables: HashMap<String, u32>,
    time_event: EventType,
}

impl Default for Debugger {
    fn default() -> Self {
        // the event type is rewired when the real instance is put back
        Debugger::new(ferrospec_core::clock::EVENT_TYPE_NULL)
    }
}

impl Debugger {
    pub fn new(time_event: EventType) -> Self {
        Debugger {
            mode: DebuggerMode::Inactive,
            breakpoints: Vec::new(),
            next_id: 1,
            pending: Vec::new(),
            last_hit: None,
            skip_once: None,
            variables: HashMap::new(),
            time_event,
        }
    }

    #[inline(always)]
    pub fn watching(&self) -> bool {
        self.mode != DebuggerMode::Inactive
    }

    pub fn halted(&self) -> bool {
        self.mode == DebuggerMode::Halted
    }

    /// Lets the emulation continue after a halt.
    pub fn resume(&mut self) {
        self.mode = if self.breakpoints.is_empty() {
            DebuggerMode::Inactive
        } else {
            DebuggerMode::Active
        };
        self.skip_once = self.last_hit.take();
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Adds a breakpoint and arms whatever it needs armed.
    pub fn add_breakpoint(
        &mut self,
        events: &mut EventScheduler,
        kind: BreakpointKind,
        value: BreakpointValue,
        life: BreakpointLife,
        ignore: u64,
        condition: Option<Expression>,
    ) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let initial_tstates = match &value {
            BreakpointValue::Time { tstates } => {
                events.add_with_data(*tstates, self.time_event, id as u32);
                *tstates
            }
            _ => 0,
        };
        self.breakpoints.push(Breakpoint {
            id,
            kind,
            value,
            ignore,
            life,
            condition,
            commands: None,
            initial_tstates,
            triggered: false,
        });
        if self.mode == DebuggerMode::Inactive {
            self.mode = DebuggerMode::Active;
        }
        id
    }

    pub fn remove_breakpoint(&mut self, id: usize) {
        self.breakpoints.retain(|bp| bp.id != id);
        if self.breakpoints.is_empty() && self.mode == DebuggerMode::Active {
            self.mode = DebuggerMode::Inactive;
        }
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
        self.pending.clear();
        if self.mode == DebuggerMode::Active {
            self.mode = DebuggerMode::Inactive;
        }
    }

    pub fn set_ignore(&mut self, id: usize, count: u64) {
        if let Some(bp) = self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            bp.ignore = count;
        }
    }

    pub fn set_condition(&mut self, id: usize, condition: Option<Expression>) {
        if let Some(bp) = self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            bp.condition = condition;
        }
    }

    pub fn set_commands(&mut self, id: usize, commands: Option<String>) {
        if let Some(bp) = self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            bp.commands = commands;
        }
    }

    /// A memory access on the bus; matches are queued for the fetch gate.
    pub fn note_memory(&mut self, kind: BreakpointKind, address: u16, page: MemoryPage) {
        for index in 0..self.breakpoints.len() {
            let hit = {
                let bp = &self.breakpoints[index];
                bp.kind == kind
                    && matches!(&bp.value,
                                BreakpointValue::Address(spec) if spec.matches(address, &page))
            };
            if hit && self.consume_ignore(index) {
                let id = self.breakpoints[index].id;
                self.pending.push(id);
            }
        }
    }

    /// A port access on the bus.
    pub fn note_port(&mut self, kind: BreakpointKind, port: u16) {
        for index in 0..self.breakpoints.len() {
            let hit = {
                let bp = &self.breakpoints[index];
                bp.kind == kind
                    && matches!(&bp.value,
                                BreakpointValue::Port { mask, port: value }
                                    if port & mask == *value)
            };
            if hit && self.consume_ignore(index) {
                let id = self.breakpoints[index].id;
                self.pending.push(id);
            }
        }
    }

    fn consume_ignore(&mut self, index: usize) -> bool {
        let bp = &mut self.breakpoints[index];
        if bp.ignore > 0 {
            bp.ignore -= 1;
            false
        } else {
            true
        }
    }

    /// The fetch gate: settles pending hits, then checks execute
    /// breakpoints against PC. Returns true when the machine must halt.
    pub fn should_trap(&mut self, cpu: &Z80, board: &Board) -> bool {
        let pending = std::mem::replace(&mut self.pending, Vec::new());
        for id in pending {
            if self.condition_holds(id, cpu, board) {
                self.trap(id);
                return true;
            }
        }

        let pc = cpu.pc;
        let page = *board.memory.read_page(pc);
        for index in 0..self.breakpoints.len() {
            let hit = {
                let bp = &self.breakpoints[index];
                bp.kind == BreakpointKind::Execute
                    && matches!(&bp.value,
                                BreakpointValue::Address(spec) if spec.matches(pc, &page))
            };
            if hit && self.consume_ignore(index) {
                let id = self.breakpoints[index].id;
                if self.skip_once == Some(id) {
                    // CONTINUE steps over the breakpoint it stopped on
                    self.skip_once = None;
                    continue;
                }
                if self.condition_holds(id, cpu, board) {
                    self.trap(id);
                    return true;
                }
            }
        }
        self.skip_once = None;
        false
    }

    /// A time-breakpoint event fired.
    pub fn time_breakpoint_hit(&mut self, id: u32, cpu: &Z80, board: &Board) -> bool {
        let id = id as usize;
        match self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            Some(bp) if !bp.triggered => bp.triggered = true,
            // unknown, or it already fired this frame
            _ => return false,
        }
        if self.condition_holds(id, cpu, board) {
            self.trap(id);
            true
        } else {
            false
        }
    }

    /// Re-arms every time breakpoint for the new frame. The scheduler has
    /// already rebased pending events; stale entries are nulled and fresh
    /// ones added at the original in-frame target.
    pub fn rebase_time_breakpoints(&mut self, events: &mut EventScheduler, time_event: EventType) {
        events.remove_type(time_event);
        for bp in self.breakpoints.iter_mut() {
            if let BreakpointValue::Time { .. } = bp.value {
                bp.triggered = false;
                events.add_with_data(bp.initial_tstates, time_event, bp.id as u32);
            }
        }
    }

    /// Fires a named event from the peripheral layer (paging, tape, RZX).
    pub fn fire_event(&mut self, kind: &str, detail: &str) {
        if !self.watching() {
            return;
        }
        for index in 0..self.breakpoints.len() {
            let hit = {
                let bp = &self.breakpoints[index];
                bp.kind == BreakpointKind::Event
                    && matches!(&bp.value,
                                BreakpointValue::Event { kind: k, detail: d }
                                    if k == kind && (d == detail || d == "*"))
            };
            if hit && self.consume_ignore(index) {
                let id = self.breakpoints[index].id;
                // no register context here; unconditional event
                // breakpoints halt immediately, conditioned ones settle
                // at the fetch gate
                if self.breakpoints.iter().find(|bp| bp.id == id)
                    .map(|bp| bp.condition.is_none())
                    .unwrap_or(false)
                {
                    self.trap(id);
                } else {
                    self.pending.push(id);
                }
            }
        }
    }

    fn condition_holds(&self, id: usize, cpu: &Z80, board: &Board) -> bool {
        let bp = match self.breakpoints.iter().find(|bp| bp.id == id) {
            Some(bp) => bp,
            None => return false,
        };
        match &bp.condition {
            None => true,
            Some(condition) => {
                let ctx = MachineEvalContext { cpu, board, variables: &self.variables };
                condition.eval(&ctx) != 0
            }
        }
    }

    fn trap(&mut self, id: usize) {
        self.mode = DebuggerMode::Halted;
        self.last_hit = Some(id);
        let oneshot = self.breakpoints.iter()
            .find(|bp| bp.id == id)
            .map(|bp| bp.life == BreakpointLife::Oneshot)
            .unwrap_or(false);
        if oneshot {
            self.breakpoints.retain(|bp| bp.id != id);
        }
    }
}

/// Expression evaluation against the live machine.
pub(crate) struct MachineEvalContext<'a> {
    pub cpu: &'a Z80,
    pub board: &'a Board,
    pub variables: &'a HashMap<String, u32>,
}

impl<'a> EvalContext for MachineEvalContext<'a> {
    fn system_variable(&self, kind: &str, detail: &str) -> u32 {
        match kind {
            "z80" => match detail {
                "a" => self.cpu.a as u32,
                "f" => self.cpu.f as u32,
                "b" => self.cpu.b as u32,
                "c" => self.cpu.c as u32,
                "d" => self.cpu.d as u32,
                "e" => self.cpu.e as u32,
                "h" => self.cpu.h as u32,
                "l" => self.cpu.l as u32,
                "af" => self.cpu.af() as u32,
                "bc" => self.cpu.bc() as u32,
                "de" => self.cpu.de() as u32,
                "hl" => self.cpu.hl() as u32,
                "af'" => self.cpu.af_alt() as u32,
                "bc'" => self.cpu.bc_alt() as u32,
                "de'" => self.cpu.de_alt() as u32,
                "hl'" => self.cpu.hl_alt() as u32,
                "ix" => self.cpu.ix() as u32,
                "iy" => self.cpu.iy() as u32,
                "sp" => self.cpu.sp as u32,
                "pc" => self.cpu.pc as u32,
                "i" => self.cpu.i as u32,
                "r" => self.cpu.r_register() as u32,
                "im" => self.cpu.im as u32,
                "iff1" => self.cpu.iff1 as u32,
                "iff2" => self.cpu.iff2 as u32,
                "memptr" => self.cpu.memptr as u32,
                _ => 0,
            },
            "time" | "ula" => match detail {
                "tstates" => self.board.tstates,
                "frames" => self.board.frames as u32,
                _ => 0,
            },
            "tape" => match detail {
                "microphone" => self.board.tape.microphone as u32,
                "playing" => self.board.tape.playing as u32,
                _ => 0,
            },
            _ => 0,
        }
    }

    fn user_variable(&self, name: &str) -> u32 {
        self.variables.get(name).copied().unwrap_or(0)
    }

    fn read_memory(&self, address: u16) -> u8 {
        self.board.memory.read_internal(address)
    }
}
