/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The emulated machine: the Z80 plus the board it is soldered to.
//!
//! [Board] owns everything outside the CPU (memory, ports, the event
//! scheduler, the ULA, tape deck, disk interfaces, RZX state, debugger)
//! and implements the CPU's [Bus]. [Machine] pairs it with the [Z80] and
//! runs the frame loop: opcodes until the next event, drain events,
//! repeat; the frame-interrupt event does the end-of-frame bookkeeping.
use ferrospec_core::bus::{BusValue, PortDecoder, PortEntry, PortReadResult};
use ferrospec_core::clock::{Event, EventScheduler, EventType, FTs, EVENT_TYPE_NULL};
use ferrospec_core::contention::{ContentionTables, ULA_CONTENTION_SIZE};
use ferrospec_core::memory::MemoryMap;
use ferrospec_core::z80::{Bus, Control, IrqOutcome, Z80};
use ferrospec_peripherals::fdd::FddEventTypes;
use ferrospec_peripherals::upd_fdc::{UpdEventKind, UpdEventTypes, UpdFdc};
use ferrospec_peripherals::wd_fdc::{WdEventKind, WdEventTypes};
use ferrospec_peripherals::DiskClock;
use ferrospec_formats::snapshot::MachineId;

use crate::beta::Beta128;
use crate::debugger::{BreakpointKind, Debugger};
use crate::machines::{self, Capabilities, MachineSpec};
use crate::profile::Profiler;
use crate::rzx::RzxSession;
use crate::tape::TapeDeck;
use crate::ula::Ula;

/// A runaway RZX frame is curtailed at this point so `tstates` stays a
/// valid contention-table index.
pub const RZX_SENTINEL_TIME: FTs = ULA_CONTENTION_SIZE as FTs - 1000;

/// Identifies a device in the port decode list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDeviceId {
    Ula,
    /// 0x7FFD memory paging.
    Paging7ffd,
    /// 0x1FFD paging (+2A/+3/Scorpion).
    Paging1ffd,
    /// Pentagon 1024 control port.
    PagingEff7,
    /// Timex SCLD horizontal select.
    TimexF4,
    /// Timex SCLD video/bank register.
    TimexFf,
    /// Beta 128 WD1793 register file plus system register.
    BetaStatus,
    BetaTrack,
    BetaSector,
    BetaData,
    BetaSystem,
    /// +3 µPD765 ports.
    UpdStatus,
    UpdData,
}

/// The last bytes written to the paging ports, plus derived state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Paging {
    pub last_7ffd: u8,
    pub last_1ffd: u8,
    pub last_eff7: u8,
    pub last_f4: u8,
    pub last_ff: u8,
    pub locked: bool,
    /// RAM bank at 0xC000.
    pub current_page: u8,
    pub current_rom: u8,
    /// +3 all-RAM mode.
    pub special: bool,
    /// TR-DOS ROM paged over the home ROM.
    pub romcs: bool,
}

/// Host-tweakable behaviour.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub late_timings: bool,
    pub tape_traps: bool,
    pub z80_is_cmos: bool,
    /// A Beta 128 interface plugged into a machine that lacks one.
    pub beta128: bool,
    pub rzx_autosaves: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            late_timings: false,
            tape_traps: true,
            z80_is_cmos: false,
            beta128: false,
            rzx_autosaves: true,
        }
    }
}

/// Every event type the machine registers.
#[derive(Clone, Copy, Debug)]
pub struct EventTypes {
    pub frame: EventType,
    /// Re-examine a pending maskable interrupt (EI deferral).
    pub interrupt: EventType,
    pub nmi: EventType,
    /// One-instruction NMOS IFF2 window closed.
    pub nmos_iff2: EventType,
    pub tape_edge: EventType,
    pub tape_mic_off: EventType,
    pub rzx_sentinel: EventType,
    pub debugger_time: EventType,
    pub beta_wd: WdEventTypes,
    pub beta_fdd: FddEventTypes,
    pub upd: UpdEventTypes,
    pub upd_fdd: FddEventTypes,
}

impl EventTypes {
    fn register(events: &mut EventScheduler) -> Self {
        EventTypes {
            frame: events.register("Frame interrupt"),
            interrupt: events.register("Retriggered interrupt"),
            nmi: events.register("NMI"),
            nmos_iff2: events.register("NMOS IFF2 window"),
            tape_edge: events.register("Tape edge"),
            tape_mic_off: events.register("Tape mic off"),
            rzx_sentinel: events.register("RZX sentinel"),
            debugger_time: events.register("Time breakpoint"),
            beta_wd: WdEventTypes::register(events),
            beta_fdd: FddEventTypes::register(events),
            upd: UpdEventTypes::register(events),
            upd_fdd: FddEventTypes::register(events),
        }
    }
}

/// Everything on the bus side of the CPU socket.
pub struct Board {
    pub spec: MachineSpec,
    pub settings: Settings,
    pub tstates: FTs,
    pub events: EventScheduler,
    pub event_types: EventTypes,
    pub contention: ContentionTables,
    pub memory: MemoryMap,
    pub ports: PortDecoder<PortDeviceId>,
    pub paging: Paging,
    pub ula: Ula,
    pub tape: TapeDeck,
    pub rzx: RzxSession,
    pub debugger: Debugger,
    pub profiler: Profiler,
    pub beta: Option<Beta128>,
    pub upd: Option<UpdFdc>,
    /// A Timex cartridge sits in the dock.
    pub dock_inserted: bool,
    pub frames: u64,
    pub(crate) frame_complete: bool,
}

impl Board {
    fn new(spec: MachineSpec, settings: Settings) -> Self {
        let mut events = EventScheduler::new();
        let event_types = EventTypes::register(&mut events);
        let contention = ContentionTables::build(spec.contention, settings.late_timings);

        let mut memory = MemoryMap::new(spec.rom_banks, spec.ram_banks);
        if spec.capabilities.intersects(Capabilities::MEMORY_TIMEX | Capabilities::MEMORY_SE) {
            memory = memory.with_timex_pages();
        }
        let has_beta = spec.capabilities.contains(Capabilities::TRDOS) || settings.beta128;
        if has_beta {
            memory = memory.with_betadisk_rom();
        }

        let beta = if has_beta {
            Some(Beta128::new(&spec, event_types.beta_wd, event_types.beta_fdd))
        } else {
            None
        };
        let upd = if spec.capabilities.contains(Capabilities::UPD_FDC) {
            Some(crate::plus3::make_fdc(event_types.upd, event_types.upd_fdd))
        } else {
            None
        };

        let mut board = Board {
            spec,
            settings,
            tstates: 0,
            events,
            event_types,
            contention,
            memory,
            ports: PortDecoder::new(),
            paging: Paging::default(),
            ula: Ula::new(),
            tape: TapeDeck::new(event_types.tape_edge, event_types.tape_mic_off),
            rzx: RzxSession::new(event_types.rzx_sentinel),
            debugger: Debugger::new(event_types.debugger_time),
            profiler: Profiler::new(),
            beta,
            upd,
            dock_inserted: false,
            frames: 0,
            frame_complete: false,
        };
        board.attach_ports();
        board.update_memory_map();
        board
    }

    /// Builds the port decode list for this model.
    fn attach_ports(&mut self) {
        let caps = self.spec.capabilities;
        self.ports.clear();
        self.ports.activate(&[PortEntry {
            mask: 0x0001, value: 0x0000,
            device: PortDeviceId::Ula, read: true, write: true,
        }]);
        if caps.contains(Capabilities::MEMORY_PLUS3)
            || caps.contains(Capabilities::MEMORY_SCORPION)
        {
            self.ports.activate(&[
                PortEntry { mask: 0xc002, value: 0x4000,
                            device: PortDeviceId::Paging7ffd, read: false, write: true },
                PortEntry { mask: 0xf002, value: 0x1000,
                            device: PortDeviceId::Paging1ffd, read: false, write: true },
            ]);
        } else if caps.contains(Capabilities::MEMORY_128) {
            self.ports.activate(&[PortEntry {
                mask: 0x8002, value: 0x0000,
                device: PortDeviceId::Paging7ffd, read: false, write: true,
            }]);
        }
        if caps.contains(Capabilities::MEMORY_PENT1024) {
            self.ports.activate(&[PortEntry {
                mask: 0xffff, value: 0xeff7,
                device: PortDeviceId::PagingEff7, read: false, write: true,
            }]);
        }
        if caps.intersects(Capabilities::MEMORY_TIMEX | Capabilities::MEMORY_SE) {
            self.ports.activate(&[
                PortEntry { mask: 0x00ff, value: 0x00f4,
                            device: PortDeviceId::TimexF4, read: true, write: true },
                PortEntry { mask: 0x00ff, value: 0x00ff,
                            device: PortDeviceId::TimexFf, read: true, write: true },
            ]);
        }
        if self.beta.is_some() {
            self.ports.activate(&[
                PortEntry { mask: 0x00ff, value: 0x001f,
                            device: PortDeviceId::BetaStatus, read: true, write: true },
                PortEntry { mask: 0x00ff, value: 0x003f,
                            device: PortDeviceId::BetaTrack, read: true, write: true },
                PortEntry { mask: 0x00ff, value: 0x005f,
                            device: PortDeviceId::BetaSector, read: true, write: true },
                PortEntry { mask: 0x00ff, value: 0x007f,
                            device: PortDeviceId::BetaData, read: true, write: true },
                PortEntry { mask: 0x00ff, value: 0x00ff,
                            device: PortDeviceId::BetaSystem, read: true, write: true },
            ]);
        }
        if self.upd.is_some() {
            self.ports.activate(&[
                PortEntry { mask: 0xf002, value: 0x2000,
                            device: PortDeviceId::UpdStatus, read: true, write: false },
                PortEntry { mask: 0xf002, value: 0x3000,
                            device: PortDeviceId::UpdData, read: true, write: true },
            ]);
        }
    }

    /// Rebuilds both memory maps from the current paging state.
    pub fn update_memory_map(&mut self) {
        let caps = self.spec.capabilities;
        if caps.intersects(Capabilities::MEMORY_TIMEX | Capabilities::MEMORY_SE) {
            machines::memory_map_timex(self);
        } else if caps.contains(Capabilities::MEMORY_PLUS3) {
            machines::memory_map_plus3(self);
        } else if caps.contains(Capabilities::MEMORY_SCORPION) {
            machines::memory_map_scorpion(self);
        } else if caps.contains(Capabilities::MEMORY_PENT1024) {
            machines::memory_map_pentagon(self);
        } else if caps.contains(Capabilities::MEMORY_128) {
            machines::memory_map_128(self);
        } else {
            machines::memory_map_48(self);
        }
    }

    pub(crate) fn disk_clock(&mut self) -> DiskClock<'_> {
        DiskClock::new(
            &mut self.events,
            self.tstates,
            self.spec.timings.processor_speed,
        )
    }

    /// The +3 drive motor (0x1FFD bit 3).
    pub fn set_disk_motor(&mut self, on: bool) {
        if let Some(upd) = self.upd.as_mut() {
            let mut clock = DiskClock::new(
                &mut self.events,
                self.tstates,
                self.spec.timings.processor_speed,
            );
            upd.set_motor(&mut clock, on);
        }
    }

    /// The value the data bus floats to when nothing drives it: whatever
    /// the ULA happens to be fetching from screen memory.
    pub fn unattached_port(&self) -> u8 {
        if !self.spec.floating_bus {
            return 0xff;
        }
        let params = match self.spec.contention {
            Some(params) => params,
            None => return 0xff,
        };
        let late = if self.settings.late_timings { 1 } else { 0 };
        let base = params.base + late + 3;
        if self.tstates < base {
            return 0xff;
        }
        let rel = self.tstates - base;
        let line = rel / params.tstates_per_line;
        let ttl = rel % params.tstates_per_line;
        if line >= 192 || ttl >= 128 {
            return 0xff;
        }
        let column = ((ttl & 0xf8) >> 2) + ((ttl & 2) >> 1);
        match ttl % 8 {
            0 | 2 => {
                let offset = ((line & 0xc0) << 5) | ((line & 7) << 8)
                    | ((line & 0x38) << 2) | column;
                self.memory.screen_byte(offset as u16)
            }
            1 | 3 => {
                let offset = 0x1800 + 32 * (line >> 3) + column;
                self.memory.screen_byte(offset as u16)
            }
            _ => 0xff,
        }
    }

    fn device_read(&mut self, device: PortDeviceId, port: u16) -> PortReadResult {
        const NOTHING: PortReadResult = PortReadResult { value: 0xff, attached: 0x00 };
        match device {
            PortDeviceId::Ula => {
                PortReadResult::all(self.ula.read(port, self.tape.ear_bit()))
            }
            PortDeviceId::TimexFf => PortReadResult::all(self.paging.last_ff),
            PortDeviceId::TimexF4 => PortReadResult::all(self.paging.last_f4),
            PortDeviceId::BetaStatus | PortDeviceId::BetaTrack
            | PortDeviceId::BetaSector | PortDeviceId::BetaData
            | PortDeviceId::BetaSystem => {
                let beta = match self.beta.as_mut() {
                    Some(beta) if beta.active => beta,
                    _ => return NOTHING,
                };
                let mut clock = DiskClock::new(
                    &mut self.events,
                    self.tstates,
                    self.spec.timings.processor_speed,
                );
                let value = match device {
                    PortDeviceId::BetaStatus => beta.fdc.sr_read(),
                    PortDeviceId::BetaTrack => beta.fdc.tr_read(),
                    PortDeviceId::BetaSector => beta.fdc.sec_read(),
                    PortDeviceId::BetaData => beta.fdc.dr_read(&mut clock),
                    _ => beta.system_read(),
                };
                PortReadResult::all(value)
            }
            PortDeviceId::UpdStatus | PortDeviceId::UpdData => {
                let upd = match self.upd.as_mut() {
                    Some(upd) => upd,
                    None => return NOTHING,
                };
                let mut clock = DiskClock::new(
                    &mut self.events,
                    self.tstates,
                    self.spec.timings.processor_speed,
                );
                let value = if device == PortDeviceId::UpdStatus {
                    upd.read_status()
                } else {
                    upd.read_data(&mut clock)
                };
                PortReadResult::all(value)
            }
            _ => NOTHING,
        }
    }

    fn device_write(&mut self, device: PortDeviceId, port: u16, value: u8) {
        let caps = self.spec.capabilities;
        match device {
            PortDeviceId::Ula => self.ula.write(port, value),
            PortDeviceId::Paging7ffd => {
                if caps.intersects(Capabilities::MEMORY_PENT512 | Capabilities::MEMORY_PENT1024) {
                    machines::pentagon_write_7ffd(self, value);
                } else if caps.contains(Capabilities::MEMORY_PLUS3) {
                    machines::plus3_write_7ffd(self, value);
                } else {
                    machines::write_7ffd(self, value);
                }
            }
            PortDeviceId::Paging1ffd => {
                if caps.contains(Capabilities::MEMORY_SCORPION) {
                    machines::scorpion_write_1ffd(self, value);
                } else {
                    machines::plus3_write_1ffd(self, value);
                }
            }
            PortDeviceId::PagingEff7 => machines::pentagon1024_write_eff7(self, value),
            PortDeviceId::TimexF4 => machines::timex_write_f4(self, value),
            PortDeviceId::TimexFf => machines::timex_write_ff(self, value),
            PortDeviceId::BetaStatus | PortDeviceId::BetaTrack
            | PortDeviceId::BetaSector | PortDeviceId::BetaData => {
                let beta = match self.beta.as_mut() {
                    Some(beta) if beta.active => beta,
                    _ => return,
                };
                let mut clock = DiskClock::new(
                    &mut self.events,
                    self.tstates,
                    self.spec.timings.processor_speed,
                );
                match device {
                    PortDeviceId::BetaStatus => beta.fdc.cr_write(&mut clock, value),
                    PortDeviceId::BetaTrack => beta.fdc.tr_write(value),
                    PortDeviceId::BetaSector => beta.fdc.sec_write(value),
                    _ => beta.fdc.dr_write(&mut clock, value),
                }
            }
            PortDeviceId::BetaSystem => {
                if let Some(beta) = self.beta.as_mut() {
                    if beta.active {
                        beta.system_write(value);
                    }
                }
            }
            PortDeviceId::UpdData => {
                if let Some(upd) = self.upd.as_mut() {
                    let mut clock = DiskClock::new(
                        &mut self.events,
                        self.tstates,
                        self.spec.timings.processor_speed,
                    );
                    upd.write_data(&mut clock, value);
                }
            }
            PortDeviceId::UpdStatus => {}
        }
    }

    /// Reads a port with no timing applied.
    pub fn readport_internal(&mut self, port: u16) -> u8 {
        if self.debugger.watching() {
            self.debugger.note_port(BreakpointKind::PortRead, port);
        }

        // during playback every IN comes from the recording
        if self.rzx.playing {
            match self.rzx.playback_byte() {
                Ok(value) => return value,
                Err(error) => {
                    log::warn!("RZX playback failed: {}", error);
                    self.rzx_stop_playback_inline();
                    // a null event makes the opcode loop notice the change
                    self.events.add(self.tstates, EVENT_TYPE_NULL);
                }
            }
        }

        let mut bus = BusValue::new();
        for index in 0..self.ports.len() {
            let entry = self.ports.entry(index);
            if entry.read && entry.matches(port) {
                let response = self.device_read(entry.device, port);
                bus.accept(response);
            }
        }
        let value = bus.settle(self.unattached_port());

        if self.rzx.recording {
            self.rzx.store_byte(value);
        }
        value
    }

    /// Writes a port with no timing applied.
    pub fn writeport_internal(&mut self, port: u16, value: u8) {
        if self.debugger.watching() {
            self.debugger.note_port(BreakpointKind::PortWrite, port);
        }
        for index in 0..self.ports.len() {
            let entry = self.ports.entry(index);
            if entry.write && entry.matches(port) {
                self.device_write(entry.device, port, value);
            }
        }
    }

    /// Playback failed or finished mid-read: unwind to normal emulation.
    pub(crate) fn rzx_stop_playback_inline(&mut self) {
        self.rzx.playing = false;
        self.events.remove_type(self.event_types.rzx_sentinel);
        self.events.add(self.spec.timings.tstates_per_frame, self.event_types.frame);
        if self.tstates > self.spec.timings.tstates_per_frame {
            self.tstates = self.spec.timings.tstates_per_frame;
        }
        self.debugger.fire_event("rzx", "end");
    }
}

impl Bus for Board {
    #[inline(always)]
    fn tstates(&self) -> FTs {
        self.tstates
    }

    #[inline(always)]
    fn set_tstates(&mut self, tstates: FTs) {
        self.tstates = tstates;
    }

    #[inline(always)]
    fn next_event(&self) -> FTs {
        self.events.next_event()
    }

    #[inline]
    fn contend_read(&mut self, address: u16, time: FTs) {
        if self.memory.read_page(address).contended {
            self.tstates += self.contention.mreq(self.tstates);
        }
        self.tstates += time;
    }

    #[inline]
    fn contend_read_no_mreq(&mut self, address: u16, time: FTs) {
        if self.memory.read_page(address).contended {
            self.tstates += self.contention.no_mreq(self.tstates);
        }
        self.tstates += time;
    }

    #[inline]
    fn contend_write_no_mreq(&mut self, address: u16, time: FTs) {
        if self.memory.write_page(address).contended {
            self.tstates += self.contention.no_mreq(self.tstates);
        }
        self.tstates += time;
    }

    #[inline]
    fn read_internal(&mut self, address: u16) -> u8 {
        self.memory.read_internal(address)
    }

    #[inline]
    fn write_internal(&mut self, address: u16, value: u8) {
        self.memory.write_internal(address, value);
    }

    fn read_mem(&mut self, address: u16) -> u8 {
        self.contend_read(address, 3);
        if self.debugger.watching() {
            let page = *self.memory.read_page(address);
            self.debugger.note_memory(BreakpointKind::Read, address, page);
        }
        self.memory.read_internal(address)
    }

    fn write_mem(&mut self, address: u16, value: u8) {
        if self.memory.write_page(address).contended {
            self.tstates += self.contention.mreq(self.tstates);
        }
        self.tstates += 3;
        if self.debugger.watching() {
            let page = *self.memory.write_page(address);
            self.debugger.note_memory(BreakpointKind::Write, address, page);
        }
        self.memory.write_internal(address, value);
    }

    fn read_port(&mut self, port: u16) -> u8 {
        // the whole 1+3 I/O cycle elapses before the data is latched, so a
        // floating-bus read samples the ULA fetch at the cycle's end
        self.tstates = self.contention.contend_port_early(self.tstates, port);
        self.tstates = self.contention.contend_port_late(self.tstates, port);
        let value = self.readport_internal(port);

        // the 128/+2 gate array snoops reads of its paging port
        if port & 0x8002 == 0
            && matches!(self.spec.id, MachineId::Spectrum128 | MachineId::SpectrumPlus2)
        {
            self.writeport_internal(0x7ffd, value);
        }

        value
    }

    fn write_port(&mut self, port: u16, value: u8) {
        self.tstates = self.contention.contend_port_early(self.tstates, port);
        self.writeport_internal(port, value);
        self.tstates = self.contention.contend_port_late(self.tstates, port);
    }

    fn pre_fetch(&mut self, cpu: &mut Z80) -> Control {
        if self.profiler.active() {
            self.profiler.map(cpu.pc);
        }

        // a playback frame ends when the recorded fetch count is reached
        if self.rzx.playing
            && cpu.r as i64 + self.rzx.instructions_offset as i64
                >= self.rzx.instruction_count as i64
        {
            self.events.add(self.tstates, self.event_types.frame);
            return Control::Break;
        }

        if self.debugger.watching() {
            let mut debugger = std::mem::take(&mut self.debugger);
            let trap = debugger.should_trap(cpu, self);
            self.debugger = debugger;
            if trap {
                return Control::Break;
            }
        }

        let beta_state = self.beta.as_ref().map(|beta| {
            (beta.available, beta.active, beta.pc_mask, beta.pc_value)
        });
        if let Some((true, active, pc_mask, pc_value)) = beta_state {
            // TR-DOS pages on fetches from its entry area, on 48-style
            // paging only (or with the 48 ROM selected on a 128)
            let basic_rom = !self.spec.capabilities.contains(Capabilities::MEMORY_128)
                || self.paging.current_rom == 1;
            if active {
                if basic_rom && cpu.pc >= 0x4000 {
                    if let Some(beta) = self.beta.as_mut() {
                        beta.active = false;
                    }
                    self.paging.romcs = false;
                    self.update_memory_map();
                    self.debugger.fire_event("beta128", "unpage");
                }
            } else if basic_rom && cpu.pc & pc_mask == pc_value {
                if let Some(beta) = self.beta.as_mut() {
                    beta.active = true;
                }
                self.paging.romcs = true;
                self.update_memory_map();
                self.debugger.fire_event("beta128", "page");
            }
        }

        if self.settings.tape_traps {
            if cpu.pc == 0x0556 {
                if self.tape_load_trap(cpu) {
                    return Control::Handled;
                }
            } else if cpu.pc == 0x04d0 {
                if self.tape_save_trap(cpu) {
                    return Control::Handled;
                }
            }
        }

        Control::Continue
    }

    fn post_fetch(&mut self, cpu: &mut Z80, opcode: u8) -> u8 {
        if cpu.iff2_read {
            cpu.iff2_read = false;
            // re-evaluate the interrupt line after exactly one instruction
            self.events.add(self.tstates, self.event_types.nmos_iff2);
        }
        opcode
    }

    fn interrupts_enabled(&mut self) {
        self.events.add(self.tstates + 1, self.event_types.interrupt);
    }

    fn is_cmos(&self) -> bool {
        self.settings.z80_is_cmos
    }

    fn even_m1(&self) -> bool {
        self.spec.capabilities.contains(Capabilities::EVEN_M1)
    }
}

/// What stopped a [Machine::run_frame] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameResult {
    /// The frame interrupt fired and the frame counters were rebased.
    FrameDone,
    /// A breakpoint halted the machine; resume through the debugger.
    DebuggerHalted,
}

/// A complete emulated Spectrum.
pub struct Machine {
    pub cpu: Z80,
    pub board: Board,
}

impl Machine {
    pub fn new(id: MachineId) -> Self {
        Machine::with_settings(id, Settings::default())
    }

    pub fn with_settings(id: MachineId, settings: Settings) -> Self {
        let spec = MachineSpec::for_id(id);
        let board = Board::new(spec, settings);
        let mut machine = Machine { cpu: Z80::new(), board };
        machine.reset();
        machine
    }

    /// Resets the machine: CPU, paging, peripherals and the event queue.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.board.tstates = 0;
        self.board.paging = Paging::default();
        self.board.events.reset();
        self.board.frame_complete = false;
        self.board.ula = Ula::new();
        if let Some(beta) = self.board.beta.as_mut() {
            beta.reset(&self.board.spec);
        }
        if let Some(upd) = self.board.upd.as_mut() {
            upd.master_reset();
        }
        self.board.update_memory_map();
        self.board.events.add(
            self.board.spec.timings.tstates_per_frame,
            self.board.event_types.frame,
        );
    }

    /// Runs until the frame interrupt has been processed (or a breakpoint
    /// takes over). The display, if any, should be refreshed between
    /// calls.
    pub fn run_frame(&mut self) -> FrameResult {
        self.board.frame_complete = false;
        loop {
            self.cpu.do_opcodes(&mut self.board);
            self.do_events();
            if self.board.debugger.halted() {
                return FrameResult::DebuggerHalted;
            }
            if self.board.frame_complete {
                return FrameResult::FrameDone;
            }
        }
    }

    /// Drains every due event, in order.
    pub fn do_events(&mut self) {
        while let Some(event) = self.board.events.next_due(self.board.tstates) {
            self.dispatch_event(event);
        }
    }

    /// Jumps the clock forward through every event scheduled before the
    /// nominal frame end. Used when RZX playback ends frames early.
    fn force_events(&mut self) {
        while self.board.events.next_event() < self.board.spec.timings.tstates_per_frame {
            self.board.tstates = self.board.events.next_event();
            self.do_events();
        }
    }

    fn dispatch_event(&mut self, event: Event) {
        let types = self.board.event_types;
        let etype = event.etype;
        if etype == types.frame {
            self.frame_event();
        } else if etype == types.interrupt || etype == types.nmos_iff2 {
            self.maybe_interrupt();
        } else if etype == types.nmi {
            self.cpu.nmi(&mut self.board);
        } else if etype == types.tape_edge {
            self.board.tape_next_edge(event.tstates);
        } else if etype == types.tape_mic_off {
            self.board.tape.set_microphone(false);
        } else if etype == types.rzx_sentinel {
            self.rzx_sentinel();
        } else if etype == types.debugger_time {
            self.debugger_time_event(event);
        } else if etype == types.beta_wd.fdc
            || etype == types.beta_wd.motor_off
            || etype == types.beta_wd.timeout
        {
            let kind = if etype == types.beta_wd.fdc {
                WdEventKind::Fdc
            } else if etype == types.beta_wd.motor_off {
                WdEventKind::MotorOff
            } else {
                WdEventKind::Timeout
            };
            if let Some(mut beta) = self.board.beta.take() {
                let mut clock = self.board.disk_clock();
                beta.fdc.event(&mut clock, kind);
                self.board.beta = Some(beta);
            }
        } else if etype == types.beta_fdd.motor || etype == types.beta_fdd.index {
            if let Some(mut beta) = self.board.beta.take() {
                if etype == types.beta_fdd.motor {
                    beta.fdc.fdd_motor_event(event.user_data as usize);
                } else {
                    let mut clock = self.board.disk_clock();
                    beta.fdc.fdd_index_event(&mut clock, event.user_data as usize);
                }
                self.board.beta = Some(beta);
            }
        } else if etype == types.upd.fdc || etype == types.upd.head || etype == types.upd.timeout {
            let kind = if etype == types.upd.fdc {
                UpdEventKind::Fdc
            } else if etype == types.upd.head {
                UpdEventKind::Head
            } else {
                UpdEventKind::Timeout
            };
            if let Some(mut upd) = self.board.upd.take() {
                let mut clock = self.board.disk_clock();
                upd.event(&mut clock, kind);
                self.board.upd = Some(upd);
            }
        } else if etype == types.upd_fdd.motor || etype == types.upd_fdd.index {
            if let Some(mut upd) = self.board.upd.take() {
                if etype == types.upd_fdd.motor {
                    upd.fdd_motor_event(event.user_data as usize);
                } else {
                    let mut clock = self.board.disk_clock();
                    upd.fdd_index_event(&mut clock, event.user_data as usize);
                }
                self.board.upd = Some(upd);
            }
        }
    }

    /// End of frame: RZX bookkeeping, counter rebasing, the next frame
    /// event, and the maskable interrupt.
    fn frame_event(&mut self) {
        if self.board.rzx.playing {
            self.force_events();
        }
        self.rzx_frame();

        // during playback the frame is however long the recording says
        let frame_length = if self.board.rzx.playing {
            self.board.tstates
        } else {
            self.board.spec.timings.tstates_per_frame
        };

        self.board.profiler.frame();
        self.board.events.frame(frame_length);
        self.board.debugger.rebase_time_breakpoints(
            &mut self.board.events,
            self.board.event_types.debugger_time,
        );
        self.board.tstates -= frame_length;
        if self.cpu.interrupts_enabled_at >= 0 {
            self.cpu.interrupts_enabled_at -= frame_length as i64;
        }
        self.board.frames += 1;
        self.board.frame_complete = true;

        if !self.board.rzx.playing {
            self.board.events.add(
                self.board.spec.timings.tstates_per_frame,
                self.board.event_types.frame,
            );
        }

        self.maybe_interrupt();
    }

    /// Offers the maskable interrupt while the ULA still asserts INT.
    pub fn maybe_interrupt(&mut self) {
        if self.board.tstates >= self.board.spec.timings.interrupt_length {
            return;
        }
        match self.cpu.interrupt(&mut self.board) {
            IrqOutcome::Deferred => {
                let at = (self.cpu.interrupts_enabled_at + 1).max(0) as FTs;
                self.board.events.add(at, self.board.event_types.interrupt);
            }
            _ => {}
        }
    }

    /// Raises a non-maskable interrupt at the next instruction boundary.
    pub fn queue_nmi(&mut self) {
        self.board.events.add(self.board.tstates, self.board.event_types.nmi);
    }

    fn debugger_time_event(&mut self, event: Event) {
        let mut debugger = std::mem::take(&mut self.board.debugger);
        debugger.time_breakpoint_hit(event.user_data, &self.cpu, &self.board);
        self.board.debugger = debugger;
    }

    /// Pokes memory ignoring the write map's protection, the way the
    /// debugger does.
    pub fn poke(&mut self, address: u16, value: u8) {
        self.board.memory.write_internal(address, value);
    }

    /// Reads memory with no side effects.
    pub fn peek(&self, address: u16) -> u8 {
        self.board.memory.read_internal(address)
    }

    /// Loads a ROM image into the given bank.
    pub fn load_rom(&mut self, bank: usize, image: &[u8]) -> ferrospec_core::memory::Result<()> {
        self.board.memory.load_rom_bank(bank, image)
    }
}
