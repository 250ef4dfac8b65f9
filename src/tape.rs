/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The tape deck: pulse playback through the event scheduler, and the
//! flash-load traps that bypass the ROM loader entirely.
use ferrospec_core::clock::{EventType, FTs};
use ferrospec_core::z80::{Z80, FLAG_C};
use ferrospec_formats::tape::{
    Tape, TapeBlock, ROM_BIT0_LENGTH, ROM_BIT1_LENGTH, ROM_PILOT_COUNT_DATA,
    ROM_PILOT_COUNT_HEADER, ROM_PILOT_LENGTH, ROM_SYNC1_LENGTH, ROM_SYNC2_LENGTH,
};

use crate::machine::Board;
use crate::machines::Capabilities;

/// Where the pulse generator is inside the current block.
#[derive(Clone, Copy, Debug, PartialEq)]
enum TapePhase {
    /// About to start the current block.
    BlockStart,
    Pilot { remaining: u32 },
    Sync1,
    Sync2,
    Data { index: usize, bit: u8, half: u8 },
    Tone { remaining: u32 },
    PulseSeq { index: usize },
    Pause,
}

/// One step of the pulse generator.
#[derive(Clone, Copy, Debug, Default)]
struct Edge {
    /// T-states until the next edge.
    duration: FTs,
    /// Invert the microphone level now.
    toggle: bool,
    /// The tape ran past its last block.
    finished: bool,
    /// A block boundary was crossed.
    block_end: bool,
    /// A stop-the-tape marker.
    stop: bool,
    /// Stop only on 48-style machines.
    stop48: bool,
}

pub struct TapeDeck {
    tape: Tape,
    pub playing: bool,
    autoplay: bool,
    pub microphone: bool,
    pub modified: bool,
    phase: TapePhase,
    edge_event: EventType,
    mic_off_event: EventType,
}

impl TapeDeck {
    pub fn new(edge_event: EventType, mic_off_event: EventType) -> Self {
        TapeDeck {
            tape: Tape::new(),
            playing: false,
            autoplay: false,
            microphone: false,
            modified: false,
            phase: TapePhase::BlockStart,
            edge_event,
            mic_off_event,
        }
    }

    pub fn insert(&mut self, tape: Tape) {
        self.tape = tape;
        self.playing = false;
        self.phase = TapePhase::BlockStart;
        self.modified = false;
    }

    pub fn eject(&mut self) -> Tape {
        self.playing = false;
        self.phase = TapePhase::BlockStart;
        std::mem::replace(&mut self.tape, Tape::new())
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn rewind(&mut self) {
        self.tape.rewind();
        self.phase = TapePhase::BlockStart;
    }

    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// The EAR input as the ULA sees it, when the deck drives it.
    pub fn ear_bit(&self) -> Option<bool> {
        if self.playing {
            Some(self.microphone)
        } else {
            None
        }
    }

    pub fn set_microphone(&mut self, level: bool) {
        self.microphone = level;
    }

    /// Computes the next pulse edge, advancing through block structure.
    /// Zero-length phases (metadata, empty blocks) are skipped in place.
    fn advance_edge(&mut self, processor_speed: u32) -> Edge {
        let ms = processor_speed / 1000;
        loop {
            let block = match self.tape.current_block() {
                Some(block) => block.clone(),
                None => return Edge { finished: true, ..Edge::default() },
            };
            match (&block, self.phase) {
                (TapeBlock::Metadata { .. }, _) => {
                    self.next_block();
                    continue;
                }
                (TapeBlock::Stop48, _) => {
                    self.next_block();
                    return Edge { stop48: true, block_end: true, ..Edge::default() };
                }
                (TapeBlock::Pause { ms: pause }, _) => {
                    let duration = pause * ms;
                    self.next_block();
                    if duration == 0 {
                        // a zero pause means stop the tape
                        return Edge { stop: true, block_end: true, ..Edge::default() };
                    }
                    return Edge { duration, block_end: true, ..Edge::default() };
                }
                (TapeBlock::PureTone { pulse_length, count }, phase) => {
                    let remaining = match phase {
                        TapePhase::Tone { remaining } => remaining,
                        _ => *count,
                    };
                    if remaining == 0 {
                        self.next_block();
                        return Edge { block_end: true, ..Edge::default() };
                    }
                    self.phase = TapePhase::Tone { remaining: remaining - 1 };
                    return Edge { duration: *pulse_length, toggle: true, ..Edge::default() };
                }
                (TapeBlock::Pulses { lengths }, phase) => {
                    let index = match phase {
                        TapePhase::PulseSeq { index } => index,
                        _ => 0,
                    };
                    if index >= lengths.len() {
                        self.next_block();
                        return Edge { block_end: true, ..Edge::default() };
                    }
                    self.phase = TapePhase::PulseSeq { index: index + 1 };
                    return Edge {
                        duration: lengths[index],
                        toggle: true,
                        ..Edge::default()
                    };
                }
                (TapeBlock::Rom { data, pause_ms }, phase) => {
                    if data.is_empty() {
                        self.next_block();
                        return Edge { block_end: true, ..Edge::default() };
                    }
                    let pilot_count = if data[0] & 0x80 != 0 {
                        ROM_PILOT_COUNT_DATA
                    } else {
                        ROM_PILOT_COUNT_HEADER
                    };
                    if let Some(edge) = self.data_block_edge(
                        phase,
                        data,
                        8,
                        pilot_count,
                        ROM_PILOT_LENGTH,
                        ROM_SYNC1_LENGTH,
                        ROM_SYNC2_LENGTH,
                        ROM_BIT0_LENGTH,
                        ROM_BIT1_LENGTH,
                        *pause_ms * ms,
                    ) {
                        return edge;
                    }
                    continue;
                }
                (
                    TapeBlock::Turbo {
                        pilot_length, pilot_count, sync1_length, sync2_length,
                        bit0_length, bit1_length, used_bits, pause_ms, data,
                    },
                    phase,
                ) => {
                    if let Some(edge) = self.data_block_edge(
                        phase,
                        data,
                        *used_bits,
                        *pilot_count,
                        *pilot_length,
                        *sync1_length,
                        *sync2_length,
                        *bit0_length,
                        *bit1_length,
                        *pause_ms * ms,
                    ) {
                        return edge;
                    }
                    continue;
                }
                (
                    TapeBlock::PureData { bit0_length, bit1_length, used_bits, pause_ms, data },
                    phase,
                ) => {
                    // straight to data: no pilot, no sync
                    let phase = match phase {
                        TapePhase::BlockStart => TapePhase::Data { index: 0, bit: 7, half: 0 },
                        other => other,
                    };
                    if let Some(edge) = self.data_block_edge(
                        phase,
                        data,
                        *used_bits,
                        0,
                        0,
                        0,
                        0,
                        *bit0_length,
                        *bit1_length,
                        *pause_ms * ms,
                    ) {
                        return edge;
                    }
                    continue;
                }
            }
        }
    }

    /// The shared pilot/sync/data/pause ladder of the loader blocks.
    /// Returns `None` when the block ended and the caller should move on.
    #[allow(clippy::too_many_arguments)]
    fn data_block_edge(
        &mut self,
        phase: TapePhase,
        data: &[u8],
        used_bits: u8,
        pilot_count: u32,
        pilot_length: u32,
        sync1_length: u32,
        sync2_length: u32,
        bit0_length: u32,
        bit1_length: u32,
        pause: FTs,
    ) -> Option<Edge> {
        match phase {
            TapePhase::BlockStart => {
                if pilot_count == 0 {
                    self.phase = TapePhase::Data { index: 0, bit: 7, half: 0 };
                    return self.data_block_edge(
                        self.phase, data, used_bits, pilot_count, pilot_length,
                        sync1_length, sync2_length, bit0_length, bit1_length, pause,
                    );
                }
                self.phase = TapePhase::Pilot { remaining: pilot_count - 1 };
                Some(Edge { duration: pilot_length, toggle: true, ..Edge::default() })
            }
            TapePhase::Pilot { remaining } => {
                if remaining == 0 {
                    self.phase = TapePhase::Sync1;
                    return Some(Edge {
                        duration: sync1_length,
                        toggle: true,
                        ..Edge::default()
                    });
                }
                self.phase = TapePhase::Pilot { remaining: remaining - 1 };
                Some(Edge { duration: pilot_length, toggle: true, ..Edge::default() })
            }
            TapePhase::Sync1 => {
                self.phase = TapePhase::Sync2;
                Some(Edge { duration: sync2_length, toggle: true, ..Edge::default() })
            }
            TapePhase::Sync2 => {
                self.phase = TapePhase::Data { index: 0, bit: 7, half: 0 };
                self.data_block_edge(
                    self.phase, data, used_bits, pilot_count, pilot_length,
                    sync1_length, sync2_length, bit0_length, bit1_length, pause,
                )
            }
            TapePhase::Data { index, bit, half } => {
                if index >= data.len() {
                    self.phase = TapePhase::Pause;
                    return self.data_block_edge(
                        self.phase, data, used_bits, pilot_count, pilot_length,
                        sync1_length, sync2_length, bit0_length, bit1_length, pause,
                    );
                }
                let last_byte = index == data.len() - 1;
                let bits_in_byte = if last_byte { used_bits } else { 8 };
                let duration = if data[index] & (1 << bit) != 0 {
                    bit1_length
                } else {
                    bit0_length
                };
                // two half-pulses per bit
                self.phase = if half == 0 {
                    TapePhase::Data { index, bit, half: 1 }
                } else {
                    let consumed = 8 - bit as usize;
                    if consumed >= bits_in_byte as usize {
                        TapePhase::Data { index: index + 1, bit: 7, half: 0 }
                    } else {
                        TapePhase::Data { index, bit: bit - 1, half: 0 }
                    }
                };
                Some(Edge { duration, toggle: true, ..Edge::default() })
            }
            TapePhase::Pause => {
                self.next_block();
                if pause == 0 {
                    return Some(Edge { block_end: true, ..Edge::default() });
                }
                Some(Edge { duration: pause, block_end: true, ..Edge::default() })
            }
            // a stale phase from a previous block shape
            _ => {
                self.phase = TapePhase::BlockStart;
                None
            }
        }
    }

    fn next_block(&mut self) {
        self.tape.advance();
        self.phase = TapePhase::BlockStart;
    }
}

impl Board {
    /// Starts the tape rolling and schedules the first edge.
    pub fn tape_play(&mut self, autoplay: bool) {
        if self.tape.is_empty() || self.tape.playing {
            return;
        }
        self.tape.playing = true;
        self.tape.autoplay = autoplay;
        self.tape.microphone = false;
        let mic_off = self.tape.mic_off_event;
        self.events.remove_type(mic_off);
        let edge_event = self.tape.edge_event;
        self.events.add(self.tstates, edge_event);
        self.debugger.fire_event("tape", "play");
    }

    pub fn tape_stop(&mut self) {
        if self.tape.playing {
            self.tape.playing = false;
            let edge_event = self.tape.edge_event;
            self.events.remove_type(edge_event);
            // some protections poll the EAR level just after loading ends;
            // hold it for a frame before letting it drop
            let mic_off = self.tape.mic_off_event;
            self.events.add(
                self.tstates + self.spec.timings.tstates_per_frame,
                mic_off,
            );
        }
        self.debugger.fire_event("tape", "stop");
    }

    /// The tape-edge event: invert the EAR level and queue the next edge.
    pub(crate) fn tape_next_edge(&mut self, last_tstates: FTs) {
        if !self.tape.playing {
            return;
        }
        let edge = self.tape.advance_edge(self.spec.timings.processor_speed);
        if edge.toggle {
            self.tape.microphone = !self.tape.microphone;
        }
        if edge.finished || edge.stop {
            self.tape_stop();
            return;
        }
        if edge.stop48
            && !self.spec.capabilities.contains(Capabilities::MEMORY_128)
        {
            // checked against the 128K capability, not the machine id: a
            // +3 in 48 paging still has the capability and keeps rolling
            self.tape_stop();
            return;
        }
        if edge.block_end {
            // autostarted tapes stop ahead of a ROM block when the traps
            // will take over anyway
            let next_is_rom = self
                .tape
                .tape
                .current_block()
                .map(|b| b.is_standard_rom())
                .unwrap_or(false);
            if self.tape.autoplay && self.settings.tape_traps && !self.rzx.recording
                && next_is_rom
            {
                self.tape_stop();
                return;
            }
        }
        let edge_event = self.tape.edge_event;
        self.events.add(last_tstates + edge.duration, edge_event);
    }

    /// Whether PC is inside a ROM the tape traps understand.
    fn in_tape_rom(&self) -> bool {
        if self.paging.romcs {
            return false;
        }
        let caps = self.spec.capabilities;
        if caps.contains(Capabilities::MEMORY_PLUS3) {
            !self.paging.special && self.paging.current_rom == 3
        } else if caps.contains(Capabilities::MEMORY_128) {
            self.paging.current_rom == 1
        } else {
            true
        }
    }

    /// The LD-BYTES trap. Returns true when the block was consumed and the
    /// ROM routine bypassed.
    pub(crate) fn tape_load_trap(&mut self, cpu: &mut Z80) -> bool {
        if self.tape.playing || self.rzx.playing || self.rzx.recording {
            return false;
        }
        if !self.in_tape_rom() || self.tape.is_empty() {
            return false;
        }

        // skip any descriptive blocks
        while matches!(self.tape.tape.current_block(), Some(TapeBlock::Metadata { .. })) {
            self.tape.next_block();
        }
        let block = match self.tape.tape.current_block() {
            Some(block) => block.clone(),
            None => return false,
        };

        let data = match &block {
            TapeBlock::Rom { data, .. }
                if self.tape.phase == TapePhase::BlockStart
                    && data.len() == cpu.de() as usize + 2 =>
            {
                data.clone()
            }
            _ => {
                // non-ROM or partial load: play it for real
                self.tape_play(true);
                return false;
            }
        };

        cpu.pc = if matches!(
            self.spec.id,
            ferrospec_formats::snapshot::MachineId::Tc2068
                | ferrospec_formats::snapshot::MachineId::Ts2068
        ) {
            0x0136
        } else {
            0x05e2
        };

        self.trap_load_block(cpu, &data);

        // a following ROM block is left ready for the next trap; anything
        // else resumes from the pause of this one
        let next_is_rom = self
            .tape
            .tape
            .blocks()
            .get(self.tape.tape.position() + 1)
            .map(|b| b.is_standard_rom())
            .unwrap_or(false);
        if next_is_rom {
            self.tape.next_block();
        } else {
            self.tape.phase = TapePhase::Pause;
        }
        true
    }

    /// The register-level LD-BYTES contract.
    fn trap_load_block(&mut self, cpu: &mut Z80, data: &[u8]) {
        let length = data.len();
        let de = cpu.de() as usize;
        let read = (length - 1).min(de);

        if length == 0 {
            cpu.l = 1;
            cpu.f_alt = 1;
            cpu.f &= !FLAG_C;
            return;
        }

        let verify = cpu.f_alt & FLAG_C == 0;
        // the ROM's register usage leaks the flag byte into the transfer
        // count on the early-exit paths
        let mut transferred = cpu.a_alt as usize;
        cpu.a = 0;

        let mut parity = data[0];
        cpu.l = data[0];

        if de == 0 {
            // zero-length load: one byte read but not counted as data
            transferred = 0;
            cpu.b = 0xb0;
            cpu.a = parity;
            cpu.cp_a(1);
        } else {
            cpu.set_af_alt(0x0145);
            let flag = transferred as u8;
            let mut error = parity != flag;

            if !error {
                cpu.l = data[read];
                transferred = read;
                for i in 0..read {
                    let byte = data[1 + i];
                    parity ^= byte;
                    if verify {
                        if byte != self.memory.read_internal(cpu.ix().wrapping_add(i as u16)) {
                            cpu.l = byte;
                            transferred = i;
                            error = true;
                            break;
                        }
                    } else {
                        self.memory.write_internal(cpu.ix().wrapping_add(i as u16), byte);
                    }
                }
            }

            if !error {
                if de == transferred && read + 1 < length {
                    // the parity byte
                    parity ^= data[1 + read];
                    cpu.a = parity;
                    cpu.cp_a(1);
                    cpu.b = 0xb0;
                } else {
                    // ran out of tape mid-byte
                    cpu.b = 255;
                    cpu.l = 1;
                    let b = cpu.b;
                    cpu.b = cpu.inc8(b);
                    cpu.f &= !FLAG_C;
                }
            } else {
                cpu.f &= !FLAG_C;
            }
        }

        cpu.c = 1;
        cpu.h = parity;
        let de = cpu.de().wrapping_sub(transferred as u16);
        cpu.set_de(de);
        let ix = cpu.ix().wrapping_add(transferred as u16);
        cpu.set_ix(ix);
    }

    /// The SA-BYTES trap: append a ROM block built from memory.
    pub(crate) fn tape_save_trap(&mut self, cpu: &mut Z80) -> bool {
        if self.rzx.playing || self.rzx.recording {
            return false;
        }
        if !self.in_tape_rom() {
            return false;
        }

        let de = cpu.de() as usize;
        let mut data = Vec::with_capacity(de + 2);
        let mut parity = cpu.a;
        data.push(cpu.a);
        for i in 0..de {
            let byte = self.memory.read_internal(cpu.ix().wrapping_add(i as u16));
            parity ^= byte;
            data.push(byte);
        }
        data.push(parity);

        self.tape.tape.append(TapeBlock::Rom { pause_ms: 1000, data });
        self.tape.modified = true;

        cpu.pc = if matches!(
            self.spec.id,
            ferrospec_formats::snapshot::MachineId::Tc2068
                | ferrospec_formats::snapshot::MachineId::Ts2068
        ) {
            0x00e4
        } else {
            0x053e
        };
        true
    }
}
