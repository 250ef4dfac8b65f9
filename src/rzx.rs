/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! RZX recording and playback against the live machine.
//!
//! Recording counts instructions through the R register (16 bits wide in
//! this core precisely so it can do this job) and buffers the bytes every
//! IN consumed during the frame. Playback replays those bytes, ends each
//! frame at the recorded fetch count, and guards against runaway frames
//! with a sentinel event that folds the clock back into the contention
//! table's domain.
use ferrospec_core::clock::{EventType, FTs};
use ferrospec_formats::rzx::{Rzx, RzxBlock, RzxError};
use ferrospec_formats::snapshot::Snapshot;

use crate::machine::{Machine, RZX_SENTINEL_TIME};

const SENTINEL_TIME_REDUCE: FTs = 8000;
/// A new autosnap every five seconds of recorded frames.
const AUTOSAVE_INTERVAL: usize = 5 * 50;

pub struct RzxSession {
    pub recording: bool,
    pub playing: bool,
    rzx: Option<Rzx>,
    /// `instruction count = R + offset`; renormalised every frame.
    pub instructions_offset: i32,
    /// The recorded fetch count of the frame being played back.
    pub instruction_count: u32,
    in_bytes: Vec<u8>,
    autosave_frame_count: usize,
    sentinel_warned: bool,
    pub(crate) sentinel_event: EventType,
}

impl RzxSession {
    pub fn new(sentinel_event: EventType) -> Self {
        RzxSession {
            recording: false,
            playing: false,
            rzx: None,
            instructions_offset: 0,
            instruction_count: 0,
            in_bytes: Vec::new(),
            autosave_frame_count: 0,
            sentinel_warned: false,
            sentinel_event,
        }
    }

    pub fn active(&self) -> bool {
        self.recording || self.playing
    }

    /// Appends one IN byte to the frame being recorded.
    pub fn store_byte(&mut self, value: u8) {
        if self.in_bytes.capacity() == 0 {
            self.in_bytes.reserve(50);
        }
        self.in_bytes.push(value);
    }

    /// Serves the next IN byte during playback.
    pub fn playback_byte(&mut self) -> Result<u8, RzxError> {
        match self.rzx.as_mut() {
            Some(rzx) => rzx.playback_byte(),
            None => Err(RzxError::InputExhausted),
        }
    }

    pub fn container(&self) -> Option<&Rzx> {
        self.rzx.as_ref()
    }
}

impl Machine {
    /// Resets the instruction counter so `R + offset` counts from zero,
    /// normalising R to its architectural seven bits on the way.
    fn rzx_counter_reset(&mut self) {
        self.cpu.r &= 0x7f;
        self.board.rzx.instructions_offset = -(self.cpu.r as i32);
    }

    /// Starts recording, optionally from a snapshot of the current state.
    pub fn rzx_start_recording(&mut self, embed_snapshot: bool) {
        if self.board.rzx.playing {
            return;
        }
        let mut rzx = Rzx::new();
        if embed_snapshot {
            rzx.add_snap(self.snapshot_to(), false);
        }
        rzx.start_input(self.board.tstates);
        self.board.rzx.rzx = Some(rzx);
        self.board.rzx.in_bytes.clear();
        self.board.rzx.autosave_frame_count = 0;
        self.board.rzx.recording = true;
        self.rzx_counter_reset();
    }

    /// Stops recording and hands back the finished container.
    pub fn rzx_stop_recording(&mut self) -> Option<Rzx> {
        if !self.board.rzx.recording {
            return None;
        }
        self.board.rzx.recording = false;
        let snap = self.snapshot_to();
        let mut rzx = self.board.rzx.rzx.take()?;
        rzx.add_snap(snap, false);
        self.board.rzx.in_bytes = Vec::new();
        Some(rzx)
    }

    /// Starts playback of a recording, restoring its initial snapshot.
    pub fn rzx_start_playback(&mut self, mut rzx: Rzx) -> Result<(), RzxError> {
        if self.board.rzx.recording {
            return Ok(());
        }
        if let Some(snap) = rzx.start_playback() {
            let snap = snap.clone();
            self.snapshot_from(&snap);
        }

        // the recording now decides when frames end
        let frame_event = self.board.event_types.frame;
        self.board.events.remove_type(frame_event);
        let sentinel = self.board.rzx.sentinel_event;
        self.board.events.add(RZX_SENTINEL_TIME, sentinel);
        self.board.rzx.sentinel_warned = false;

        self.board.tstates = rzx.tstates();
        self.board.rzx.instruction_count = rzx.instructions() as u32;
        self.board.rzx.rzx = Some(rzx);
        self.board.rzx.playing = true;
        self.rzx_counter_reset();
        Ok(())
    }

    /// Stops playback; `add_interrupt` restores the normal frame event.
    pub fn rzx_stop_playback(&mut self, add_interrupt: bool) {
        if !self.board.rzx.playing {
            return;
        }
        self.board.rzx.playing = false;
        self.board.rzx.rzx = None;
        let sentinel = self.board.rzx.sentinel_event;
        self.board.events.remove_type(sentinel);

        let frame_length = self.board.spec.timings.tstates_per_frame;
        if add_interrupt {
            let frame_event = self.board.event_types.frame;
            self.board.events.add(frame_length, frame_event);
            if self.board.tstates > frame_length {
                self.board.tstates = frame_length;
            }
        } else {
            // the pending frame event zeroes the counter when it reduces
            self.board.tstates = frame_length;
        }
        self.board.debugger.fire_event("rzx", "end");
    }

    /// Per-frame RZX bookkeeping, run from the frame event.
    pub(crate) fn rzx_frame(&mut self) {
        if self.board.rzx.recording {
            self.rzx_recording_frame();
        } else if self.board.rzx.playing {
            self.rzx_playback_frame();
        }
    }

    fn rzx_recording_frame(&mut self) {
        let instructions =
            (self.cpu.r as i32 + self.board.rzx.instructions_offset) as u16;
        let in_bytes = std::mem::replace(&mut self.board.rzx.in_bytes, Vec::new());
        let stored = match self.board.rzx.rzx.as_mut() {
            Some(rzx) => rzx.store_frame(instructions, &in_bytes).is_ok(),
            None => false,
        };
        if !stored {
            log::warn!("RZX recording lost its input block; stopping");
            self.rzx_stop_recording();
            return;
        }
        self.rzx_counter_reset();

        if self.board.settings.rzx_autosaves {
            self.rzx_autosave_frame();
        }
    }

    fn rzx_autosave_frame(&mut self) {
        self.board.rzx.autosave_frame_count += 1;
        if self.board.rzx.autosave_frame_count % AUTOSAVE_INTERVAL != 0 {
            return;
        }
        let snap = self.snapshot_to();
        let tstates = self.board.tstates;
        if let Some(rzx) = self.board.rzx.rzx.as_mut() {
            rzx.add_snap(snap, true);
            rzx.start_input(tstates);
            autosave_prune(rzx);
        }
    }

    fn rzx_playback_frame(&mut self) {
        let advance = match self.board.rzx.rzx.as_mut().map(|rzx| rzx.playback_frame()) {
            Some(Ok(advance)) => advance,
            _ => {
                self.rzx_stop_playback(false);
                return;
            }
        };
        if advance.finished {
            log::info!("finished RZX playback");
            self.rzx_stop_playback(false);
            return;
        }

        // push the sentinel back out; the frame event will rebase it along
        // with everything else
        let sentinel = self.board.rzx.sentinel_event;
        self.board.events.remove_type(sentinel);
        self.board.events.add(RZX_SENTINEL_TIME + self.board.tstates, sentinel);

        if let Some(snap) = advance.snap {
            self.snapshot_from(&snap);
        }

        self.board.rzx.instruction_count = self.board.rzx.rzx.as_ref()
            .map(|rzx| rzx.instructions() as u32)
            .unwrap_or(0);
        self.rzx_counter_reset();
    }

    /// The sentinel event: fold the clock back before it can overrun the
    /// contention tables.
    pub(crate) fn rzx_sentinel(&mut self) {
        if !self.board.rzx.sentinel_warned {
            // once per playback is enough
            log::warn!("RZX frame is longer than {} tstates", RZX_SENTINEL_TIME);
            self.board.rzx.sentinel_warned = true;
        }
        self.board.tstates -= SENTINEL_TIME_REDUCE;
        self.cpu.interrupts_enabled_at -= SENTINEL_TIME_REDUCE as i64;
        let sentinel = self.board.rzx.sentinel_event;
        self.board.events.add(RZX_SENTINEL_TIME, sentinel);
    }

    /// Rewinds to the latest snapshot in the recording and records on from
    /// there.
    pub fn rzx_rollback(&mut self) -> Result<(), RzxError> {
        let snap = match self.board.rzx.rzx.as_mut() {
            Some(rzx) => rzx.rollback()?,
            None => return Ok(()),
        };
        self.rzx_restart_after_rollback(snap)
    }

    /// Rewinds to the `which`-th snapshot of the recording.
    pub fn rzx_rollback_to(&mut self, which: usize) -> Result<(), RzxError> {
        let snap = match self.board.rzx.rzx.as_mut() {
            Some(rzx) => rzx.rollback_to(which)?,
            None => return Ok(()),
        };
        self.rzx_restart_after_rollback(snap)
    }

    fn rzx_restart_after_rollback(&mut self, snap: Snapshot) -> Result<(), RzxError> {
        self.snapshot_from(&snap);
        let tstates = self.board.tstates;
        if let Some(rzx) = self.board.rzx.rzx.as_mut() {
            rzx.start_input(tstates);
        }
        self.rzx_counter_reset();
        self.board.rzx.autosave_frame_count = autosave_reset(self.board.rzx.rzx.as_ref());
        Ok(())
    }
}

/// Drops autosaves so only those roughly 15, 60 and 300 seconds back
/// survive.
fn autosave_prune(rzx: &mut Rzx) {
    let mut autosaves = Vec::new();
    let mut frames = 0usize;
    for (index, block) in rzx.blocks().iter().enumerate() {
        match block {
            RzxBlock::Input(input) => frames += input.frames.len(),
            RzxBlock::Snapshot { automatic: true, .. } => autosaves.push((index, frames)),
            RzxBlock::Snapshot { .. } => {}
        }
    }
    // age = frames before now
    for entry in autosaves.iter_mut() {
        entry.1 = frames - entry.1;
    }
    for i in (1..autosaves.len()).rev() {
        let (index, age) = autosaves[i];
        let (_, older_age) = autosaves[i - 1];
        if (age == 15 * 50 || age == 60 * 50 || age == 300 * 50) && older_age < 2 * age {
            rzx.remove_block(index);
        }
    }
}

/// Frames recorded since the last autosnap, recomputed after a rollback.
fn autosave_reset(rzx: Option<&Rzx>) -> usize {
    let rzx = match rzx {
        Some(rzx) => rzx,
        None => return 0,
    };
    let mut frames = 0usize;
    for block in rzx.blocks() {
        match block {
            RzxBlock::Input(input) => frames += input.frames.len(),
            RzxBlock::Snapshot { automatic: true, .. } => frames = 0,
            RzxBlock::Snapshot { .. } => {}
        }
    }
    frames % AUTOSAVE_INTERVAL
}
