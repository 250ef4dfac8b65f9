/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The floppy drive model.
//!
//! A drive spins a [Disk]: a per-track ring of bytes with parallel bitmaps
//! for clock-marked bytes (address marks), FM-recorded bytes and weak
//! bytes. Reading and writing advance a position counter that wraps at the
//! track length and raises the index signal at the wrap point. The
//! mechanical side (motor spin-up, the READY protocol, the index pulse
//! train) runs on the machine's event scheduler.
use bitvec::prelude::*;
use rand::{Rng, SeedableRng, rngs::SmallRng};

use ferrospec_core::clock::{EventScheduler, EventType};

use crate::DiskClock;

/// Drives refuse disks with more tracks than the head can reach plus this.
const TRACK_THRESHOLD: usize = 10;

const LOAD_FACT: usize = 2;
const HEAD_FACT: usize = 16;
const STEP_FACT: usize = 34;

/// Bytes per track of a double-density disk.
pub const DD_BPT: usize = 6250;
/// Bytes per track of a single-density disk.
pub const SD_BPT: usize = 3125;

/// Data word returned when the head reads nothing (no disk, no motor,
/// unreadable track).
pub const NO_DATA: u16 = 0x100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FddType {
    /// Drive absent or disabled.
    None,
    /// Selection couples head load (single-drive wiring).
    Shugart,
    /// Selection and head load are independent lines.
    IbmPc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FddDir {
    StepOut,
    StepIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FddStatus {
    Ok,
    BadGeometry,
    ReadOnly,
    NotPresent,
}

/// Drive geometry presets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FddParams {
    pub heads: usize,
    pub cylinders: usize,
}

impl FddParams {
    pub const SINGLE_40: FddParams = FddParams { heads: 1, cylinders: 40 };
    pub const DOUBLE_40: FddParams = FddParams { heads: 2, cylinders: 40 };
    pub const SINGLE_80: FddParams = FddParams { heads: 1, cylinders: 80 };
    pub const DOUBLE_80: FddParams = FddParams { heads: 2, cylinders: 80 };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskDensity {
    Single,
    Double,
    High,
}

/// One track: the byte ring plus its mark bitmaps.
#[derive(Clone, Debug)]
pub struct Track {
    pub data: Vec<u8>,
    /// Bytes recorded with a missing-clock pattern (0xA1/0xC2 marks).
    pub clocks: BitVec,
    /// Bytes recorded in FM.
    pub fm: BitVec,
    /// Bytes that read back unreliably.
    pub weak: BitVec,
}

impl Track {
    fn new(bpt: usize) -> Self {
        Track {
            data: vec![0u8; bpt],
            clocks: BitVec::repeat(false, bpt),
            fm: BitVec::repeat(false, bpt),
            weak: BitVec::repeat(false, bpt),
        }
    }
}

/// An in-memory floppy disk image.
#[derive(Clone, Debug)]
pub struct Disk {
    pub sides: usize,
    pub cylinders: usize,
    pub bpt: usize,
    pub wrprot: bool,
    pub dirty: bool,
    pub density: DiskDensity,
    pub have_weak: bool,
    tracks: Vec<Track>,
}

impl Disk {
    /// An unformatted double-density disk.
    pub fn new(sides: usize, cylinders: usize) -> Self {
        Disk::with_geometry(sides, cylinders, DD_BPT, DiskDensity::Double)
    }

    pub fn with_geometry(
        sides: usize,
        cylinders: usize,
        bpt: usize,
        density: DiskDensity,
    ) -> Self {
        let tracks = (0..sides * cylinders).map(|_| Track::new(bpt)).collect();
        Disk {
            sides,
            cylinders,
            bpt,
            wrprot: false,
            dirty: false,
            density,
            have_weak: false,
            tracks,
        }
    }

    #[inline]
    fn track_index(&self, head: usize, cylinder: usize) -> usize {
        self.sides * cylinder + head
    }

    pub fn track(&self, head: usize, cylinder: usize) -> &Track {
        &self.tracks[self.track_index(head, cylinder)]
    }

    pub fn track_mut(&mut self, head: usize, cylinder: usize) -> &mut Track {
        let index = self.track_index(head, cylinder);
        &mut self.tracks[index]
    }

    /// Marks a span of bytes on one track as weak.
    pub fn set_weak_span(&mut self, head: usize, cylinder: usize, start: usize, len: usize) {
        let track = self.track_mut(head, cylinder);
        for i in start..(start + len).min(track.weak.len()) {
            track.weak.set(i, true);
        }
        self.have_weak = true;
    }
}

/// The event types one drive set schedules.
#[derive(Clone, Copy, Debug)]
pub struct FddEventTypes {
    pub motor: EventType,
    pub index: EventType,
}

impl FddEventTypes {
    pub fn register(events: &mut EventScheduler) -> Self {
        FddEventTypes {
            motor: events.register("FDD motor on"),
            index: events.register("FDD index"),
        }
    }
}

/// One drive unit.
pub struct Fdd {
    pub fdd_type: FddType,
    pub fdd_heads: usize,
    pub fdd_cylinders: usize,

    /// Track-0 sensor.
    pub tr00: bool,
    /// Index hole under the sensor.
    pub index: bool,
    pub wrprot: bool,
    /// Last byte moved under the head; bit 8 flags a clock-marked byte.
    pub data: u16,
    /// Bit 0: FM recording, bit 1: weak byte.
    pub marks: u8,

    pub loaded: bool,
    pub upsidedown: bool,
    pub selected: bool,
    pub ready: bool,
    pub dskchg: bool,
    pub hdout: bool,
    pub status: FddStatus,

    /// The FDC parked a "wake me at the next index hole" request here.
    pub fdc_wait_index: bool,

    disk: Option<Disk>,
    unreadable: bool,
    do_read_weak: bool,
    c_head: usize,
    c_cylinder: usize,
    c_bpt: usize,
    /// Byte offset on the current track.
    pos: usize,
    track_valid: bool,
    motoron: bool,
    loadhead: bool,
    pub index_pulse: bool,

    /// This drive's identity in event user data.
    unit: u32,
    events: FddEventTypes,
    rng: SmallRng,
}

impl core::fmt::Debug for Fdd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Fdd {{ unit: {}, type: {:?}, cyl: {}/{}, head: {}, loaded: {}, \
             motor: {}, ready: {}, pos: {}/{} }}",
            self.unit, self.fdd_type, self.c_cylinder, self.fdd_cylinders,
            self.c_head, self.loaded, self.motoron, self.ready,
            self.pos, self.c_bpt
        )
    }
}

impl Fdd {
    pub fn new(fdd_type: FddType, params: FddParams, unit: u32, events: FddEventTypes) -> Self {
        let present = fdd_type != FddType::None;
        Fdd {
            fdd_type,
            fdd_heads: params.heads,
            // leave headroom over the nominal track count, as real drives do
            fdd_cylinders: if params.cylinders > 40 { 83 } else { 42 },
            tr00: present,
            index: present,
            wrprot: present,
            data: 0,
            marks: 0,
            loaded: false,
            upsidedown: false,
            selected: false,
            ready: false,
            dskchg: false,
            hdout: false,
            status: FddStatus::Ok,
            fdc_wait_index: false,
            disk: None,
            unreadable: false,
            do_read_weak: false,
            c_head: 0,
            c_cylinder: 0,
            c_bpt: 0,
            pos: 0,
            track_valid: false,
            motoron: false,
            loadhead: false,
            index_pulse: false,
            unit,
            events,
            rng: SmallRng::seed_from_u64(u64::from(unit)),
        }
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn disk(&self) -> Option<&Disk> {
        self.disk.as_ref()
    }

    pub fn motor_is_on(&self) -> bool {
        self.motoron
    }

    pub fn head_is_loaded(&self) -> bool {
        self.loadhead
    }

    pub fn current_cylinder(&self) -> usize {
        self.c_cylinder
    }

    /// Track position as a fraction used by the FDC's scan-delay math.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes_per_track(&self) -> usize {
        self.c_bpt
    }

    /// Reseeds the slip/weak-byte generator so restored snapshots replay
    /// identically.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    fn set_data(&mut self, fact: usize) {
        if !self.loaded {
            return;
        }
        let head = if self.upsidedown { 1 - self.c_head } else { self.c_head };
        let disk = self.disk.as_ref().expect("loaded drive has a disk");

        if self.unreadable
            || (disk.sides == 1 && head == 1)
            || self.c_cylinder >= disk.cylinders
        {
            self.track_valid = false;
            return;
        }

        self.track_valid = true;
        self.c_bpt = disk.track(head, self.c_cylinder).data.len();
        if fact > 0 {
            // a bpt/fact +-10% triangular-distribution slip, standing in
            // for the rotation that happens while the head settles
            let spread: isize = self.rng.gen_range(0..10) + self.rng.gen_range(0..10);
            let bpt = self.c_bpt as isize;
            let slip = bpt / fact as isize + bpt * (spread - 9) / fact as isize / 100;
            self.pos += slip.max(0) as usize;
            while self.pos >= self.c_bpt {
                self.pos -= self.c_bpt;
            }
        }
        self.index = self.pos == 0;
    }

    /// Inserts a disk. `upsidedown` flips which physical side the logical
    /// head 0 reads.
    pub fn load(&mut self, disk: Disk, upsidedown: bool) -> FddStatus {
        if self.fdd_type == FddType::None {
            self.status = FddStatus::NotPresent;
            return self.status;
        }
        if disk.sides == 0 || disk.sides > 2 || disk.cylinders == 0 || disk.cylinders > 99 {
            self.status = FddStatus::BadGeometry;
            return self.status;
        }
        if disk.cylinders > self.fdd_cylinders + TRACK_THRESHOLD {
            self.unreadable = true;
            log::warn!(
                "{} track disk is incompatible with the configured {} track drive",
                disk.cylinders, self.fdd_cylinders
            );
        }

        self.upsidedown = upsidedown;
        self.wrprot = disk.wrprot;
        self.do_read_weak = disk.have_weak;
        self.hdout = disk.density == DiskDensity::High;
        self.disk = Some(disk);
        self.loaded = true;
        if self.fdd_type == FddType::Shugart && self.selected {
            self.head_load(true);
        }
        self.set_data(LOAD_FACT);
        self.ready = self.motoron && self.loaded;
        self.status = FddStatus::Ok;
        self.status
    }

    /// Ejects the disk, returning it so a dirty image can be saved.
    pub fn unload(&mut self, clock: &mut DiskClock) -> Option<Disk> {
        self.ready = false;
        self.loaded = false;
        self.dskchg = false;
        self.hdout = false;
        self.index = true;
        self.wrprot = true;
        self.track_valid = false;
        self.motor_on(clock, false);
        if self.fdd_type == FddType::Shugart && self.selected {
            self.head_load(false);
        }
        self.disk.take()
    }

    /// Spins the motor up or down; READY follows with the documented
    /// index-pulse delays.
    pub fn motor_on(&mut self, clock: &mut DiskClock, on: bool) {
        if !self.loaded || self.motoron == on {
            return;
        }
        self.motoron = on;
        /*
        TEAC FD55 spec, READY output signal:
          i)   the FDD is powered on
          ii)  disk is installed
          iii) the disk rotates at more than 50% of the rated speed
          iv)  two index pulses have been counted after iii)
        */
        clock.events.remove_type_user_data(self.events.motor, self.unit);
        if on {
            // two revolutions at 200 ms each
            clock.add_ms(400, self.events.motor, self.unit);
            // start the index pulse train
            let phase = if self.index_pulse { 10 } else { 190 };
            clock.add_ms(phase, self.events.index, self.unit);
        } else {
            // READY drops one and a half revolutions after motor off
            clock.add_ms(300, self.events.motor, self.unit);
        }
    }

    pub fn head_load(&mut self, load: bool) {
        if !self.loaded || self.loadhead == load {
            return;
        }
        self.loadhead = load;
        self.set_data(HEAD_FACT);
    }

    /// Drive select; Shugart wiring couples the head to it.
    pub fn select(&mut self, selected: bool) {
        self.selected = selected;
        if self.fdd_type == FddType::Shugart {
            self.head_load(selected);
        }
    }

    pub fn set_head(&mut self, head: usize) {
        if self.fdd_heads == 1 {
            return;
        }
        let head = if head > 0 { 1 } else { 0 };
        if self.c_head == head {
            return;
        }
        self.c_head = head;
        self.set_data(0);
    }

    /// Steps one cylinder, clamped to the drive's travel.
    pub fn step(&mut self, direction: FddDir) {
        match direction {
            FddDir::StepOut => {
                if self.c_cylinder > 0 {
                    self.c_cylinder -= 1;
                }
            }
            FddDir::StepIn => {
                if self.c_cylinder < self.fdd_cylinders - 1 {
                    self.c_cylinder += 1;
                }
            }
        }
        self.tr00 = self.c_cylinder == 0;
        self.set_data(STEP_FACT);
        if self.loaded && self.selected {
            self.dskchg = true;
        }
    }

    pub fn flip(&mut self, upsidedown: bool) {
        if !self.loaded {
            return;
        }
        self.upsidedown = upsidedown;
        self.set_data(LOAD_FACT);
    }

    pub fn set_wrprot(&mut self, wrprot: bool) {
        if !self.loaded {
            return;
        }
        self.wrprot = wrprot;
        if let Some(disk) = self.disk.as_mut() {
            disk.wrprot = wrprot;
        }
    }

    /// Snaps the rotation to the index hole.
    pub fn wait_index_hole(&mut self) {
        if !self.selected || !self.ready {
            return;
        }
        self.pos = 0;
        self.index = true;
    }

    fn read_write_data(&mut self, write: bool) -> FddStatus {
        if !self.selected || !self.ready || !self.loadhead || !self.track_valid {
            if self.loaded && self.motoron {
                // spin the disk anyway
                if self.pos >= self.c_bpt {
                    self.pos = 0;
                }
                if !write {
                    self.data = NO_DATA;
                }
                self.pos += 1;
                self.index = self.pos >= self.c_bpt;
            }
            self.status = FddStatus::Ok;
            return self.status;
        }

        if self.pos >= self.c_bpt {
            self.pos = 0;
        }
        let head = if self.upsidedown { 1 - self.c_head } else { self.c_head };
        let cylinder = self.c_cylinder;
        let pos = self.pos;
        let disk = self.disk.as_mut().expect("valid track implies a disk");

        if write {
            if disk.wrprot {
                self.pos += 1;
                self.index = self.pos >= self.c_bpt;
                self.status = FddStatus::ReadOnly;
                return self.status;
            }
            let marks = self.marks;
            let data = self.data;
            let track = disk.track_mut(head, cylinder);
            track.data[pos] = data as u8;
            track.clocks.set(pos, data & 0xff00 != 0);
            track.fm.set(pos, marks & 0x01 != 0);
            // standard hardware cannot write weak bytes
            track.weak.set(pos, false);
            disk.dirty = true;
        } else {
            let track = disk.track(head, cylinder);
            self.data = track.data[pos] as u16;
            if track.clocks[pos] {
                self.data |= 0xff00;
            }
            self.marks = 0;
            if track.fm[pos] {
                self.marks |= 0x01;
            }
            if track.weak[pos] {
                self.marks |= 0x02;
                let and_mask: u16 = self.rng.gen_range(0..0xff);
                let or_mask: u16 = self.rng.gen_range(0..0xff);
                self.data = self.data & and_mask | or_mask;
            }
        }
        self.pos += 1;
        self.index = self.pos >= self.c_bpt;
        self.status = FddStatus::Ok;
        self.status
    }

    /// Moves the next byte under the head into `data`/`marks`.
    pub fn read_data(&mut self) -> FddStatus {
        self.read_write_data(false)
    }

    /// Records `data`/`marks` at the head position.
    pub fn write_data(&mut self) -> FddStatus {
        self.read_write_data(true)
    }

    /// The READY-arming event (two index pulses counted, or spin-down).
    pub fn motor_event(&mut self) {
        self.ready = self.motoron && self.loaded;
    }

    /// The index pulse train: toggles the pulse, re-arms while the motor
    /// runs, and reports whether a parked FDC wait should fire.
    pub fn index_event(&mut self, clock: &mut DiskClock) -> bool {
        self.index_pulse = !self.index_pulse;
        let wake_fdc = !self.index_pulse && self.fdc_wait_index;
        if wake_fdc {
            self.fdc_wait_index = false;
        }
        if self.motoron && self.loaded {
            let phase = if self.index_pulse { 10 } else { 190 };
            clock.add_ms(phase, self.events.index, self.unit);
        }
        wake_fdc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrospec_core::clock::EventScheduler;

    fn drive() -> (Fdd, EventScheduler) {
        let mut events = EventScheduler::new();
        let types = FddEventTypes::register(&mut events);
        let fdd = Fdd::new(FddType::IbmPc, FddParams::DOUBLE_40, 0, types);
        (fdd, events)
    }

    fn spin_up(fdd: &mut Fdd, events: &mut EventScheduler) {
        let mut clock = DiskClock::new(events, 0, 3_500_000);
        fdd.motor_on(&mut clock, true);
        fdd.motor_event();
        fdd.select(true);
        fdd.head_load(true);
    }

    #[test]
    fn ready_needs_motor_and_disk() {
        let (mut fdd, mut events) = drive();
        assert_eq!(fdd.load(Disk::new(2, 40), false), FddStatus::Ok);
        assert!(!fdd.ready);
        let mut clock = DiskClock::new(&mut events, 0, 3_500_000);
        fdd.motor_on(&mut clock, true);
        // READY arms only when the two-revolution event fires
        assert!(!fdd.ready);
        fdd.motor_event();
        assert!(fdd.ready);
    }

    #[test]
    fn motor_on_schedules_ready_two_revolutions_out() {
        let (mut fdd, mut events) = drive();
        fdd.load(Disk::new(2, 40), false);
        let mut clock = DiskClock::new(&mut events, 1000, 3_500_000);
        fdd.motor_on(&mut clock, true);
        // 400 ms at 3.5 MHz
        assert_eq!(events.next_event(), 1000 + 400 * 3500);
    }

    #[test]
    fn read_back_what_was_written() {
        let (mut fdd, mut events) = drive();
        fdd.load(Disk::new(2, 40), false);
        spin_up(&mut fdd, &mut events);

        fdd.wait_index_hole();
        fdd.data = 0xffa1;
        fdd.marks = 0;
        fdd.write_data();
        fdd.data = 0x00fe;
        fdd.write_data();

        fdd.wait_index_hole();
        fdd.read_data();
        assert_eq!(fdd.data, 0xffa1);
        fdd.read_data();
        assert_eq!(fdd.data, 0x00fe);
    }

    #[test]
    fn reads_with_no_head_spin_the_disk() {
        let (mut fdd, mut events) = drive();
        fdd.load(Disk::new(2, 40), false);
        let mut clock = DiskClock::new(&mut events, 0, 3_500_000);
        fdd.motor_on(&mut clock, true);
        fdd.motor_event();
        // not selected: data floats but the position advances
        let pos = fdd.position();
        fdd.read_data();
        assert_eq!(fdd.data, NO_DATA);
        assert_eq!(fdd.position(), pos + 1);
    }

    #[test]
    fn stepping_clamps_and_tracks_tr00() {
        let (mut fdd, _) = drive();
        fdd.load(Disk::new(2, 40), false);
        assert!(fdd.tr00);
        fdd.step(FddDir::StepIn);
        assert!(!fdd.tr00);
        assert_eq!(fdd.current_cylinder(), 1);
        fdd.step(FddDir::StepOut);
        fdd.step(FddDir::StepOut);
        assert!(fdd.tr00);
        assert_eq!(fdd.current_cylinder(), 0);
    }

    #[test]
    fn single_sided_disk_has_no_second_side() {
        let (mut fdd, mut events) = drive();
        fdd.load(Disk::new(1, 40), false);
        spin_up(&mut fdd, &mut events);
        fdd.set_head(1);
        fdd.read_data();
        assert_eq!(fdd.data, NO_DATA);
        fdd.set_head(0);
        fdd.read_data();
        assert_ne!(fdd.data, NO_DATA);
    }

    #[test]
    fn oversized_disk_is_unreadable() {
        let (mut fdd, mut events) = drive();
        // 60 tracks into a 42-track drive
        fdd.load(Disk::new(2, 60), false);
        spin_up(&mut fdd, &mut events);
        fdd.read_data();
        assert_eq!(fdd.data, NO_DATA);
    }

    #[test]
    fn write_protect_blocks_writes() {
        let (mut fdd, mut events) = drive();
        let mut disk = Disk::new(2, 40);
        disk.wrprot = true;
        fdd.load(disk, false);
        spin_up(&mut fdd, &mut events);
        fdd.data = 0x55;
        assert_eq!(fdd.write_data(), FddStatus::ReadOnly);
    }

    #[test]
    fn weak_bytes_read_unreliably() {
        let (mut fdd, mut events) = drive();
        let mut disk = Disk::new(2, 40);
        {
            let track = disk.track_mut(0, 0);
            for i in 0..16 {
                track.data[i] = 0x5a;
            }
        }
        disk.set_weak_span(0, 0, 0, 16);
        fdd.load(disk, false);
        spin_up(&mut fdd, &mut events);
        fdd.wait_index_hole();
        let mut values = std::collections::HashSet::new();
        for _ in 0..16 {
            fdd.read_data();
            assert_eq!(fdd.marks & 0x02, 0x02);
            values.insert(fdd.data);
        }
        assert!(values.len() > 1, "weak reads returned a single value");
    }

    #[test]
    fn index_event_wakes_a_parked_fdc_once() {
        let (mut fdd, mut events) = drive();
        fdd.load(Disk::new(2, 40), false);
        {
            let mut clock = DiskClock::new(&mut events, 0, 3_500_000);
            fdd.motor_on(&mut clock, true);
        }
        fdd.motor_event();
        fdd.fdc_wait_index = true;
        let mut clock = DiskClock::new(&mut events, 0, 3_500_000);
        // pulse rises: no wake
        assert!(!fdd.index_event(&mut clock));
        // pulse falls: wake exactly once
        assert!(fdd.index_event(&mut clock));
        assert!(!fdd.fdc_wait_index);
        assert!(!fdd.index_event(&mut clock));
    }
}
