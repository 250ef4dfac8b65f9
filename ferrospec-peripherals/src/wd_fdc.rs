/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Western Digital 177x/179x floppy controller family.
//!
//! Commands arrive through the command register and run as a state machine
//! driven entirely by scheduler events: per-step delays for type I seeks,
//! twentieth-of-a-revolution hops while scanning for an ID, head-settle
//! samples, spin-up waits, and the five-revolution lost-data timeout. The
//! controller owns its drive units; INTRQ and DRQ are exposed as lines the
//! host interface polls.
use bitflags::bitflags;

use crate::crc::{crc_fdc, CRC_AFTER_MFM_MARKS};
use crate::fdd::{Fdd, FddDir};
use crate::DiskClock;
use ferrospec_core::clock::{EventScheduler, EventType};

bitflags! {
    /// The status register. Bits 1, 2 and 5 change meaning between type I
    /// and type II/III commands; both names are given.
    pub struct WdStatus: u8 {
        const BUSY     = 0x01;
        /// Type I: index pulse. Type II/III: data request.
        const IDX_DRQ  = 0x02;
        /// Type I: track 0. Type II/III: lost data.
        const LOST     = 0x04;
        const CRC_ERR  = 0x08;
        /// Record not found / seek error.
        const RNF      = 0x10;
        /// Type I: spin-up complete. Type II: record type (deleted DAM).
        const SPINUP   = 0x20;
        const WRPROT   = 0x40;
        /// WD177x: motor on. WD1773-alikes: not ready.
        const MOTORON  = 0x80;
    }
}

bitflags! {
    /// Interface wiring variations.
    pub struct WdFlags: u32 {
        /// Beta 128: HLD drives the motor and READY.
        const BETA128 = 0x01;
        /// READY comes from an external signal, not the drive.
        const RDY     = 0x02;
        /// No head-load timing input.
        const NOHLT   = 0x04;
        /// The interface wants a fresh DRQ event after each data access.
        const DRQ     = 0x08;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WdType {
    Fd1793,
    Wd1770,
    Wd1772,
    Wd1773,
    Wd2797,
}

impl WdType {
    /// Type I stepping rates in milliseconds, indexed by command bits 0-1.
    fn step_rates(self) -> [u32; 4] {
        match self {
            WdType::Wd1772 => [2, 3, 5, 6],
            _ => [6, 12, 20, 30],
        }
    }

    /// The chips with a head-load pin and a READY input.
    fn has_head_load(self) -> bool {
        matches!(self, WdType::Wd1773 | WdType::Fd1793 | WdType::Wd2797)
    }

    /// The chips driving the spindle motor themselves.
    fn has_motor(self) -> bool {
        matches!(self, WdType::Wd1770 | WdType::Wd1772)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WdState {
    None,
    Seek,
    SeekDelay,
    Verify,
    Read,
    Write,
    ReadTrack,
    WriteTrack,
    ReadId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusType {
    Type1,
    Type2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddressMark {
    None,
    Id,
    Data,
}

/// The scheduler event types one controller owns.
#[derive(Clone, Copy, Debug)]
pub struct WdEventTypes {
    /// Next stage of the running command.
    pub fdc: EventType,
    /// Spin-down after inactivity.
    pub motor_off: EventType,
    /// Five-revolution lost-data timeout.
    pub timeout: EventType,
}

impl WdEventTypes {
    pub fn register(events: &mut EventScheduler) -> Self {
        WdEventTypes {
            fdc: events.register("WD FDC event"),
            motor_off: events.register("WD FDC motor off"),
            timeout: events.register("WD FDC timeout"),
        }
    }
}

/// Which of the controller's events fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WdEventKind {
    Fdc,
    MotorOff,
    Timeout,
}

pub struct WdFdc {
    pub fdc_type: WdType,
    pub flags: WdFlags,
    /// Double density (MFM) line from the interface.
    pub dden: bool,
    /// External READY signal for [WdFlags::RDY] wiring.
    pub extra_signal: bool,

    pub intrq: bool,
    pub datarq: bool,

    drives: Vec<Fdd>,
    current: usize,
    events: WdEventTypes,

    state: WdState,
    status_type: StatusType,
    status_register: WdStatus,
    command_register: u8,
    pub track_register: u8,
    pub sector_register: u8,
    pub data_register: u8,

    rates: [u32; 4],
    direction: FddDir,
    head_load: bool,
    hlt: bool,
    hlt_time: u32,
    read_id_active: bool,
    rev: i32,
    crc: u16,
    id_mark: AddressMark,
    id_track: u8,
    id_head: u8,
    id_sector: u8,
    id_length: u8,
    sector_length: u32,
    non_ibm_len_code: bool,
    ddam: bool,
    data_check_head: Option<u8>,
    data_offset: u32,
    data_multisector: bool,
}

impl WdFdc {
    pub fn new(
        fdc_type: WdType,
        hlt_time: u32,
        flags: WdFlags,
        drives: Vec<Fdd>,
        events: WdEventTypes,
    ) -> Self {
        let mut fdc = WdFdc {
            fdc_type,
            flags,
            dden: true,
            extra_signal: false,
            intrq: false,
            datarq: false,
            drives,
            current: 0,
            events,
            state: WdState::None,
            status_type: StatusType::Type1,
            status_register: WdStatus::empty(),
            command_register: 0,
            track_register: 0,
            sector_register: 0,
            data_register: 0,
            rates: fdc_type.step_rates(),
            direction: FddDir::StepOut,
            head_load: false,
            hlt: true,
            hlt_time,
            read_id_active: false,
            rev: 0,
            crc: 0xffff,
            id_mark: AddressMark::None,
            id_track: 0,
            id_head: 0,
            id_sector: 0,
            id_length: 0,
            sector_length: 0,
            non_ibm_len_code: false,
            ddam: false,
            data_check_head: None,
            data_offset: 0,
            data_multisector: false,
        };
        fdc.master_reset();
        fdc
    }

    pub fn drive(&self, unit: usize) -> &Fdd {
        &self.drives[unit]
    }

    pub fn drive_mut(&mut self, unit: usize) -> &mut Fdd {
        &mut self.drives[unit]
    }

    pub fn current_unit(&self) -> usize {
        self.current
    }

    /// Selects the drive the controller talks to.
    pub fn select_drive(&mut self, unit: usize) {
        if unit < self.drives.len() {
            self.current = unit;
        }
    }

    pub fn state(&self) -> WdState {
        self.state
    }

    /// The BUSY line, without the side effects of a status-port read.
    pub fn busy(&self) -> bool {
        self.status_register.contains(WdStatus::BUSY)
    }

    pub fn master_reset(&mut self) {
        self.direction = FddDir::StepOut;
        self.head_load = false;
        if self.flags.contains(WdFlags::BETA128) {
            // motor managed through HLD on the Beta; forced off elsewhere
        }
        self.read_id_active = false;
        self.hlt = !(!self.flags.contains(WdFlags::NOHLT) && self.hlt_time > 0);
        self.intrq = false;
        self.datarq = false;
        self.state = WdState::None;
        self.status_type = StatusType::Type1;

        let current = self.current;
        while !self.drives[current].tr00 {
            self.drives[current].step(FddDir::StepOut);
        }

        self.track_register = 0;
        self.sector_register = 0;
        self.data_register = 0;
        // track 0 shows through the type I LOST/TR00 bit
        self.status_register = WdStatus::LOST;
    }

    pub fn set_hlt(&mut self, hlt: bool) {
        self.hlt = hlt;
    }

    fn disk_ready(&self) -> bool {
        if self.flags.contains(WdFlags::BETA128) {
            // Beta 128 wires READY to HLD
            return self.head_load;
        }
        if self.flags.contains(WdFlags::RDY) {
            return self.extra_signal;
        }
        self.drives[self.current].ready
    }

    fn set_intrq(&mut self, clock: &mut DiskClock) {
        if self.fdc_type.has_motor() && self.status_register.contains(WdStatus::MOTORON) {
            // ten revolutions of inactivity
            clock.add_ms(2000, self.events.motor_off, 0);
        }
        if self.fdc_type.has_head_load() && self.head_load {
            // fifteen revolutions
            clock.add_ms(3000, self.events.motor_off, 0);
        }
        self.intrq = true;
    }

    pub fn reset_intrq(&mut self) {
        self.intrq = false;
    }

    fn set_datarq(&mut self) {
        if !self.datarq {
            self.status_register.insert(WdStatus::IDX_DRQ);
            self.datarq = true;
        }
    }

    fn reset_datarq(&mut self) {
        if self.datarq {
            self.status_register.remove(WdStatus::IDX_DRQ);
            self.datarq = false;
        }
    }

    // -- drive byte transfer with CRC accumulation --

    fn read_next(&mut self) -> (u16, bool) {
        let current = self.current;
        self.drives[current].read_data();
        let drive = &self.drives[current];
        (drive.data, drive.index)
    }

    fn read_next_crc(&mut self) -> (u16, bool) {
        let (data, index) = self.read_next();
        self.crc = crc_fdc(self.crc, data as u8);
        (data, index)
    }

    fn write_next(&mut self, data: u16) {
        let current = self.current;
        self.drives[current].data = data;
        self.drives[current].write_data();
    }

    fn write_next_crc(&mut self, data: u16) {
        self.write_next(data);
        self.crc = crc_fdc(self.crc, data as u8);
    }

    /// Scans for the next ID address mark within the revolution budget.
    fn read_id(&mut self) -> AddressMark {
        self.id_mark = AddressMark::None;
        if self.rev <= 0 {
            return AddressMark::None;
        }
        let entry_rev = self.rev;
        while self.rev == entry_rev {
            self.crc = 0xffff;
            if self.dden {
                let (data, index) = self.read_next_crc();
                if index {
                    self.rev -= 1;
                }
                if data != 0xffa1 {
                    continue;
                }
                let (data, index) = self.read_next_crc();
                if index {
                    self.rev -= 1;
                }
                if data != 0xffa1 {
                    continue;
                }
                let (data, index) = self.read_next_crc();
                if index {
                    self.rev -= 1;
                }
                if data != 0xffa1 {
                    continue;
                }
            }
            let (data, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            let idam_ok = if self.dden { data == 0x00fe } else { data == 0xfffe };
            if !idam_ok {
                continue;
            }
            let (data, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            self.id_track = data as u8;
            let (data, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            self.id_head = data as u8;
            let (data, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            self.id_sector = data as u8;
            let (data, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            self.id_length = data as u8;
            self.sector_length = if self.non_ibm_len_code {
                // 00->256 01->512 10->1024 11->128
                0x80 << ((data as u32 + 1) & 0x03)
            } else {
                // 00->128 01->256 10->512 11->1024
                0x80 << (data as u32 & 0x03)
            };
            let (_, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            let (_, index) = self.read_next_crc();
            if index {
                self.rev -= 1;
            }
            self.id_mark = AddressMark::Id;
            if self.crc != 0x0000 {
                self.status_register.insert(WdStatus::CRC_ERR);
            } else {
                self.status_register.remove(WdStatus::CRC_ERR);
            }
            return AddressMark::Id;
        }
        AddressMark::None
    }

    /// Skips the gap after an ID and synchronises onto the data mark.
    fn read_datamark(&mut self) -> bool {
        self.id_mark = AddressMark::None;
        if self.dden {
            let mut i = 40;
            while i > 0 {
                let (data, _) = self.read_next();
                if data == 0x4e {
                    i -= 1;
                    continue;
                }
                if data == 0x00 {
                    break;
                }
                return false;
            }
            let mut last = 0u16;
            while i > 0 {
                self.crc = 0xffff;
                let (data, _) = self.read_next_crc();
                last = data;
                if data == 0x00 {
                    i -= 1;
                    continue;
                }
                if data == 0xffa1 {
                    break;
                }
                return false;
            }
            let marks_left = if last == 0xffa1 { 2 } else { 3 };
            for _ in 0..marks_left {
                let (data, _) = self.read_next_crc();
                if data != 0xffa1 {
                    return false;
                }
            }
            let (data, _) = self.read_next_crc();
            if data < 0x00f8 || data > 0x00fb {
                return false;
            }
            self.ddam = data != 0x00fb;
            self.id_mark = AddressMark::Data;
            true
        } else {
            let mut i = 30;
            while i > 0 {
                let (data, _) = self.read_next();
                if data == 0xff {
                    i -= 1;
                    continue;
                }
                if data == 0x00 {
                    break;
                }
                return false;
            }
            let mut data = 0u16;
            while i > 0 {
                self.crc = 0xffff;
                let (d, _) = self.read_next_crc();
                data = d;
                if d == 0x00 {
                    i -= 1;
                    continue;
                }
                if d >= 0xfff8 && d <= 0xfffb {
                    break;
                }
                return false;
            }
            if i == 0 {
                let (d, _) = self.read_next_crc();
                data = d;
                if d < 0xfff8 || d > 0xfffb {
                    return false;
                }
            }
            self.ddam = data & 0xff != 0xfb;
            self.id_mark = AddressMark::Data;
            true
        }
    }

    /// The fraction of a revolution a scan consumed, in milliseconds.
    fn scan_elapsed_ms(&self, start: usize) -> i32 {
        let drive = &self.drives[self.current];
        let bpt = drive.bytes_per_track();
        if bpt == 0 {
            return 200;
        }
        ((drive.position() as i32) - start as i32) * 200 / bpt as i32
    }

    fn scan_start(&self) -> usize {
        let drive = &self.drives[self.current];
        if drive.position() >= drive.bytes_per_track() {
            0
        } else {
            drive.position()
        }
    }

    // -- status / register file --

    pub fn sr_read(&mut self) -> u8 {
        self.reset_intrq();
        if self.status_type == StatusType::Type1 {
            self.status_register.remove(WdStatus::IDX_DRQ);
            let drive = &self.drives[self.current];
            if !drive.loaded || drive.index_pulse {
                self.status_register.insert(WdStatus::IDX_DRQ);
            }
        }
        if self.fdc_type.has_head_load() {
            if self.disk_ready() {
                self.status_register.remove(WdStatus::MOTORON);
            } else {
                self.status_register.insert(WdStatus::MOTORON);
            }
        }
        self.status_register.bits()
    }

    pub fn tr_read(&self) -> u8 {
        self.track_register
    }

    pub fn tr_write(&mut self, b: u8) {
        self.track_register = b;
    }

    pub fn sec_read(&self) -> u8 {
        self.sector_register
    }

    pub fn sec_write(&mut self, b: u8) {
        self.sector_register = b;
    }

    // -- command dispatch --

    pub fn cr_write(&mut self, clock: &mut DiskClock, b: u8) {
        self.reset_intrq();

        if b & 0xf0 == 0xd0 {
            // Type IV: force interrupt
            clock.events.remove_type(self.events.fdc);
            self.status_register.remove(
                WdStatus::BUSY | WdStatus::WRPROT | WdStatus::CRC_ERR | WdStatus::IDX_DRQ,
            );
            self.state = WdState::None;
            self.status_type = StatusType::Type1;
            self.reset_datarq();

            if b & 0x08 != 0 {
                self.set_intrq(clock);
            } else if b & 0x04 != 0 {
                self.drives[self.current].fdc_wait_index = true;
            }

            if self.drives[self.current].tr00 {
                self.status_register.insert(WdStatus::LOST);
            } else {
                self.status_register.remove(WdStatus::LOST);
            }
            // spin up, pretending there is no 'h' bit in the register
            self.spinup(clock, b & 0xf7);
            return;
        }

        if self.status_register.contains(WdStatus::BUSY) {
            return;
        }
        self.command_register = b;
        self.status_register.insert(WdStatus::BUSY);

        // keep the spindle motor running
        clock.events.remove_type(self.events.motor_off);

        if b & 0x80 == 0 {
            // Type I
            self.state = WdState::Seek;
            self.status_type = StatusType::Type1;
            self.status_register.remove(
                WdStatus::CRC_ERR | WdStatus::RNF | WdStatus::IDX_DRQ,
            );
            self.reset_datarq();
            self.rev = 5;
            if self.spinup(clock, b) {
                return;
            }
            self.type_i(clock);
        } else if b & 0x40 == 0 {
            // Type II
            if matches!(self.fdc_type, WdType::Wd1773 | WdType::Fd1793) && !self.disk_ready() {
                self.finish_with_intrq(clock);
                return;
            }
            self.data_check_head = match self.fdc_type {
                WdType::Wd1773 if b & 0x02 != 0 => Some((b >> 3) & 1),
                WdType::Wd2797 => Some((b >> 1) & 1),
                _ => None,
            };
            // the WD2797 can read non-IBM sector length codes
            self.non_ibm_len_code = self.fdc_type == WdType::Wd2797 && b & 0x08 == 0;

            self.state = if b & 0x20 != 0 { WdState::Write } else { WdState::Read };
            self.status_type = StatusType::Type2;
            self.status_register.remove(
                WdStatus::WRPROT | WdStatus::RNF | WdStatus::IDX_DRQ
                    | WdStatus::LOST | WdStatus::SPINUP,
            );
            if self.fdc_type == WdType::Wd2797 {
                let head = ((b >> 1) & 1) as usize;
                self.drives[self.current].set_head(head);
            }
            self.rev = 5;
            if self.spinup(clock, b) {
                return;
            }
            self.type_ii(clock);
        } else if b & 0x30 != 0x10 {
            // Type III
            if self.fdc_type.has_head_load() && !self.disk_ready() {
                self.finish_with_intrq(clock);
                return;
            }
            self.state = if b & 0x20 != 0 {
                if b & 0x10 != 0 { WdState::WriteTrack } else { WdState::ReadTrack }
            } else {
                WdState::ReadId
            };
            self.status_type = StatusType::Type2;
            self.status_register.remove(
                WdStatus::SPINUP | WdStatus::RNF | WdStatus::IDX_DRQ | WdStatus::LOST,
            );
            self.rev = 5;
            if self.spinup(clock, b) {
                return;
            }
            self.type_iii(clock);
        }
    }

    fn finish_with_intrq(&mut self, clock: &mut DiskClock) {
        self.status_register.remove(WdStatus::BUSY);
        self.state = WdState::None;
        self.set_intrq(clock);
    }

    /// Motor/head spin-up; returns true when completion was deferred to an
    /// event.
    fn spinup(&mut self, clock: &mut DiskClock, b: u8) -> bool {
        let mut delay: u32 = 0;
        if self.state != WdState::Seek && b & 0x04 != 0 {
            delay = 30;
        }

        if self.fdc_type.has_motor() {
            if !self.status_register.contains(WdStatus::MOTORON) {
                self.status_register.insert(WdStatus::MOTORON);
                let current = self.current;
                self.drives[current].motor_on(clock, true);
                if b & 0x08 == 0 {
                    // six revolutions to speed
                    delay += 6 * 200;
                }
            }
        } else {
            clock.events.remove_type(self.events.motor_off);
            if self.state == WdState::Seek {
                if b & 0x08 != 0 {
                    self.head_load_control(clock, true);
                } else if b & 0x04 == 0 {
                    // HLD drops only when the verify flag is clear too
                    self.head_load = false;
                    if !self.flags.contains(WdFlags::NOHLT) && self.hlt_time > 0 {
                        self.hlt = false;
                    }
                    self.head_load_line(clock, false);
                }
                return false;
            } else {
                self.head_load_control(clock, true);
                if self.hlt_time > 0 {
                    delay += self.hlt_time;
                }
            }
        }

        // WD2797 type III commands also select the side
        if self.fdc_type == WdType::Wd2797 && b & 0xc0 == 0xc0 && b & 0x30 != 0x10 {
            let head = ((b >> 1) & 1) as usize;
            self.drives[self.current].set_head(head);
        }

        if delay != 0 {
            clock.events.remove_type(self.events.fdc);
            clock.add_ms(delay, self.events.fdc, 0);
            return true;
        }
        false
    }

    fn head_load_control(&mut self, clock: &mut DiskClock, load: bool) {
        self.head_load = load;
        self.head_load_line(clock, load);
    }

    fn head_load_line(&mut self, clock: &mut DiskClock, load: bool) {
        let current = self.current;
        if self.flags.contains(WdFlags::BETA128) {
            self.drives[current].motor_on(clock, load);
        } else {
            self.drives[current].head_load(load);
        }
    }

    // -- type I --

    fn type_i(&mut self, clock: &mut DiskClock) {
        let b = self.command_register;

        let mut verify = false;
        if self.state == WdState::SeekDelay {
            if b & 0x60 != 0 {
                verify = true; // STEP/STEP-IN/STEP-OUT: single step done
            }
        } else {
            self.status_register.insert(WdStatus::SPINUP);
            if b & 0x60 != 0 {
                // STEP/STEP-IN/STEP-OUT
                if b & 0x40 != 0 {
                    self.direction =
                        if b & 0x20 != 0 { FddDir::StepOut } else { FddDir::StepIn };
                }
                let update = b & 0x10 != 0;
                if self.step_once(clock, update) {
                    return;
                }
                verify = true;
            } else if b & 0x10 == 0 {
                // RESTORE
                self.track_register = 0xff;
                self.data_register = 0;
            }
        }

        if !verify && self.track_register != self.data_register {
            // SEEK: one step per rate delay toward the data register
            self.direction = if self.track_register < self.data_register {
                FddDir::StepIn
            } else {
                FddDir::StepOut
            };
            if self.step_once(clock, true) {
                return;
            }
            // hit the TR00 stop: the register snaps to 0 and the command
            // falls through to verify
        }

        // verify, or finish
        if b & 0x04 != 0 {
            if self.fdc_type.has_head_load() {
                self.head_load = true;
                clock.events.remove_type(self.events.motor_off);
                self.head_load_line(clock, true);
                clock.events.remove_type(self.events.fdc);
                // head settle
                clock.add_ms(15, self.events.fdc, 0);
            }
            self.state = WdState::Verify;

            if self.fdc_type.has_motor() && !self.status_register.contains(WdStatus::MOTORON) {
                self.status_register.insert(WdStatus::MOTORON);
                let current = self.current;
                self.drives[current].motor_on(clock, true);
                clock.events.remove_type(self.events.fdc);
                // six revolutions to speed
                clock.add_ms(1200, self.events.fdc, 0);
                return;
            }
            self.seek_verify(clock);
            return;
        }

        if self.drives[self.current].tr00 {
            self.status_register.insert(WdStatus::LOST);
        } else {
            self.status_register.remove(WdStatus::LOST);
        }
        self.finish_with_intrq(clock);
    }

    /// One head step with the per-command rate delay. Returns true when a
    /// delay event was scheduled (the state machine resumes there).
    fn step_once(&mut self, clock: &mut DiskClock, update: bool) -> bool {
        let b = self.command_register;
        if update {
            self.track_register = match self.direction {
                FddDir::StepIn => self.track_register.wrapping_add(1),
                FddDir::StepOut => self.track_register.wrapping_sub(1),
            };
        }
        let current = self.current;
        if self.drives[current].tr00 && self.direction == FddDir::StepOut {
            self.track_register = 0;
            false
        } else {
            let direction = self.direction;
            self.drives[current].step(direction);
            self.state = WdState::SeekDelay;
            clock.events.remove_type(self.events.fdc);
            clock.add_ms(self.rates[(b & 0x03) as usize], self.events.fdc, 0);
            true
        }
    }

    fn seek_verify(&mut self, clock: &mut DiskClock) {
        clock.events.remove_type(self.events.fdc);
        if self.fdc_type.has_head_load() {
            if !self.hlt {
                // sample HLT every 5 ms
                clock.add_ms(5, self.events.fdc, 0);
                return;
            }
            if self.head_load {
                // head loaded and engaged: HLD and HLT both high
                self.status_register.insert(WdStatus::SPINUP);
            }
        }

        if self.drives[self.current].tr00 {
            self.status_register.insert(WdStatus::LOST);
        } else {
            self.status_register.remove(WdStatus::LOST);
        }
        self.rev = 5;
        self.id_mark = AddressMark::None;
        self.seek_verify_read_id(clock);
    }

    fn seek_verify_read_id(&mut self, clock: &mut DiskClock) {
        self.read_id_active = true;
        clock.events.remove_type(self.events.fdc);
        if self.id_mark == AddressMark::None {
            while self.rev > 0 {
                let start = self.scan_start();
                if self.read_id() == AddressMark::Id {
                    if self.id_track != self.track_register {
                        self.status_register.insert(WdStatus::RNF);
                    }
                } else {
                    self.id_mark = AddressMark::None;
                }
                let elapsed = self.scan_elapsed_ms(start);
                if elapsed > 0 {
                    clock.add_ms(elapsed as u32, self.events.fdc, 0);
                    return;
                } else if self.id_mark != AddressMark::None {
                    break;
                }
            }
            if self.id_mark == AddressMark::None {
                self.status_register.insert(WdStatus::RNF);
            }
        }
        self.state = WdState::None;
        self.status_register.remove(WdStatus::BUSY);
        self.set_intrq(clock);
        self.read_id_active = false;
    }

    // -- type II --

    fn type_ii(&mut self, clock: &mut DiskClock) {
        let b = self.command_register;

        clock.events.remove_type(self.events.fdc);
        if self.fdc_type.has_head_load() {
            if !self.disk_ready() {
                self.finish_with_intrq(clock);
                return;
            }
            if !self.hlt {
                clock.add_ms(5, self.events.fdc, 0);
                return;
            }
        }

        if self.state == WdState::Write {
            if self.drives[self.current].wrprot {
                self.status_register.insert(WdStatus::WRPROT);
                self.finish_with_intrq(clock);
                return;
            }
            self.status_register.remove(WdStatus::WRPROT);
        }

        self.data_multisector = b & 0x10 != 0;
        self.rev = 5;
        self.id_mark = AddressMark::None;
        self.type_ii_seek(clock);
    }

    fn type_ii_seek(&mut self, clock: &mut DiskClock) {
        let b = self.command_register;

        clock.events.remove_type(self.events.fdc);
        if self.id_mark == AddressMark::None {
            self.read_id_active = true;
            while self.rev > 0 {
                let start = self.scan_start();
                if self.read_id() == AddressMark::Id {
                    let head_mismatch = match self.data_check_head {
                        Some(side) => side != if self.id_head != 0 { 1 } else { 0 },
                        None => false,
                    };
                    if head_mismatch
                        || self.id_track != self.track_register
                        || self.id_sector != self.sector_register
                    {
                        self.id_mark = AddressMark::None;
                    }
                } else {
                    self.id_mark = AddressMark::None;
                }
                let elapsed = self.scan_elapsed_ms(start);
                if elapsed > 0 {
                    clock.add_ms(elapsed as u32, self.events.fdc, 0);
                    return;
                } else if self.id_mark != AddressMark::None {
                    break;
                }
            }
        }

        self.read_id_active = false;

        if self.id_mark == AddressMark::None {
            self.status_register.insert(WdStatus::RNF);
            self.finish_with_intrq(clock);
            return;
        }

        if self.state == WdState::Read {
            if self.id_mark == AddressMark::Id {
                self.read_datamark();
            }
            if self.id_mark == AddressMark::None {
                self.status_register.insert(WdStatus::RNF);
                self.finish_with_intrq(clock);
                return;
            }
            if self.ddam {
                // deleted data mark shows through bit 5
                self.status_register.insert(WdStatus::SPINUP);
            }
            self.data_offset = 0;
            self.set_datarq();
        } else {
            self.ddam = b & 0x01 != 0;
            for _ in 0..11 {
                self.read_next();
            }
            self.set_datarq();
            self.data_offset = 0;
            if self.dden {
                for _ in 0..11 {
                    self.read_next();
                }
            }
            let zeros = if self.dden { 12 } else { 6 };
            for _ in 0..zeros {
                self.write_next(0x0000);
            }
            self.crc = 0xffff;
            if self.dden {
                for _ in 0..3 {
                    self.write_next_crc(0xffa1);
                }
            }
            let mark = if self.ddam { 0x00f8 } else { 0x00fb }
                | if self.dden { 0x0000 } else { 0xff00 };
            self.write_next_crc(mark);
        }
        clock.events.remove_type(self.events.timeout);
        // five revolutions
        clock.add_ms(1000, self.events.timeout, 0);
    }

    // -- type III --

    fn type_iii(&mut self, clock: &mut DiskClock) {
        clock.events.remove_type(self.events.fdc);
        if !self.read_id_active && self.fdc_type.has_head_load() {
            if !self.disk_ready() {
                self.finish_with_intrq(clock);
                return;
            }
            if !self.hlt {
                clock.add_ms(5, self.events.fdc, 0);
                return;
            }
        }
        match self.state {
            WdState::WriteTrack => {
                if self.drives[self.current].wrprot {
                    self.status_register.insert(WdStatus::WRPROT);
                    self.finish_with_intrq(clock);
                    return;
                }
                self.status_register.remove(WdStatus::WRPROT);
                self.data_offset = 0;
                self.drives[self.current].wait_index_hole();
                self.set_datarq();
            }
            WdState::ReadTrack => {
                self.drives[self.current].wait_index_hole();
                self.set_datarq();
            }
            _ => {
                // READ ID
                if !self.read_id_active {
                    self.read_id_active = true;
                    self.rev = 5;
                    self.id_mark = AddressMark::None;
                }
                if self.id_mark == AddressMark::None {
                    while self.rev > 0 {
                        let start = self.scan_start();
                        self.read_id();
                        let elapsed = self.scan_elapsed_ms(start);
                        if elapsed > 0 {
                            clock.add_ms(elapsed as u32, self.events.fdc, 0);
                            return;
                        } else if self.id_mark != AddressMark::None {
                            break;
                        }
                    }
                    if self.id_mark == AddressMark::None {
                        self.status_register.insert(WdStatus::RNF);
                        self.finish_with_intrq(clock);
                        self.read_id_active = false;
                        return;
                    }
                }
                self.read_id_active = false;
                self.data_offset = 0;
                self.set_datarq();
            }
        }
        clock.events.remove_type(self.events.timeout);
        // two revolutions
        clock.add_ms(400, self.events.timeout, 0);
    }

    // -- data register --

    pub fn dr_read(&mut self, clock: &mut DiskClock) -> u8 {
        if self.flags.contains(WdFlags::DRQ)
            && self.status_register.contains(WdStatus::BUSY)
        {
            clock.events.remove_type(self.events.fdc);
        }

        match self.state {
            WdState::Read => {
                self.data_offset += 1;
                let (data, _) = self.read_next_crc();
                if data > 0xff {
                    // no data under the head
                    self.status_register.insert(WdStatus::RNF);
                    self.status_register.remove(WdStatus::BUSY);
                    self.status_type = StatusType::Type2;
                    self.state = WdState::None;
                    self.set_intrq(clock);
                    self.reset_datarq();
                } else {
                    self.data_register = data as u8;
                    if self.data_offset == self.sector_length {
                        // the CRC bytes
                        self.read_next_crc();
                        self.read_next_crc();
                        clock.events.remove_type(self.events.timeout);
                        if self.crc == 0x0000 && self.data_multisector {
                            self.sector_register = self.sector_register.wrapping_add(1);
                            self.rev = 5;
                            self.reset_datarq();
                            // five revolutions to find the next sector
                            clock.add_ms(1000, self.events.timeout, 0);
                            clock.add_ms(20, self.events.fdc, 0);
                        } else {
                            self.status_register.remove(WdStatus::BUSY);
                            if self.crc == 0x0000 {
                                self.status_register.remove(WdStatus::CRC_ERR);
                            } else {
                                self.status_register.insert(WdStatus::CRC_ERR);
                            }
                            self.status_type = StatusType::Type2;
                            self.state = WdState::None;
                            self.set_intrq(clock);
                            self.reset_datarq();
                        }
                    }
                }
            }
            WdState::ReadId => {
                match self.data_offset {
                    0 => self.data_register = self.id_track,
                    1 => self.data_register = self.id_head,
                    2 => self.data_register = self.id_sector,
                    3 => self.data_register = self.id_length,
                    4 => self.data_register = (self.crc >> 8) as u8,
                    5 => {
                        self.sector_register = self.id_track;
                        self.data_register = self.crc as u8;
                        self.status_register.remove(WdStatus::BUSY);
                        self.status_type = StatusType::Type2;
                        self.state = WdState::None;
                        clock.events.remove_type(self.events.timeout);
                        self.set_intrq(clock);
                        self.reset_datarq();
                    }
                    _ => {}
                }
                self.data_offset += 1;
            }
            WdState::ReadTrack => {
                // an unformatted or out-of-reach track reads as zeros
                let (data, index) = self.read_next();
                self.data_register = data as u8;
                if index {
                    clock.events.remove_type(self.events.timeout);
                    self.status_register.remove(WdStatus::BUSY);
                    self.status_type = StatusType::Type2;
                    self.state = WdState::None;
                    self.set_intrq(clock);
                    self.reset_datarq();
                }
            }
            _ => {}
        }

        if self.flags.contains(WdFlags::DRQ)
            && self.status_register.contains(WdStatus::BUSY)
        {
            clock.add_us(30, self.events.fdc, 0);
        }
        self.data_register
    }

    pub fn dr_write(&mut self, clock: &mut DiskClock, b: u8) {
        self.data_register = b;
        match self.state {
            WdState::Write => {
                self.data_offset += 1;
                self.write_next_crc(b as u16);
                if self.data_offset == self.sector_length {
                    let crc = self.crc;
                    self.write_next((crc >> 8) as u16);
                    self.write_next((crc & 0xff) as u16);
                    self.write_next(0x00ff);
                    clock.events.remove_type(self.events.timeout);

                    if self.data_multisector {
                        self.sector_register = self.sector_register.wrapping_add(1);
                        self.rev = 5;
                        self.reset_datarq();
                        clock.add_ms(1000, self.events.timeout, 0);
                        clock.add_ms(20, self.events.fdc, 0);
                    } else {
                        self.status_register.remove(WdStatus::BUSY);
                        self.status_type = StatusType::Type2;
                        self.state = WdState::None;
                        self.set_intrq(clock);
                        self.reset_datarq();
                    }
                }
            }
            WdState::WriteTrack => {
                let mut data = b as u16;
                if self.dden {
                    match b {
                        0xf7 => {
                            // emit the CRC, high byte then low
                            let crc = self.crc;
                            self.write_next((crc >> 8) & 0xff);
                            data = crc & 0xff;
                        }
                        0xf5 => {
                            data = 0xffa1;
                            // CRC preset as if three 0xa1 marks were summed
                            self.crc = CRC_AFTER_MFM_MARKS;
                        }
                        0xf6 => {
                            data = 0xffc2;
                        }
                        _ => {
                            self.crc = crc_fdc(self.crc, b);
                        }
                    }
                } else {
                    match b {
                        0xf7 => {
                            let crc = self.crc;
                            self.write_next((crc >> 8) & 0xff);
                            data = crc & 0xff;
                        }
                        0xfe | 0xf8..=0xfb => {
                            self.crc = 0xffff;
                            self.crc = crc_fdc(self.crc, b);
                            data |= 0xff00;
                        }
                        0xfc => {
                            data |= 0xff00;
                        }
                        _ => {
                            self.crc = crc_fdc(self.crc, b);
                        }
                    }
                }
                self.write_next(data);

                if self.drives[self.current].index {
                    clock.events.remove_type(self.events.timeout);
                    self.status_register.remove(WdStatus::BUSY);
                    self.state = WdState::None;
                    self.set_intrq(clock);
                    self.reset_datarq();
                }
            }
            _ => {}
        }

        if self.flags.contains(WdFlags::DRQ)
            && self.status_register.contains(WdStatus::BUSY)
        {
            clock.add_us(30, self.events.fdc, 0);
        }
    }

    // -- event plumbing --

    /// Handles one of this controller's scheduled events.
    pub fn event(&mut self, clock: &mut DiskClock, kind: WdEventKind) {
        match kind {
            WdEventKind::Timeout => {
                if matches!(
                    self.state,
                    WdState::Read | WdState::Write | WdState::ReadTrack
                        | WdState::WriteTrack | WdState::ReadId
                ) {
                    self.state = WdState::None;
                    self.status_register.insert(WdStatus::LOST);
                    self.status_register.remove(WdStatus::BUSY);
                    self.reset_datarq();
                    self.set_intrq(clock);
                }
            }
            WdEventKind::MotorOff => {
                if self.fdc_type.has_motor() {
                    self.status_register.remove(WdStatus::MOTORON);
                    let current = self.current;
                    self.drives[current].motor_on(clock, false);
                } else {
                    self.head_load = false;
                    self.head_load_line(clock, false);
                }
            }
            WdEventKind::Fdc => {
                if self.fdc_type.has_head_load()
                    && self.hlt_time > 0
                    && self.head_load
                    && !self.hlt
                {
                    self.hlt = true;
                }
                let type1_spun_up = self.fdc_type.has_motor()
                    && self.status_register.contains(WdStatus::MOTORON)
                    && self.status_type == StatusType::Type1;
                let seek_head_loaded = self.fdc_type.has_head_load()
                    && matches!(self.state, WdState::Seek | WdState::SeekDelay)
                    && self.head_load;
                if type1_spun_up || seek_head_loaded {
                    self.status_register.insert(WdStatus::SPINUP);
                }

                if self.read_id_active {
                    match self.state {
                        WdState::Verify => self.seek_verify_read_id(clock),
                        WdState::Read | WdState::Write if self.datarq => {
                            self.datarq = false;
                            self.set_datarq();
                        }
                        WdState::Read | WdState::Write => self.type_ii_seek(clock),
                        WdState::ReadId => self.type_iii(clock),
                        _ => {}
                    }
                } else {
                    match self.state {
                        WdState::Seek | WdState::SeekDelay => self.type_i(clock),
                        WdState::Verify => self.seek_verify(clock),
                        WdState::Read | WdState::Write if self.datarq => {
                            self.datarq = false;
                            self.set_datarq();
                        }
                        WdState::Read | WdState::Write => self.type_ii(clock),
                        WdState::ReadTrack | WdState::ReadId | WdState::WriteTrack
                            if self.datarq =>
                        {
                            self.datarq = false;
                            self.set_datarq();
                        }
                        WdState::ReadTrack | WdState::ReadId | WdState::WriteTrack => {
                            self.type_iii(clock)
                        }
                        WdState::None => {}
                    }
                }
            }
        }
    }

    /// The drive's READY-arming / spin-down event.
    pub fn fdd_motor_event(&mut self, unit: usize) {
        self.drives[unit].motor_event();
    }

    /// The drive's index pulse event; wakes a parked force-interrupt wait.
    pub fn fdd_index_event(&mut self, clock: &mut DiskClock, unit: usize) {
        if self.drives[unit].index_event(clock) {
            self.set_intrq(clock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdd::{Disk, FddEventTypes, FddParams, FddType};
    use ferrospec_core::clock::{EventScheduler, NO_EVENTS};

    const SPEED: u32 = 3_500_000;

    struct Rig {
        fdc: WdFdc,
        events: EventScheduler,
        tstates: u32,
        fdd_types: FddEventTypes,
        wd_types: WdEventTypes,
    }

    impl Rig {
        fn new(fdc_type: WdType, flags: WdFlags) -> Self {
            let mut events = EventScheduler::new();
            let fdd_types = FddEventTypes::register(&mut events);
            let wd_types = WdEventTypes::register(&mut events);
            let drives = (0..2)
                .map(|unit| Fdd::new(FddType::IbmPc, FddParams::DOUBLE_40, unit, fdd_types))
                .collect();
            let fdc = WdFdc::new(fdc_type, 0, flags, drives, wd_types);
            Rig { fdc, events, tstates: 0, fdd_types, wd_types }
        }

        fn with_ready_drive(fdc_type: WdType) -> Self {
            let mut rig = Rig::new(fdc_type, WdFlags::empty());
            rig.fdc.drive_mut(0).load(Disk::new(2, 40), false);
            rig.fdc.drive_mut(0).select(true);
            {
                let mut clock = DiskClock::new(&mut rig.events, 0, SPEED);
                rig.fdc.drive_mut(0).motor_on(&mut clock, true);
            }
            rig.fdc.drive_mut(0).motor_event();
            rig.fdc.drive_mut(0).head_load(true);
            rig
        }

        fn cr_write(&mut self, b: u8) {
            let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
            self.fdc.cr_write(&mut clock, b);
        }

        fn dr_read(&mut self) -> u8 {
            let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
            self.fdc.dr_read(&mut clock)
        }

        fn dr_write(&mut self, b: u8) {
            let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
            self.fdc.dr_write(&mut clock, b);
        }

        /// Dispatches every event due at the next scheduled timestamp.
        /// Returns the number of FDC command-stage events among them.
        fn tick(&mut self) -> usize {
            let next = self.events.next_event();
            assert_ne!(next, NO_EVENTS, "controller stalled with nothing scheduled");
            self.tstates = next;
            let mut fdc_events = 0;
            while let Some(event) = self.events.next_due(self.tstates) {
                let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
                if event.etype == self.wd_types.fdc {
                    fdc_events += 1;
                    self.fdc.event(&mut clock, WdEventKind::Fdc);
                } else if event.etype == self.wd_types.motor_off {
                    self.fdc.event(&mut clock, WdEventKind::MotorOff);
                } else if event.etype == self.wd_types.timeout {
                    self.fdc.event(&mut clock, WdEventKind::Timeout);
                } else if event.etype == self.fdd_types.motor {
                    self.fdc.fdd_motor_event(event.user_data as usize);
                } else if event.etype == self.fdd_types.index {
                    self.fdc.fdd_index_event(&mut clock, event.user_data as usize);
                }
            }
            fdc_events
        }

        /// Ticks until the command completes, counting FDC stage events.
        fn run_to_completion(&mut self) -> usize {
            let mut fdc_events = 0;
            let mut guard = 0;
            while self.fdc.busy() {
                fdc_events += self.tick();
                guard += 1;
                assert!(guard < 1000, "command never completed");
            }
            fdc_events
        }

        /// Ticks until the controller raises DRQ or drops BUSY, like a
        /// CPU polling the status port.
        fn pump(&mut self) {
            let mut guard = 0;
            while self.fdc.busy() && !self.fdc.datarq {
                self.tick();
                guard += 1;
                assert!(guard < 1000, "controller never raised DRQ");
            }
        }

        /// Formats track 0 side 0 with `sectors` 512-byte sectors through
        /// WRITE TRACK. Sector data is `0xe5 ^ sector` filler.
        fn format_track(&mut self, sectors: u8) {
            let mut stream: Vec<u8> = Vec::new();
            for _ in 0..60 {
                stream.push(0x4e);
            }
            for sector in 1..=sectors {
                for _ in 0..12 {
                    stream.push(0x00);
                }
                stream.push(0xf5); // 3 x a1
                stream.push(0xfe); // IDAM
                stream.push(0); // track
                stream.push(0); // head
                stream.push(sector);
                stream.push(2); // 512 bytes
                stream.push(0xf7); // CRC
                for _ in 0..22 {
                    stream.push(0x4e);
                }
                for _ in 0..12 {
                    stream.push(0x00);
                }
                stream.push(0xf5);
                stream.push(0xfb); // DAM
                for _ in 0..512 {
                    stream.push(0xe5 ^ sector);
                }
                stream.push(0xf7);
                for _ in 0..24 {
                    stream.push(0x4e);
                }
            }
            self.cr_write(0xf0); // WRITE TRACK
            self.pump();
            let mut cursor = 0;
            // feed bytes until the index hole terminates the command
            while self.fdc.busy() {
                let b = if cursor < stream.len() { stream[cursor] } else { 0x4e };
                cursor += 1;
                self.dr_write(b);
                assert!(cursor < 20000, "write track never saw the index");
            }
        }
    }

    #[test]
    fn restore_steps_home_and_raises_intrq() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        for _ in 0..5 {
            rig.fdc.drive_mut(0).step(FddDir::StepIn);
        }
        assert_eq!(rig.fdc.drive(0).current_cylinder(), 5);

        rig.cr_write(0x08); // RESTORE, no verify, fastest rate
        let steps = rig.run_to_completion();
        // one step event per cylinder
        assert_eq!(steps, 5);
        assert!(rig.fdc.intrq);
        assert_eq!(rig.fdc.track_register, 0);
        assert!(rig.fdc.drive(0).tr00);
        let status = rig.fdc.sr_read();
        assert_eq!(status & WdStatus::BUSY.bits(), 0);
        // TR00 shows through the type I status
        assert_ne!(status & WdStatus::LOST.bits(), 0);
    }

    #[test]
    fn seek_moves_to_the_data_register() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.fdc.data_register = 12;
        rig.cr_write(0x18); // SEEK
        rig.run_to_completion();
        assert_eq!(rig.fdc.track_register, 12);
        assert_eq!(rig.fdc.drive(0).current_cylinder(), 12);
        assert!(rig.fdc.intrq);
    }

    #[test]
    fn type_ii_without_ready_fails_immediately() {
        let mut rig = Rig::new(WdType::Fd1793, WdFlags::empty());
        rig.fdc.drive_mut(0).select(true);
        rig.cr_write(0x80); // READ SECTOR
        assert!(rig.fdc.intrq);
        assert_eq!(rig.fdc.sr_read() & WdStatus::BUSY.bits(), 0);
    }

    #[test]
    fn format_then_read_back_sectors() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.format_track(9);

        for sector in 1..=9u8 {
            rig.fdc.sector_register = sector;
            rig.fdc.track_register = 0;
            rig.cr_write(0x80); // READ SECTOR
            rig.pump();
            let mut drq_pulses = 0;
            let mut bytes = Vec::new();
            while rig.fdc.busy() {
                if rig.fdc.datarq {
                    drq_pulses += 1;
                    bytes.push(rig.dr_read());
                } else {
                    rig.pump();
                }
                assert!(drq_pulses <= 512, "sector {} overran", sector);
            }
            assert_eq!(drq_pulses, 512, "sector {} short", sector);
            for (i, b) in bytes.iter().enumerate() {
                assert_eq!(*b, 0xe5 ^ sector, "sector {} byte {}", sector, i);
            }
            assert!(rig.fdc.intrq);
            assert_eq!(
                rig.fdc.sr_read() & (WdStatus::CRC_ERR | WdStatus::RNF).bits(),
                0,
                "sector {} status", sector
            );
        }
    }

    #[test]
    fn missing_sector_sets_rnf() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.format_track(9);
        rig.fdc.sector_register = 10;
        rig.cr_write(0x80);
        rig.run_to_completion();
        assert!(rig.fdc.intrq);
        assert_ne!(rig.fdc.sr_read() & WdStatus::RNF.bits(), 0);
    }

    #[test]
    fn write_sector_round_trips() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.format_track(9);

        rig.fdc.sector_register = 3;
        rig.fdc.track_register = 0;
        rig.cr_write(0xa0); // WRITE SECTOR
        rig.pump();
        let mut written = 0u32;
        while rig.fdc.busy() {
            if rig.fdc.datarq {
                rig.dr_write(written as u8 ^ 0x5a);
                written += 1;
            } else {
                rig.pump();
            }
            assert!(written <= 512);
        }
        assert_eq!(written, 512);

        rig.cr_write(0x80); // READ it back
        rig.pump();
        let mut bytes = Vec::new();
        while rig.fdc.busy() {
            if rig.fdc.datarq {
                bytes.push(rig.dr_read());
            } else {
                rig.pump();
            }
            assert!(bytes.len() <= 512);
        }
        assert_eq!(bytes.len(), 512);
        for (i, b) in bytes.iter().enumerate() {
            assert_eq!(*b, (i as u32) as u8 ^ 0x5a);
        }
        assert_eq!(rig.fdc.sr_read() & WdStatus::CRC_ERR.bits(), 0);
    }

    #[test]
    fn read_address_returns_the_id_field() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.format_track(9);
        rig.cr_write(0xc0); // READ ADDRESS
        rig.pump();
        let mut id = Vec::new();
        while rig.fdc.busy() {
            if rig.fdc.datarq {
                id.push(rig.dr_read());
            } else {
                rig.pump();
            }
            assert!(id.len() <= 6);
        }
        assert_eq!(id.len(), 6);
        assert_eq!(id[0], 0); // track
        assert_eq!(id[1], 0); // head
        assert_eq!(id[3], 2); // 512-byte code
        // the sector register receives the track byte
        assert_eq!(rig.fdc.sector_register, 0);
    }

    #[test]
    fn force_interrupt_with_bit3_raises_intrq_now() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.cr_write(0xd8);
        assert!(rig.fdc.intrq);
        assert_eq!(rig.fdc.sr_read() & WdStatus::BUSY.bits(), 0);
    }

    #[test]
    fn force_interrupt_with_bit2_waits_for_the_index_pulse() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.cr_write(0xd4);
        assert!(!rig.fdc.intrq);
        assert!(rig.fdc.drive(0).fdc_wait_index);
        // index pulse rises then falls
        {
            let mut clock = DiskClock::new(&mut rig.events, 0, SPEED);
            rig.fdc.fdd_index_event(&mut clock, 0);
            rig.fdc.fdd_index_event(&mut clock, 0);
        }
        assert!(rig.fdc.intrq);
    }

    #[test]
    fn status_read_clears_intrq() {
        let mut rig = Rig::with_ready_drive(WdType::Fd1793);
        rig.cr_write(0xd8);
        assert!(rig.fdc.intrq);
        rig.fdc.sr_read();
        assert!(!rig.fdc.intrq);
    }
}
