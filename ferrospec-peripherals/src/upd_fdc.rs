/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The NEC µPD765 floppy controller.
//!
//! Unlike the WD chips, the µPD765 is command-phase driven: the host feeds
//! a command byte and its parameter bytes through the data port, the
//! controller executes (serving data through the same port in non-DMA
//! mode), and a result phase returns the status registers. Seeks run
//! overlapped across the four units and complete through SENSE INTERRUPT
//! STATUS.
use ferrospec_core::clock::{EventScheduler, EventType};

use crate::crc::crc_fdc;
use crate::fdd::{Fdd, FddDir};
use crate::DiskClock;

const MAX_SIZE_CODE: u8 = 8;

// main status register bits
pub const MAIN_BUSY: u8 = 0x10;
pub const MAIN_EXECUTION: u8 = 0x20;
pub const MAIN_DATADIR: u8 = 0x40;
pub const MAIN_DATA_READ: u8 = 0x40;
pub const MAIN_DATAREQ: u8 = 0x80;

// ST0
const ST0_NOT_READY: u8 = 0x08;
const ST0_EQUIP_CHECK: u8 = 0x10;
const ST0_SEEK_END: u8 = 0x20;
const ST0_INT_ABNORM: u8 = 0x40;
const ST0_INT_READY: u8 = 0xc0;

// ST1
const ST1_MISSING_AM: u8 = 0x01;
const ST1_NOT_WRITEABLE: u8 = 0x02;
const ST1_NO_DATA: u8 = 0x04;
const ST1_OVERRUN: u8 = 0x10;
const ST1_CRC_ERROR: u8 = 0x20;
const ST1_EOF_CYLINDER: u8 = 0x80;

// ST2
const ST2_MISSING_DM: u8 = 0x01;
const ST2_BAD_CYLINDER: u8 = 0x02;
const ST2_SCAN_NOT_SAT: u8 = 0x04;
const ST2_SCAN_HIT: u8 = 0x08;
const ST2_WRONG_CYLINDER: u8 = 0x10;
const ST2_DATA_ERROR: u8 = 0x20;
const ST2_CONTROL_MARK: u8 = 0x40;

// ST3
const ST3_TR00: u8 = 0x10;
const ST3_READY: u8 = 0x20;
const ST3_WRPROT: u8 = 0x40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdCmdId {
    // the host reads during execution
    ReadData = 0,
    ReadDiag,
    // the host writes during execution
    WriteData,
    WriteId,
    Scan,
    // no data transfer during execution
    ReadId,
    // no head contact
    Recalibrate,
    SenseInt,
    Specify,
    SenseDrive,
    Version,
    Seek,
    Invalid,
}

#[derive(Clone, Copy, Debug)]
struct CmdDef {
    id: UpdCmdId,
    mask: u8,
    value: u8,
    cmd_length: u8,
    res_length: u8,
}

static CMD_TABLE: [CmdDef; 17] = [
    CmdDef { id: UpdCmdId::ReadData, mask: 0x1f, value: 0x06, cmd_length: 0x08, res_length: 0x07 },
    // deleted data
    CmdDef { id: UpdCmdId::ReadData, mask: 0x1f, value: 0x0c, cmd_length: 0x08, res_length: 0x07 },
    CmdDef { id: UpdCmdId::ReadDiag, mask: 0x9f, value: 0x02, cmd_length: 0x08, res_length: 0x07 },
    CmdDef { id: UpdCmdId::Recalibrate, mask: 0xff, value: 0x07, cmd_length: 0x01, res_length: 0x00 },
    CmdDef { id: UpdCmdId::Seek, mask: 0xff, value: 0x0f, cmd_length: 0x02, res_length: 0x00 },
    CmdDef { id: UpdCmdId::WriteData, mask: 0x3f, value: 0x05, cmd_length: 0x08, res_length: 0x07 },
    // deleted data
    CmdDef { id: UpdCmdId::WriteData, mask: 0x3f, value: 0x09, cmd_length: 0x08, res_length: 0x07 },
    CmdDef { id: UpdCmdId::WriteId, mask: 0xbf, value: 0x0d, cmd_length: 0x05, res_length: 0x07 },
    CmdDef { id: UpdCmdId::Scan, mask: 0x1f, value: 0x11, cmd_length: 0x08, res_length: 0x07 },
    // low or equal
    CmdDef { id: UpdCmdId::Scan, mask: 0x1f, value: 0x19, cmd_length: 0x08, res_length: 0x07 },
    // high or equal
    CmdDef { id: UpdCmdId::Scan, mask: 0x1f, value: 0x1d, cmd_length: 0x08, res_length: 0x07 },
    CmdDef { id: UpdCmdId::ReadId, mask: 0xbf, value: 0x0a, cmd_length: 0x01, res_length: 0x07 },
    CmdDef { id: UpdCmdId::SenseInt, mask: 0xff, value: 0x08, cmd_length: 0x00, res_length: 0x02 },
    CmdDef { id: UpdCmdId::Specify, mask: 0xff, value: 0x03, cmd_length: 0x02, res_length: 0x00 },
    CmdDef { id: UpdCmdId::SenseDrive, mask: 0xff, value: 0x04, cmd_length: 0x01, res_length: 0x01 },
    CmdDef { id: UpdCmdId::Version, mask: 0x1f, value: 0x10, cmd_length: 0x00, res_length: 0x01 },
    CmdDef { id: UpdCmdId::Invalid, mask: 0x00, value: 0x00, cmd_length: 0x00, res_length: 0x01 },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdType {
    Upd765a,
    Upd765b,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdClock {
    Clock4Mhz,
    Clock8Mhz,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scan {
    Equal,
    LowOrEqual,
    HighOrEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdIntrq {
    None = 0,
    Result,
    Exe,
    Ready,
    Seek,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdState {
    Cmd,
    Exe,
    Res,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddressMark {
    None,
    Id,
}

/// The scheduler event types one controller owns.
#[derive(Clone, Copy, Debug)]
pub struct UpdEventTypes {
    pub fdc: EventType,
    pub head: EventType,
    pub timeout: EventType,
}

impl UpdEventTypes {
    pub fn register(events: &mut EventScheduler) -> Self {
        UpdEventTypes {
            fdc: events.register("UPD FDC event"),
            head: events.register("UPD FDC head (un)load"),
            timeout: events.register("UPD FDC timeout"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdEventKind {
    Fdc,
    Head,
    Timeout,
}

pub struct UpdFdc {
    pub fdc_type: UpdType,
    pub clock_rate: UpdClock,

    drives: Vec<Fdd>,
    /// Unit-select code to drive index; the +3 mirrors 2->0 and 3->1.
    unit_map: [usize; 4],
    current: usize,
    events: UpdEventTypes,

    stp_rate: u32,
    hut_time: u32,
    hld_time: u32,
    non_dma: bool,
    first_rw: bool,

    pub intrq: UpdIntrq,

    state: UpdState,

    id_track: u8,
    id_head: u8,
    id_sector: u8,
    id_length: u8,
    sector_length: u32,
    ddam: bool,
    rev: i32,
    head_load: bool,
    read_id: bool,
    id_mark: AddressMark,

    /// Speedlock copy-protection heuristic; `None` disables it entirely.
    /// See the data-port read path for what it corrupts and when.
    speedlock: Option<i32>,
    last_sector_read: u32,

    data_offset: u32,
    cycle: u8,
    del_data: bool,
    mt: bool,
    mf: bool,
    sk: bool,
    hd: u8,
    us: usize,
    pcn: [i32; 4],
    ncn: [i32; 4],
    rec: [i32; 4],
    seek: [u8; 4],
    seek_age: [u8; 4],
    rlen: u32,
    scan: Scan,

    cmd: usize,
    command_register: u8,
    data_register: [u8; 9],
    main_status: u8,
    status_register: [u8; 4],
    sense_int_res: [u8; 2],
    crc: u16,
}

impl UpdFdc {
    pub fn new(
        fdc_type: UpdType,
        clock_rate: UpdClock,
        drives: Vec<Fdd>,
        unit_map: [usize; 4],
        events: UpdEventTypes,
    ) -> Self {
        let mut fdc = UpdFdc {
            fdc_type,
            clock_rate,
            drives,
            unit_map,
            current: 0,
            events,
            stp_rate: 16,
            hut_time: 240,
            hld_time: 254,
            non_dma: true,
            first_rw: false,
            intrq: UpdIntrq::None,
            state: UpdState::Cmd,
            id_track: 0,
            id_head: 0,
            id_sector: 0,
            id_length: 0,
            sector_length: 0,
            ddam: false,
            rev: 0,
            head_load: false,
            read_id: false,
            id_mark: AddressMark::None,
            speedlock: Some(0),
            last_sector_read: 0,
            data_offset: 0,
            cycle: 0,
            del_data: false,
            mt: false,
            mf: false,
            sk: false,
            hd: 0,
            us: 0,
            pcn: [0; 4],
            ncn: [0; 4],
            rec: [0; 4],
            seek: [0; 4],
            seek_age: [0; 4],
            rlen: 0,
            scan: Scan::Equal,
            cmd: CMD_TABLE.len() - 1,
            command_register: 0,
            data_register: [0; 9],
            main_status: MAIN_DATAREQ,
            status_register: [0; 4],
            sense_int_res: [0; 2],
            crc: 0xffff,
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

    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }

    /// Enables or disables the Speedlock weak-CRC quirk.
    pub fn set_speedlock_enabled(&mut self, enabled: bool) {
        self.speedlock = if enabled { Some(0) } else { None };
    }

    pub fn master_reset(&mut self) {
        self.current = self.unit_map[0];
        let current = self.current;
        for i in 0..self.drives.len() {
            let selected = i == current;
            self.drives[i].select(selected);
        }
        self.main_status = MAIN_DATAREQ;
        self.status_register = [0; 4];
        self.pcn = [0; 4];
        self.seek = [0; 4];
        self.seek_age = [0; 4];
        self.stp_rate = 16;
        self.hut_time = 240;
        self.hld_time = 254;
        self.non_dma = true;
        self.head_load = false;
        self.intrq = UpdIntrq::None;
        self.state = UpdState::Cmd;
        self.cycle = 0;
        self.last_sector_read = 0;
        self.read_id = false;
        if let Some(counter) = self.speedlock.as_mut() {
            *counter = 0;
        }
    }

    fn cmd_def(&self) -> &'static CmdDef {
        &CMD_TABLE[self.cmd]
    }

    fn cmd_identify(&mut self) {
        let register = self.command_register;
        let index = CMD_TABLE.iter()
            .position(|c| register & c.mask == c.value)
            .unwrap_or(CMD_TABLE.len() - 1);
        self.mt = register & 0x80 != 0;
        self.mf = register & 0x40 != 0;
        self.sk = register & 0x20 != 0;
        self.cmd = index;
    }

    // -- drive transfer helpers --

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

    /// Scans for the next ID field. 0 = found, 1 = found with a CRC error,
    /// 2 = nothing within the revolution budget.
    fn read_id_field(&mut self) -> u8 {
        self.status_register[1] &= !(ST1_CRC_ERROR | ST1_MISSING_AM | ST1_NO_DATA);
        self.id_mark = AddressMark::None;
        let entry_rev = self.rev;
        while self.rev == entry_rev && self.drives[self.current].ready {
            let (data, index) = self.read_next();
            if index {
                self.rev -= 1;
            }
            self.crc = 0xffff;
            if self.mf {
                if data == 0xffa1 {
                    self.crc = crc_fdc(self.crc, data as u8);
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
                } else {
                    continue;
                }
            }
            let (data, index) = self.read_next();
            if index {
                self.rev -= 1;
            }
            let idam_ok = if self.mf { data == 0x00fe } else { data == 0xfffe };
            if !idam_ok {
                continue;
            }
            self.crc = crc_fdc(self.crc, data as u8);
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
            self.id_length = (data as u8).min(MAX_SIZE_CODE);
            self.sector_length = 0x80 << self.id_length;
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
                self.status_register[1] |= ST1_CRC_ERROR | ST1_NO_DATA;
                return 1;
            }
            return 0;
        }
        if !self.drives[self.current].ready {
            self.rev = 0;
        }
        self.status_register[1] |= ST1_MISSING_AM | ST1_NO_DATA;
        2
    }

    /// Synchronises onto the data address mark. Returns false on failure.
    fn read_datamark(&mut self) -> bool {
        if self.mf {
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
                self.status_register[2] |= ST2_MISSING_DM;
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
                self.status_register[2] |= ST2_MISSING_DM;
                return false;
            }
            let marks_left = if last == 0xffa1 { 2 } else { 3 };
            for _ in 0..marks_left {
                let (data, _) = self.read_next_crc();
                if data != 0xffa1 {
                    self.status_register[2] |= ST2_MISSING_DM;
                    return false;
                }
            }
            let (data, _) = self.read_next_crc();
            if data < 0x00f8 || data > 0x00fb {
                self.status_register[2] |= ST2_MISSING_DM;
                return false;
            }
            self.ddam = data != 0x00fb;
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
                self.status_register[2] |= ST2_MISSING_DM;
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
                self.status_register[2] |= ST2_MISSING_DM;
                return false;
            }
            if i == 0 {
                let (d, _) = self.read_next_crc();
                data = d;
                if d < 0xfff8 || d > 0xfffb {
                    self.status_register[2] |= ST2_MISSING_DM;
                    return false;
                }
            }
            self.ddam = data & 0xff != 0xfb;
            true
        }
    }

    /// Finds the ID the command parameters name. 0 = found, 1 = CRC error,
    /// 2 = no ID at all, 3 = not this one.
    fn seek_id(&mut self) -> u8 {
        self.status_register[2] &= !(ST2_WRONG_CYLINDER | ST2_BAD_CYLINDER);
        let r = self.read_id_field();
        if r != 0 {
            return r;
        }
        if self.id_track != self.data_register[1] {
            self.status_register[2] |= ST2_WRONG_CYLINDER;
            if self.id_track == 0xff {
                self.status_register[2] |= ST2_BAD_CYLINDER;
            }
            return 3;
        }
        if self.id_sector == self.data_register[3] && self.id_head == self.data_register[2] {
            if self.id_length != self.data_register[4] {
                self.status_register[1] |= ST1_NO_DATA;
                return 3;
            }
            return 0;
        }
        self.status_register[1] |= ST1_NO_DATA;
        3
    }

    fn cmd_result(&mut self, clock: &mut DiskClock) {
        self.cycle = self.cmd_def().res_length;
        self.main_status &= !MAIN_EXECUTION;
        self.main_status |= MAIN_DATAREQ;
        if self.cycle > 0 {
            self.state = UpdState::Res;
            self.intrq = UpdIntrq::Result;
            self.main_status |= MAIN_DATA_READ;
        } else {
            self.state = UpdState::Cmd;
            self.main_status &= !MAIN_DATADIR;
            self.main_status &= !MAIN_BUSY;
        }
        clock.events.remove_type(self.events.timeout);
        if self.head_load && self.cmd_def().id <= UpdCmdId::ReadId {
            let hut = self.hut_time;
            clock.add_ms(hut, self.events.head, 0);
        }
    }

    fn seek_step(&mut self, clock: &mut DiskClock, start: bool) {
        let i = if start {
            let i = self.us;
            // drive already seeking? cleared by Sense Interrupt
            if self.main_status & (1 << i) != 0 {
                return;
            }
            self.main_status |= 1 << i;
            i
        } else {
            // the drive whose positioning has been pending longest
            let mut i = 0;
            for j in 1..4 {
                if self.seek_age[j] > self.seek_age[i] {
                    i = j;
                }
            }
            if self.seek[i] == 0 || self.seek[i] >= 4 {
                return;
            }
            i
        };

        let drive_index = self.unit_map[i];

        if self.pcn[i] == self.ncn[i] && self.seek[i] == 2 && !self.drives[drive_index].tr00 {
            // recalibrate fell short of TR00
            self.seek[i] = 5;
            self.seek_age[i] = 0;
            self.intrq = UpdIntrq::Seek;
            self.status_register[0] |= ST0_EQUIP_CHECK;
            self.main_status &= !(1 << i);
            return;
        }

        if self.pcn[i] == self.ncn[i] || (self.seek[i] == 2 && self.drives[drive_index].tr00) {
            if self.seek[i] == 2 {
                self.pcn[i] = 0;
            }
            self.seek[i] = 4; // normal termination
            self.seek_age[i] = 0;
            self.intrq = UpdIntrq::Seek;
            self.main_status &= !(1 << i);
            return;
        }

        if !self.drives[drive_index].ready {
            if self.seek[i] == 2 {
                self.pcn[i] = self.rec[i] - (77 - self.pcn[i]);
            }
            self.seek[i] = 6; // lost READY
            self.seek_age[i] = 0;
            self.intrq = UpdIntrq::Ready;
            self.main_status &= !(1 << i);
            return;
        }

        if self.pcn[i] != self.ncn[i] {
            let direction = if self.pcn[i] > self.ncn[i] {
                FddDir::StepOut
            } else {
                FddDir::StepIn
            };
            self.drives[drive_index].step(direction);
            self.pcn[i] += if direction == FddDir::StepOut { -1 } else { 1 };

            for j in 0..4 {
                if self.seek_age[j] > 0 {
                    self.seek_age[j] += 1;
                }
            }
            self.seek_age[i] = 1;

            let rate = self.stp_rate;
            clock.add_ms(rate, self.events.fdc, 0);
        }
    }

    fn schedule_scan_hop(&mut self, clock: &mut DiskClock, start: usize) -> bool {
        let drive = &self.drives[self.current];
        let bpt = drive.bytes_per_track();
        let elapsed = if bpt != 0 {
            (drive.position() as i32 - start as i32) * 200 / bpt as i32
        } else {
            200
        };
        if elapsed > 0 {
            clock.add_ms(elapsed as u32, self.events.fdc, 0);
            return true;
        }
        false
    }

    fn scan_start(&self) -> usize {
        let drive = &self.drives[self.current];
        if drive.position() >= drive.bytes_per_track() {
            0
        } else {
            drive.position()
        }
    }

    fn start_read_id(&mut self, clock: &mut DiskClock) {
        if !self.read_id {
            self.rev = 2;
            self.read_id = true;
        }
        if self.rev > 0 {
            let start = self.scan_start();
            if self.read_id_field() != 2 {
                self.rev = 0;
            }
            if self.schedule_scan_hop(clock, start) {
                return;
            }
        }
        self.read_id = false;
        if self.id_mark != AddressMark::None {
            self.data_register[1] = self.id_track;
            self.data_register[2] = self.id_head;
            self.data_register[3] = self.id_sector;
            self.data_register[4] = self.id_length;
        }
        if self.id_mark != AddressMark::Id
            || self.status_register[1] & ST1_CRC_ERROR != 0
        {
            self.status_register[0] |= ST0_INT_ABNORM;
        }
        self.intrq = UpdIntrq::Result;
        self.cmd_result(clock);
    }

    fn start_read_diag(&mut self, clock: &mut DiskClock) {
        if !self.read_id {
            self.rev = 2;
            self.read_id = true;
        }
        if self.rev > 0 {
            let start = self.scan_start();
            if self.read_id_field() != 2 {
                self.rev = 0;
            }
            if self.schedule_scan_hop(clock, start) {
                return;
            }
        }
        self.read_id = false;
        if self.id_mark == AddressMark::None {
            self.status_register[0] |= ST0_INT_ABNORM;
            self.status_register[1] |= ST1_EOF_CYLINDER;
            self.cmd_result(clock);
            return;
        }
        if self.id_track != self.data_register[1]
            || self.id_sector != self.data_register[3]
            || self.id_head != self.data_register[2]
        {
            self.status_register[1] |= ST1_NO_DATA;
        }
        if self.id_track != self.data_register[1] {
            self.status_register[2] |= ST2_WRONG_CYLINDER;
            if self.id_track == 0xff {
                self.status_register[2] |= ST2_BAD_CYLINDER;
            }
        }
        if !self.read_datamark() {
            self.status_register[0] |= ST0_INT_ABNORM;
            self.cmd_result(clock);
            return;
        }
        self.main_status |= MAIN_DATAREQ | MAIN_DATA_READ;
        self.data_offset = 0;
        clock.events.remove_type(self.events.timeout);
        // two revolutions
        clock.add_ms(400, self.events.timeout, 0);
    }

    fn start_read_data(&mut self, clock: &mut DiskClock) {
        loop {
            if self.first_rw || self.read_id
                || self.data_register[5] > self.data_register[3]
            {
                if !self.read_id {
                    if !self.first_rw {
                        self.data_register[3] = self.data_register[3].wrapping_add(1);
                    }
                    self.first_rw = false;
                    self.rev = 2;
                    self.read_id = true;
                }
                while self.rev > 0 {
                    let start = self.scan_start();
                    if self.seek_id() == 0 {
                        self.rev = 0;
                    } else {
                        self.id_mark = AddressMark::None;
                    }
                    if self.schedule_scan_hop(clock, start) {
                        return;
                    }
                }
                self.read_id = false;
                if self.id_mark == AddressMark::None {
                    self.status_register[0] |= ST0_INT_ABNORM;
                    self.abort_read_data(clock);
                    return;
                }
                if !self.read_datamark() {
                    self.status_register[0] |= ST0_INT_ABNORM;
                    self.abort_read_data(clock);
                    return;
                }
                if self.ddam != self.del_data {
                    self.status_register[2] |= ST2_CONTROL_MARK;
                    if self.sk {
                        // skip the sector with the unwanted mark
                        self.data_register[3] = self.data_register[3].wrapping_add(1);
                        continue;
                    }
                }
                break;
            } else if self.mt {
                self.data_register[1] = self.data_register[1].wrapping_add(1);
                self.data_register[3] = 1;
                continue;
            } else {
                self.abort_read_data(clock);
                return;
            }
        }
        self.main_status |= MAIN_DATAREQ;
        if self.cmd_def().id != UpdCmdId::Scan {
            self.main_status |= MAIN_DATA_READ;
        }
        self.data_offset = 0;
        clock.events.remove_type(self.events.timeout);
        clock.add_ms(400, self.events.timeout, 0);
    }

    fn abort_read_data(&mut self, clock: &mut DiskClock) {
        // end of cylinder is flagged when the sector named by EOT was read
        // to completion and no terminal count arrived (the +3 never sends
        // one)
        if self.status_register[0] == 0 && self.status_register[1] == 0 {
            self.status_register[0] |= ST0_INT_ABNORM;
            self.status_register[1] |= ST1_EOF_CYLINDER;
        }
        if self.status_register[0] & (ST0_INT_ABNORM | ST0_INT_READY) == 0 {
            self.data_register[1] = self.data_register[1].wrapping_add(1);
            self.data_register[3] = 1;
        }
        self.main_status &= !MAIN_EXECUTION;
        self.intrq = UpdIntrq::Result;
        self.cmd_result(clock);
    }

    fn start_write_data(&mut self, clock: &mut DiskClock) {
        loop {
            if self.first_rw || self.read_id
                || self.data_register[5] > self.data_register[3]
            {
                if !self.read_id {
                    if !self.first_rw {
                        self.data_register[3] = self.data_register[3].wrapping_add(1);
                    }
                    self.first_rw = false;
                    self.rev = 2;
                    self.read_id = true;
                }
                while self.rev > 0 {
                    let start = self.scan_start();
                    if self.seek_id() == 0 {
                        self.rev = 0;
                    } else {
                        self.id_mark = AddressMark::None;
                    }
                    if self.schedule_scan_hop(clock, start) {
                        return;
                    }
                }
                self.read_id = false;
                if self.id_mark == AddressMark::None {
                    self.status_register[0] |= ST0_INT_ABNORM;
                    break;
                }
                // gap after the ID field
                for _ in 0..11 {
                    self.read_next();
                }
                if self.mf {
                    for _ in 0..11 {
                        self.read_next();
                    }
                }
                let zeros = if self.mf { 12 } else { 6 };
                for _ in 0..zeros {
                    self.write_next(0x0000);
                }
                self.crc = 0xffff;
                if self.mf {
                    for _ in 0..3 {
                        self.write_next_crc(0xffa1);
                    }
                }
                let mark = if self.del_data { 0x00f8 } else { 0x00fb }
                    | if self.mf { 0x0000 } else { 0xff00 };
                self.write_next_crc(mark);

                self.main_status |= MAIN_DATAREQ;
                self.main_status &= !MAIN_DATADIR; // host writes
                self.data_offset = 0;
                clock.events.remove_type(self.events.timeout);
                clock.add_ms(400, self.events.timeout, 0);
                return;
            } else {
                self.data_register[1] = self.data_register[1].wrapping_add(1);
                self.data_register[3] = 1;
                if self.mt {
                    continue;
                }
                self.status_register[0] |= ST0_INT_ABNORM;
                self.status_register[1] |= ST1_EOF_CYLINDER;
                break;
            }
        }
        self.main_status &= !MAIN_EXECUTION;
        self.intrq = UpdIntrq::Result;
        self.cmd_result(clock);
    }

    fn start_write_id(&mut self, clock: &mut DiskClock) {
        let gap = if self.mf { 0x4e } else { 0xff };
        let gaps = if self.mf { 80 } else { 40 };
        for _ in 0..gaps {
            self.write_next(gap);
        }
        let zeros = if self.mf { 12 } else { 6 };
        for _ in 0..zeros {
            self.write_next(0x0000);
        }
        self.crc = 0xffff;
        if self.mf {
            for _ in 0..3 {
                self.write_next(0xffc2);
            }
        }
        let index_mark = 0x00fc | if self.mf { 0x0000 } else { 0xff00 };
        self.write_next(index_mark);

        let postgap = if self.mf { 50 } else { 26 };
        for _ in 0..postgap {
            self.write_next(gap);
        }

        self.main_status |= MAIN_DATAREQ;
        self.main_status &= !MAIN_DATADIR; // host writes the ID fields
        self.data_offset = 0;
        // a tenth of a revolution to supply C, H, R, N
        clock.add_ms(20, self.events.timeout, 0);
    }

    fn head_load_then_start(&mut self, clock: &mut DiskClock) {
        clock.events.remove_type(self.events.head);
        if self.head_load {
            match self.cmd_def().id {
                UpdCmdId::ReadData | UpdCmdId::Scan => self.start_read_data(clock),
                UpdCmdId::ReadId => self.start_read_id(clock),
                UpdCmdId::ReadDiag => {
                    let current = self.current;
                    self.drives[current].wait_index_hole();
                    self.start_read_diag(clock);
                }
                UpdCmdId::WriteData => self.start_write_data(clock),
                UpdCmdId::WriteId => {
                    let current = self.current;
                    self.drives[current].wait_index_hole();
                    self.start_write_id(clock);
                }
                _ => {}
            }
        } else {
            let current = self.current;
            self.drives[current].head_load(true);
            self.head_load = true;
            let hld = self.hld_time;
            clock.add_ms(hld, self.events.fdc, 0);
        }
    }

    /// Handles one of this controller's scheduled events.
    pub fn event(&mut self, clock: &mut DiskClock, kind: UpdEventKind) {
        match kind {
            UpdEventKind::Timeout => {
                self.status_register[0] |= ST0_INT_ABNORM;
                self.status_register[1] |= ST1_OVERRUN;
                self.cmd_result(clock);
            }
            UpdEventKind::Head => {
                let current = self.current;
                self.drives[current].head_load(false);
                self.head_load = false;
            }
            UpdEventKind::Fdc => {
                if self.read_id {
                    match self.cmd_def().id {
                        UpdCmdId::ReadData => self.start_read_data(clock),
                        UpdCmdId::ReadId => self.start_read_id(clock),
                        UpdCmdId::ReadDiag => self.start_read_diag(clock),
                        UpdCmdId::WriteData => self.start_write_data(clock),
                        _ => {}
                    }
                } else if self.main_status & 0x0f != 0 {
                    self.seek_step(clock, false);
                } else {
                    match self.cmd_def().id {
                        UpdCmdId::ReadData | UpdCmdId::Scan => self.start_read_data(clock),
                        UpdCmdId::ReadId => self.start_read_id(clock),
                        UpdCmdId::ReadDiag => {
                            let current = self.current;
                            self.drives[current].wait_index_hole();
                            self.start_read_diag(clock);
                        }
                        UpdCmdId::WriteData => self.start_write_data(clock),
                        UpdCmdId::WriteId => {
                            let current = self.current;
                            self.drives[current].wait_index_hole();
                            self.start_write_id(clock);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// The drive's READY-arming / spin-down event.
    pub fn fdd_motor_event(&mut self, unit: usize) {
        self.drives[unit].motor_event();
    }

    /// The drive's index pulse event.
    pub fn fdd_index_event(&mut self, clock: &mut DiskClock, unit: usize) {
        self.drives[unit].index_event(clock);
    }

    /// Spins every drive's motor (the +3 drives all share the 0x1FFD motor
    /// bit).
    pub fn set_motor(&mut self, clock: &mut DiskClock, on: bool) {
        for unit in 0..self.drives.len() {
            self.drives[unit].motor_on(clock, on);
        }
    }

    pub fn read_status(&self) -> u8 {
        self.main_status
    }

    pub fn read_data(&mut self, clock: &mut DiskClock) -> u8 {
        if self.main_status & MAIN_DATAREQ == 0 || self.main_status & MAIN_DATA_READ == 0 {
            return 0xff;
        }

        if self.state == UpdState::Exe {
            // READ DATA / READ DIAG execution
            self.data_offset += 1;
            self.read_next_crc();

            // Speedlock: titles poll a deliberately bad sector 0:2:0x200;
            // the original hardware returns rubbish there, so corrupt the
            // stream (and its CRC) the same way
            if let Some(counter) = self.speedlock {
                let current = self.current;
                if counter > 0 && !self.drives[current].disk().map(|d| d.have_weak).unwrap_or(false) {
                    let data = self.drives[current].data;
                    if self.data_offset < 64 && data != 0xe5 {
                        self.speedlock = Some(2); // W.E.C Le Mans type
                    } else if (counter > 1 || self.data_offset < 64)
                        && self.data_offset % 29 == 0
                    {
                        self.drives[current].data ^= self.data_offset as u16;
                        let mangled = self.drives[current].data;
                        self.crc = crc_fdc(self.crc, mangled as u8);
                    }
                }
            }

            let r = (self.drives[self.current].data & 0xff) as u8;
            if self.data_offset == self.rlen {
                // the host only sees rlen bytes of the sector
                while self.data_offset < self.sector_length {
                    self.read_next_crc();
                    self.data_offset += 1;
                }
            }
            let id = self.cmd_def().id;
            if (id == UpdCmdId::ReadDiag || id == UpdCmdId::ReadData)
                && self.data_offset == self.sector_length
            {
                self.read_next_crc();
                self.read_next_crc();
                if self.crc != 0x0000 {
                    self.status_register[2] |= ST2_DATA_ERROR;
                    self.status_register[1] |= ST1_CRC_ERROR;
                    if id == UpdCmdId::ReadData {
                        // READ DIAG is not aborted by a data CRC error
                        self.status_register[0] |= ST0_INT_ABNORM;
                        self.cmd_result(clock);
                        return r;
                    }
                }
                if id == UpdCmdId::ReadData {
                    if self.ddam != self.del_data {
                        if self.data_register[5] > self.data_register[3] {
                            self.status_register[0] |= ST0_INT_ABNORM;
                        }
                        self.cmd_result(clock);
                        return r;
                    }
                    self.rev = 2;
                    self.main_status &= !MAIN_DATAREQ;
                    self.start_read_data(clock);
                } else {
                    self.data_register[3] = self.data_register[3].wrapping_add(1);
                    self.data_register[5] = self.data_register[5].wrapping_sub(1);
                    if self.data_register[5] == 0 {
                        self.cmd_result(clock);
                        return r;
                    }
                    self.main_status &= !MAIN_DATAREQ;
                    self.start_read_diag(clock);
                }
            }
            return r;
        }

        if self.state != UpdState::Res {
            return 0xff;
        }

        let def = self.cmd_def();
        let slot = (def.res_length - self.cycle) as usize;
        let r = match def.id {
            UpdCmdId::SenseDrive => self.status_register[3],
            UpdCmdId::SenseInt => self.sense_int_res[slot],
            _ if slot < 3 => self.status_register[slot],
            _ => self.data_register[slot - 2],
        };
        self.cycle -= 1;
        if self.cycle == 0 {
            self.state = UpdState::Cmd;
            self.main_status |= MAIN_DATAREQ;
            self.main_status &= !MAIN_DATADIR;
            self.main_status &= !MAIN_BUSY;
            if self.intrq < UpdIntrq::Ready {
                self.intrq = UpdIntrq::None;
            }
        }
        r
    }

    pub fn write_data(&mut self, clock: &mut DiskClock, data: u8) {
        if self.main_status & MAIN_DATAREQ == 0 || self.main_status & MAIN_DATA_READ != 0 {
            return;
        }

        if self.main_status & MAIN_BUSY != 0 && self.state == UpdState::Exe {
            match self.cmd_def().id {
                UpdCmdId::WriteId => self.format_sector_byte(clock, data),
                UpdCmdId::WriteData => {
                    self.data_offset += 1;
                    self.write_next_crc(data as u16);
                    if self.data_offset == self.rlen {
                        // the drive supplies zeros for the rest
                        while self.data_offset < self.sector_length {
                            self.read_next_crc();
                            self.data_offset += 1;
                        }
                    }
                    if self.data_offset == self.sector_length {
                        let crc = self.crc;
                        self.write_next(crc >> 8);
                        self.write_next(crc & 0xff);
                        self.main_status &= !MAIN_DATAREQ;
                        self.start_write_data(clock);
                    }
                }
                _ => {
                    // SCAN compares the stream against the disk
                    self.data_offset += 1;
                    let (disk_data, _) = self.read_next_crc();
                    let disk_data = (disk_data & 0xff) as u8;
                    if self.data_offset == 0 && disk_data == data {
                        self.status_register[2] |= ST2_SCAN_HIT;
                    }
                    if disk_data != data {
                        self.status_register[2] &= !ST2_SCAN_HIT;
                    }
                    let not_satisfied = match self.scan {
                        Scan::Equal => disk_data != data,
                        Scan::LowOrEqual => disk_data > data,
                        Scan::HighOrEqual => disk_data < data,
                    };
                    if not_satisfied {
                        self.status_register[2] |= ST2_SCAN_NOT_SAT;
                    }
                    if self.data_offset == self.sector_length {
                        self.read_next_crc();
                        self.read_next_crc();
                        if self.crc != 0x0000 {
                            self.status_register[2] |= ST2_DATA_ERROR;
                            self.status_register[1] |= ST1_CRC_ERROR;
                        }
                        self.data_register[3] =
                            self.data_register[3].wrapping_add(self.data_register[7]);
                        if self.ddam != self.del_data {
                            if self.data_register[5] >= self.data_register[3] {
                                self.status_register[0] |= ST0_INT_ABNORM;
                            }
                            self.cmd_result(clock);
                            return;
                        }
                        if self.status_register[2] & ST2_SCAN_HIT != 0
                            || self.status_register[2] & ST2_SCAN_NOT_SAT == 0
                        {
                            self.cmd_result(clock);
                            return;
                        }
                        self.rev = 2;
                        self.main_status &= !MAIN_DATAREQ;
                        self.start_read_data(clock);
                    }
                }
            }
            return;
        }

        self.command_phase_byte(clock, data);
    }

    /// One C/H/R/N byte of FORMAT TRACK; a full quad emits the sector.
    fn format_sector_byte(&mut self, clock: &mut DiskClock, data: u8) {
        self.data_register[self.data_offset as usize + 5] = data;
        self.data_offset += 1;
        if self.data_offset == 4 {
            clock.events.remove_type(self.events.timeout);

            let zeros = if self.mf { 12 } else { 6 };
            for _ in 0..zeros {
                self.write_next(0x0000);
            }
            self.crc = 0xffff;
            if self.mf {
                for _ in 0..3 {
                    self.write_next_crc(0xffa1);
                }
            }
            let id_mark = 0x00fe | if self.mf { 0x0000 } else { 0xff00 };
            self.write_next_crc(id_mark);
            for i in 0..4 {
                let field = self.data_register[i + 5] as u16;
                self.write_next_crc(field);
            }
            let crc = self.crc;
            self.write_next(crc >> 8);
            self.write_next(crc & 0xff);

            let gap = if self.mf { 0x4e } else { 0xff };
            let gaps = if self.mf { 22 } else { 11 };
            for _ in 0..gaps {
                self.write_next(gap);
            }
            let zeros = if self.mf { 12 } else { 6 };
            for _ in 0..zeros {
                self.write_next(0x0000);
            }
            self.crc = 0xffff;
            if self.mf {
                for _ in 0..3 {
                    self.write_next_crc(0xffa1);
                }
            }
            let data_mark = 0x00fb | if self.mf { 0x0000 } else { 0xff00 };
            self.write_next_crc(data_mark);

            let filler = self.data_register[4] as u16;
            for _ in 0..self.rlen {
                self.write_next_crc(filler);
            }
            let crc = self.crc;
            self.write_next(crc >> 8);
            self.write_next(crc & 0xff);

            for _ in 0..self.data_register[3] {
                self.write_next(gap);
            }
            self.data_offset = 0;
            self.data_register[2] = self.data_register[2].wrapping_sub(1);
        }
        if self.data_register[2] == 0 {
            // all sectors done: pad to the index hole
            let gap = if self.mf { 0x4e } else { 0xff };
            while !self.drives[self.current].index {
                self.write_next(gap);
            }
            self.main_status &= !MAIN_EXECUTION;
            self.intrq = UpdIntrq::Result;
            self.cmd_result(clock);
            return;
        }
        if self.data_offset == 0 {
            clock.add_ms(20, self.events.timeout, 0);
        }
    }

    fn command_phase_byte(&mut self, clock: &mut DiskClock, data: u8) {
        if self.cycle == 0 {
            self.command_register = data;
            self.cmd_identify();
            self.main_status |= MAIN_BUSY;
            // SENSE INTERRUPT STATUS with nothing pending is invalid
            if self.intrq == UpdIntrq::None && self.cmd_def().id == UpdCmdId::SenseInt {
                self.command_register = 0x00;
                self.cmd_identify();
            }
        } else {
            self.data_register[self.cycle as usize - 1] = data;
        }
        if self.cycle >= self.cmd_def().cmd_length {
            self.execute_command(clock);
        } else {
            self.cycle += 1;
        }
    }

    fn execute_command(&mut self, clock: &mut DiskClock) {
        let mut terminated = false;
        self.state = UpdState::Exe;
        self.main_status &= !MAIN_DATAREQ;
        if self.non_dma {
            self.main_status |= MAIN_EXECUTION;
        }

        let id = self.cmd_def().id;

        if !matches!(
            id,
            UpdCmdId::SenseInt | UpdCmdId::Specify | UpdCmdId::Version | UpdCmdId::Invalid
        ) {
            self.us = (self.data_register[0] & 0x03) as usize;
            let target = self.unit_map[self.us];
            if self.current != target {
                let old = self.current;
                self.drives[old].select(false);
                self.current = target;
                self.drives[target].select(true);
            }
            self.hd = (self.data_register[0] & 0x04) >> 2;
            let hd = self.hd as usize;
            self.drives[self.current].set_head(hd);

            if id == UpdCmdId::ReadData || id == UpdCmdId::WriteData {
                self.del_data = self.command_register & 0x08 != 0;
                self.sk = self.data_register[0] & 0x20 != 0;
            }
        }

        // seeks run overlapped: BUSY drops so further commands can follow
        if matches!(id, UpdCmdId::Recalibrate | UpdCmdId::Seek | UpdCmdId::Specify) {
            self.main_status &= !MAIN_BUSY;
        }

        if id < UpdCmdId::SenseInt {
            if id < UpdCmdId::Recalibrate {
                self.status_register[0] = 0;
                self.status_register[1] = 0;
                self.status_register[2] = 0;
            }
            self.status_register[0] = self.us as u8 + (self.hd << 2);
        }

        match id {
            UpdCmdId::Invalid => {
                self.status_register[0] = 0x80;
            }
            UpdCmdId::Version => {
                self.status_register[0] =
                    if self.fdc_type == UpdType::Upd765b { 0x90 } else { 0x80 };
            }
            UpdCmdId::Specify => {
                self.stp_rate = 0x10 - (self.data_register[0] >> 4) as u32;
                self.hut_time = ((self.data_register[0] & 0x0f) as u32) << 4;
                if self.hut_time == 0 {
                    self.hut_time = 128;
                }
                self.hld_time = (self.data_register[1] & 0xfe) as u32;
                if self.hld_time == 0 {
                    self.hld_time = 256;
                }
                self.non_dma = self.data_register[1] & 0x01 != 0;
                // a 4 MHz clock doubles every interval
                if self.clock_rate == UpdClock::Clock4Mhz {
                    self.stp_rate *= 2;
                    self.hut_time *= 2;
                    self.hld_time *= 2;
                }
                self.state = UpdState::Cmd;
            }
            UpdCmdId::SenseDrive => {
                let drive = &self.drives[self.current];
                let mut st3 = self.us as u8 + (self.hd << 2);
                // the +3 wiring returns write protect for the two-side
                // signal as well
                if drive.wrprot {
                    st3 |= ST3_WRPROT;
                }
                if drive.tr00 {
                    st3 |= ST3_TR00;
                }
                if drive.ready {
                    st3 |= ST3_READY;
                }
                self.status_register[3] = st3;
            }
            UpdCmdId::SenseInt => {
                for i in 0..4 {
                    if self.seek[i] >= 4 {
                        self.status_register[0] &= !0xc0;
                        self.status_register[0] |= ST0_SEEK_END;
                        if self.seek[i] == 5 {
                            self.status_register[0] |= ST0_INT_ABNORM;
                        } else if self.seek[i] == 6 {
                            self.status_register[0] |= ST0_INT_READY | ST0_NOT_READY;
                        }
                        self.seek[i] = 0;
                        self.seek_age[i] = 0;
                        // head bit always reads 0 here
                        self.sense_int_res[0] = self.status_register[0] & 0xfb;
                        self.sense_int_res[1] = self.pcn[i] as u8;
                        break;
                    }
                }
                if self.seek.iter().all(|&s| s < 4) {
                    self.intrq = UpdIntrq::None;
                }
            }
            UpdCmdId::Recalibrate => {
                if self.main_status & (1 << self.us) == 0 {
                    self.rec[self.us] = self.pcn[self.us];
                    self.pcn[self.us] = 77;
                    self.data_register[1] = 0x00;
                    self.ncn[self.us] = 0;
                    self.seek[self.us] = 2;
                    self.seek_step(clock, true);
                }
            }
            UpdCmdId::Seek => {
                if self.main_status & (1 << self.us) == 0 {
                    self.ncn[self.us] = self.data_register[1] as i32;
                    self.seek[self.us] = 1;
                    self.seek_step(clock, true);
                }
            }
            UpdCmdId::ReadId => {
                self.head_load_then_start(clock);
                return;
            }
            UpdCmdId::ReadData => {
                // Speedlock: note repeated reads of the weak sector
                if let Some(counter) = self.speedlock {
                    let current = self.current;
                    let weak_disk =
                        self.drives[current].disk().map(|d| d.have_weak).unwrap_or(false);
                    if !weak_disk {
                        let u = (self.data_register[2] as u32 & 0x01)
                            + ((self.data_register[1] as u32) << 1)
                            + ((self.data_register[3] as u32) << 8);
                        if self.data_register[3] == self.data_register[5] && u == 0x200 {
                            if u == self.last_sector_read {
                                self.speedlock = Some(counter + 1);
                            } else {
                                self.speedlock = Some(0);
                                self.last_sector_read = u;
                            }
                        } else {
                            self.last_sector_read = 0;
                            self.speedlock = Some(0);
                        }
                    }
                }
                self.set_rlen_from(self.data_register[4]);
                self.first_rw = true;
                self.head_load_then_start(clock);
                return;
            }
            UpdCmdId::ReadDiag => {
                self.set_rlen_from(self.data_register[4]);
                self.head_load_then_start(clock);
                return;
            }
            UpdCmdId::WriteData => {
                if self.drives[self.current].wrprot {
                    self.status_register[1] |= ST1_NOT_WRITEABLE;
                    self.status_register[0] |= ST0_INT_ABNORM;
                    terminated = true;
                } else {
                    self.set_rlen_from(self.data_register[4]);
                    self.first_rw = true;
                    self.head_load_then_start(clock);
                    return;
                }
            }
            UpdCmdId::WriteId => {
                if self.drives[self.current].wrprot {
                    self.status_register[1] |= ST1_NOT_WRITEABLE;
                    self.status_register[0] |= ST0_INT_ABNORM;
                    terminated = true;
                } else {
                    let code = self.data_register[1].min(MAX_SIZE_CODE);
                    self.rlen = 0x80 << code;
                    self.head_load_then_start(clock);
                    return;
                }
            }
            UpdCmdId::Scan => {
                self.scan = match (self.command_register & 0x0c) >> 2 {
                    0 => Scan::Equal,
                    3 => Scan::HighOrEqual,
                    _ => Scan::LowOrEqual,
                };
                self.set_rlen_from(self.data_register[4]);
                self.head_load_then_start(clock);
                return;
            }
        }

        if id < UpdCmdId::ReadId && !terminated {
            self.main_status |= MAIN_DATAREQ;
            if id < UpdCmdId::WriteData {
                self.main_status |= MAIN_DATA_READ;
            }
        } else {
            self.cmd_result(clock);
        }
    }

    fn set_rlen_from(&mut self, code: u8) {
        self.rlen = 0x80 << code.min(MAX_SIZE_CODE);
        if code == 0 && self.data_register[7] < 128 {
            self.rlen = self.data_register[7] as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdd::{Disk, FddEventTypes, FddParams, FddType};
    use ferrospec_core::clock::NO_EVENTS;

    const SPEED: u32 = 3_500_000;

    struct Rig {
        fdc: UpdFdc,
        events: EventScheduler,
        tstates: u32,
        fdd_types: FddEventTypes,
        upd_types: UpdEventTypes,
    }

    impl Rig {
        fn new() -> Self {
            let mut events = EventScheduler::new();
            let fdd_types = FddEventTypes::register(&mut events);
            let upd_types = UpdEventTypes::register(&mut events);
            let drives: Vec<Fdd> = (0..2)
                .map(|unit| Fdd::new(FddType::IbmPc, FddParams::DOUBLE_40, unit, fdd_types))
                .collect();
            let fdc = UpdFdc::new(
                UpdType::Upd765a,
                UpdClock::Clock8Mhz,
                drives,
                [0, 1, 0, 1],
                upd_types,
            );
            Rig { fdc, events, tstates: 0, fdd_types, upd_types }
        }

        fn with_ready_drive() -> Self {
            let mut rig = Rig::new();
            rig.fdc.drive_mut(0).load(Disk::new(2, 40), false);
            {
                let mut clock = DiskClock::new(&mut rig.events, 0, SPEED);
                rig.fdc.set_motor(&mut clock, true);
            }
            rig.fdc.fdd_motor_event(0);
            rig.fdc.drive_mut(0).select(true);
            rig
        }

        fn write(&mut self, b: u8) {
            let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
            self.fdc.write_data(&mut clock, b);
        }

        fn command(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.write(b);
            }
        }

        fn read(&mut self) -> u8 {
            let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
            self.fdc.read_data(&mut clock)
        }

        fn tick(&mut self) {
            let next = self.events.next_event();
            assert_ne!(next, NO_EVENTS, "controller stalled");
            self.tstates = next;
            while let Some(event) = self.events.next_due(self.tstates) {
                let mut clock = DiskClock::new(&mut self.events, self.tstates, SPEED);
                if event.etype == self.upd_types.fdc {
                    self.fdc.event(&mut clock, UpdEventKind::Fdc);
                } else if event.etype == self.upd_types.head {
                    self.fdc.event(&mut clock, UpdEventKind::Head);
                } else if event.etype == self.upd_types.timeout {
                    self.fdc.event(&mut clock, UpdEventKind::Timeout);
                } else if event.etype == self.fdd_types.motor {
                    self.fdc.fdd_motor_event(event.user_data as usize);
                } else if event.etype == self.fdd_types.index {
                    self.fdc.fdd_index_event(&mut clock, event.user_data as usize);
                }
            }
        }

        /// Ticks until the controller requests data or returns to the
        /// command phase.
        fn pump(&mut self) {
            let mut guard = 0;
            while self.fdc.read_status() & MAIN_DATAREQ == 0 {
                self.tick();
                guard += 1;
                assert!(guard < 2000, "controller never raised DATAREQ");
            }
        }

        fn result_bytes(&mut self) -> Vec<u8> {
            let mut result = Vec::new();
            while self.fdc.read_status() & MAIN_BUSY != 0
                && self.fdc.read_status() & MAIN_DATA_READ != 0
            {
                result.push(self.read());
                assert!(result.len() <= 7);
            }
            result
        }

        /// MFM-formats track 0 with `sectors` sectors of 512 bytes.
        fn format_track(&mut self, sectors: u8) {
            // FORMAT: MF set; N=2, SC, GPL=24, D=filler
            self.command(&[0x4d, 0x00, 2, sectors, 24, 0xe5]);
            self.pump();
            for sector in 1..=sectors {
                for &b in &[0u8, 0, sector, 2] {
                    self.write(b);
                }
                if self.fdc.read_status() & MAIN_BUSY != 0
                    && self.fdc.read_status() & MAIN_DATAREQ == 0
                {
                    self.pump();
                }
            }
            let result = self.result_bytes();
            assert_eq!(result.len(), 7, "format result phase");
            assert_eq!(result[0] & 0xc0, 0, "format terminated abnormally");
        }
    }

    #[test]
    fn specify_sets_timing_without_result_phase() {
        let mut rig = Rig::new();
        rig.command(&[0x03, 0xaf, 0x03]);
        // back in command phase, not busy
        let status = rig.fdc.read_status();
        assert_eq!(status & MAIN_BUSY, 0);
        assert_ne!(status & MAIN_DATAREQ, 0);
        assert_eq!(rig.fdc.stp_rate, 6);
        assert!(rig.fdc.non_dma);
    }

    #[test]
    fn seek_overlaps_and_sense_interrupt_reports_it() {
        let mut rig = Rig::with_ready_drive();
        rig.command(&[0x0f, 0x00, 40]); // SEEK drive 0 to cylinder 40
        // drive 0 seek bit set in the main status while stepping
        assert_ne!(rig.fdc.read_status() & 0x01, 0);
        // BUSY is clear so other commands could be issued
        assert_eq!(rig.fdc.read_status() & MAIN_BUSY, 0);

        let mut guard = 0;
        while rig.fdc.intrq != UpdIntrq::Seek {
            rig.tick();
            guard += 1;
            assert!(guard < 200, "seek never completed");
        }
        assert_eq!(rig.fdc.read_status() & 0x01, 0);
        assert_eq!(rig.fdc.drive(0).current_cylinder(), 40);

        rig.command(&[0x08]); // SENSE INTERRUPT STATUS
        let st0 = rig.read();
        let pcn = rig.read();
        assert_eq!(st0, 0x20); // seek end, normal termination, drive 0
        assert_eq!(pcn, 40);
        assert_eq!(rig.fdc.intrq, UpdIntrq::None);
    }

    #[test]
    fn recalibrate_returns_to_track_zero() {
        let mut rig = Rig::with_ready_drive();
        rig.command(&[0x0f, 0x00, 7]);
        let mut guard = 0;
        while rig.fdc.intrq != UpdIntrq::Seek {
            rig.tick();
            guard += 1;
            assert!(guard < 100);
        }
        rig.command(&[0x08]);
        rig.read();
        rig.read();

        rig.command(&[0x07, 0x00]); // RECALIBRATE
        let mut guard = 0;
        while rig.fdc.intrq != UpdIntrq::Seek {
            rig.tick();
            guard += 1;
            assert!(guard < 100);
        }
        assert!(rig.fdc.drive(0).tr00);
        rig.command(&[0x08]);
        let st0 = rig.read();
        let pcn = rig.read();
        assert_eq!(st0 & ST0_SEEK_END, ST0_SEEK_END);
        assert_eq!(pcn, 0);
    }

    #[test]
    fn sense_interrupt_with_nothing_pending_is_invalid() {
        let mut rig = Rig::new();
        rig.command(&[0x08]);
        let st0 = rig.read();
        assert_eq!(st0, 0x80);
    }

    #[test]
    fn sense_drive_status_reports_the_lines() {
        let mut rig = Rig::with_ready_drive();
        rig.command(&[0x04, 0x00]);
        let st3 = rig.read();
        assert_ne!(st3 & ST3_READY, 0);
        assert_ne!(st3 & ST3_TR00, 0);
        assert_eq!(st3 & ST3_WRPROT, 0);
    }

    #[test]
    fn format_and_read_back() {
        let mut rig = Rig::with_ready_drive();
        rig.format_track(9);

        // READ DATA sector 3: MT off, MF on; C H R N EOT GPL DTL
        rig.command(&[0x46, 0x00, 0, 0, 3, 2, 3, 42, 0xff]);
        rig.pump();
        let mut bytes = Vec::new();
        while rig.fdc.read_status() & MAIN_EXECUTION != 0 {
            if rig.fdc.read_status() & MAIN_DATAREQ != 0 {
                bytes.push(rig.read());
            } else {
                rig.tick();
            }
            assert!(bytes.len() <= 512);
        }
        assert_eq!(bytes.len(), 512);
        assert!(bytes.iter().all(|&b| b == 0xe5));
        let result = rig.result_bytes();
        assert_eq!(result.len(), 7);
        // terminated by end-of-cylinder, not by a data error
        assert_eq!(result[1] & (ST1_CRC_ERROR | ST1_NO_DATA | ST1_MISSING_AM), 0);
        assert_eq!(result[2] & ST2_DATA_ERROR, 0);
        assert_eq!(result[5], 3, "R field in the result");
    }

    #[test]
    fn read_missing_sector_reports_no_data() {
        let mut rig = Rig::with_ready_drive();
        rig.format_track(9);
        rig.command(&[0x46, 0x00, 0, 0, 15, 2, 15, 42, 0xff]);
        rig.pump();
        let result = rig.result_bytes();
        assert_eq!(result.len(), 7);
        assert_ne!(result[0] & ST0_INT_ABNORM, 0);
        assert_ne!(result[1] & ST1_NO_DATA, 0);
    }

    #[test]
    fn read_id_returns_the_next_header() {
        let mut rig = Rig::with_ready_drive();
        rig.format_track(9);
        rig.command(&[0x4a, 0x00]); // READ ID, MFM
        rig.pump();
        let result = rig.result_bytes();
        assert_eq!(result.len(), 7);
        assert_eq!(result[0] & 0xc0, 0);
        assert_eq!(result[3], 0); // C
        assert_eq!(result[6], 2); // N
    }

    #[test]
    fn write_protect_aborts_write_commands() {
        let mut rig = Rig::with_ready_drive();
        rig.fdc.drive_mut(0).set_wrprot(true);
        rig.command(&[0x45, 0x00, 0, 0, 1, 2, 1, 42, 0xff]);
        let result = rig.result_bytes();
        assert_eq!(result.len(), 7);
        assert_ne!(result[0] & ST0_INT_ABNORM, 0);
        assert_ne!(result[1] & ST1_NOT_WRITEABLE, 0);
    }

    #[test]
    fn invalid_command_returns_st0_80() {
        let mut rig = Rig::new();
        rig.command(&[0x1f]);
        let st0 = rig.read();
        assert_eq!(st0, 0x80);
    }

    #[test]
    fn version_distinguishes_the_b_part() {
        let mut rig = Rig::new();
        rig.command(&[0x10]);
        assert_eq!(rig.read(), 0x80);
    }
}
