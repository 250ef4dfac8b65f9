/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Machine snapshots.
//!
//! A [Snapshot] is the typed interchange record between the core and
//! anything that persists machine state: RZX recordings embed them, and
//! the rollback machinery restores from them. The processor fields mirror
//! the core's register file exactly, R7 split included.
use core::fmt;
use std::io::{self, Read, Write};

use ferrospec_core::clock::FTs;

use crate::{read_u16, read_u32, read_u8};

const MAGIC: &[u8; 4] = b"FSNP";
const VERSION: u8 = 1;

/// The machine model a snapshot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineId {
    Spectrum16 = 0,
    Spectrum48 = 1,
    Spectrum48Ntsc = 2,
    Spectrum128 = 3,
    SpectrumPlus2 = 4,
    SpectrumPlus2A = 5,
    SpectrumPlus3 = 6,
    Pentagon = 7,
    Pentagon512 = 8,
    Pentagon1024 = 9,
    Scorpion = 10,
    Tc2048 = 11,
    Tc2068 = 12,
    Ts2068 = 13,
    SpectrumSe = 14,
}

impl MachineId {
    fn from_u8(value: u8) -> Option<Self> {
        use MachineId::*;
        Some(match value {
            0 => Spectrum16,
            1 => Spectrum48,
            2 => Spectrum48Ntsc,
            3 => Spectrum128,
            4 => SpectrumPlus2,
            5 => SpectrumPlus2A,
            6 => SpectrumPlus3,
            7 => Pentagon,
            8 => Pentagon512,
            9 => Pentagon1024,
            10 => Scorpion,
            11 => Tc2048,
            12 => Tc2068,
            13 => Ts2068,
            14 => SpectrumSe,
            _ => return None,
        })
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub enum SnapshotError {
    BadMagic,
    UnsupportedVersion(u8),
    UnknownMachine(u8),
    Io(io::Error),
}

impl std::error::Error for SnapshotError {}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::BadMagic => write!(f, "not a FERROSPEC snapshot"),
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "unsupported snapshot version {}", v)
            }
            SnapshotError::UnknownMachine(m) => write!(f, "unknown machine id {}", m),
            SnapshotError::Io(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

pub type Result<T> = core::result::Result<T, SnapshotError>;

/// A complete machine state.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub machine: MachineId,

    pub af: u16, pub bc: u16, pub de: u16, pub hl: u16,
    pub af_alt: u16, pub bc_alt: u16, pub de_alt: u16, pub hl_alt: u16,
    pub ix: u16, pub iy: u16,
    pub sp: u16, pub pc: u16,
    pub memptr: u16,
    pub i: u8,
    /// The low byte of the R counter.
    pub r: u8,
    /// Bit 7 of R, kept separately.
    pub r7: u8,
    pub iff1: bool, pub iff2: bool,
    pub im: u8,
    pub halted: bool,
    pub q: u8,
    pub interrupts_enabled_at: i32,
    /// T-states into the current frame.
    pub tstates: FTs,

    /// Last values written to the paging ports.
    pub port_7ffd: u8,
    pub port_1ffd: u8,
    pub port_eff7: u8,
    pub port_f4: u8,
    pub port_ff: u8,
    pub border: u8,

    /// RAM banks marked for snapshotting, as (bank number, 16 KiB).
    pub ram_pages: Vec<(u8, Vec<u8>)>,
}

impl Snapshot {
    pub fn new(machine: MachineId) -> Self {
        Snapshot {
            machine,
            af: 0xffff, bc: 0, de: 0, hl: 0,
            af_alt: 0, bc_alt: 0, de_alt: 0, hl_alt: 0,
            ix: 0, iy: 0,
            sp: 0xffff, pc: 0,
            memptr: 0,
            i: 0, r: 0, r7: 0,
            iff1: false, iff2: false,
            im: 0,
            halted: false,
            q: 0,
            interrupts_enabled_at: -1,
            tstates: 0,
            port_7ffd: 0,
            port_1ffd: 0,
            port_eff7: 0,
            port_f4: 0,
            port_ff: 0,
            border: 7,
            ram_pages: Vec::new(),
        }
    }

    pub fn write_to<W: Write>(&self, mut wr: W) -> io::Result<()> {
        wr.write_all(MAGIC)?;
        wr.write_all(&[VERSION, self.machine as u8])?;
        for word in &[
            self.af, self.bc, self.de, self.hl,
            self.af_alt, self.bc_alt, self.de_alt, self.hl_alt,
            self.ix, self.iy, self.sp, self.pc, self.memptr,
        ] {
            wr.write_all(&word.to_le_bytes())?;
        }
        wr.write_all(&[
            self.i, self.r, self.r7,
            self.iff1 as u8, self.iff2 as u8,
            self.im, self.halted as u8, self.q,
        ])?;
        wr.write_all(&self.interrupts_enabled_at.to_le_bytes())?;
        wr.write_all(&self.tstates.to_le_bytes())?;
        wr.write_all(&[
            self.port_7ffd, self.port_1ffd, self.port_eff7,
            self.port_f4, self.port_ff, self.border,
        ])?;
        wr.write_all(&[self.ram_pages.len() as u8])?;
        for (bank, data) in &self.ram_pages {
            wr.write_all(&[*bank])?;
            wr.write_all(data)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(mut rd: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        rd.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_u8(&mut rd)?;
        if version != VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let machine_id = read_u8(&mut rd)?;
        let machine = MachineId::from_u8(machine_id)
            .ok_or(SnapshotError::UnknownMachine(machine_id))?;

        let mut snap = Snapshot::new(machine);
        snap.af = read_u16(&mut rd)?;
        snap.bc = read_u16(&mut rd)?;
        snap.de = read_u16(&mut rd)?;
        snap.hl = read_u16(&mut rd)?;
        snap.af_alt = read_u16(&mut rd)?;
        snap.bc_alt = read_u16(&mut rd)?;
        snap.de_alt = read_u16(&mut rd)?;
        snap.hl_alt = read_u16(&mut rd)?;
        snap.ix = read_u16(&mut rd)?;
        snap.iy = read_u16(&mut rd)?;
        snap.sp = read_u16(&mut rd)?;
        snap.pc = read_u16(&mut rd)?;
        snap.memptr = read_u16(&mut rd)?;
        snap.i = read_u8(&mut rd)?;
        snap.r = read_u8(&mut rd)?;
        snap.r7 = read_u8(&mut rd)?;
        snap.iff1 = read_u8(&mut rd)? != 0;
        snap.iff2 = read_u8(&mut rd)? != 0;
        snap.im = read_u8(&mut rd)?;
        snap.halted = read_u8(&mut rd)? != 0;
        snap.q = read_u8(&mut rd)?;
        snap.interrupts_enabled_at = read_u32(&mut rd)? as i32;
        snap.tstates = read_u32(&mut rd)?;
        snap.port_7ffd = read_u8(&mut rd)?;
        snap.port_1ffd = read_u8(&mut rd)?;
        snap.port_eff7 = read_u8(&mut rd)?;
        snap.port_f4 = read_u8(&mut rd)?;
        snap.port_ff = read_u8(&mut rd)?;
        snap.border = read_u8(&mut rd)?;

        let pages = read_u8(&mut rd)?;
        for _ in 0..pages {
            let bank = read_u8(&mut rd)?;
            let mut data = vec![0u8; 0x4000];
            rd.read_exact(&mut data)?;
            snap.ram_pages.push((bank, data));
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_bit_exact() {
        let mut snap = Snapshot::new(MachineId::Spectrum48);
        snap.af = 0x1234;
        snap.pc = 0x8000;
        snap.r = 0x55;
        snap.r7 = 0x80;
        snap.iff1 = true;
        snap.im = 1;
        snap.interrupts_enabled_at = -1;
        snap.tstates = 14335;
        snap.ram_pages.push((5, vec![0xaa; 0x4000]));
        snap.ram_pages.push((2, vec![0x55; 0x4000]));

        let mut buffer = Vec::new();
        snap.write_to(&mut buffer).unwrap();
        let reread = Snapshot::read_from(&buffer[..]).unwrap();
        assert_eq!(reread, snap);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buffer = b"Z80!....";
        assert!(matches!(
            Snapshot::read_from(&buffer[..]),
            Err(SnapshotError::BadMagic)
        ));
    }
}
