/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The supported machine models: timing tables, contention shapes,
//! memory complements and paging behaviour.
use bitflags::bitflags;

use ferrospec_core::clock::FTs;
use ferrospec_core::contention::ContentionParams;
use ferrospec_formats::snapshot::MachineId;

mod pentagon;
mod scorpion;
mod spec128;
mod spec48;
mod specplus3;
mod timex;

pub(crate) use pentagon::*;
pub(crate) use scorpion::*;
pub(crate) use spec128::*;
pub(crate) use spec48::*;
pub(crate) use specplus3::*;
pub(crate) use timex::*;

bitflags! {
    /// What the hardware of a model can do; the paging, trap and port
    /// logic all key on these.
    pub struct Capabilities: u32 {
        /// 128-style memory paging through 0x7FFD.
        const MEMORY_128      = 0x0001;
        /// +2A/+3 special paging through 0x1FFD.
        const MEMORY_PLUS3    = 0x0002;
        /// Scorpion-style 0x1FFD paging.
        const MEMORY_SCORPION = 0x0004;
        /// Pentagon 512 extended RAM bits in 0x7FFD.
        const MEMORY_PENT512  = 0x0008;
        /// Pentagon 1024 paging through 0xEFF7.
        const MEMORY_PENT1024 = 0x0010;
        /// Timex 0x00F4 / 0x00FF horizontal paging.
        const MEMORY_TIMEX    = 0x0020;
        /// Spectrum SE memory arrangement.
        const MEMORY_SE       = 0x0040;
        /// M1 cycles stretched to even T-states.
        const EVEN_M1         = 0x0080;
        /// A Beta 128 interface (TR-DOS) is built in.
        const TRDOS           = 0x0100;
        /// A µPD765 and drives are built in (+3).
        const UPD_FDC         = 0x0200;
    }
}

/// Frame and clock timings of one model.
#[derive(Clone, Copy, Debug)]
pub struct Timings {
    /// Z80 clocks per second.
    pub processor_speed: u32,
    pub tstates_per_frame: FTs,
    pub tstates_per_line: FTs,
    /// How long the ULA holds the INT line at the frame start.
    pub interrupt_length: FTs,
}

/// Everything static about one machine model.
#[derive(Clone, Copy, Debug)]
pub struct MachineSpec {
    pub id: MachineId,
    pub name: &'static str,
    pub capabilities: Capabilities,
    pub timings: Timings,
    pub contention: Option<ContentionParams>,
    /// Whether an unattached port read sees the ULA's video fetches.
    pub floating_bus: bool,
    pub rom_banks: usize,
    pub ram_banks: usize,
}

impl MachineSpec {
    pub fn for_id(id: MachineId) -> MachineSpec {
        match id {
            MachineId::Spectrum16 => spec48::SPEC16,
            MachineId::Spectrum48 => spec48::SPEC48,
            MachineId::Spectrum48Ntsc => spec48::SPEC48_NTSC,
            MachineId::Spectrum128 => spec128::SPEC128,
            MachineId::SpectrumPlus2 => spec128::SPECPLUS2,
            MachineId::SpectrumPlus2A => specplus3::SPECPLUS2A,
            MachineId::SpectrumPlus3 => specplus3::SPECPLUS3,
            MachineId::Pentagon => pentagon::PENTAGON,
            MachineId::Pentagon512 => pentagon::PENTAGON512,
            MachineId::Pentagon1024 => pentagon::PENTAGON1024,
            MachineId::Scorpion => scorpion::SCORPION,
            MachineId::Tc2048 => timex::TC2048,
            MachineId::Tc2068 => timex::TC2068,
            MachineId::Ts2068 => timex::TS2068,
            MachineId::SpectrumSe => timex::SPECTRUM_SE,
        }
    }

    /// Which RAM banks the ULA contends on this model.
    pub fn bank_contended(&self, bank: u8) -> bool {
        if self.contention.is_none() {
            return false;
        }
        if self.capabilities.contains(Capabilities::MEMORY_PLUS3) {
            // the +2A/+3 gate array contends banks 4-7
            bank >= 4
        } else if self.capabilities.intersects(Capabilities::MEMORY_128) {
            // odd banks hang off the ULA side of the bus
            bank & 1 == 1
        } else {
            bank == 5
        }
    }
}
