/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    FERROSPEC is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    FERROSPEC is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! FERROSPEC, a cycle-accurate emulation core for the ZX Spectrum family.
//!
//! The crate assembles the pieces from [ferrospec_core],
//! [ferrospec_peripherals] and [ferrospec_formats] into complete machines:
//! a Z80 against real contention tables, a discrete-event scheduler that
//! also drives the floppy subsystem, tape flash-loading, RZX input
//! recording/replay, and breakpoint hooks for a debugger front end.
//!
//! ```no_run
//! use ferrospec::machine::Machine;
//! use ferrospec::MachineId;
//!
//! let mut machine = Machine::new(MachineId::Spectrum48);
//! machine.load_rom(0, &std::fs::read("48.rom").unwrap()).unwrap();
//! loop {
//!     machine.run_frame();
//!     // render machine.board.memory / poll input here
//! }
//! ```
pub mod beta;
pub mod debugger;
pub mod machine;
pub mod machines;
pub mod plus3;
pub mod profile;
pub mod rzx;
pub mod snapshot;
pub mod tape;
pub mod ula;

pub use ferrospec_core as core;
pub use ferrospec_formats as formats;
pub use ferrospec_peripherals as peripherals;

pub use ferrospec_formats::snapshot::MachineId;
pub use machine::{Board, FrameResult, Machine, Settings};
