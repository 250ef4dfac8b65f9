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
//! The core components of the FERROSPEC library.
//!
//! Everything the emulated Spectrum shares regardless of model lives here:
//! the frame clock and its discrete-event scheduler, the ULA contention
//! tables, the 8 KiB-paged memory map, the peripheral port decoder with the
//! floating-bus merge, and the Z80 CPU itself.
pub mod bus;
pub mod clock;
pub mod contention;
pub mod memory;
pub mod z80;
