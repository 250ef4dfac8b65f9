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
//! File formats and typed containers consumed by the FERROSPEC core:
//! tape blocks, the RZX input-recording container, and machine snapshots.
pub mod rzx;
pub mod snapshot;
pub mod tape;

use std::io::{self, Read};

/// Reads a little-endian u16.
pub(crate) fn read_u16<R: Read>(rd: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    rd.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Reads a little-endian u32.
pub(crate) fn read_u32<R: Read>(rd: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    rd.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u8<R: Read>(rd: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    rd.read_exact(&mut buf)?;
    Ok(buf[0])
}
