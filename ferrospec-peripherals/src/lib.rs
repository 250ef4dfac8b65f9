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
//! Emulators of the Spectrum's disk subsystem: the floppy drive model and
//! the two floppy controller families built on top of it.
pub mod crc;
pub mod fdd;
pub mod upd_fdc;
pub mod wd_fdc;

use ferrospec_core::clock::{EventScheduler, EventType, FTs};

/// What the disk subsystem borrows from the machine to time itself:
/// the event queue, the current T-state counter, and the clock rate that
/// converts milliseconds of drive mechanics into T-states.
pub struct DiskClock<'a> {
    pub events: &'a mut EventScheduler,
    pub tstates: FTs,
    /// Z80 clocks per second; 3.5 MHz on everything we emulate.
    pub processor_speed: u32,
}

impl<'a> DiskClock<'a> {
    pub fn new(events: &'a mut EventScheduler, tstates: FTs, processor_speed: u32) -> Self {
        DiskClock { events, tstates, processor_speed }
    }

    /// Schedules `etype` after the given number of milliseconds.
    pub fn add_ms(&mut self, ms: u32, etype: EventType, user_data: u32) {
        let delay = (ms as u64 * self.processor_speed as u64 / 1000) as FTs;
        self.events.add_with_data(self.tstates + delay, etype, user_data);
    }

    /// Schedules `etype` after the given number of microseconds.
    pub fn add_us(&mut self, us: u32, etype: EventType, user_data: u32) {
        let delay = (us as u64 * self.processor_speed as u64 / 1_000_000) as FTs;
        self.events.add_with_data(self.tstates + delay, etype, user_data);
    }
}
