/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! ULA memory and I/O contention tables.
//!
//! Two tables of per-T-state delays are generated per machine: one applied
//! to MREQ cycles, one to non-MREQ cycles (opcode-prefix extensions and
//! index displacements). Both are indexed directly by the frame T-state
//! counter, which the RZX sentinel keeps below [ULA_CONTENTION_SIZE].
use crate::clock::FTs;

/// The length of both contention tables.
///
/// Comfortably above the longest supported frame (Pentagon, 71680 T-states)
/// so a frame that overruns while waiting for its recorded end still indexes
/// inside the table.
pub const ULA_CONTENTION_SIZE: usize = 80000;

/// The number of video lines the ULA fetches pixel data for.
pub const SCREEN_LINES: u32 = 192;

/// The per-line T-state window during which the ULA fetches pixel data.
pub const SCREEN_LINE_WINDOW: FTs = 128;

/// The shape of one machine's contention: where the ULA's first pixel fetch
/// of the frame lands and the eight-T-state delay pattern it repeats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContentionParams {
    /// T-state of the first contended cycle with early timings.
    /// Late timings shift the whole pattern one T-state later.
    pub base: FTs,
    /// Delay pattern repeated every 8 T-states across the fetch window.
    pub pattern: [u8; 8],
    /// T-states per video line.
    pub tstates_per_line: FTs,
}

/// The per-machine delay tables consulted on every memory and I/O cycle.
#[derive(Clone)]
pub struct ContentionTables {
    mreq: Box<[u8]>,
    no_mreq: Box<[u8]>,
}

impl ContentionTables {
    /// Builds the tables for a contended machine, or all-zero tables when
    /// `params` is `None` (Pentagon, Scorpion).
    pub fn build(params: Option<ContentionParams>, late_timings: bool) -> Self {
        let mut delays = vec![0u8; ULA_CONTENTION_SIZE];
        if let Some(params) = params {
            let base = params.base + if late_timings { 1 } else { 0 };
            for line in 0..SCREEN_LINES {
                let line_start = base + line * params.tstates_per_line;
                for x in 0..SCREEN_LINE_WINDOW {
                    let ts = (line_start + x) as usize;
                    if ts < ULA_CONTENTION_SIZE {
                        delays[ts] = params.pattern[(x & 7) as usize];
                    }
                }
            }
        }
        let mreq = delays.into_boxed_slice();
        let no_mreq = mreq.clone();
        ContentionTables { mreq, no_mreq }
    }

    /// The extra delay for an MREQ cycle issued at `tstates`.
    #[inline(always)]
    pub fn mreq(&self, tstates: FTs) -> FTs {
        self.mreq[tstates as usize] as FTs
    }

    /// The extra delay for a non-MREQ cycle issued at `tstates`.
    #[inline(always)]
    pub fn no_mreq(&self, tstates: FTs) -> FTs {
        self.no_mreq[tstates as usize] as FTs
    }

    /// The ULA strobe phase of an I/O cycle: one T-state, contended when the
    /// port address looks like contended memory to the ULA.
    pub fn contend_port_early(&self, mut tstates: FTs, port: u16) -> FTs {
        if port_contended(port) {
            tstates += self.no_mreq(tstates);
        }
        tstates + 1
    }

    /// The remainder of an I/O cycle after the strobe: three T-states
    /// shaped by whether the ULA decodes the port (A0 low) and whether the
    /// address is in the contended range. Together with
    /// [contend_port_early][ContentionTables::contend_port_early] this is
    /// the whole four-T-state cycle: C:1 C:3, C:1 C:1 C:1 C:1, N:1 C:3 or
    /// N:4.
    pub fn contend_port_late(&self, mut tstates: FTs, port: u16) -> FTs {
        if port & 0x0001 == 0 {
            tstates += self.no_mreq(tstates);
            tstates += 3;
        } else if port_contended(port) {
            for _ in 0..3 {
                tstates += self.no_mreq(tstates);
                tstates += 1;
            }
        } else {
            tstates += 3;
        }
        tstates
    }
}

/// Whether the ULA sees the port address as a contended-memory address.
#[inline(always)]
pub fn port_contended(port: u16) -> bool {
    port & 0xc000 == 0x4000
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS_48: ContentionParams = ContentionParams {
        base: 14335,
        pattern: [6, 5, 4, 3, 2, 1, 0, 0],
        tstates_per_line: 224,
    };
    const PARAMS_128: ContentionParams = ContentionParams {
        base: 14361,
        pattern: [6, 5, 4, 3, 2, 1, 0, 0],
        tstates_per_line: 228,
    };
    const PARAMS_PLUS3: ContentionParams = ContentionParams {
        base: 14361,
        pattern: [1, 0, 7, 6, 5, 4, 3, 2],
        tstates_per_line: 228,
    };

    fn checksum(tables: &ContentionTables) -> u32 {
        (0..ULA_CONTENTION_SIZE as FTs)
            .fold(0u32, |sum, i| sum.wrapping_add(tables.mreq(i).wrapping_mul(i + 1)))
    }

    #[test]
    fn contention_checksum_48() {
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_48), false)), 2308862976);
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_48), true)), 2308927488);
    }

    #[test]
    fn contention_checksum_128() {
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_128), false)), 2335183872);
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_128), true)), 2335248384);
    }

    #[test]
    fn contention_checksum_plus3() {
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_PLUS3), false)), 3113754624);
        assert_eq!(checksum(&ContentionTables::build(Some(PARAMS_PLUS3), true)), 3113840640);
    }

    #[test]
    fn uncontended_machines_have_empty_tables() {
        assert_eq!(checksum(&ContentionTables::build(None, false)), 0);
        assert_eq!(checksum(&ContentionTables::build(None, true)), 0);
    }

    #[test]
    fn first_contended_tstate_48_early() {
        let tables = ContentionTables::build(Some(PARAMS_48), false);
        assert_eq!(tables.mreq(14334), 0);
        assert_eq!(tables.mreq(14335), 6);
        assert_eq!(tables.mreq(14336), 5);
        assert_eq!(tables.mreq(14341), 0);
        // the fetch window is 128 T-states of a 224 T-state line
        assert_eq!(tables.mreq(14335 + 127), 0);
        assert_eq!(tables.mreq(14335 + 128), 0);
        assert_eq!(tables.mreq(14335 + 224), 6);
    }

    #[test]
    fn io_cycle_uncontended_costs_four() {
        let tables = ContentionTables::build(Some(PARAMS_48), false);
        // no delays outside the screen area: 1 + 3, whether or not the
        // ULA decodes the port
        let ts = tables.contend_port_early(1000, 0x80fe);
        let ts = tables.contend_port_late(ts, 0x80fe);
        assert_eq!(ts, 1004);
        let ts = tables.contend_port_early(1000, 0x8001);
        let ts = tables.contend_port_late(ts, 0x8001);
        assert_eq!(ts, 1004);
    }

    #[test]
    fn io_cycle_in_the_fetch_window_adds_the_table_delays() {
        let tables = ContentionTables::build(Some(PARAMS_48), false);
        // a ULA port hit 8 T-states into the fetch window: the strobe is
        // uncontended, the late phase lands on a 6-delay slot
        let ts = tables.contend_port_early(14342, 0x00fe);
        assert_eq!(ts, 14343);
        let ts = tables.contend_port_late(ts, 0x00fe);
        assert_eq!(ts, 14343 + 6 + 3);
    }
}
