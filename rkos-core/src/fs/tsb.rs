use core::fmt;

use crate::constants::disk::{BLOCKS, SECTORS, TRACKS};

/// A (track, sector, block) disk address. The derived ordering is the
/// track-major total order the free-space scans rely on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tsb {
    pub track: u8,
    pub sector: u8,
    pub block: u8,
}

impl Tsb {
    pub const fn new(track: u8, sector: u8, block: u8) -> Tsb {
        Tsb {
            track,
            sector,
            block,
        }
    }

    /// The first address on disk; format places the directory sentinel
    /// here
    pub const fn first() -> Tsb {
        Tsb::new(0, 0, 0)
    }

    /// The first content-region address (track 0 is the directory)
    pub const fn first_content() -> Tsb {
        Tsb::new(1, 0, 0)
    }

    pub fn is_directory(&self) -> bool {
        self.track == 0
    }

    /// Walks to the next valid address, signalling exhaustion when the
    /// increment would run off the last track
    pub fn next(self) -> Option<Tsb> {
        let mut t = self;
        t.block += 1;
        if t.block == BLOCKS {
            t.block = 0;
            t.sector += 1;
            if t.sector == SECTORS {
                t.sector = 0;
                t.track += 1;
                if t.track == TRACKS {
                    return None;
                }
            }
        }
        Some(t)
    }

    /// Every valid address in order, starting from this one
    pub fn walk(self) -> impl Iterator<Item = Tsb> {
        let mut cursor = Some(self);
        core::iter::from_fn(move || {
            let current = cursor?;
            cursor = current.next();
            Some(current)
        })
    }
}

impl fmt::Display for Tsb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.track, self.sector, self.block)
    }
}

#[cfg(test)]
mod tsb_tests {
    use super::*;

    #[test]
    fn test_next_carries_through_sector_and_track() {
        assert_eq!(Tsb::new(0, 0, 0).next(), Some(Tsb::new(0, 0, 1)));
        assert_eq!(Tsb::new(0, 0, 7).next(), Some(Tsb::new(0, 1, 0)));
        assert_eq!(Tsb::new(0, 7, 7).next(), Some(Tsb::new(1, 0, 0)));
    }

    #[test]
    fn test_next_signals_exhaustion() {
        assert_eq!(Tsb::new(3, 7, 7).next(), None);
    }

    #[test]
    fn test_walk_covers_every_address_once() {
        let all: Vec<Tsb> = Tsb::first().walk().collect();
        assert_eq!(all.len(), 4 * 8 * 8);
        assert_eq!(all[0], Tsb::first());
        assert_eq!(*all.last().unwrap(), Tsb::new(3, 7, 7));
    }

    #[test]
    fn test_ordering_is_track_major() {
        assert!(Tsb::new(0, 7, 7) < Tsb::new(1, 0, 0));
        assert!(Tsb::new(1, 0, 0) < Tsb::new(1, 0, 1));
    }
}
