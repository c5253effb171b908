//! System bus: routes word addresses to the owning memory region.
//!
//! The bus exclusively owns its regions for the lifetime of the CPU.
//! Routing is a linear scan over the mapped windows; an address no region
//! claims raises [`Exception::NoRegion`]. Regions never overlap: overlap
//! is rejected when a region is mapped, not discovered at access time.

use thiserror::Error;

use crate::emulator::exception::Exception;
use crate::emulator::memory::Region;

/// Error raised while building the bus's address map.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The new region's window intersects an already-mapped window.
    #[error("region [{lo:#010X}, {hi:#010X}] overlaps mapped region [{other_lo:#010X}, {other_hi:#010X}]")]
    Overlap {
        lo: u32,
        hi: u32,
        other_lo: u32,
        other_hi: u32,
    },
}

/// The address-routing layer between the CPU and its memory regions.
#[derive(Debug, Default)]
pub struct SystemBus {
    regions: Vec<Region>,
}

impl SystemBus {
    /// Create a bus with no mapped regions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a region, refusing windows that overlap an existing region.
    pub fn map(&mut self, region: Region) -> Result<(), MapError> {
        for existing in &self.regions {
            if region.lo() <= existing.hi() && existing.lo() <= region.hi() {
                return Err(MapError::Overlap {
                    lo: region.lo(),
                    hi: region.hi(),
                    other_lo: existing.lo(),
                    other_hi: existing.hi(),
                });
            }
        }
        log::debug!(
            "mapped {} region [{:#010X}, {:#010X}]",
            if region.is_writable() { "RAM" } else { "ROM" },
            region.lo(),
            region.hi()
        );
        self.regions.push(region);
        Ok(())
    }

    fn region_at(&self, addr: u32) -> Result<&Region, Exception> {
        self.regions
            .iter()
            .find(|r| r.in_bounds(addr))
            .ok_or(Exception::NoRegion { addr })
    }

    fn region_at_mut(&mut self, addr: u32) -> Result<&mut Region, Exception> {
        self.regions
            .iter_mut()
            .find(|r| r.in_bounds(addr))
            .ok_or(Exception::NoRegion { addr })
    }

    /// Read `n` bytes (1..=4) starting at `addr`, most significant first.
    pub fn read(&self, addr: u32, n: u8) -> Result<u32, Exception> {
        self.region_at(addr)?.read(addr, n)
    }

    /// Write the low `n` bytes (1..=4) of `value` starting at `addr`.
    pub fn write(&mut self, addr: u32, value: u32, n: u8) -> Result<(), Exception> {
        self.region_at_mut(addr)?.write(addr, value, n)
    }

    /// Read one byte.
    #[inline]
    pub fn read_byte(&self, addr: u32) -> Result<u8, Exception> {
        self.read(addr, 1).map(|v| v as u8)
    }

    /// Read a halfword (2 bytes).
    #[inline]
    pub fn read_half(&self, addr: u32) -> Result<u16, Exception> {
        self.read(addr, 2).map(|v| v as u16)
    }

    /// Read a word (4 bytes).
    #[inline]
    pub fn read_word(&self, addr: u32) -> Result<u32, Exception> {
        self.read(addr, 4)
    }

    /// Write one byte.
    #[inline]
    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Exception> {
        self.write(addr, value as u32, 1)
    }

    /// Write a halfword (2 bytes).
    #[inline]
    pub fn write_half(&mut self, addr: u32, value: u16) -> Result<(), Exception> {
        self.write(addr, value as u32, 2)
    }

    /// Write a word (4 bytes).
    #[inline]
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), Exception> {
        self.write(addr, value, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::memory::{Ram, Rom};

    fn bus_with_ram() -> SystemBus {
        let mut bus = SystemBus::new();
        bus.map(Region::Ram(Ram::new(0x0000, 0x0FFF))).unwrap();
        bus
    }

    #[test]
    fn test_routes_to_owning_region() {
        let mut bus = SystemBus::new();
        bus.map(Region::Ram(Ram::new(0x0000, 0x00FF))).unwrap();
        bus.map(Region::Rom(Rom::with_image(0x1000, &[0xCA, 0xFE])))
            .unwrap();

        bus.write_word(0x10, 0x12345678).unwrap();
        assert_eq!(bus.read_word(0x10).unwrap(), 0x12345678);
        assert_eq!(bus.read_half(0x1000).unwrap(), 0xCAFE);
    }

    #[test]
    fn test_unclaimed_address_faults() {
        let bus = bus_with_ram();

        assert_eq!(
            bus.read_byte(0x8000),
            Err(Exception::NoRegion { addr: 0x8000 })
        );
    }

    #[test]
    fn test_overlap_rejected() {
        let mut bus = bus_with_ram();

        let err = bus.map(Region::Ram(Ram::new(0x0800, 0x1800))).unwrap_err();
        assert!(matches!(err, MapError::Overlap { lo: 0x0800, .. }));

        // Adjacent, non-overlapping windows are fine.
        bus.map(Region::Ram(Ram::new(0x1000, 0x1FFF))).unwrap();
    }

    #[test]
    fn test_rom_write_via_bus() {
        let mut bus = SystemBus::new();
        bus.map(Region::Rom(Rom::with_image(0, &[0; 16]))).unwrap();

        assert!(matches!(
            bus.write_byte(4, 0xFF),
            Err(Exception::AccessDenied { addr: 4, .. })
        ));
    }

    #[test]
    fn test_width_helpers() {
        let mut bus = bus_with_ram();

        bus.write_byte(0, 0xAB).unwrap();
        bus.write_half(2, 0xCDEF).unwrap();
        assert_eq!(bus.read_byte(0).unwrap(), 0xAB);
        assert_eq!(bus.read_half(2).unwrap(), 0xCDEF);
        // 0xAB 0x00 0xCD 0xEF assembled most-significant-first.
        assert_eq!(bus.read_word(0).unwrap(), 0xAB00_CDEF);
    }
}
