use memory_addr::PhysAddr;

use crate::consts::{MAX_HARTS, PIC_MAX_SOURCES};
use crate::error::psp_assert;

/// Build-time description of the core: where the PIC and machine timer live, which
/// external sources are wired, and how many harts share the PIC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PspConfig {
    pub pic_base: PhysAddr,
    /// First external source in use (inclusive).
    pub first_source: u32,
    /// Last external source in use (inclusive).
    pub last_source: u32,
    pub num_harts: usize,
    pub mtime: PhysAddr,
    pub mtimecmp: PhysAddr,
}

impl PspConfig {
    /// Nexys A7 board with a two-hart SweRV EH2.
    pub const NEXYS_A7_EH2: Self = Self {
        pic_base: PhysAddr::from_usize(0xF00C_0000),
        first_source: 1,
        last_source: 8,
        num_harts: 2,
        mtime: PhysAddr::from_usize(0x8000_1020),
        mtimecmp: PhysAddr::from_usize(0x8000_1028),
    };

    pub const fn new(pic_base: PhysAddr, first_source: u32, last_source: u32, num_harts: usize) -> Self {
        Self {
            pic_base,
            first_source,
            last_source,
            num_harts,
            ..Self::NEXYS_A7_EH2
        }
    }

    pub const fn with_machine_timer(mut self, mtime: PhysAddr, mtimecmp: PhysAddr) -> Self {
        self.mtime = mtime;
        self.mtimecmp = mtimecmp;
        self
    }

    /// Halts on an inconsistent configuration.
    pub fn validate(&self) {
        psp_assert!(self.pic_base.as_usize() != 0, InvalidConfig, self.pic_base.as_usize());
        psp_assert!(self.first_source <= self.last_source, InvalidConfig, self.first_source);
        psp_assert!(
            (self.last_source as usize) < PIC_MAX_SOURCES,
            InvalidConfig,
            self.last_source
        );
        psp_assert!(
            self.num_harts > 0 && self.num_harts <= MAX_HARTS,
            InvalidConfig,
            self.num_harts
        );
        psp_assert!(
            self.mtime.as_usize() != 0 && self.mtimecmp.as_usize() != 0,
            InvalidConfig,
            self.mtime.as_usize()
        );
    }

    pub const fn source_in_range(&self, source: u32) -> bool {
        self.first_source <= source && source <= self.last_source
    }
}

impl Default for PspConfig {
    fn default() -> Self {
        Self::NEXYS_A7_EH2
    }
}
