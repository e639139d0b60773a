//! Hardware access seam.
//!
//! Everything above this module is plain logic over [`Csr`] and [`Mmio`]. On target the
//! [`swerv::Swerv`] backend issues the real instructions; on the host [`crate::sim`]
//! provides a simulated core.

use memory_addr::PhysAddr;

use crate::consts::MAX_HARTS;
use crate::error::psp_assert;

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        pub mod swerv;
        pub use swerv::Swerv;
    }
}

/// Index of a hardware thread, always below [`MAX_HARTS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HartId(usize);

impl HartId {
    pub fn new(id: usize) -> Self {
        psp_assert!(id < MAX_HARTS, InvalidHartId, id);
        Self(id)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Control and status registers of the calling hart, addressed by CSR number.
pub trait Csr {
    fn read_csr(&self, csr: u16) -> usize;

    fn write_csr(&self, csr: u16, value: usize);

    /// `csrs`: sets the bits of `mask`.
    fn set_csr(&self, csr: u16, mask: usize);

    /// `csrc`: clears the bits of `mask`.
    fn clear_csr(&self, csr: u16, mask: usize);

    /// `csrrc`: clears the bits of `mask` and returns the old value in one access.
    fn read_and_clear_csr(&self, csr: u16, mask: usize) -> usize;
}

/// Volatile memory-mapped register access.
pub trait Mmio {
    fn read32(&self, addr: PhysAddr) -> u32;

    fn write32(&self, addr: PhysAddr, value: u32);

    fn read64(&self, addr: PhysAddr) -> u64;

    fn write64(&self, addr: PhysAddr, value: u64);

    /// Read-modify-write OR of a 32-bit register.
    fn set32(&self, addr: PhysAddr, bits: u32) {
        let value = self.read32(addr);
        self.write32(addr, value | bits);
    }
}

/// One hart's view of the machine.
pub trait Platform: Csr + Mmio {
    fn hart_id(&self) -> HartId;
}

impl<T: Csr + ?Sized> Csr for &T {
    fn read_csr(&self, csr: u16) -> usize {
        (**self).read_csr(csr)
    }

    fn write_csr(&self, csr: u16, value: usize) {
        (**self).write_csr(csr, value)
    }

    fn set_csr(&self, csr: u16, mask: usize) {
        (**self).set_csr(csr, mask)
    }

    fn clear_csr(&self, csr: u16, mask: usize) {
        (**self).clear_csr(csr, mask)
    }

    fn read_and_clear_csr(&self, csr: u16, mask: usize) -> usize {
        (**self).read_and_clear_csr(csr, mask)
    }
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read32(&self, addr: PhysAddr) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: PhysAddr, value: u32) {
        (**self).write32(addr, value)
    }

    fn read64(&self, addr: PhysAddr) -> u64 {
        (**self).read64(addr)
    }

    fn write64(&self, addr: PhysAddr, value: u64) {
        (**self).write64(addr, value)
    }
}

impl<T: Platform + ?Sized> Platform for &T {
    fn hart_id(&self) -> HartId {
        (**self).hart_id()
    }
}
