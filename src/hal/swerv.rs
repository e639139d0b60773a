//! Bare-metal backend for SweRV cores.

use core::arch::asm;

use memory_addr::PhysAddr;
use riscv::register::mhartid;

use super::{Csr, HartId, Mmio, Platform};
use crate::consts::*;
use crate::error::{ErrorCode, ErrorReport, fatal};

/// The hart executing the code. Zero sized: every access goes straight to hardware.
#[derive(Clone, Copy, Debug, Default)]
pub struct Swerv;

/// CSR numbers are immediates of the CSR instructions, so every supported CSR gets
/// its own match arm with `$n` bound as a constant.
macro_rules! with_csr {
    ($csr:expr, $n:ident => $body:block) => {
        match $csr {
            CSR_MSTATUS => {
                const $n: u16 = CSR_MSTATUS;
                $body
            }
            CSR_MEIVT => {
                const $n: u16 = CSR_MEIVT;
                $body
            }
            CSR_MEIPT => {
                const $n: u16 = CSR_MEIPT;
                $body
            }
            CSR_MEICPCT => {
                const $n: u16 = CSR_MEICPCT;
                $body
            }
            CSR_MEICIDPL => {
                const $n: u16 = CSR_MEICIDPL;
                $body
            }
            CSR_MEICURPL => {
                const $n: u16 = CSR_MEICURPL;
                $body
            }
            CSR_MEIHAP => {
                const $n: u16 = CSR_MEIHAP;
                $body
            }
            CSR_MITCNT0 => {
                const $n: u16 = CSR_MITCNT0;
                $body
            }
            CSR_MITBND0 => {
                const $n: u16 = CSR_MITBND0;
                $body
            }
            CSR_MITCTL0 => {
                const $n: u16 = CSR_MITCTL0;
                $body
            }
            CSR_MITCNT1 => {
                const $n: u16 = CSR_MITCNT1;
                $body
            }
            CSR_MITBND1 => {
                const $n: u16 = CSR_MITBND1;
                $body
            }
            CSR_MITCTL1 => {
                const $n: u16 = CSR_MITCTL1;
                $body
            }
            other => unknown_csr(other),
        }
    };
}

#[cold]
fn unknown_csr(csr: u16) -> ! {
    fatal(&ErrorReport::new(ErrorCode::UnknownCsr, csr as usize, file!(), line!()))
}

impl Csr for Swerv {
    fn read_csr(&self, csr: u16) -> usize {
        if csr == CSR_MHARTID {
            return mhartid::read();
        }
        with_csr!(csr, N => {
            let value: usize;
            unsafe { asm!("csrr {0}, {csr}", out(reg) value, csr = const N) };
            value
        })
    }

    fn write_csr(&self, csr: u16, value: usize) {
        with_csr!(csr, N => {
            unsafe { asm!("csrw {csr}, {0}", in(reg) value, csr = const N) };
        })
    }

    fn set_csr(&self, csr: u16, mask: usize) {
        with_csr!(csr, N => {
            unsafe { asm!("csrs {csr}, {0}", in(reg) mask, csr = const N) };
        })
    }

    fn clear_csr(&self, csr: u16, mask: usize) {
        with_csr!(csr, N => {
            unsafe { asm!("csrc {csr}, {0}", in(reg) mask, csr = const N) };
        })
    }

    fn read_and_clear_csr(&self, csr: u16, mask: usize) -> usize {
        with_csr!(csr, N => {
            let old: usize;
            unsafe { asm!("csrrc {0}, {csr}, {1}", out(reg) old, in(reg) mask, csr = const N) };
            old
        })
    }
}

impl Mmio for Swerv {
    fn read32(&self, addr: PhysAddr) -> u32 {
        unsafe { (addr.as_usize() as *const u32).read_volatile() }
    }

    fn write32(&self, addr: PhysAddr, value: u32) {
        unsafe { (addr.as_usize() as *mut u32).write_volatile(value) }
    }

    fn read64(&self, addr: PhysAddr) -> u64 {
        unsafe { (addr.as_usize() as *const u64).read_volatile() }
    }

    fn write64(&self, addr: PhysAddr, value: u64) {
        unsafe { (addr.as_usize() as *mut u64).write_volatile(value) }
    }
}

impl Platform for Swerv {
    fn hart_id(&self) -> HartId {
        HartId::new(mhartid::read())
    }
}
