use core::sync::atomic::AtomicU32;

use log::{debug, trace};
use memory_addr::PhysAddr;
use spin::Mutex;

use crate::config::PspConfig;
use crate::consts::*;
use crate::error::psp_assert;
use crate::hal::{HartId, Platform};
use crate::interrupts::LocalInterruptGuard;
use crate::spinlock::SpinLock;
use crate::vectors::VectorTable;

/// How `meipl` values are ranked (`mpiccfg.priord`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PriorityOrder {
    /// 15 is most urgent, 0 masks the source.
    Standard = 0,
    /// 0 is most urgent, 15 masks the source.
    Reversed = 1,
}

impl PriorityOrder {
    pub const fn valid_range(self) -> (u32, u32) {
        match self {
            Self::Standard => (EXT_INT_PRIORITY_1, EXT_INT_PRIORITY_15),
            Self::Reversed => (EXT_INT_PRIORITY_0, EXT_INT_PRIORITY_14),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TriggerType {
    Level = 0,
    Edge = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Polarity {
    ActiveHigh = 0,
    ActiveLow = 1,
}

// Lives in a `static` on hardware, since `meivt` points into it.
pub struct PicState {
    config: PspConfig,
    lock: SpinLock,
    pub(crate) vectors: [Mutex<VectorTable>; MAX_HARTS],
    pub(crate) isr_nesting: [AtomicU32; MAX_HARTS],
}

impl PicState {
    pub const fn new(config: PspConfig) -> Self {
        Self {
            config,
            lock: SpinLock::new(),
            vectors: [const { Mutex::new(VectorTable::new()) }; MAX_HARTS],
            isr_nesting: [const { AtomicU32::new(0) }; MAX_HARTS],
        }
    }

    pub fn config(&self) -> &PspConfig {
        &self.config
    }

    pub fn lock(&self) -> &SpinLock {
        &self.lock
    }
}

pub struct ExternalInterruptController<'a, P: Platform + ?Sized> {
    pub(crate) hw: &'a P,
    pub(crate) state: &'a PicState,
}

impl<'a, P: Platform + ?Sized> ExternalInterruptController<'a, P> {
    pub fn new(hw: &'a P, state: &'a PicState) -> Self {
        Self { hw, state }
    }

    pub fn state(&self) -> &'a PicState {
        self.state
    }

    fn reg(&self, bank: usize, index: u32) -> PhysAddr {
        self.state.config.pic_base + bank + REG32_BYTE_WIDTH * index as usize
    }

    pub(crate) fn check_source(&self, source: u32) {
        psp_assert!(
            self.state.config.source_in_range(source),
            SourceOutOfRange,
            source
        );
    }

    pub fn set_priority_order(&self, order: PriorityOrder) {
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw
            .write32(self.reg(PIC_MPICCFG_OFFSET, 0), order as u32);
        debug!("pic: priority order {:?}", order);
    }

    pub fn priority_order(&self) -> PriorityOrder {
        match self.hw.read32(self.reg(PIC_MPICCFG_OFFSET, 0)) & MPICCFG_PRIORD_MASK {
            0 => PriorityOrder::Standard,
            _ => PriorityOrder::Reversed,
        }
    }

    /// Fatal if `priority` is outside the range of the order in force right now.
    pub fn set_priority(&self, source: u32, priority: u32) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        let (min, max) = self.priority_order().valid_range();
        psp_assert!(
            (min..=max).contains(&priority),
            InvalidPriority,
            priority
        );
        self.hw.write32(self.reg(PIC_MEIPL_OFFSET, source), priority);
        trace!("pic: meipl[{}] <- {}", source, priority);
    }

    /// Sources at or below `level` (in the active order) no longer interrupt this hart.
    pub fn set_threshold(&self, level: u32) {
        psp_assert!(level <= EXT_INT_THRESHOLD_MAX, InvalidThreshold, level);
        let _irq = LocalInterruptGuard::enter(self.hw);
        self.hw.write_csr(CSR_MEIPT, level as usize);
    }

    pub fn set_nesting_threshold(&self, level: u32) {
        psp_assert!(level <= EXT_INT_THRESHOLD_MAX, InvalidThreshold, level);
        let _irq = LocalInterruptGuard::enter(self.hw);
        self.hw.write_csr(CSR_MEICIDPL, level as usize);
        self.hw.write_csr(CSR_MEICURPL, level as usize);
    }

    pub fn enable(&self, source: u32) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw
            .write32(self.reg(PIC_MEIE_OFFSET, source), MEIE_INT_EN_MASK);
        trace!("pic: source {} enabled", source);
    }

    pub fn disable(&self, source: u32) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw.write32(self.reg(PIC_MEIE_OFFSET, source), 0);
        trace!("pic: source {} disabled", source);
    }

    /// ORs the type bit into `meigwctrl[source]`. Does not clear a previously set bit.
    pub fn set_type(&self, source: u32, trigger: TriggerType) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw.set32(
            self.reg(PIC_MEIGWCTRL_OFFSET, source),
            (trigger as u32) << MEIGWCTRL_TYPE_BIT_OFFSET,
        );
    }

    pub fn set_polarity(&self, source: u32, polarity: Polarity) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw.set32(
            self.reg(PIC_MEIGWCTRL_OFFSET, source),
            (polarity as u32) << MEIGWCTRL_POLARITY_BIT_OFFSET,
        );
    }

    /// Routes `source` to `hart`; only that hart will see it pending or claim it.
    pub fn delegate_to_hart(&self, source: u32, hart: HartId) {
        self.check_source(source);
        psp_assert!(
            hart.as_usize() < self.state.config.num_harts,
            InvalidHartId,
            hart.as_usize()
        );
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw
            .write32(self.reg(PIC_MEIDEL_OFFSET, source), hart.as_usize() as u32);
        debug!("pic: source {} delegated to hart {}", source, hart.as_usize());
    }

    pub fn is_pending(&self, source: u32) -> bool {
        self.pending_bit(PIC_MEIP_OFFSET, source)
    }

    /// Like [`Self::is_pending`], through the bank that only shows sources delegated
    /// to the calling hart.
    pub fn is_pending_on_hart(&self, source: u32) -> bool {
        self.pending_bit(PIC_MEITP_OFFSET, source)
    }

    // The bit index is derived from the register address with 32-bit wrapping
    // arithmetic and the shift count is taken mod 32, as `sll` does on RV32.
    fn pending_bit(&self, bank: usize, source: u32) -> bool {
        self.check_source(source);
        let register = self.state.config.pic_base.as_usize()
            + bank
            + REG32_BYTE_WIDTH * (source >> 5) as usize;
        let bit = source.wrapping_sub((register as u32).wrapping_mul(REG32_BIT_WIDTH));
        self.hw.read32(PhysAddr::from_usize(register)) & 1u32.wrapping_shl(bit) != 0
    }

    pub fn clear_pending(&self, source: u32) {
        self.check_source(source);
        let _section = self.state.lock.lock_irqsave(self.hw);
        self.hw.write32(self.reg(PIC_MEIGWCLR_OFFSET, source), 0);
    }

    /// Source id latched by the last capture.
    pub fn claim_id(&self) -> u32 {
        ((self.hw.read_csr(CSR_MEIHAP) & MEIHAP_CLAIMID_MASK) >> MEIHAP_CLAIMID_SHIFT) as u32
    }

    pub fn current_priority(&self) -> u32 {
        (self.hw.read_csr(CSR_MEICIDPL) & MEICIDPL_CLIDPRI_MASK) as u32
    }

    pub fn set_vector_table_address(&self, addr: usize) {
        psp_assert!(addr != 0, NullVectorTable);
        let _irq = LocalInterruptGuard::enter(self.hw);
        self.hw.write_csr(CSR_MEIVT, addr);
        trace!("pic: meivt <- {:#x}", addr);
    }
}
