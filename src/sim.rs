//! Host-side model of a multi-hart SweRV core: one shared PIC register file, the
//! machine timer and a CSR file per hart.
//!
//! Every CSR access advances the hart's internal timers by one cycle afterwards, and
//! every `mtime` read advances `mtime` by one, so time only moves when code looks at
//! the hardware.

use axerrno::{AxError, AxResult};
use log::trace;
use memory_addr::PhysAddr;
use spin::Mutex;

use crate::config::PspConfig;
use crate::consts::*;
use crate::error::{ErrorCode, ErrorReport, fatal, psp_assert};
use crate::hal::{Csr, HartId, Mmio, Platform};
use crate::timers::TimerControl;

const PENDING_WORDS: usize = PIC_MAX_SOURCES / REG32_BIT_WIDTH as usize;
const BANK_SIZE: usize = PIC_MAX_SOURCES * REG32_BYTE_WIDTH;

/// Width of a single bus access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Word,
    Dword,
    Qword,
}

struct PicRegs {
    priority: [u32; PIC_MAX_SOURCES],
    pending: [u32; PENDING_WORDS],
    enable: [u32; PIC_MAX_SOURCES],
    mpiccfg: u32,
    gateway: [u32; PIC_MAX_SOURCES],
    delegation: [u32; PIC_MAX_SOURCES],
}

impl PicRegs {
    const fn new() -> Self {
        Self {
            priority: [0; PIC_MAX_SOURCES],
            pending: [0; PENDING_WORDS],
            enable: [0; PIC_MAX_SOURCES],
            mpiccfg: 0,
            gateway: [0; PIC_MAX_SOURCES],
            delegation: [0; PIC_MAX_SOURCES],
        }
    }

    fn index_and_bit(source: usize) -> (usize, u32) {
        (
            source / REG32_BIT_WIDTH as usize,
            source as u32 % REG32_BIT_WIDTH,
        )
    }

    fn is_pending(&self, source: usize) -> bool {
        let (index, bit) = Self::index_and_bit(source);
        self.pending[index] & (1 << bit) != 0
    }

    /// Pending word `word` as seen through `meitp` by `hart`.
    fn pending_for_hart(&self, word: usize, hart: usize) -> u32 {
        let mut visible = 0;
        for bit in 0..REG32_BIT_WIDTH {
            let source = word * REG32_BIT_WIDTH as usize + bit as usize;
            if self.delegation[source] as usize == hart {
                visible |= 1 << bit;
            }
        }
        self.pending[word] & visible
    }

    /// Highest-priority source that is pending, enabled, delegated to `hart` and
    /// beyond `threshold`. Ties go to the lowest source id.
    fn best_candidate(&self, hart: usize, threshold: u32) -> Option<(usize, u32)> {
        let reversed = self.mpiccfg & MPICCFG_PRIORD_MASK != 0;
        let mut best: Option<(usize, u32)> = None;

        for source in 1..PIC_MAX_SOURCES {
            if !self.is_pending(source)
                || self.enable[source] & MEIE_INT_EN_MASK == 0
                || self.delegation[source] as usize != hart
            {
                continue;
            }
            let priority = self.priority[source];
            let (beyond_threshold, beats_best) = if reversed {
                (priority < threshold, best.is_none_or(|(_, p)| priority < p))
            } else {
                (priority > threshold, best.is_none_or(|(_, p)| priority > p))
            };
            if beyond_threshold && beats_best {
                best = Some((source, priority));
            }
        }
        best
    }
}

#[derive(Clone, Copy, Default)]
struct SimTimer {
    count: u32,
    bound: u32,
    control: u32,
    expired: bool,
}

impl SimTimer {
    fn control(&self) -> TimerControl {
        TimerControl::from_bits_truncate(self.control)
    }

    /// Advances by one if `advance`; returns whether the counter wrapped at its bound.
    fn step(&mut self, advance: bool) -> bool {
        if !advance {
            return false;
        }
        if self.count == self.bound {
            self.count = 0;
            self.expired = true;
            true
        } else {
            self.count = self.count.wrapping_add(1);
            false
        }
    }
}

#[derive(Default)]
struct CsrFile {
    mstatus: usize,
    meivt: usize,
    meipt: usize,
    meicidpl: usize,
    meicurpl: usize,
    meihap: usize,
    timers: [SimTimer; 2],
}

impl CsrFile {
    fn read(&self, csr: u16, hart: HartId) -> usize {
        match csr {
            CSR_MSTATUS => self.mstatus,
            CSR_MHARTID => hart.as_usize(),
            CSR_MEIVT => self.meivt,
            CSR_MEIPT => self.meipt,
            CSR_MEICPCT => 0,
            CSR_MEICIDPL => self.meicidpl,
            CSR_MEICURPL => self.meicurpl,
            CSR_MEIHAP => self.meihap,
            CSR_MITCNT0 => self.timers[0].count as usize,
            CSR_MITBND0 => self.timers[0].bound as usize,
            CSR_MITCTL0 => self.timers[0].control as usize,
            CSR_MITCNT1 => self.timers[1].count as usize,
            CSR_MITBND1 => self.timers[1].bound as usize,
            CSR_MITCTL1 => self.timers[1].control as usize,
            other => unknown_csr(other),
        }
    }

    fn write(&mut self, csr: u16, value: usize) {
        match csr {
            CSR_MSTATUS => self.mstatus = value,
            CSR_MEIVT => self.meivt = value & MEIVT_BASE_MASK,
            CSR_MEIPT => self.meipt = value & MEIPT_PRITHRESH_MASK,
            CSR_MEICIDPL => self.meicidpl = value & MEICIDPL_CLIDPRI_MASK,
            CSR_MEICURPL => self.meicurpl = value & MEICURPL_CURRPRI_MASK,
            // read-only
            CSR_MHARTID | CSR_MEIHAP | CSR_MEICPCT => {}
            CSR_MITCNT0 => self.timers[0].count = value as u32,
            CSR_MITBND0 => self.timers[0].bound = value as u32,
            CSR_MITCTL0 => {
                self.timers[0].control =
                    (TimerControl::from_bits_truncate(value as u32) - TimerControl::CASCADE).bits()
            }
            CSR_MITCNT1 => self.timers[1].count = value as u32,
            CSR_MITBND1 => self.timers[1].bound = value as u32,
            CSR_MITCTL1 => self.timers[1].control = TimerControl::from_bits_truncate(value as u32).bits(),
            other => unknown_csr(other),
        }
    }

    /// One core clock.
    fn tick(&mut self) {
        let enabled0 = self.timers[0].control().contains(TimerControl::ENABLE);
        let overflow0 = self.timers[0].step(enabled0);

        let control1 = self.timers[1].control();
        let advance1 = control1.contains(TimerControl::ENABLE)
            && (!control1.contains(TimerControl::CASCADE) || overflow0);
        self.timers[1].step(advance1);
    }
}

#[cold]
fn unknown_csr(csr: u16) -> ! {
    fatal(&ErrorReport::new(ErrorCode::UnknownCsr, csr as usize, file!(), line!()))
}

struct MachineTimerRegs {
    mtime: u64,
    mtimecmp: u64,
}

pub struct SimSoc {
    config: PspConfig,
    pic: Mutex<PicRegs>,
    machine_timer: Mutex<MachineTimerRegs>,
    harts: [Mutex<CsrFile>; MAX_HARTS],
}

impl SimSoc {
    pub fn new(config: PspConfig) -> Self {
        config.validate();
        Self {
            config,
            pic: Mutex::new(PicRegs::new()),
            machine_timer: Mutex::new(MachineTimerRegs {
                mtime: 0,
                mtimecmp: u64::MAX,
            }),
            harts: core::array::from_fn(|_| Mutex::new(CsrFile::default())),
        }
    }

    pub fn config(&self) -> &PspConfig {
        &self.config
    }

    /// Handle for code running on hart `id`.
    pub fn hart(&self, id: usize) -> SimHart<'_> {
        psp_assert!(id < self.config.num_harts, InvalidHartId, id);
        SimHart {
            soc: self,
            hart: HartId::new(id),
        }
    }

    /// Latches an interrupt request from `source` in its gateway.
    pub fn raise(&self, source: u32) {
        let (index, bit) = PicRegs::index_and_bit(source as usize);
        self.pic.lock().pending[index] |= 1 << bit;
    }

    pub fn get_pending(&self, source: u32) -> bool {
        self.pic.lock().is_pending(source as usize)
    }

    pub fn get_prio(&self, source: u32) -> u32 {
        self.pic.lock().priority[source as usize]
    }

    pub fn get_enable(&self, source: u32) -> bool {
        self.pic.lock().enable[source as usize] & MEIE_INT_EN_MASK != 0
    }

    pub fn get_gateway(&self, source: u32) -> u32 {
        self.pic.lock().gateway[source as usize]
    }

    pub fn get_delegation(&self, source: u32) -> u32 {
        self.pic.lock().delegation[source as usize]
    }

    pub fn get_mtimecmp(&self) -> u64 {
        self.machine_timer.lock().mtimecmp
    }

    /// Bus read of `addr` issued by `hart`.
    pub fn handle_read(&self, addr: PhysAddr, width: AccessWidth, hart: HartId) -> AxResult<u64> {
        let val = if let Some(offset) = self.pic_offset(addr) {
            if width != AccessWidth::Dword {
                return Err(AxError::InvalidInput);
            }
            self.read_pic(offset, hart)? as u64
        } else {
            self.read_machine_timer(addr, width)?
        };
        trace!(
            "sim handle_read: addr={:#x}, width={:?}, hart={}, val={:#x}",
            addr.as_usize(),
            width,
            hart.as_usize(),
            val
        );
        Ok(val)
    }

    /// Bus write of `val` to `addr` issued by `hart`.
    pub fn handle_write(&self, addr: PhysAddr, width: AccessWidth, val: u64, hart: HartId) -> AxResult {
        trace!(
            "sim handle_write: addr={:#x}, width={:?}, hart={}, val={:#x}",
            addr.as_usize(),
            width,
            hart.as_usize(),
            val
        );
        if let Some(offset) = self.pic_offset(addr) {
            if width != AccessWidth::Dword {
                return Err(AxError::InvalidInput);
            }
            self.write_pic(offset, val as u32)
        } else {
            self.write_machine_timer(addr, width, val)
        }
    }

    fn pic_offset(&self, addr: PhysAddr) -> Option<usize> {
        let base = self.config.pic_base.as_usize();
        let addr = addr.as_usize();
        (base..base + PIC_WINDOW_SIZE)
            .contains(&addr)
            .then(|| addr - base)
    }

    /// Splits a bank offset into the bank base and the source or word index.
    fn decode(offset: usize) -> AxResult<(usize, usize)> {
        if offset % REG32_BYTE_WIDTH != 0 {
            return Err(AxError::BadAddress);
        }
        let (bank, len) = match offset {
            o if o >= PIC_MEIDEL_OFFSET => (PIC_MEIDEL_OFFSET, BANK_SIZE),
            o if o >= PIC_MEIGWCLR_OFFSET => (PIC_MEIGWCLR_OFFSET, BANK_SIZE),
            o if o >= PIC_MEIGWCTRL_OFFSET => (PIC_MEIGWCTRL_OFFSET, BANK_SIZE),
            o if o >= PIC_MPICCFG_OFFSET => (PIC_MPICCFG_OFFSET, REG32_BYTE_WIDTH),
            o if o >= PIC_MEIE_OFFSET => (PIC_MEIE_OFFSET, BANK_SIZE),
            o if o >= PIC_MEITP_OFFSET => (PIC_MEITP_OFFSET, PENDING_WORDS * REG32_BYTE_WIDTH),
            o if o >= PIC_MEIP_OFFSET => (PIC_MEIP_OFFSET, PENDING_WORDS * REG32_BYTE_WIDTH),
            _ => (PIC_MEIPL_OFFSET, BANK_SIZE),
        };
        if offset - bank >= len {
            return Err(AxError::BadAddress);
        }
        Ok((bank, (offset - bank) / REG32_BYTE_WIDTH))
    }

    fn read_pic(&self, offset: usize, hart: HartId) -> AxResult<u32> {
        let (bank, index) = Self::decode(offset)?;
        let regs = self.pic.lock();
        let val = match bank {
            PIC_MEIPL_OFFSET => regs.priority[index],
            PIC_MEIP_OFFSET => regs.pending[index],
            PIC_MEITP_OFFSET => regs.pending_for_hart(index, hart.as_usize()),
            PIC_MEIE_OFFSET => regs.enable[index],
            PIC_MPICCFG_OFFSET => regs.mpiccfg,
            PIC_MEIGWCTRL_OFFSET => regs.gateway[index],
            PIC_MEIDEL_OFFSET => regs.delegation[index],
            // meigwclr is write-only
            _ => 0,
        };
        Ok(val)
    }

    fn write_pic(&self, offset: usize, val: u32) -> AxResult {
        let (bank, index) = Self::decode(offset)?;
        let mut regs = self.pic.lock();
        match bank {
            PIC_MEIPL_OFFSET => regs.priority[index] = val & MEIPL_PRIORITY_MASK,
            PIC_MEIE_OFFSET => regs.enable[index] = val & MEIE_INT_EN_MASK,
            PIC_MPICCFG_OFFSET => regs.mpiccfg = val & MPICCFG_PRIORD_MASK,
            PIC_MEIGWCTRL_OFFSET => {
                regs.gateway[index] =
                    val & ((1 << MEIGWCTRL_POLARITY_BIT_OFFSET) | (1 << MEIGWCTRL_TYPE_BIT_OFFSET))
            }
            PIC_MEIGWCLR_OFFSET => {
                let (word, bit) = PicRegs::index_and_bit(index);
                regs.pending[word] &= !(1 << bit);
            }
            PIC_MEIDEL_OFFSET => regs.delegation[index] = val,
            // meip and meitp are read-only
            _ => {}
        }
        Ok(())
    }

    fn read_machine_timer(&self, addr: PhysAddr, width: AccessWidth) -> AxResult<u64> {
        let mut regs = self.machine_timer.lock();
        let (reg, high) = self.machine_timer_register(addr, width)?;
        let value = if reg == self.config.mtime {
            let now = regs.mtime;
            regs.mtime = regs.mtime.wrapping_add(1);
            now
        } else {
            regs.mtimecmp
        };
        Ok(match (width, high) {
            (AccessWidth::Qword, _) => value,
            (_, false) => value & LEAST_SIGNIFICANT_32_BIT_MASK,
            (_, true) => value >> 32,
        })
    }

    fn write_machine_timer(&self, addr: PhysAddr, width: AccessWidth, val: u64) -> AxResult {
        let mut regs = self.machine_timer.lock();
        let (reg, high) = self.machine_timer_register(addr, width)?;
        let target = if reg == self.config.mtime {
            &mut regs.mtime
        } else {
            &mut regs.mtimecmp
        };
        *target = match (width, high) {
            (AccessWidth::Qword, _) => val,
            (_, false) => (*target & !LEAST_SIGNIFICANT_32_BIT_MASK) | (val & LEAST_SIGNIFICANT_32_BIT_MASK),
            (_, true) => (*target & LEAST_SIGNIFICANT_32_BIT_MASK) | (val << 32),
        };
        Ok(())
    }

    /// Which of `mtime`/`mtimecmp` `addr` hits, and whether it is the upper half.
    fn machine_timer_register(&self, addr: PhysAddr, width: AccessWidth) -> AxResult<(PhysAddr, bool)> {
        for reg in [self.config.mtime, self.config.mtimecmp] {
            match width {
                AccessWidth::Qword if addr == reg => return Ok((reg, false)),
                AccessWidth::Dword if addr == reg => return Ok((reg, false)),
                AccessWidth::Dword if addr == reg + REG32_BYTE_WIDTH => return Ok((reg, true)),
                AccessWidth::Byte | AccessWidth::Word if addr == reg => return Err(AxError::InvalidInput),
                _ => {}
            }
        }
        Err(AxError::BadAddress)
    }
}

/// One hart of a [`SimSoc`].
#[derive(Clone, Copy)]
pub struct SimHart<'a> {
    soc: &'a SimSoc,
    hart: HartId,
}

impl SimHart<'_> {
    /// Returns and clears the expiry flag of internal timer `channel`.
    pub fn take_timer_expired(&self, channel: usize) -> bool {
        let mut csrs = self.soc.harts[self.hart.as_usize()].lock();
        core::mem::take(&mut csrs.timers[channel].expired)
    }

    fn update(&self, csr: u16, f: impl FnOnce(usize) -> usize) -> usize {
        if csr == CSR_MEICPCT {
            if f(0) & MEICPCT_CAPTURE != 0 {
                self.capture();
            }
            return 0;
        }
        let mut csrs = self.soc.harts[self.hart.as_usize()].lock();
        let old = csrs.read(csr, self.hart);
        csrs.write(csr, f(old));
        csrs.tick();
        old
    }

    /// Latches the claim id and priority of the best candidate into `meihap` and
    /// `meicidpl`. Claim id 0 means nothing qualified.
    fn capture(&self) {
        let threshold = self.soc.harts[self.hart.as_usize()].lock().meipt as u32;
        let best = self
            .soc
            .pic
            .lock()
            .best_candidate(self.hart.as_usize(), threshold);

        let mut csrs = self.soc.harts[self.hart.as_usize()].lock();
        let (id, priority) = best.unwrap_or((0, csrs.meicidpl as u32));
        csrs.meicidpl = priority as usize;
        csrs.meihap = (csrs.meivt & MEIVT_BASE_MASK) | (id << MEIHAP_CLAIMID_SHIFT);
        csrs.tick();
    }

    fn bus_fault(&self, addr: PhysAddr, err: AxError) -> ! {
        trace!("sim bus fault on hart {}: {:?}", self.hart.as_usize(), err);
        fatal(&ErrorReport::new(ErrorCode::BusFault, addr.as_usize(), file!(), line!()))
    }
}

impl Csr for SimHart<'_> {
    fn read_csr(&self, csr: u16) -> usize {
        let mut csrs = self.soc.harts[self.hart.as_usize()].lock();
        let value = csrs.read(csr, self.hart);
        csrs.tick();
        value
    }

    fn write_csr(&self, csr: u16, value: usize) {
        self.update(csr, |_| value);
    }

    fn set_csr(&self, csr: u16, mask: usize) {
        self.update(csr, |old| old | mask);
    }

    fn clear_csr(&self, csr: u16, mask: usize) {
        self.update(csr, |old| old & !mask);
    }

    fn read_and_clear_csr(&self, csr: u16, mask: usize) -> usize {
        self.update(csr, |old| old & !mask)
    }
}

impl Mmio for SimHart<'_> {
    fn read32(&self, addr: PhysAddr) -> u32 {
        match self.soc.handle_read(addr, AccessWidth::Dword, self.hart) {
            Ok(val) => val as u32,
            Err(err) => self.bus_fault(addr, err),
        }
    }

    fn write32(&self, addr: PhysAddr, value: u32) {
        if let Err(err) = self.soc.handle_write(addr, AccessWidth::Dword, value as u64, self.hart) {
            self.bus_fault(addr, err);
        }
    }

    fn read64(&self, addr: PhysAddr) -> u64 {
        match self.soc.handle_read(addr, AccessWidth::Qword, self.hart) {
            Ok(val) => val,
            Err(err) => self.bus_fault(addr, err),
        }
    }

    fn write64(&self, addr: PhysAddr, value: u64) {
        if let Err(err) = self.soc.handle_write(addr, AccessWidth::Qword, value, self.hart) {
            self.bus_fault(addr, err);
        }
    }
}

impl Platform for SimHart<'_> {
    fn hart_id(&self) -> HartId {
        self.hart
    }
}
