//! Per-hart internal timers (`mitcnt`/`mitbnd`/`mitctl`) and the memory-mapped
//! machine timer.
//!
//! The internal timers are hart-private, so multi-step sequences only need local
//! interrupts masked, never the cross-hart lock.

use bitflags::bitflags;
use log::{debug, trace};
use memory_addr::PhysAddr;

use crate::config::PspConfig;
use crate::consts::*;
use crate::error::psp_assert;
use crate::hal::{Csr, Mmio};
use crate::interrupts::LocalInterruptGuard;

bitflags! {
    /// Bits of `mitctl0` / `mitctl1`.
    pub struct TimerControl: u32 {
        const ENABLE = 1 << 0;
        /// Keep counting while the core is halted in sleep.
        const HALT_EN = 1 << 1;
        /// Keep counting while the core is stalled by `pause`.
        const PAUSE_EN = 1 << 2;
        /// Channel 1 only: count channel 0 overflows instead of cycles.
        const CASCADE = 1 << 3;
    }
}

impl TimerControl {
    const fn csr_mask(self) -> usize {
        self.bits() as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerId {
    Timer0,
    Timer1,
}

impl TimerId {
    const fn counter(self) -> u16 {
        match self {
            Self::Timer0 => CSR_MITCNT0,
            Self::Timer1 => CSR_MITCNT1,
        }
    }

    const fn bound(self) -> u16 {
        match self {
            Self::Timer0 => CSR_MITBND0,
            Self::Timer1 => CSR_MITBND1,
        }
    }

    const fn control(self) -> u16 {
        match self {
            Self::Timer0 => CSR_MITCTL0,
            Self::Timer1 => CSR_MITCTL1,
        }
    }
}

/// One 32-bit counter/bound pair of the calling hart.
pub struct TimerChannel<'a, C: Csr + ?Sized> {
    hw: &'a C,
    id: TimerId,
}

impl<'a, C: Csr + ?Sized> TimerChannel<'a, C> {
    pub fn new(hw: &'a C, id: TimerId) -> Self {
        Self { hw, id }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Stops the channel and arms it to count from 0 up to `period`. Also takes
    /// channel 1 out of cascade mode.
    pub fn setup(&self, period: u32) {
        let _irq = LocalInterruptGuard::enter(self.hw);
        self.hw.clear_csr(self.id.control(), TimerControl::ENABLE.csr_mask());
        self.hw.write_csr(self.id.bound(), period as usize);
        self.hw.write_csr(self.id.counter(), 0);
        self.hw.clear_csr(CSR_MITCTL1, TimerControl::CASCADE.csr_mask());
        debug!("timer {:?}: setup period {:#x}", self.id, period);
    }

    /// Moves the bound to `period` cycles past the current count without resetting the
    /// counter, then starts the channel.
    pub fn setup_and_run(&self, period: u32) {
        let _irq = LocalInterruptGuard::enter(self.hw);
        let now = self.get();
        self.hw
            .write_csr(self.id.bound(), now.wrapping_add(period) as usize);
        self.run();
        trace!("timer {:?}: re-armed at {:#x} + {:#x}", self.id, now, period);
    }

    pub fn run(&self) {
        self.hw
            .set_csr(self.id.control(), TimerControl::ENABLE.csr_mask());
    }

    pub fn pause(&self) {
        self.hw
            .clear_csr(self.id.control(), TimerControl::ENABLE.csr_mask());
    }

    pub fn get(&self) -> u32 {
        self.hw.read_csr(self.id.counter()) as u32
    }

    pub fn get_bound(&self) -> u32 {
        self.hw.read_csr(self.id.bound()) as u32
    }

    pub fn control(&self) -> TimerControl {
        TimerControl::from_bits_truncate(self.hw.read_csr(self.id.control()) as u32)
    }

    pub fn enable_in_sleep(&self) {
        self.hw
            .set_csr(self.id.control(), TimerControl::HALT_EN.csr_mask());
    }

    pub fn disable_in_sleep(&self) {
        self.hw
            .clear_csr(self.id.control(), TimerControl::HALT_EN.csr_mask());
    }

    pub fn enable_in_stall(&self) {
        self.hw
            .set_csr(self.id.control(), TimerControl::PAUSE_EN.csr_mask());
    }

    pub fn disable_in_stall(&self) {
        self.hw
            .clear_csr(self.id.control(), TimerControl::PAUSE_EN.csr_mask());
    }
}

/// Both channels chained into one 64-bit timer: channel 0 supplies the low word,
/// channel 1 counts channel 0's overflows.
pub struct CascadedTimer<'a, C: Csr + ?Sized> {
    low: TimerChannel<'a, C>,
    high: TimerChannel<'a, C>,
}

impl<'a, C: Csr + ?Sized> CascadedTimer<'a, C> {
    pub fn new(hw: &'a C) -> Self {
        Self {
            low: TimerChannel::new(hw, TimerId::Timer0),
            high: TimerChannel::new(hw, TimerId::Timer1),
        }
    }

    /// Arms a `period`-cycle countdown. `period` must lie in
    /// `0x1_0000_0000..=0xFFFF_FFFE_FFFF_FFFF`; shorter periods belong on one channel.
    ///
    /// Channel 0 always wraps at `0xFFFF_FFFF`. A non-zero low word is absorbed by
    /// starting channel 0 that many cycles short of its wrap and adding one overflow
    /// to channel 1's bound.
    pub fn setup(&self, period: u64) {
        let hw = self.low.hw;
        let _irq = LocalInterruptGuard::enter(hw);
        self.low.pause();
        self.high.pause();

        let lo = (period & LEAST_SIGNIFICANT_32_BIT_MASK) as u32;
        let mut hi = (period >> 32) as u32;
        psp_assert!(hi > 0 && hi < U32_MAX, InvalidCascadePeriod, hi);

        let mut counter0 = 0;
        if lo > 0 {
            counter0 = (U32_MAX - lo) + 1;
            hi += 1;
        }

        hw.write_csr(CSR_MITBND1, hi as usize);
        hw.write_csr(CSR_MITCNT1, 0);
        hw.write_csr(CSR_MITBND0, U32_MAX as usize);
        hw.write_csr(CSR_MITCNT0, counter0 as usize);

        // Halt and pause behaviour must match on both channels while cascaded.
        let power = (TimerControl::PAUSE_EN | TimerControl::HALT_EN).csr_mask();
        hw.clear_csr(CSR_MITCTL0, power);
        hw.clear_csr(CSR_MITCTL1, power);
        hw.set_csr(CSR_MITCTL1, TimerControl::CASCADE.csr_mask());

        debug!(
            "cascaded timer: period {:#x} -> bound1 {:#x}, counter0 {:#x}",
            period, hi, counter0
        );
    }

    /// Moves both bounds the low and high word of `period` past the current counts and
    /// starts both channels. Counters keep running, so periodic ticks do not drift.
    pub fn setup_and_run(&self, period: u64) {
        let hw = self.low.hw;
        let _irq = LocalInterruptGuard::enter(hw);

        let lo = (period & LEAST_SIGNIFICANT_32_BIT_MASK) as u32;
        let hi = (period >> 32) as u32;
        hw.write_csr(CSR_MITBND0, self.low.get().wrapping_add(lo) as usize);
        hw.write_csr(CSR_MITBND1, self.high.get().wrapping_add(hi) as usize);

        let power = (TimerControl::PAUSE_EN | TimerControl::HALT_EN).csr_mask();
        hw.clear_csr(CSR_MITCTL0, power);
        hw.clear_csr(CSR_MITCTL1, power);

        self.low.run();
        self.high.run();
        trace!("cascaded timer: re-armed by {:#x}", period);
    }

    pub fn run(&self) {
        self.high.run();
        self.low.run();
    }

    pub fn pause(&self) {
        self.low.pause();
        self.high.pause();
    }

    /// Current 64-bit count. Channel 1 is read on both sides of channel 0; if it moved,
    /// channel 0 is read once more against the newer high word.
    pub fn get(&self) -> u64 {
        let hi = self.high.get();
        let mut lo = self.low.get();
        let hi_again = self.high.get();
        if hi_again != hi {
            lo = self.low.get();
        }
        ((hi_again as u64) << 32) | lo as u64
    }

    pub fn get_bound(&self) -> u64 {
        ((self.high.get_bound() as u64) << 32) | self.low.get_bound() as u64
    }

    pub fn enable_in_sleep(&self) {
        self.low.enable_in_sleep();
        self.high.enable_in_sleep();
    }

    pub fn disable_in_sleep(&self) {
        self.low.disable_in_sleep();
        self.high.disable_in_sleep();
    }

    pub fn enable_in_stall(&self) {
        self.low.enable_in_stall();
        self.high.enable_in_stall();
    }

    pub fn disable_in_stall(&self) {
        self.low.disable_in_stall();
        self.high.disable_in_stall();
    }
}

/// `mtime` / `mtimecmp`.
pub struct MachineTimer<'a, M: Mmio + ?Sized> {
    hw: &'a M,
    mtime: PhysAddr,
    mtimecmp: PhysAddr,
}

impl<'a, M: Mmio + ?Sized> MachineTimer<'a, M> {
    pub fn new(hw: &'a M, config: &PspConfig) -> Self {
        psp_assert!(
            config.mtime.as_usize() != 0 && config.mtimecmp.as_usize() != 0,
            InvalidConfig,
            config.mtime.as_usize()
        );
        Self {
            hw,
            mtime: config.mtime,
            mtimecmp: config.mtimecmp,
        }
    }

    /// Fires `period` cycles from now.
    pub fn setup_and_run(&self, period: u64) {
        let then = self.get().wrapping_add(period);
        self.hw.write64(self.mtimecmp, then);
        trace!("mtimecmp <- {:#x}", then);
    }

    pub fn get(&self) -> u64 {
        self.hw.read64(self.mtime)
    }

    pub fn get_compare(&self) -> u64 {
        self.hw.read64(self.mtimecmp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerSelect {
    Timer0,
    Timer1,
    Cascaded,
}

/// Single entry point over both internal channels and their cascade, selected per call.
pub struct InternalTimers<'a, C: Csr + ?Sized> {
    hw: &'a C,
}

impl<'a, C: Csr + ?Sized> InternalTimers<'a, C> {
    pub fn new(hw: &'a C) -> Self {
        Self { hw }
    }

    fn channel(&self, id: TimerId) -> TimerChannel<'a, C> {
        TimerChannel::new(self.hw, id)
    }

    fn cascaded(&self) -> CascadedTimer<'a, C> {
        CascadedTimer::new(self.hw)
    }

    /// Phase-preserving re-arm; a single channel only uses the low 32 bits of `period`.
    pub fn setup_and_run(&self, timer: TimerSelect, period: u64) {
        match timer {
            TimerSelect::Timer0 => self.channel(TimerId::Timer0).setup_and_run(period as u32),
            TimerSelect::Timer1 => self.channel(TimerId::Timer1).setup_and_run(period as u32),
            TimerSelect::Cascaded => self.cascaded().setup_and_run(period),
        }
    }

    pub fn counter(&self, timer: TimerSelect) -> u64 {
        match timer {
            TimerSelect::Timer0 => self.channel(TimerId::Timer0).get() as u64,
            TimerSelect::Timer1 => self.channel(TimerId::Timer1).get() as u64,
            TimerSelect::Cascaded => self.cascaded().get(),
        }
    }

    pub fn compare(&self, timer: TimerSelect) -> u64 {
        match timer {
            TimerSelect::Timer0 => self.channel(TimerId::Timer0).get_bound() as u64,
            TimerSelect::Timer1 => self.channel(TimerId::Timer1).get_bound() as u64,
            TimerSelect::Cascaded => self.cascaded().get_bound(),
        }
    }

    pub fn run(&self, timer: TimerSelect) {
        match timer {
            TimerSelect::Timer0 => self.channel(TimerId::Timer0).run(),
            TimerSelect::Timer1 => self.channel(TimerId::Timer1).run(),
            TimerSelect::Cascaded => self.cascaded().run(),
        }
    }

    pub fn pause(&self, timer: TimerSelect) {
        match timer {
            TimerSelect::Timer0 => self.channel(TimerId::Timer0).pause(),
            TimerSelect::Timer1 => self.channel(TimerId::Timer1).pause(),
            TimerSelect::Cascaded => self.cascaded().pause(),
        }
    }

    pub fn set_count_in_sleep(&self, timer: TimerSelect, enabled: bool) {
        match (timer, enabled) {
            (TimerSelect::Cascaded, true) => self.cascaded().enable_in_sleep(),
            (TimerSelect::Cascaded, false) => self.cascaded().disable_in_sleep(),
            (TimerSelect::Timer0, true) => self.channel(TimerId::Timer0).enable_in_sleep(),
            (TimerSelect::Timer0, false) => self.channel(TimerId::Timer0).disable_in_sleep(),
            (TimerSelect::Timer1, true) => self.channel(TimerId::Timer1).enable_in_sleep(),
            (TimerSelect::Timer1, false) => self.channel(TimerId::Timer1).disable_in_sleep(),
        }
    }

    pub fn set_count_in_stall(&self, timer: TimerSelect, enabled: bool) {
        match (timer, enabled) {
            (TimerSelect::Cascaded, true) => self.cascaded().enable_in_stall(),
            (TimerSelect::Cascaded, false) => self.cascaded().disable_in_stall(),
            (TimerSelect::Timer0, true) => self.channel(TimerId::Timer0).enable_in_stall(),
            (TimerSelect::Timer0, false) => self.channel(TimerId::Timer0).disable_in_stall(),
            (TimerSelect::Timer1, true) => self.channel(TimerId::Timer1).enable_in_stall(),
            (TimerSelect::Timer1, false) => self.channel(TimerId::Timer1).disable_in_stall(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimSoc;

    #[test]
    fn channel_setup_clears_cascade_and_stops() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        CascadedTimer::new(&hart).setup(0x2_0000_0000);

        let timer = TimerChannel::new(&hart, TimerId::Timer1);
        timer.setup(500);
        assert_eq!(timer.get(), 0);
        assert_eq!(timer.get_bound(), 500);
        assert!(!timer.control().intersects(TimerControl::ENABLE | TimerControl::CASCADE));
    }

    #[test]
    fn channel_counts_up_after_run() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let timer = TimerChannel::new(&hart, TimerId::Timer0);
        timer.setup(10_000);
        timer.run();

        let mut last = timer.get();
        for _ in 0..50 {
            let now = timer.get();
            assert!(now > last);
            last = now;
        }
        timer.pause();
        let frozen = timer.get();
        assert_eq!(timer.get(), frozen);
    }

    #[test]
    fn power_mode_bits_toggle() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(1);
        let timer = TimerChannel::new(&hart, TimerId::Timer0);

        timer.enable_in_sleep();
        timer.enable_in_stall();
        assert!(timer.control().contains(TimerControl::HALT_EN | TimerControl::PAUSE_EN));
        timer.disable_in_sleep();
        assert_eq!(timer.control(), TimerControl::PAUSE_EN);
        timer.disable_in_stall();
        assert!(timer.control().is_empty());
    }

    #[test]
    fn channel_rearm_keeps_counter_running() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let timer = TimerChannel::new(&hart, TimerId::Timer0);
        timer.setup(u32::MAX);
        timer.run();

        let before = timer.get();
        timer.setup_and_run(50);
        let bound = timer.get_bound();
        assert!(bound > before + 50 && bound <= before + 50 + 8);
        assert!(timer.get() > before);
    }

    #[test]
    fn cascade_absorbs_low_word() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        CascadedTimer::new(&hart).setup(0x3_0000_0001);

        assert_eq!(hart.read_csr(CSR_MITCNT0), 0xFFFF_FFFF);
        assert_eq!(hart.read_csr(CSR_MITBND1), 4);
    }

    #[test]
    fn cascade_with_zero_low_word_starts_at_zero() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let timer = CascadedTimer::new(&hart);
        timer.setup(0x2_0000_0000);

        assert_eq!(timer.get(), 0);
        assert_eq!(timer.get_bound(), 0x2_FFFF_FFFF);
        let ctl1 = TimerChannel::new(&hart, TimerId::Timer1).control();
        assert_eq!(ctl1, TimerControl::CASCADE);
    }

    #[test]
    #[should_panic(expected = "InvalidCascadePeriod")]
    fn cascade_rejects_32_bit_period() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        CascadedTimer::new(&hart).setup(0xFFFF_FFFF);
    }

    #[test]
    #[should_panic(expected = "InvalidCascadePeriod")]
    fn cascade_rejects_full_high_word() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        CascadedTimer::new(&hart).setup(0xFFFF_FFFF_0000_0000);
    }

    #[test]
    fn cascade_rearm_adds_to_both_words() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let timer = CascadedTimer::new(&hart);
        timer.setup(0x1_0000_0000);
        timer.enable_in_sleep();

        timer.setup_and_run(0x5_0000_0010);
        let bound = timer.get_bound();
        assert_eq!(bound >> 32, 5);
        assert!((bound & LEAST_SIGNIFICANT_32_BIT_MASK) >= 0x10);
        assert!(TimerChannel::new(&hart, TimerId::Timer0).control() == TimerControl::ENABLE);
        assert!(timer.get() > 0);
    }

    #[test]
    fn cascaded_read_returns_with_channel1_free_running() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let high = TimerChannel::new(&hart, TimerId::Timer1);
        high.setup(1_000);
        high.run();
        assert!(!high.control().contains(TimerControl::CASCADE));

        let timer = CascadedTimer::new(&hart);
        let first = timer.get();
        let second = InternalTimers::new(&hart).counter(TimerSelect::Cascaded);
        assert!(first >> 32 <= 1_000);
        assert!(second >> 32 <= 1_000);
        assert_eq!(first & LEAST_SIGNIFICANT_32_BIT_MASK, 0);
    }

    #[test]
    fn cascade_controls_touch_both_channels() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let low = TimerChannel::new(&hart, TimerId::Timer0);
        let high = TimerChannel::new(&hart, TimerId::Timer1);
        let power = TimerControl::HALT_EN | TimerControl::PAUSE_EN;
        low.enable_in_sleep();
        low.enable_in_stall();
        high.enable_in_sleep();
        high.enable_in_stall();

        let timer = CascadedTimer::new(&hart);
        timer.setup(0x4_0000_0000);
        assert!(low.control().is_empty());
        assert_eq!(high.control(), TimerControl::CASCADE);

        timer.run();
        assert_eq!(low.control(), TimerControl::ENABLE);
        assert_eq!(high.control(), TimerControl::ENABLE | TimerControl::CASCADE);

        timer.pause();
        assert!(!low.control().contains(TimerControl::ENABLE));
        assert!(!high.control().contains(TimerControl::ENABLE));
        let frozen = timer.get();
        assert_eq!(timer.get(), frozen);

        timer.enable_in_sleep();
        assert!(low.control().contains(TimerControl::HALT_EN));
        assert!(high.control().contains(TimerControl::HALT_EN));
        timer.enable_in_stall();
        assert!(low.control().contains(power));
        assert!(high.control().contains(power | TimerControl::CASCADE));

        timer.disable_in_sleep();
        timer.disable_in_stall();
        assert!(!low.control().intersects(power));
        assert_eq!(high.control(), TimerControl::CASCADE);
    }

    #[test]
    fn machine_timer_compare_is_relative_to_now() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let mtimer = MachineTimer::new(&hart, soc.config());

        let before = mtimer.get();
        mtimer.setup_and_run(1_000);
        assert_eq!(mtimer.get_compare(), before + 1 + 1_000);
        assert!(mtimer.get() > before);
    }

    #[test]
    fn facade_selects_channel() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let timers = InternalTimers::new(&hart);

        timers.setup_and_run(TimerSelect::Timer1, 0x1_0000_0040);
        assert_eq!(timers.compare(TimerSelect::Timer1), 0x40);
        assert_eq!(timers.counter(TimerSelect::Timer0), 0);

        timers.set_count_in_stall(TimerSelect::Cascaded, true);
        assert!(TimerChannel::new(&hart, TimerId::Timer0)
            .control()
            .contains(TimerControl::PAUSE_EN));
        timers.pause(TimerSelect::Timer1);
        let frozen = timers.counter(TimerSelect::Timer1);
        assert_eq!(timers.counter(TimerSelect::Timer1), frozen);
    }
}
