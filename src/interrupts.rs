use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::consts::{CSR_MSTATUS, MAX_HARTS, MSTATUS_MIE};
use crate::error::psp_assert;
use crate::hal::{Csr, Platform};

pub fn disable_interrupts<C: Csr + ?Sized>(hw: &C) -> usize {
    hw.read_and_clear_csr(CSR_MSTATUS, MSTATUS_MIE) & MSTATUS_MIE
}

// Only sets MIE if it was set when saved.
pub fn restore_interrupts<C: Csr + ?Sized>(hw: &C, saved: usize) {
    hw.set_csr(CSR_MSTATUS, saved & MSTATUS_MIE);
}

pub fn enable_interrupts<C: Csr + ?Sized>(hw: &C) {
    hw.set_csr(CSR_MSTATUS, MSTATUS_MIE);
}

pub fn interrupts_enabled<C: Csr + ?Sized>(hw: &C) -> bool {
    hw.read_csr(CSR_MSTATUS) & MSTATUS_MIE != 0
}

/// Keeps this hart's interrupts masked for as long as it lives.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct LocalInterruptGuard<'a, C: Csr + ?Sized> {
    hw: &'a C,
    saved: usize,
}

impl<'a, C: Csr + ?Sized> LocalInterruptGuard<'a, C> {
    pub fn enter(hw: &'a C) -> Self {
        let saved = disable_interrupts(hw);
        Self { hw, saved }
    }

    pub fn saved_state(&self) -> usize {
        self.saved
    }
}

impl<C: Csr + ?Sized> Drop for LocalInterruptGuard<'_, C> {
    fn drop(&mut self) {
        restore_interrupts(self.hw, self.saved);
    }
}

/// Per-hart nesting of interrupt-disabled sections: the first `enter` saves the
/// interrupt state, the matching last `exit` restores it.
pub struct CriticalNesting {
    depth: [AtomicU32; MAX_HARTS],
    saved: [AtomicUsize; MAX_HARTS],
}

impl CriticalNesting {
    pub const fn new() -> Self {
        Self {
            depth: [const { AtomicU32::new(0) }; MAX_HARTS],
            saved: [const { AtomicUsize::new(0) }; MAX_HARTS],
        }
    }

    pub fn enter<P: Platform + ?Sized>(&self, hw: &P) {
        let state = disable_interrupts(hw);
        // Interrupts are off from here on and only this hart touches its slot.
        let hart = hw.hart_id().as_usize();
        if self.depth[hart].load(Ordering::Relaxed) == 0 {
            self.saved[hart].store(state, Ordering::Relaxed);
        }
        self.depth[hart].fetch_add(1, Ordering::Relaxed);
    }

    pub fn exit<P: Platform + ?Sized>(&self, hw: &P) {
        let hart = hw.hart_id().as_usize();
        let depth = self.depth[hart].load(Ordering::Relaxed);
        psp_assert!(depth > 0, Unbalanced, hart);

        self.depth[hart].store(depth - 1, Ordering::Relaxed);
        if depth == 1 {
            restore_interrupts(hw, self.saved[hart].load(Ordering::Relaxed));
        }
    }

    pub fn depth<P: Platform + ?Sized>(&self, hw: &P) -> u32 {
        self.depth[hw.hart_id().as_usize()].load(Ordering::Relaxed)
    }
}

impl Default for CriticalNesting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PspConfig;
    use crate::sim::SimSoc;

    #[test]
    fn guard_restores_enabled_state() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        enable_interrupts(&hart);
        {
            let guard = LocalInterruptGuard::enter(&hart);
            assert_eq!(guard.saved_state(), MSTATUS_MIE);
            assert!(!interrupts_enabled(&hart));
        }
        assert!(interrupts_enabled(&hart));
    }

    #[test]
    fn nested_guards_do_not_enable_early() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        enable_interrupts(&hart);

        let outer = LocalInterruptGuard::enter(&hart);
        {
            let inner = LocalInterruptGuard::enter(&hart);
            assert_eq!(inner.saved_state(), 0);
        }
        assert!(!interrupts_enabled(&hart));
        drop(outer);
        assert!(interrupts_enabled(&hart));
    }

    #[test]
    fn guard_keeps_disabled_state_disabled() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(1);
        let _ = disable_interrupts(&hart);
        drop(LocalInterruptGuard::enter(&hart));
        assert!(!interrupts_enabled(&hart));
    }

    #[test]
    fn critical_nesting_restores_on_outermost_exit() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let nesting = CriticalNesting::new();
        enable_interrupts(&hart);

        nesting.enter(&hart);
        nesting.enter(&hart);
        assert_eq!(nesting.depth(&hart), 2);
        nesting.exit(&hart);
        assert!(!interrupts_enabled(&hart));
        nesting.exit(&hart);
        assert!(interrupts_enabled(&hart));
        assert_eq!(nesting.depth(&hart), 0);
    }

    #[test]
    #[should_panic(expected = "Unbalanced")]
    fn unbalanced_exit_is_fatal() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        CriticalNesting::new().exit(&hart);
    }
}
