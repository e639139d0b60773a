use core::sync::atomic::{Ordering, fence};

use crate::hal::{HartId, Platform};
use crate::interrupts::CriticalNesting;
use crate::spinlock::SpinLock;

/// Task and ISR locks of an SMP scheduler port.
pub struct PortLocks {
    task: SpinLock,
    isr: SpinLock,
}

impl PortLocks {
    pub const fn new() -> Self {
        Self {
            task: SpinLock::new(),
            isr: SpinLock::new(),
        }
    }

    pub fn get_task_lock(&self, hart: HartId) {
        self.task.acquire(hart);
    }

    pub fn release_task_lock(&self, hart: HartId) {
        self.task.release(hart);
    }

    pub fn get_isr_lock(&self, hart: HartId) {
        self.isr.acquire(hart);
    }

    pub fn release_isr_lock(&self, hart: HartId) {
        self.isr.release(hart);
    }

    pub fn task_lock(&self) -> &SpinLock {
        &self.task
    }

    pub fn isr_lock(&self) -> &SpinLock {
        &self.isr
    }
}

impl Default for PortLocks {
    fn default() -> Self {
        Self::new()
    }
}

pub trait OverlayHooks {
    fn enter_critical_section(&self);

    fn exit_critical_section(&self);

    fn invalidate_data_cache(&self);
}

/// [`OverlayHooks`] over a hart's [`CriticalNesting`].
pub struct NestedCriticalHooks<'a, P: Platform + ?Sized> {
    hw: &'a P,
    nesting: &'a CriticalNesting,
}

impl<'a, P: Platform + ?Sized> NestedCriticalHooks<'a, P> {
    pub fn new(hw: &'a P, nesting: &'a CriticalNesting) -> Self {
        Self { hw, nesting }
    }
}

impl<P: Platform + ?Sized> OverlayHooks for NestedCriticalHooks<'_, P> {
    fn enter_critical_section(&self) {
        self.nesting.enter(self.hw);
    }

    fn exit_critical_section(&self) {
        self.nesting.exit(self.hw);
    }

    // SweRV has no data cache; ordering the overlay copy is enough.
    fn invalidate_data_cache(&self) {
        fence(Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::thread;

    use super::*;
    use crate::config::PspConfig;
    use crate::interrupts::{enable_interrupts, interrupts_enabled};
    use crate::sim::SimSoc;

    #[test]
    fn task_and_isr_locks_are_independent() {
        let locks = PortLocks::new();
        let hart0 = HartId::new(0);
        let hart1 = HartId::new(1);

        locks.get_task_lock(hart0);
        locks.get_isr_lock(hart1);
        assert_eq!(locks.task_lock().storage(), 1);
        assert_eq!(locks.isr_lock().storage(), 1);

        locks.get_task_lock(hart0);
        assert_eq!(locks.task_lock().depth(hart0), 2);
        locks.release_task_lock(hart0);
        locks.release_task_lock(hart0);
        locks.release_isr_lock(hart1);
        assert!(!locks.task_lock().is_locked());
        assert!(!locks.isr_lock().is_locked());
    }

    #[test]
    fn task_lock_serialises_harts() {
        let locks = PortLocks::new();
        let counter = AtomicU32::new(0);

        thread::scope(|s| {
            for id in 0..3 {
                let locks = &locks;
                let counter = &counter;
                s.spawn(move || {
                    let hart = HartId::new(id);
                    for _ in 0..1_000 {
                        locks.get_task_lock(hart);
                        let seen = counter.load(Ordering::Relaxed);
                        counter.store(seen + 1, Ordering::Relaxed);
                        locks.release_task_lock(hart);
                    }
                });
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 3_000);
        assert_eq!(locks.task_lock().storage(), 0);
    }

    #[test]
    fn overlay_hooks_nest() {
        let soc = SimSoc::new(PspConfig::default());
        let hart = soc.hart(0);
        let nesting = CriticalNesting::new();
        let hooks = NestedCriticalHooks::new(&hart, &nesting);
        enable_interrupts(&hart);

        hooks.enter_critical_section();
        hooks.enter_critical_section();
        hooks.invalidate_data_cache();
        hooks.exit_critical_section();
        assert!(!interrupts_enabled(&hart));
        hooks.exit_critical_section();
        assert!(interrupts_enabled(&hart));
    }
}
