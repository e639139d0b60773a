//! Cross-hart lock for the PIC register banks.
//!
//! The lock word is a depth counter rather than a flag. Each hart remembers the last
//! value it installed and compare-and-swaps from exactly that value to `value + 1`
//! (acquire) or `value - 1` (release). A free lock reads 0 and every hart not holding
//! it remembers 0, so only one hart can move it off 0; the holder remembers the
//! current depth, so it can take the lock again from a nested helper.
//!
//! There is no backoff, no fairness and no timeout. A hart that resets while holding
//! the lock leaves it held. Test builds bound the spin and report starvation instead.

use core::hint::spin_loop;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use log::trace;

use crate::consts::MAX_HARTS;
use crate::error::psp_assert;
use crate::hal::{HartId, Platform};
use crate::interrupts::LocalInterruptGuard;

const LOCK: i32 = 1;
const UNLOCK: i32 = -1;

#[cfg(test)]
const SPIN_LIMIT: u64 = 1 << 30;

pub struct SpinLock {
    storage: AtomicU32,
    last_known: [AtomicU32; MAX_HARTS],
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            storage: AtomicU32::new(0),
            last_known: [const { AtomicU32::new(0) }; MAX_HARTS],
        }
    }

    fn lock_unlock(&self, hart: HartId, delta: i32) {
        // Only `hart` writes its own slot.
        let slot = &self.last_known[hart.as_usize()];
        let expected = slot.load(Ordering::Relaxed);
        let desired = expected.wrapping_add_signed(delta);

        #[cfg(test)]
        let mut spins: u64 = 0;

        while self
            .storage
            .compare_exchange_weak(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            #[cfg(test)]
            {
                spins += 1;
                psp_assert!(spins < SPIN_LIMIT, LockStarvation, hart.as_usize());
            }
            spin_loop();
        }

        slot.store(desired, Ordering::Relaxed);
    }

    /// Spins until `hart` holds the lock (or holds it once more).
    pub fn acquire(&self, hart: HartId) {
        self.lock_unlock(hart, LOCK);
    }

    /// Drops one level of `hart`'s hold.
    pub fn release(&self, hart: HartId) {
        psp_assert!(self.depth(hart) > 0, Unbalanced, hart.as_usize());
        self.lock_unlock(hart, UNLOCK);
    }

    pub fn lock(&self, hart: HartId) -> SpinLockGuard<'_> {
        self.acquire(hart);
        SpinLockGuard {
            lock: self,
            hart,
            _marker: PhantomData,
        }
    }

    /// Masks this hart's interrupts, then takes the lock. Both are undone, in reverse
    /// order, when the returned guard drops.
    pub fn lock_irqsave<'a, P: Platform + ?Sized>(&'a self, hw: &'a P) -> CriticalSection<'a, P> {
        let irq = LocalInterruptGuard::enter(hw);
        let hart = hw.hart_id();
        let lock = self.lock(hart);
        trace!("spinlock: hart {} holds depth {}", hart.as_usize(), self.depth(hart));
        CriticalSection { lock, _irq: irq }
    }

    /// How many times `hart` currently holds the lock.
    pub fn depth(&self, hart: HartId) -> u32 {
        self.last_known[hart.as_usize()].load(Ordering::Relaxed)
    }

    /// Raw value of the lock word.
    pub fn storage(&self) -> u32 {
        self.storage.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.storage() != 0
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinLockGuard<'s> {
    lock: &'s SpinLock,
    hart: HartId,
    _marker: PhantomData<*const ()>,
}

// Do not implement Send; lock must be released by the hart that acquired it.
unsafe impl Sync for SpinLockGuard<'_> {}

impl SpinLockGuard<'_> {
    pub fn hart(&self) -> HartId {
        self.hart
    }
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.hart);
    }
}

/// Lock held with local interrupts masked.
pub struct CriticalSection<'a, P: Platform + ?Sized> {
    // Field order matters: the lock is released before interrupts are restored.
    lock: SpinLockGuard<'a>,
    _irq: LocalInterruptGuard<'a, P>,
}

impl<P: Platform + ?Sized> CriticalSection<'_, P> {
    pub fn hart(&self) -> HartId {
        self.lock.hart()
    }
}
