//! Per-hart external interrupt vector tables and the claim/dispatch path.

use core::mem::{align_of, size_of};
use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, trace};
use static_assertions::{const_assert, const_assert_eq};

use crate::consts::*;
use crate::error::{ErrorCode, ErrorReport, fatal, psp_assert};
use crate::hal::{HartId, Platform};
use crate::pic::{ExternalInterruptController, PicState};

pub type InterruptHandler = fn();

/// Handler slots indexed by claim id. `meivt` holds the table's base address, so the
/// table is aligned to the bits `meivt` ignores.
#[repr(C, align(1024))]
pub struct VectorTable {
    entries: [Option<InterruptHandler>; PIC_MAX_SOURCES],
}

const_assert_eq!(size_of::<Option<InterruptHandler>>(), size_of::<usize>());
const_assert_eq!(align_of::<VectorTable>(), VECTOR_TABLE_ALIGN);
const_assert!((MEIHAP_CLAIMID_MASK >> MEIHAP_CLAIMID_SHIFT) < PIC_MAX_SOURCES);

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            entries: [None; PIC_MAX_SOURCES],
        }
    }

    pub fn get(&self, claim_id: u32) -> Option<InterruptHandler> {
        self.entries[claim_id as usize]
    }

    /// Installs `handler` and returns what was there before.
    pub fn replace(
        &mut self,
        claim_id: u32,
        handler: Option<InterruptHandler>,
    ) -> Option<InterruptHandler> {
        core::mem::replace(&mut self.entries[claim_id as usize], handler)
    }

    pub fn base_address(&self) -> usize {
        self as *const Self as usize
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PicState {
    /// Whether `hart` is currently running an external interrupt handler.
    pub fn in_interrupt_context(&self, hart: HartId) -> bool {
        self.isr_nesting[hart.as_usize()].load(Ordering::Acquire) > 0
    }

    pub fn isr_nesting(&self, hart: HartId) -> u32 {
        self.isr_nesting[hart.as_usize()].load(Ordering::Acquire)
    }
}

impl<P: Platform + ?Sized> ExternalInterruptController<'_, P> {
    /// Installs `handler` for `source` in the calling hart's table, points `meivt` at
    /// that table and routes `source` to the calling hart. Returns the handler it
    /// replaced.
    pub fn register_isr(&self, source: u32, handler: InterruptHandler) -> Option<InterruptHandler> {
        self.check_source(source);
        let hart = self.hw.hart_id();
        psp_assert!(
            hart.as_usize() < self.state.config().num_harts,
            InvalidHartId,
            hart.as_usize()
        );
        let _section = self.state.lock().lock_irqsave(self.hw);

        let previous = {
            let mut table = self.state.vectors[hart.as_usize()].lock();
            self.set_vector_table_address(table.base_address());
            table.replace(source, Some(handler))
        };
        // Takes the lock again; it is re-entrant for this hart.
        self.delegate_to_hart(source, hart);

        debug!(
            "vectors: hart {} source {} registered (replaced: {})",
            hart.as_usize(),
            source,
            previous.is_some()
        );
        previous
    }

    /// External interrupt entry: captures the winning source, looks up its handler
    /// in the calling hart's table and runs it. Completion is implied by the capture.
    pub fn dispatch(&self) {
        self.hw.write_csr(CSR_MEICPCT, MEICPCT_CAPTURE);
        let claim_id = self.claim_id();
        let hart = self.hw.hart_id();

        // Copy the entry out so the table is not held while the handler runs.
        let handler = self.state.vectors[hart.as_usize()].lock().get(claim_id);
        let Some(handler) = handler else {
            fatal(&ErrorReport::new(
                ErrorCode::NullHandler,
                claim_id as usize,
                file!(),
                line!(),
            ));
        };

        trace!("vectors: hart {} dispatching claim {}", hart.as_usize(), claim_id);
        let _isr = IsrNesting::enter(&self.state.isr_nesting[hart.as_usize()]);
        handler();
    }
}

/// Marks the hart as inside a handler until dropped, also when the handler unwinds.
struct IsrNesting<'a>(&'a AtomicU32);

impl<'a> IsrNesting<'a> {
    fn enter(depth: &'a AtomicU32) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self(depth)
    }
}

impl Drop for IsrNesting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;
    use crate::config::PspConfig;
    use crate::hal::Csr;
    use crate::pic::PriorityOrder;
    use crate::sim::SimSoc;

    static HITS: AtomicUsize = AtomicUsize::new(0);
    static NESTED_STATE: PicState = PicState::new(PspConfig::NEXYS_A7_EH2);
    static SAW_CONTEXT: AtomicBool = AtomicBool::new(false);

    fn count_hit() {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn other_handler() {}

    fn failing_handler() {
        panic!("handler failed");
    }

    fn observe_context() {
        SAW_CONTEXT.store(
            NESTED_STATE.in_interrupt_context(HartId::new(1)),
            Ordering::SeqCst,
        );
    }

    #[test]
    fn registration_returns_previous_handler() {
        let config = PspConfig::default();
        let soc = SimSoc::new(config);
        let state = PicState::new(config);
        let hart = soc.hart(0);
        let pic = ExternalInterruptController::new(&hart, &state);

        assert!(pic.register_isr(3, count_hit).is_none());
        let previous = pic.register_isr(3, other_handler);
        assert_eq!(previous.map(|h| h as usize), Some(count_hit as usize));
        assert!(!state.lock().is_locked());
    }

    #[test]
    fn registration_publishes_table_and_delegates() {
        let config = PspConfig::default();
        let soc = SimSoc::new(config);
        let state = PicState::new(config);
        let hart = soc.hart(1);
        let pic = ExternalInterruptController::new(&hart, &state);

        pic.register_isr(5, other_handler);
        let table = state.vectors[1].lock().base_address();
        assert_eq!(table % VECTOR_TABLE_ALIGN, 0);
        assert_eq!(hart.read_csr(CSR_MEIVT), table);
        assert_eq!(soc.get_delegation(5), 1);
    }

    #[test]
    fn dispatch_runs_claimed_handler() {
        let config = PspConfig::default();
        let soc = SimSoc::new(config);
        let state = PicState::new(config);
        let hart = soc.hart(0);
        let pic = ExternalInterruptController::new(&hart, &state);

        pic.set_priority_order(PriorityOrder::Standard);
        pic.register_isr(4, count_hit);
        pic.set_priority(4, 6);
        pic.enable(4);
        pic.set_threshold(0);
        soc.raise(4);

        let before = HITS.load(Ordering::SeqCst);
        pic.dispatch();
        assert_eq!(HITS.load(Ordering::SeqCst), before + 1);
        assert_eq!(pic.claim_id(), 4);
        assert_eq!(pic.current_priority(), 6);
    }

    #[test]
    fn handler_sees_interrupt_context() {
        let soc = SimSoc::new(PspConfig::NEXYS_A7_EH2);
        let hart = soc.hart(1);
        let pic = ExternalInterruptController::new(&hart, &NESTED_STATE);

        pic.register_isr(2, observe_context);
        pic.set_priority(2, 1);
        pic.enable(2);
        soc.raise(2);

        assert!(!NESTED_STATE.in_interrupt_context(HartId::new(1)));
        pic.dispatch();
        assert!(SAW_CONTEXT.load(Ordering::SeqCst));
        assert_eq!(NESTED_STATE.isr_nesting(HartId::new(1)), 0);
    }

    #[test]
    fn registration_from_unconfigured_hart_changes_nothing() {
        let soc = SimSoc::new(PspConfig::new(PspConfig::default().pic_base, 1, 8, 4));
        let state = PicState::new(PspConfig::default());
        let hart = soc.hart(3);
        let pic = ExternalInterruptController::new(&hart, &state);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pic.register_isr(2, other_handler)
        }));
        assert!(result.is_err());
        assert!(state.vectors[3].lock().get(2).is_none());
        assert_eq!(hart.read_csr(CSR_MEIVT), 0);
        assert_eq!(soc.get_delegation(2), 0);
        assert!(!state.lock().is_locked());
    }

    #[test]
    fn unwinding_handler_leaves_interrupt_context() {
        let config = PspConfig::default();
        let soc = SimSoc::new(config);
        let state = PicState::new(config);
        let hart = soc.hart(0);
        let pic = ExternalInterruptController::new(&hart, &state);

        pic.register_isr(3, failing_handler);
        pic.set_priority(3, 2);
        pic.enable(3);
        soc.raise(3);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pic.dispatch()));
        assert!(result.is_err());
        assert!(!state.in_interrupt_context(HartId::new(0)));
        assert_eq!(state.isr_nesting(HartId::new(0)), 0);
    }

    #[test]
    #[should_panic(expected = "NullHandler")]
    fn dispatch_without_handler_is_fatal() {
        let config = PspConfig::default();
        let soc = SimSoc::new(config);
        let state = PicState::new(config);
        let hart = soc.hart(0);
        let pic = ExternalInterruptController::new(&hart, &state);

        pic.set_priority(7, 3);
        pic.enable(7);
        soc.raise(7);
        pic.dispatch();
    }
}
